/// Arithmetic mean of the ratings, rounded half-up to one decimal place.
/// An empty slice yields 0.
///
/// `f64::round` rounds half away from zero, which is half-up on the
/// positive 1..=5 rating domain.
pub fn average_rating(ratings: &[i64]) -> f64 {
    if ratings.is_empty() {
        return 0.0;
    }
    let sum: i64 = ratings.iter().sum();
    (sum as f64 / ratings.len() as f64 * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(average_rating(&[]), 0.0);
    }

    #[test]
    fn test_exact_mean() {
        assert_eq!(average_rating(&[5, 4, 3]), 4.0);
        assert_eq!(average_rating(&[5, 4]), 4.5);
        assert_eq!(average_rating(&[1]), 1.0);
    }

    #[test]
    fn test_rounds_to_one_decimal() {
        // 14/3 = 4.666... -> 4.7
        assert_eq!(average_rating(&[5, 5, 4]), 4.7);
        // 4/3 = 1.333... -> 1.3
        assert_eq!(average_rating(&[1, 1, 2]), 1.3);
    }

    #[test]
    fn test_half_rounds_up() {
        // 7/2 = 3.5 stays, 11/4 = 2.75 -> 2.8
        assert_eq!(average_rating(&[3, 4]), 3.5);
        assert_eq!(average_rating(&[2, 3, 3, 3]), 2.8);
    }
}
