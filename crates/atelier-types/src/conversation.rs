use uuid::Uuid;

/// Derive the conversation id for an unordered pair of participants.
///
/// The two ids are sorted lexicographically and joined with `_`, so either
/// side can compute the same id without a server round-trip, and the result
/// doubles as the query key for stored messages.
pub fn conversation_id(a: Uuid, b: Uuid) -> String {
    let (a, b) = (a.to_string(), b.to_string());
    if a <= b {
        format!("{a}_{b}")
    } else {
        format!("{b}_{a}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symmetric() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(conversation_id(a, b), conversation_id(b, a));
    }

    #[test]
    fn test_sorted_order() {
        let a: Uuid = "00000000-0000-0000-0000-000000000001".parse().unwrap();
        let b: Uuid = "00000000-0000-0000-0000-000000000002".parse().unwrap();
        assert_eq!(
            conversation_id(b, a),
            format!("{a}_{b}"),
            "lexicographically smaller id comes first"
        );
    }

    #[test]
    fn test_usable_as_query_key() {
        let a = Uuid::new_v4();
        let id = conversation_id(a, a);
        assert_eq!(id, format!("{a}_{a}"));
    }
}
