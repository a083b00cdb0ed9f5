use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use atelier_db::queries::{is_unique_violation, product_from_rows};
use atelier_types::api::{Claims, CreateReviewRequest, ProductResponse, UpdateReviewRequest};
use atelier_types::models::{Product, Role};

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult, blocking};

const DUPLICATE_REVIEW: &str =
    "You have already reviewed this product; edit or delete your existing review instead";

fn validate_rating(rating: i64) -> ApiResult<()> {
    if !(1..=5).contains(&rating) {
        return Err(ApiError::validation(
            "rating",
            "Rating must be an integer between 1 and 5",
        ));
    }
    Ok(())
}

fn required(field: &'static str, value: &str) -> ApiResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ApiError::validation(field, format!("{field} is required")));
    }
    Ok(value.to_string())
}

/// Reassemble the product with reviews populated and the derived fields
/// recomputed from scratch — the post-mutation read every review operation
/// returns.
fn load_product(state: &AppState, product_id: &str) -> ApiResult<Product> {
    let row = state
        .db
        .get_product(product_id)?
        .ok_or_else(|| ApiError::NotFound("Product not found".into()))?;
    let reviews = state.db.reviews_for_product(product_id)?;
    Ok(product_from_rows(row, reviews))
}

pub async fn submit_review(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(product_id): Path<Uuid>,
    Json(req): Json<CreateReviewRequest>,
) -> ApiResult<(StatusCode, Json<ProductResponse>)> {
    // Business rule: the admin moderates reviews, they don't write them.
    if claims.role == Role::Admin {
        return Err(ApiError::Forbidden("Admins may not review products".into()));
    }
    let title = required("title", &req.title)?;
    let comment = required("comment", &req.comment)?;
    validate_rating(req.rating)?;

    let product = blocking(move || {
        let pid = product_id.to_string();
        let uid = claims.sub.to_string();

        if state.db.get_product(&pid)?.is_none() {
            return Err(ApiError::NotFound("Product not found".into()));
        }
        if state.db.user_review_id(&pid, &uid)?.is_some() {
            return Err(ApiError::Conflict(DUPLICATE_REVIEW.into()));
        }

        let review_id = Uuid::new_v4().to_string();
        if let Err(e) = state
            .db
            .insert_review(&review_id, &pid, &uid, &title, &comment, req.rating)
        {
            // Two first-reviews racing past the check above: the storage
            // constraint decides, the loser gets the same conflict.
            if is_unique_violation(&e) {
                return Err(ApiError::Conflict(DUPLICATE_REVIEW.into()));
            }
            return Err(e.into());
        }

        load_product(&state, &pid)
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(ProductResponse {
            success: true,
            product,
        }),
    ))
}

pub async fn edit_review(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((product_id, review_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateReviewRequest>,
) -> ApiResult<Json<ProductResponse>> {
    let title = req.title.as_deref().map(|t| required("title", t)).transpose()?;
    let comment = req
        .comment
        .as_deref()
        .map(|c| required("comment", c))
        .transpose()?;
    if let Some(rating) = req.rating {
        validate_rating(rating)?;
    }

    let product = blocking(move || {
        let pid = product_id.to_string();
        let rid = review_id.to_string();

        let review = state
            .db
            .get_review(&rid)?
            .filter(|r| r.product_id == pid)
            .ok_or_else(|| ApiError::NotFound("Review not found".into()))?;
        if review.user_id != claims.sub.to_string() {
            return Err(ApiError::Forbidden("Only the author may edit a review".into()));
        }

        state
            .db
            .update_review(&rid, title.as_deref(), comment.as_deref(), req.rating)?;

        load_product(&state, &pid)
    })
    .await?;

    Ok(Json(ProductResponse {
        success: true,
        product,
    }))
}

pub async fn delete_review(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((product_id, review_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<ProductResponse>> {
    let product = blocking(move || {
        let pid = product_id.to_string();
        let rid = review_id.to_string();

        let review = state
            .db
            .get_review(&rid)?
            .filter(|r| r.product_id == pid)
            .ok_or_else(|| ApiError::NotFound("Review not found".into()))?;
        if review.user_id != claims.sub.to_string() {
            return Err(ApiError::Forbidden(
                "Only the author may delete a review".into(),
            ));
        }

        state.db.delete_review(&rid)?;

        load_product(&state, &pid)
    })
    .await?;

    Ok(Json(ProductResponse {
        success: true,
        product,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AppStateInner;
    use atelier_db::Database;
    use std::sync::Arc;

    fn test_state() -> AppState {
        Arc::new(AppStateInner {
            db: Arc::new(Database::open_in_memory().unwrap()),
            jwt_secret: "test-secret".into(),
        })
    }

    fn seed_user(state: &AppState, name: &str, role: Role) -> Claims {
        let id = Uuid::new_v4();
        state
            .db
            .create_user(
                &id.to_string(),
                name,
                &format!("{name}@example.com"),
                "hash",
                role.as_str(),
            )
            .unwrap();
        Claims {
            sub: id,
            name: name.to_string(),
            role,
            exp: usize::MAX,
        }
    }

    fn seed_product(state: &AppState, admin: &Claims) -> Uuid {
        let id = Uuid::new_v4();
        state
            .db
            .insert_product(
                &id.to_string(),
                "Ceramic vase",
                "Hand thrown stoneware",
                35.0,
                4,
                &admin.sub.to_string(),
            )
            .unwrap();
        id
    }

    fn review_req(rating: i64) -> CreateReviewRequest {
        CreateReviewRequest {
            title: "Lovely".into(),
            comment: "Exactly as pictured".into(),
            rating,
        }
    }

    async fn submit(
        state: &AppState,
        user: &Claims,
        product: Uuid,
        rating: i64,
    ) -> ApiResult<(StatusCode, Json<ProductResponse>)> {
        submit_review(
            State(state.clone()),
            Extension(user.clone()),
            Path(product),
            Json(review_req(rating)),
        )
        .await
    }

    #[tokio::test]
    async fn test_submit_recomputes_derived_fields() {
        let state = test_state();
        let admin = seed_user(&state, "admin", Role::Admin);
        let product = seed_product(&state, &admin);

        let users: Vec<Claims> = (0..3)
            .map(|i| seed_user(&state, &format!("u{i}"), Role::User))
            .collect();

        for (user, rating) in users.iter().zip([5i64, 4, 3]) {
            let (status, res) = submit(&state, user, product, rating).await.unwrap();
            assert_eq!(status, StatusCode::CREATED);
            assert!(res.0.success);
        }

        let (_, res) = submit(&state, &seed_user(&state, "u3", Role::User), product, 4)
            .await
            .unwrap();
        // [5, 4, 3, 4] -> 4.0
        assert_eq!(res.0.product.reviews_count, 4);
        assert_eq!(res.0.product.avg_rating, 4.0);
    }

    #[tokio::test]
    async fn test_delete_recomputes_average() {
        let state = test_state();
        let admin = seed_user(&state, "admin", Role::Admin);
        let product = seed_product(&state, &admin);

        let users: Vec<Claims> = (0..3)
            .map(|i| seed_user(&state, &format!("u{i}"), Role::User))
            .collect();
        let mut last = None;
        for (user, rating) in users.iter().zip([5i64, 4, 3]) {
            let (_, res) = submit(&state, user, product, rating).await.unwrap();
            last = Some(res.0.product);
        }
        let snapshot = last.unwrap();
        assert_eq!(snapshot.avg_rating, 4.0);

        let low = snapshot.reviews.iter().find(|r| r.rating == 3).unwrap();
        let res = delete_review(
            State(state.clone()),
            Extension(users[2].clone()),
            Path((product, low.id)),
        )
        .await
        .unwrap();

        assert_eq!(res.0.product.reviews_count, 2);
        assert_eq!(res.0.product.avg_rating, 4.5);
    }

    #[tokio::test]
    async fn test_second_review_by_same_user_conflicts() {
        let state = test_state();
        let admin = seed_user(&state, "admin", Role::Admin);
        let ana = seed_user(&state, "ana", Role::User);
        let product = seed_product(&state, &admin);

        let (_, res) = submit(&state, &ana, product, 5).await.unwrap();
        assert_eq!(res.0.product.reviews_count, 1);

        let err = submit(&state, &ana, product, 4).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        let res = get_count(&state, product).await;
        assert_eq!(res, 1, "conflict must not change the review set");
    }

    #[tokio::test]
    async fn test_admin_cannot_review() {
        let state = test_state();
        let admin = seed_user(&state, "admin", Role::Admin);
        let product = seed_product(&state, &admin);

        let err = submit(&state, &admin, product, 5).await.unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
        assert_eq!(get_count(&state, product).await, 0);
    }

    #[tokio::test]
    async fn test_only_author_may_edit_or_delete() {
        let state = test_state();
        let admin = seed_user(&state, "admin", Role::Admin);
        let ana = seed_user(&state, "ana", Role::User);
        let vera = seed_user(&state, "vera", Role::User);
        let product = seed_product(&state, &admin);

        let (_, res) = submit(&state, &ana, product, 5).await.unwrap();
        let review_id = res.0.product.reviews[0].id;

        let err = edit_review(
            State(state.clone()),
            Extension(vera.clone()),
            Path((product, review_id)),
            Json(UpdateReviewRequest {
                title: Some("hijacked".into()),
                comment: None,
                rating: Some(1),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));

        let err = delete_review(
            State(state.clone()),
            Extension(vera),
            Path((product, review_id)),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));

        // The review is untouched.
        let row = state.db.get_review(&review_id.to_string()).unwrap().unwrap();
        assert_eq!(row.title, "Lovely");
        assert_eq!(row.rating, 5);
    }

    #[tokio::test]
    async fn test_edit_applies_only_provided_fields() {
        let state = test_state();
        let admin = seed_user(&state, "admin", Role::Admin);
        let ana = seed_user(&state, "ana", Role::User);
        let product = seed_product(&state, &admin);

        let (_, res) = submit(&state, &ana, product, 3).await.unwrap();
        let review_id = res.0.product.reviews[0].id;

        let res = edit_review(
            State(state.clone()),
            Extension(ana),
            Path((product, review_id)),
            Json(UpdateReviewRequest {
                title: None,
                comment: None,
                rating: Some(5),
            }),
        )
        .await
        .unwrap();

        let review = &res.0.product.reviews[0];
        assert_eq!(review.title, "Lovely");
        assert_eq!(review.rating, 5);
        assert_eq!(res.0.product.avg_rating, 5.0);
    }

    #[tokio::test]
    async fn test_validation_rejections() {
        let state = test_state();
        let admin = seed_user(&state, "admin", Role::Admin);
        let ana = seed_user(&state, "ana", Role::User);
        let product = seed_product(&state, &admin);

        for rating in [0, 6, -1] {
            let err = submit(&state, &ana, product, rating).await.unwrap_err();
            assert!(matches!(err, ApiError::Validation { field: "rating", .. }));
        }

        let err = submit_review(
            State(state.clone()),
            Extension(ana.clone()),
            Path(product),
            Json(CreateReviewRequest {
                title: "   ".into(),
                comment: "fine".into(),
                rating: 4,
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation { field: "title", .. }));

        assert_eq!(get_count(&state, product).await, 0);
    }

    #[tokio::test]
    async fn test_unknown_review_is_not_found() {
        let state = test_state();
        let admin = seed_user(&state, "admin", Role::Admin);
        let ana = seed_user(&state, "ana", Role::User);
        let product = seed_product(&state, &admin);

        let err = edit_review(
            State(state.clone()),
            Extension(ana),
            Path((product, Uuid::new_v4())),
            Json(UpdateReviewRequest {
                title: None,
                comment: None,
                rating: Some(4),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    async fn get_count(state: &AppState, product: Uuid) -> usize {
        state
            .db
            .reviews_for_product(&product.to_string())
            .unwrap()
            .len()
    }
}
