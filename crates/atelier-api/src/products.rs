use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use atelier_db::queries::product_from_rows;
use atelier_types::api::{
    Claims, CreateProductRequest, OkResponse, ProductResponse, ProductsResponse,
    UpdateProductRequest,
};
use atelier_types::models::Role;

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult, blocking};

fn require_admin(claims: &Claims) -> ApiResult<()> {
    if claims.role != Role::Admin {
        return Err(ApiError::Forbidden("Admin access required".into()));
    }
    Ok(())
}

pub async fn list_products(State(state): State<AppState>) -> ApiResult<Json<ProductsResponse>> {
    let products = blocking(move || {
        let rows = state.db.list_products()?;
        let mut products = Vec::with_capacity(rows.len());
        for row in rows {
            let reviews = state.db.reviews_for_product(&row.id)?;
            products.push(product_from_rows(row, reviews));
        }
        Ok(products)
    })
    .await?;

    Ok(Json(ProductsResponse {
        success: true,
        count: products.len(),
        products,
    }))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> ApiResult<Json<ProductResponse>> {
    let product = blocking(move || {
        let pid = product_id.to_string();
        let row = state
            .db
            .get_product(&pid)?
            .ok_or_else(|| ApiError::NotFound("Product not found".into()))?;
        let reviews = state.db.reviews_for_product(&pid)?;
        Ok(product_from_rows(row, reviews))
    })
    .await?;

    Ok(Json(ProductResponse {
        success: true,
        product,
    }))
}

pub async fn create_product(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateProductRequest>,
) -> ApiResult<(StatusCode, Json<ProductResponse>)> {
    require_admin(&claims)?;

    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::validation("name", "Name is required"));
    }
    let description = req.description.trim().to_string();
    if description.is_empty() {
        return Err(ApiError::validation("description", "Description is required"));
    }
    if req.price < 0.0 {
        return Err(ApiError::validation("price", "Price cannot be negative"));
    }
    if req.stock < 0 {
        return Err(ApiError::validation("stock", "Stock cannot be negative"));
    }

    let product_id = Uuid::new_v4();
    let product = blocking(move || {
        let pid = product_id.to_string();
        state.db.insert_product(
            &pid,
            &name,
            &description,
            req.price,
            req.stock,
            &claims.sub.to_string(),
        )?;
        let row = state
            .db
            .get_product(&pid)?
            .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("product vanished after insert")))?;
        Ok(product_from_rows(row, Vec::new()))
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

pub async fn update_product(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(product_id): Path<Uuid>,
    Json(req): Json<UpdateProductRequest>,
) -> ApiResult<Json<ProductResponse>> {
    require_admin(&claims)?;

    if let Some(price) = req.price {
        if price < 0.0 {
            return Err(ApiError::validation("price", "Price cannot be negative"));
        }
    }
    if let Some(stock) = req.stock {
        if stock < 0 {
            return Err(ApiError::validation("stock", "Stock cannot be negative"));
        }
    }

    let product = blocking(move || {
        let pid = product_id.to_string();
        let changed = state.db.update_product(
            &pid,
            req.name.as_deref(),
            req.description.as_deref(),
            req.price,
            req.stock,
        )?;
        if !changed {
            return Err(ApiError::NotFound("Product not found".into()));
        }
        let row = state
            .db
            .get_product(&pid)?
            .ok_or_else(|| ApiError::NotFound("Product not found".into()))?;
        let reviews = state.db.reviews_for_product(&pid)?;
        Ok(product_from_rows(row, reviews))
    })
    .await?;

    Ok(Json(ProductResponse {
        success: true,
        product,
    }))
}

pub async fn delete_product(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(product_id): Path<Uuid>,
) -> ApiResult<Json<OkResponse>> {
    require_admin(&claims)?;

    blocking(move || {
        if !state.db.delete_product(&product_id.to_string())? {
            return Err(ApiError::NotFound("Product not found".into()));
        }
        Ok(())
    })
    .await?;

    Ok(Json(OkResponse {
        success: true,
        message: "Product deleted".into(),
    }))
}
