use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use super::common::CustomerId;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::carts::{AddCartItemRequest, CartItemResponse};
use crate::{ApiResponse, ApiResult};

/// Add a product to the customer's cart
#[utoipa::path(
    post,
    path = "/api/v1/carts/items",
    request_body = AddCartItemRequest,
    responses(
        (status = 201, description = "Cart item stored", body = crate::ApiResponse<CartItemResponse>),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing customer identity", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
pub async fn add_cart_item(
    State(state): State<AppState>,
    customer: CustomerId,
    Json(request): Json<AddCartItemRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CartItemResponse>>), ServiceError> {
    let item = state.services.carts.add_item(customer.0, request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(item))))
}

/// List the customer's cart items
#[utoipa::path(
    get,
    path = "/api/v1/carts/items",
    responses(
        (status = 200, description = "Cart items", body = crate::ApiResponse<Vec<CartItemResponse>>),
        (status = 401, description = "Missing customer identity", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
pub async fn list_cart_items(
    State(state): State<AppState>,
    customer: CustomerId,
) -> ApiResult<Vec<CartItemResponse>> {
    let items = state.services.carts.list_items(customer.0).await?;
    Ok(Json(ApiResponse::success(items)))
}

/// Remove one cart item
#[utoipa::path(
    delete,
    path = "/api/v1/carts/items/{id}",
    params(("id" = Uuid, Path, description = "Cart item ID")),
    responses(
        (status = 204, description = "Cart item removed"),
        (status = 404, description = "Cart item not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
pub async fn remove_cart_item(
    State(state): State<AppState>,
    customer: CustomerId,
    Path(item_id): Path<Uuid>,
) -> Result<StatusCode, ServiceError> {
    state.services.carts.remove_item(customer.0, item_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
