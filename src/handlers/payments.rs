use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use super::common::CustomerId;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::payments::{GatewayCallback, PaymentStatusResponse};
use crate::services::reconciliation::ReconciliationOutcome;
use crate::ApiResponse;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreatePaymentUrlRequest {
    pub order_id: Uuid,
    #[schema(example = "230000")]
    pub amount: Decimal,
}

/// Request a gateway redirect payload for an existing pending order
#[utoipa::path(
    post,
    path = "/api/v1/payments/create-payment-url",
    request_body = CreatePaymentUrlRequest,
    responses(
        (status = 200, description = "Gateway redirect payload", body = crate::ApiResponse<serde_json::Value>),
        (status = 400, description = "Amount mismatch", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Payment already reconciled", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway failure", body = crate::errors::ErrorResponse),
        (status = 504, description = "Gateway timeout", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn create_payment_url(
    State(state): State<AppState>,
    _customer: CustomerId,
    Json(request): Json<CreatePaymentUrlRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ServiceError> {
    let payload = state
        .services
        .payments
        .create_payment_url(request.order_id, request.amount)
        .await?;
    Ok(Json(ApiResponse::success(payload)))
}

/// Gateway callback (IPN) endpoint
///
/// Unauthenticated by necessity; inbound payloads are signature-verified
/// when verification is enabled. Business failures acknowledge with 204 so
/// the gateway does not retry them; internal errors return 5xx so it does.
#[utoipa::path(
    post,
    path = "/api/v1/payments/callback",
    request_body = GatewayCallback,
    responses(
        (status = 200, description = "Callback applied or already processed"),
        (status = 204, description = "Failure outcome recorded"),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_callback(
    State(state): State<AppState>,
    Json(callback): Json<GatewayCallback>,
) -> Result<Response, ServiceError> {
    let outcome = state
        .services
        .reconciliation
        .handle_callback(callback)
        .await?;

    match outcome {
        ReconciliationOutcome::PaymentFailed { .. } => Ok(StatusCode::NO_CONTENT.into_response()),
        outcome => Ok((StatusCode::OK, Json(ApiResponse::success(outcome))).into_response()),
    }
}

/// Poll the payment state of an order
#[utoipa::path(
    get,
    path = "/api/v1/payments/check-payment-status/{order_id}",
    params(("order_id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Payment status, or synthetic draft", body = crate::ApiResponse<PaymentStatusResponse>),
        (status = 401, description = "Missing customer identity", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn check_payment_status(
    State(state): State<AppState>,
    _customer: CustomerId,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<PaymentStatusResponse>>, ServiceError> {
    let status = state
        .services
        .payments
        .check_payment_status(order_id)
        .await?;
    Ok(Json(ApiResponse::success(status)))
}
