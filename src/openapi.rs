use axum::response::Json;
use utoipa::OpenApi;

use crate::{errors, handlers, services};

/// Generated OpenAPI document for the HTTP surface.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Vendora API",
        description = "Marketplace order lifecycle and payment reconciliation backend"
    ),
    paths(
        handlers::orders::create_order,
        handlers::orders::list_orders,
        handlers::orders::get_order,
        handlers::orders::update_order_status,
        handlers::orders::cancel_order,
        handlers::orders::reject_order,
        handlers::payments::create_payment_url,
        handlers::payments::payment_callback,
        handlers::payments::check_payment_status,
        handlers::products::create_product,
        handlers::products::list_products,
        handlers::products::get_product,
        handlers::carts::add_cart_item,
        handlers::carts::list_cart_items,
        handlers::carts::remove_cart_item,
    ),
    components(schemas(
        errors::ErrorResponse,
        services::orders::CreateOrderRequest,
        services::orders::CreateOrderItemRequest,
        services::orders::UpdateOrderStatusRequest,
        services::orders::OrderResponse,
        services::orders::OrderItemResponse,
        services::orders::OrderDetailResponse,
        services::orders::OrderListResponse,
        services::payments::GatewayCallback,
        services::payments::PaymentStatusResponse,
        services::products::CreateProductRequest,
        services::products::ProductResponse,
        services::carts::AddCartItemRequest,
        services::carts::CartItemResponse,
        crate::entities::order::OrderStatus,
        crate::entities::order::PaymentStatus,
        crate::entities::order_item::OrderItemStatus,
    )),
    tags(
        (name = "Orders", description = "Order creation and lifecycle"),
        (name = "Payments", description = "Gateway integration and reconciliation"),
        (name = "Products", description = "Catalog surface"),
        (name = "Carts", description = "Customer carts")
    )
)]
pub struct ApiDoc;

pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
