//! Integration tests for order creation and the fulfillment state machine.

mod common;

use axum::http::Method;
use common::{decimal_field, response_json, TestApp};
use futures::future::join_all;
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;
use vendora_api::entities::order::Entity as OrderEntity;
use vendora_api::services::orders::{CreateOrderItemRequest, CreateOrderRequest};

fn order_payload(product_id: Uuid) -> serde_json::Value {
    json!({
        "items": [{
            "product_id": product_id.to_string(),
            "quantity": 2,
            "unit_price": "100000"
        }],
        "shipping_address": "12 Harbor Street, Da Nang",
        "payment_method": "wallet"
    })
}

fn create_request(product_id: Uuid) -> CreateOrderRequest {
    CreateOrderRequest {
        items: vec![CreateOrderItemRequest {
            product_id,
            quantity: 1,
            unit_price: dec!(50000),
            discount: None,
        }],
        shipping_address: "12 Harbor Street, Da Nang".to_string(),
        billing_address: None,
        payment_method: None,
    }
}

#[tokio::test]
async fn create_order_computes_totals() {
    let app = TestApp::new().await;
    let product = app.seed_product("SKU-TOTALS", dec!(100000), 10).await;

    let response = app
        .request(Method::POST, "/api/v1/orders", Some(order_payload(product.id)))
        .await;
    assert_eq!(response.status(), 201);

    let body = response_json(response).await;
    assert!(body["success"].as_bool().unwrap());

    let order = &body["data"]["order"];
    assert_eq!(decimal_field(&order["subtotal"]), dec!(200000));
    assert_eq!(decimal_field(&order["shipping_fee"]), dec!(10000));
    assert_eq!(decimal_field(&order["tax_amount"]), dec!(20000));
    assert_eq!(decimal_field(&order["total_amount"]), dec!(230000));
    assert_eq!(order["status"], "pending");
    assert_eq!(order["payment_status"], "pending");
    assert_eq!(order["order_number"], "ORDER-001");

    let items = body["data"]["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["quantity"], 2);
    assert_eq!(decimal_field(&items[0]["total_price"]), dec!(200000));
}

#[tokio::test]
async fn empty_item_list_is_a_bad_request() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({"items": [], "shipping_address": "somewhere"})),
        )
        .await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn zero_quantity_is_a_bad_request() {
    let app = TestApp::new().await;
    let product = app.seed_product("SKU-ZERO", dec!(1000), 5).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "items": [{"product_id": product.id.to_string(), "quantity": 0, "unit_price": "1000"}],
                "shipping_address": "somewhere"
            })),
        )
        .await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn missing_customer_header_is_unauthorized() {
    let app = TestApp::new().await;
    let product = app.seed_product("SKU-ANON", dec!(1000), 5).await;

    let response = app
        .request_anonymous(Method::POST, "/api/v1/orders", Some(order_payload(product.id)))
        .await;
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn get_order_resolves_items_and_product_fields() {
    let app = TestApp::new().await;
    let product = app.seed_product("SKU-DETAIL", dec!(100000), 10).await;

    let created = response_json(
        app.request(Method::POST, "/api/v1/orders", Some(order_payload(product.id)))
            .await,
    )
    .await;
    let order_id = created["data"]["order"]["id"].as_str().unwrap().to_string();

    let response = app
        .request(Method::GET, &format!("/api/v1/orders/{}", order_id), None)
        .await;
    assert_eq!(response.status(), 200);

    let body = response_json(response).await;
    let items = body["data"]["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["product_sku"], "SKU-DETAIL");
    assert_eq!(items[0]["product_name"], "Product SKU-DETAIL");
}

#[tokio::test]
async fn unknown_order_is_not_found() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", Uuid::new_v4()),
            None,
        )
        .await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn listing_is_scoped_to_the_requesting_customer() {
    let app = TestApp::new().await;
    let product = app.seed_product("SKU-SCOPE", dec!(1000), 50).await;
    let other_customer = Uuid::new_v4();

    for _ in 0..2 {
        let response = app
            .request(Method::POST, "/api/v1/orders", Some(order_payload(product.id)))
            .await;
        assert_eq!(response.status(), 201);
    }
    let response = app
        .request_as(
            other_customer,
            Method::POST,
            "/api/v1/orders",
            Some(order_payload(product.id)),
        )
        .await;
    assert_eq!(response.status(), 201);

    let body = response_json(app.request(Method::GET, "/api/v1/orders", None).await).await;
    assert_eq!(body["data"]["total"], 2);

    let body = response_json(
        app.request_as(other_customer, Method::GET, "/api/v1/orders", None)
            .await,
    )
    .await;
    assert_eq!(body["data"]["total"], 1);
}

#[tokio::test]
async fn fulfillment_walks_the_happy_path() {
    let app = TestApp::new().await;
    let product = app.seed_product("SKU-FLOW", dec!(1000), 10).await;

    let created = response_json(
        app.request(Method::POST, "/api/v1/orders", Some(order_payload(product.id)))
            .await,
    )
    .await;
    let order_id = created["data"]["order"]["id"].as_str().unwrap().to_string();
    let status_uri = format!("/api/v1/orders/{}/status", order_id);

    for status in ["processing", "shipped", "delivered", "done"] {
        let response = app
            .request(Method::PUT, &status_uri, Some(json!({"status": status})))
            .await;
        assert_eq!(response.status(), 200, "transition to {} should succeed", status);
        let body = response_json(response).await;
        assert_eq!(body["data"]["status"], status);
    }
}

#[tokio::test]
async fn terminal_orders_reject_further_transitions() {
    let app = TestApp::new().await;
    let product = app.seed_product("SKU-TERM", dec!(1000), 10).await;

    let created = response_json(
        app.request(Method::POST, "/api/v1/orders", Some(order_payload(product.id)))
            .await,
    )
    .await;
    let order_id = created["data"]["order"]["id"].as_str().unwrap().to_string();
    let status_uri = format!("/api/v1/orders/{}/status", order_id);

    for status in ["processing", "shipped", "delivered", "done"] {
        app.request(Method::PUT, &status_uri, Some(json!({"status": status})))
            .await;
    }

    // done -> processing must be refused
    let response = app
        .request(Method::PUT, &status_uri, Some(json!({"status": "processing"})))
        .await;
    assert_eq!(response.status(), 409);

    // and a terminal order cannot be cancelled either
    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/cancel", order_id),
            Some(json!({"reason": "too late"})),
        )
        .await;
    assert_eq!(response.status(), 409);
}

#[tokio::test]
async fn skipping_a_fulfillment_step_is_a_conflict() {
    let app = TestApp::new().await;
    let product = app.seed_product("SKU-SKIP", dec!(1000), 10).await;

    let created = response_json(
        app.request(Method::POST, "/api/v1/orders", Some(order_payload(product.id)))
            .await,
    )
    .await;
    let order_id = created["data"]["order"]["id"].as_str().unwrap().to_string();

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{}/status", order_id),
            Some(json!({"status": "shipped"})),
        )
        .await;
    assert_eq!(response.status(), 409);
}

#[tokio::test]
async fn unknown_status_strings_are_bad_requests() {
    let app = TestApp::new().await;
    let product = app.seed_product("SKU-BOGUS", dec!(1000), 10).await;

    let created = response_json(
        app.request(Method::POST, "/api/v1/orders", Some(order_payload(product.id)))
            .await,
    )
    .await;
    let order_id = created["data"]["order"]["id"].as_str().unwrap().to_string();

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{}/status", order_id),
            Some(json!({"status": "teleported"})),
        )
        .await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn rejection_records_the_reason() {
    let app = TestApp::new().await;
    let product = app.seed_product("SKU-REJECT", dec!(1000), 10).await;

    let created = response_json(
        app.request(Method::POST, "/api/v1/orders", Some(order_payload(product.id)))
            .await,
    )
    .await;
    let order_id = created["data"]["order"]["id"].as_str().unwrap().to_string();

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/reject", order_id),
            Some(json!({"reason": "payment risk"})),
        )
        .await;
    assert_eq!(response.status(), 200);

    let body = response_json(response).await;
    assert_eq!(body["data"]["status"], "rejected");
    assert_eq!(body["data"]["rejection_reason"], "payment risk");
}

#[tokio::test]
async fn concurrent_creations_mint_distinct_order_numbers() {
    let app = TestApp::new().await;
    let product = app.seed_product("SKU-CONC", dec!(50000), 100).await;
    let orders = app.state.services.orders.clone();
    let customer_id = app.customer_id;

    let tasks = (0..5).map(|_| {
        let orders = orders.clone();
        let request = create_request(product.id);
        async move { orders.create_order(customer_id, request).await }
    });

    let results = join_all(tasks).await;

    let mut numbers = HashSet::new();
    for result in results {
        let detail = result.expect("concurrent creation should succeed");
        assert!(
            numbers.insert(detail.order.order_number.clone()),
            "duplicate order number {}",
            detail.order.order_number
        );
    }
    assert_eq!(numbers.len(), 5);
}

#[tokio::test]
async fn numbering_retries_past_an_existing_code() {
    let app = TestApp::new().await;
    let product = app.seed_product("SKU-RETRY", dec!(50000), 100).await;
    let orders = app.state.services.orders.clone();

    let first = orders
        .create_order(app.customer_id, create_request(product.id))
        .await
        .unwrap();
    assert_eq!(first.order.order_number, "ORDER-001");

    let second = orders
        .create_order(app.customer_id, create_request(product.id))
        .await
        .unwrap();
    assert_eq!(second.order.order_number, "ORDER-002");

    // Removing the first order makes the count-based candidate collide with
    // ORDER-002; the service must retry to the next free code.
    OrderEntity::delete_by_id(first.order.id)
        .exec(&*app.state.db)
        .await
        .unwrap();

    let third = orders
        .create_order(app.customer_id, create_request(product.id))
        .await
        .unwrap();
    assert_eq!(third.order.order_number, "ORDER-003");
}
