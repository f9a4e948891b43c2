use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request},
    response::Response,
    Router,
};
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use vendora_api::{
    config::AppConfig,
    db, events,
    handlers::AppServices,
    services::products::{CreateProductRequest, ProductResponse},
    AppState,
};

/// Test harness backed by an in-memory SQLite database, driving the real
/// axum router through `tower::ServiceExt::oneshot`.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    /// Default customer identity sent with authenticated requests.
    pub customer_id: Uuid,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(Self::test_config()).await
    }

    /// Base config for tests: single-connection in-memory SQLite (more
    /// connections would each get their own database), an unreachable
    /// gateway endpoint, and signature verification off unless a test
    /// turns it on.
    pub fn test_config() -> AppConfig {
        let mut cfg = AppConfig::new("sqlite::memory:", "test");
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.gateway.create_endpoint = "http://127.0.0.1:9/create".to_string();
        cfg.gateway.verify_ipn_signature = false;
        cfg
    }

    pub async fn with_config(cfg: AppConfig) -> Self {
        let pool = db::connect(&cfg).await.expect("test database");
        db::run_migrations(&pool).await.expect("migrations");
        let db = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(64);
        let event_sender = events::EventSender::new(event_tx);
        tokio::spawn(events::process_events(event_rx));

        let services = AppServices::new(db.clone(), event_sender.clone(), &cfg);
        let state = AppState {
            db,
            config: cfg,
            event_sender,
            services,
        };
        let router = vendora_api::app_router(state.clone());

        Self {
            router,
            state,
            customer_id: Uuid::new_v4(),
        }
    }

    /// Sends a request carrying the default customer identity header.
    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        self.request_as(self.customer_id, method, uri, body).await
    }

    /// Sends a request as a specific customer.
    pub async fn request_as(
        &self,
        customer_id: Uuid,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> Response {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-customer-id", customer_id.to_string());
        self.dispatch(builder, body).await
    }

    /// Sends a request without any identity header (e.g. gateway callbacks).
    pub async fn request_anonymous(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> Response {
        let builder = Request::builder().method(method).uri(uri);
        self.dispatch(builder, body).await
    }

    async fn dispatch(
        &self,
        builder: axum::http::request::Builder,
        body: Option<Value>,
    ) -> Response {
        let request = match body {
            Some(value) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(value.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        self.router.clone().oneshot(request).await.expect("response")
    }

    /// Seeds a product through the product service.
    pub async fn seed_product(&self, sku: &str, price: Decimal, stock: i32) -> ProductResponse {
        self.state
            .services
            .products
            .create_product(CreateProductRequest {
                name: format!("Product {}", sku),
                description: None,
                sku: sku.to_string(),
                price,
                stock,
            })
            .await
            .expect("seed product")
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Parses a JSON field that serializes `Decimal` as a string.
pub fn decimal_field(value: &Value) -> Decimal {
    value
        .as_str()
        .expect("decimal field serialized as string")
        .parse()
        .expect("decimal parse")
}
