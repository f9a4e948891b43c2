pub mod carts;
pub mod common;
pub mod orders;
pub mod payments;
pub mod products;

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::config::AppConfig;
use crate::events::EventSender;
use crate::services::{
    carts::CartService,
    orders::OrderService,
    payments::{PaymentGatewayClient, PaymentService},
    products::ProductService,
    reconciliation::ReconciliationService,
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub products: Arc<ProductService>,
    pub carts: Arc<CartService>,
    pub payments: Arc<PaymentService>,
    pub reconciliation: Arc<ReconciliationService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        config: &AppConfig,
    ) -> Self {
        let gateway = Arc::new(PaymentGatewayClient::new(config.gateway.clone()));

        let orders = Arc::new(OrderService::new(
            db.clone(),
            event_sender.clone(),
            config.pricing(),
        ));
        let products = Arc::new(ProductService::new(db.clone(), event_sender.clone()));
        let carts = Arc::new(CartService::new(db.clone(), event_sender.clone()));
        let payments = Arc::new(PaymentService::new(db.clone(), gateway.clone()));
        let reconciliation = Arc::new(ReconciliationService::new(db, event_sender, gateway));

        Self {
            orders,
            products,
            carts,
            payments,
            reconciliation,
        }
    }
}
