use crate::{
    config::PricingConfig,
    entities::order::{
        self, ActiveModel as OrderActiveModel, Entity as OrderEntity, Model as OrderModel,
        OrderStatus, PaymentStatus,
    },
    entities::order_item::{
        self, ActiveModel as OrderItemActiveModel, Entity as OrderItemEntity,
        Model as OrderItemModel, OrderItemStatus,
    },
    entities::product::{Entity as ProductEntity, Model as ProductModel},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// How many order-number candidates are tried before giving up. Conflicts
/// only occur under concurrent creation, so one or two retries suffice.
const MAX_ORDER_NUMBER_ATTEMPTS: u32 = 5;

/// Request/Response types for the order service
#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, message = "Order must contain at least one item"))]
    pub items: Vec<CreateOrderItemRequest>,

    #[validate(length(min = 1, message = "Shipping address is required"))]
    pub shipping_address: String,

    pub billing_address: Option<String>,

    pub payment_method: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateOrderItemRequest {
    pub product_id: Uuid,

    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,

    /// Unit price snapshot supplied by the storefront at checkout time.
    #[schema(example = "100000")]
    pub unit_price: Decimal,

    #[serde(default)]
    pub discount: Option<Decimal>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    /// Target fulfillment status, e.g. "processing"
    #[schema(example = "processing")]
    pub status: String,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub customer_id: Uuid,
    pub status: OrderStatus,
    pub subtotal: Decimal,
    pub shipping_fee: Decimal,
    pub tax_amount: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
    pub shipping_address: String,
    pub billing_address: Option<String>,
    pub payment_method: Option<String>,
    pub payment_status: PaymentStatus,
    pub payment_transaction_id: Option<Uuid>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderItemResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: Option<String>,
    pub product_sku: Option<String>,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
    pub discount: Decimal,
    pub status: OrderItemStatus,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderDetailResponse {
    pub order: OrderResponse,
    pub items: Vec<OrderItemResponse>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Monetary breakdown computed at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub shipping_fee: Decimal,
    pub tax_amount: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
}

/// Computes the order totals so that
/// `total_amount == subtotal + shipping_fee + tax_amount - discount_amount`.
pub fn compute_totals(
    items: &[CreateOrderItemRequest],
    pricing: &PricingConfig,
) -> Result<OrderTotals, ServiceError> {
    if items.is_empty() {
        return Err(ServiceError::ValidationError(
            "Order must contain at least one item".to_string(),
        ));
    }

    let mut subtotal = Decimal::ZERO;
    let mut discount_amount = Decimal::ZERO;

    for item in items {
        if item.quantity < 1 {
            return Err(ServiceError::ValidationError(
                "Item quantity must be at least 1".to_string(),
            ));
        }
        if item.unit_price < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Item unit price cannot be negative".to_string(),
            ));
        }
        let discount = item.discount.unwrap_or(Decimal::ZERO);
        if discount < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Item discount cannot be negative".to_string(),
            ));
        }
        subtotal += item.unit_price * Decimal::from(item.quantity);
        discount_amount += discount;
    }

    let tax_amount = (subtotal * pricing.tax_rate).round_dp(2);
    let total_amount = subtotal + pricing.shipping_fee + tax_amount - discount_amount;

    Ok(OrderTotals {
        subtotal,
        shipping_fee: pricing.shipping_fee,
        tax_amount,
        discount_amount,
        total_amount,
    })
}

fn is_unique_violation(err: &ServiceError) -> bool {
    match err {
        ServiceError::DatabaseError(db_err) => {
            matches!(db_err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
        }
        _ => false,
    }
}

/// Service for creating and transitioning orders.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    pricing: PricingConfig,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        pricing: PricingConfig,
    ) -> Self {
        Self {
            db,
            event_sender,
            pricing,
        }
    }

    /// Creates an order and all of its line items in one transaction.
    ///
    /// The order number is derived from the current order count; on a
    /// uniqueness conflict (concurrent creation) the next candidate is tried
    /// with a fresh transaction, so concurrently created orders always end
    /// up with pairwise-distinct codes.
    #[instrument(skip(self, request), fields(customer_id = %customer_id))]
    pub async fn create_order(
        &self,
        customer_id: Uuid,
        request: CreateOrderRequest,
    ) -> Result<OrderDetailResponse, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let totals = compute_totals(&request.items, &self.pricing)?;

        let db = &*self.db;
        let mut sequence = OrderEntity::find().count(db).await.map_err(|e| {
            error!(error = %e, "Failed to count orders for numbering");
            ServiceError::DatabaseError(e)
        })? + 1;

        for attempt in 0..MAX_ORDER_NUMBER_ATTEMPTS {
            let order_number = format!("ORDER-{:03}", sequence);

            match self
                .insert_order_with_items(customer_id, &order_number, &request, &totals)
                .await
            {
                Ok(detail) => {
                    info!(
                        order_id = %detail.order.id,
                        order_number = %detail.order.order_number,
                        total = %detail.order.total_amount,
                        "Order created"
                    );
                    if let Err(e) = self
                        .event_sender
                        .send(Event::OrderCreated(detail.order.id))
                        .await
                    {
                        warn!(error = %e, order_id = %detail.order.id, "Failed to send order created event");
                    }
                    return Ok(detail);
                }
                Err(e) if is_unique_violation(&e) => {
                    warn!(
                        order_number = %order_number,
                        attempt = attempt + 1,
                        "Order number already taken, retrying with next candidate"
                    );
                    sequence += 1;
                }
                Err(e) => return Err(e),
            }
        }

        Err(ServiceError::Conflict(
            "Could not allocate a unique order number".to_string(),
        ))
    }

    async fn insert_order_with_items(
        &self,
        customer_id: Uuid,
        order_number: &str,
        request: &CreateOrderRequest,
        totals: &OrderTotals,
    ) -> Result<OrderDetailResponse, ServiceError> {
        let db = &*self.db;
        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        let order_active_model = OrderActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.to_string()),
            customer_id: Set(customer_id),
            status: Set(OrderStatus::Pending),
            subtotal: Set(totals.subtotal),
            shipping_fee: Set(totals.shipping_fee),
            tax_amount: Set(totals.tax_amount),
            discount_amount: Set(totals.discount_amount),
            total_amount: Set(totals.total_amount),
            shipping_address: Set(request.shipping_address.clone()),
            billing_address: Set(request.billing_address.clone()),
            payment_method: Set(request.payment_method.clone()),
            payment_status: Set(PaymentStatus::Pending),
            payment_transaction_id: Set(None),
            rejection_reason: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        };

        let order_model = order_active_model.insert(&txn).await?;

        let mut items = Vec::with_capacity(request.items.len());
        for item in &request.items {
            let item_model = OrderItemActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                total_price: Set(item.unit_price * Decimal::from(item.quantity)),
                discount: Set(item.discount.unwrap_or(Decimal::ZERO)),
                status: Set(OrderItemStatus::Active),
                created_at: Set(now),
                updated_at: Set(Some(now)),
            }
            .insert(&txn)
            .await?;
            items.push(item_model);
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit order creation transaction");
            ServiceError::DatabaseError(e)
        })?;

        Ok(OrderDetailResponse {
            order: model_to_response(order_model),
            items: items
                .into_iter()
                .map(|item| item_to_response(item, None))
                .collect(),
        })
    }

    /// Lists a customer's orders, most recent first.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn list_orders(
        &self,
        customer_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let db = &*self.db;

        let paginator = OrderEntity::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(db, per_page.max(1));

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok(OrderListResponse {
            orders: orders.into_iter().map(model_to_response).collect(),
            total,
            page,
            per_page,
        })
    }

    /// Retrieves an order with its items and the referenced product fields.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderDetailResponse, ServiceError> {
        let db = &*self.db;

        let order = OrderEntity::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items: Vec<(OrderItemModel, Option<ProductModel>)> = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .find_also_related(ProductEntity)
            .all(db)
            .await?;

        Ok(OrderDetailResponse {
            order: model_to_response(order),
            items: items
                .into_iter()
                .map(|(item, product)| item_to_response(item, product))
                .collect(),
        })
    }

    /// Loads the bare order model. Used by the payment services.
    pub async fn find_order_model(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    /// Transitions an order's fulfillment status, enforcing the transition
    /// table. Same-status updates are accepted and leave the row untouched.
    #[instrument(skip(self), fields(order_id = %order_id, new_status = %new_status))]
    pub async fn update_order_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
        reason: Option<String>,
    ) -> Result<OrderResponse, ServiceError> {
        let db = &*self.db;
        let now = Utc::now();

        let txn = db.begin().await?;

        let order = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                warn!(order_id = %order_id, "Order not found for status update");
                ServiceError::NotFound(format!("Order {} not found", order_id))
            })?;

        let old_status = order.status;

        if old_status == new_status {
            txn.rollback().await.ok();
            return Ok(model_to_response(order));
        }

        if !old_status.can_transition_to(new_status) {
            txn.rollback().await.ok();
            return Err(ServiceError::InvalidTransition(format!(
                "Cannot transition order from '{}' to '{}'",
                old_status, new_status
            )));
        }

        let mut active: OrderActiveModel = order.into();
        active.status = Set(new_status);
        if new_status == OrderStatus::Rejected {
            active.rejection_reason = Set(reason.clone());
        }
        active.updated_at = Set(Some(now));
        let current_version = *active.version.as_ref();
        active.version = Set(current_version + 1);

        let updated = active.update(&txn).await?;

        txn.commit().await?;

        info!(
            order_id = %order_id,
            from = %old_status,
            to = %new_status,
            "Order status updated"
        );

        let event = match new_status {
            OrderStatus::Cancelled => Event::OrderCancelled(order_id),
            OrderStatus::Rejected => Event::OrderRejected(order_id),
            _ => Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            },
        };
        if let Err(e) = self.event_sender.send(event).await {
            warn!(error = %e, order_id = %order_id, "Failed to send order status event");
        }

        Ok(model_to_response(updated))
    }

    /// Cancels an order from any non-terminal state.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        reason: Option<String>,
    ) -> Result<OrderResponse, ServiceError> {
        self.update_order_status(order_id, OrderStatus::Cancelled, reason)
            .await
    }

    /// Rejects a pending order, recording the reason.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn reject_order(
        &self,
        order_id: Uuid,
        reason: Option<String>,
    ) -> Result<OrderResponse, ServiceError> {
        self.update_order_status(order_id, OrderStatus::Rejected, reason)
            .await
    }
}

/// Parses a status string from the HTTP surface into the closed enum.
pub fn parse_order_status(raw: &str) -> Result<OrderStatus, ServiceError> {
    OrderStatus::from_str(raw.trim()).map_err(|_| {
        ServiceError::ValidationError(format!("Unknown order status: '{}'", raw.trim()))
    })
}

pub(crate) fn model_to_response(model: OrderModel) -> OrderResponse {
    OrderResponse {
        id: model.id,
        order_number: model.order_number,
        customer_id: model.customer_id,
        status: model.status,
        subtotal: model.subtotal,
        shipping_fee: model.shipping_fee,
        tax_amount: model.tax_amount,
        discount_amount: model.discount_amount,
        total_amount: model.total_amount,
        shipping_address: model.shipping_address,
        billing_address: model.billing_address,
        payment_method: model.payment_method,
        payment_status: model.payment_status,
        payment_transaction_id: model.payment_transaction_id,
        rejection_reason: model.rejection_reason,
        created_at: model.created_at,
        updated_at: model.updated_at,
        version: model.version,
    }
}

fn item_to_response(item: OrderItemModel, product: Option<ProductModel>) -> OrderItemResponse {
    OrderItemResponse {
        id: item.id,
        product_id: item.product_id,
        product_name: product.as_ref().map(|p| p.name.clone()),
        product_sku: product.map(|p| p.sku),
        quantity: item.quantity,
        unit_price: item.unit_price,
        total_price: item.total_price,
        discount: item.discount,
        status: item.status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pricing() -> PricingConfig {
        PricingConfig {
            shipping_fee: dec!(10000),
            tax_rate: dec!(0.1),
        }
    }

    fn item(quantity: i32, unit_price: Decimal) -> CreateOrderItemRequest {
        CreateOrderItemRequest {
            product_id: Uuid::new_v4(),
            quantity,
            unit_price,
            discount: None,
        }
    }

    #[test]
    fn totals_match_checkout_scenario() {
        // 2 x 100000 -> subtotal 200000, shipping 10000, tax 20000, total 230000
        let totals = compute_totals(&[item(2, dec!(100000))], &pricing()).unwrap();
        assert_eq!(totals.subtotal, dec!(200000));
        assert_eq!(totals.shipping_fee, dec!(10000));
        assert_eq!(totals.tax_amount, dec!(20000));
        assert_eq!(totals.total_amount, dec!(230000));
    }

    #[test]
    fn total_invariant_holds_with_discounts() {
        let mut discounted = item(3, dec!(5000));
        discounted.discount = Some(dec!(500));
        let totals = compute_totals(&[discounted, item(1, dec!(20000))], &pricing()).unwrap();
        assert_eq!(
            totals.total_amount,
            totals.subtotal + totals.shipping_fee + totals.tax_amount - totals.discount_amount
        );
        assert_eq!(totals.discount_amount, dec!(500));
    }

    #[test]
    fn empty_item_list_is_rejected() {
        let err = compute_totals(&[], &pricing()).unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let err = compute_totals(&[item(0, dec!(100))], &pricing()).unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }

    #[test]
    fn negative_unit_price_is_rejected() {
        let err = compute_totals(&[item(1, dec!(-5))], &pricing()).unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }

    #[test]
    fn tax_is_rounded_to_cents() {
        let totals = compute_totals(&[item(1, dec!(99.99))], &pricing()).unwrap();
        assert_eq!(totals.tax_amount, dec!(10.00));
    }

    #[test]
    fn unknown_status_strings_are_validation_errors() {
        assert!(parse_order_status("processing").is_ok());
        assert!(matches!(
            parse_order_status("warp_speed").unwrap_err(),
            ServiceError::ValidationError(_)
        ));
    }
}
