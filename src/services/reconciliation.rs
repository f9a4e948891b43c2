use crate::{
    entities::order::{ActiveModel as OrderActiveModel, Entity as OrderEntity, PaymentStatus},
    entities::order_item::{self, Entity as OrderItemEntity, OrderItemStatus},
    entities::payment_transaction::{
        self, ActiveModel as TransactionActiveModel, Entity as PaymentTransactionEntity,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::carts::CartService,
    services::payments::{GatewayCallback, PaymentGatewayClient},
    services::products,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, Set, SqlErr, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Result codes reported by the gateway.
const RESULT_CODE_SUCCESS: i64 = 0;
const RESULT_CODE_AUTHORIZED: i64 = 9000;

/// What a callback delivery amounted to. Duplicate deliveries and callbacks
/// for already-terminal orders collapse into `AlreadyProcessed`.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconciliationOutcome {
    Applied { transaction_id: Uuid },
    Authorized { transaction_id: Uuid },
    PaymentFailed { transaction_id: Uuid },
    AlreadyProcessed,
}

/// Applies gateway callback outcomes to order, transaction, inventory, and
/// cart state.
///
/// All side effects of one callback run inside a single database
/// transaction and are keyed by the gateway's transaction id, so redelivery
/// of the same callback is a no-op.
#[derive(Clone)]
pub struct ReconciliationService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    gateway: Arc<PaymentGatewayClient>,
}

impl ReconciliationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        gateway: Arc<PaymentGatewayClient>,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
        }
    }

    /// Consumes one gateway callback.
    #[instrument(
        skip(self, callback),
        fields(order_id = %callback.order_id, trans_id = %callback.trans_id, result_code = callback.result_code)
    )]
    pub async fn handle_callback(
        &self,
        callback: GatewayCallback,
    ) -> Result<ReconciliationOutcome, ServiceError> {
        if self.gateway.verify_enabled() && !self.gateway.verify_callback(&callback) {
            warn!("Callback signature verification failed");
            return Err(ServiceError::InvalidSignature);
        }

        // Fast-path dedup; the unique constraint on transaction_code
        // backstops the race between this check and the insert below.
        let existing = PaymentTransactionEntity::find()
            .filter(payment_transaction::Column::TransactionCode.eq(callback.trans_id.clone()))
            .one(&*self.db)
            .await?;
        if existing.is_some() {
            info!("Callback already processed, skipping");
            return Ok(ReconciliationOutcome::AlreadyProcessed);
        }

        match callback.result_code {
            RESULT_CODE_SUCCESS => self.apply_success(callback).await,
            RESULT_CODE_AUTHORIZED => self.apply_authorized(callback).await,
            _ => self.apply_failure(callback).await,
        }
    }

    /// Success path: transaction record, order payment fields, stock
    /// decrement, and cart clearing, all or nothing.
    async fn apply_success(
        &self,
        callback: GatewayCallback,
    ) -> Result<ReconciliationOutcome, ServiceError> {
        let txn = self.db.begin().await?;

        let order = OrderEntity::find_by_id(callback.order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order {} not found", callback.order_id))
            })?;

        if order.payment_status.is_terminal() {
            txn.rollback().await.ok();
            info!(
                payment_status = %order.payment_status,
                "Order payment already reconciled, skipping callback"
            );
            return Ok(ReconciliationOutcome::AlreadyProcessed);
        }

        if callback.amount != order.total_amount {
            warn!(
                callback_amount = %callback.amount,
                order_total = %order.total_amount,
                "Callback amount differs from order total"
            );
        }

        let order_id = order.id;
        let customer_id = order.customer_id;

        let transaction = match self
            .insert_transaction(&txn, &callback, PaymentStatus::Success)
            .await
        {
            Ok(transaction) => transaction,
            Err(e) if is_unique_violation(&e) => {
                // A concurrent delivery of the same callback won the insert.
                txn.rollback().await.ok();
                info!("Concurrent callback already recorded this transaction");
                return Ok(ReconciliationOutcome::AlreadyProcessed);
            }
            Err(e) => return Err(e),
        };

        let mut order_update: OrderActiveModel = order.into();
        order_update.payment_status = Set(PaymentStatus::Success);
        order_update.payment_method = Set(Some(self.gateway.provider_label().to_string()));
        order_update.payment_transaction_id = Set(Some(transaction.id));
        order_update.updated_at = Set(Some(Utc::now()));
        let version = *order_update.version.as_ref();
        order_update.version = Set(version + 1);
        order_update.update(&txn).await?;

        let items_removed = CartService::clear_for_customer(&txn, customer_id).await?;

        let sales = self.record_item_sales(&txn, order_id).await?;

        txn.commit().await?;

        info!(
            order_id = %order_id,
            transaction_id = %transaction.id,
            "Payment reconciled successfully"
        );

        let mut events = vec![
            Event::PaymentSucceeded {
                order_id,
                transaction_id: transaction.id,
            },
            Event::CartCleared {
                customer_id,
                items_removed,
            },
        ];
        events.extend(
            sales
                .into_iter()
                .map(|(product_id, quantity)| Event::StockRecorded {
                    product_id,
                    quantity,
                }),
        );
        for event in events {
            if let Err(e) = self.event_sender.send(event).await {
                warn!(error = %e, order_id = %order_id, "Failed to send reconciliation event");
            }
        }

        Ok(ReconciliationOutcome::Applied {
            transaction_id: transaction.id,
        })
    }

    /// Authorized-only outcome: record the transaction, keep the order's
    /// payment pending. No inventory or cart effects until capture.
    async fn apply_authorized(
        &self,
        callback: GatewayCallback,
    ) -> Result<ReconciliationOutcome, ServiceError> {
        let txn = self.db.begin().await?;

        let order = OrderEntity::find_by_id(callback.order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order {} not found", callback.order_id))
            })?;

        if order.payment_status.is_terminal() {
            txn.rollback().await.ok();
            return Ok(ReconciliationOutcome::AlreadyProcessed);
        }

        let order_id = order.id;

        let transaction = match self
            .insert_transaction(&txn, &callback, PaymentStatus::Pending)
            .await
        {
            Ok(transaction) => transaction,
            Err(e) if is_unique_violation(&e) => {
                txn.rollback().await.ok();
                return Ok(ReconciliationOutcome::AlreadyProcessed);
            }
            Err(e) => return Err(e),
        };

        let mut order_update: OrderActiveModel = order.into();
        order_update.payment_transaction_id = Set(Some(transaction.id));
        order_update.updated_at = Set(Some(Utc::now()));
        let version = *order_update.version.as_ref();
        order_update.version = Set(version + 1);
        order_update.update(&txn).await?;

        txn.commit().await?;

        info!(order_id = %order_id, transaction_id = %transaction.id, "Payment authorized");

        if let Err(e) = self
            .event_sender
            .send(Event::PaymentAuthorized {
                order_id,
                transaction_id: transaction.id,
            })
            .await
        {
            warn!(error = %e, order_id = %order_id, "Failed to send authorization event");
        }

        Ok(ReconciliationOutcome::Authorized {
            transaction_id: transaction.id,
        })
    }

    /// Failure path: record the failed transaction and mark the order's
    /// payment failed. The order update is awaited and surfaced, never
    /// fire-and-forget. No inventory or cart effects.
    async fn apply_failure(
        &self,
        callback: GatewayCallback,
    ) -> Result<ReconciliationOutcome, ServiceError> {
        let txn = self.db.begin().await?;

        let order = OrderEntity::find_by_id(callback.order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order {} not found", callback.order_id))
            })?;

        if order.payment_status.is_terminal() {
            txn.rollback().await.ok();
            return Ok(ReconciliationOutcome::AlreadyProcessed);
        }

        let order_id = order.id;

        let transaction = match self
            .insert_transaction(&txn, &callback, PaymentStatus::Failed)
            .await
        {
            Ok(transaction) => transaction,
            Err(e) if is_unique_violation(&e) => {
                txn.rollback().await.ok();
                return Ok(ReconciliationOutcome::AlreadyProcessed);
            }
            Err(e) => return Err(e),
        };

        let mut order_update: OrderActiveModel = order.into();
        order_update.payment_status = Set(PaymentStatus::Failed);
        order_update.payment_transaction_id = Set(Some(transaction.id));
        order_update.updated_at = Set(Some(Utc::now()));
        let version = *order_update.version.as_ref();
        order_update.version = Set(version + 1);
        order_update.update(&txn).await?;

        txn.commit().await?;

        warn!(
            order_id = %order_id,
            transaction_id = %transaction.id,
            result_code = callback.result_code,
            message = callback.message.as_deref().unwrap_or(""),
            "Payment failed"
        );

        if let Err(e) = self
            .event_sender
            .send(Event::PaymentFailed {
                order_id,
                transaction_id: transaction.id,
            })
            .await
        {
            warn!(error = %e, order_id = %order_id, "Failed to send payment failed event");
        }

        Ok(ReconciliationOutcome::PaymentFailed {
            transaction_id: transaction.id,
        })
    }

    async fn insert_transaction(
        &self,
        txn: &DatabaseTransaction,
        callback: &GatewayCallback,
        status: PaymentStatus,
    ) -> Result<payment_transaction::Model, ServiceError> {
        let raw_payload = serde_json::to_value(callback)
            .map_err(|e| ServiceError::InternalError(format!("payload serialization: {}", e)))?;

        let transaction = TransactionActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(callback.order_id),
            transaction_code: Set(callback.trans_id.clone()),
            amount: Set(callback.amount),
            payment_method: Set(self.gateway.provider_label().to_string()),
            status: Set(status),
            gateway_response: Set(Some(raw_payload)),
            created_at: Set(Utc::now()),
        }
        .insert(txn)
        .await?;

        Ok(transaction)
    }

    /// Applies each active line item's quantity to its product counters and
    /// returns the applied (product, quantity) pairs.
    async fn record_item_sales<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
    ) -> Result<Vec<(Uuid, i32)>, ServiceError> {
        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .filter(order_item::Column::Status.eq(OrderItemStatus::Active))
            .all(conn)
            .await?;

        if items.is_empty() {
            warn!(order_id = %order_id, "Paid order has no active items to record against stock");
            return Ok(Vec::new());
        }

        let mut sales = Vec::with_capacity(items.len());
        for item in items {
            products::record_sale(conn, item.product_id, item.quantity).await?;
            sales.push((item.product_id, item.quantity));
        }

        Ok(sales)
    }
}

fn is_unique_violation(err: &ServiceError) -> bool {
    match err {
        ServiceError::DatabaseError(db_err) => {
            matches!(db_err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
        }
        _ => false,
    }
}
