use crate::{
    entities::cart_item::{self, ActiveModel as CartItemActiveModel, Entity as CartItemEntity},
    entities::product::Entity as ProductEntity,
    errors::ServiceError,
    events::EventSender,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct AddCartItemRequest {
    pub product_id: Uuid,

    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CartItemResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Customer cart surface. The reconciliation service empties a customer's
/// cart through [`CartService::clear_for_customer`] inside its own database
/// transaction.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    #[allow(dead_code)]
    event_sender: EventSender,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Adds a product to the customer's cart, snapshotting the current
    /// price. Adding the same product again bumps the quantity.
    #[instrument(skip(self, request), fields(customer_id = %customer_id, product_id = %request.product_id))]
    pub async fn add_item(
        &self,
        customer_id: Uuid,
        request: AddCartItemRequest,
    ) -> Result<CartItemResponse, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let product = ProductEntity::find_by_id(request.product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", request.product_id))
            })?;

        let now = Utc::now();

        let existing = CartItemEntity::find()
            .filter(cart_item::Column::CustomerId.eq(customer_id))
            .filter(cart_item::Column::ProductId.eq(request.product_id))
            .one(&*self.db)
            .await?;

        let model = if let Some(existing) = existing {
            let quantity = existing.quantity + request.quantity;
            let mut active: CartItemActiveModel = existing.into();
            active.quantity = Set(quantity);
            active.updated_at = Set(now);
            active.update(&*self.db).await?
        } else {
            CartItemActiveModel {
                id: Set(Uuid::new_v4()),
                customer_id: Set(customer_id),
                product_id: Set(request.product_id),
                quantity: Set(request.quantity),
                unit_price: Set(product.price),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&*self.db)
            .await?
        };

        info!(cart_item_id = %model.id, "Cart item stored");

        Ok(model_to_response(model))
    }

    /// Lists the customer's cart, oldest first.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn list_items(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<CartItemResponse>, ServiceError> {
        let items = CartItemEntity::find()
            .filter(cart_item::Column::CustomerId.eq(customer_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        Ok(items.into_iter().map(model_to_response).collect())
    }

    /// Removes one cart item belonging to the customer.
    #[instrument(skip(self), fields(customer_id = %customer_id, item_id = %item_id))]
    pub async fn remove_item(&self, customer_id: Uuid, item_id: Uuid) -> Result<(), ServiceError> {
        let result = CartItemEntity::delete_many()
            .filter(cart_item::Column::Id.eq(item_id))
            .filter(cart_item::Column::CustomerId.eq(customer_id))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Cart item {} not found",
                item_id
            )));
        }

        Ok(())
    }

    /// Deletes every cart item the customer owns and returns how many rows
    /// went away. The whole cart is emptied on successful checkout, not just
    /// the lines present in the paid order.
    pub async fn clear_for_customer<C: ConnectionTrait>(
        conn: &C,
        customer_id: Uuid,
    ) -> Result<u64, ServiceError> {
        let result = CartItemEntity::delete_many()
            .filter(cart_item::Column::CustomerId.eq(customer_id))
            .exec(conn)
            .await?;

        Ok(result.rows_affected)
    }
}

fn model_to_response(model: cart_item::Model) -> CartItemResponse {
    CartItemResponse {
        id: model.id,
        product_id: model.product_id,
        quantity: model.quantity,
        unit_price: model.unit_price,
        line_total: model.unit_price * Decimal::from(model.quantity),
        created_at: model.created_at,
    }
}
