use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::{CheckoutStatus, EventStatus, ItemSnapshot, OrderStatus, StoreContext};
use uuid::Uuid;

use super::Store;
use crate::error::StoreError;
use crate::models::*;
use crate::schema::*;

pub type DbPool = Pool<AsyncPgConnection>;

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<PooledConnection<'_, AsyncPgConnection>, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Backend(format!("connection pool: {}", e)))
    }
}

#[async_trait]
impl Store for PgStore {
    async fn published_store_by_slug(&self, slug: &str) -> Result<Option<StoreRecord>, StoreError> {
        let mut conn = self.conn().await?;
        let row = stores::table
            .filter(stores::slug.eq(slug))
            .filter(stores::published.eq(true))
            .select(DbStore::as_select())
            .first::<DbStore>(&mut conn)
            .await
            .optional()?;
        Ok(row.map(StoreRecord::from))
    }

    async fn store_context(&self, store_id: Uuid) -> Result<StoreContext, StoreError> {
        let mut conn = self.conn().await?;
        let row = stores::table
            .find(store_id)
            .select(DbStore::as_select())
            .first::<DbStore>(&mut conn)
            .await
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("store {}", store_id)))?;
        Ok(StoreRecord::from(row).context())
    }

    async fn catalog_products(
        &self,
        store_id: Uuid,
        product_ids: &[Uuid],
    ) -> Result<Vec<ProductRecord>, StoreError> {
        let mut conn = self.conn().await?;
        let rows = products::table
            .filter(products::store_id.eq(store_id))
            .filter(products::id.eq_any(product_ids.to_vec()))
            .select(ProductRecord::as_select())
            .load::<ProductRecord>(&mut conn)
            .await?;
        Ok(rows)
    }

    async fn catalog_variants(&self, variant_ids: &[Uuid]) -> Result<Vec<VariantRecord>, StoreError> {
        if variant_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let rows = product_variants::table
            .filter(product_variants::id.eq_any(variant_ids.to_vec()))
            .select(DbVariant::as_select())
            .load::<DbVariant>(&mut conn)
            .await?;
        rows.into_iter().map(VariantRecord::try_from).collect()
    }

    async fn insert_order(&self, order: NewOrder) -> Result<Order, StoreError> {
        let mut conn = self.conn().await?;
        let store_id = order.store_id;

        let row = conn
            .transaction::<_, diesel::result::Error, _>(|conn| {
                Box::pin(async move {
                    // Row lock on the store serialises concurrent numbering.
                    let order_number: i64 = diesel::update(stores::table.find(store_id))
                        .set(stores::order_seq.eq(stores::order_seq + 1_i64))
                        .returning(stores::order_seq)
                        .get_result(conn)
                        .await?;

                    let row = DbOrder::numbered(order, order_number);
                    diesel::insert_into(orders::table)
                        .values(&row)
                        .execute(conn)
                        .await?;
                    Ok(row)
                })
            })
            .await?;

        Order::try_from(row)
    }

    async fn insert_order_items(
        &self,
        order_id: Uuid,
        items: &[ItemSnapshot],
    ) -> Result<Vec<OrderItem>, StoreError> {
        let mut conn = self.conn().await?;
        let rows: Vec<DbOrderItem> = items
            .iter()
            .map(|item| DbOrderItem::from_snapshot(order_id, item))
            .collect();

        diesel::insert_into(order_items::table)
            .values(&rows)
            .execute(&mut conn)
            .await?;

        rows.into_iter().map(OrderItem::try_from).collect()
    }

    async fn order(&self, store_id: Uuid, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        let mut conn = self.conn().await?;
        let row = orders::table
            .filter(orders::id.eq(order_id))
            .filter(orders::store_id.eq(store_id))
            .select(DbOrder::as_select())
            .first::<DbOrder>(&mut conn)
            .await
            .optional()?;
        row.map(Order::try_from).transpose()
    }

    async fn order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>, StoreError> {
        let mut conn = self.conn().await?;
        let rows = order_items::table
            .filter(order_items::order_id.eq(order_id))
            .select(DbOrderItem::as_select())
            .load::<DbOrderItem>(&mut conn)
            .await?;
        rows.into_iter().map(OrderItem::try_from).collect()
    }

    async fn set_order_status(
        &self,
        store_id: Uuid,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<Option<Order>, StoreError> {
        let mut conn = self.conn().await?;
        let row = diesel::update(
            orders::table
                .filter(orders::id.eq(order_id))
                .filter(orders::store_id.eq(store_id)),
        )
        .set(orders::status.eq(status.as_str()))
        .returning(DbOrder::as_returning())
        .get_result::<DbOrder>(&mut conn)
        .await
        .optional()?;
        row.map(Order::try_from).transpose()
    }

    async fn has_order_since(
        &self,
        store_id: Uuid,
        phone: &str,
        since: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let found = orders::table
            .filter(orders::store_id.eq(store_id))
            .filter(orders::customer_phone.eq(phone))
            .filter(orders::created_at.gt(since))
            .select(orders::id)
            .first::<Uuid>(&mut conn)
            .await
            .optional()?;
        Ok(found.is_some())
    }

    async fn installations(&self, store_id: Uuid) -> Result<Vec<IntegrationInstallation>, StoreError> {
        let mut conn = self.conn().await?;
        let rows = integration_installations::table
            .filter(integration_installations::store_id.eq(store_id))
            .order(integration_installations::created_at.asc())
            .select(DbInstallation::as_select())
            .load::<DbInstallation>(&mut conn)
            .await?;
        Ok(rows.into_iter().map(IntegrationInstallation::from).collect())
    }

    async fn upsert_installation(
        &self,
        store_id: Uuid,
        integration_id: &str,
        config: serde_json::Value,
    ) -> Result<IntegrationInstallation, StoreError> {
        let mut conn = self.conn().await?;
        let now = Utc::now();
        let row = DbInstallation {
            id: Uuid::new_v4(),
            store_id,
            integration_id: integration_id.to_string(),
            config,
            created_at: now,
            updated_at: now,
        };

        let saved = diesel::insert_into(integration_installations::table)
            .values(&row)
            .on_conflict((
                integration_installations::store_id,
                integration_installations::integration_id,
            ))
            .do_update()
            .set((
                integration_installations::config.eq(excluded(integration_installations::config)),
                integration_installations::updated_at.eq(now),
            ))
            .returning(DbInstallation::as_returning())
            .get_result::<DbInstallation>(&mut conn)
            .await?;
        Ok(saved.into())
    }

    async fn delete_installation(&self, store_id: Uuid, integration_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let deleted = diesel::delete(
            integration_installations::table
                .filter(integration_installations::store_id.eq(store_id))
                .filter(integration_installations::integration_id.eq(integration_id)),
        )
        .execute(&mut conn)
        .await?;
        Ok(deleted > 0)
    }

    async fn insert_event(&self, event: NewIntegrationEvent) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        diesel::insert_into(integration_events::table)
            .values(&DbIntegrationEvent::from(event))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn finish_event(
        &self,
        event_id: Uuid,
        status: EventStatus,
        error: Option<String>,
        processed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        diesel::update(integration_events::table.find(event_id))
            .set((
                integration_events::status.eq(status.as_str()),
                integration_events::error.eq(error),
                integration_events::processed_at.eq(Some(processed_at)),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn expire_checkouts(
        &self,
        created_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut conn = self.conn().await?;
        let moved = diesel::update(
            abandoned_checkouts::table
                .filter(abandoned_checkouts::status.eq_any(vec![
                    CheckoutStatus::Pending.as_str(),
                    CheckoutStatus::Sent.as_str(),
                ]))
                .filter(abandoned_checkouts::created_at.lt(created_before)),
        )
        .set((
            abandoned_checkouts::status.eq(CheckoutStatus::Expired.as_str()),
            abandoned_checkouts::updated_at.eq(now),
        ))
        .execute(&mut conn)
        .await?;
        Ok(moved)
    }

    async fn due_checkouts(
        &self,
        created_after: DateTime<Utc>,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<AbandonedCheckout>, StoreError> {
        let mut conn = self.conn().await?;
        let rows = abandoned_checkouts::table
            .filter(abandoned_checkouts::status.eq(CheckoutStatus::Pending.as_str()))
            .filter(abandoned_checkouts::created_at.gt(created_after))
            .filter(abandoned_checkouts::created_at.le(created_before))
            .order(abandoned_checkouts::created_at.asc())
            .limit(limit)
            .select(DbAbandonedCheckout::as_select())
            .load::<DbAbandonedCheckout>(&mut conn)
            .await?;
        rows.into_iter().map(AbandonedCheckout::try_from).collect()
    }

    async fn transition_checkout(
        &self,
        checkout_id: Uuid,
        to: CheckoutStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let target = abandoned_checkouts::table
            .filter(abandoned_checkouts::id.eq(checkout_id))
            .filter(abandoned_checkouts::status.eq(CheckoutStatus::Pending.as_str()));

        let moved = match to {
            CheckoutStatus::Sent => {
                diesel::update(target)
                    .set((
                        abandoned_checkouts::status.eq(to.as_str()),
                        abandoned_checkouts::updated_at.eq(at),
                        abandoned_checkouts::sent_at.eq(Some(at)),
                    ))
                    .execute(&mut conn)
                    .await?
            }
            CheckoutStatus::Recovered => {
                diesel::update(target)
                    .set((
                        abandoned_checkouts::status.eq(to.as_str()),
                        abandoned_checkouts::updated_at.eq(at),
                        abandoned_checkouts::recovered_at.eq(Some(at)),
                    ))
                    .execute(&mut conn)
                    .await?
            }
            CheckoutStatus::Expired => {
                diesel::update(target)
                    .set((
                        abandoned_checkouts::status.eq(to.as_str()),
                        abandoned_checkouts::updated_at.eq(at),
                    ))
                    .execute(&mut conn)
                    .await?
            }
            CheckoutStatus::Pending => {
                return Err(StoreError::Backend(format!(
                    "checkout {}: cannot transition back to pending",
                    checkout_id
                )))
            }
        };
        Ok(moved > 0)
    }
}
