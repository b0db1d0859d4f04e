use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::{items_total, CheckoutAbandonedPayload, CheckoutStatus, EventType, StoreContext};
use tokio::sync::Mutex;
use tokio::time;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::dispatcher::Dispatcher;
use crate::error::StoreError;
use crate::models::AbandonedCheckout;
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Open checkouts older than this are expired before anything else.
    pub expiry: chrono::Duration,
    /// Minimum age before a reminder goes out.
    pub grace: chrono::Duration,
    /// Pending checkouts older than this are left alone until they expire.
    pub cutoff: chrono::Duration,
    pub batch_size: i64,
    pub storefront_base_url: String,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            expiry: chrono::Duration::hours(48),
            grace: chrono::Duration::minutes(30),
            cutoff: chrono::Duration::hours(24),
            batch_size: 50,
            storefront_base_url: "http://localhost:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired: usize,
    pub recovered: usize,
    pub sent: usize,
    /// Rows that errored or were moved by someone else mid-sweep.
    pub skipped: usize,
}

impl SweepReport {
    pub fn processed(&self) -> usize {
        self.expired + self.recovered + self.sent
    }
}

pub struct RecoveryScheduler {
    store: Arc<dyn Store>,
    dispatcher: Arc<Dispatcher>,
    config: RecoveryConfig,
    /// Held for a whole sweep. The interval loop and the HTTP trigger share
    /// one scheduler, and a row is only claimed after its dispatch.
    sweeping: Mutex<()>,
}

impl RecoveryScheduler {
    pub fn new(store: Arc<dyn Store>, dispatcher: Arc<Dispatcher>, config: RecoveryConfig) -> Self {
        Self {
            store,
            dispatcher,
            config,
            sweeping: Mutex::new(()),
        }
    }

    /// Sweeps on a fixed interval, for deployments without an external trigger.
    pub async fn run(&self, every: Duration) {
        let mut interval = time::interval(every);

        loop {
            interval.tick().await;

            match self.sweep().await {
                Ok(report) if report.processed() > 0 => info!("Recovery sweep: {:?}", report),
                Ok(_) => {}
                Err(e) => error!("Error running recovery sweep: {}", e),
            }
        }
    }

    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        self.sweep_at(Utc::now()).await
    }

    /// Sweeps run one at a time; a caller arriving mid-sweep waits and then
    /// sees the rows the earlier sweep already moved.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        let _sweeping = self.sweeping.lock().await;

        let mut report = SweepReport {
            expired: self
                .store
                .expire_checkouts(now - self.config.expiry, now)
                .await?,
            ..Default::default()
        };

        let due = self
            .store
            .due_checkouts(now - self.config.cutoff, now - self.config.grace, self.config.batch_size)
            .await?;

        let mut stores: HashMap<Uuid, StoreContext> = HashMap::new();
        for checkout in due {
            let checkout_id = checkout.id;
            match self.process(checkout, now, &mut stores).await {
                Ok(Some(CheckoutStatus::Recovered)) => report.recovered += 1,
                Ok(Some(CheckoutStatus::Sent)) => report.sent += 1,
                Ok(_) => report.skipped += 1,
                Err(e) => {
                    warn!("Skipping abandoned checkout {}: {}", checkout_id, e);
                    report.skipped += 1;
                }
            }
        }

        info!(
            "Recovery sweep finished: {} expired, {} recovered, {} sent, {} skipped",
            report.expired, report.recovered, report.sent, report.skipped
        );
        Ok(report)
    }

    async fn process(
        &self,
        checkout: AbandonedCheckout,
        now: DateTime<Utc>,
        stores: &mut HashMap<Uuid, StoreContext>,
    ) -> Result<Option<CheckoutStatus>, StoreError> {
        if self
            .store
            .has_order_since(checkout.store_id, &checkout.customer_phone, checkout.created_at)
            .await?
        {
            let moved = self
                .store
                .transition_checkout(checkout.id, CheckoutStatus::Recovered, now)
                .await?;
            return Ok(moved.then_some(CheckoutStatus::Recovered));
        }

        let store = match stores.get(&checkout.store_id) {
            Some(store) => store.clone(),
            None => {
                let store = self.store.store_context(checkout.store_id).await?;
                stores.insert(checkout.store_id, store.clone());
                store
            }
        };

        let payload = recovery_payload(&checkout, &store, &self.config.storefront_base_url);
        let payload = serde_json::to_value(&payload)?;
        let report = self
            .dispatcher
            .dispatch(checkout.store_id, EventType::CheckoutAbandoned, payload)
            .await;
        if report.failed() > 0 {
            // Still `sent`: the failures are on the event rows.
            warn!(
                "Abandoned checkout {}: {} of {} notifications failed",
                checkout.id,
                report.failed(),
                report.outcomes.len()
            );
        }

        let moved = self
            .store
            .transition_checkout(checkout.id, CheckoutStatus::Sent, now)
            .await?;
        Ok(moved.then_some(CheckoutStatus::Sent))
    }
}

pub fn recovery_url(base_url: &str, store_slug: &str, checkout_id: Uuid) -> String {
    format!(
        "{}/{}/checkout?recover={}",
        base_url.trim_end_matches('/'),
        store_slug,
        checkout_id
    )
}

pub fn recovery_payload(checkout: &AbandonedCheckout, store: &StoreContext, base_url: &str) -> CheckoutAbandonedPayload {
    CheckoutAbandonedPayload {
        checkout_id: checkout.id,
        customer_name: checkout.customer_name.clone(),
        customer_phone: checkout.customer_phone.clone(),
        customer_email: checkout.customer_email.clone(),
        items: checkout.items.clone(),
        total: items_total(&checkout.items),
        currency: checkout.currency.clone(),
        recovery_url: recovery_url(base_url, &store.slug, checkout.id),
        created_at: checkout.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovery_url_embeds_checkout_id() {
        let id = Uuid::nil();
        assert_eq!(
            recovery_url("https://shops.example/", "bakery", id),
            "https://shops.example/bakery/checkout?recover=00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn processed_counts_only_transitions() {
        let report = SweepReport {
            expired: 2,
            recovered: 1,
            sent: 3,
            skipped: 4,
        };
        assert_eq!(report.processed(), 6);
    }
}
