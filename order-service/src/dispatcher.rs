use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use shared::{EventStatus, EventType, StoreContext};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::HandlerError;
use crate::integrations::{HandlerDeps, HandlerInput, IntegrationEntry, Registry};
use crate::models::{IntegrationInstallation, NewIntegrationEvent};
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Budget for one handler call; exceeding it fails that event row only.
    pub handler_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            handler_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub integration_id: String,
    pub event_id: Uuid,
    pub status: EventStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub outcomes: Vec<DispatchOutcome>,
}

impl DispatchReport {
    pub fn completed(&self) -> usize {
        self.count(EventStatus::Completed)
    }

    pub fn failed(&self) -> usize {
        self.count(EventStatus::Failed)
    }

    fn count(&self, status: EventStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}

/// Fans one event out to every installed integration that declares it.
pub struct Dispatcher {
    store: Arc<dyn Store>,
    registry: Registry,
    deps: HandlerDeps,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Store>, registry: Registry, deps: HandlerDeps, config: DispatchConfig) -> Self {
        Self {
            store,
            registry,
            deps,
            config,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Runs the dispatch on its own task. The task completes even if the
    /// returned handle is dropped.
    pub fn spawn_dispatch(
        self: &Arc<Self>,
        store_id: Uuid,
        event_type: EventType,
        payload: serde_json::Value,
    ) -> JoinHandle<DispatchReport> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move { dispatcher.dispatch(store_id, event_type, payload).await })
    }

    /// Returns once every eligible handler has settled. Never fails: each
    /// integration's outcome lives on its own event row.
    pub async fn dispatch(&self, store_id: Uuid, event_type: EventType, payload: serde_json::Value) -> DispatchReport {
        let installations = match self.store.installations(store_id).await {
            Ok(installations) => installations,
            Err(e) => {
                error!("Failed to load integrations for store {}: {}", store_id, e);
                return DispatchReport::default();
            }
        };

        let eligible: Vec<(IntegrationInstallation, IntegrationEntry)> = installations
            .into_iter()
            .filter_map(|installation| {
                let entry = *self.registry.eligible(&installation.integration_id, event_type)?;
                Some((installation, entry))
            })
            .collect();

        if eligible.is_empty() {
            return DispatchReport::default();
        }

        let store = match self.store.store_context(store_id).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!("Failed to load store {} for {} dispatch: {}", store_id, event_type, e);
                return DispatchReport::default();
            }
        };

        let payload = Arc::new(payload);
        let branches = eligible.into_iter().map(|(installation, entry)| {
            self.dispatch_one(installation, entry, event_type, Arc::clone(&payload), Arc::clone(&store))
        });
        let outcomes: Vec<DispatchOutcome> = join_all(branches).await.into_iter().flatten().collect();

        let report = DispatchReport { outcomes };
        info!(
            "Dispatched {} for store {}: {} completed, {} failed",
            event_type,
            store_id,
            report.completed(),
            report.failed()
        );
        report
    }

    async fn dispatch_one(
        &self,
        installation: IntegrationInstallation,
        entry: IntegrationEntry,
        event_type: EventType,
        payload: Arc<serde_json::Value>,
        store: Arc<StoreContext>,
    ) -> Option<DispatchOutcome> {
        let event_id = Uuid::new_v4();
        let record = NewIntegrationEvent {
            id: event_id,
            store_id: installation.store_id,
            integration_id: installation.integration_id.clone(),
            event_type,
            payload: (*payload).clone(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.insert_event(record).await {
            // No audit row, no side effect.
            error!(
                "Could not record {} event for {}; skipping handler: {}",
                event_type, installation.integration_id, e
            );
            return None;
        }

        let result = self.invoke(entry, event_type, payload, installation.config, store).await;

        let (status, error) = match &result {
            Ok(()) => (EventStatus::Completed, None),
            Err(e) => {
                warn!(
                    "Integration {} failed handling {} (event {}): {}",
                    entry.id, event_type, event_id, e
                );
                (EventStatus::Failed, Some(e.to_string()))
            }
        };

        if let Err(e) = self
            .store
            .finish_event(event_id, status, error.clone(), Utc::now())
            .await
        {
            error!("Failed to finalise integration event {}: {}", event_id, e);
        }

        Some(DispatchOutcome {
            integration_id: installation.integration_id,
            event_id,
            status,
            error,
        })
    }

    /// Runs the handler on its own task so a panic or hang stays contained.
    async fn invoke(
        &self,
        entry: IntegrationEntry,
        event_type: EventType,
        payload: Arc<serde_json::Value>,
        config: serde_json::Value,
        store: Arc<StoreContext>,
    ) -> Result<(), HandlerError> {
        let deps = self.deps.clone();
        let mut task = tokio::spawn(async move {
            let input = HandlerInput {
                event_type,
                payload: &payload,
                config: &config,
                store: &store,
                deps: &deps,
            };
            (entry.handler)(input).await
        });

        match tokio::time::timeout(self.config.handler_timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(HandlerError::Panicked(join_error.to_string())),
            Err(_) => {
                task.abort();
                Err(HandlerError::Timeout(self.config.handler_timeout))
            }
        }
    }
}
