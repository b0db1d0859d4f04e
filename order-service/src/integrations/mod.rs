//! Static table of the integrations a store can install, and what each one
//! listens to. Adding an integration means adding an entry to [`BUILTIN`].

pub mod google_sheets;
pub mod meta_conversions;
pub mod telegram;

use std::sync::Arc;

use futures::future::BoxFuture;
use shared::{EventType, StoreContext};

use crate::collaborators::MessageComposer;
use crate::error::HandlerError;

/// Everything one handler invocation sees. Handlers only read from it.
pub struct HandlerInput<'a> {
    pub event_type: EventType,
    pub payload: &'a serde_json::Value,
    pub config: &'a serde_json::Value,
    pub store: &'a StoreContext,
    pub deps: &'a HandlerDeps,
}

pub type HandlerFn = for<'a> fn(HandlerInput<'a>) -> BoxFuture<'a, Result<(), HandlerError>>;

#[derive(Clone, Copy)]
pub struct IntegrationEntry {
    pub id: &'static str,
    pub events: &'static [EventType],
    pub handler: HandlerFn,
}

impl IntegrationEntry {
    pub fn supports(&self, event_type: EventType) -> bool {
        self.events.contains(&event_type)
    }
}

impl std::fmt::Debug for IntegrationEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrationEntry")
            .field("id", &self.id)
            .field("events", &self.events)
            .finish()
    }
}

pub static BUILTIN: &[IntegrationEntry] = &[telegram::ENTRY, meta_conversions::ENTRY, google_sheets::ENTRY];

/// Base URLs of the third-party APIs, overridable for staging.
#[derive(Debug, Clone)]
pub struct IntegrationEndpoints {
    pub telegram_api: String,
    pub graph_api: String,
}

impl Default for IntegrationEndpoints {
    fn default() -> Self {
        Self {
            telegram_api: "https://api.telegram.org".to_string(),
            graph_api: "https://graph.facebook.com/v19.0".to_string(),
        }
    }
}

/// Shared clients handed to every handler.
#[derive(Clone)]
pub struct HandlerDeps {
    pub http: reqwest::Client,
    pub composer: Arc<dyn MessageComposer>,
    pub endpoints: IntegrationEndpoints,
}

/// Read-only lookup over integration entries. Built once at startup.
#[derive(Debug, Clone)]
pub struct Registry {
    entries: Vec<IntegrationEntry>,
}

impl Registry {
    pub fn builtin() -> Self {
        Self::new(BUILTIN.to_vec())
    }

    pub fn new(entries: Vec<IntegrationEntry>) -> Self {
        Self { entries }
    }

    pub fn get(&self, integration_id: &str) -> Option<&IntegrationEntry> {
        self.entries.iter().find(|e| e.id == integration_id)
    }

    /// The entry for `integration_id` if it declares `event_type`.
    pub fn eligible(&self, integration_id: &str, event_type: EventType) -> Option<&IntegrationEntry> {
        self.get(integration_id).filter(|e| e.supports(event_type))
    }

    pub fn ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|e| e.id)
    }
}

/// Trims a remote error body to something that fits an event row.
pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 500;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}…", &body[..idx]),
        None => body.to_string(),
    }
}
