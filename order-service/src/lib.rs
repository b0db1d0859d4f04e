pub mod api;
pub mod catalog;
pub mod collaborators;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod intake;
pub mod integrations;
pub mod models;
pub mod recovery;
pub mod schema;
pub mod store;
