pub mod api;
pub mod collaborators;
pub mod config;
pub mod engine;
pub mod error;
pub mod geo;
pub mod ingest;
pub mod models;
pub mod observability;
pub mod registry;
pub mod state;
