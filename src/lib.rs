//! gigline: a consistency and admission control engine for live-event gigs.
//!
//! Venues host scheduled acts; customers buy tickets against a fixed
//! capacity. The engine keeps the schedule and the ticket ledger valid under
//! mutation: gig creation is atomic against five scheduling/capacity rules
//! with rollback on violation, removing a performance can cascade into a
//! cancellation with customer notification, and ticket admission never
//! oversells a venue under concurrent demand.

pub mod engine;
pub mod error;
pub mod logging;
pub mod model;
pub mod reports;
pub mod rules;
pub mod store;

pub use engine::Engine;
pub use error::EngineError;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            db_path: std::env::var("GIG_DB").unwrap_or_else(|_| "./gigline.sqlite".to_string()),
        }
    }
}
