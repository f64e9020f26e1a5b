//! Engine error taxonomy.
//!
//! `Validation` and the not-found family are rejected before any write;
//! `SchedulingViolation` carries the violated rule set so callers can render
//! a precise message; `TransactionAborted` means the storage layer failed and
//! the persisted state is unchanged (callers may retry).

use thiserror::Error;

use crate::rules::RuleSet;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("scheduling rules violated: {rules}")]
    SchedulingViolation { rules: RuleSet },

    #[error("gig {0} not found")]
    GigNotFound(i64),

    #[error("venue '{0}' not found")]
    VenueNotFound(String),

    #[error("act '{0}' not found")]
    ActNotFound(String),

    #[error("gig {gig_id} has no ticket type '{code}'")]
    TicketTypeNotFound { gig_id: i64, code: String },

    #[error("gig {0} is sold out")]
    SoldOut(i64),

    #[error("transaction aborted: {0}")]
    TransactionAborted(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
