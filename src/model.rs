//! Entity records mirroring the store schema.
//!
//! A `Gig` owns its performances: deleting a gig cascades to `act_gig`
//! rows, and a performance is identified by its (gig, act) pair.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Timestamp format used in the store (`ontime`, `gigdate` columns).
pub const TS_FMT: &str = "%Y-%m-%d %H:%M:%S";

pub fn fmt_ts(t: NaiveDateTime) -> String {
    t.format(TS_FMT).to_string()
}

pub fn parse_ts(s: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(s, TS_FMT)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Venue {
    pub venue_id: i64,
    pub name: String,
    pub hire_cost: i64,
    pub capacity: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Act {
    pub act_id: i64,
    pub name: String,
    pub standard_fee: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GigStatus {
    Draft,
    Valid,
    Cancelled,
}

impl GigStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GigStatus::Draft => "Draft",
            GigStatus::Valid => "Valid",
            GigStatus::Cancelled => "Cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Draft" => Some(GigStatus::Draft),
            "Valid" => Some(GigStatus::Valid),
            "Cancelled" => Some(GigStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gig {
    pub gig_id: i64,
    pub venue_id: i64,
    pub title: String,
    /// Nominal start: the on-time of the first performance at creation.
    pub date: NaiveDateTime,
    pub status: GigStatus,
}

/// A stored performance row, joined with the act name for display paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Performance {
    pub gig_id: i64,
    pub act_id: i64,
    pub act_name: String,
    pub fee: i64,
    pub on_time: NaiveDateTime,
    pub duration_min: i64,
}

impl Performance {
    pub fn off_time(&self) -> NaiveDateTime {
        self.on_time + Duration::minutes(self.duration_min)
    }
}

/// Input shape for gig creation: one timed slot per act.
#[derive(Debug, Clone)]
pub struct PerformanceSpec {
    pub act: String,
    pub fee: i64,
    pub on_time: NaiveDateTime,
    pub duration_min: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketType {
    pub gig_id: i64,
    pub code: String,
    pub price: i64,
}

/// Standard type code seeded for every gig at creation.
pub const ADULT_TYPE: &str = "A";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub ticket_id: i64,
    pub gig_id: i64,
    pub type_code: String,
    pub customer_name: String,
    pub customer_email: String,
    pub issued: bool,
    pub affected: bool,
}
