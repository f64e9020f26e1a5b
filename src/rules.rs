//! Scheduling and capacity rules.
//!
//! `evaluate` is the single authority on whether a gig's performance set is
//! admissible: pure, deterministic, no I/O. Callers feed it the gig's nominal
//! start, the stored performances, the venue capacity and the sold-ticket
//! count; an empty result means the gig may hold `Valid` status.
//!
//! A gig with zero performances has nothing to anchor rules 1-4 and is never
//! valid; the transaction boundary rejects that case before this module is
//! consulted.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;

use crate::model::Performance;

/// Maximum minutes between the nominal start and the first on-time, and
/// between one performance's off-time and the next one's on-time.
pub const MAX_INTERVAL_MIN: i64 = 20;

/// Maximum minutes a single act may play.
pub const MAX_SET_MIN: i64 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    /// Performances overlap, or one starts before the gig's nominal start.
    TimeConflict,
    /// A gap in the running order exceeds [`MAX_INTERVAL_MIN`].
    IntervalTooLong,
    /// A single performance exceeds [`MAX_SET_MIN`].
    ActOvertime,
    /// A performance starts or runs on a different calendar day.
    DateCrossed,
    /// More tickets issued than the venue holds.
    VenueOverload,
}

impl Rule {
    pub fn code(&self) -> u8 {
        match self {
            Rule::TimeConflict => 1,
            Rule::IntervalTooLong => 2,
            Rule::ActOvertime => 3,
            Rule::DateCrossed => 4,
            Rule::VenueOverload => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Rule::TimeConflict => "time_conflict",
            Rule::IntervalTooLong => "interval_too_long",
            Rule::ActOvertime => "act_overtime",
            Rule::DateCrossed => "date_crossed",
            Rule::VenueOverload => "venue_overload",
        }
    }
}

/// Ordered set of violated rules. Empty means admissible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuleSet(BTreeSet<Rule>);

impl RuleSet {
    pub fn insert(&mut self, rule: Rule) {
        self.0.insert(rule);
    }

    pub fn contains(&self, rule: Rule) -> bool {
        self.0.contains(&rule)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Rule> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Rule> for RuleSet {
    fn from_iter<I: IntoIterator<Item = Rule>>(iter: I) -> Self {
        RuleSet(iter.into_iter().collect())
    }
}

impl fmt::Display for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for rule in self.iter() {
            if !first {
                write!(f, "+")?;
            }
            write!(f, "{}", rule.as_str())?;
            first = false;
        }
        Ok(())
    }
}

/// Check a gig's full performance set against all five rules.
///
/// The input order does not matter; performances are sorted by on-time here.
/// Two performances sharing an on-time count as an overlap, since durations
/// are non-zero.
pub fn evaluate(
    gig_start: NaiveDateTime,
    performances: &[Performance],
    capacity: i64,
    sold: i64,
) -> RuleSet {
    let mut violated = RuleSet::default();

    if sold > capacity {
        violated.insert(Rule::VenueOverload);
    }

    let mut slots: Vec<&Performance> = performances.iter().collect();
    if slots.is_empty() {
        return violated;
    }
    slots.sort_by_key(|p| p.on_time);

    let interval = Duration::minutes(MAX_INTERVAL_MIN);
    let day = gig_start.date();

    if slots[0].on_time - gig_start > interval {
        violated.insert(Rule::IntervalTooLong);
    }

    for pair in slots.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        if next.on_time < prev.off_time() {
            violated.insert(Rule::TimeConflict);
        } else if next.on_time - prev.off_time() > interval {
            violated.insert(Rule::IntervalTooLong);
        }
    }

    for p in &slots {
        if p.on_time < gig_start {
            violated.insert(Rule::TimeConflict);
        }
        if p.duration_min > MAX_SET_MIN {
            violated.insert(Rule::ActOvertime);
        }
        // Ending exactly at midnight still counts as playing on the gig's day.
        let off = p.off_time();
        if p.on_time.date() != day || (off.date() > day && off.time() != chrono::NaiveTime::MIN) {
            violated.insert(Rule::DateCrossed);
        }
    }

    violated
}
