//! The consistency and admission control engine.
//!
//! Three write paths share one discipline: every multi-entity mutation runs
//! inside a single store transaction, gig-scoped work holds that gig's lock
//! for the whole check-and-commit span, and a consistency sweep guards each
//! operation on entry and exit to catch invariant drift introduced behind
//! the engine's back (manual backend edits, mostly).
//!
//! Lock order is fixed: gig lock first, then the store lock. The sweep takes
//! per-gig locks one gig at a time, so unrelated bookings are never
//! serialized against it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rusqlite::Connection;
use serde::Serialize;

use crate::error::{EngineError, Result};
use crate::logging::{log, obj, v_bool, v_int, v_str, Domain, Level};
use crate::model::{GigStatus, PerformanceSpec, ADULT_TYPE};
use crate::rules::{self, RuleSet};
use crate::store::{self, Store};
use crate::Config;

/// Delivery seam for cancellation notices. The engine collects the distinct
/// affected emails; getting a message to them is the collaborator's job.
pub trait Notifier: Send + Sync {
    fn gig_cancelled(&self, gig_id: i64, emails: &[String]);
}

/// Default notifier: records the notice in the log stream.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn gig_cancelled(&self, gig_id: i64, emails: &[String]) {
        log(
            Level::Warn,
            Domain::Schedule,
            "cancellation_notice",
            obj(&[
                ("gig_id", v_int(gig_id)),
                ("recipients", v_int(emails.len() as i64)),
            ]),
        );
    }
}

/// Outcome of [`Engine::remove_performance`].
#[derive(Debug, Clone, Serialize)]
pub struct Removal {
    /// True when the residual gig was still invalid and the whole gig was
    /// cancelled; the removal itself is kept either way.
    pub cascaded: bool,
    /// Rules the residual performance set violated (empty when not cascaded,
    /// or when the cascade was triggered by an empty residual set).
    pub rules: RuleSet,
    /// Distinct affected customer emails, in first-purchase order.
    pub notified: Vec<String>,
}

/// One gig cancelled by the consistency sweep.
#[derive(Debug, Clone, Serialize)]
pub struct SweepFinding {
    pub gig_id: i64,
    /// Empty when the gig had no performances left to anchor the schedule.
    pub rules: RuleSet,
    pub notified: Vec<String>,
}

/// One lock cell per gig, created on first touch. Cells are never reclaimed;
/// the map grows with the number of distinct gigs ever touched, which is the
/// same order as the gig table itself.
#[derive(Default)]
struct GigLocks {
    inner: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl GigLocks {
    fn for_gig(&self, gig_id: i64) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.entry(gig_id).or_default().clone()
    }
}

pub struct Engine {
    store: Mutex<Store>,
    locks: GigLocks,
    notifier: Box<dyn Notifier>,
}

impl Engine {
    pub fn new(store: Store) -> Self {
        Self::with_notifier(store, Box::new(LogNotifier))
    }

    pub fn with_notifier(store: Store, notifier: Box<dyn Notifier>) -> Self {
        Self {
            store: Mutex::new(store),
            locks: GigLocks::default(),
            notifier,
        }
    }

    /// Open (and bootstrap) the configured database and wrap it in an engine.
    pub fn open(cfg: &Config) -> Result<Self> {
        let mut store = Store::open(&cfg.db_path)?;
        store.init()?;
        Ok(Self::new(store))
    }

    /// Read-only access for reporting paths. Between engine operations the
    /// entities are always in an invariant-respecting state.
    pub fn with_store<T>(&self, f: impl FnOnce(&Store) -> T) -> T {
        f(&self.lock_store())
    }

    fn lock_store(&self) -> MutexGuard<'_, Store> {
        // A poisoned holder never committed partial state.
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- gig creation ------------------------------------------------------

    /// Insert a gig with its full performance set and an adult ticket type,
    /// as one atomic unit. On a rule violation every write from this call is
    /// rolled back and the violated set is returned in the error.
    pub fn create_gig(
        &self,
        venue_name: &str,
        title: &str,
        performances: &[PerformanceSpec],
        adult_price: i64,
    ) -> Result<i64> {
        self.sweep_all()?;
        let result = self.create_gig_inner(venue_name, title, performances, adult_price);
        self.sweep_all()?;
        result
    }

    fn create_gig_inner(
        &self,
        venue_name: &str,
        title: &str,
        performances: &[PerformanceSpec],
        adult_price: i64,
    ) -> Result<i64> {
        let gig_date = validate_specs(performances, adult_price)?;

        let mut store = self.lock_store();
        let venue = store::venue_by_name(store.conn(), venue_name)?
            .ok_or_else(|| EngineError::VenueNotFound(venue_name.to_string()))?;
        let mut act_ids = Vec::with_capacity(performances.len());
        for spec in performances {
            let act = store::act_by_name(store.conn(), &spec.act)?
                .ok_or_else(|| EngineError::ActNotFound(spec.act.clone()))?;
            act_ids.push(act.act_id);
        }

        let mut tx = store.transaction()?;
        let gig_id;
        let violated;
        {
            let mut sp = tx.savepoint()?;
            gig_id = store::insert_gig(&sp, venue.venue_id, title, gig_date, GigStatus::Draft)?;
            store::insert_ticket_type(&sp, gig_id, ADULT_TYPE, adult_price)?;
            for (spec, act_id) in performances.iter().zip(&act_ids) {
                store::insert_performance(
                    &sp,
                    gig_id,
                    *act_id,
                    spec.fee,
                    spec.on_time,
                    spec.duration_min,
                )?;
            }

            let stored = store::performances_for_gig(&sp, gig_id)?;
            violated = rules::evaluate(gig_date, &stored, venue.capacity, 0);
            if violated.is_empty() {
                store::set_gig_status(&sp, gig_id, GigStatus::Valid)?;
                sp.commit()?;
            } else {
                sp.rollback()?;
            }
        }
        tx.commit()?;

        if violated.is_empty() {
            log(
                Level::Info,
                Domain::Schedule,
                "gig_created",
                obj(&[
                    ("gig_id", v_int(gig_id)),
                    ("venue", v_str(venue_name)),
                    ("performances", v_int(performances.len() as i64)),
                ]),
            );
            Ok(gig_id)
        } else {
            log(
                Level::Warn,
                Domain::Schedule,
                "gig_rejected",
                obj(&[
                    ("venue", v_str(venue_name)),
                    ("title", v_str(title)),
                    ("rules", v_str(&violated.to_string())),
                ]),
            );
            Err(EngineError::SchedulingViolation { rules: violated })
        }
    }

    // --- performance removal -----------------------------------------------

    /// Delete one act's performance from a valid gig. If the residual
    /// running order is still admissible the removal simply commits; if not,
    /// the whole gig is cancelled in the same transaction, every ticket is
    /// marked affected, and the distinct customer emails come back for
    /// notification.
    pub fn remove_performance(&self, gig_id: i64, act_name: &str) -> Result<Removal> {
        self.sweep_all()?;
        let result = self.remove_performance_inner(gig_id, act_name);
        self.sweep_all()?;
        result
    }

    fn remove_performance_inner(&self, gig_id: i64, act_name: &str) -> Result<Removal> {
        let cell = self.locks.for_gig(gig_id);
        let _gate = cell.lock().unwrap_or_else(PoisonError::into_inner);
        let mut store = self.lock_store();

        let tx = store.transaction()?;
        let gig = store::gig_by_id(&tx, gig_id)?
            .filter(|g| g.status == GigStatus::Valid)
            .ok_or(EngineError::GigNotFound(gig_id))?;
        let act = store::act_by_name(&tx, act_name)?
            .ok_or_else(|| EngineError::ActNotFound(act_name.to_string()))?;
        if !store::delete_performance(&tx, gig_id, act.act_id)? {
            return Err(EngineError::ActNotFound(act_name.to_string()));
        }

        let remaining = store::performances_for_gig(&tx, gig_id)?;
        let venue = store::venue_by_id(&tx, gig.venue_id)?
            .ok_or_else(|| EngineError::VenueNotFound(format!("#{}", gig.venue_id)))?;
        let sold = store::sold_count(&tx, gig_id)?;
        let violated = rules::evaluate(gig.date, &remaining, venue.capacity, sold);

        if remaining.is_empty() || !violated.is_empty() {
            let emails = cancel_gig(&tx, gig_id)?;
            tx.commit()?;
            log(
                Level::Warn,
                Domain::Schedule,
                "gig_cancelled",
                obj(&[
                    ("gig_id", v_int(gig_id)),
                    ("removed_act", v_str(act_name)),
                    ("rules", v_str(&violated.to_string())),
                    ("recipients", v_int(emails.len() as i64)),
                ]),
            );
            self.notifier.gig_cancelled(gig_id, &emails);
            Ok(Removal {
                cascaded: true,
                rules: violated,
                notified: emails,
            })
        } else {
            tx.commit()?;
            log(
                Level::Info,
                Domain::Schedule,
                "performance_removed",
                obj(&[("gig_id", v_int(gig_id)), ("act", v_str(act_name))]),
            );
            Ok(Removal {
                cascaded: false,
                rules: RuleSet::default(),
                notified: Vec::new(),
            })
        }
    }

    // --- ticket admission ---------------------------------------------------

    /// Issue one ticket against the gig's capacity. The capacity check and
    /// the insert commit under the gig's lock, so concurrent callers cannot
    /// both take the last seat.
    pub fn book_ticket(
        &self,
        gig_id: i64,
        type_code: &str,
        customer_name: &str,
        customer_email: &str,
    ) -> Result<i64> {
        self.sweep_gig(gig_id)?;
        let result = self.book_ticket_inner(gig_id, type_code, customer_name, customer_email);
        self.sweep_gig(gig_id)?;
        result
    }

    fn book_ticket_inner(
        &self,
        gig_id: i64,
        type_code: &str,
        customer_name: &str,
        customer_email: &str,
    ) -> Result<i64> {
        let cell = self.locks.for_gig(gig_id);
        let _gate = cell.lock().unwrap_or_else(PoisonError::into_inner);
        let mut store = self.lock_store();

        let tx = store.transaction()?;
        let gig = store::gig_by_id(&tx, gig_id)?
            .filter(|g| g.status == GigStatus::Valid)
            .ok_or(EngineError::GigNotFound(gig_id))?;
        let ticket_type = store::ticket_type(&tx, gig_id, type_code)?.ok_or_else(|| {
            EngineError::TicketTypeNotFound {
                gig_id,
                code: type_code.to_string(),
            }
        })?;
        let venue = store::venue_by_id(&tx, gig.venue_id)?
            .ok_or_else(|| EngineError::VenueNotFound(format!("#{}", gig.venue_id)))?;

        let sold = store::sold_count(&tx, gig_id)?;
        if sold >= venue.capacity {
            log(
                Level::Info,
                Domain::Admission,
                "sold_out",
                obj(&[("gig_id", v_int(gig_id)), ("capacity", v_int(venue.capacity))]),
            );
            return Err(EngineError::SoldOut(gig_id));
        }

        let ticket_id = store::insert_ticket(&tx, gig_id, &ticket_type.code, customer_name, customer_email)?;
        tx.commit()?;
        log(
            Level::Debug,
            Domain::Admission,
            "ticket_issued",
            obj(&[
                ("gig_id", v_int(gig_id)),
                ("ticket_id", v_int(ticket_id)),
                ("type", v_str(&ticket_type.code)),
                ("email", v_str(customer_email)),
                ("remaining", v_int(venue.capacity - sold - 1)),
            ]),
        );
        Ok(ticket_id)
    }

    // --- consistency sweep --------------------------------------------------

    /// Re-check every non-cancelled gig and cancel the ones found violating,
    /// with the same mark-and-notify treatment as a removal cascade. Returns
    /// the gigs acted on. Running it twice in a row finds nothing the second
    /// time.
    pub fn sweep_all(&self) -> Result<Vec<SweepFinding>> {
        let gig_ids = {
            let store = self.lock_store();
            store::non_cancelled_gig_ids(store.conn())?
        };

        let mut findings = Vec::new();
        for gig_id in gig_ids {
            if let Some(finding) = self.sweep_one(gig_id)? {
                findings.push(finding);
            }
        }
        Ok(findings)
    }

    /// Single-gig sweep used on booking paths, where a full scan would
    /// contend with unrelated gigs for nothing.
    pub fn sweep_gig(&self, gig_id: i64) -> Result<Option<SweepFinding>> {
        self.sweep_one(gig_id)
    }

    fn sweep_one(&self, gig_id: i64) -> Result<Option<SweepFinding>> {
        let cell = self.locks.for_gig(gig_id);
        let _gate = cell.lock().unwrap_or_else(PoisonError::into_inner);
        let mut store = self.lock_store();

        let tx = store.transaction()?;
        let gig = match store::gig_by_id(&tx, gig_id)? {
            Some(g) if g.status != GigStatus::Cancelled => g,
            _ => return Ok(None),
        };
        let perfs = store::performances_for_gig(&tx, gig_id)?;
        let venue = store::venue_by_id(&tx, gig.venue_id)?
            .ok_or_else(|| EngineError::VenueNotFound(format!("#{}", gig.venue_id)))?;
        let sold = store::sold_count(&tx, gig_id)?;
        let violated = rules::evaluate(gig.date, &perfs, venue.capacity, sold);

        if !perfs.is_empty() && violated.is_empty() {
            return Ok(None);
        }

        let emails = cancel_gig(&tx, gig_id)?;
        tx.commit()?;
        log(
            Level::Warn,
            Domain::Sweep,
            "stale_violation_cancelled",
            obj(&[
                ("gig_id", v_int(gig_id)),
                ("rules", v_str(&violated.to_string())),
                ("anchorless", v_bool(perfs.is_empty())),
                ("recipients", v_int(emails.len() as i64)),
            ]),
        );
        self.notifier.gig_cancelled(gig_id, &emails);
        Ok(Some(SweepFinding {
            gig_id,
            rules: violated,
            notified: emails,
        }))
    }
}

/// Cancel a gig inside the caller's transaction: flip the status, mark every
/// ticket affected, and collect the distinct customer emails.
fn cancel_gig(conn: &Connection, gig_id: i64) -> Result<Vec<String>> {
    store::set_gig_status(conn, gig_id, GigStatus::Cancelled)?;
    store::mark_tickets_affected(conn, gig_id)?;
    store::distinct_ticket_emails(conn, gig_id)
}

/// Shape checks that need no store access. Returns the nominal start (the
/// earliest on-time).
fn validate_specs(
    performances: &[PerformanceSpec],
    adult_price: i64,
) -> Result<chrono::NaiveDateTime> {
    if adult_price < 0 {
        return Err(EngineError::Validation("adult ticket price must be >= 0".into()));
    }
    let mut seen = std::collections::HashSet::new();
    for spec in performances {
        if spec.duration_min <= 0 {
            return Err(EngineError::Validation(format!(
                "act '{}': duration must be positive",
                spec.act
            )));
        }
        if spec.fee < 0 {
            return Err(EngineError::Validation(format!(
                "act '{}': fee must be >= 0",
                spec.act
            )));
        }
        if !seen.insert(spec.act.as_str()) {
            return Err(EngineError::Validation(format!(
                "act '{}' listed twice; a gig holds one performance per act",
                spec.act
            )));
        }
    }
    performances
        .iter()
        .map(|spec| spec.on_time)
        .min()
        .ok_or_else(|| EngineError::Validation("a gig needs at least one performance".into()))
}
