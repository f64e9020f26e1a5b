//! Integration tests for the consistency and admission control engine.
//!
//! These cover the contract end to end on a real (scratch) database:
//! accepted gigs re-evaluate clean, rejected gigs leave no trace, capacity
//! holds under concurrent demand, cascades notify the right people, and the
//! sweep repairs externally-introduced drift exactly once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use tempfile::TempDir;

use gigline::engine::{Engine, Notifier};
use gigline::error::EngineError;
use gigline::model::{parse_ts, GigStatus, PerformanceSpec};
use gigline::rules::Rule;
use gigline::store::{self, Store};

fn ts(s: &str) -> chrono::NaiveDateTime {
    parse_ts(s).unwrap()
}

fn spec(act: &str, on: &str, dur: i64) -> PerformanceSpec {
    PerformanceSpec {
        act: act.to_string(),
        fee: 100,
        on_time: ts(on),
        duration_min: dur,
    }
}

/// Scratch database seeded with reference data. The TempDir must stay alive
/// as long as the engine.
fn scratch() -> (TempDir, Engine) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gig.sqlite");
    let mut db = Store::open(path.to_str().unwrap()).unwrap();
    db.init().unwrap();
    store::insert_venue(db.conn(), "Corn Exchange", 2000, 100).unwrap();
    store::insert_venue(db.conn(), "Cellar Bar", 300, 3).unwrap();
    store::insert_act(db.conn(), "The Anchors", 900).unwrap();
    store::insert_act(db.conn(), "Moth Parade", 400).unwrap();
    store::insert_act(db.conn(), "Glass Harbour", 600).unwrap();
    (dir, Engine::new(db))
}

/// A clean two-act bill: opener at 20:05, headliner at 21:10.
fn clean_bill() -> Vec<PerformanceSpec> {
    vec![
        spec("Moth Parade", "2026-09-18 20:05:00", 60),
        spec("The Anchors", "2026-09-18 21:10:00", 60),
    ]
}

fn count(engine: &Engine, table: &str) -> i64 {
    engine.with_store(|s| {
        s.conn()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .unwrap()
    })
}

fn exec(engine: &Engine, sql: &str) {
    engine.with_store(|s| s.conn().execute(sql, []).unwrap());
}

// ---------------------------------------------------------------------------
// Creation: atomicity and post-conditions
// ---------------------------------------------------------------------------

#[test]
fn accepted_gig_reevaluates_clean() {
    let (_dir, engine) = scratch();
    let gig_id = engine
        .create_gig("Corn Exchange", "Friday Showcase", &clean_bill(), 25)
        .unwrap();

    let gig = engine
        .with_store(|s| store::gig_by_id(s.conn(), gig_id))
        .unwrap()
        .unwrap();
    assert_eq!(gig.status, GigStatus::Valid);
    assert_eq!(gig.date, ts("2026-09-18 20:05:00"));

    let perfs = engine
        .with_store(|s| store::performances_for_gig(s.conn(), gig_id))
        .unwrap();
    assert_eq!(perfs.len(), 2);
    assert!(gigline::rules::evaluate(gig.date, &perfs, 100, 0).is_empty());

    // The adult type is seeded with the gig.
    let tt = engine
        .with_store(|s| store::ticket_type(s.conn(), gig_id, "A"))
        .unwrap()
        .unwrap();
    assert_eq!(tt.price, 25);
}

#[test]
fn rejected_gig_leaves_no_trace() {
    let (_dir, engine) = scratch();
    let mut bill = clean_bill();
    bill.push(spec("Glass Harbour", "2026-09-18 23:30:00", 180));

    let err = engine
        .create_gig("Corn Exchange", "Overreach", &bill, 25)
        .unwrap_err();
    match err {
        EngineError::SchedulingViolation { rules } => {
            assert!(rules.contains(Rule::IntervalTooLong));
            assert!(rules.contains(Rule::ActOvertime));
            assert!(rules.contains(Rule::DateCrossed));
        }
        other => panic!("expected SchedulingViolation, got {other}"),
    }

    // Rollback completeness: none of the attempted writes survive.
    assert_eq!(count(&engine, "gig"), 0);
    assert_eq!(count(&engine, "act_gig"), 0);
    assert_eq!(count(&engine, "gig_ticket"), 0);
}

#[test]
fn validation_rejects_before_any_write() {
    let (_dir, engine) = scratch();

    let err = engine
        .create_gig("Corn Exchange", "Empty Bill", &[], 25)
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let err = engine
        .create_gig(
            "Corn Exchange",
            "Zero Minutes",
            &[spec("The Anchors", "2026-09-18 20:00:00", 0)],
            25,
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    assert_eq!(count(&engine, "gig"), 0);
}

#[test]
fn unknown_references_are_not_found() {
    let (_dir, engine) = scratch();
    let bill = clean_bill();

    assert!(matches!(
        engine.create_gig("The Void", "Nowhere", &bill, 25),
        Err(EngineError::VenueNotFound(_))
    ));
    assert!(matches!(
        engine.create_gig(
            "Corn Exchange",
            "Ghost Act",
            &[spec("Nobody", "2026-09-18 20:00:00", 60)],
            25
        ),
        Err(EngineError::ActNotFound(_))
    ));
    assert!(matches!(
        engine.remove_performance(99, "The Anchors"),
        Err(EngineError::GigNotFound(99))
    ));
    assert!(matches!(
        engine.book_ticket(99, "A", "Ada", "ada@example.com"),
        Err(EngineError::GigNotFound(99))
    ));
}

// ---------------------------------------------------------------------------
// Admission: capacity, orderly failure, concurrency
// ---------------------------------------------------------------------------

#[test]
fn booking_fills_to_capacity_then_sells_out() {
    let (_dir, engine) = scratch();
    let gig_id = engine
        .create_gig(
            "Cellar Bar",
            "Basement Night",
            &[spec("The Anchors", "2026-09-18 20:00:00", 60)],
            12,
        )
        .unwrap();

    for i in 0..3 {
        engine
            .book_ticket(gig_id, "A", "Buyer", &format!("b{i}@example.com"))
            .unwrap();
    }
    assert!(matches!(
        engine.book_ticket(gig_id, "A", "Late Buyer", "late@example.com"),
        Err(EngineError::SoldOut(_))
    ));
    let sold = engine
        .with_store(|s| store::sold_count(s.conn(), gig_id))
        .unwrap();
    assert_eq!(sold, 3);
}

#[test]
fn booking_checks_type_after_gig() {
    let (_dir, engine) = scratch();
    let gig_id = engine
        .create_gig("Cellar Bar", "Basement Night", &clean_bill(), 12)
        .unwrap();
    assert!(matches!(
        engine.book_ticket(gig_id, "VIP", "Ada", "ada@example.com"),
        Err(EngineError::TicketTypeNotFound { code, .. }) if code == "VIP"
    ));
}

#[test]
fn concurrent_booking_never_oversells() {
    // 80 of 100 sold, 30 concurrent buyers: exactly 20 get in.
    let (_dir, engine) = scratch();
    let gig_id = engine
        .create_gig("Corn Exchange", "Hot Ticket", &clean_bill(), 25)
        .unwrap();
    for i in 0..80 {
        engine
            .book_ticket(gig_id, "A", "Presale", &format!("p{i}@example.com"))
            .unwrap();
    }

    let engine = Arc::new(engine);
    let accepted = Arc::new(AtomicU64::new(0));
    let sold_out = Arc::new(AtomicU64::new(0));
    let mut handles = Vec::new();
    for t in 0..30 {
        let engine = Arc::clone(&engine);
        let accepted = Arc::clone(&accepted);
        let sold_out = Arc::clone(&sold_out);
        handles.push(thread::spawn(move || {
            match engine.book_ticket(gig_id, "A", "Rush Buyer", &format!("r{t}@example.com")) {
                Ok(_) => accepted.fetch_add(1, Ordering::SeqCst),
                Err(EngineError::SoldOut(_)) => sold_out.fetch_add(1, Ordering::SeqCst),
                Err(e) => panic!("unexpected booking failure: {e}"),
            };
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(accepted.load(Ordering::SeqCst), 20);
    assert_eq!(sold_out.load(Ordering::SeqCst), 10);
    let sold = engine
        .with_store(|s| store::sold_count(s.conn(), gig_id))
        .unwrap();
    assert_eq!(sold, 100);
}

// ---------------------------------------------------------------------------
// Removal: keep-or-cascade
// ---------------------------------------------------------------------------

#[test]
fn removal_keeping_a_valid_gig_commits_quietly() {
    let (_dir, engine) = scratch();
    let gig_id = engine
        .create_gig("Corn Exchange", "Friday Showcase", &clean_bill(), 25)
        .unwrap();

    // Dropping the headliner leaves the opener alone: still admissible.
    let removal = engine.remove_performance(gig_id, "The Anchors").unwrap();
    assert!(!removal.cascaded);
    assert!(removal.notified.is_empty());

    let gig = engine
        .with_store(|s| store::gig_by_id(s.conn(), gig_id))
        .unwrap()
        .unwrap();
    assert_eq!(gig.status, GigStatus::Valid);
    let perfs = engine
        .with_store(|s| store::performances_for_gig(s.conn(), gig_id))
        .unwrap();
    assert_eq!(perfs.len(), 1);
    assert_eq!(perfs[0].act_name, "Moth Parade");
}

#[test]
fn removal_cascade_cancels_and_notifies_distinct_buyers() {
    let (_dir, engine) = scratch();
    let gig_id = engine
        .create_gig("Corn Exchange", "Friday Showcase", &clean_bill(), 25)
        .unwrap();
    for (name, email) in [
        ("Ada", "ada@example.com"),
        ("Ben", "ben@example.com"),
        ("Ada", "ada@example.com"), // repeat buyer, one notice
    ] {
        engine.book_ticket(gig_id, "A", name, email).unwrap();
    }

    // Dropping the opener leaves the headliner 65 minutes after the nominal
    // start: the residual gig is invalid and the removal cascades.
    let removal = engine.remove_performance(gig_id, "Moth Parade").unwrap();
    assert!(removal.cascaded);
    assert!(removal.rules.contains(Rule::IntervalTooLong));
    assert_eq!(removal.notified, ["ada@example.com", "ben@example.com"]);

    let gig = engine
        .with_store(|s| store::gig_by_id(s.conn(), gig_id))
        .unwrap()
        .unwrap();
    assert_eq!(gig.status, GigStatus::Cancelled);
    let tickets = engine
        .with_store(|s| store::tickets_for_gig(s.conn(), gig_id))
        .unwrap();
    assert_eq!(tickets.len(), 3);
    assert!(tickets.iter().all(|t| t.affected));

    // A cancelled gig sells nothing and cannot lose another act.
    assert!(matches!(
        engine.book_ticket(gig_id, "A", "Late", "late@example.com"),
        Err(EngineError::GigNotFound(_))
    ));
    assert!(matches!(
        engine.remove_performance(gig_id, "The Anchors"),
        Err(EngineError::GigNotFound(_))
    ));
}

#[test]
fn removing_the_last_performance_cascades() {
    let (_dir, engine) = scratch();
    let gig_id = engine
        .create_gig(
            "Corn Exchange",
            "Solo Night",
            &[spec("The Anchors", "2026-09-18 20:00:00", 90)],
            25,
        )
        .unwrap();
    engine.book_ticket(gig_id, "A", "Ada", "ada@example.com").unwrap();

    let removal = engine.remove_performance(gig_id, "The Anchors").unwrap();
    assert!(removal.cascaded);
    // No residual performances, so no rule set to report.
    assert!(removal.rules.is_empty());
    assert_eq!(removal.notified, ["ada@example.com"]);

    let gig = engine
        .with_store(|s| store::gig_by_id(s.conn(), gig_id))
        .unwrap()
        .unwrap();
    assert_eq!(gig.status, GigStatus::Cancelled);
}

// ---------------------------------------------------------------------------
// Sweep: externally-introduced drift
// ---------------------------------------------------------------------------

#[test]
fn sweep_cancels_externally_broken_gigs_once() {
    let (_dir, engine) = scratch();
    let gig_id = engine
        .create_gig("Corn Exchange", "Friday Showcase", &clean_bill(), 25)
        .unwrap();
    engine.book_ticket(gig_id, "A", "Ada", "ada@example.com").unwrap();

    // Backend edit behind the engine's back: the headliner's set balloons to
    // three hours.
    exec(&engine, "UPDATE act_gig SET duration = 180");

    let findings = engine.sweep_all().unwrap();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].gig_id, gig_id);
    assert!(findings[0].rules.contains(Rule::ActOvertime));
    assert_eq!(findings[0].notified, ["ada@example.com"]);

    // Idempotence: the repair sticks.
    assert!(engine.sweep_all().unwrap().is_empty());
    assert!(engine.sweep_all().unwrap().is_empty());
}

#[test]
fn guard_sweep_repairs_before_admission() {
    let (_dir, engine) = scratch();
    let gig_id = engine
        .create_gig("Corn Exchange", "Friday Showcase", &clean_bill(), 25)
        .unwrap();
    exec(&engine, "UPDATE act_gig SET duration = 180");

    // The booking path's entry sweep cancels the gig before admission.
    assert!(matches!(
        engine.book_ticket(gig_id, "A", "Ada", "ada@example.com"),
        Err(EngineError::GigNotFound(_))
    ));
}

#[test]
fn sweep_reports_capacity_overload() {
    let (_dir, engine) = scratch();
    let gig_id = engine
        .create_gig("Cellar Bar", "Basement Night", &clean_bill(), 12)
        .unwrap();
    for i in 0..3 {
        engine
            .book_ticket(gig_id, "A", "Buyer", &format!("b{i}@example.com"))
            .unwrap();
    }
    // The venue loses a floor.
    exec(&engine, "UPDATE venue SET capacity = 1 WHERE venuename = 'Cellar Bar'");

    let findings = engine.sweep_all().unwrap();
    assert_eq!(findings.len(), 1);
    assert!(findings[0].rules.contains(Rule::VenueOverload));
    assert_eq!(findings[0].notified.len(), 3);
}

// ---------------------------------------------------------------------------
// Notification seam
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CapturingNotifier {
    notices: Mutex<Vec<(i64, Vec<String>)>>,
}

impl Notifier for CapturingNotifier {
    fn gig_cancelled(&self, gig_id: i64, emails: &[String]) {
        self.notices
            .lock()
            .unwrap()
            .push((gig_id, emails.to_vec()));
    }
}

#[test]
fn cascades_reach_the_notifier_after_commit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gig.sqlite");
    let mut db = Store::open(path.to_str().unwrap()).unwrap();
    db.init().unwrap();
    store::insert_venue(db.conn(), "Corn Exchange", 2000, 100).unwrap();
    store::insert_act(db.conn(), "Moth Parade", 400).unwrap();
    store::insert_act(db.conn(), "The Anchors", 900).unwrap();

    let notifier = Arc::new(CapturingNotifier::default());
    let engine = Engine::with_notifier(
        db,
        Box::new(SharedNotifier(Arc::clone(&notifier))),
    );

    let gig_id = engine
        .create_gig("Corn Exchange", "Friday Showcase", &clean_bill(), 25)
        .unwrap();
    engine.book_ticket(gig_id, "A", "Ada", "ada@example.com").unwrap();
    engine.remove_performance(gig_id, "Moth Parade").unwrap();

    let notices = notifier.notices.lock().unwrap();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].0, gig_id);
    assert_eq!(notices[0].1, ["ada@example.com"]);
}

struct SharedNotifier(Arc<CapturingNotifier>);

impl Notifier for SharedNotifier {
    fn gig_cancelled(&self, gig_id: i64, emails: &[String]) {
        self.0.gig_cancelled(gig_id, emails);
    }
}
