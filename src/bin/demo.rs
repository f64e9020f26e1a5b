//! End-to-end walk-through against a scratch database.
//!
//! Seeds reference data, creates a gig, shows a rejected running order, sells
//! tickets, forces a cascading cancellation, and prints the reports.

use anyhow::Result;

use gigline::engine::Engine;
use gigline::model::{parse_ts, PerformanceSpec};
use gigline::{reports, store};

fn spec(act: &str, fee: i64, on: &str, dur: i64) -> PerformanceSpec {
    PerformanceSpec {
        act: act.to_string(),
        fee,
        on_time: parse_ts(on).expect("demo timestamp"),
        duration_min: dur,
    }
}

fn main() -> Result<()> {
    let path =
        std::env::var("GIG_DB").unwrap_or_else(|_| "/tmp/gigline-demo.sqlite".to_string());
    let _ = std::fs::remove_file(&path);

    let mut db = store::Store::open(&path)?;
    db.init()?;
    store::insert_venue(db.conn(), "Corn Exchange", 2000, 100)?;
    store::insert_act(db.conn(), "The Anchors", 900)?;
    store::insert_act(db.conn(), "Moth Parade", 400)?;
    store::insert_act(db.conn(), "Glass Harbour", 600)?;

    let engine = Engine::new(db);

    // A clean Friday bill: 5 minute lead-in, 5 minute changeover.
    let gig_id = engine.create_gig(
        "Corn Exchange",
        "Friday Showcase",
        &[
            spec("Moth Parade", 400, "2026-09-18 20:05:00", 60),
            spec("The Anchors", 900, "2026-09-18 21:10:00", 60),
        ],
        25,
    )?;
    println!("created gig {gig_id}");

    // Same bill plus a 3 hour set after an 80 minute dead gap: rejected, and
    // nothing of it survives in the store.
    let rejected = engine.create_gig(
        "Corn Exchange",
        "Overreach",
        &[
            spec("Moth Parade", 400, "2026-09-19 20:05:00", 60),
            spec("The Anchors", 900, "2026-09-19 21:10:00", 60),
            spec("Glass Harbour", 600, "2026-09-19 23:30:00", 180),
        ],
        25,
    );
    match rejected {
        Err(e) => println!("second bill rejected: {e}"),
        Ok(id) => println!("unexpected acceptance: gig {id}"),
    }

    for (name, email) in [
        ("Ada Byron", "ada@example.com"),
        ("Ben Okri", "ben@example.com"),
        ("Cass Elliot", "cass@example.com"),
    ] {
        let ticket_id = engine.book_ticket(gig_id, "A", name, email)?;
        println!("issued ticket {ticket_id}");
    }

    let line_up = engine.with_store(|s| reports::line_up(s, gig_id))?;
    println!("line-up: {}", serde_json::to_string(&line_up)?);
    let break_even = engine.with_store(reports::tickets_to_break_even)?;
    println!("break-even: {}", serde_json::to_string(&break_even)?);
    let history = engine.with_store(reports::headliner_ticket_history)?;
    println!("headliner history: {}", serde_json::to_string(&history)?);
    let pairings = engine.with_store(reports::feasible_pairings)?;
    println!("feasible pairings: {}", serde_json::to_string(&pairings)?);

    // Pulling the opener leaves a 65 minute hole after the nominal start, so
    // the whole gig goes down and every buyer is owed a notice.
    let removal = engine.remove_performance(gig_id, "Moth Parade")?;
    println!(
        "removal cascaded={} notified={}",
        removal.cascaded,
        removal.notified.join(", ")
    );

    let findings = engine.sweep_all()?;
    println!("post-cascade sweep findings: {}", findings.len());
    Ok(())
}
