//! Concurrent admission stress: many threads hammer one gig's capacity.
//!
//! The pass condition is simple: accepted bookings never exceed capacity,
//! whatever the interleaving. Knobs: STRESS_THREADS, STRESS_CAPACITY,
//! STRESS_PRESOLD, GIG_DB.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::{bail, Result};

use gigline::engine::Engine;
use gigline::model::{parse_ts, PerformanceSpec};
use gigline::{store, EngineError};

fn env_num<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn main() -> Result<()> {
    let threads: usize = env_num("STRESS_THREADS", 16);
    let capacity: i64 = env_num("STRESS_CAPACITY", 100);
    let presold: i64 = env_num("STRESS_PRESOLD", 0);
    let path =
        std::env::var("GIG_DB").unwrap_or_else(|_| "/tmp/gigline-stress.sqlite".to_string());
    let _ = std::fs::remove_file(&path);

    let mut db = store::Store::open(&path)?;
    db.init()?;
    store::insert_venue(db.conn(), "Stress Hall", 0, capacity)?;
    store::insert_act(db.conn(), "Loop Act", 0)?;
    let engine = Arc::new(Engine::new(db));

    let gig_id = engine.create_gig(
        "Stress Hall",
        "Stress Gig",
        &[PerformanceSpec {
            act: "Loop Act".to_string(),
            fee: 0,
            on_time: parse_ts("2026-09-18 20:00:00").expect("stress timestamp"),
            duration_min: 60,
        }],
        10,
    )?;
    for i in 0..presold {
        engine.book_ticket(gig_id, "A", "Presale", &format!("presale{i}@example.com"))?;
    }

    let accepted = Arc::new(AtomicU64::new(0));
    let rejected = Arc::new(AtomicU64::new(0));
    let failures = Arc::new(AtomicU64::new(0));
    // Twice the remaining seats in total, so the sold-out path gets exercised.
    let attempts_per_thread =
        (((capacity - presold).max(0) as usize * 2) / threads.max(1)).max(1);

    let started = Instant::now();
    let mut handles = Vec::with_capacity(threads);
    for t in 0..threads {
        let engine = Arc::clone(&engine);
        let accepted = Arc::clone(&accepted);
        let rejected = Arc::clone(&rejected);
        let failures = Arc::clone(&failures);
        handles.push(thread::spawn(move || {
            for i in 0..attempts_per_thread {
                let email = format!("t{t}-{i}@example.com");
                match engine.book_ticket(gig_id, "A", "Stress Buyer", &email) {
                    Ok(_) => {
                        accepted.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(EngineError::SoldOut(_)) => {
                        rejected.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => {
                        eprintln!("booking failed: {e}");
                        failures.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        }));
    }
    for handle in handles {
        let _ = handle.join();
    }

    let sold = engine.with_store(|s| store::sold_count(s.conn(), gig_id))?;
    println!(
        "threads={} attempts={} accepted={} sold_out={} failures={} sold={} capacity={} elapsed_ms={}",
        threads,
        threads * attempts_per_thread,
        accepted.load(Ordering::SeqCst),
        rejected.load(Ordering::SeqCst),
        failures.load(Ordering::SeqCst),
        sold,
        capacity,
        started.elapsed().as_millis(),
    );

    if sold > capacity {
        bail!("OVERSOLD: {sold} tickets against capacity {capacity}");
    }
    println!("OK: no oversell");
    Ok(())
}
