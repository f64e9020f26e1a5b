//! Derivative read-only aggregates.
//!
//! Everything here reads entities the engine already left consistent and
//! imposes no invariant of its own: the running order for a gig, break-even
//! ticket counts, what each headliner sold per year, the regulars who show
//! up every year an act headlines, and which venue/act pairings could pay
//! for themselves.
//!
//! Headliner means the act whose performance ends latest within a gig.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{Datelike, NaiveDateTime};
use serde::Serialize;

use crate::error::{EngineError, Result};
use crate::model::{Gig, GigStatus, Performance, ADULT_TYPE};
use crate::store::{self, Store};

#[derive(Debug, Clone, Serialize)]
pub struct LineUpRow {
    pub act_name: String,
    pub on_time: NaiveDateTime,
    pub off_time: NaiveDateTime,
}

/// The running order for one gig, by on-time.
pub fn line_up(store: &Store, gig_id: i64) -> Result<Vec<LineUpRow>> {
    store::gig_by_id(store.conn(), gig_id)?.ok_or(EngineError::GigNotFound(gig_id))?;
    let perfs = store::performances_for_gig(store.conn(), gig_id)?;
    Ok(perfs
        .into_iter()
        .map(|p| LineUpRow {
            off_time: p.off_time(),
            on_time: p.on_time,
            act_name: p.act_name,
        })
        .collect())
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakEvenRow {
    pub gig_id: i64,
    pub tickets_to_sell: i64,
}

/// Adult tickets each live gig must sell to cover venue hire plus the agreed
/// fees. Gigs without a priced adult type are skipped.
pub fn tickets_to_break_even(store: &Store) -> Result<Vec<BreakEvenRow>> {
    let mut out = Vec::new();
    for gig in live_gigs(store)? {
        let Some(ticket_type) = store::ticket_type(store.conn(), gig.gig_id, ADULT_TYPE)?
        else {
            continue;
        };
        if ticket_type.price <= 0 {
            continue;
        }
        let venue = store::venue_by_id(store.conn(), gig.venue_id)?
            .ok_or_else(|| EngineError::VenueNotFound(format!("#{}", gig.venue_id)))?;
        let fees: i64 = store::performances_for_gig(store.conn(), gig.gig_id)?
            .iter()
            .map(|p| p.fee)
            .sum();
        out.push(BreakEvenRow {
            gig_id: gig.gig_id,
            tickets_to_sell: div_ceil(venue.hire_cost + fees, ticket_type.price),
        });
    }
    Ok(out)
}

#[derive(Debug, Clone, Serialize)]
pub struct HeadlinerYearRow {
    pub act_name: String,
    /// Calendar year, or "Total" for the act's all-time row.
    pub year: String,
    pub tickets_sold: i64,
}

/// Tickets sold per calendar year for each act that has headlined, one block
/// per act with a trailing Total row. Blocks are ranked by total sold
/// (largest first), years ascending inside a block.
pub fn headliner_ticket_history(store: &Store) -> Result<Vec<HeadlinerYearRow>> {
    let mut per_act: HashMap<String, BTreeMap<i32, i64>> = HashMap::new();
    for gig in live_gigs(store)? {
        let perfs = store::performances_for_gig(store.conn(), gig.gig_id)?;
        let Some(headliner) = headliner_of(&perfs) else {
            continue;
        };
        let sold = store::sold_count(store.conn(), gig.gig_id)?;
        *per_act
            .entry(headliner.act_name.clone())
            .or_default()
            .entry(gig.date.year())
            .or_insert(0) += sold;
    }

    let mut acts: Vec<(String, BTreeMap<i32, i64>, i64)> = per_act
        .into_iter()
        .map(|(name, years)| {
            let total = years.values().sum();
            (name, years, total)
        })
        .collect();
    acts.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(&b.0)));

    let mut out = Vec::new();
    for (name, years, total) in acts {
        for (year, sold) in &years {
            out.push(HeadlinerYearRow {
                act_name: name.clone(),
                year: year.to_string(),
                tickets_sold: *sold,
            });
        }
        out.push(HeadlinerYearRow {
            act_name: name,
            year: "Total".to_string(),
            tickets_sold: total,
        });
    }
    Ok(out)
}

#[derive(Debug, Clone, Serialize)]
pub struct RegularCustomerRow {
    pub act_name: String,
    pub customer_name: String,
}

/// Customers holding at least one ticket in every calendar year an act
/// headlined. Ordered by act then customer.
pub fn regular_customers(store: &Store) -> Result<Vec<RegularCustomerRow>> {
    // act -> year -> customers who bought for that act's headline gigs.
    let mut buyers: HashMap<String, HashMap<i32, BTreeSet<String>>> = HashMap::new();
    for gig in live_gigs(store)? {
        let perfs = store::performances_for_gig(store.conn(), gig.gig_id)?;
        let Some(headliner) = headliner_of(&perfs) else {
            continue;
        };
        let year_buyers = buyers
            .entry(headliner.act_name.clone())
            .or_default()
            .entry(gig.date.year())
            .or_default();
        for ticket in store::tickets_for_gig(store.conn(), gig.gig_id)? {
            if ticket.issued && !ticket.affected {
                year_buyers.insert(ticket.customer_name);
            }
        }
    }

    let mut out = Vec::new();
    let mut acts: Vec<_> = buyers.into_iter().collect();
    acts.sort_by(|a, b| a.0.cmp(&b.0));
    for (act_name, years) in acts {
        let mut iter = years.values();
        let Some(first) = iter.next() else { continue };
        let mut regulars: BTreeSet<String> = first.clone();
        for other in iter {
            regulars = regulars.intersection(other).cloned().collect();
        }
        for customer_name in regulars {
            out.push(RegularCustomerRow {
                act_name: act_name.clone(),
                customer_name,
            });
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, Serialize)]
pub struct FeasiblePairingRow {
    pub venue_name: String,
    pub act_name: String,
    pub tickets_required: i64,
}

/// Venue/act pairings that could cover hire cost plus standard fee by
/// selling tickets at the observed average price, within capacity. Sorted by
/// tickets required. Empty when no price history exists yet.
pub fn feasible_pairings(store: &Store) -> Result<Vec<FeasiblePairingRow>> {
    let Some(avg_price) = average_ticket_price(store)? else {
        return Ok(Vec::new());
    };

    let venues = store::all_venues(store.conn())?;
    let acts = store::all_acts(store.conn())?;
    let mut out = Vec::new();
    for venue in &venues {
        for act in &acts {
            let cost = venue.hire_cost + act.standard_fee;
            let required = (cost as f64 / avg_price).ceil() as i64;
            if required <= venue.capacity {
                out.push(FeasiblePairingRow {
                    venue_name: venue.name.clone(),
                    act_name: act.name.clone(),
                    tickets_required: required,
                });
            }
        }
    }
    out.sort_by(|a, b| {
        a.tickets_required
            .cmp(&b.tickets_required)
            .then_with(|| a.venue_name.cmp(&b.venue_name))
            .then_with(|| a.act_name.cmp(&b.act_name))
    });
    Ok(out)
}

/// Mean price paid across live tickets of non-cancelled gigs.
fn average_ticket_price(store: &Store) -> Result<Option<f64>> {
    Ok(store.conn().query_row(
        "SELECT AVG(gt.price)
         FROM ticket t
         JOIN gig g ON g.gigid = t.gigid
         JOIN gig_ticket gt ON gt.gigid = t.gigid AND gt.pricetype = t.pricetype
         WHERE g.gigstatus != 'Cancelled' AND t.issued = 1 AND t.affected = 0",
        [],
        |row| row.get::<_, Option<f64>>(0),
    )?)
}

fn live_gigs(store: &Store) -> Result<Vec<Gig>> {
    Ok(store::all_gigs(store.conn())?
        .into_iter()
        .filter(|g| g.status != GigStatus::Cancelled)
        .collect())
}

fn headliner_of(perfs: &[Performance]) -> Option<&Performance> {
    perfs.iter().max_by_key(|p| (p.off_time(), p.on_time))
}

fn div_ceil(cost: i64, price: i64) -> i64 {
    (cost + price - 1) / price
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::parse_ts;

    #[test]
    fn test_div_ceil_rounds_partial_tickets_up() {
        assert_eq!(div_ceil(100, 10), 10);
        assert_eq!(div_ceil(101, 10), 11);
        assert_eq!(div_ceil(9, 10), 1);
        assert_eq!(div_ceil(0, 10), 0);
    }

    #[test]
    fn test_headliner_is_latest_finisher() {
        let mk = |act: &str, on: &str, dur: i64| Performance {
            gig_id: 1,
            act_id: 0,
            act_name: act.to_string(),
            fee: 0,
            on_time: parse_ts(on).unwrap(),
            duration_min: dur,
        };
        let perfs = vec![
            mk("Opener", "2026-05-01 20:00:00", 30),
            mk("Closer", "2026-05-01 20:40:00", 60),
        ];
        assert_eq!(headliner_of(&perfs).unwrap().act_name, "Closer");
        assert!(headliner_of(&[]).is_none());
    }
}
