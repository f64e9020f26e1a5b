//! SQLite-backed entity store.
//!
//! Owns the schema and row-level access for venues, acts, gigs,
//! performances, ticket types and tickets. All multi-row mutations go
//! through a caller-held [`rusqlite::Transaction`]; the row helpers take a
//! `&Connection` so they work both inside and outside one (transactions and
//! savepoints deref to the connection).

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::error::Result;
use crate::logging::{log, obj, v_str, Domain, Level};
use crate::model::{
    fmt_ts, parse_ts, Act, Gig, GigStatus, Performance, Ticket, TicketType, Venue,
};

const SCHEMA: &str = "
BEGIN;
CREATE TABLE IF NOT EXISTS venue (
    venueid     INTEGER PRIMARY KEY,
    venuename   TEXT NOT NULL UNIQUE,
    hirecost    INTEGER NOT NULL CHECK (hirecost >= 0),
    capacity    INTEGER NOT NULL CHECK (capacity > 0)
);
CREATE TABLE IF NOT EXISTS act (
    actid       INTEGER PRIMARY KEY,
    actname     TEXT NOT NULL UNIQUE,
    standardfee INTEGER NOT NULL CHECK (standardfee >= 0)
);
CREATE TABLE IF NOT EXISTS gig (
    gigid       INTEGER PRIMARY KEY,
    venueid     INTEGER NOT NULL REFERENCES venue(venueid),
    gigtitle    TEXT NOT NULL,
    gigdate     TEXT NOT NULL,
    gigstatus   TEXT NOT NULL DEFAULT 'Draft'
                CHECK (gigstatus IN ('Draft','Valid','Cancelled'))
);
CREATE TABLE IF NOT EXISTS act_gig (
    actid       INTEGER NOT NULL REFERENCES act(actid),
    gigid       INTEGER NOT NULL REFERENCES gig(gigid) ON DELETE CASCADE,
    actgigfee   INTEGER NOT NULL CHECK (actgigfee >= 0),
    ontime      TEXT NOT NULL,
    duration    INTEGER NOT NULL CHECK (duration > 0),
    PRIMARY KEY (actid, gigid)
);
CREATE TABLE IF NOT EXISTS gig_ticket (
    gigid       INTEGER NOT NULL REFERENCES gig(gigid) ON DELETE CASCADE,
    pricetype   TEXT NOT NULL,
    price       INTEGER NOT NULL CHECK (price >= 0),
    PRIMARY KEY (gigid, pricetype)
);
CREATE TABLE IF NOT EXISTS ticket (
    ticketid      INTEGER PRIMARY KEY,
    gigid         INTEGER NOT NULL REFERENCES gig(gigid),
    pricetype     TEXT NOT NULL,
    customername  TEXT NOT NULL,
    customeremail TEXT NOT NULL,
    issued        INTEGER NOT NULL DEFAULT 1,
    affected      INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_ticket_gig ON ticket(gigid);
CREATE INDEX IF NOT EXISTS idx_act_gig_gig ON act_gig(gigid);
COMMIT;";

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    pub fn init(&mut self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        log(
            Level::Debug,
            Domain::Store,
            "schema_ready",
            obj(&[("backend", v_str("sqlite"))]),
        );
        Ok(())
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn transaction(&mut self) -> Result<Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }
}

fn ts_col(idx: usize, raw: String) -> rusqlite::Result<chrono::NaiveDateTime> {
    parse_ts(&raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn status_col(idx: usize, raw: String) -> rusqlite::Result<GigStatus> {
    GigStatus::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown gig status '{raw}'").into(),
        )
    })
}

// --- venue / act -----------------------------------------------------------

pub fn insert_venue(conn: &Connection, name: &str, hire_cost: i64, capacity: i64) -> Result<i64> {
    conn.execute(
        "INSERT INTO venue (venuename, hirecost, capacity) VALUES (?1, ?2, ?3)",
        params![name, hire_cost, capacity],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_act(conn: &Connection, name: &str, standard_fee: i64) -> Result<i64> {
    conn.execute(
        "INSERT INTO act (actname, standardfee) VALUES (?1, ?2)",
        params![name, standard_fee],
    )?;
    Ok(conn.last_insert_rowid())
}

fn venue_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Venue> {
    Ok(Venue {
        venue_id: row.get(0)?,
        name: row.get(1)?,
        hire_cost: row.get(2)?,
        capacity: row.get(3)?,
    })
}

pub fn venue_by_name(conn: &Connection, name: &str) -> Result<Option<Venue>> {
    Ok(conn
        .query_row(
            "SELECT venueid, venuename, hirecost, capacity FROM venue WHERE venuename = ?1",
            params![name],
            venue_from_row,
        )
        .optional()?)
}

pub fn venue_by_id(conn: &Connection, venue_id: i64) -> Result<Option<Venue>> {
    Ok(conn
        .query_row(
            "SELECT venueid, venuename, hirecost, capacity FROM venue WHERE venueid = ?1",
            params![venue_id],
            venue_from_row,
        )
        .optional()?)
}

pub fn all_venues(conn: &Connection) -> Result<Vec<Venue>> {
    let mut stmt =
        conn.prepare("SELECT venueid, venuename, hirecost, capacity FROM venue ORDER BY venueid")?;
    let rows = stmt.query_map([], venue_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn act_by_name(conn: &Connection, name: &str) -> Result<Option<Act>> {
    Ok(conn
        .query_row(
            "SELECT actid, actname, standardfee FROM act WHERE actname = ?1",
            params![name],
            |row| {
                Ok(Act {
                    act_id: row.get(0)?,
                    name: row.get(1)?,
                    standard_fee: row.get(2)?,
                })
            },
        )
        .optional()?)
}

pub fn all_acts(conn: &Connection) -> Result<Vec<Act>> {
    let mut stmt = conn.prepare("SELECT actid, actname, standardfee FROM act ORDER BY actid")?;
    let rows = stmt.query_map([], |row| {
        Ok(Act {
            act_id: row.get(0)?,
            name: row.get(1)?,
            standard_fee: row.get(2)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

// --- gig / performances ----------------------------------------------------

pub fn insert_gig(
    conn: &Connection,
    venue_id: i64,
    title: &str,
    date: chrono::NaiveDateTime,
    status: GigStatus,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO gig (venueid, gigtitle, gigdate, gigstatus) VALUES (?1, ?2, ?3, ?4)",
        params![venue_id, title, fmt_ts(date), status.as_str()],
    )?;
    Ok(conn.last_insert_rowid())
}

fn gig_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Gig> {
    Ok(Gig {
        gig_id: row.get(0)?,
        venue_id: row.get(1)?,
        title: row.get(2)?,
        date: ts_col(3, row.get(3)?)?,
        status: status_col(4, row.get(4)?)?,
    })
}

pub fn gig_by_id(conn: &Connection, gig_id: i64) -> Result<Option<Gig>> {
    Ok(conn
        .query_row(
            "SELECT gigid, venueid, gigtitle, gigdate, gigstatus FROM gig WHERE gigid = ?1",
            params![gig_id],
            gig_from_row,
        )
        .optional()?)
}

pub fn all_gigs(conn: &Connection) -> Result<Vec<Gig>> {
    let mut stmt =
        conn.prepare("SELECT gigid, venueid, gigtitle, gigdate, gigstatus FROM gig ORDER BY gigid")?;
    let rows = stmt.query_map([], gig_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn non_cancelled_gig_ids(conn: &Connection) -> Result<Vec<i64>> {
    let mut stmt =
        conn.prepare("SELECT gigid FROM gig WHERE gigstatus != 'Cancelled' ORDER BY gigid")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn set_gig_status(conn: &Connection, gig_id: i64, status: GigStatus) -> Result<()> {
    conn.execute(
        "UPDATE gig SET gigstatus = ?2 WHERE gigid = ?1",
        params![gig_id, status.as_str()],
    )?;
    Ok(())
}

pub fn insert_performance(
    conn: &Connection,
    gig_id: i64,
    act_id: i64,
    fee: i64,
    on_time: chrono::NaiveDateTime,
    duration_min: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO act_gig (actid, gigid, actgigfee, ontime, duration)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![act_id, gig_id, fee, fmt_ts(on_time), duration_min],
    )?;
    Ok(())
}

pub fn performances_for_gig(conn: &Connection, gig_id: i64) -> Result<Vec<Performance>> {
    let mut stmt = conn.prepare(
        "SELECT ag.gigid, ag.actid, a.actname, ag.actgigfee, ag.ontime, ag.duration
         FROM act_gig ag JOIN act a ON a.actid = ag.actid
         WHERE ag.gigid = ?1 ORDER BY ag.ontime",
    )?;
    let rows = stmt.query_map(params![gig_id], |row| {
        Ok(Performance {
            gig_id: row.get(0)?,
            act_id: row.get(1)?,
            act_name: row.get(2)?,
            fee: row.get(3)?,
            on_time: ts_col(4, row.get(4)?)?,
            duration_min: row.get(5)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Returns whether a row was actually removed.
pub fn delete_performance(conn: &Connection, gig_id: i64, act_id: i64) -> Result<bool> {
    let n = conn.execute(
        "DELETE FROM act_gig WHERE gigid = ?1 AND actid = ?2",
        params![gig_id, act_id],
    )?;
    Ok(n > 0)
}

// --- ticket types / tickets ------------------------------------------------

pub fn insert_ticket_type(conn: &Connection, gig_id: i64, code: &str, price: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO gig_ticket (gigid, pricetype, price) VALUES (?1, ?2, ?3)",
        params![gig_id, code, price],
    )?;
    Ok(())
}

pub fn ticket_type(conn: &Connection, gig_id: i64, code: &str) -> Result<Option<TicketType>> {
    Ok(conn
        .query_row(
            "SELECT gigid, pricetype, price FROM gig_ticket WHERE gigid = ?1 AND pricetype = ?2",
            params![gig_id, code],
            |row| {
                Ok(TicketType {
                    gig_id: row.get(0)?,
                    code: row.get(1)?,
                    price: row.get(2)?,
                })
            },
        )
        .optional()?)
}

pub fn insert_ticket(
    conn: &Connection,
    gig_id: i64,
    code: &str,
    customer_name: &str,
    customer_email: &str,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO ticket (gigid, pricetype, customername, customeremail, issued, affected)
         VALUES (?1, ?2, ?3, ?4, 1, 0)",
        params![gig_id, code, customer_name, customer_email],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Issued, unrefunded tickets for a gig; the number the capacity rule sees.
pub fn sold_count(conn: &Connection, gig_id: i64) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM ticket WHERE gigid = ?1 AND issued = 1 AND affected = 0",
        params![gig_id],
        |row| row.get(0),
    )?)
}

pub fn tickets_for_gig(conn: &Connection, gig_id: i64) -> Result<Vec<Ticket>> {
    let mut stmt = conn.prepare(
        "SELECT ticketid, gigid, pricetype, customername, customeremail, issued, affected
         FROM ticket WHERE gigid = ?1 ORDER BY ticketid",
    )?;
    let rows = stmt.query_map(params![gig_id], |row| {
        Ok(Ticket {
            ticket_id: row.get(0)?,
            gig_id: row.get(1)?,
            type_code: row.get(2)?,
            customer_name: row.get(3)?,
            customer_email: row.get(4)?,
            issued: row.get::<_, i64>(5)? != 0,
            affected: row.get::<_, i64>(6)? != 0,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn mark_tickets_affected(conn: &Connection, gig_id: i64) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE ticket SET affected = 1 WHERE gigid = ?1",
        params![gig_id],
    )?)
}

/// Distinct customer emails for a gig, in first-purchase order.
pub fn distinct_ticket_emails(conn: &Connection, gig_id: i64) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT customeremail FROM ticket WHERE gigid = ?1 ORDER BY ticketid")?;
    let rows = stmt.query_map(params![gig_id], |row| row.get::<_, String>(0))?;
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for email in rows {
        let email = email?;
        if seen.insert(email.clone()) {
            out.push(email);
        }
    }
    Ok(out)
}
