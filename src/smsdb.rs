//! The SMS database.
//!
//! One process-wide sqlite store holding four relations: inbound
//! concatenation parts, per-destination concatenation reference counters,
//! outbound message registry and per-part delivery status. Every public
//! call runs its statements inside one transaction under one lock; the
//! supervisor threads and the host API share the handle freely.

use std::sync::Mutex;

use log::{debug, warn};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};

/// Delivery-status finality: bit 0x40 set is a permanent failure, absence
/// of bit 0x20 is a final success, anything else is still in transit.
pub fn status_is_final(status: u8) -> bool {
    status & 0x40 != 0 || status & 0x20 == 0
}

/// Everything known about a completed outbound message, returned when the
/// last pending part reaches a final state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportComplete {
    pub uid: i64,
    pub dst: String,
    pub body: String,
    pub statuses: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredMessage {
    pub uid: i64,
    pub dst: String,
    pub body: String,
}

pub struct SmsDb {
    conn: Mutex<Connection>,
    csms_ttl: u32,
}

impl SmsDb {
    /// Open (or create) the store. `:memory:` keeps it in RAM.
    pub fn open(path: &str, csms_ttl: u32) -> Result<SmsDb> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS incoming_msg (key VARCHAR(256), seqorder INTEGER,
                 expiration TIMESTAMP DEFAULT (unixepoch('now')), message VARCHAR(256),
                 PRIMARY KEY(key, seqorder));
             CREATE INDEX IF NOT EXISTS incoming_key ON incoming_msg(key);
             CREATE TABLE IF NOT EXISTS outgoing_msg (uid INTEGER PRIMARY KEY AUTOINCREMENT,
                 dev VARCHAR(256), dst VARCHAR(256), message VARCHAR(256), cnt INTEGER,
                 expiration TIMESTAMP, srr BOOLEAN);
             CREATE TABLE IF NOT EXISTS outgoing_ref (key VARCHAR(256), refid INTEGER,
                 PRIMARY KEY(key));
             CREATE TABLE IF NOT EXISTS outgoing_part (key VARCHAR(256), msg INTEGER,
                 status INTEGER, PRIMARY KEY(key));
             CREATE INDEX IF NOT EXISTS outgoing_part_msg ON outgoing_part(msg);",
        )?;

        Ok(SmsDb {
            conn: Mutex::new(conn),
            csms_ttl,
        })
    }

    /// Insert one inbound part. Returns the number of parts now held for
    /// the `(imsi, addr, ref, parts)` key and, once every part is present,
    /// the body concatenated in sequence order; the parts are consumed.
    pub fn put_part(
        &self,
        imsi: &str,
        addr: &str,
        csms_ref: u16,
        parts: u8,
        order: u8,
        body: &str,
    ) -> Result<(u32, Option<String>)> {
        let key = format!("{imsi}/{addr}/{csms_ref}/{parts}");
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT OR REPLACE INTO incoming_msg (key, seqorder, expiration, message)
             VALUES (?, ?, unixepoch('now') + ?, ?)",
            params![key, order, self.csms_ttl, body],
        )?;

        let count: u32 = tx.query_row(
            "SELECT COUNT(seqorder) FROM incoming_msg WHERE key = ?",
            [&key],
            |row| row.get(0),
        )?;

        let assembled = if count >= parts as u32 {
            let mut stmt =
                tx.prepare("SELECT message FROM incoming_msg WHERE key = ? ORDER BY seqorder")?;
            let mut full = String::new();
            let rows = stmt.query_map([&key], |row| row.get::<_, String>(0))?;
            for part in rows {
                full.push_str(&part?);
            }
            drop(stmt);
            tx.execute("DELETE FROM incoming_msg WHERE key = ?", [&key])?;
            Some(full)
        } else {
            None
        };

        tx.commit()?;
        Ok((count, assembled))
    }

    /// Next concatenation reference for `(imsi, dst)`: 1 on first use,
    /// wrapping modulo 256 afterwards.
    pub fn get_refid(&self, imsi: &str, dst: &str) -> Result<u8> {
        let key = format!("{imsi}/{dst}");
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let last: Option<u32> = tx
            .query_row("SELECT refid FROM outgoing_ref WHERE key = ?", [&key], |row| {
                row.get(0)
            })
            .optional()?;

        let next = (last.unwrap_or(0) + 1) % 256;
        match last {
            Some(_) => {
                tx.execute(
                    "UPDATE outgoing_ref SET refid = ? WHERE key = ?",
                    params![next, key],
                )?;
            }
            None => {
                tx.execute(
                    "INSERT INTO outgoing_ref (refid, key) VALUES (?, ?)",
                    params![next, key],
                )?;
            }
        }

        tx.commit()?;
        Ok(next as u8)
    }

    /// Register an outbound message; returns its uid.
    pub fn outgoing_add(
        &self,
        imsi: &str,
        dst: &str,
        body: &str,
        parts: u8,
        ttl_seconds: u32,
        request_report: bool,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO outgoing_msg (dev, dst, message, cnt, expiration, srr)
             VALUES (?, ?, ?, ?, unixepoch('now') + ?, ?)",
            params![imsi, dst, body, parts, ttl_seconds, request_report],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn clear_locked(tx: &rusqlite::Transaction<'_>, uid: i64) -> Result<()> {
        tx.execute("DELETE FROM outgoing_msg WHERE uid = ?", [uid])?;
        tx.execute("DELETE FROM outgoing_part WHERE msg = ?", [uid])?;
        Ok(())
    }

    /// Drop an outbound message and its parts; returns the removed
    /// destination and body if the row existed.
    pub fn outgoing_clear(&self, uid: i64) -> Result<Option<(String, String)>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let row: Option<(String, String)> = tx
            .query_row(
                "SELECT dst, message FROM outgoing_msg WHERE uid = ?",
                [uid],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        if row.is_some() {
            Self::clear_locked(&tx, uid)?;
        }
        tx.commit()?;
        Ok(row)
    }

    /// Record the modem-assigned message reference of one sent part.
    ///
    /// A message that requested a status report is retained until the
    /// reports arrive; one that did not is cleared once every part has
    /// been handed to the network, and its `(dst, body)` is returned so
    /// the caller can log completion. `None` means "retain".
    pub fn outgoing_part_put(&self, uid: i64, mr: u8) -> Result<Option<(String, String)>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let Some((dev, dst, srr)) = tx
            .query_row(
                "SELECT dev, dst, srr FROM outgoing_msg WHERE uid = ?",
                [uid],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, bool>(2)?)),
            )
            .optional()?
        else {
            // Already cleared (or never registered); nothing to track.
            tx.commit()?;
            return Ok(None);
        };

        let key = format!("{dev}/{dst}/{mr}");
        if tx
            .execute(
                "INSERT INTO outgoing_part (key, msg, status) VALUES (?, ?, NULL)",
                params![key, uid],
            )
            .is_err()
        {
            warn!("smsdb: duplicate outgoing part key {key}");
        }

        if srr {
            tx.commit()?;
            return Ok(None);
        }

        let (cnt, inserted): (u32, u32) = tx.query_row(
            "SELECT m.cnt, (SELECT COUNT(p.rowid) FROM outgoing_part p WHERE p.msg = m.uid)
             FROM outgoing_msg m WHERE m.uid = ?",
            [uid],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        if inserted < cnt {
            tx.commit()?;
            return Ok(None);
        }

        let body: String = tx.query_row(
            "SELECT message FROM outgoing_msg WHERE uid = ?",
            [uid],
            |row| row.get(0),
        )?;
        Self::clear_locked(&tx, uid)?;
        tx.commit()?;
        Ok(Some((dst, body)))
    }

    /// Store the status byte delivered for `(imsi, dst, mr)`. When every
    /// part of the referenced message is final, the message is cleared and
    /// the ordered status vector returned; otherwise `None` (retain).
    pub fn outgoing_part_status(
        &self,
        imsi: &str,
        dst: &str,
        mr: u8,
        status: u8,
    ) -> Result<Option<ReportComplete>> {
        let key = format!("{imsi}/{dst}/{mr}");
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let Some((part_rowid, uid)) = tx
            .query_row(
                "SELECT rowid, msg FROM outgoing_part WHERE key = ?",
                [&key],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?
        else {
            debug!("smsdb: status for unknown part {key}");
            tx.commit()?;
            return Ok(None);
        };

        tx.execute(
            "UPDATE outgoing_part SET status = ? WHERE rowid = ?",
            params![status, part_rowid],
        )?;

        let (cnt, finalized): (u32, u32) = tx.query_row(
            "SELECT m.cnt, (SELECT COUNT(p.rowid) FROM outgoing_part p
                 WHERE p.msg = m.uid AND (p.status & 64 != 0 OR p.status & 32 = 0))
             FROM outgoing_msg m WHERE m.uid = ?",
            [uid],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        if finalized < cnt {
            tx.commit()?;
            return Ok(None);
        }

        let (dst, body): (String, String) = tx.query_row(
            "SELECT dst, message FROM outgoing_msg WHERE uid = ?",
            [uid],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let mut stmt =
            tx.prepare("SELECT status FROM outgoing_part WHERE msg = ? ORDER BY rowid")?;
        let statuses: Vec<u8> = stmt
            .query_map([uid], |row| row.get::<_, u8>(0))?
            .collect::<rusqlite::Result<_>>()?;
        drop(stmt);

        Self::clear_locked(&tx, uid)?;
        tx.commit()?;
        Ok(Some(ReportComplete {
            uid,
            dst,
            body,
            statuses,
        }))
    }

    /// Pop one expired outbound record, if any. Called periodically by the
    /// device supervisors.
    pub fn outgoing_purge_one(&self) -> Result<Option<ExpiredMessage>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let row: Option<ExpiredMessage> = tx
            .query_row(
                "SELECT uid, dst, message FROM outgoing_msg
                 WHERE expiration < unixepoch('now') LIMIT 1",
                [],
                |row| {
                    Ok(ExpiredMessage {
                        uid: row.get(0)?,
                        dst: row.get(1)?,
                        body: row.get(2)?,
                    })
                },
            )
            .optional()?;
        if let Some(expired) = &row {
            Self::clear_locked(&tx, expired.uid)?;
        }
        tx.commit()?;
        Ok(row)
    }

    /// Drop inbound parts whose reassembly window has passed.
    pub fn incoming_purge(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM incoming_msg WHERE expiration < unixepoch('now')",
            [],
        )?;
        if n > 0 {
            debug!("smsdb: dropped {n} stale inbound parts");
        }
        Ok(n)
    }
}

impl core::fmt::Debug for SmsDb {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SmsDb").field("csms_ttl", &self.csms_ttl).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> SmsDb {
        SmsDb::open(":memory:", 600).unwrap()
    }

    #[test]
    fn reassembly_out_of_order() {
        let db = db();
        let (count, body) = db.put_part("250991234", "+7913", 42, 3, 2, " world").unwrap();
        assert_eq!((count, body), (1, None));
        let (count, body) = db.put_part("250991234", "+7913", 42, 3, 3, "!").unwrap();
        assert_eq!((count, body), (2, None));
        let (count, body) = db.put_part("250991234", "+7913", 42, 3, 1, "Hello,").unwrap();
        assert_eq!(count, 3);
        assert_eq!(body.as_deref(), Some("Hello, world!"));

        // Consumed: the same key starts over.
        let (count, body) = db.put_part("250991234", "+7913", 42, 3, 1, "x").unwrap();
        assert_eq!((count, body), (1, None));
    }

    #[test]
    fn reassembly_keys_are_distinct() {
        let db = db();
        db.put_part("imsi", "+1", 7, 2, 1, "a").unwrap();
        let (count, body) = db.put_part("imsi", "+2", 7, 2, 2, "b").unwrap();
        assert_eq!((count, body), (1, None));
    }

    #[test]
    fn refid_rollover() {
        let db = db();
        let mut expected: Vec<u32> = (1..=255).collect();
        expected.push(0);
        expected.push(1);
        for want in expected {
            assert_eq!(db.get_refid("imsi", "+123").unwrap(), want as u8);
        }
        // Another destination has its own counter.
        assert_eq!(db.get_refid("imsi", "+456").unwrap(), 1);
    }

    #[test]
    fn part_put_without_report_clears_when_all_sent() {
        let db = db();
        let uid = db
            .outgoing_add("imsi", "+123", "body", 2, 600, false)
            .unwrap();
        assert!(uid >= 1);

        assert_eq!(db.outgoing_part_put(uid, 10).unwrap(), None);
        assert_eq!(
            db.outgoing_part_put(uid, 11).unwrap(),
            Some(("+123".to_string(), "body".to_string()))
        );
        // Cleared: later references are no-ops.
        assert_eq!(db.outgoing_part_put(uid, 12).unwrap(), None);
        assert_eq!(db.outgoing_clear(uid).unwrap(), None);
    }

    #[test]
    fn part_put_with_report_retains() {
        let db = db();
        let uid = db.outgoing_add("imsi", "+123", "body", 1, 600, true).unwrap();
        assert_eq!(db.outgoing_part_put(uid, 10).unwrap(), None);
        // Still present until the report arrives.
        assert!(db.outgoing_clear(uid).unwrap().is_some());
    }

    #[test]
    fn status_tracking_completes_in_order() {
        let db = db();
        let uid = db.outgoing_add("imsi", "+123", "body", 2, 600, true).unwrap();
        db.outgoing_part_put(uid, 10).unwrap();
        db.outgoing_part_put(uid, 11).unwrap();

        assert_eq!(db.outgoing_part_status("imsi", "+123", 10, 0).unwrap(), None);
        let done = db
            .outgoing_part_status("imsi", "+123", 11, 0x41)
            .unwrap()
            .unwrap();
        assert_eq!(done.uid, uid);
        assert_eq!(done.statuses, vec![0x00, 0x41]);
        assert!(done.statuses.iter().any(|s| s & 0x40 != 0));
    }

    #[test]
    fn pending_status_is_not_final() {
        let db = db();
        let uid = db.outgoing_add("imsi", "+1", "b", 1, 600, true).unwrap();
        db.outgoing_part_put(uid, 9).unwrap();
        // 0x20 without 0x40: still in transit.
        assert_eq!(db.outgoing_part_status("imsi", "+1", 9, 0x20).unwrap(), None);
        // Final success replaces it.
        assert!(db.outgoing_part_status("imsi", "+1", 9, 0x00).unwrap().is_some());
        assert!(!status_is_final(0x20));
        assert!(status_is_final(0x00));
        assert!(status_is_final(0x60));
    }

    #[test]
    fn purge_expired() {
        let db = db();
        let uid = db.outgoing_add("imsi", "+123", "old", 1, 0, true).unwrap();
        // expiration == now is not yet expired; push it into the past.
        db.conn
            .lock()
            .unwrap()
            .execute("UPDATE outgoing_msg SET expiration = expiration - 10", [])
            .unwrap();
        let expired = db.outgoing_purge_one().unwrap().unwrap();
        assert_eq!(expired.uid, uid);
        assert_eq!(expired.dst, "+123");
        assert_eq!(db.outgoing_purge_one().unwrap(), None);
    }

    #[test]
    fn incoming_purge_drops_stale_parts() {
        let db = db();
        db.put_part("imsi", "+1", 1, 2, 1, "a").unwrap();
        db.conn
            .lock()
            .unwrap()
            .execute("UPDATE incoming_msg SET expiration = expiration - 100000", [])
            .unwrap();
        assert_eq!(db.incoming_purge().unwrap(), 1);
    }
}
