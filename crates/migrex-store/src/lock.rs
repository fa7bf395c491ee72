//! Lease-based run lock
//!
//! A single-row table guards against concurrent runs. Acquisition happens
//! inside an IMMEDIATE transaction so that two processes can never both
//! observe the row as free. A holder owns the lock until `expires_at`; after
//! that any contender may reclaim it. A run renews before every unit and
//! keeps a `LeaseHeartbeat` renewing from a second connection while a unit
//! executes.

use crate::db::{self, table_exists};
use crate::errors::{
    contended, corrupt_row, from_rusqlite, io_error, is_busy, persistence, Result,
};
use crate::tables::TableNames;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use migrex_core::errors::{ExError, ExErrorKind, MigrexError};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Default lease length
pub const DEFAULT_LEASE: Duration = Duration::from_secs(300);

/// Default delay between acquisition attempts
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(10);

/// Snapshot of the lock row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockInfo {
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Proof of ownership returned by `acquire`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    holder: String,
    acquired_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl LockToken {
    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

/// Run lock table accessor
#[derive(Debug, Clone)]
pub struct RunLock {
    table: String,
    lease: Duration,
    poll_interval: Duration,
}

impl RunLock {
    pub fn new(tables: &TableNames, lease: Duration) -> Self {
        Self {
            table: tables.lock().to_string(),
            lease,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    /// Ensure the lock table exists
    pub fn initialize(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                holder TEXT NOT NULL,
                acquired_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            )",
            self.table
        ))
        .map_err(|e| contended("lock_initialize", e))
    }

    /// Acquire the lock for `holder`, polling until `timeout` elapses
    ///
    /// An expired lease is reclaimed. A `timeout` of zero makes exactly one
    /// attempt. While acquiring, the connection's busy timeout is capped at
    /// `timeout` and restored to `db::DEFAULT_BUSY_TIMEOUT` afterwards.
    ///
    /// # Errors
    ///
    /// `ExErrorKind::LockHeld` with the current holder if the lock is still
    /// owned by someone else when the timeout elapses.
    pub fn acquire(
        &self,
        conn: &mut Connection,
        holder: &str,
        timeout: Duration,
    ) -> Result<LockToken> {
        db::with_busy_timeout(conn, timeout, |conn| self.poll(conn, holder, timeout))
    }

    fn poll(&self, conn: &mut Connection, holder: &str, timeout: Duration) -> Result<LockToken> {
        let started = Instant::now();

        loop {
            let last_seen = match self.try_acquire(conn, holder)? {
                Attempt::Acquired(token) => return Ok(token),
                Attempt::Held(info) => Some(info),
                Attempt::Busy => None,
            };

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                let (holder, expires_at) = match last_seen {
                    Some(info) => (info.holder, info.expires_at.to_rfc3339()),
                    None => ("unknown".to_string(), "unknown".to_string()),
                };
                return Err(ExError::from(MigrexError::LockHeld { holder, expires_at })
                    .with_op("lock_acquire"));
            }

            std::thread::sleep(self.poll_interval.min(timeout - elapsed));
        }
    }

    fn try_acquire(&self, conn: &mut Connection, holder: &str) -> Result<Attempt> {
        let tx = match conn.transaction_with_behavior(TransactionBehavior::Immediate) {
            Ok(tx) => tx,
            Err(e) if is_busy(&e) => return Ok(Attempt::Busy),
            Err(e) => return Err(persistence("lock_acquire", e)),
        };

        let now = Utc::now();
        if let Some(current) = read_row(&tx, &self.table)? {
            if !current.is_expired_at(now) {
                return Ok(Attempt::Held(current));
            }
            tracing::warn!(
                holder = %holder,
                stale_holder = %current.holder,
                expired_at = %current.expires_at.to_rfc3339(),
                "Reclaiming expired run lock"
            );
        }

        let expires_at = now + self.lease_delta();
        tx.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (id, holder, acquired_at, expires_at)
                 VALUES (1, ?1, ?2, ?3)",
                self.table
            ),
            params![holder, now.timestamp_millis(), expires_at.timestamp_millis()],
        )
        .map_err(|e| persistence("lock_acquire", e))?;

        match tx.commit() {
            Ok(()) => {}
            Err(e) if is_busy(&e) => return Ok(Attempt::Busy),
            Err(e) => return Err(persistence("lock_acquire", e)),
        }

        tracing::debug!(holder = %holder, expires_at = %expires_at.to_rfc3339(), "Acquired run lock");

        Ok(Attempt::Acquired(LockToken {
            holder: holder.to_string(),
            acquired_at: now,
            expires_at,
        }))
    }

    /// Extend the lease of a held lock
    ///
    /// # Errors
    ///
    /// `ExErrorKind::LockLost` if the row no longer names this holder.
    pub fn renew(&self, conn: &Connection, token: &mut LockToken) -> Result<()> {
        let expires_at = Utc::now() + self.lease_delta();
        let updated = conn
            .execute(
                &format!(
                    "UPDATE {} SET expires_at = ?1 WHERE id = 1 AND holder = ?2",
                    self.table
                ),
                params![expires_at.timestamp_millis(), token.holder],
            )
            .map_err(|e| persistence("lock_renew", e))?;

        if updated == 0 {
            return Err(ExError::from(MigrexError::LockLost {
                holder: token.holder.clone(),
            })
            .with_op("lock_renew"));
        }

        token.expires_at = expires_at;
        Ok(())
    }

    /// Keep renewing `token` from a dedicated connection to `path`
    ///
    /// Renews every third of the lease until the returned guard is stopped
    /// or dropped. A renewal that finds the row taken ends the heartbeat; the
    /// run notices on its own next `renew`.
    ///
    /// # Errors
    ///
    /// Fails if the connection cannot be opened or the thread not spawned.
    pub fn start_heartbeat(&self, path: &str, token: &LockToken) -> Result<LeaseHeartbeat> {
        let interval = (self.lease / 3).max(MIN_HEARTBEAT_INTERVAL);
        let conn = db::open_existing(path)?;
        conn.busy_timeout(interval).map_err(from_rusqlite)?;

        let lock = self.clone();
        let mut token = token.clone();
        let (stop, stopped) = mpsc::channel::<()>();
        let handle = std::thread::Builder::new()
            .name("migrex-lease".to_string())
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
                match lock.renew(&conn, &mut token) {
                    Ok(()) => tracing::trace!(holder = %token.holder, "Renewed run lock lease"),
                    Err(err) if err.kind() == ExErrorKind::LockLost => {
                        tracing::warn!(holder = %token.holder, "Run lock lease lost during unit");
                        break;
                    }
                    // A unit holding the write lock keeps contenders out too
                    Err(err) => tracing::debug!(
                        holder = %token.holder,
                        error = %err,
                        "Lease renewal deferred"
                    ),
                }
            })
            .map_err(|e| io_error("lock_heartbeat", e))?;

        Ok(LeaseHeartbeat {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    /// Release a held lock
    ///
    /// Returns `false` when the row no longer names this holder, which means
    /// the lease expired and was reclaimed by someone else.
    pub fn release(&self, conn: &Connection, token: &LockToken) -> Result<bool> {
        let deleted = conn
            .execute(
                &format!("DELETE FROM {} WHERE id = 1 AND holder = ?1", self.table),
                [&token.holder],
            )
            .map_err(|e| persistence("lock_release", e))?;
        Ok(deleted == 1)
    }

    /// Current lock row, if any; `None` when the table does not exist yet
    pub fn current(&self, conn: &Connection) -> Result<Option<LockInfo>> {
        if !table_exists(conn, &self.table)? {
            return Ok(None);
        }
        read_row(conn, &self.table)
    }

    /// Remove the lock regardless of holder, returning what was removed
    ///
    /// Operator escape hatch for a crashed run whose lease has not expired.
    pub fn force_release(&self, conn: &Connection) -> Result<Option<LockInfo>> {
        let previous = self.current(conn)?;
        if previous.is_some() {
            conn.execute(&format!("DELETE FROM {} WHERE id = 1", self.table), [])
                .map_err(|e| persistence("lock_force_release", e))?;
        }
        Ok(previous)
    }

    fn lease_delta(&self) -> ChronoDuration {
        ChronoDuration::from_std(self.lease).unwrap_or_else(|_| ChronoDuration::days(3650))
    }
}

/// Background lease renewal, stopped on drop
#[derive(Debug)]
pub struct LeaseHeartbeat {
    stop: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl LeaseHeartbeat {
    /// Stop renewing and wait for the thread to exit
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("Lease heartbeat thread panicked");
            }
        }
    }
}

impl Drop for LeaseHeartbeat {
    fn drop(&mut self) {
        self.shutdown();
    }
}

enum Attempt {
    Acquired(LockToken),
    Held(LockInfo),
    Busy,
}

fn read_row(conn: &Connection, table: &str) -> Result<Option<LockInfo>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT holder, acquired_at, expires_at FROM {} WHERE id = 1",
                table
            ),
            [],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )
        .optional()
        .map_err(|e| persistence("lock_read", e))?;

    row.map(|(holder, acquired_at, expires_at)| {
        Ok(LockInfo {
            holder,
            acquired_at: millis(table, acquired_at)?,
            expires_at: millis(table, expires_at)?,
        })
    })
    .transpose()
}

fn millis(table: &str, ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| corrupt_row(table, &format!("timestamp {} out of range", ms)))
}
