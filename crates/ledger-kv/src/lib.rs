//! Thin, retry-capable facade over a verifiable key-value store (spec §4.7).
//!
//! [`KvDriver`] is the trait the ledger engine is written against. This crate
//! ships one concrete implementation, [`sled_driver::SledKvDriver`], suitable
//! for local development, demos, and integration tests; a networked,
//! Merkle-verified backend would implement the same trait.

pub mod sled_driver;

use std::sync::Mutex;

use ledger_core::{CancellationToken, LedgerError};

/// A mutating operation inside an [`KvDriver::exec`] batch.
#[derive(Clone, Debug)]
pub enum KvOp {
    /// Write `value` at `key`, becoming the key's current (and latest
    /// history) value.
    Set { key: String, value: Vec<u8> },
    /// Write a reference-style pointer at `key` that transparently
    /// dereferences to `referenced_key`'s primary value on read.
    Ref {
        key: String,
        referenced_key: String,
    },
    /// Append `key` to the ordered sorted-set index named `set`.
    ZAdd { set: String, key: String },
}

/// A precondition checked before a batch is committed; the whole batch is
/// rejected if any precondition fails.
#[derive(Clone, Debug)]
pub enum Precondition {
    KeyMustExist(String),
    KeyMustNotExist(String),
    KeyNotModifiedAfterTx { key: String, tx: u64 },
}

/// A value read back from the store, with its commit provenance.
#[derive(Clone, Debug)]
pub struct Entry {
    /// The key this entry was read from (for a scan, the key actually
    /// iterated — which may be a secondary index key).
    pub key: String,
    /// The dereferenced payload: a reference-style entry's placeholder is
    /// always resolved to its primary value before being returned here.
    pub value: Vec<u8>,
    /// Transaction id of the primary value as currently stored.
    pub tx: u64,
    /// Set when this entry was reached by dereferencing a secondary index
    /// pointer; names the primary key that was resolved to.
    pub referenced_key: Option<String>,
    /// Set when this entry was reached via [`KvDriver::scan_sorted_set`];
    /// the member's insertion sequence number, for resuming a paged scan via
    /// the `seek` parameter of the next page.
    pub seq: Option<u64>,
}

pub trait KvDriver: Send + Sync {
    /// `verified` requests the Merkle-verified read path on a driver that has
    /// one (spec §4.7/§9 open question 4); the embedded reference driver has
    /// no proof structure to verify against, so it accepts the flag purely
    /// for trait-shape parity and treats it as a no-op.
    fn get(&self, key: &str, verified: bool, token: &CancellationToken) -> Result<Option<Entry>, LedgerError>;
    fn get_at(
        &self,
        key: &str,
        tx: u64,
        verified: bool,
        token: &CancellationToken,
    ) -> Result<Option<Entry>, LedgerError>;
    fn set(&self, key: &str, value: Vec<u8>, token: &CancellationToken) -> Result<u64, LedgerError>;

    /// Commit `ops` atomically after checking `preconditions`; returns the
    /// assigned transaction id.
    fn exec(
        &self,
        ops: Vec<KvOp>,
        preconditions: Vec<Precondition>,
        token: &CancellationToken,
    ) -> Result<u64, LedgerError>;

    /// Full version history of `key`, oldest first.
    fn history(&self, key: &str, page_size: u32, token: &CancellationToken) -> Result<Vec<Entry>, LedgerError>;

    /// One page of a prefix scan, ordered by key. `seek`, when given, is the
    /// last key returned by the previous page (exclusive).
    fn scan_prefix(
        &self,
        prefix: &str,
        page_size: u32,
        seek: Option<&str>,
        token: &CancellationToken,
    ) -> Result<Vec<Entry>, LedgerError>;

    /// One page of a sorted-set scan, in insertion order. `seek`, when
    /// given, is the insertion sequence number of the last entry returned.
    fn scan_sorted_set(
        &self,
        set: &str,
        page_size: u32,
        seek: Option<u64>,
        token: &CancellationToken,
    ) -> Result<Vec<Entry>, LedgerError>;

    /// Last committed transaction id.
    fn current_state(&self, token: &CancellationToken) -> Result<u64, LedgerError>;

    fn health(&self, token: &CancellationToken) -> Result<bool, LedgerError>;

    /// Close and reopen the session using stored credentials.
    fn reopen_session(&self) -> Result<(), LedgerError>;

    /// Whether `err` is the driver's permission-denied signal (session
    /// expired). The embedded reference driver has no remote session, so it
    /// never reports one.
    fn is_permission_denied(&self, _err: &LedgerError) -> bool {
        false
    }

    /// Shared lock guarding reopen-in-flight coordination; see
    /// [`with_session_retry`].
    fn session_reopen_lock(&self) -> &Mutex<()>;
}

/// Wrapper combinator implementing spec §4.7/§9's session retry policy:
/// transparent to the caller, at most one reopen per call, and — across
/// concurrently failing callers — at most one reopen in flight at a time.
///
/// If `op` fails with a permission-denied error, this tries to acquire the
/// driver's reopen lock. The caller that acquires it performs the reopen;
/// any caller that finds the lock already held waits for it to be released
/// (meaning another caller's reopen has completed) and simply retries `op`
/// without reopening itself.
///
/// `token` is checked before the initial attempt and again before any retry,
/// so an abort terminates the retry loop rather than pushing it through
/// (spec §5): a cancellation discovered at either point short-circuits with
/// [`LedgerError::Cancelled`] instead of calling `op` again.
pub fn with_session_retry<D, T>(
    driver: &D,
    token: &CancellationToken,
    mut op: impl FnMut() -> Result<T, LedgerError>,
) -> Result<T, LedgerError>
where
    D: KvDriver + ?Sized,
{
    token.check()?;
    match op() {
        Err(e) if driver.is_permission_denied(&e) => {
            token.check()?;
            match driver.session_reopen_lock().try_lock() {
                Ok(_guard) => driver.reopen_session()?,
                Err(_) => {
                    let _guard = driver
                        .session_reopen_lock()
                        .lock()
                        .map_err(|_| LedgerError::internal("session reopen lock poisoned"))?;
                }
            }
            token.check()?;
            op()
        }
        other => other,
    }
}
