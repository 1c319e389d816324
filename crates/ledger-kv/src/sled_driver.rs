//! A [`KvDriver`] backed by [`sled`], an embedded database suitable for local
//! development, demos, and integration tests; a networked, Merkle-verified
//! backend would implement the same trait against the real store.
//!
//! Layout, one named tree per entity:
//!   `data`    — key bytes            -> bincode([`StoredValue`])
//!   `history` -> key `<key>\0<tx be_u64>` -> bincode([`StoredValue`])
//!   `zsets`   -> key `<set>\0<seq be_u64>` -> the zset member's key bytes
//!   `meta`    -> `tx_counter` / `zseq:<set>` -> be_u64 counters
//!
//! This reference driver serializes every `exec` batch through a single
//! process-local mutex rather than sled's cross-tree transaction API, since
//! an `exec` batch touches a variable number of heterogeneous trees; it does
//! not attempt to guarantee atomicity across a process crash mid-batch. The
//! verifiable KV store this stands in for (§1, out of scope) is assumed to
//! provide genuine atomicity; this driver exists to exercise the engine
//! against something real, not to reproduce that guarantee.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use ledger_core::{CancellationToken, LedgerError};

use crate::{Entry, KvDriver, KvOp, Precondition};

#[derive(Clone, Serialize, Deserialize)]
enum StoredValue {
    Direct { tx: u64, value: Vec<u8> },
    Ref { tx: u64, referenced_key: String },
}

impl StoredValue {
    fn tx(&self) -> u64 {
        match self {
            StoredValue::Direct { tx, .. } => *tx,
            StoredValue::Ref { tx, .. } => *tx,
        }
    }
}

pub struct SledKvDriver {
    _db: sled::Db,
    data: sled::Tree,
    history: sled::Tree,
    zsets: sled::Tree,
    meta: sled::Tree,
    tx_counter: AtomicU64,
    commit_lock: Mutex<()>,
    reopen_lock: Mutex<()>,
}

fn storage_err(e: sled::Error) -> LedgerError {
    LedgerError::internal(format!("storage error: {e}"))
}

fn history_key(key: &str, tx: u64) -> Vec<u8> {
    let mut out = key.as_bytes().to_vec();
    out.push(0);
    out.extend_from_slice(&tx.to_be_bytes());
    out
}

fn zset_key(set: &str, seq: u64) -> Vec<u8> {
    let mut out = set.as_bytes().to_vec();
    out.push(0);
    out.extend_from_slice(&seq.to_be_bytes());
    out
}

impl SledKvDriver {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        let db = sled::open(path).map_err(storage_err)?;
        let data = db.open_tree("data").map_err(storage_err)?;
        let history = db.open_tree("history").map_err(storage_err)?;
        let zsets = db.open_tree("zsets").map_err(storage_err)?;
        let meta = db.open_tree("meta").map_err(storage_err)?;

        let tx_counter = match meta.get("tx_counter").map_err(storage_err)? {
            Some(bytes) => u64::from_be_bytes(bytes.as_ref().try_into().map_err(|_| {
                LedgerError::internal("corrupt tx_counter in meta tree")
            })?),
            None => 0,
        };

        Ok(Self {
            _db: db,
            data,
            history,
            zsets,
            meta,
            tx_counter: AtomicU64::new(tx_counter),
            commit_lock: Mutex::new(()),
            reopen_lock: Mutex::new(()),
        })
    }

    /// Open a throwaway database in a fresh temp directory, for tests.
    #[cfg(test)]
    pub fn open_temp() -> (Self, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let driver = Self::open(dir.path()).expect("open sled driver");
        (driver, dir)
    }

    fn resolve(&self, key: &str, stored: StoredValue) -> Result<Entry, LedgerError> {
        match stored {
            StoredValue::Direct { tx, value } => Ok(Entry {
                key: key.to_string(),
                value,
                tx,
                referenced_key: None,
                seq: None,
            }),
            StoredValue::Ref { tx: _, referenced_key } => {
                let target_bytes = self
                    .data
                    .get(referenced_key.as_bytes())
                    .map_err(storage_err)?
                    .ok_or_else(|| {
                        LedgerError::internal(format!(
                            "dangling reference: {key} -> {referenced_key}"
                        ))
                    })?;
                let target: StoredValue = bincode::deserialize(&target_bytes)
                    .map_err(|e| LedgerError::internal(format!("corrupt entry: {e}")))?;
                let target_tx = target.tx();
                let value = match target {
                    StoredValue::Direct { value, .. } => value,
                    StoredValue::Ref { .. } => {
                        return Err(LedgerError::internal(format!(
                            "reference chains more than one level deep: {key} -> {referenced_key}"
                        )))
                    }
                };
                Ok(Entry {
                    key: key.to_string(),
                    value,
                    tx: target_tx,
                    referenced_key: Some(referenced_key),
                    seq: None,
                })
            }
        }
    }

    fn precondition_ok(&self, p: &Precondition) -> Result<bool, LedgerError> {
        Ok(match p {
            Precondition::KeyMustExist(key) => {
                self.data.contains_key(key.as_bytes()).map_err(storage_err)?
            }
            Precondition::KeyMustNotExist(key) => {
                !self.data.contains_key(key.as_bytes()).map_err(storage_err)?
            }
            Precondition::KeyNotModifiedAfterTx { key, tx } => {
                match self.data.get(key.as_bytes()).map_err(storage_err)? {
                    None => true,
                    Some(bytes) => {
                        let stored: StoredValue = bincode::deserialize(&bytes)
                            .map_err(|e| LedgerError::internal(format!("corrupt entry: {e}")))?;
                        stored.tx() <= *tx
                    }
                }
            }
        })
    }

    fn next_zset_seq(&self, set: &str) -> Result<u64, LedgerError> {
        let meta_key = format!("zseq:{set}");
        let next = self
            .meta
            .update_and_fetch(meta_key.as_bytes(), |old| {
                let n = old
                    .map(|b| u64::from_be_bytes(b.try_into().unwrap_or([0; 8])))
                    .unwrap_or(0)
                    + 1;
                Some(n.to_be_bytes().to_vec())
            })
            .map_err(storage_err)?
            .expect("update_and_fetch always returns Some for a Some-returning closure");
        Ok(u64::from_be_bytes(next.as_ref().try_into().unwrap()))
    }
}

impl KvDriver for SledKvDriver {
    fn get(&self, key: &str, _verified: bool, token: &CancellationToken) -> Result<Option<Entry>, LedgerError> {
        token.check()?;
        match self.data.get(key.as_bytes()).map_err(storage_err)? {
            None => Ok(None),
            Some(bytes) => {
                let stored: StoredValue = bincode::deserialize(&bytes)
                    .map_err(|e| LedgerError::internal(format!("corrupt entry: {e}")))?;
                self.resolve(key, stored).map(Some)
            }
        }
    }

    fn get_at(
        &self,
        key: &str,
        tx: u64,
        _verified: bool,
        token: &CancellationToken,
    ) -> Result<Option<Entry>, LedgerError> {
        token.check()?;
        match self.history.get(history_key(key, tx)).map_err(storage_err)? {
            None => Ok(None),
            Some(bytes) => {
                let stored: StoredValue = bincode::deserialize(&bytes)
                    .map_err(|e| LedgerError::internal(format!("corrupt history entry: {e}")))?;
                self.resolve(key, stored).map(Some)
            }
        }
    }

    fn set(&self, key: &str, value: Vec<u8>, token: &CancellationToken) -> Result<u64, LedgerError> {
        self.exec(
            vec![KvOp::Set {
                key: key.to_string(),
                value,
            }],
            vec![],
            token,
        )
    }

    fn exec(
        &self,
        ops: Vec<KvOp>,
        preconditions: Vec<Precondition>,
        token: &CancellationToken,
    ) -> Result<u64, LedgerError> {
        token.check()?;
        let _guard = self
            .commit_lock
            .lock()
            .map_err(|_| LedgerError::internal("commit lock poisoned"))?;

        for p in &preconditions {
            if !self.precondition_ok(p)? {
                return Err(LedgerError::internal(format!(
                    "precondition failed: {p:?}"
                )));
            }
        }

        let tx = self.tx_counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.meta
            .insert("tx_counter", &tx.to_be_bytes())
            .map_err(storage_err)?;

        for op in ops {
            match op {
                KvOp::Set { key, value } => {
                    let stored = StoredValue::Direct { tx, value };
                    let bytes = bincode::serialize(&stored)
                        .map_err(|e| LedgerError::internal(format!("encode error: {e}")))?;
                    self.data.insert(key.as_bytes(), bytes.clone()).map_err(storage_err)?;
                    self.history
                        .insert(history_key(&key, tx), bytes)
                        .map_err(storage_err)?;
                }
                KvOp::Ref { key, referenced_key } => {
                    let stored = StoredValue::Ref {
                        tx,
                        referenced_key: referenced_key.clone(),
                    };
                    let bytes = bincode::serialize(&stored)
                        .map_err(|e| LedgerError::internal(format!("encode error: {e}")))?;
                    self.data.insert(key.as_bytes(), bytes.clone()).map_err(storage_err)?;
                    self.history
                        .insert(history_key(&key, tx), bytes)
                        .map_err(storage_err)?;
                }
                KvOp::ZAdd { set, key } => {
                    let seq = self.next_zset_seq(&set)?;
                    self.zsets
                        .insert(zset_key(&set, seq), key.as_bytes())
                        .map_err(storage_err)?;
                }
            }
        }

        self._db.flush().map_err(storage_err)?;
        Ok(tx)
    }

    fn history(&self, key: &str, _page_size: u32, token: &CancellationToken) -> Result<Vec<Entry>, LedgerError> {
        token.check()?;
        // The real driver pages internally per `_page_size`; this embedded
        // reference driver has no network round-trips to amortize, so it
        // walks the whole trail in one pass and returns it oldest-first.
        let prefix = {
            let mut p = key.as_bytes().to_vec();
            p.push(0);
            p
        };
        let mut out = Vec::new();
        for item in self.history.scan_prefix(&prefix) {
            let (_, bytes) = item.map_err(storage_err)?;
            let stored: StoredValue = bincode::deserialize(&bytes)
                .map_err(|e| LedgerError::internal(format!("corrupt history entry: {e}")))?;
            out.push(self.resolve(key, stored)?);
        }
        Ok(out)
    }

    fn scan_prefix(
        &self,
        prefix: &str,
        page_size: u32,
        seek: Option<&str>,
        token: &CancellationToken,
    ) -> Result<Vec<Entry>, LedgerError> {
        token.check()?;
        let mut out = Vec::new();
        for item in self.data.scan_prefix(prefix.as_bytes()) {
            let (key_bytes, value_bytes) = item.map_err(storage_err)?;
            let key = String::from_utf8_lossy(&key_bytes).into_owned();
            if let Some(seek) = seek {
                if key.as_str() <= seek {
                    continue;
                }
            }
            let stored: StoredValue = bincode::deserialize(&value_bytes)
                .map_err(|e| LedgerError::internal(format!("corrupt entry: {e}")))?;
            out.push(self.resolve(&key, stored)?);
            if out.len() as u32 >= page_size {
                break;
            }
        }
        Ok(out)
    }

    fn scan_sorted_set(
        &self,
        set: &str,
        page_size: u32,
        seek: Option<u64>,
        token: &CancellationToken,
    ) -> Result<Vec<Entry>, LedgerError> {
        token.check()?;
        let prefix = {
            let mut p = set.as_bytes().to_vec();
            p.push(0);
            p
        };
        let mut out = Vec::new();
        for item in self.zsets.scan_prefix(&prefix) {
            let (member_key, target_key_bytes) = item.map_err(storage_err)?;
            let seq = u64::from_be_bytes(
                member_key[member_key.len() - 8..]
                    .try_into()
                    .map_err(|_| LedgerError::internal("corrupt zset key"))?,
            );
            if let Some(seek) = seek {
                if seq <= seek {
                    continue;
                }
            }
            let target_key = String::from_utf8_lossy(&target_key_bytes).into_owned();
            if let Some(entry) = self.get(&target_key, false, token)? {
                out.push(Entry {
                    key: target_key,
                    seq: Some(seq),
                    ..entry
                });
            }
            if out.len() as u32 >= page_size {
                break;
            }
        }
        Ok(out)
    }

    fn current_state(&self, token: &CancellationToken) -> Result<u64, LedgerError> {
        token.check()?;
        Ok(self.tx_counter.load(Ordering::SeqCst))
    }

    fn health(&self, token: &CancellationToken) -> Result<bool, LedgerError> {
        token.check()?;
        // A simple round-trip against the meta tree stands in for the real
        // driver's server health probe.
        self.meta.get("tx_counter").map_err(storage_err)?;
        Ok(true)
    }

    fn reopen_session(&self) -> Result<(), LedgerError> {
        tracing::debug!("sled driver has no remote session to reopen");
        Ok(())
    }

    fn session_reopen_lock(&self) -> &Mutex<()> {
        &self.reopen_lock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    #[test]
    fn set_then_get_round_trips() {
        let (driver, _dir) = SledKvDriver::open_temp();
        let t = token();
        let tx = driver.set("ID:abc", b"hello".to_vec(), &t).unwrap();
        let entry = driver.get("ID:abc", false, &t).unwrap().unwrap();
        assert_eq!(entry.value, b"hello");
        assert_eq!(entry.tx, tx);
    }

    #[test]
    fn verified_flag_is_accepted_as_a_no_op() {
        let (driver, _dir) = SledKvDriver::open_temp();
        let t = token();
        driver.set("ID:abc", b"hello".to_vec(), &t).unwrap();
        let unverified = driver.get("ID:abc", false, &t).unwrap().unwrap();
        let verified = driver.get("ID:abc", true, &t).unwrap().unwrap();
        assert_eq!(unverified.value, verified.value);
    }

    #[test]
    fn ref_dereferences_to_primary() {
        let (driver, _dir) = SledKvDriver::open_temp();
        let t = token();
        driver.set("ID:abc", b"payload".to_vec(), &t).unwrap();
        driver
            .exec(
                vec![KvOp::Ref {
                    key: "TX:alice:XRP:acct:abc".to_string(),
                    referenced_key: "ID:abc".to_string(),
                }],
                vec![],
                &t,
            )
            .unwrap();
        let entry = driver.get("TX:alice:XRP:acct:abc", false, &t).unwrap().unwrap();
        assert_eq!(entry.value, b"payload");
        assert_eq!(entry.referenced_key.as_deref(), Some("ID:abc"));
    }

    #[test]
    fn precondition_key_must_not_exist_blocks_overwrite() {
        let (driver, _dir) = SledKvDriver::open_temp();
        let t = token();
        driver.set("ID:abc", b"v1".to_vec(), &t).unwrap();
        let err = driver
            .exec(
                vec![KvOp::Set {
                    key: "ID:abc".to_string(),
                    value: b"v2".to_vec(),
                }],
                vec![Precondition::KeyMustNotExist("ID:abc".to_string())],
                &t,
            )
            .unwrap_err();
        assert_eq!(err.status_code(), 500);
        assert_eq!(driver.get("ID:abc", false, &t).unwrap().unwrap().value, b"v1");
    }

    #[test]
    fn history_keeps_every_version() {
        let (driver, _dir) = SledKvDriver::open_temp();
        let t = token();
        driver.set("ID:abc", b"v1".to_vec(), &t).unwrap();
        driver.set("ID:abc", b"v2".to_vec(), &t).unwrap();
        let versions = driver.history("ID:abc", 25, &t).unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].value, b"v1");
        assert_eq!(versions[1].value, b"v2");
    }

    #[test]
    fn sorted_set_scan_preserves_insertion_order() {
        let (driver, _dir) = SledKvDriver::open_temp();
        let t = token();
        driver.set("ID:a", b"first".to_vec(), &t).unwrap();
        driver.set("ID:b", b"second".to_vec(), &t).unwrap();
        driver
            .exec(
                vec![
                    KvOp::ZAdd {
                        set: "TX:alice:XRP:acct".to_string(),
                        key: "ID:a".to_string(),
                    },
                    KvOp::ZAdd {
                        set: "TX:alice:XRP:acct".to_string(),
                        key: "ID:b".to_string(),
                    },
                ],
                vec![],
                &t,
            )
            .unwrap();
        let page = driver.scan_sorted_set("TX:alice:XRP:acct", 25, None, &t).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].value, b"first");
        assert_eq!(page[1].value, b"second");
    }

    #[test]
    fn cancelled_token_short_circuits_before_any_storage_access() {
        let (driver, _dir) = SledKvDriver::open_temp();
        let t = token();
        t.cancel();
        let err = driver.get("ID:abc", false, &t).unwrap_err();
        assert!(matches!(err, LedgerError::Cancelled));
        let err = driver.exec(vec![], vec![], &t).unwrap_err();
        assert!(matches!(err, LedgerError::Cancelled));
    }
}
