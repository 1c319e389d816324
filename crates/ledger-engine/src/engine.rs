use std::sync::Arc;

use ledger_codec::Format;
use ledger_core::{CancellationToken, LedgerConfig, LedgerError, ValueFormat};
use ledger_kv::{with_session_retry, KvDriver};
use ledger_metrics::MetricsSink;

/// The ledger engine: posting lifecycle, account derivation, balance
/// enforcement, and the status/cancel state machine (spec C5), plus the
/// aggregation protocols over the secondary indexes (spec C6).
///
/// Owns no mutable state beyond what the KV driver and metrics sink already
/// own; every public operation may be called concurrently from many callers
/// (spec §5).
pub struct LedgerEngine {
    pub(crate) driver: Arc<dyn KvDriver>,
    pub(crate) config: LedgerConfig,
    pub(crate) metrics: Arc<dyn MetricsSink>,
}

impl LedgerEngine {
    /// Construct a new engine over `driver`. Validates `config`'s invariants
    /// (§6) at construction time rather than panicking, so the embedding
    /// application's own config loader (out of scope here) can surface the
    /// failure however it sees fit.
    pub fn new(
        driver: Arc<dyn KvDriver>,
        config: LedgerConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, LedgerError> {
        config.validate()?;
        Ok(Self {
            driver,
            config,
            metrics,
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub(crate) fn format(&self) -> Format {
        match self.config.value_format {
            ValueFormat::Json => Format::Json,
            ValueFormat::Binary => Format::Binary,
        }
    }

    /// Health probe, delegated to the KV driver through the same
    /// session-retry combinator every other driver call goes through
    /// (spec §4.7).
    pub fn health(&self, token: &CancellationToken) -> Result<bool, LedgerError> {
        with_session_retry(self.driver.as_ref(), token, || self.driver.health(token))
    }
}
