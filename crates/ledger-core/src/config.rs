use std::collections::HashMap;

use crate::error::LedgerError;
use crate::types::CREATED_STATUS;

/// Which payload encoding new postings are written with. Existing postings
/// encoded with the other format are still readable regardless of this
/// setting (the codec dispatches on the stored format tag).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueFormat {
    Json,
    Binary,
}

/// Constructor-injected configuration consumed by the engine and its
/// aggregation protocols. Loading this from environment variables, files, or
/// a CLI is a concern of the embedding application, not this crate.
#[derive(Clone, Debug)]
pub struct LedgerConfig {
    /// symbol -> display name.
    pub supported_assets: HashMap<String, String>,
    /// status name -> integer value. Must contain `Created` bound to `0`,
    /// plus `Canceled` and `Finished`.
    pub supported_statuses: HashMap<String, i32>,
    /// Allow `Remove` postings to drive a balance negative.
    pub overdraw: bool,
    /// Allow more than one account per `(holder, asset)` pair.
    pub multi_account: bool,
    /// When set, all write operations are rejected and `AssetBalance` is
    /// permitted (it is otherwise an expensive full-scan operation reserved
    /// for read-only deployments).
    pub read_only: bool,
    pub value_format: ValueFormat,
    /// Page size for prefix/history scans. Must be positive.
    pub page_size: u32,
    /// Whether reads should go through the KV driver's Merkle-verified path
    /// when one is available.
    pub verified: bool,
}

impl LedgerConfig {
    /// Validate the invariants startup must enforce: `Created` is present and
    /// bound to `0`; `Canceled` and `Finished` are present; `Canceled` sorts
    /// strictly below `Created` so a default `min_status = Created` balance
    /// query never folds canceled postings back into the sum (open question
    /// 3, see DESIGN.md); `page_size` is positive.
    pub fn validate(&self) -> Result<(), LedgerError> {
        let created = self
            .supported_statuses
            .get("Created")
            .ok_or_else(|| LedgerError::internal("supported_statuses must define \"Created\""))?;
        if *created != CREATED_STATUS {
            return Err(LedgerError::internal(format!(
                "\"Created\" must map to {CREATED_STATUS}, got {created}"
            )));
        }
        if !self.supported_statuses.contains_key("Canceled") {
            return Err(LedgerError::internal(
                "supported_statuses must define \"Canceled\"",
            ));
        }
        if !self.supported_statuses.contains_key("Finished") {
            return Err(LedgerError::internal(
                "supported_statuses must define \"Finished\"",
            ));
        }
        let canceled = self.supported_statuses["Canceled"];
        if canceled >= CREATED_STATUS {
            return Err(LedgerError::internal(format!(
                "\"Canceled\" ({canceled}) must sort strictly below \"Created\" ({CREATED_STATUS}) \
                 so a default balance query does not double-count canceled postings"
            )));
        }
        if self.page_size == 0 {
            return Err(LedgerError::internal("page_size must be positive"));
        }
        Ok(())
    }

    pub fn is_asset_supported(&self, asset: &str) -> bool {
        self.supported_assets.contains_key(asset)
    }

    pub fn status_value(&self, name: &str) -> Option<i32> {
        self.supported_statuses.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> LedgerConfig {
        let mut supported_statuses = HashMap::new();
        supported_statuses.insert("Created".to_string(), 0);
        supported_statuses.insert("Canceled".to_string(), -1);
        supported_statuses.insert("Finished".to_string(), 1);
        LedgerConfig {
            supported_assets: HashMap::new(),
            supported_statuses,
            overdraw: false,
            multi_account: false,
            read_only: false,
            value_format: ValueFormat::Json,
            page_size: 25,
            verified: false,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn canceled_must_sort_below_created() {
        let mut cfg = base_config();
        cfg.supported_statuses.insert("Canceled".to_string(), 0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn missing_finished_rejected() {
        let mut cfg = base_config();
        cfg.supported_statuses.remove("Finished");
        assert!(cfg.validate().is_err());
    }
}
