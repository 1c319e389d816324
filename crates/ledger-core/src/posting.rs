use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::account::Account;
use crate::types::{Asset, PostingId, Status};

/// The atomic record written by the ledger engine.
///
/// `tx` and `key` are populated only after a read from the KV store; they are
/// never part of the encoded payload (see `ledger-codec`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub id: PostingId,
    pub account: Account,
    pub holder: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<String>,
    pub asset: Asset,
    pub amount: Decimal,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Transaction id assigned by the KV store to the currently loaded value.
    /// Not part of the encoded payload; populated on read only.
    #[serde(skip, default)]
    pub tx: u64,
    /// KV key this value was loaded from. Not part of the encoded payload;
    /// populated on read only.
    #[serde(skip, default)]
    pub key: String,
}

impl Posting {
    /// A fresh copy suitable for reserialization, clearing the read-only
    /// `tx`/`key` provenance fields.
    pub fn copy_for_write(&self) -> Posting {
        let mut copy = self.clone();
        copy.tx = 0;
        copy.key = String::new();
        copy
    }

    pub fn set_tx_and_key(&mut self, tx: u64, key: String) {
        self.tx = tx;
        self.key = key;
    }
}
