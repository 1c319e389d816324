use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Status value meaning "match any status"; used only by queries, never stored.
pub const ALL_STATUSES: i32 = -1;

/// Status value that every supported-statuses map must bind to `"Created"`.
pub const CREATED_STATUS: i32 = 0;

/// Asset symbol naming the wildcard "any asset" used only by queries.
pub const ALL_ASSETS: &str = "";

/// Account value naming the wildcard "any account" used only by queries.
pub const ALL_ACCOUNTS: &str = "";

// ── PostingId ────────────────────────────────────────────────────────────────

/// 128-bit random identifier, unique across all postings ever written.
///
/// Canonical form on API boundaries is a dashed UUID string; inside index key
/// paths it is 32 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostingId(pub [u8; 16]);

impl PostingId {
    /// Allocate a fresh random id.
    pub fn new_random() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// 32 lowercase hex characters, for use inside index key paths.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let decoded = hex::decode(s)?;
        if decoded.len() != 16 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 16];
        arr.copy_from_slice(&decoded);
        Ok(Self(arr))
    }

    /// Dashed UUID string, the canonical form on the HTTP boundary.
    pub fn to_dashed(&self) -> String {
        uuid::Uuid::from_bytes(self.0).to_string()
    }

    pub fn from_dashed(s: &str) -> Result<Self, uuid::Error> {
        let u = uuid::Uuid::parse_str(s)?;
        Ok(Self(*u.as_bytes()))
    }

    /// Accept either a dashed UUID or a bare 32-char hex string, mirroring the
    /// source system's id text boundary.
    pub fn parse_any(s: &str) -> Result<Self, String> {
        if let Ok(id) = Self::from_dashed(s) {
            return Ok(id);
        }
        Self::from_hex(s).map_err(|e| format!("invalid id {s}: {e}"))
    }
}

impl fmt::Display for PostingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_dashed())
    }
}

impl fmt::Debug for PostingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PostingId({})", self.to_hex())
    }
}

// ── Asset ────────────────────────────────────────────────────────────────────

/// A fungible symbol (e.g. "BTC", "XRP") validated against a configured
/// supported-assets set. The empty string is the wildcard `AllAssets`, used
/// only by queries and never stored on a posting.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Asset(pub String);

impl Asset {
    pub fn wildcard() -> Self {
        Asset(ALL_ASSETS.to_string())
    }

    pub fn is_wildcard(&self) -> bool {
        self.0 == ALL_ASSETS
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Asset({})", self.0)
    }
}

impl From<&str> for Asset {
    fn from(s: &str) -> Self {
        Asset(s.to_string())
    }
}

impl From<String> for Asset {
    fn from(s: String) -> Self {
        Asset(s)
    }
}

// ── Status ───────────────────────────────────────────────────────────────────

/// Integer-tagged lifecycle label looked up by name in the ledger's configured
/// status map. `0` is always `Created`; `-1` (`ALL_STATUSES`) is the wildcard
/// "any status" sentinel used only by queries.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Status(pub i32);

impl Status {
    pub const CREATED: Status = Status(CREATED_STATUS);
    pub const ANY: Status = Status(ALL_STATUSES);

    pub fn is_wildcard(&self) -> bool {
        self.0 == ALL_STATUSES
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Status({})", self.0)
    }
}

impl From<i32> for Status {
    fn from(v: i32) -> Self {
        Status(v)
    }
}
