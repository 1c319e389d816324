use thiserror::Error;

/// The full error taxonomy surfaced by the ledger engine and its collaborators.
///
/// Variants below 100 in the wire sense (`AccountNotFound`, `TooManyAccounts`,
/// `NotEnoughAssets`) are engine-domain and map to HTTP 400 just like `BadRequest`;
/// see [`LedgerError::status_code`].
#[derive(Debug, Error)]
pub enum LedgerError {
    // ── Validation ───────────────────────────────────────────────────────────
    #[error("{0}")]
    BadRequest(String),

    #[error("not found")]
    NotFound,

    #[error("{0}")]
    NotAcceptable(String),

    #[error("not modified")]
    NotModified,

    // ── Engine-domain (code < 100) ───────────────────────────────────────────
    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("too many accounts for holder {holder} asset {asset}")]
    TooManyAccounts { holder: String, asset: String },

    #[error("balance too low to remove {asset} {amount} for holder {holder}")]
    NotEnoughAssets {
        asset: String,
        amount: String,
        holder: String,
    },

    // ── Infrastructure ───────────────────────────────────────────────────────
    #[error("internal error: {0}")]
    Internal(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl LedgerError {
    /// Engine-domain numeric code, mirroring the source system's `code < 100` convention.
    /// Kinds with no dedicated numeric code return `0`.
    pub fn code(&self) -> i32 {
        match self {
            LedgerError::AccountNotFound(_) => 1,
            LedgerError::TooManyAccounts { .. } => 2,
            LedgerError::NotEnoughAssets { .. } => 3,
            _ => 0,
        }
    }

    /// HTTP status this error maps to, per the engine→HTTP table.
    pub fn status_code(&self) -> u16 {
        match self {
            LedgerError::BadRequest(_) => 400,
            LedgerError::AccountNotFound(_) => 400,
            LedgerError::TooManyAccounts { .. } => 400,
            LedgerError::NotEnoughAssets { .. } => 400,
            LedgerError::NotFound => 404,
            LedgerError::NotAcceptable(_) => 406,
            LedgerError::NotModified => 304,
            LedgerError::Internal(_) => 500,
            LedgerError::Cancelled => 499,
        }
    }

    pub fn is_code(&self, code: i32) -> bool {
        self.code() == code
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        LedgerError::Internal(detail.into())
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        LedgerError::BadRequest(detail.into())
    }
}
