pub mod account;
pub mod cancel;
pub mod config;
pub mod error;
pub mod posting;
pub mod types;

pub use account::Account;
pub use cancel::CancellationToken;
pub use config::{LedgerConfig, ValueFormat};
pub use error::LedgerError;
pub use posting::Posting;
pub use types::{Asset, PostingId, Status, ALL_ACCOUNTS, ALL_ASSETS, ALL_STATUSES, CREATED_STATUS};
