use ledger_core::{Account, Asset};

/// Caller-supplied knobs for [`crate::LedgerEngine::create_tx`] (and its
/// `add`/`remove` convenience wrappers): the "copy caller options" step of
/// spec §4.4.
#[derive(Clone, Debug, Default)]
pub struct CreateTxOptions {
    pub account: Option<Account>,
    pub order: Option<String>,
    pub item: Option<String>,
    pub reference: Option<String>,
    pub user: Option<String>,
}

/// The projection of a posting read back from `AC:<account>`, used by
/// account resolution (spec §4.4 step 4) and by account derivation (§4.1).
#[derive(Clone, Debug)]
pub struct AccountInfo {
    pub account: Account,
    pub holder: String,
    pub asset: Asset,
}
