//! Read path and aggregation protocols (spec §4.5/§4.6, C5/C6).

use std::collections::HashMap;

use ledger_core::{Account, Asset, CancellationToken, LedgerError, Posting, PostingId, Status};
use ledger_kv::{with_session_retry, Entry};
use rust_decimal::Decimal;

use crate::engine::LedgerEngine;
use crate::options::AccountInfo;

/// Running total for one account within a [`Balance`], filtered to postings
/// of status `>= min_status`.
#[derive(Clone, Debug, Default)]
pub struct AccountBalance {
    pub sum: Decimal,
    pub count: u64,
}

/// Per-asset balance aggregated across one or more accounts (spec §4.6
/// `Balance`/`AssetBalance`), mirroring the source's `types.Balance`, with
/// `Sum`/`Accounts[*].Sum` kept as exact decimals rather than the source's
/// `float64` (spec §9's decimal-arithmetic redesign guidance).
#[derive(Clone, Debug)]
pub struct Balance {
    pub sum: Decimal,
    pub count: u64,
    pub min_status: Status,
    pub accounts: HashMap<String, AccountBalance>,
}

impl Balance {
    fn new(min_status: Status) -> Self {
        Self {
            sum: Decimal::ZERO,
            count: 0,
            min_status,
            accounts: HashMap::new(),
        }
    }

    fn add(&mut self, account: &str, amount: Decimal, status: Status) {
        if status >= self.min_status {
            self.sum += amount;
            self.count += 1;
            let entry = self.accounts.entry(account.to_string()).or_default();
            entry.sum += amount;
            entry.count += 1;
        }
    }
}

fn decode_entry(entry: &Entry) -> Result<Posting, LedgerError> {
    let mut posting = ledger_codec::decode(&entry.value)?;
    posting.set_tx_and_key(entry.tx, entry.key.clone());
    Ok(posting)
}

impl LedgerEngine {
    /// Page through every entry under `prefix`, in key order. Checked for
    /// cancellation at each page boundary (spec §5), not just at entry: a
    /// caller that aborts mid-scan stops the next page from being fetched.
    fn scan_prefix_all(&self, prefix: &str, token: &CancellationToken) -> Result<Vec<Entry>, LedgerError> {
        let mut out = Vec::new();
        let mut seek: Option<String> = None;
        loop {
            token.check()?;
            let page = with_session_retry(self.driver.as_ref(), token, || {
                self.driver
                    .scan_prefix(prefix, self.config.page_size, seek.as_deref(), token)
            })?;
            let got = page.len();
            if let Some(last) = page.last() {
                seek = Some(last.key.clone());
            }
            out.extend(page);
            if (got as u32) < self.config.page_size {
                break;
            }
        }
        Ok(out)
    }

    /// Page through every member of sorted set `set`, in insertion order.
    fn scan_sorted_set_all(&self, set: &str, token: &CancellationToken) -> Result<Vec<Entry>, LedgerError> {
        let mut out = Vec::new();
        let mut seek: Option<u64> = None;
        loop {
            token.check()?;
            let page = with_session_retry(self.driver.as_ref(), token, || {
                self.driver.scan_sorted_set(set, self.config.page_size, seek, token)
            })?;
            let got = page.len();
            if let Some(last) = page.last() {
                seek = last.seq;
            }
            out.extend(page);
            if (got as u32) < self.config.page_size {
                break;
            }
        }
        Ok(out)
    }

    /// Read a posting by id. `NotFound` if absent (spec §4.5).
    pub fn get(&self, id: PostingId, token: &CancellationToken) -> Result<Posting, LedgerError> {
        let key = ledger_index::id::key(&id.to_hex());
        let entry = with_session_retry(self.driver.as_ref(), token, || {
            self.driver.get(&key, self.config.verified, token)
        })?
        .ok_or(LedgerError::NotFound)?;
        decode_entry(&entry)
    }

    /// Full version history of `id`, oldest first. Realized as an eagerly
    /// collected iterator: the embedded driver has no network round-trips to
    /// amortize via true lazy paging, but the type still lets a caller
    /// "terminate early" by dropping the iterator, matching the visitor
    /// contract's shape (spec §4.5, §9).
    pub fn history(
        &self,
        id: PostingId,
        token: &CancellationToken,
    ) -> Result<impl Iterator<Item = Result<Posting, LedgerError>>, LedgerError> {
        let key = ledger_index::id::key(&id.to_hex());
        let entries = with_session_retry(self.driver.as_ref(), token, || {
            self.driver.history(&key, self.config.page_size, token)
        })?;
        Ok(entries.into_iter().map(|e| decode_entry(&e)))
    }

    /// Look up the posting bound to `account`, if any, projected down to its
    /// `(holder, asset)` identity (spec §4.4 step 4, §4.1).
    pub fn account_info(
        &self,
        account: &str,
        token: &CancellationToken,
    ) -> Result<Option<AccountInfo>, LedgerError> {
        if account.is_empty() {
            return Err(LedgerError::bad_request("account is mandatory"));
        }
        let key = ledger_index::ac::key(account);
        let entry = with_session_retry(self.driver.as_ref(), token, || {
            self.driver.get(&key, self.config.verified, token)
        })?;
        match entry {
            Some(entry) => {
                let posting = decode_entry(&entry)?;
                Ok(Some(AccountInfo {
                    account: posting.account,
                    holder: posting.holder,
                    asset: posting.asset,
                }))
            }
            None => Ok(None),
        }
    }

    /// Derive a fresh account for `(holder, asset)` (spec §4.1), bumping the
    /// disambiguator on any existing `AC:` collision regardless of whose
    /// `(holder, asset)` it belongs to, mirroring the source's `NewAccount`.
    pub fn new_account(
        &self,
        holder: &str,
        asset: &str,
        token: &CancellationToken,
    ) -> Result<Account, LedgerError> {
        let mut io_error: Option<LedgerError> = None;
        let result = ledger_core::account::derive_account(holder, asset, |candidate| {
            if io_error.is_some() {
                return true;
            }
            match self.account_info(candidate, token) {
                Ok(Some(_)) => true,
                Ok(None) => false,
                Err(e) => {
                    io_error = Some(e);
                    true
                }
            }
        });
        if let Some(e) = io_error {
            return Err(e);
        }
        result.map_err(LedgerError::internal)
    }

    /// Accounts bound to `(holder, asset)` (spec §4.6). `asset` empty is the
    /// query-only wildcard (§4.1): every account of `holder` across every
    /// asset.
    pub fn accounts(
        &self,
        holder: &str,
        asset: &str,
        token: &CancellationToken,
    ) -> Result<Vec<Account>, LedgerError> {
        Ok(self
            .accounts_with_asset(holder, asset, token)?
            .into_iter()
            .map(|(_, account)| account)
            .collect())
    }

    /// Like [`Self::accounts`], but also returns each account's own bound
    /// asset. Needed because the `TX:<holder>:<asset>:<account>:<hex-id>`
    /// index (spec §4.3) sandwiches `asset` between `holder` and `account`,
    /// so scanning transactions under an asset-wildcard query requires each
    /// account's real asset, not the caller's wildcard, to build the correct
    /// per-account scan prefix.
    fn accounts_with_asset(
        &self,
        holder: &str,
        asset: &str,
        token: &CancellationToken,
    ) -> Result<Vec<(Asset, Account)>, LedgerError> {
        if holder.is_empty() {
            return Err(LedgerError::bad_request("accounts: holder is mandatory"));
        }
        let prefix = ledger_index::cu::holder_asset_prefix(holder, asset);
        let mut accounts = Vec::new();
        for entry in self.scan_prefix_all(&prefix, token)? {
            let posting = decode_entry(&entry)?;
            if posting.holder == holder {
                accounts.push((posting.asset, posting.account));
            } else {
                tracing::warn!(
                    expected = holder,
                    found = %posting.holder,
                    "accounts: unexpected holder in CU index entry"
                );
            }
        }
        Ok(accounts)
    }

    /// Resolve `(account, asset-to-scan-with)` pairs for a balance/transactions
    /// query: every bound account of `(holder, asset)` when `account` is the
    /// wildcard, or the single given account paired with its own bound asset
    /// (looked up via `AC:`) when `asset` is itself a wildcard, or the single
    /// given account paired with the caller's asset otherwise.
    fn resolve_scan_targets(
        &self,
        holder: &str,
        asset: &str,
        account: &str,
        token: &CancellationToken,
    ) -> Result<Vec<(String, String)>, LedgerError> {
        if !account.is_empty() {
            if asset.is_empty() {
                let info = self
                    .account_info(account, token)?
                    .ok_or_else(|| LedgerError::AccountNotFound(account.to_string()))?;
                return Ok(vec![(info.asset.as_str().to_string(), account.to_string())]);
            }
            return Ok(vec![(asset.to_string(), account.to_string())]);
        }
        Ok(self
            .accounts_with_asset(holder, asset, token)?
            .into_iter()
            .map(|(asset, account)| (asset.as_str().to_string(), account.as_str().to_string()))
            .collect())
    }

    /// Per-asset balance for `(holder, asset, account)`, filtered to
    /// postings of status `>= min_status` (spec §4.6). `account` empty means
    /// every account of `(holder, asset)`; `asset` empty (query-only
    /// wildcard, §4.1) means every asset of `holder`.
    pub fn balance(
        &self,
        holder: &str,
        asset: &str,
        account: &str,
        min_status: Status,
        token: &CancellationToken,
    ) -> Result<HashMap<String, Balance>, LedgerError> {
        if holder.is_empty() {
            return Err(LedgerError::bad_request("balance: holder is mandatory"));
        }

        let mut result: HashMap<String, Balance> = HashMap::new();
        for (scan_asset, account) in self.resolve_scan_targets(holder, asset, account, token)? {
            let set = ledger_index::tx::account_prefix(holder, &scan_asset, &account);
            for entry in self.scan_sorted_set_all(&set, token)? {
                let posting = decode_entry(&entry)?;
                if posting.holder != holder {
                    return Err(LedgerError::internal(format!(
                        "balance: unexpected holder {} != {holder} in {}",
                        posting.holder, posting.tx
                    )));
                }
                let balance = result
                    .entry(posting.asset.as_str().to_string())
                    .or_insert_with(|| Balance::new(min_status));
                balance.add(posting.account.as_str(), posting.amount, posting.status);
            }
        }
        Ok(result)
    }

    /// Total committed amount per asset, summed directly off the `AT:`
    /// index; a read-only-only full scan (spec §4.6).
    pub fn asset_balance(
        &self,
        asset: &str,
        token: &CancellationToken,
    ) -> Result<HashMap<String, Decimal>, LedgerError> {
        if !self.config.read_only {
            return Err(LedgerError::NotAcceptable("not a read-only instance".to_string()));
        }

        let assets = if asset.is_empty() {
            self.assets(token)?
        } else {
            vec![Asset::from(asset)]
        };

        let mut balances: HashMap<String, Decimal> = HashMap::new();
        for asset in assets {
            let prefix = ledger_index::at::asset_prefix(asset.as_str());
            for entry in self.scan_prefix_all(&prefix, token)? {
                let posting = decode_entry(&entry)?;
                *balances
                    .entry(posting.asset.as_str().to_string())
                    .or_insert(Decimal::ZERO) += posting.amount;
            }
        }
        Ok(balances)
    }

    /// Every asset symbol ever committed (spec §4.6).
    pub fn assets(&self, token: &CancellationToken) -> Result<Vec<Asset>, LedgerError> {
        let prefix = ledger_index::assets::all_prefix();
        self.scan_prefix_all(&prefix, token)?
            .iter()
            .map(|entry| decode_entry(entry).map(|p| p.asset))
            .collect()
    }

    /// Every `(holder, account, asset)` triple ever committed (spec §4.6).
    pub fn holders(&self, token: &CancellationToken) -> Result<Vec<(String, Account, Asset)>, LedgerError> {
        let prefix = ledger_index::cu::all_prefix();
        self.scan_prefix_all(&prefix, token)?
            .iter()
            .map(|entry| decode_entry(entry).map(|p| (p.holder, p.account, p.asset)))
            .collect()
    }

    /// Postings of `(holder, asset, account)`, fail-fast on an index entry
    /// that disagrees with the query (spec §4.6). `asset`/`account` empty
    /// (the query-only wildcards, §4.1) mean "any".
    pub fn transactions(
        &self,
        holder: &str,
        asset: &str,
        account: &str,
        token: &CancellationToken,
    ) -> Result<Vec<Posting>, LedgerError> {
        if holder.is_empty() {
            return Err(LedgerError::bad_request("holder is mandatory"));
        }

        let mut out = Vec::new();
        for (scan_asset, account) in self.resolve_scan_targets(holder, asset, account, token)? {
            let set = ledger_index::tx::account_prefix(holder, &scan_asset, &account);
            for entry in self.scan_sorted_set_all(&set, token)? {
                let posting = decode_entry(&entry)?;
                if holder != posting.holder {
                    return Err(LedgerError::bad_request(format!(
                        "invalid holder {} in tx {} ({holder})",
                        posting.holder, posting.id
                    )));
                }
                if !asset.is_empty() && asset != posting.asset.as_str() {
                    return Err(LedgerError::bad_request(format!(
                        "invalid asset {} in tx {} ({asset})",
                        posting.asset, posting.id
                    )));
                }
                if !account.is_empty() && account != posting.account.as_str() {
                    return Err(LedgerError::bad_request(format!(
                        "invalid account {} in tx {} ({account})",
                        posting.account, posting.id
                    )));
                }
                out.push(posting);
            }
        }
        Ok(out)
    }

    /// Postings grouped under `holder`'s orders (spec §4.6).
    pub fn orders(&self, holder: &str, token: &CancellationToken) -> Result<Vec<Posting>, LedgerError> {
        if holder.is_empty() {
            return Err(LedgerError::bad_request("holder is mandatory"));
        }
        let prefix = ledger_index::or_::holder_prefix(holder);
        let mut out = Vec::new();
        for entry in self.scan_prefix_all(&prefix, token)? {
            let posting = decode_entry(&entry)?;
            if holder != posting.holder {
                return Err(LedgerError::bad_request(format!(
                    "invalid holder {} in tx {} ({holder})",
                    posting.holder, posting.id
                )));
            }
            out.push(posting);
        }
        Ok(out)
    }

    /// Postings under `holder`'s `order`, optionally narrowed to `item`
    /// (spec §4.6). `holder` is mandatory: the `OI:` key is rooted at
    /// `holder`, so there is no single prefix that scans "any holder". `item`
    /// empty means "any item of the order".
    pub fn order_items(
        &self,
        holder: &str,
        order: &str,
        item: &str,
        token: &CancellationToken,
    ) -> Result<Vec<Posting>, LedgerError> {
        if holder.is_empty() {
            return Err(LedgerError::bad_request("holder is mandatory"));
        }
        if order.is_empty() {
            return Err(LedgerError::bad_request("order is mandatory"));
        }
        let prefix = ledger_index::oi::prefix(holder, order, item);
        let mut out = Vec::new();
        for entry in self.scan_prefix_all(&prefix, token)? {
            let posting = decode_entry(&entry)?;
            if holder != posting.holder {
                return Err(LedgerError::bad_request(format!(
                    "invalid holder {} in tx {} ({holder})",
                    posting.holder, posting.id
                )));
            }
            if order != posting.order.as_deref().unwrap_or("") {
                return Err(LedgerError::bad_request(format!(
                    "invalid order {:?} in tx {} ({order})",
                    posting.order, posting.id
                )));
            }
            if !item.is_empty() && item != posting.item.as_deref().unwrap_or("") {
                return Err(LedgerError::bad_request(format!(
                    "invalid item {:?} in tx {} ({item})",
                    posting.item, posting.id
                )));
            }
            out.push(posting);
        }
        Ok(out)
    }
}
