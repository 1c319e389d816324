//! Write path: posting creation, status transitions, and cancel (spec §4.4,
//! C5).

use chrono::Utc;
use ledger_codec::Format;
use ledger_core::{Account, Asset, CancellationToken, LedgerError, Posting, PostingId, Status};
use ledger_kv::{with_session_retry, KvOp, Precondition};
use ledger_metrics::observe_panic_safe;
use rust_decimal::Decimal;

use crate::engine::LedgerEngine;
use crate::options::CreateTxOptions;

fn encode_primary(posting: &Posting, format: Format) -> Result<(String, Vec<u8>), LedgerError> {
    let key = ledger_index::id::key(&posting.id.to_hex());
    let value = ledger_codec::encode(posting, format)?;
    Ok((key, value))
}

/// Build the full write batch for a newly created posting: the primary
/// record plus every secondary pointer spec §4.3 names as "produced when"
/// this posting's fields qualify. Returns the ops and the primary key (used
/// as the `referenced_key` of every secondary pointer).
fn build_create_ops(posting: &Posting, format: Format) -> Result<(Vec<KvOp>, String), LedgerError> {
    let hex_id = posting.id.to_hex();
    let (primary_key, value) = encode_primary(posting, format)?;
    let mut ops = vec![KvOp::Set {
        key: primary_key.clone(),
        value,
    }];

    if posting.order.is_some() || posting.item.is_some() {
        let order = posting.order.as_deref().unwrap_or("");
        let item = posting.item.as_deref().unwrap_or("");
        ops.push(KvOp::Ref {
            key: ledger_index::or_::key(&posting.holder, order),
            referenced_key: primary_key.clone(),
        });
        ops.push(KvOp::Ref {
            key: ledger_index::oi::key(&posting.holder, order, item, &hex_id),
            referenced_key: primary_key.clone(),
        });
    }

    // TX is both a directly addressable reference (per the index table) and
    // a sorted-set member (per §4.6's aggregation protocols, which scan it
    // in insertion order); see DESIGN.md for why both forms are produced.
    let tx_key = ledger_index::tx::key(
        &posting.holder,
        posting.asset.as_str(),
        posting.account.as_str(),
        &hex_id,
    );
    ops.push(KvOp::Ref {
        key: tx_key.clone(),
        referenced_key: primary_key.clone(),
    });
    ops.push(KvOp::ZAdd {
        set: ledger_index::tx::account_prefix(
            &posting.holder,
            posting.asset.as_str(),
            posting.account.as_str(),
        ),
        key: tx_key,
    });

    ops.push(KvOp::Ref {
        key: ledger_index::cu::key(&posting.holder, posting.asset.as_str(), posting.account.as_str()),
        referenced_key: primary_key.clone(),
    });
    ops.push(KvOp::Ref {
        key: ledger_index::ac::key(posting.account.as_str()),
        referenced_key: primary_key.clone(),
    });
    ops.push(KvOp::Ref {
        key: ledger_index::assets::key(posting.asset.as_str()),
        referenced_key: primary_key.clone(),
    });
    ops.push(KvOp::Ref {
        key: ledger_index::at::key(
            posting.asset.as_str(),
            &posting.holder,
            posting.account.as_str(),
            &hex_id,
        ),
        referenced_key: primary_key.clone(),
    });

    Ok((ops, primary_key))
}

impl LedgerEngine {
    /// The invariants every written posting must satisfy (spec §3, mirroring
    /// the source's `CreateOperations`/`UpdateOperations` checks).
    fn validate_for_write(&self, posting: &Posting) -> Result<(), LedgerError> {
        if !posting.account.checksum_ok() {
            return Err(LedgerError::bad_request(format!(
                "checksum check failed for '{}'",
                posting.account
            )));
        }
        if !self.config.is_asset_supported(posting.asset.as_str()) {
            return Err(LedgerError::bad_request(format!(
                "invalid asset '{}'",
                posting.asset
            )));
        }
        if posting.holder.is_empty() {
            return Err(LedgerError::bad_request("holder is empty"));
        }
        if posting.amount.is_zero() {
            return Err(LedgerError::bad_request(format!("amount is zero: {}", posting.id)));
        }
        Ok(())
    }

    /// Create, resolve the account for, balance-check, and commit a new
    /// posting (spec §4.4). `amount` is signed: positive is a credit,
    /// negative a debit.
    pub fn create_tx(
        &self,
        holder: &str,
        asset: &str,
        amount: Decimal,
        opts: CreateTxOptions,
        token: &CancellationToken,
    ) -> Result<Posting, LedgerError> {
        if self.config.read_only {
            return Err(LedgerError::NotFound);
        }
        if amount.is_zero() {
            return Err(LedgerError::bad_request(format!(
                "transaction for holder {holder} with 0 {asset}"
            )));
        }

        let mut posting = Posting {
            id: PostingId::new_random(),
            account: opts.account.clone().unwrap_or_else(Account::wildcard),
            holder: holder.to_string(),
            order: opts.order,
            item: opts.item,
            asset: Asset::from(asset),
            amount,
            status: Status::CREATED,
            modified: None,
            created: Utc::now(),
            reference: opts.reference,
            user: opts.user,
            tx: 0,
            key: String::new(),
        };

        let mut fresh_account = false;

        if opts.account.is_none() {
            let existing = self.accounts(holder, asset, token)?;
            match existing.len() {
                0 => {
                    posting.account = self.new_account(holder, asset, token)?;
                    fresh_account = true;
                }
                1 => posting.account = existing.into_iter().next().expect("len == 1"),
                _ => {
                    if amount.is_zero() || amount.is_sign_positive() {
                        return Err(LedgerError::TooManyAccounts {
                            holder: holder.to_string(),
                            asset: asset.to_string(),
                        });
                    }
                    // Negative amount with more than one account on file:
                    // resolution is deferred to the overdraw-selection step
                    // below, reproducing the source's behavior exactly
                    // (including its failure mode when overdraw is enabled
                    // and that step is skipped — see DESIGN.md).
                    posting.account = Account::wildcard();
                }
            }
        } else {
            let account = opts.account.as_ref().expect("checked is_none above");
            let info = self.account_info(account.as_str(), token)?;
            if !self.config.multi_account && info.is_none() {
                return Err(LedgerError::AccountNotFound(account.to_string()));
            }
            if let Some(info) = &info {
                if info.holder != holder {
                    return Err(LedgerError::bad_request(format!(
                        "invalid holder {holder} for account {account} ({})",
                        info.holder
                    )));
                }
                if info.asset.as_str() != asset {
                    return Err(LedgerError::bad_request(format!(
                        "invalid asset {asset} for account {account} ({})",
                        info.asset
                    )));
                }
            }
            posting.account = account.clone();
        }

        if amount.is_sign_negative() && !self.config.overdraw {
            let neg_amount = -amount;
            let balances = self.balance(holder, asset, posting.account.as_str(), Status::CREATED, token)?;
            let balance = balances.get(asset).ok_or(LedgerError::NotFound)?;

            if balance.sum < neg_amount {
                return Err(LedgerError::NotEnoughAssets {
                    asset: asset.to_string(),
                    amount: neg_amount.to_string(),
                    holder: holder.to_string(),
                });
            }

            let mut selected = None;
            for (account, per_account) in &balance.accounts {
                if per_account.sum >= neg_amount {
                    selected = Some(account.clone());
                    break;
                }
            }
            posting.account = match selected {
                Some(account) => Account::from(account),
                None => return Err(LedgerError::NotFound),
            };
        }

        self.validate_for_write(&posting)?;

        // Open question §9-2: guard the account-membership read against a
        // concurrent writer depleting the same account between the balance
        // check above and this commit.
        let cu_key = ledger_index::cu::key(holder, asset, posting.account.as_str());
        let precondition = if fresh_account {
            Precondition::KeyMustNotExist(cu_key)
        } else {
            let current = with_session_retry(self.driver.as_ref(), token, || {
                self.driver.get(&cu_key, self.config.verified, token)
            })?;
            match current {
                Some(entry) => Precondition::KeyNotModifiedAfterTx {
                    key: cu_key,
                    tx: entry.tx,
                },
                None => Precondition::KeyMustNotExist(cu_key),
            }
        };

        let (ops, key) = build_create_ops(&posting, self.format())?;
        let tx = with_session_retry(self.driver.as_ref(), token, || {
            self.driver.exec(ops.clone(), vec![precondition.clone()], token)
        })?;
        posting.set_tx_and_key(tx, key);

        observe_panic_safe(self.metrics.as_ref(), asset, posting.amount);
        tracing::info!(
            id = %posting.id,
            holder = %posting.holder,
            asset = %posting.asset,
            account = %posting.account,
            amount = %posting.amount,
            "posting committed"
        );

        Ok(posting)
    }

    /// `Add` = `create_tx` with a positive amount (spec §4.4).
    pub fn add(
        &self,
        holder: &str,
        asset: &str,
        amount: Decimal,
        opts: CreateTxOptions,
        token: &CancellationToken,
    ) -> Result<Posting, LedgerError> {
        if amount.is_zero() || amount.is_sign_negative() {
            return Err(LedgerError::bad_request(format!("can't add {asset} {amount}")));
        }
        self.create_tx(holder, asset, amount, opts, token)
    }

    /// `Remove` = `create_tx` with `amount` negated (spec §4.4).
    pub fn remove(
        &self,
        holder: &str,
        asset: &str,
        amount: Decimal,
        opts: CreateTxOptions,
        token: &CancellationToken,
    ) -> Result<Posting, LedgerError> {
        if amount.is_zero() || amount.is_sign_negative() {
            return Err(LedgerError::bad_request(format!("can't remove {asset} {amount}")));
        }
        self.create_tx(holder, asset, -amount, opts, token)
    }

    /// Move the posting `(holder, asset, account, id)` to `new_status`. A
    /// no-op (same status) returns the posting unchanged and writes nothing
    /// (spec §4.4, §8's idempotence property).
    pub fn status(
        &self,
        holder: &str,
        asset: &str,
        account: &str,
        id: PostingId,
        new_status: Status,
        token: &CancellationToken,
    ) -> Result<Posting, LedgerError> {
        if self.config.read_only {
            return Err(LedgerError::NotFound);
        }

        let current = self.get(id, token)?;
        if current.holder != holder || current.asset.as_str() != asset || current.account.as_str() != account
        {
            return Err(LedgerError::bad_request("invalid holder/asset/account/id combination"));
        }

        if current.status == new_status {
            return Ok(current);
        }

        let mut updated = current.copy_for_write();
        updated.modified = Some(Utc::now());
        updated.status = new_status;
        self.validate_for_write(&updated)?;

        let (key, value) = encode_primary(&updated, self.format())?;
        let tx = with_session_retry(self.driver.as_ref(), token, || {
            self.driver.set(&key, value.clone(), token)
        })?;
        updated.set_tx_and_key(tx, key);

        tracing::info!(id = %updated.id, status = updated.status.0, "posting status updated");
        Ok(updated)
    }

    /// Cancel posting `(holder, asset, account, id)`: writes a new
    /// compensating posting and rewrites the original to `Canceled`,
    /// atomically (spec §4.4, invariant 6).
    pub fn cancel(
        &self,
        holder: &str,
        asset: &str,
        account: &str,
        id: PostingId,
        token: &CancellationToken,
    ) -> Result<Posting, LedgerError> {
        if self.config.read_only {
            return Err(LedgerError::NotFound);
        }

        let original = self.get(id, token)?;
        if original.holder != holder || original.asset.as_str() != asset || original.account.as_str() != account
        {
            return Err(LedgerError::bad_request(format!(
                "inconsistent holder/account/transaction combination ({holder}/{account}/{id})"
            )));
        }

        let finished = Status(
            self.config
                .status_value("Finished")
                .ok_or_else(|| LedgerError::internal("supported_statuses missing \"Finished\""))?,
        );
        let canceled = Status(
            self.config
                .status_value("Canceled")
                .ok_or_else(|| LedgerError::internal("supported_statuses missing \"Canceled\""))?,
        );

        let reference = serde_json::json!({
            "ID": original.id.to_dashed(),
            "Status": "Canceled",
        })
        .to_string();

        let mut cancel = original.copy_for_write();
        cancel.id = PostingId::new_random();
        cancel.status = finished;
        cancel.amount = -original.amount;
        cancel.reference = Some(reference);
        cancel.modified = None;
        cancel.created = Utc::now();

        let mut rewritten = original.copy_for_write();
        rewritten.status = canceled;
        rewritten.modified = Some(cancel.created);

        self.validate_for_write(&cancel)?;
        self.validate_for_write(&rewritten)?;

        let (mut ops, cancel_key) = build_create_ops(&cancel, self.format())?;
        let (original_key, original_value) = encode_primary(&rewritten, self.format())?;
        ops.push(KvOp::Set {
            key: original_key,
            value: original_value,
        });
        ops.push(KvOp::Ref {
            key: ledger_index::rf::key(&original.id.to_hex(), &cancel.id.to_hex()),
            referenced_key: cancel_key.clone(),
        });

        // Double-cancellation is not structurally guarded here, reproducing
        // the source exactly (open question §9-1; see DESIGN.md).
        let tx = with_session_retry(self.driver.as_ref(), token, || {
            self.driver.exec(ops.clone(), Vec::new(), token)
        })?;
        cancel.set_tx_and_key(tx, cancel_key);

        observe_panic_safe(self.metrics.as_ref(), asset, cancel.amount);
        tracing::info!(id = %cancel.id, original = %original.id, "posting cancelled");

        Ok(cancel)
    }
}
