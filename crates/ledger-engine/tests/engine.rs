//! Engine-level integration tests (spec §8), run against the embedded
//! `SledKvDriver` opened on a temporary directory per test.

use std::collections::HashMap;
use std::sync::Arc;

use ledger_core::{CancellationToken, LedgerConfig, LedgerError, Status, ValueFormat};
use ledger_engine::{CreateTxOptions, LedgerEngine};
use ledger_kv::sled_driver::SledKvDriver;
use ledger_kv::KvDriver;
use ledger_metrics::{NoopMetricsSink, RecordingMetricsSink};
use rust_decimal::Decimal;
use tempfile::TempDir;

fn config(overdraw: bool, multi_account: bool) -> LedgerConfig {
    let mut supported_assets = HashMap::new();
    for asset in ["XRP", "BTC", "ETH", "ADA"] {
        supported_assets.insert(asset.to_string(), asset.to_string());
    }
    let mut supported_statuses = HashMap::new();
    supported_statuses.insert("Created".to_string(), 0);
    supported_statuses.insert("Canceled".to_string(), -1);
    supported_statuses.insert("Finished".to_string(), 1);
    LedgerConfig {
        supported_assets,
        supported_statuses,
        overdraw,
        multi_account,
        read_only: false,
        value_format: ValueFormat::Json,
        page_size: 25,
        verified: false,
    }
}

fn driver(dir: &TempDir) -> Arc<dyn KvDriver> {
    Arc::new(SledKvDriver::open(dir.path()).expect("open sled driver"))
}

fn engine(overdraw: bool, multi_account: bool) -> (LedgerEngine, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let eng = LedgerEngine::new(driver(&dir), config(overdraw, multi_account), Arc::new(NoopMetricsSink))
        .expect("construct engine");
    (eng, dir)
}

fn opts() -> CreateTxOptions {
    CreateTxOptions::default()
}

fn token() -> CancellationToken {
    CancellationToken::new()
}

/// Scenario 1: Add then Remove on an auto-derived account, Balance matches.
#[test]
fn add_then_remove_reports_correct_balance() {
    let (engine, _dir) = engine(false, false);
    let t = token();

    let a1 = engine.add("alice", "XRP", Decimal::new(2, 0), opts(), &t).unwrap();
    let a2 = engine
        .remove("alice", "XRP", Decimal::new(1, 0), opts(), &t)
        .unwrap();
    assert_eq!(a1.account, a2.account);
    assert!(a1.account.checksum_ok());

    let balances = engine.balance("alice", "XRP", "", Status::CREATED, &t).unwrap();
    let xrp = balances.get("XRP").expect("XRP balance present");
    assert_eq!(xrp.sum, Decimal::new(1, 0));
    assert_eq!(xrp.count, 2);

    let per_account = xrp.accounts.get(a1.account.as_str()).expect("account present");
    assert_eq!(per_account.sum, Decimal::new(1, 0));
    assert_eq!(per_account.count, 2);
}

/// Scenario 2: with multiple accounts on file, an auto-resolved `Remove`
/// picks the first account whose own balance covers the amount, rather
/// than splitting it across accounts.
#[test]
fn multi_account_remove_selects_sufficient_account() {
    let (engine, _dir) = engine(false, true);
    let t = token();

    let b1 = engine.add("bob", "BTC", Decimal::new(1, 0), opts(), &t).unwrap();

    let b2_account = ledger_core::account::derive_account("bob-second-account", "BTC", |_| false).unwrap();
    let mut explicit = opts();
    explicit.account = Some(b2_account.clone());
    let b2 = engine
        .add("bob", "BTC", Decimal::new(2, 0), explicit, &t)
        .unwrap();
    assert_ne!(b1.account, b2.account);

    let accounts = engine.accounts("bob", "BTC", &t).unwrap();
    assert_eq!(accounts.len(), 2);

    // Only the account holding 2 can cover a Remove of 2; the selection is
    // forced regardless of HashMap iteration order.
    let removed_two = engine
        .remove("bob", "BTC", Decimal::new(2, 0), opts(), &t)
        .unwrap();
    assert_eq!(removed_two.account, b2.account);

    // The remaining account covers the final Remove of 1.
    let removed_one = engine
        .remove("bob", "BTC", Decimal::new(1, 0), opts(), &t)
        .unwrap();
    assert_eq!(removed_one.account, b1.account);

    let balances = engine.balance("bob", "BTC", "", Status::CREATED, &t).unwrap();
    let btc = balances.get("BTC").unwrap();
    assert_eq!(btc.sum, Decimal::ZERO);
    assert_eq!(btc.count, 4);
}

/// Scenario 3: Cancel posts a compensating entry and rewrites the original
/// to `Canceled`; history shows both states; the asset nets to zero.
#[test]
fn cancel_posts_compensating_entry_and_preserves_history() {
    let dir = tempfile::tempdir().expect("tempdir");
    let shared = driver(&dir);
    let metrics = Arc::new(RecordingMetricsSink::default());
    let write_engine = LedgerEngine::new(shared.clone(), config(false, false), metrics.clone()).unwrap();
    let t = token();

    let c1 = write_engine
        .add("carol", "ETH", Decimal::new(105, 1), opts(), &t)
        .unwrap();
    assert_eq!(c1.status, Status::CREATED);

    let c2 = write_engine
        .cancel("carol", "ETH", c1.account.as_str(), c1.id, &t)
        .unwrap();
    assert_eq!(c2.amount, Decimal::new(-105, 1));
    let expected_reference = format!("{{\"ID\":\"{}\",\"Status\":\"Canceled\"}}", c1.id.to_dashed());
    assert_eq!(c2.reference.as_deref(), Some(expected_reference.as_str()));

    let rewritten = write_engine.get(c1.id, &t).unwrap();
    assert_eq!(rewritten.amount, c1.amount);

    let history: Vec<_> = write_engine
        .history(c1.id, &t)
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status, Status::CREATED);
    assert_ne!(history[1].status, Status::CREATED);

    let mut read_only_config = config(false, false);
    read_only_config.read_only = true;
    let read_engine = LedgerEngine::new(shared, read_only_config, Arc::new(NoopMetricsSink)).unwrap();
    let asset_balances = read_engine.asset_balance("ETH", &t).unwrap();
    assert_eq!(asset_balances.get("ETH").copied().unwrap_or_default(), Decimal::ZERO);

    let observed = metrics.observations.lock().unwrap();
    assert_eq!(observed.len(), 2);
}

/// Scenario 4: overdraw rejection surfaces the exact message the source
/// system produces.
#[test]
fn overdraw_rejected_with_expected_message() {
    let (engine, _dir) = engine(false, false);
    let t = token();
    engine.add("dan", "ADA", Decimal::new(10, 1), opts(), &t).unwrap();

    let err = engine
        .remove("dan", "ADA", Decimal::new(15, 1), opts(), &t)
        .unwrap_err();
    match &err {
        LedgerError::NotEnoughAssets { asset, amount, holder } => {
            assert_eq!(asset, "ADA");
            assert_eq!(amount, "1.5");
            assert_eq!(holder, "dan");
        }
        other => panic!("expected NotEnoughAssets, got {other:?}"),
    }
    assert!(err.to_string().starts_with("balance too low to remove ADA 1.5 for holder dan"));
}

/// Scenario 5: an asset outside the configured supported set is rejected.
#[test]
fn unknown_asset_rejected() {
    let (engine, _dir) = engine(false, false);
    let t = token();
    let err = engine.add("eve", "XYZ", Decimal::new(1, 0), opts(), &t).unwrap_err();
    match err {
        LedgerError::BadRequest(detail) => assert_eq!(detail, "invalid asset 'XYZ'"),
        other => panic!("expected BadRequest, got {other:?}"),
    }
}

/// Scenario 6: writing to an account already bound to a different holder
/// is rejected, naming the mismatched holder.
#[test]
fn account_mismatch_rejected() {
    let (engine, _dir) = engine(false, true);
    let t = token();
    let grace = engine.add("grace", "BTC", Decimal::new(5, 0), opts(), &t).unwrap();

    let mut explicit = opts();
    explicit.account = Some(grace.account.clone());
    let err = engine
        .add("frank", "BTC", Decimal::new(1, 0), explicit, &t)
        .unwrap_err();
    match err {
        LedgerError::BadRequest(detail) => {
            assert!(detail.contains("invalid holder frank for account"));
            assert!(detail.contains("(grace)"));
        }
        other => panic!("expected BadRequest, got {other:?}"),
    }
}

/// Idempotence of a status no-op: the same status returns the posting
/// unchanged and does not advance its transaction id.
#[test]
fn status_no_op_is_idempotent() {
    let (engine, _dir) = engine(false, false);
    let t = token();
    let posting = engine.add("holly", "XRP", Decimal::new(3, 0), opts(), &t).unwrap();

    let unchanged = engine
        .status("holly", "XRP", posting.account.as_str(), posting.id, posting.status, &t)
        .unwrap();
    assert_eq!(unchanged.tx, posting.tx);
    assert_eq!(unchanged.status, posting.status);
}

/// Account-derivation determinism: the same `(holder, asset)` pair derives
/// the same account on an empty ledger.
#[test]
fn account_derivation_is_deterministic_on_an_empty_ledger() {
    let (engine, _dir) = engine(false, false);
    let t = token();
    let first = engine.new_account("irene", "BTC", &t).unwrap();
    let second = engine.new_account("irene", "BTC", &t).unwrap();
    assert_eq!(first, second);
    assert!(first.checksum_ok());
}

/// The asset-wildcard query form (spec §4.1's `AllAssets`, used only by
/// queries) sums balances across every asset a holder has postings in, not
/// just one.
#[test]
fn balance_with_asset_wildcard_spans_every_asset() {
    let (engine, _dir) = engine(false, true);
    let t = token();
    engine.add("judy", "XRP", Decimal::new(2, 0), opts(), &t).unwrap();
    engine.add("judy", "BTC", Decimal::new(3, 0), opts(), &t).unwrap();

    let balances = engine.balance("judy", "", "", Status::CREATED, &t).unwrap();
    assert_eq!(balances.len(), 2);
    assert_eq!(balances.get("XRP").unwrap().sum, Decimal::new(2, 0));
    assert_eq!(balances.get("BTC").unwrap().sum, Decimal::new(3, 0));

    let accounts = engine.accounts("judy", "", &t).unwrap();
    assert_eq!(accounts.len(), 2);
}
