//! Deterministic key encoders for the primary record and its secondary
//! indexes (spec §4.3).
//!
//! Each index is a colon-joined path with a type prefix. `scan` builds a key
//! from as many path segments as are available for a given query and
//! preserves a trailing colon when fewer than the index's full arity is
//! supplied, so a prefix scan can't false-positive match an adjacent entity
//! (e.g. `CU:alice:` must not also match `CU:alice2:...`).

fn join(prefix: &str, parts: &[&str]) -> String {
    let mut key = String::from(prefix);
    for part in parts {
        key.push(':');
        key.push_str(part);
    }
    key
}

/// Build a scan prefix from `prefix` and however many `parts` the caller has
/// on hand. A trailing colon is always appended so the prefix can't match a
/// sibling entity whose name happens to start with the same characters.
fn scan(prefix: &str, parts: &[&str]) -> String {
    let mut key = join(prefix, parts);
    key.push(':');
    key
}

/// Drop trailing empty segments, matching the source's `strip` helper: a
/// caller-supplied empty `item` after a present `order` should not produce a
/// key ending in a bare colon for the *full* key form (as opposed to `scan`,
/// which wants the trailing colon).
fn strip<'a>(parts: &[&'a str]) -> Vec<&'a str> {
    let mut parts = parts.to_vec();
    while matches!(parts.last(), Some(&"")) {
        parts.pop();
    }
    parts
}

pub mod id {
    use super::join;

    pub fn key(hex_id: &str) -> String {
        join("ID", &[hex_id])
    }
}

pub mod tx {
    use super::{join, scan, strip};

    pub fn key(holder: &str, asset: &str, account: &str, hex_id: &str) -> String {
        join("TX", &strip(&[holder, asset, account, hex_id]))
    }

    /// Prefix rooted at `account`, used by the balance/transactions scans.
    pub fn account_prefix(holder: &str, asset: &str, account: &str) -> String {
        scan("TX", &[holder, asset, account])
    }
}

pub mod cu {
    use super::{join, scan};

    pub fn key(holder: &str, asset: &str, account: &str) -> String {
        join("CU", &[holder, asset, account])
    }

    /// Prefix for `(holder, asset)`; `asset` empty (the query-only wildcard,
    /// spec §4.1) falls back to [`holder_prefix`], since `asset` is the last
    /// supplied path segment here and an empty trailing segment must be
    /// dropped rather than joined in as a literal empty component (which
    /// would double up the trailing colon and match nothing).
    pub fn holder_asset_prefix(holder: &str, asset: &str) -> String {
        if asset.is_empty() {
            holder_prefix(holder)
        } else {
            scan("CU", &[holder, asset])
        }
    }

    pub fn holder_prefix(holder: &str) -> String {
        scan("CU", &[holder])
    }

    pub fn all_prefix() -> String {
        "CU:".to_string()
    }
}

pub mod ac {
    use super::join;

    pub fn key(account: &str) -> String {
        join("AC", &[account])
    }
}

pub mod assets {
    use super::join;

    pub fn key(asset: &str) -> String {
        join("AS", &[asset])
    }

    pub fn all_prefix() -> String {
        "AS:".to_string()
    }
}

pub mod at {
    use super::{join, scan, strip};

    pub fn key(asset: &str, holder: &str, account: &str, hex_id: &str) -> String {
        join("AT", &strip(&[asset, holder, account, hex_id]))
    }

    pub fn asset_prefix(asset: &str) -> String {
        scan("AT", &[asset])
    }

    pub fn all_prefix() -> String {
        "AT:".to_string()
    }
}

pub mod or_ {
    use super::{join, scan};

    pub fn key(holder: &str, order: &str) -> String {
        join("OR", &[holder, order])
    }

    pub fn holder_prefix(holder: &str) -> String {
        scan("OR", &[holder])
    }
}

pub mod oi {
    use super::{join, scan, strip};

    pub fn key(holder: &str, order: &str, item: &str, hex_id: &str) -> String {
        join("OI", &strip(&[holder, order, item, hex_id]))
    }

    /// Scan prefix for `OI:<holder>:<order>[:<item>]`; `item` may be empty to
    /// scan every item of the order.
    pub fn prefix(holder: &str, order: &str, item: &str) -> String {
        if item.is_empty() {
            scan("OI", &[holder, order])
        } else {
            scan("OI", &[holder, order, item])
        }
    }
}

pub mod rf {
    use super::join;

    pub fn key(src_id: &str, dest_id: &str) -> String {
        join("RF", &[src_id, dest_id])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_key_joins_all_four_segments() {
        assert_eq!(
            tx::key("alice", "XRP", "abc123", "deadbeef"),
            "TX:alice:XRP:abc123:deadbeef"
        );
    }

    #[test]
    fn scan_prefix_preserves_trailing_colon() {
        assert_eq!(cu::holder_asset_prefix("alice", "XRP"), "CU:alice:XRP:");
    }

    #[test]
    fn holder_asset_prefix_falls_back_to_holder_prefix_on_empty_asset() {
        assert_eq!(cu::holder_asset_prefix("alice", ""), cu::holder_prefix("alice"));
        assert_eq!(cu::holder_asset_prefix("alice", ""), "CU:alice:");
    }

    #[test]
    fn trailing_colon_prevents_sibling_false_match() {
        let prefix = cu::holder_prefix("alice");
        assert!(!"CU:alice2:XRP:acct".starts_with(&prefix));
        assert!("CU:alice:XRP:acct".starts_with(&prefix));
    }

    #[test]
    fn oi_prefix_without_item_stops_after_order() {
        assert_eq!(oi::prefix("alice", "order1", ""), "OI:alice:order1:");
    }
}
