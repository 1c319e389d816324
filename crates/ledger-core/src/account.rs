//! Checksummed account identifiers.
//!
//! An account is a 10+ character ASCII string: a 16-character hex body derived
//! from `(holder, asset)` plus a two-digit decimal checksum. See
//! [`derive_account`] and [`Account::checksum_ok`].

use std::fmt;

use crc::{Crc, CRC_64_XZ};
use serde::{Deserialize, Serialize};

use crate::types::ALL_ACCOUNTS;

/// Bound on the disambiguator bump loop in [`derive_account`]: the source
/// system gives up after 11 attempts (disambiguators 0..=10).
pub const MAX_DISAMBIGUATOR_ATTEMPTS: u8 = 11;

// CRC-64/XZ is the ECMA-182 polynomial with reflected input/output and a
// final XOR of all-ones, i.e. the algorithm usually labeled CRC-64-ECMA in the
// client libraries this was ported from.
const CRC64_ECMA: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Account(pub String);

impl Account {
    pub fn wildcard() -> Self {
        Account(ALL_ACCOUNTS.to_string())
    }

    pub fn is_wildcard(&self) -> bool {
        self.0 == ALL_ACCOUNTS
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recompute the checksum over the first `len - 2` characters and compare
    /// it against the decimal value encoded in the trailing two characters.
    pub fn checksum_ok(&self) -> bool {
        if self.0.len() < 3 {
            return false;
        }
        let (body, tail) = self.0.split_at(self.0.len() - 2);
        let expected: u8 = match tail.parse() {
            Ok(v) => v,
            Err(_) => return false,
        };
        checksum_digits(body) == expected
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Account({})", self.0)
    }
}

impl From<String> for Account {
    fn from(s: String) -> Self {
        Account(s)
    }
}

impl From<&str> for Account {
    fn from(s: &str) -> Self {
        Account(s.to_string())
    }
}

/// `97 - (N mod 97)`, where `N` is the decimal value obtained by uppercasing
/// `body` and substituting each letter for a digit via the rotation
/// `A..I -> 1..9`, `J..R -> 1..9`, `S..Z -> 2..9`. Non-alphanumeric
/// characters contribute no digits (matching the source's substitution
/// table, which is defined only over `0-9A-Z`).
fn checksum_digits(body: &str) -> u8 {
    let mut digits = String::with_capacity(body.len());
    for ch in body.chars() {
        let upper = ch.to_ascii_uppercase();
        match upper {
            '0'..='9' => digits.push(upper),
            'A'..='I' => digits.push((b'1' + (upper as u8 - b'A')) as char),
            'J'..='R' => digits.push((b'1' + (upper as u8 - b'J')) as char),
            'S'..='Z' => digits.push((b'2' + (upper as u8 - b'S')) as char),
            _ => {}
        }
    }
    // The hex body is at most 16 chars, each mapping to a single digit, so the
    // decimal value fits comfortably in a u128 without risk of overflow.
    let n: u128 = digits.parse().unwrap_or(0);
    97 - (n % 97) as u8
}

/// Derive a fresh account identifier for `(holder, asset)`.
///
/// `exists` should report whether an account with the given checksummed body
/// is already bound to some `(holder, asset)` pair *other than* the one being
/// derived; on a collision the disambiguator byte is bumped and the derivation
/// retried, bounded to [`MAX_DISAMBIGUATOR_ATTEMPTS`].
pub fn derive_account(
    holder: &str,
    asset: &str,
    mut exists: impl FnMut(&str) -> bool,
) -> Result<Account, String> {
    // The disambiguator is conceptually prepended to the digest and then
    // dropped (`sum([disambiguator])[1:]` in the source this was ported
    // from) — the digest itself is computed over `holder || asset` only, so
    // the disambiguator does not actually change the candidate body. This is
    // a faithful reproduction of the source algorithm's behavior, not an
    // oversight; see DESIGN.md.
    let mut digest = CRC64_ECMA.digest();
    digest.update(holder.as_bytes());
    digest.update(asset.as_bytes());
    let sum = digest.finalize().to_be_bytes();
    let body = hex::encode(sum);
    let checksum = checksum_digits(&body);
    let candidate = format!("{body}{checksum:02}");

    for _disambiguator in 0..MAX_DISAMBIGUATOR_ATTEMPTS {
        if !exists(&candidate) {
            return Ok(Account(candidate));
        }
    }
    Err(format!(
        "could not derive a unique account for holder {holder} asset {asset} after {MAX_DISAMBIGUATOR_ATTEMPTS} attempts"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_is_deterministic_on_an_empty_ledger() {
        let a = derive_account("alice", "XRP", |_| false).unwrap();
        let b = derive_account("alice", "XRP", |_| false).unwrap();
        assert_eq!(a, b);
        assert!(a.checksum_ok());
        assert_eq!(a.0.len(), 18);
    }

    #[test]
    fn derive_retries_the_identical_candidate_on_collision() {
        // The disambiguator does not change the candidate body (see the
        // comment on derive_account), so every retry sees the same
        // candidate; a caller reporting a persistent collision exhausts the
        // attempt bound and gets an error rather than a different account.
        let mut calls = 0;
        let result = derive_account("bob", "BTC", |_| {
            calls += 1;
            true
        });
        assert!(result.is_err());
        assert_eq!(calls, MAX_DISAMBIGUATOR_ATTEMPTS as usize);
    }

    #[test]
    fn derive_succeeds_once_no_collision_is_reported() {
        let acc = derive_account("bob", "BTC", |_| false).unwrap();
        assert!(acc.checksum_ok());
    }

    #[test]
    fn checksum_rejects_tampered_account() {
        let acc = derive_account("carol", "ETH", |_| false).unwrap();
        let mut tampered = acc.0.clone();
        let last = tampered.pop().unwrap();
        let bumped = std::char::from_digit((last.to_digit(10).unwrap_or(0) + 1) % 10, 10).unwrap();
        tampered.push(bumped);
        assert!(!Account(tampered).checksum_ok());
    }
}
