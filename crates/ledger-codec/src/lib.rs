//! Versioned, format-tagged serialization of a [`Posting`](ledger_core::Posting).
//!
//! Stored value layout: `u16 version | u16 format-tag | payload`, little
//! endian. Two interoperable payload formats are implemented: [`json`] and
//! [`binary`]. Version 1 is the only version defined so far.

pub mod binary;
pub mod json;

use ledger_core::LedgerError;

pub const VERSION_1: u16 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Json = 1,
    Binary = 2,
}

impl Format {
    fn from_tag(tag: u16) -> Result<Self, LedgerError> {
        match tag {
            1 => Ok(Format::Json),
            2 => Ok(Format::Binary),
            other => Err(LedgerError::internal(format!(
                "unknown posting format tag {other}"
            ))),
        }
    }
}

/// Encode `posting` under `format`, prefixed with the `(version, format)`
/// header.
pub fn encode(posting: &ledger_core::Posting, format: Format) -> Result<Vec<u8>, LedgerError> {
    let payload = match format {
        Format::Json => json::encode(posting)?,
        Format::Binary => binary::encode(posting)?,
    };
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&VERSION_1.to_le_bytes());
    out.extend_from_slice(&(format as u16).to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decode a stored value, dispatching on its format header. The returned
/// posting's `tx`/`key` fields are left at their defaults; callers populate
/// them from the KV entry's provenance (see `ledger-kv`).
pub fn decode(data: &[u8]) -> Result<ledger_core::Posting, LedgerError> {
    if data.len() < 4 {
        return Err(LedgerError::internal("posting value shorter than header"));
    }
    let version = u16::from_le_bytes([data[0], data[1]]);
    if version != VERSION_1 {
        return Err(LedgerError::internal(format!(
            "unsupported posting encoding version {version}"
        )));
    }
    let tag = u16::from_le_bytes([data[2], data[3]]);
    let format = Format::from_tag(tag)?;
    let payload = &data[4..];
    match format {
        Format::Json => json::decode(payload),
        Format::Binary => binary::decode(payload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ledger_core::account::Account;
    use ledger_core::types::{Asset, PostingId, Status};
    use ledger_core::Posting;
    use rust_decimal::Decimal;

    fn sample_posting() -> Posting {
        Posting {
            id: PostingId::new_random(),
            account: Account("1234567890123456ab".to_string()),
            holder: "alice".to_string(),
            order: Some("order-1".to_string()),
            item: None,
            asset: Asset::from("XRP"),
            amount: Decimal::new(105, 1),
            status: Status::CREATED,
            modified: None,
            created: Utc::now(),
            reference: Some("ref".to_string()),
            user: Some("svc".to_string()),
            tx: 0,
            key: String::new(),
        }
    }

    #[test]
    fn json_round_trips() {
        let p = sample_posting();
        let bytes = encode(&p, Format::Json).unwrap();
        assert_eq!(&bytes[0..2], &VERSION_1.to_le_bytes());
        assert_eq!(&bytes[2..4], &(Format::Json as u16).to_le_bytes());
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.id, p.id);
        assert_eq!(decoded.amount, p.amount);
        assert_eq!(decoded.holder, p.holder);
    }

    #[test]
    fn binary_round_trips() {
        let p = sample_posting();
        let bytes = encode(&p, Format::Binary).unwrap();
        assert_eq!(&bytes[2..4], &(Format::Binary as u16).to_le_bytes());
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.id, p.id);
        assert_eq!(decoded.amount, p.amount);
        assert_eq!(decoded.order, p.order);
        assert_eq!(decoded.item, p.item);
    }

    #[test]
    fn unknown_format_tag_is_internal_error() {
        let mut bytes = encode(&sample_posting(), Format::Json).unwrap();
        bytes[2] = 9;
        bytes[3] = 0;
        let err = decode(&bytes).unwrap_err();
        assert_eq!(err.status_code(), 500);
    }
}
