//! Length-delimited, field-tagged binary payload.
//!
//! Every variable-length field is written as `u32 length (LE) | bytes`.
//! Optional fields carry a one-byte presence flag ahead of their encoding.
//! `Created`/`Modified` are written as the platform's canonical
//! instant-to-bytes form: `i64 unix seconds (LE) | u32 subsecond nanos (LE)`.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, TimeZone, Utc};
use ledger_core::account::Account;
use ledger_core::types::{Asset, PostingId, Status};
use ledger_core::{LedgerError, Posting};
use rust_decimal::Decimal;
use std::io::{Cursor, Read, Write};
use std::str::FromStr;

fn write_str(buf: &mut Vec<u8>, s: &str) -> Result<(), LedgerError> {
    buf.write_u32::<LittleEndian>(s.len() as u32)
        .map_err(|e| LedgerError::internal(e.to_string()))?;
    buf.write_all(s.as_bytes())
        .map_err(|e| LedgerError::internal(e.to_string()))?;
    Ok(())
}

fn write_opt_str(buf: &mut Vec<u8>, s: &Option<String>) -> Result<(), LedgerError> {
    match s {
        Some(v) => {
            buf.write_u8(1).map_err(|e| LedgerError::internal(e.to_string()))?;
            write_str(buf, v)
        }
        None => buf
            .write_u8(0)
            .map_err(|e| LedgerError::internal(e.to_string())),
    }
}

fn write_instant(buf: &mut Vec<u8>, instant: DateTime<Utc>) -> Result<(), LedgerError> {
    buf.write_i64::<LittleEndian>(instant.timestamp())
        .map_err(|e| LedgerError::internal(e.to_string()))?;
    buf.write_u32::<LittleEndian>(instant.timestamp_subsec_nanos())
        .map_err(|e| LedgerError::internal(e.to_string()))?;
    Ok(())
}

fn read_str(cursor: &mut Cursor<&[u8]>) -> Result<String, LedgerError> {
    let len = cursor
        .read_u32::<LittleEndian>()
        .map_err(|e| LedgerError::internal(e.to_string()))? as usize;
    let mut bytes = vec![0u8; len];
    cursor
        .read_exact(&mut bytes)
        .map_err(|e| LedgerError::internal(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| LedgerError::internal(e.to_string()))
}

fn read_opt_str(cursor: &mut Cursor<&[u8]>) -> Result<Option<String>, LedgerError> {
    let present = cursor
        .read_u8()
        .map_err(|e| LedgerError::internal(e.to_string()))?;
    if present == 0 {
        Ok(None)
    } else {
        Ok(Some(read_str(cursor)?))
    }
}

fn read_instant(cursor: &mut Cursor<&[u8]>) -> Result<DateTime<Utc>, LedgerError> {
    let secs = cursor
        .read_i64::<LittleEndian>()
        .map_err(|e| LedgerError::internal(e.to_string()))?;
    let nanos = cursor
        .read_u32::<LittleEndian>()
        .map_err(|e| LedgerError::internal(e.to_string()))?;
    Utc.timestamp_opt(secs, nanos)
        .single()
        .ok_or_else(|| LedgerError::internal(format!("invalid instant ({secs}, {nanos})")))
}

pub fn encode(posting: &Posting) -> Result<Vec<u8>, LedgerError> {
    let mut buf = Vec::new();
    buf.extend_from_slice(posting.id.as_bytes());
    write_str(&mut buf, posting.account.as_str())?;
    write_str(&mut buf, &posting.holder)?;
    write_opt_str(&mut buf, &posting.order)?;
    write_opt_str(&mut buf, &posting.item)?;
    write_str(&mut buf, posting.asset.as_str())?;
    write_str(&mut buf, &posting.amount.to_string())?;
    buf.write_i32::<LittleEndian>(posting.status.0)
        .map_err(|e| LedgerError::internal(e.to_string()))?;
    match posting.modified {
        Some(modified) => {
            buf.write_u8(1).map_err(|e| LedgerError::internal(e.to_string()))?;
            write_instant(&mut buf, modified)?;
        }
        None => buf
            .write_u8(0)
            .map_err(|e| LedgerError::internal(e.to_string()))?,
    }
    write_instant(&mut buf, posting.created)?;
    write_opt_str(&mut buf, &posting.reference)?;
    write_opt_str(&mut buf, &posting.user)?;
    Ok(buf)
}

pub fn decode(data: &[u8]) -> Result<Posting, LedgerError> {
    let mut cursor = Cursor::new(data);
    let mut id_bytes = [0u8; 16];
    cursor
        .read_exact(&mut id_bytes)
        .map_err(|e| LedgerError::internal(e.to_string()))?;
    let account = Account(read_str(&mut cursor)?);
    let holder = read_str(&mut cursor)?;
    let order = read_opt_str(&mut cursor)?;
    let item = read_opt_str(&mut cursor)?;
    let asset = Asset(read_str(&mut cursor)?);
    let amount_str = read_str(&mut cursor)?;
    let amount = Decimal::from_str(&amount_str)
        .map_err(|e| LedgerError::internal(format!("invalid amount {amount_str:?}: {e}")))?;
    let status = cursor
        .read_i32::<LittleEndian>()
        .map_err(|e| LedgerError::internal(e.to_string()))?;
    let has_modified = cursor
        .read_u8()
        .map_err(|e| LedgerError::internal(e.to_string()))?;
    let modified = if has_modified == 1 {
        Some(read_instant(&mut cursor)?)
    } else {
        None
    };
    let created = read_instant(&mut cursor)?;
    let reference = read_opt_str(&mut cursor)?;
    let user = read_opt_str(&mut cursor)?;

    Ok(Posting {
        id: PostingId::from_bytes(id_bytes),
        account,
        holder,
        order,
        item,
        asset,
        amount,
        status: Status(status),
        modified,
        created,
        reference,
        user,
        tx: 0,
        key: String::new(),
    })
}
