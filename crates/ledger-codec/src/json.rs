use chrono::{DateTime, Utc};
use ledger_core::account::Account;
use ledger_core::types::{Asset, PostingId, Status};
use ledger_core::{LedgerError, Posting};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Wire shape for the JSON payload format: `Amount` travels as a decimal
/// string so no precision is lost going through a JSON number.
#[derive(Serialize, Deserialize)]
struct PostingJson {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Account")]
    account: String,
    #[serde(rename = "Holder")]
    holder: String,
    #[serde(rename = "Order", skip_serializing_if = "Option::is_none", default)]
    order: Option<String>,
    #[serde(rename = "Item", skip_serializing_if = "Option::is_none", default)]
    item: Option<String>,
    #[serde(rename = "Asset")]
    asset: String,
    #[serde(rename = "Amount")]
    amount: String,
    #[serde(rename = "Status")]
    status: i32,
    #[serde(rename = "Modified", skip_serializing_if = "Option::is_none", default)]
    modified: Option<DateTime<Utc>>,
    #[serde(rename = "Created")]
    created: DateTime<Utc>,
    #[serde(
        rename = "Reference",
        skip_serializing_if = "Option::is_none",
        default
    )]
    reference: Option<String>,
    #[serde(rename = "User", skip_serializing_if = "Option::is_none", default)]
    user: Option<String>,
}

pub fn encode(posting: &Posting) -> Result<Vec<u8>, LedgerError> {
    let wire = PostingJson {
        id: posting.id.to_dashed(),
        account: posting.account.as_str().to_string(),
        holder: posting.holder.clone(),
        order: posting.order.clone(),
        item: posting.item.clone(),
        asset: posting.asset.as_str().to_string(),
        amount: posting.amount.to_string(),
        status: posting.status.0,
        modified: posting.modified,
        created: posting.created,
        reference: posting.reference.clone(),
        user: posting.user.clone(),
    };
    serde_json::to_vec(&wire).map_err(|e| LedgerError::internal(format!("json encode: {e}")))
}

pub fn decode(data: &[u8]) -> Result<Posting, LedgerError> {
    let wire: PostingJson =
        serde_json::from_slice(data).map_err(|e| LedgerError::internal(format!("json decode: {e}")))?;
    let id = PostingId::parse_any(&wire.id).map_err(LedgerError::internal)?;
    let amount = Decimal::from_str(&wire.amount)
        .map_err(|e| LedgerError::internal(format!("invalid amount {:?}: {e}", wire.amount)))?;
    Ok(Posting {
        id,
        account: Account(wire.account),
        holder: wire.holder,
        order: wire.order,
        item: wire.item,
        asset: Asset(wire.asset),
        amount,
        status: Status(wire.status),
        modified: wire.modified,
        created: wire.created,
        reference: wire.reference,
        user: wire.user,
        tx: 0,
        key: String::new(),
    })
}
