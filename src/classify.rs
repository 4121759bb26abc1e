//! Transaction classification
//!
//! Turns a fetched transaction into zero, one or two `TransferEvent`s for
//! watched addresses. A transaction whose input starts with the ERC20
//! `transfer(address,uint256)` selector is read as a token transfer to the
//! address in the call data; anything else is a native transfer of `value`.
//! Contract creations are ignored.

use crate::types::{TokenMetadata, Transaction};
use alloy_primitives::{Address, U256};
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;

/// `transfer(address,uint256)`
pub const ERC20_TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

/// Native coin amounts are in wei.
pub const NATIVE_DECIMALS: u8 = 18;

/// selector (4) + address word (32) + amount word (32)
const TRANSFER_CALLDATA_LEN: usize = 4 + 32 + 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferKind {
    SendNative,
    ReceiveNative,
    SendToken,
    ReceiveToken,
}

impl TransferKind {
    pub fn is_send(&self) -> bool {
        matches!(self, TransferKind::SendNative | TransferKind::SendToken)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferKind::SendNative => "send-native",
            TransferKind::ReceiveNative => "receive-native",
            TransferKind::SendToken => "send-token",
            TransferKind::ReceiveToken => "receive-token",
        }
    }
}

/// Value movement decoded from a transaction, before watchlist matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTransfer {
    pub from: Address,
    /// Recipient: `tx.to` for native transfers, the call-data address for tokens
    pub to: Address,
    /// Raw amount in the smallest unit
    pub amount: U256,
    /// Token contract, `None` for native transfers
    pub token: Option<Address>,
}

impl DecodedTransfer {
    /// Whether either side is in the lower-cased `watched` set.
    pub fn touches(&self, watched: &HashSet<String>) -> bool {
        watched.contains(&format!("0x{:x}", self.from))
            || watched.contains(&format!("0x{:x}", self.to))
    }
}

/// Token a transfer was denominated in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    pub contract: String,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// A detected value movement touching a watched address.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferEvent {
    pub symbol: String,
    pub network: String,
    pub from: String,
    pub to: String,
    /// Human-readable amount, scaled by the coin's or token's decimals
    pub value: String,
    pub kind: TransferKind,
    pub source_tx_hash: String,
    pub token: Option<TokenInfo>,
    /// The source transaction as plain JSON, forwarded to webhooks
    pub raw_data: Value,
}

impl TransferEvent {
    /// The watched side of this event: `from` for sends, `to` for receives.
    pub fn watched_address(&self) -> &str {
        if self.kind.is_send() {
            &self.from
        } else {
            &self.to
        }
    }
}

/// Decode the value movement of a transaction.
///
/// Returns `Ok(None)` for contract creations and an error for ERC20
/// transfer calls with truncated call data.
pub fn decode_transfer(tx: &Transaction) -> Result<Option<DecodedTransfer>> {
    let Some(to) = tx.to else {
        return Ok(None);
    };

    if tx.input.len() >= 4 && tx.input[..4] == ERC20_TRANSFER_SELECTOR {
        if tx.input.len() < TRANSFER_CALLDATA_LEN {
            anyhow::bail!(
                "ERC20 transfer call data too short: {} bytes",
                tx.input.len()
            );
        }
        // address is right-aligned in its 32-byte word
        let recipient = Address::from_slice(&tx.input[16..36]);
        let amount = U256::from_be_slice(&tx.input[36..68]);
        return Ok(Some(DecodedTransfer {
            from: tx.from,
            to: recipient,
            amount,
            token: Some(to),
        }));
    }

    Ok(Some(DecodedTransfer {
        from: tx.from,
        to,
        amount: tx.value,
        token: None,
    }))
}

/// Produce events for the watched sides of a decoded transfer.
///
/// `watched` holds lower-cased addresses. `token` must be provided when the
/// transfer is token-denominated. Sends are emitted before receives.
pub fn classify(
    symbol: &str,
    network: &str,
    tx: &Transaction,
    transfer: &DecodedTransfer,
    token: Option<&TokenMetadata>,
    watched: &HashSet<String>,
) -> Result<Vec<TransferEvent>> {
    let from = format!("0x{:x}", transfer.from);
    let to = format!("0x{:x}", transfer.to);

    let send_watched = watched.contains(&from);
    let receive_watched = watched.contains(&to);
    if !send_watched && !receive_watched {
        return Ok(Vec::new());
    }

    let (value, token_info, send_kind, receive_kind) = match transfer.token {
        Some(contract) => {
            let meta = token.with_context(|| {
                format!("Missing metadata for token 0x{:x}", contract)
            })?;
            (
                format_units(transfer.amount, meta.decimals)?,
                Some(TokenInfo {
                    contract: format!("0x{:x}", contract),
                    name: meta.name.clone(),
                    symbol: meta.symbol.clone(),
                    decimals: meta.decimals,
                }),
                TransferKind::SendToken,
                TransferKind::ReceiveToken,
            )
        }
        None => (
            format_units(transfer.amount, NATIVE_DECIMALS)?,
            None,
            TransferKind::SendNative,
            TransferKind::ReceiveNative,
        ),
    };

    let raw_data = raw_transaction(tx);
    let source_tx_hash = format!("0x{:x}", tx.hash);
    let event = |kind| TransferEvent {
        symbol: symbol.to_string(),
        network: network.to_string(),
        from: from.clone(),
        to: to.clone(),
        value: value.clone(),
        kind,
        source_tx_hash: source_tx_hash.clone(),
        token: token_info.clone(),
        raw_data: raw_data.clone(),
    };

    let mut events = Vec::with_capacity(2);
    if send_watched {
        events.push(event(send_kind));
    }
    if receive_watched {
        events.push(event(receive_kind));
    }
    Ok(events)
}

/// Plain JSON view of a transaction.
pub fn raw_transaction(tx: &Transaction) -> Value {
    json!({
        "hash": format!("0x{:x}", tx.hash),
        "from": format!("0x{:x}", tx.from),
        "to": tx.to.map(|to| format!("0x{:x}", to)),
        "value": tx.value.to_string(),
        "input": format!("0x{}", hex::encode(&tx.input)),
    })
}

/// 10^decimals as a U256.
fn ten_pow(decimals: u8) -> Result<U256> {
    let ten = U256::from(10u64);
    let mut base = U256::from(1u64);
    for _ in 0..decimals {
        base = base
            .checked_mul(ten)
            .with_context(|| format!("10^{} does not fit in 256 bits", decimals))?;
    }
    Ok(base)
}

/// Scale an integer amount down by `decimals` into a decimal string.
///
/// Exact for the full U256 range: `2_000_000_000_000_000_000` with 18
/// decimals is `"2"`, `1_500_000` with 6 decimals is `"1.5"`.
pub fn format_units(amount: U256, decimals: u8) -> Result<String> {
    let base = ten_pow(decimals)?;
    let whole = amount / base;
    let frac = amount % base;
    if frac.is_zero() {
        return Ok(whole.to_string());
    }
    let frac = format!("{:0>width$}", frac.to_string(), width = decimals as usize);
    Ok(format!("{}.{}", whole, frac.trim_end_matches('0')))
}
