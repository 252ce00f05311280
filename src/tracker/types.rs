//! Wire and domain types for tracked transfers.
//!
//! Taostats payloads are deserialized leniently: every field a page may omit
//! is optional, and `amount` tolerates both string and integer JSON
//! encodings. Records are immutable once fetched; the engine only filters
//! and regroups clones of them.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

/// Decimal scale of the chain's smallest unit: 1 TAO = 10^9 RAO.
pub const RAO_DECIMALS: u32 = 9;

/// One page of the upstream transfer feed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransferPage {
    #[serde(default)]
    pub data: Vec<TransferRecord>,
}

/// An account endpoint as the feed reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRef {
    #[serde(default)]
    pub ss58: Option<String>,
}

/// A single observed value movement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecord {
    #[serde(default)]
    pub extrinsic_id: Option<String>,
    #[serde(default)]
    pub block_number: Option<u64>,
    #[serde(default)]
    pub from: Option<AccountRef>,
    #[serde(default)]
    pub to: Option<AccountRef>,
    /// Raw amount in RAO. String-encoded in most API responses.
    #[serde(default, deserialize_with = "amount_from_str_or_int")]
    pub amount: Option<u64>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl TransferRecord {
    pub fn from_ss58(&self) -> Option<&str> {
        self.from.as_ref().and_then(|a| a.ss58.as_deref())
    }

    pub fn to_ss58(&self) -> Option<&str> {
        self.to.as_ref().and_then(|a| a.ss58.as_deref())
    }

    /// Scaled amount in TAO, rounded to 4 decimal places. Zero when the
    /// record carries no amount.
    pub fn tao_value(&self) -> Decimal {
        self.amount
            .and_then(|rao| Decimal::try_from_i128_with_scale(i128::from(rao), RAO_DECIMALS).ok())
            .map(|d| d.round_dp(4))
            .unwrap_or_default()
    }

    /// Content-derived identity: two records are the same transfer only if
    /// extrinsic id, both endpoints, and the raw amount all match. Absent
    /// fields contribute an empty segment.
    pub fn transfer_id(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.extrinsic_id.as_deref().unwrap_or(""),
            self.from_ss58().unwrap_or(""),
            self.to_ss58().unwrap_or(""),
            self.amount.map(|a| a.to_string()).unwrap_or_default(),
        )
    }
}

fn amount_from_str_or_int<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawAmount {
        Int(u64),
        Str(String),
    }

    Ok(match Option::<RawAmount>::deserialize(deserializer)? {
        Some(RawAmount::Int(n)) => Some(n),
        Some(RawAmount::Str(s)) => s.trim().parse().ok(),
        None => None,
    })
}

/// Output of one classification pass over a set of pages.
#[derive(Debug, Clone, Default)]
pub struct ClassifiedTransfers {
    /// Everything that survived treasury filtering, in feed order.
    pub filtered: Vec<TransferRecord>,
    /// Transfers arriving at the tracked address.
    pub inbound: Vec<TransferRecord>,
    /// Transfers leaving the tracked address.
    pub outbound: Vec<TransferRecord>,
}

/// The cached result of a completed fetch-and-classify cycle.
#[derive(Debug, Clone, Serialize)]
pub struct TrackedSnapshot {
    pub total_after_filter: usize,
    pub inbound: Vec<TransferRecord>,
    pub outbound: Vec<TransferRecord>,
}

impl TrackedSnapshot {
    pub fn from_classified(classified: &ClassifiedTransfers) -> Self {
        Self {
            total_after_filter: classified.filtered.len(),
            inbound: classified.inbound.clone(),
            outbound: classified.outbound.clone(),
        }
    }
}

/// A transfer flattened for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct TransferView {
    pub extrinsic_id: Option<String>,
    pub from_ss58: Option<String>,
    pub to_ss58: Option<String>,
    pub amount_tao: Decimal,
    pub timestamp: Option<String>,
}

impl From<&TransferRecord> for TransferView {
    fn from(record: &TransferRecord) -> Self {
        Self {
            extrinsic_id: record.extrinsic_id.clone(),
            from_ss58: record.from_ss58().map(str::to_string),
            to_ss58: record.to_ss58().map(str::to_string),
            amount_tao: record.tao_value(),
            timestamp: record.timestamp.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_accepts_string_and_integer_encodings() {
        let as_str: TransferRecord =
            serde_json::from_str(r#"{"amount": "5000000000"}"#).unwrap();
        let as_int: TransferRecord =
            serde_json::from_str(r#"{"amount": 5000000000}"#).unwrap();
        assert_eq!(as_str.amount, Some(5_000_000_000));
        assert_eq!(as_int.amount, Some(5_000_000_000));
    }

    #[test]
    fn tao_value_scales_and_rounds() {
        let record: TransferRecord =
            serde_json::from_str(r#"{"amount": "2000000000"}"#).unwrap();
        assert_eq!(record.tao_value().to_string(), "2.0000");

        let fractional: TransferRecord =
            serde_json::from_str(r#"{"amount": "1234567891"}"#).unwrap();
        // 1.234567891 TAO rounds to 4 dp
        assert_eq!(fractional.tao_value().to_string(), "1.2346");

        let missing: TransferRecord = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(missing.tao_value(), Decimal::ZERO);
    }

    #[test]
    fn transfer_id_uses_all_four_fields() {
        let record: TransferRecord = serde_json::from_str(
            r#"{"extrinsic_id": "123-4", "from": {"ss58": "5Abc"}, "to": {"ss58": "5Def"}, "amount": "77"}"#,
        )
        .unwrap();
        assert_eq!(record.transfer_id(), "123-4_5Abc_5Def_77");

        let sparse: TransferRecord = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(sparse.transfer_id(), "___");
    }
}
