// Domain models and API types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

/// Sentinel deposit address for drafts whose derivation has not completed yet.
pub const PLACEHOLDER_ADDRESS: &str = "0x0";

/// Amount in the smallest currency unit. Wire and storage format is a decimal
/// string, since goals routinely exceed i64 range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Amount(pub u128);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn saturating_add(self, other: Amount) -> Amount {
        Amount(self.0.saturating_add(other.0))
    }

    /// `self - other`, or `None` when the result would go negative.
    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(Error::invalid("amount must not be empty"));
        }
        trimmed
            .parse::<u128>()
            .map(Amount)
            .map_err(|_| Error::invalid(format!("not a non-negative integer amount: {trimmed:?}")))
    }
}

impl Serialize for Amount {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Validate and canonicalize a deposit/contributor address: `0x` followed by
/// 40 hex characters, lowercased. Rejected before any network call is made.
pub fn canonical_address(input: &str) -> Result<String, Error> {
    let lowered = input.trim().to_ascii_lowercase();
    let digits = lowered
        .strip_prefix("0x")
        .ok_or_else(|| Error::invalid("address must start with 0x"))?;
    if digits.len() != 40 {
        return Err(Error::invalid(
            "address must be 0x followed by 40 hex characters",
        ));
    }
    hex::decode(digits).map_err(|_| Error::invalid("address contains non-hex characters"))?;
    Ok(lowered)
}

/// Derived campaign status. Never persisted; recomputed on every read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    Draft,
    Live,
    Successful,
    Failed,
    Finalized,
}

/// Campaign row. Amount columns stay string-typed end to end; use
/// [`Campaign::goal`] / [`Campaign::min_pledge`] for arithmetic.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Campaign {
    pub id: Uuid,
    pub campaign_index: i64,
    pub slug: String,
    pub creator_id: Uuid,
    pub title: String,
    pub summary: String,
    pub deposit_address: String,
    pub chain_id: String,
    pub currency: String,
    pub goal_amount: String,
    pub min_pledge_amount: String,
    pub deadline_at: DateTime<Utc>,
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    pub fn goal(&self) -> Result<Amount, Error> {
        self.goal_amount.parse()
    }

    pub fn min_pledge(&self) -> Result<Amount, Error> {
        self.min_pledge_amount.parse()
    }

    pub fn has_deposit_address(&self) -> bool {
        self.deposit_address != PLACEHOLDER_ADDRESS
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Profile {
    pub id: Uuid,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Wallet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub chain_id: String,
    pub address: String,
    pub is_primary: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CampaignUpdate {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub author_id: Uuid,
    pub title: String,
    pub body_markdown: String,
    pub created_at: DateTime<Utc>,
}

// ---- request / response types ----

#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    pub chain_id: String,
    pub currency: String,
    pub goal_amount: String,
    #[serde(default = "default_min_pledge")]
    pub min_pledge_amount: String,
    pub deadline_at: DateTime<Utc>,
}

fn default_min_pledge() -> String {
    "0".to_string()
}

/// Patch request. Economic fields are only honored while the campaign is a draft.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateCampaignRequest {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub goal_amount: Option<String>,
    pub min_pledge_amount: Option<String>,
    pub deadline_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ContributeRequest {
    pub contributor_address: String,
    pub amount: String,
}

#[derive(Debug, Deserialize)]
pub struct LinkWalletRequest {
    pub chain_id: String,
    pub address: String,
    #[serde(default)]
    pub make_primary: bool,
}

#[derive(Debug, Deserialize)]
pub struct PostUpdateRequest {
    pub title: String,
    pub body_markdown: String,
}

#[derive(Debug, Deserialize)]
pub struct AuthRequest {
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub token: Uuid,
    pub user_id: Uuid,
}

/// Campaign row joined with its freshly derived on-chain state.
#[derive(Debug, Serialize)]
pub struct CampaignView {
    #[serde(flatten)]
    pub campaign: Campaign,
    pub status: CampaignStatus,
    pub total_raised: Amount,
    pub backer_count: u64,
    pub is_finalized: bool,
    /// Requester's own cumulative contribution, when they have a linked wallet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub my_contribution: Option<Amount>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_parses_beyond_u64() {
        let big: Amount = "340282366920938463463374607431768211455".parse().unwrap();
        assert_eq!(big, Amount(u128::MAX));
        let typical: Amount = "1000000".parse().unwrap();
        assert_eq!(typical, Amount(1_000_000));
    }

    #[test]
    fn amount_rejects_junk() {
        assert!("".parse::<Amount>().is_err());
        assert!("-5".parse::<Amount>().is_err());
        assert!("12.5".parse::<Amount>().is_err());
        assert!("1e6".parse::<Amount>().is_err());
        assert!("abc".parse::<Amount>().is_err());
    }

    #[test]
    fn amount_serde_is_string() {
        let json = serde_json::to_string(&Amount(5_000_000)).unwrap();
        assert_eq!(json, "\"5000000\"");
        let back: Amount = serde_json::from_str("\"5000000\"").unwrap();
        assert_eq!(back, Amount(5_000_000));
    }

    #[test]
    fn address_canonicalization() {
        let addr = canonical_address("0xAbCd000000000000000000000000000000001234").unwrap();
        assert_eq!(addr, "0xabcd000000000000000000000000000000001234");

        assert!(canonical_address("abcd000000000000000000000000000000001234").is_err());
        assert!(canonical_address("0x1234").is_err());
        assert!(canonical_address("0xzzzz000000000000000000000000000000001234").is_err());
    }

    #[test]
    fn placeholder_is_not_a_deposit_address() {
        assert!(canonical_address(PLACEHOLDER_ADDRESS).is_err());
    }
}
