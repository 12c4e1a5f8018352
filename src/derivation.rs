// Deposit-address derivation via the external signer utility

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::json;

use crate::error::{Error, Result};
use crate::models::canonical_address;

/// Derives the deposit address for a campaign from its sequential index.
/// Deterministic: the same index always yields the same address. Called once
/// per campaign, right after the row is inserted and the index is known.
#[async_trait]
pub trait AddressDeriver: Send + Sync {
    async fn derive(&self, campaign_index: i64) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct DeriveResponse {
    address: String,
}

/// Talks to the external signing utility that holds the mnemonic.
pub struct HttpAddressDeriver {
    http_client: HttpClient,
    base_url: String,
}

impl HttpAddressDeriver {
    pub fn new(base_url: String) -> Self {
        Self {
            http_client: HttpClient::new(),
            base_url,
        }
    }
}

#[async_trait]
impl AddressDeriver for HttpAddressDeriver {
    async fn derive(&self, campaign_index: i64) -> Result<String> {
        if campaign_index < 0 {
            return Err(Error::invalid("campaign index must be non-negative"));
        }
        let payload = json!({ "index": campaign_index });

        let resp = self
            .http_client
            .post(format!("{}/derive", self.base_url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("derivation service: {e}")))?;
        if !resp.status().is_success() {
            return Err(Error::Upstream(format!(
                "derivation service returned {}",
                resp.status()
            )));
        }
        let body: DeriveResponse = resp
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("derivation service body: {e}")))?;

        // The signer must hand back a well-formed address.
        canonical_address(&body.address)
    }
}

/// Deterministic in-process deriver for development and tests. Not a real
/// key derivation; the index is just stretched into 20 pseudo-random bytes.
pub struct StaticDeriver;

#[async_trait]
impl AddressDeriver for StaticDeriver {
    async fn derive(&self, campaign_index: i64) -> Result<String> {
        if campaign_index < 0 {
            return Err(Error::invalid("campaign index must be non-negative"));
        }
        let mut bytes = [0u8; 20];
        let mut acc = campaign_index as u64 ^ 0x5851_f42d_4c95_7f2d;
        for chunk in bytes.chunks_mut(8) {
            acc = acc.wrapping_mul(0x2545_f491_4f6c_dd1d).wrapping_add(1);
            let src = acc.to_be_bytes();
            chunk.copy_from_slice(&src[..chunk.len()]);
        }
        Ok(format!("0x{}", hex::encode(bytes)))
    }
}
