// On-chain capability interface and the in-memory simulation backing it

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::models::{canonical_address, Amount, CampaignStatus};

/// Derive campaign status from first principles. Called on every read so that
/// stored state can never drift from the truth.
///
/// Order matters: the finalized flag dominates everything, then the publish
/// gate, then the deadline, then the raised/goal comparison. `raised == goal`
/// counts as successful.
pub fn derive_status(
    is_published: bool,
    is_finalized: bool,
    now: DateTime<Utc>,
    deadline: DateTime<Utc>,
    raised: Amount,
    goal: Amount,
) -> CampaignStatus {
    if is_finalized {
        CampaignStatus::Finalized
    } else if !is_published {
        CampaignStatus::Draft
    } else if now < deadline {
        CampaignStatus::Live
    } else if raised >= goal {
        CampaignStatus::Successful
    } else {
        CampaignStatus::Failed
    }
}

/// Snapshot of a deposit address's financial state.
#[derive(Debug, Clone, Serialize)]
pub struct ChainState {
    pub total_raised: Amount,
    pub status: CampaignStatus,
    pub is_finalized: bool,
    pub backer_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: String,
}

/// The on-chain settlement surface. Two variants exist: [`MockChain`], the
/// in-memory simulation used as the reference double, and [`HttpChainGateway`]
/// for a real balance endpoint. Constructed once at startup and injected.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Pure read: ledger + finalized flag + supplied goal/deadline, evaluated
    /// against the current wall clock. Never mutates.
    async fn get_state(
        &self,
        address: &str,
        goal: Amount,
        deadline: DateTime<Utc>,
    ) -> Result<ChainState>;

    /// Cumulative contribution of one contributor. Unknown contributors are
    /// zero, not an error.
    async fn get_contribution(&self, address: &str, contributor: &str) -> Result<Amount>;

    /// Irreversible. Second and later calls fail with `AlreadyFinalized`.
    async fn finalize(&self, address: &str) -> Result<TxReceipt>;

    /// Contract only; no variant implements settlement of refunds yet.
    async fn claim_refund(&self, address: &str, contributor: &str) -> Result<TxReceipt>;

    /// Current token balance at the address, smallest currency unit.
    async fn get_balance(&self, address: &str) -> Result<Amount>;
}

#[derive(Debug, Default)]
struct AddressState {
    ledger: HashMap<String, Amount>,
    finalized: bool,
}

impl AddressState {
    // Saturates instead of skipping entries, so the total never undercounts
    // the ledger even if the sum exceeds u128 range.
    fn total(&self) -> Amount {
        self.ledger
            .values()
            .fold(Amount::ZERO, |acc, v| acc.saturating_add(*v))
    }

    fn backer_count(&self) -> u64 {
        self.ledger.values().filter(|v| !v.is_zero()).count() as u64
    }
}

/// In-memory chain simulation. Each operation sleeps for a short random
/// interval to model the network round-trip of the real gateway.
pub struct MockChain {
    inner: Mutex<HashMap<String, AddressState>>,
    latency_ms: Option<std::ops::Range<u64>>,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            latency_ms: Some(30..150),
        }
    }

    /// No simulated latency; used by tests.
    pub fn instant() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            latency_ms: None,
        }
    }

    async fn simulate_latency(&self) {
        if let Some(range) = &self.latency_ms {
            let ms = rand::thread_rng().gen_range(range.clone());
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    /// Deposit path of the simulation: credit `amount` to the contributor's
    /// ledger entry. The read-modify-write runs under the lock so concurrent
    /// contributions cannot lose an update. Returns the new cumulative amount.
    pub async fn credit(&self, address: &str, contributor: &str, amount: Amount) -> Result<Amount> {
        self.simulate_latency().await;
        let address = address.to_ascii_lowercase();
        let contributor = contributor.to_ascii_lowercase();

        let mut inner = self.inner.lock().expect("mock chain lock poisoned");
        let state = inner.entry(address).or_default();
        let entry = state.ledger.entry(contributor).or_insert(Amount::ZERO);
        *entry = entry
            .checked_add(amount)
            .ok_or_else(|| Error::invalid("contribution overflows the ledger"))?;
        Ok(*entry)
    }
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainAdapter for MockChain {
    async fn get_state(
        &self,
        address: &str,
        goal: Amount,
        deadline: DateTime<Utc>,
    ) -> Result<ChainState> {
        self.simulate_latency().await;
        let inner = self.inner.lock().expect("mock chain lock poisoned");
        let (total, finalized, backers) = match inner.get(&address.to_ascii_lowercase()) {
            Some(state) => (state.total(), state.finalized, state.backer_count()),
            None => (Amount::ZERO, false, 0),
        };
        Ok(ChainState {
            total_raised: total,
            status: derive_status(true, finalized, Utc::now(), deadline, total, goal),
            is_finalized: finalized,
            backer_count: backers,
        })
    }

    async fn get_contribution(&self, address: &str, contributor: &str) -> Result<Amount> {
        self.simulate_latency().await;
        let inner = self.inner.lock().expect("mock chain lock poisoned");
        Ok(inner
            .get(&address.to_ascii_lowercase())
            .and_then(|state| state.ledger.get(&contributor.to_ascii_lowercase()))
            .copied()
            .unwrap_or(Amount::ZERO))
    }

    async fn finalize(&self, address: &str) -> Result<TxReceipt> {
        self.simulate_latency().await;
        let mut inner = self.inner.lock().expect("mock chain lock poisoned");
        let state = inner.entry(address.to_ascii_lowercase()).or_default();
        if state.finalized {
            return Err(Error::AlreadyFinalized);
        }
        state.finalized = true;

        let mut bytes = [0u8; 32];
        rand::thread_rng().fill(&mut bytes);
        Ok(TxReceipt {
            tx_hash: format!("0x{}", hex::encode(bytes)),
        })
    }

    async fn claim_refund(&self, _address: &str, _contributor: &str) -> Result<TxReceipt> {
        self.simulate_latency().await;
        Err(Error::NotImplemented(
            "refund claims are not available on this chain yet",
        ))
    }

    async fn get_balance(&self, address: &str) -> Result<Amount> {
        self.simulate_latency().await;
        let inner = self.inner.lock().expect("mock chain lock poisoned");
        Ok(inner
            .get(&address.to_ascii_lowercase())
            .map(|state| state.total())
            .unwrap_or(Amount::ZERO))
    }
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance: String,
}

/// Real balance endpoint. Only `get_balance` is wired up; the settlement
/// operations stay on the mock until an on-chain program exists.
pub struct HttpChainGateway {
    http_client: HttpClient,
    base_url: String,
}

impl HttpChainGateway {
    pub fn new(base_url: String) -> Self {
        Self {
            http_client: HttpClient::new(),
            base_url,
        }
    }
}

#[async_trait]
impl ChainAdapter for HttpChainGateway {
    async fn get_state(
        &self,
        _address: &str,
        _goal: Amount,
        _deadline: DateTime<Utc>,
    ) -> Result<ChainState> {
        Err(Error::NotImplemented(
            "chain state queries require the settlement program",
        ))
    }

    async fn get_contribution(&self, _address: &str, _contributor: &str) -> Result<Amount> {
        Err(Error::NotImplemented(
            "contribution queries require the settlement program",
        ))
    }

    async fn finalize(&self, _address: &str) -> Result<TxReceipt> {
        Err(Error::NotImplemented(
            "finalization requires the settlement program",
        ))
    }

    async fn claim_refund(&self, _address: &str, _contributor: &str) -> Result<TxReceipt> {
        Err(Error::NotImplemented(
            "refund claims are not available on this chain yet",
        ))
    }

    async fn get_balance(&self, address: &str) -> Result<Amount> {
        // Validation happens before the network call.
        let address = canonical_address(address)?;
        let url = format!("{}/balance/{}", self.base_url, address);

        let resp = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("balance gateway: {e}")))?;
        if !resp.status().is_success() {
            return Err(Error::Upstream(format!(
                "balance gateway returned {}",
                resp.status()
            )));
        }
        let body: BalanceResponse = resp
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("balance gateway body: {e}")))?;
        body.balance.parse()
    }
}

/// Simulation state plus real balances: settlement and the ledger stay on the
/// in-memory simulation while `get_balance` polls the configured gateway.
/// This is the shape a deployment takes before the settlement program exists.
pub struct GatewayBackedChain {
    simulation: std::sync::Arc<MockChain>,
    gateway: HttpChainGateway,
}

impl GatewayBackedChain {
    pub fn new(simulation: std::sync::Arc<MockChain>, gateway_url: String) -> Self {
        Self {
            simulation,
            gateway: HttpChainGateway::new(gateway_url),
        }
    }
}

#[async_trait]
impl ChainAdapter for GatewayBackedChain {
    async fn get_state(
        &self,
        address: &str,
        goal: Amount,
        deadline: DateTime<Utc>,
    ) -> Result<ChainState> {
        self.simulation.get_state(address, goal, deadline).await
    }

    async fn get_contribution(&self, address: &str, contributor: &str) -> Result<Amount> {
        self.simulation.get_contribution(address, contributor).await
    }

    async fn finalize(&self, address: &str) -> Result<TxReceipt> {
        self.simulation.finalize(address).await
    }

    async fn claim_refund(&self, address: &str, contributor: &str) -> Result<TxReceipt> {
        self.simulation.claim_refund(address, contributor).await
    }

    async fn get_balance(&self, address: &str) -> Result<Amount> {
        self.gateway.get_balance(address).await
    }
}
