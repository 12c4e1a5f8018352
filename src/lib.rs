// Crowdfunding backend: campaigns funded by stablecoin deposits to
// per-campaign addresses, with status derived from an on-chain balance.

pub mod chain;
pub mod config;
pub mod derivation;
pub mod error;
pub mod handlers;
pub mod models;
pub mod reconciler;
pub mod repository;
pub mod service;

use std::sync::Arc;

use chain::{ChainAdapter, GatewayBackedChain, MockChain};
use config::Config;
use derivation::{AddressDeriver, HttpAddressDeriver, StaticDeriver};
use reconciler::{ActivityFeed, WatcherRegistry};
use repository::DbPool;

/// Application state shared across handlers. The gateway bundle is built once
/// at startup and injected; nothing in here is a process-wide singleton.
pub struct AppState {
    pub db: DbPool,
    pub chain: Arc<dyn ChainAdapter>,
    /// Present only when the chain surface is the in-memory simulation; backs
    /// the contribute route.
    pub simulator: Option<Arc<MockChain>>,
    pub deriver: Arc<dyn AddressDeriver>,
    pub watchers: WatcherRegistry,
    pub feed: Arc<ActivityFeed>,
}

impl AppState {
    /// Wire up the gateway bundle from configuration: real HTTP collaborators
    /// when their URLs are configured, the simulation otherwise. Settlement
    /// and the ledger always run on the simulation; a configured balance
    /// gateway only replaces where balances are polled from.
    pub fn from_config(db: DbPool, config: &Config) -> Self {
        let mock = Arc::new(MockChain::new());
        let chain: Arc<dyn ChainAdapter> = match &config.balance_gateway_url {
            Some(url) => Arc::new(GatewayBackedChain::new(mock.clone(), url.clone())),
            None => mock.clone(),
        };
        let simulator = Some(mock);

        let deriver: Arc<dyn AddressDeriver> = match &config.derivation_url {
            Some(url) => Arc::new(HttpAddressDeriver::new(url.clone())),
            None => Arc::new(StaticDeriver),
        };

        Self {
            db,
            chain,
            simulator,
            deriver,
            watchers: WatcherRegistry::new(),
            feed: Arc::new(ActivityFeed::new()),
        }
    }
}
