// Environment-driven configuration

use anyhow::Result;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub server_port: u16,
    /// Base URL of the external signer that derives deposit addresses. When
    /// unset, the deterministic in-process deriver is used.
    pub derivation_url: Option<String>,
    /// Base URL of the real balance gateway. When set, balances are polled
    /// from it; settlement and the ledger stay on the in-memory simulation
    /// either way.
    pub balance_gateway_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/stablefund".to_string());
        let server_port = std::env::var("PORT")
            .unwrap_or_else(|_| "4000".to_string())
            .parse::<u16>()?;
        let derivation_url = std::env::var("DERIVATION_URL").ok();
        let balance_gateway_url = std::env::var("BALANCE_GATEWAY_URL").ok();

        Ok(Self {
            database_url,
            server_port,
            derivation_url,
            balance_gateway_url,
        })
    }
}
