//! Binary configuration: CLI flags with environment-variable fallbacks,
//! loaded via `dotenvy` before `clap::Parser::parse()` runs. Mirrors the
//! `LiteralOrEnv<T>` indirection the facilitator config uses for signing
//! material, so a private key can be given as a literal or as `$VAR`/`${VAR}`.

use alloy::primitives::B256;
use clap::Parser;
use std::fmt;
use std::net::IpAddr;
use std::ops::Deref;
use std::str::FromStr;

/// A value that is either a literal or an indirection into the process
/// environment (`$VAR` / `${VAR}`), resolved once at parse time.
#[derive(Debug, Clone)]
pub struct LiteralOrEnv<T>(T);

impl<T> Deref for LiteralOrEnv<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> LiteralOrEnv<T> {
    pub fn into_inner(self) -> T {
        self.0
    }

    fn parse_env_var_syntax(s: &str) -> Option<&str> {
        if let Some(stripped) = s.strip_prefix("${") {
            stripped.strip_suffix('}')
        } else if let Some(stripped) = s.strip_prefix('$') {
            stripped.chars().all(|c| c.is_alphanumeric() || c == '_').then_some(stripped)
        } else {
            None
        }
    }
}

impl<T> FromStr for LiteralOrEnv<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let resolved = match Self::parse_env_var_syntax(s) {
            Some(var_name) => std::env::var(var_name)
                .map_err(|_| format!("environment variable '{var_name}' not found (referenced as '{s}')"))?,
            None => s.to_string(),
        };
        resolved.parse::<T>().map(LiteralOrEnv).map_err(|e| e.to_string())
    }
}

/// A validated EVM private key (32 bytes).
#[derive(Clone, Copy, Debug)]
pub struct EvmPrivateKey(pub B256);

impl FromStr for EvmPrivateKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        B256::from_str(s).map(EvmPrivateKey).map_err(|e| format!("invalid private key: {e}"))
    }
}

impl EvmPrivateKey {
    pub fn signer(&self) -> alloy::signers::local::PrivateKeySigner {
        alloy::signers::local::PrivateKeySigner::from_bytes(&self.0).expect("32-byte key is a valid signer")
    }
}

fn default_port() -> u16 {
    8080
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

/// `ivxp-provider` CLI configuration.
#[derive(Parser, Debug)]
#[command(name = "ivxp-provider", about = "IVXP provider HTTP engine")]
pub struct ProviderConfig {
    #[arg(long, env = "PORT", default_value_t = default_port())]
    pub port: u16,

    #[arg(long, env = "HOST", default_value_t = default_host())]
    pub host: IpAddr,

    #[arg(long, env = "RPC_URL_BASE")]
    pub rpc_url_base: Option<url::Url>,

    #[arg(long, env = "RPC_URL_BASE_SEPOLIA")]
    pub rpc_url_base_sepolia: Option<url::Url>,

    /// Wallet the provider receives payment into; literal address or `$VAR`.
    #[arg(long, env = "PROVIDER_WALLET_ADDRESS")]
    pub wallet_address: String,

    #[arg(long, env = "QUOTE_VALIDITY_SECONDS", default_value_t = 300)]
    pub quote_validity_seconds: u64,
}

/// `ivxp-client` CLI configuration.
#[derive(Parser, Debug)]
#[command(name = "ivxp-client", about = "IVXP client orchestration engine")]
pub struct ClientConfig {
    #[arg(long, env = "RPC_URL_BASE")]
    pub rpc_url_base: Option<url::Url>,

    #[arg(long, env = "RPC_URL_BASE_SEPOLIA")]
    pub rpc_url_base_sepolia: Option<url::Url>,

    /// Signing key for outgoing payments; literal hex or `$VAR`/`${VAR}`.
    #[arg(long, env = "PRIVATE_KEY")]
    pub private_key: LiteralOrEnv<EvmPrivateKey>,

    #[arg(long, env = "PROVIDER_URL")]
    pub provider_url: url::Url,

    #[arg(long, env = "SERVICE_TYPE")]
    pub service_type: String,

    #[arg(long, env = "SERVICE_DESCRIPTION")]
    pub service_description: String,

    #[arg(long, env = "BUDGET_USDC")]
    pub budget_usdc: crate::price::PriceUsdc,
}

/// Loads `.env` (if present) before `clap` parses `std::env`/argv, matching
/// the facilitator's startup order.
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn restore_env(key: &str, original: Option<String>) {
        if let Some(value) = original {
            // Safety: guarded by `ENV_LOCK`, so no concurrent environment mutation occurs.
            unsafe { std::env::set_var(key, value) };
        } else {
            // Safety: guarded by `ENV_LOCK`, so no concurrent environment mutation occurs.
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    fn literal_or_env_resolves_literal() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");
        let key: LiteralOrEnv<EvmPrivateKey> =
            "0x0000000000000000000000000000000000000000000000000000000000000001".parse().unwrap();
        assert_eq!(key.0.0, B256::from_str("0x0000000000000000000000000000000000000000000000000000000000000001").unwrap());
    }

    #[test]
    fn literal_or_env_resolves_env_var() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");
        let original = std::env::var("IVXP_TEST_KEY").ok();

        // Safety: guarded by `ENV_LOCK`, so no concurrent environment mutation occurs.
        unsafe {
            std::env::set_var(
                "IVXP_TEST_KEY",
                "0x0000000000000000000000000000000000000000000000000000000000000002",
            );
        }
        let key: LiteralOrEnv<EvmPrivateKey> = "$IVXP_TEST_KEY".parse().unwrap();
        assert_eq!(
            key.0.0,
            B256::from_str("0x0000000000000000000000000000000000000000000000000000000000000002").unwrap()
        );

        restore_env("IVXP_TEST_KEY", original);
    }

    #[test]
    fn literal_or_env_rejects_missing_var() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");
        let original = std::env::var("IVXP_DOES_NOT_EXIST").ok();
        let result: Result<LiteralOrEnv<EvmPrivateKey>, _> = "${IVXP_DOES_NOT_EXIST}".parse();
        assert!(result.is_err());
        restore_env("IVXP_DOES_NOT_EXIST", original);
    }
}
