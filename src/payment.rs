//! C4 — Payment Verifier.
//!
//! `verify` distinguishes a verification failure (`Ok(false)`: not this
//! payment) from a system error (`Err`: could not decide). Callers rely on
//! that distinction; an operational RPC failure must never be coerced into
//! `Ok(false)`.

use alloy::primitives::{Address, B256, U256, keccak256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::TransactionReceipt;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::network::Network;

static TRANSFER_TOPIC0: Lazy<B256> =
    Lazy::new(|| keccak256(b"Transfer(address,address,uint256)"));

const RPC_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct ExpectedPayment {
    pub from: Address,
    pub to: Address,
    pub amount_base_units: u128,
    pub network: Network,
}

#[derive(Debug, Error)]
pub enum PaymentVerifyError {
    #[error("rpc transport error: {0}")]
    Transport(String),
    #[error("rpc call timed out")]
    Timeout,
    #[error("rate limited by rpc provider")]
    RateLimited,
    #[error("no provider configured for network {0}")]
    NoProvider(Network),
    #[error("malformed tx hash: {0}")]
    MalformedTxHash(String),
}

#[async_trait]
pub trait PaymentVerifier: Send + Sync {
    async fn verify(&self, tx_hash: &str, expected: &ExpectedPayment) -> Result<bool, PaymentVerifyError>;
}

/// Per-network `alloy` provider map, used to look up the right RPC endpoint
/// for an order's network without the caller needing to know about it.
pub trait ProviderMap: Send + Sync {
    type P: Provider + Clone;
    fn by_network(&self, network: Network) -> Option<&Self::P>;
}

pub struct OnchainPaymentVerifier<M: ProviderMap> {
    providers: M,
}

impl<M: ProviderMap> OnchainPaymentVerifier<M> {
    pub fn new(providers: M) -> Self {
        OnchainPaymentVerifier { providers }
    }
}

fn classify_transport_error(err: &impl std::fmt::Display) -> PaymentVerifyError {
    let text = err.to_string();
    let lower = text.to_ascii_lowercase();
    if lower.contains("429") || lower.contains("rate limit") {
        PaymentVerifyError::RateLimited
    } else if lower.contains("timeout") || lower.contains("etimedout") {
        PaymentVerifyError::Timeout
    } else {
        PaymentVerifyError::Transport(text)
    }
}

#[async_trait]
impl<M: ProviderMap + Sync> PaymentVerifier for OnchainPaymentVerifier<M> {
    async fn verify(&self, tx_hash: &str, expected: &ExpectedPayment) -> Result<bool, PaymentVerifyError> {
        let provider = self
            .providers
            .by_network(expected.network)
            .ok_or(PaymentVerifyError::NoProvider(expected.network))?;

        let hash: B256 = tx_hash
            .parse()
            .map_err(|_| PaymentVerifyError::MalformedTxHash(tx_hash.to_string()))?;

        let receipt: Option<TransactionReceipt> = tokio::time::timeout(
            RPC_TIMEOUT,
            provider.get_transaction_receipt(hash),
        )
        .await
        .map_err(|_| PaymentVerifyError::Timeout)?
        .map_err(|e| classify_transport_error(&e))?;

        let Some(receipt) = receipt else {
            return Ok(false);
        };

        if !receipt.status() {
            return Ok(false);
        }

        let usdc_contract = expected.network.usdc_contract();
        let outer_to_matches = receipt
            .to()
            .map(|to| to == usdc_contract)
            .unwrap_or(false);
        if !outer_to_matches {
            return Ok(false);
        }
        if receipt.from != expected.from {
            return Ok(false);
        }

        let expected_amount = U256::from(expected.amount_base_units);
        let has_matching_transfer = receipt.inner.logs().iter().any(|log| {
            log.address() == usdc_contract
                && log.topics().first() == Some(&*TRANSFER_TOPIC0)
                && log.topics().len() == 3
                && Address::from_word(log.topics()[2]) == expected.to
                && U256::from_be_slice(log.data().data.as_ref()) == expected_amount
        });

        Ok(has_matching_transfer)
    }
}

/// A plain per-network read-only provider map, built from the configured RPC
/// URLs. Networks with no configured URL are simply absent from the map.
#[derive(Clone, Default)]
pub struct NetworkProviders {
    providers: HashMap<Network, RootProvider>,
}

impl NetworkProviders {
    pub fn from_urls(urls: impl IntoIterator<Item = (Network, url::Url)>) -> Self {
        let providers = urls
            .into_iter()
            .map(|(network, url)| (network, ProviderBuilder::new().connect_http(url)))
            .collect();
        NetworkProviders { providers }
    }
}

impl ProviderMap for NetworkProviders {
    type P = RootProvider;

    fn by_network(&self, network: Network) -> Option<&RootProvider> {
        self.providers.get(&network)
    }
}

/// Shared-ownership wrapper so the verifier can be cloned into axum state
/// and client-engine tasks alike, mirroring the teacher's blanket
/// `impl<T: Facilitator> Facilitator for Arc<T>`.
#[async_trait]
impl<T: PaymentVerifier + ?Sized> PaymentVerifier for Arc<T> {
    async fn verify(&self, tx_hash: &str, expected: &ExpectedPayment) -> Result<bool, PaymentVerifyError> {
        (**self).verify(tx_hash, expected).await
    }
}
