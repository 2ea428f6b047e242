//! Capability abstractions the Client Engine is built against (spec §9,
//! "dependency injection of chain/crypto/storage"): `PaymentService` and
//! `CryptoService`. Default implementations wrap an `alloy` signer and
//! provider; tests inject mocks instead.

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::signers::Signer;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

use crate::network::Network;
use crate::price::PriceUsdc;

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function transfer(address to, uint256 amount) external returns (bool);
        function balanceOf(address account) external view returns (uint256);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Success,
    Reverted,
    Pending,
}

#[derive(Debug, Error)]
pub enum PaymentServiceError {
    #[error("no rpc configured for network {0}")]
    NoProvider(Network),
    #[error("rpc transport error: {0}")]
    Transport(String),
    #[error("transaction submission failed: {0}")]
    SubmissionFailed(String),
}

#[async_trait]
pub trait PaymentService: Send + Sync {
    async fn get_balance(&self, network: Network) -> Result<PriceUsdc, PaymentServiceError>;
    /// Submits a USDC transfer and returns the tx hash once broadcast
    /// (does not itself wait for confirmation).
    async fn send(&self, to: &str, amount: PriceUsdc, network: Network) -> Result<String, PaymentServiceError>;
    async fn get_receipt_status(&self, tx_hash: &str, network: Network) -> Result<TxStatus, PaymentServiceError>;
}

#[derive(Debug, Error)]
pub enum CryptoServiceError {
    #[error("signing failed: {0}")]
    SigningFailed(String),
}

#[async_trait]
pub trait CryptoService: Send + Sync {
    fn address(&self) -> String;
    async fn sign_message(&self, message: &str) -> Result<String, CryptoServiceError>;
}

/// Default [`CryptoService`]: an in-process `alloy` local signer.
pub struct LocalCryptoService {
    signer: PrivateKeySigner,
}

impl LocalCryptoService {
    pub fn new(signer: PrivateKeySigner) -> Self {
        LocalCryptoService { signer }
    }
}

#[async_trait]
impl CryptoService for LocalCryptoService {
    fn address(&self) -> String {
        format!("{:#x}", self.signer.address())
    }

    async fn sign_message(&self, message: &str) -> Result<String, CryptoServiceError> {
        let signature = self
            .signer
            .sign_message(message.as_bytes())
            .await
            .map_err(|e| CryptoServiceError::SigningFailed(e.to_string()))?;
        Ok(format!("0x{}", hex::encode(signature.as_bytes())))
    }
}

/// Default [`PaymentService`]: submits real ERC-20 `transfer` calls against
/// a per-network `alloy` provider, wallet-filled with the same signing key
/// used by [`LocalCryptoService`] (grounded on the teacher's
/// `ProviderCache`/`EvmProvider` per-network routing).
pub struct AlloyPaymentService {
    providers: HashMap<Network, Box<dyn Provider>>,
    owner: Address,
}

impl AlloyPaymentService {
    pub async fn connect(
        signer: PrivateKeySigner,
        rpc_urls: HashMap<Network, url::Url>,
    ) -> Result<Self, PaymentServiceError> {
        let owner = signer.address();
        let wallet = EthereumWallet::from(signer);
        let mut providers: HashMap<Network, Box<dyn Provider>> = HashMap::new();
        for (network, url) in rpc_urls {
            let provider = ProviderBuilder::new().wallet(wallet.clone()).connect_http(url);
            providers.insert(network, Box::new(provider));
        }
        Ok(AlloyPaymentService { providers, owner })
    }

    fn provider(&self, network: Network) -> Result<&dyn Provider, PaymentServiceError> {
        self.providers
            .get(&network)
            .map(|p| p.as_ref())
            .ok_or(PaymentServiceError::NoProvider(network))
    }
}

#[async_trait]
impl PaymentService for AlloyPaymentService {
    async fn get_balance(&self, network: Network) -> Result<PriceUsdc, PaymentServiceError> {
        let provider = self.provider(network)?;
        let contract = IERC20::new(network.usdc_contract(), provider);
        let balance = contract
            .balanceOf(self.owner)
            .call()
            .await
            .map_err(|e| PaymentServiceError::Transport(e.to_string()))?;
        Ok(PriceUsdc::from_base_units(balance.to::<u128>()))
    }

    async fn send(&self, to: &str, amount: PriceUsdc, network: Network) -> Result<String, PaymentServiceError> {
        let provider = self.provider(network)?;
        let to_address: Address = to
            .parse()
            .map_err(|_| PaymentServiceError::SubmissionFailed("malformed recipient address".into()))?;
        let contract = IERC20::new(network.usdc_contract(), provider);
        let pending = contract
            .transfer(to_address, U256::from(amount.to_base_units()))
            .send()
            .await
            .map_err(|e| PaymentServiceError::SubmissionFailed(e.to_string()))?;
        Ok(format!("{:#x}", *pending.tx_hash()))
    }

    async fn get_receipt_status(&self, tx_hash: &str, network: Network) -> Result<TxStatus, PaymentServiceError> {
        let provider = self.provider(network)?;
        let hash = tx_hash
            .parse()
            .map_err(|_| PaymentServiceError::Transport("malformed tx hash".into()))?;
        match provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| PaymentServiceError::Transport(e.to_string()))?
        {
            Some(receipt) if receipt.status() => Ok(TxStatus::Success),
            Some(_) => Ok(TxStatus::Reverted),
            None => Ok(TxStatus::Pending),
        }
    }
}
