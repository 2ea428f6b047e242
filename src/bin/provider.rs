//! `ivxp-provider` entrypoint.
//!
//! Launches an Axum-based HTTP server exposing the five IVXP provider
//! endpoints (`/catalog`, `/request`, `/deliver`, `/status/{id}`,
//! `/download/{id}`, `/orders/{id}/stream`), backed by an in-memory order
//! store and on-chain payment verification.
//!
//! Environment: `.env` values loaded at startup; `HOST`/`PORT` control the
//! bind address; `RPC_URL_BASE`/`RPC_URL_BASE_SEPOLIA` configure per-network
//! RPC routing.

use async_trait::async_trait;
use clap::Parser;
use std::net::SocketAddr;
use std::process;
use std::sync::Arc;

use ivxp::codec::messages::{ServiceCatalog, ServiceOffering};
use ivxp::config::{self, ProviderConfig};
use ivxp::network::Network;
use ivxp::payment::{NetworkProviders, OnchainPaymentVerifier};
use ivxp::price::PriceUsdc;
use ivxp::provider::{ProcessedDeliverable, ProviderEngine, ServiceHandler, routes};
use ivxp::store::{InMemoryOrderStore, Order};
use ivxp::util::sig_down::SigDown;

/// Built-in reference handler: echoes the order's id and service type back
/// as the deliverable, standing in for a real service integration.
struct EchoHandler;

#[async_trait]
impl ServiceHandler for EchoHandler {
    async fn handle(&self, order: &Order) -> Result<ProcessedDeliverable, String> {
        Ok(ProcessedDeliverable {
            content: format!("processed {} for order {}", order.service_type, order.order_id),
            content_type: "text/plain".to_string(),
        })
    }
}

fn catalog(config: &ProviderConfig) -> ServiceCatalog {
    ServiceCatalog {
        protocol: ivxp::codec::messages::ProtocolV1,
        provider: "ivxp-provider".to_string(),
        wallet_address: config.wallet_address.clone(),
        services: vec![ServiceOffering {
            service_type: "text_echo".to_string(),
            base_price_usdc: PriceUsdc::parse("1.00").expect("valid literal price"),
            estimated_delivery_hours: 1,
            extra: Default::default(),
        }],
        capabilities: Some(vec!["sse".to_string()]),
        timestamp: Some(chrono::Utc::now().to_rfc3339()),
        extra: Default::default(),
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    config::load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ProviderConfig::parse();

    let mut urls = Vec::new();
    if let Some(url) = &config.rpc_url_base {
        urls.push((Network::BaseMainnet, url.clone()));
    }
    if let Some(url) = &config.rpc_url_base_sepolia {
        urls.push((Network::BaseSepolia, url.clone()));
    }
    let providers = NetworkProviders::from_urls(urls);
    let payment_verifier = Arc::new(OnchainPaymentVerifier::new(providers));

    let network = if config.rpc_url_base_sepolia.is_some() {
        Network::BaseSepolia
    } else {
        Network::BaseMainnet
    };

    let engine = Arc::new(ProviderEngine::new(
        catalog(&config),
        Arc::new(InMemoryOrderStore::new()),
        payment_verifier,
        config.wallet_address.clone(),
        network,
    ));
    engine.register_service_handler("text_echo", Arc::new(EchoHandler));

    let app = routes(engine);
    let addr = SocketAddr::new(config.host, config.port);
    tracing::info!(%addr, "starting IVXP provider");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .inspect_err(|e| tracing::error!(%addr, error = %e, "failed to bind"))?;

    let sig_down = SigDown::try_new()?;
    let shutdown_token = sig_down.cancellation_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown_token.cancelled().await })
        .await?;

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{e}");
        process::exit(1);
    }
}
