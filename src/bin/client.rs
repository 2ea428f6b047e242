//! `ivxp-client` entrypoint.
//!
//! Drives a single `request_service` exchange against a provider: fetches
//! the catalog, requests a quote, pays it on-chain, signs and submits the
//! delivery proof, waits for delivery (SSE with polling fallback), verifies
//! the content hash, and prints the final record.
//!
//! Environment: `.env` values loaded at startup; `PRIVATE_KEY` (literal hex
//! or `$VAR`/`${VAR}`) signs payments and delivery proofs; `PROVIDER_URL`,
//! `SERVICE_TYPE`, `SERVICE_DESCRIPTION`, `BUDGET_USDC` describe the request.

use clap::Parser;
use std::collections::HashMap;
use std::process;
use std::sync::Arc;

use ivxp::client::capabilities::{AlloyPaymentService, LocalCryptoService};
use ivxp::client::{ClientEngine, RequestServiceInput};
use ivxp::config::{self, ClientConfig};
use ivxp::network::Network;

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    config::load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ClientConfig::parse();
    let signer = config.private_key.signer();

    let mut rpc_urls = HashMap::new();
    if let Some(url) = &config.rpc_url_base {
        rpc_urls.insert(Network::BaseMainnet, url.clone());
    }
    if let Some(url) = &config.rpc_url_base_sepolia {
        rpc_urls.insert(Network::BaseSepolia, url.clone());
    }

    let crypto_service = Arc::new(LocalCryptoService::new(signer.clone()));
    let payment_service = Arc::new(AlloyPaymentService::connect(signer, rpc_urls).await?);

    let engine = ClientEngine::new(payment_service, crypto_service);

    let outcome = engine
        .request_service(RequestServiceInput {
            provider_url: config.provider_url,
            service_type: config.service_type,
            description: config.service_description,
            budget_usdc: config.budget_usdc,
            client_name: "ivxp-client".to_string(),
        })
        .await?;

    println!("{}", serde_json::to_string_pretty(&serde_json::json!({
        "order_id": outcome.order_id,
        "status": outcome.status,
        "payment_tx_hash": outcome.payment_tx_hash,
        "content_hash": outcome.content_hash,
        "content": outcome.content,
    }))?);

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{e}");
        process::exit(1);
    }
}
