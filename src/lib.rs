//! IVXP — a peer-to-peer paid-service exchange protocol between autonomous
//! agents, built from the leaf components up: wire codec, order store,
//! payment/signature verification, the provider HTTP engine, the client
//! orchestration engine, and the delivery channels (SSE, backoff poller,
//! push-callback receiver).

pub mod client;
pub mod codec;
pub mod config;
pub mod delivery;
pub mod error;
pub mod network;
pub mod payment;
pub mod price;
pub mod provider;
pub mod signature;
pub mod store;
pub mod trace_id;
pub mod util;

pub use trace_id::TraceId;
