//! nftsync-rpc: provider adapter over Ethereum JSON-RPC.
//!
//! - [`http::HttpProvider`]: `eth_blockNumber` / `eth_getLogs` over HTTP,
//!   with per-call timeouts and exponential-backoff retry
//! - [`ws::WsProvider`]: `eth_subscribe("logs")` over WebSocket, with
//!   bounded reconnect and automatic re-subscribe
//!
//! Both sit behind the [`LogProvider`] and [`LogSubscriber`] traits so the
//! engines can be driven by in-memory fakes in tests.

pub mod http;
pub mod provider;
pub mod request;
pub mod retry;
pub mod subscriptions;
pub mod ws;

pub use http::{HttpProvider, HttpProviderConfig};
pub use provider::{LogFilter, LogNotification, LogProvider, LogSubscriber, LogSubscription, SubscriptionFilter};
pub use retry::{RetryConfig, RetryPolicy};
pub use ws::{WsProvider, WsProviderConfig};
