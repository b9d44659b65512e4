//! Per-speaker streaming sessions.

pub mod cache;
pub mod client;
pub mod config;
pub mod manager;
pub mod mock;

pub use client::{
    ClientFactory, EventBus, EventSubscription, RealtimeInput, SessionEvent, StreamingClient,
};
pub use config::{LiveConfig, LiveConfigBuilder};
pub use manager::{AcquireRequest, ResetReason, SessionLease, SessionManager};
pub use mock::{MockBehavior, MockClientFactory, MockStep, MockStreamingClient};
