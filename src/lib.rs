//! # Storefront Live
//!
//! Real-time collection subscriptions for the storefront and admin UI.
//!
//! ## Core Concepts
//!
//! - **Dedup**: one remote watch per collection, shared by every callback
//! - **Late-join replay**: new callbacks get the cached snapshot (or one fetch)
//! - **Auth gate**: first subscriptions wait for an identity, and restricted
//!   collections for an authorization claim
//! - **Lifecycle**: `init` waits for the remote store, `cleanup` tears down
//!
//! ## Example
//!
//! ```ignore
//! use storefront_live::{MemoryAuth, MemoryStore, Multiplexer, MuxConfig, QueryOptions};
//! use std::sync::Arc;
//!
//! let mux = Multiplexer::new(
//!     Arc::new(MemoryStore::ready()),
//!     Arc::new(MemoryAuth::new()),
//!     MuxConfig::default(),
//! );
//! mux.init().await?;
//!
//! let unsubscribe = mux.subscribe(
//!     "products",
//!     |delivery| {
//!         if let Ok(snapshot) = delivery {
//!             println!("{} products", snapshot.len());
//!         }
//!     },
//!     QueryOptions::new().order_by("name"),
//! );
//! ```

pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod multiplexer;
pub mod remote;
pub mod subscriptions;
pub mod types;
pub mod wait;

// Re-exports
pub use auth::{
    AuthGate, AuthProvider, ClaimPolicy, Identity, IdentityHandler, IdentitySdk, MemoryAuth,
    ModularAuthSdk, NamespacedAuthSdk,
};
pub use cache::SnapshotCache;
pub use config::MuxConfig;
pub use error::{AuthError, MuxError, RemoteError, RemoteErrorKind, Result};
pub use multiplexer::Multiplexer;
pub use remote::{CallStats, MemoryStore, RemoteStore, WatchEvent, WatchHandler};
pub use subscriptions::{Callback, CallbackId, Delivery, MuxStatus, SubscriptionSpec};
pub use types::*;
pub use wait::{wait_until_ready, WaitError, WaitPolicy};
