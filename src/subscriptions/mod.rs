//! Deduplicated collection subscriptions.
//!
//! Any number of callbacks may subscribe to a collection; the registry keeps
//! exactly one remote watch per collection while at least one callback is
//! registered, and fans every delivery out to all of them:
//! - Late joiners replay the cached snapshot, or one one-shot fetch
//! - First subscribers pass through the authentication gate
//! - Errors reach only the callbacks of the failing collection
//!
//! # Example
//!
//! ```ignore
//! let unsubscribe = mux.subscribe(
//!     "orders",
//!     |delivery| match delivery {
//!         Ok(snapshot) => println!("{} orders", snapshot.len()),
//!         Err(err) => eprintln!("orders unavailable: {err}"),
//!     },
//!     QueryOptions::new().order_by_desc("createdAt").limit(50),
//! );
//!
//! // Later
//! unsubscribe.unsubscribe();
//! ```

mod dispatch;
mod registry;
mod types;

pub(crate) use registry::Registry;
pub(crate) use types::Registration;
pub use types::{Callback, CallbackId, Delivery, MuxStatus, SubscriptionSpec};
