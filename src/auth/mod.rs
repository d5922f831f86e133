//! Identity and authorization.

mod gate;
mod memory;
mod provider;

pub use gate::{AuthGate, Clearance, GateError};
pub(crate) use gate::PendingAuth;
pub use memory::MemoryAuth;
pub use provider::{
    AuthProvider, ClaimPolicy, Identity, IdentityHandler, IdentitySdk, ModularAuthSdk,
    NamespacedAuthSdk,
};
