//! Stateless nutrition proxy in front of the FatSecret platform API.
//!
//! Each request exchanges the configured client credentials for a bearer
//! token and forwards one or two REST calls, returning the upstream JSON
//! verbatim. Failures come back as `500 {"error": ...}`.

pub mod error;
pub mod fatsecret;
pub mod handlers;
pub mod server;

pub use error::ProxyError;
pub use fatsecret::{FatSecretClient, FatSecretEndpoints};
pub use handlers::ProxyState;
pub use server::{build_router, start, ProxyConfig, ServerHandle};
