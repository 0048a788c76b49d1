pub mod errors;
pub mod events;
pub mod host;
pub mod ids;
pub mod security;

pub use errors::TransportError;
pub use events::{ErrorEvent, ErrorReport, PerformanceEvent, QueueKind, QueueSizes};
pub use host::{HostEnvironment, HostSignal, HostSignals, StaticHost};
pub use ids::{SessionId, UserIdPolicy};
pub use security::ClientCredentials;
