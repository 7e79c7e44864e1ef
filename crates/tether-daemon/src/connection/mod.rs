mod backoff;
mod cancellation;
mod circuit;
mod classify;
mod link;
mod manager;
mod reachability;
mod registry;
mod state;

pub use backoff::{apply_jitter, backoff_after, BackoffState};
pub use cancellation::{CancellationToken, ShutdownSignal};
pub use circuit::CircuitBreaker;
pub use classify::{classify, ErrorClass, FATAL_ERROR_PATTERNS};
pub use link::ControlPlaneLink;
pub use manager::{ConnectionManager, ConnectionSettings};
pub use reachability::{AlwaysReachable, ReachabilityCheck, TcpReachability};
pub use registry::{WorkerRegistry, WorkerStatus};
pub use state::{ConnectionSnapshot, ListenerId, StateChange, StateListener};
