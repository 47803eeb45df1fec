//! The routing table: frontends, their backends, and the immutable snapshot that groups them.
//!
//! ```text
//! Store --(reload)--> Snapshot { hostname -> Arc<Frontend> }
//!                        Frontend { backends, live_backends }
//!                          Backend --- BackendHealthChecker
//! ```

pub mod backend;
pub mod frontend;
pub mod snapshot;

pub use backend::{Backend, BackendHealthChecker, BackendStatus};
pub use frontend::Frontend;
pub use snapshot::Snapshot;
