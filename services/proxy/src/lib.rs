pub mod config;
pub mod discovery;
pub mod error;
pub mod forward;
pub mod metrics;
pub mod reload;
pub mod routing;
pub mod store;

pub use config::Config;
pub use forward::AppState;
pub use reload::{empty_handle, ReloadPipeline, SnapshotHandle};
