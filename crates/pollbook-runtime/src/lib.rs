//! Poll Book Runtime - Node orchestration and background loops
//!
//! Ties the other crates into a running machine:
//! - Node: owns the store, registry, and sync engine; runs the sync
//!   and peer-cleanup timers
//! - HTTP layer: the peer-facing API served to other machines, and
//!   the client used to call theirs

pub mod http;
pub mod node;

pub use http::*;
pub use node::*;

/// Install the process-wide subscriber. `RUST_LOG` controls filtering
/// and defaults to `info`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
