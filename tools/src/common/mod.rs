//! Shared functionality of the pairprep tools.

pub mod backend;
pub mod image;
pub mod stats;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use backend::{create_device, SelectedBackend, SelectedDevice, BACKEND_NAME};
pub use stats::{StatisticsAccumulator, TensorStats};

/// Install a stderr subscriber filtered by `RUST_LOG`, defaulting to info
/// for the library and the calling binary.
pub fn init_tracing(bin: &str) {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("pairprep=info,{bin}=info,warn").into()),
        )
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
