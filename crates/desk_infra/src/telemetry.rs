use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Installs the global fmt subscriber. `RUST_LOG` wins over `default_directive`.
/// Returns false when a subscriber was already installed.
pub fn init_tracing(default_directive: &str) -> bool {
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer().with_ansi(false).with_target(true).compact();

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .try_init()
        .is_ok()
}
