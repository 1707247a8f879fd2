//! Log subscriber setup.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// Defaults to `info` (`debug` when the flag is set); `RUST_LOG` still
/// overrides the directive entirely.
pub fn init_tracing(debug: bool) {
    let default_level = if debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(default_level.into()))
        .init();
}
