//! Tracing initialization.

use std::sync::Once;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static INIT: Once = Once::new();

/// Install the global `tracing` subscriber.
///
/// Filter directives come from `LINKGRAPH_LOG` (for example
/// `LINKGRAPH_LOG=linkgraph::graph=debug`), falling back to `linkgraph=info`.
/// Output goes to stderr so it never mixes with SARIF written to stdout.
/// Calling this more than once has no effect.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("LINKGRAPH_LOG")
            .unwrap_or_else(|_| EnvFilter::new("linkgraph=info"));

        let _ = tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_names(true),
            )
            .with(filter)
            .try_init();
    });
}
