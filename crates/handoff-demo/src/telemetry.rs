//! Console logging for the demo.
//!
//! Events are filtered through `RUST_LOG` (default `info`) and printed by the
//! `tracing_subscriber::fmt` layer. Worker threads are named, so the thread
//! names and ids in each line show which worker handled a chore.
//!
//! ```bash
//! RUST_LOG=handoff=debug,info cargo run -p handoff-demo
//! ```

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_telemetry() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339()),
        )
        .try_init()?;

    Ok(())
}
