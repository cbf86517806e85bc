//! Optional installation of a global `tracing` subscriber.
//!
//! The library itself only emits events. Applications (and the tests, when
//! debugging) can call [`init_tracing`] to get formatted output on stderr.

use std::io::IsTerminal;
use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// environment variable holding the filter directives (e.g. `meshpower=debug`)
pub const LOG_ENV_VAR: &str = "MESHPOWER_LOG";

static INITIALISED: OnceLock<()> = OnceLock::new();

/// Configures the global tracing subscriber.
///
/// Only the first call does anything. If some other subscriber was already
/// installed by the application, we leave it alone.
pub fn init_tracing() {
    if INITIALISED.set(()).is_err() {
        return;
    }

    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr);
    if let Err(err) = Registry::default().with(filter).with(fmt_layer).try_init() {
        tracing::debug!(%err, "a global subscriber was already installed");
    }
}
