//! Diagnostic logging to stderr and the panic hook.

// External crates
use std::io::{self, IsTerminal};
use std::panic;
use tracing::error;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    filter::{Directive, EnvFilter},
    fmt::{self, MakeWriter},
    prelude::*,
    registry::Registry,
};

/// Default verbosity when `RUST_LOG` is unset: lifecycle notices only.
const DEFAULT_DIRECTIVE: &str = "info";

/// Install the global subscriber.
///
/// Diagnostics go to stderr; stdout carries nothing but log entries.
pub fn init_tracing() -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    let subscriber = build_subscriber(filter, io::stderr, io::stderr().is_terminal());
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Registry with `filter`, an fmt layer writing to `writer` and the error layer.
pub fn build_subscriber<W>(
    mut filter: EnvFilter,
    writer: W,
    ansi: bool,
) -> impl tracing::Subscriber + Send + Sync + 'static
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    // Keep transport internals quiet unless asked for explicitly.
    for directive in ["h2=warn", "hyper=warn", "tower=warn"] {
        if let Ok(directive) = directive.parse::<Directive>() {
            filter = filter.add_directive(directive);
        }
    }

    let fmt_layer = fmt::layer()
        .with_ansi(ansi)
        .with_writer(writer)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    Registry::default()
        .with(filter)
        .with(fmt_layer)
        .with(ErrorLayer::default())
}

/// Report panics through tracing so they share the diagnostic stream.
pub fn init_panic_handler() {
    panic::set_hook(Box::new(|panic_info| {
        let msg = match panic_info.payload().downcast_ref::<&str>() {
            Some(s) => (*s).to_string(),
            None => match panic_info.payload().downcast_ref::<String>() {
                Some(s) => s.clone(),
                None => "Unknown panic".to_string(),
            },
        };

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown location".to_string());

        error!(
            message = %msg,
            location = %location,
            "Application panicked!"
        );
    }));
}
