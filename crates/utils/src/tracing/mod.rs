use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Re-export tracing macros for convenience
pub use tracing::{debug, error, info, instrument, span, trace, warn, Level, Span};

/// Initialize the tracing system
///
/// Honors `RUST_LOG` and falls back to `info`. Output goes to stderr in the
/// compact format so it never interleaves with work output on stdout.
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(is_tty())
        .compact()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

/// Check if we're running in a TTY environment
fn is_tty() -> bool {
    std::io::IsTerminal::is_terminal(&std::io::stderr())
}

/// Create a span for one pipeline run of a unit of work
pub fn work_span(display_name: &str, identity: &str) -> Span {
    span!(Level::INFO, "work", name = %display_name, identity = %identity)
}

/// Create a span for a build invocation
pub fn build_span(build_invocation_id: &str) -> Span {
    span!(Level::INFO, "build", invocation = %build_invocation_id)
}
