//! Tracing subscriber installation for binaries and tests that embed the
//! engine.

use std::time::Instant;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Installs a global subscriber.
///
/// Filtering follows `RUST_LOG`, defaulting to `info`. Returns false if a
/// global subscriber was already installed.
pub fn init_tracing(format: LogFormat) -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = match format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init(),
    };
    installed.is_ok()
}

/// Simple span timing helper.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new span timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the span name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finishes the span and returns the duration.
    #[must_use]
    pub fn finish(self) -> f64 {
        let elapsed = self.elapsed_ms();
        ::tracing::trace!(span = %self.name, duration_ms = elapsed, "Span finished");
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_timer() {
        let timer = SpanTimer::start("calibrate");
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert_eq!(timer.name(), "calibrate");
        let duration = timer.finish();
        assert!(duration >= 10.0);
    }

    #[test]
    fn test_second_init_is_rejected() {
        let _ = init_tracing(LogFormat::Json);
        assert!(!init_tracing(LogFormat::Pretty));
    }
}
