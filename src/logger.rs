use tracing_subscriber::{EnvFilter, FmtSubscriber};

const LOG_ENV_VARS: [&str; 2] = ["STAMPEDE_LOG", "RUST_LOG"];

/// Installs the global subscriber. Calling it again only reports that a
/// subscriber is already set.
pub fn init_logging(verbose: bool) {
    let directive = LOG_ENV_VARS
        .iter()
        .find_map(|name| std::env::var(name).ok());
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(log_filter(directive.as_deref(), verbose))
        .with_target(verbose)
        .with_thread_names(verbose)
        .finish();

    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set global default subscriber: {}", err);
    }
}

/// An explicit directive wins; an unparsable one falls back to `info`.
fn log_filter(directive: Option<&str>, verbose: bool) -> EnvFilter {
    match directive {
        Some(value) => EnvFilter::try_new(value).unwrap_or_else(|err| {
            eprintln!("Ignoring log filter '{}': {}", value, err);
            EnvFilter::new("info")
        }),
        None if verbose => EnvFilter::new("debug"),
        None => EnvFilter::new("info"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, AppResult};

    #[test]
    fn init_logging_is_idempotent() {
        init_logging(false);
        init_logging(true);
    }

    #[test]
    fn filter_prefers_explicit_directive() -> AppResult<()> {
        let cases = [
            (Some("warn"), true, "warn"),
            (None, true, "debug"),
            (None, false, "info"),
        ];
        for (directive, verbose, expected) in cases {
            let filter = log_filter(directive, verbose).to_string();
            if filter != expected {
                return Err(AppError::validation(format!(
                    "{:?} (verbose={}) gave '{}', expected '{}'",
                    directive, verbose, filter, expected
                )));
            }
        }
        Ok(())
    }
}
