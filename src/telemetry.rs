//! Tracing subscriber setup for the binaries.

use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::EnvFilter;

use crate::error::{Result, RetrievalError};

/// `RUST_LOG` when set, otherwise `default_directive`.
fn build_env_filter(default_directive: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_directive).map_err(|err| {
            RetrievalError::Configuration(format!("invalid log directive {default_directive:?}: {err}"))
        }),
    }
}

/// Installs the global fmt subscriber, writing to stderr so stdout stays
/// free for command output.
pub fn init_tracing(default_directive: &str, json: bool) -> Result<()> {
    let filter = build_env_filter(default_directive)?;
    let registry = tracing_subscriber::registry().with(filter);
    let installed = if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };
    installed.map_err(|err| RetrievalError::Configuration(format!("tracing already initialised: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_default_directive_is_a_configuration_error() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert!(matches!(
            build_env_filter("skillmatch=[["),
            Err(RetrievalError::Configuration(_))
        ));
    }
}
