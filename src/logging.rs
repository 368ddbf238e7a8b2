//! Tracing setup for the `relay` binary.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{Error, Result};

/// Install a stderr subscriber.
///
/// `verbosity` counts `-v` flags: 0=warn, 1=info, 2=debug, 3+=trace.
/// `RUST_LOG` takes precedence when set.
pub fn init_logging(verbosity: u8) -> Result<()> {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("relay={}", level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbosity >= 2)
                .with_file(verbosity >= 3)
                .with_line_number(verbosity >= 3),
        )
        .try_init()
        .map_err(|e| Error::Logging {
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_logging_error() {
        let _ = init_logging(0);
        match init_logging(0) {
            Err(Error::Logging { message }) => assert!(!message.is_empty()),
            other => panic!("expected a logging error, got {:?}", other),
        }
    }
}
