use std::{env, str::FromStr};

use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

/// Configure the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` (default `info`); `LOG_FORMAT=json`
/// switches to JSON output for log collectors. Calling this twice is not an
/// error so tests can initialize logging unconditionally.
pub fn configure_logging() -> Result<(), anyhow::Error> {
    let filter = EnvFilter::from_str(env::var("RUST_LOG").unwrap_or("info".to_string()).as_str())?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stdout);

    let result = if env::var("LOG_FORMAT").unwrap_or("text".to_string()) == "json" {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };

    if let Err(e) = result {
        warn!(
            "Failed to initialize logging, potentially because it was initialized already: {}",
            e
        );
    }

    Ok(())
}
