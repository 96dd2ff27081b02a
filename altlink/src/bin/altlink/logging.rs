use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Configures tracing and sets up the logging facility.
///
/// `default` is the level from the configuration or the command line. Without one,
/// `RUST_LOG` is used, falling back to WARN.
pub fn setup_logging(default: Option<&str>) -> anyhow::Result<()> {
    let filter = match default {
        Some(level) => {
            let level: tracing::level_filters::LevelFilter = level
                .parse()
                .map_err(|_| anyhow::anyhow!("'{level}' is not a valid log level"))?;
            // We have a default (from config or command argument), ignore RUST_LOG.
            EnvFilter::builder()
                .with_default_directive(level.into())
                .parse_lossy("")
        }
        None => EnvFilter::builder()
            .with_default_directive(tracing::level_filters::LevelFilter::WARN.into())
            .from_env_lossy(),
    };

    let stderr_subscriber = tracing_subscriber::fmt::layer()
        .compact()
        .without_time()
        .with_writer(std::io::stderr)
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(stderr_subscriber)
        .init();

    Ok(())
}
