use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "MOSS_LOG";

/// Send logs to stderr so stdout carries only the conversation.
///
/// `MOSS_LOG` takes an `EnvFilter` directive; `--verbose` overrides it.
pub fn init(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("warn,moss=debug,moss_cli=debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
