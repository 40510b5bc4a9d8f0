use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

// clap needs Display for default_value_t
impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = self
            .to_possible_value()
            .ok_or(std::fmt::Error)?;
        f.write_str(value.get_name())
    }
}

/// Install the global tracing subscriber. Cluster deployments log JSON for
/// the log pipeline; text is for running locally.
pub fn init(log_filter: &str, log_format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(log_filter)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match log_format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}
