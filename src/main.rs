use std::path::PathBuf;

use clap::{Parser, Subcommand};
use http_probe_exporter::config::{ExporterConfig, LogFormat};
use http_probe_exporter::metrics;
use http_probe_exporter::notify::SlackClient;
use http_probe_exporter::prober::Probe;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "http-probe-exporter", version, about = "Prometheus exporter probing HTTP(S) targets on every scrape")]
struct Cli {
    /// Address to serve /metrics on [default: 127.0.0.1:8888].
    #[arg(short = 'a', long)]
    listen_address: Option<String>,

    /// JSON config file; command-line flags take precedence over it.
    #[arg(long, env = "EXPORTER_CONFIG")]
    config: Option<PathBuf>,

    /// trace, debug, info, warn or error.
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Post a single message to a Slack incoming webhook and exit.
    Notify {
        #[arg(long)]
        webhook_url: String,
        #[arg(long, default_value = "")]
        channel: String,
        #[arg(long, default_value = "http-probe-exporter")]
        username: String,
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long, default_value = "")]
        pretext: String,
        #[arg(long)]
        text: String,
        #[arg(long, default_value = "good")]
        color: String,
    },
}

fn init_tracing(config: &ExporterConfig) -> anyhow::Result<()> {
    let level = config.get_tracing_level()?;
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("http_probe_exporter={}", level.as_str().to_lowercase()).parse()?);

    match config.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
    Ok(())
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = ExporterConfig::load(cli.config.as_deref()).await?;
    config.apply_overrides(cli.listen_address, cli.log_level)?;
    init_tracing(&config)?;

    if let Some(Command::Notify {
        webhook_url,
        channel,
        username,
        title,
        pretext,
        text,
        color,
    }) = cli.command
    {
        let slack = SlackClient::new(&webhook_url, &channel, &username)?;
        slack.post(&title, &pretext, &text, &color).await?;
        info!(webhook = %slack.webhook_url(), "notification sent");
        return Ok(());
    }

    let addr = config.listen_socket_addr()?;
    let probe = Probe::new(config.probe_options())?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        max_redirects = config.max_redirects,
        read_body = config.read_body,
        "starting http-probe-exporter"
    );

    metrics::serve_metrics(addr, probe).await;
    Ok(())
}
