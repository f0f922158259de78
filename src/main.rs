//! cdpmux - diagnostic CLI for multiplexed DevTools connections.

mod cli;

use anyhow::{Context, bail};
use clap::Parser;
use serde_json::Value;
use tracing::{debug, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use cdpmux::{Connection, ConnectionConfig, DiscoveryClient, EventFilter};
use cdpmux_config::{Config, ConfigLoader, ConfigValidator, LoggingConfig};

use cli::{Cli, Commands, WatchFilter};

fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    // Console goes to stderr so command output on stdout stays parseable.
    let console = if logging.json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let file = match &logging.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("cdpmux")
                .filename_suffix("log")
                .max_log_files(14)
                .build(dir)?;
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);

            // Flushes on drop, keep it for the whole run.
            static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
                std::sync::OnceLock::new();
            let _ = GUARD.set(guard);

            Some(fmt::layer().with_writer(non_blocking).with_ansi(false))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file)
        .init();

    Ok(())
}

/// Command line flags win over the config file.
fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(endpoint) = &cli.endpoint {
        config.browser.endpoint = endpoint.clone();
    }
    if let Some(ws_url) = &cli.ws_url {
        config.browser.ws_url = Some(ws_url.clone());
    }
    if let Some(host) = &cli.host_override {
        config.browser.host_override.enabled = true;
        config.browser.host_override.host = host.clone();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = ConfigLoader::load_or_default(cli.config.as_deref())
        .context("loading configuration")?;
    apply_overrides(&mut config, &cli);

    init_tracing(&config.logging)?;

    for warning in ConfigValidator::validate(&config).into_result()? {
        warn!("config {}: {}", warning.path, warning.message);
    }

    match cli.command {
        Commands::Version => show_version(&config).await,
        Commands::Targets => list_targets(&config).await,
        Commands::Call {
            method,
            params,
            target,
        } => call(&config, &method, params.as_deref(), target.as_deref()).await,
        Commands::Watch {
            target_id,
            filter,
            limit,
        } => watch(&config, &target_id, filter, limit).await,
    }
}

fn discovery(config: &Config) -> anyhow::Result<DiscoveryClient> {
    let conn_config = ConnectionConfig::from(config);
    Ok(DiscoveryClient::new(
        &config.browser.endpoint,
        conn_config.host_override,
    )?)
}

async fn open(config: &Config) -> anyhow::Result<Connection> {
    let conn_config = ConnectionConfig::from(config);
    let conn = match &config.browser.ws_url {
        Some(ws_url) => Connection::connect(ws_url, conn_config)
            .await
            .with_context(|| format!("connecting to {ws_url}"))?,
        None => Connection::connect_endpoint(&config.browser.endpoint, conn_config)
            .await
            .with_context(|| format!("connecting via {}", config.browser.endpoint))?,
    };
    info!("Connected to {}", conn.url().unwrap_or("browser"));
    Ok(conn)
}

async fn show_version(config: &Config) -> anyhow::Result<()> {
    let version = discovery(config)?.version().await?;
    println!("Browser:          {}", version.browser);
    println!("Protocol-Version: {}", version.protocol_version);
    if let Some(v8) = &version.v8_version {
        println!("V8-Version:       {}", v8);
    }
    println!("User-Agent:       {}", version.user_agent);
    println!("WebSocket:        {}", version.web_socket_debugger_url);
    Ok(())
}

async fn list_targets(config: &Config) -> anyhow::Result<()> {
    // Without an HTTP endpoint, ask over the protocol.
    if config.browser.ws_url.is_some() {
        let conn = open(config).await?;
        let targets = conn.get_targets().await?;
        for target in &targets {
            println!("{}\t{}\t{}\t{}", target.target_id, target.target_type, target.url, target.title);
        }
        conn.close().await;
        return Ok(());
    }

    let targets = discovery(config)?.list_targets().await?;
    for target in &targets {
        println!(
            "{}\t{}\t{}\t{}",
            target.id,
            target.target_type,
            target.url,
            target.web_socket_debugger_url.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn parse_params(params: Option<&str>) -> anyhow::Result<Option<Value>> {
    let Some(raw) = params else {
        return Ok(None);
    };
    let value: Value = serde_json::from_str(raw).context("PARAMS_JSON is not valid JSON")?;
    if !value.is_object() {
        bail!("PARAMS_JSON must be a JSON object");
    }
    Ok(Some(value))
}

async fn call(
    config: &Config,
    method: &str,
    params: Option<&str>,
    target: Option<&str>,
) -> anyhow::Result<()> {
    let params = parse_params(params)?;
    let conn = open(config).await?;

    let result = match target {
        Some(target) => {
            let session = conn.attach(target).await?;
            let result = session.send_command(method, params).await;
            session.detach().await?;
            result
        }
        None => conn.send_command(method, params).await,
    };
    conn.close().await;

    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}

async fn watch(
    config: &Config,
    target_id: &str,
    filter: WatchFilter,
    limit: Option<usize>,
) -> anyhow::Result<()> {
    let filter = match (filter.method, filter.domain) {
        (Some(method), _) => EventFilter::method(method),
        (None, Some(domain)) => EventFilter::domain(domain),
        (None, None) => EventFilter::All,
    };

    let conn = open(config).await?;
    let session = conn.attach(target_id).await?;
    let mut events = session.subscribe(filter)?;

    // Most domains only emit once enabled.
    for domain in ["Page", "Network", "Runtime"] {
        if let Err(e) = session.send_command(&format!("{domain}.enable"), None).await {
            debug!("{}.enable failed: {}", domain, e);
        }
    }

    let mut seen = 0usize;
    loop {
        if limit.is_some_and(|limit| seen >= limit) {
            break;
        }
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    info!("Session ended");
                    break;
                };
                println!("{} {}", event.method, event.params);
                seen += 1;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    if session.is_attached() {
        session.detach().await?;
    }
    conn.close().await;
    Ok(())
}
