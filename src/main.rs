use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use secrecy::SecretString;
use tracing_subscriber::EnvFilter;

use mbean_collector::api::ApiServerBuilder;
use mbean_collector::{
    Collector, Config, Dispatcher, HttpAgentConnector, HttpController, RawDescriptor,
};

/// MBean Collector - metrics collection from remote management agents
#[derive(Parser)]
#[command(name = "mbean-collector", version, about)]
struct Cli {
    /// Config file (defaults to <config_dir>/mbean-collector/config.toml)
    #[arg(short, long, env = "MBEAN_COLLECTOR_CONFIG")]
    config: Option<PathBuf>,

    /// Keep collecting every cycle instead of running once
    #[arg(long)]
    cycle: bool,

    /// Cycle interval in seconds (overrides the controller's setting)
    #[arg(long)]
    cycle_time: Option<u64>,

    /// Query pool size; the result pool is twice this
    #[arg(long)]
    pool_size: Option<usize>,

    /// Per-call timeout in seconds
    #[arg(long)]
    call_timeout: Option<u64>,

    /// Controller base URL
    #[arg(long)]
    controller_url: Option<String>,

    /// Controller username
    #[arg(long)]
    controller_user: Option<String>,

    /// Controller password
    #[arg(long, env = "MBEAN_COLLECTOR_CONTROLLER_PASSWORD", hide_env_values = true)]
    controller_password: Option<String>,

    /// Controller request timeout in seconds
    #[arg(long)]
    controller_timeout: Option<u64>,

    /// Collector name registered at the controller
    #[arg(long)]
    collector_name: Option<String>,

    /// Component name reported in heartbeats
    #[arg(long)]
    component_name: Option<String>,

    /// Port for the on-demand collect listener
    #[arg(long)]
    listen_port: Option<u16>,

    /// Run the calls of one collect request concurrently
    #[arg(long)]
    concurrent_agent_calls: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Collect a JSON file of descriptors once and print the entries
    Collect {
        /// Path to a JSON array of descriptors
        file: PathBuf,
    },
}

impl Cli {
    /// Resolve the effective configuration: file and environment, then flags
    fn config(&self) -> mbean_collector::Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides on top of file and environment settings
    fn apply(&self, config: &mut Config) {
        if self.cycle {
            config.dispatch.continuous = true;
        }
        if let Some(secs) = self.cycle_time {
            config.dispatch.cycle_interval = Some(Duration::from_secs(secs));
        }
        if let Some(size) = self.pool_size {
            config.dispatch.pool_size = size;
        }
        if let Some(secs) = self.call_timeout {
            config.dispatch.call_timeout = Duration::from_secs(secs);
        }
        if let Some(url) = &self.controller_url {
            config.controller.url.clone_from(url);
        }
        if let Some(user) = &self.controller_user {
            config.controller.username.clone_from(user);
        }
        if let Some(password) = &self.controller_password {
            config.controller.password = Some(SecretString::from(password.clone()));
        }
        if let Some(secs) = self.controller_timeout {
            config.controller.request_timeout = Duration::from_secs(secs);
        }
        if let Some(name) = &self.collector_name {
            config.collector_name.clone_from(name);
        }
        if let Some(name) = &self.component_name {
            config.component_name.clone_from(name);
        }
        if self.listen_port.is_some() {
            config.server.listen_port = self.listen_port;
        }
        if self.concurrent_agent_calls {
            config.server.concurrent_agent_calls = true;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,mbean_collector=info",
        1 => "info,mbean_collector=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.config()?;
    tracing::debug!(?config, "loaded configuration");

    let connector = Arc::new(HttpAgentConnector::new()?);
    let collector = Arc::new(Collector::new(connector.clone(), config.collector_settings()));

    if let Some(Command::Collect { file }) = cli.command {
        return collect_once(&collector, &file).await;
    }

    let controller = Arc::new(
        HttpController::new(
            &config.controller.url,
            &config.collector_name,
            config.controller.request_timeout,
        )?
        .with_credentials(&config.controller.username, config.controller.password.clone()),
    );

    tracing::info!(
        collector = %config.collector_name,
        controller = %config.controller.url,
        pool_size = config.dispatch.pool_size,
        continuous = config.dispatch.continuous,
        "starting mbean collector"
    );

    let dispatcher = Dispatcher::new(
        config.dispatcher_config(),
        controller.clone(),
        connector,
        controller,
    );

    let server = config.server.listen_port.map(|port| {
        ApiServerBuilder::new(collector, port)
            .in_flight(dispatcher.in_flight())
            .build()
            .spawn()
    });

    dispatcher.start().await?;

    // Run until interrupted, or until a one-shot run completes with no listener
    let serving = server.is_some();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
        }
        () = dispatcher.finished(), if !serving => {
            tracing::info!("collection complete");
        }
    }

    dispatcher.stop();
    if let Some(server) = server {
        server.abort();
    }

    Ok(())
}

/// Run the collect facade once against a file of descriptors
async fn collect_once(collector: &Collector, path: &std::path::Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(path)?;
    let descriptors: Vec<RawDescriptor> = serde_json::from_str(&content)?;

    let entries = collector.collect(descriptors).await;
    println!("{}", serde_json::to_string_pretty(&entries)?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("{name}-{}.toml", std::process::id()));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn flags_can_repair_file_settings() {
        let path = write_config("mbean-collector-zero-pool", "[dispatch]\npool_size = 0\n");
        let path_arg = path.to_str().unwrap();

        let cli = Cli::try_parse_from(["mbean-collector", "--config", path_arg]).unwrap();
        assert!(cli.config().is_err());

        let cli =
            Cli::try_parse_from(["mbean-collector", "--config", path_arg, "--pool-size", "4"])
                .unwrap();
        let config = cli.config().unwrap();
        assert_eq!(config.dispatch.pool_size, 4);

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn flags_are_validated() {
        let path = write_config("mbean-collector-valid", "[dispatch]\npool_size = 4\n");
        let path_arg = path.to_str().unwrap();

        let cli = Cli::try_parse_from([
            "mbean-collector",
            "--config",
            path_arg,
            "--controller-timeout",
            "0",
        ])
        .unwrap();
        assert!(cli.config().is_err());

        std::fs::remove_file(path).unwrap();
    }
}
