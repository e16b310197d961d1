use std::{sync::Arc, time::Duration};

use clap::Parser;
use color_eyre::{Result, eyre::WrapErr};
use junction::{
    adapters::{AppState, HealthMonitor, HttpClientAdapter, ProxyRouter},
    config::{GatewayConfig, GatewayConfigValidator, load_config},
    core::{LoadBalancer, ServiceRegistry},
    metrics, tracing_setup,
    utils::GracefulShutdown,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "junction.yaml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "junction.yaml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "junction.json")]
        config: String,
    },
    /// Start the gateway (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "junction.yaml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let (command, config_path) = match args.command {
        Some(Commands::Validate { config }) => ("validate", config),
        Some(Commands::Init { config }) => ("init", config),
        Some(Commands::Serve { config }) => ("serve", config),
        None => ("serve", args.config),
    };

    match command {
        "validate" => return validate_config_command(&config_path),
        "init" => return init_config_command(&config_path),
        _ => {}
    }

    tracing_setup::init_tracing()?;
    metrics::init_metrics();

    let config = load_config(&config_path)
        .wrap_err_with(|| format!("failed to load configuration from '{config_path}'"))?;
    GatewayConfigValidator::validate(&config).wrap_err("configuration is invalid")?;
    let config = Arc::new(config);

    tracing::info!(
        listen_addr = %config.listen_addr,
        strategy = ?config.load_balancer.strategy,
        "starting junction"
    );

    let registry = Arc::new(ServiceRegistry::new());
    seed_static_instances(&registry, &config);

    let balancer = Arc::new(LoadBalancer::new(
        registry.clone(),
        config.load_balancer.strategy,
    ));
    let http_client = Arc::new(HttpClientAdapter::new()?);
    let proxy = Arc::new(ProxyRouter::new(
        balancer.clone(),
        http_client.clone(),
        config.proxy.clone(),
    ));

    let monitor = Arc::new(HealthMonitor::new(
        registry.clone(),
        http_client,
        config.health_check.clone(),
        config.registry.clone(),
    ));
    monitor.clone().start();

    let shutdown = Arc::new(GracefulShutdown::with_timeout(Duration::from_secs(
        config.shutdown_grace_secs,
    )));
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown.run_signal_handler().await;
        });
    }

    let state = AppState {
        registry,
        balancer,
        proxy,
        config,
    };
    // Bound the drain by the configured grace period so one idle
    // connection cannot hang SIGTERM indefinitely.
    let server = tokio::spawn(junction::adapters::serve(state, shutdown.wait()));
    if let Some(result) = shutdown.drain(server).await {
        result?;
    }

    monitor.stop().await;
    tracing::info!("junction stopped");
    Ok(())
}

fn seed_static_instances(registry: &ServiceRegistry, config: &GatewayConfig) {
    for static_instance in &config.registry.instances {
        let instance = junction::core::RegisterRequest {
            name: static_instance.name.clone(),
            host: static_instance.host.clone(),
            port: static_instance.port,
            version: static_instance.version.clone(),
            tags: static_instance.tags.clone(),
        }
        .into_instance();
        tracing::info!(
            service = %instance.name,
            address = %instance.address(),
            "registering static instance"
        );
        registry.register(instance);
    }
    metrics::set_registered_instances(registry.len());
}

fn validate_config_command(config_path: &str) -> Result<()> {
    let config = load_config(config_path)
        .wrap_err_with(|| format!("failed to load configuration from '{config_path}'"))?;
    GatewayConfigValidator::validate(&config).wrap_err("configuration is invalid")?;
    println!("Configuration '{config_path}' is valid");
    Ok(())
}

fn init_config_command(config_path: &str) -> Result<()> {
    if std::path::Path::new(config_path).exists() {
        return Err(color_eyre::eyre::eyre!(
            "refusing to overwrite existing file '{config_path}'"
        ));
    }
    let config = GatewayConfig::default();
    let rendered = serde_json::to_string_pretty(&config).wrap_err("failed to render config")?;
    std::fs::write(config_path, rendered)
        .wrap_err_with(|| format!("failed to write '{config_path}'"))?;
    println!("Wrote default configuration to '{config_path}'");
    Ok(())
}
