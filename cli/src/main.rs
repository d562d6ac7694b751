// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # VES Telemetry Agent CLI
//!
//! The `ves-agent` binary polls a Docker container and reports heartbeats,
//! state changes, faults and traffic measurements to a VES event listener.
//!
//! The flag surface mirrors the classic event-listener demo agents
//! (`--fqdn`, `--port`, `--username`, `--password`, `--cycles`, ...) with a
//! YAML config file layered underneath; flags win over file values.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use ves_agent_core::application::{StopReason, TelemetryAgent};
use ves_agent_core::domain::config::AgentConfig;
use ves_agent_core::infrastructure::collector::{CollectorConfig, CollectorTransport};
use ves_agent_core::infrastructure::docker::{self, DockerStateProbe, DockerTrafficProbe};

/// VES telemetry agent - report container telemetry to an event listener
#[derive(Parser, Debug)]
#[command(name = "ves-agent")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Identifier reported as the event source (defaults to the hostname)
    #[arg(short = 'i', long, env = "VES_AGENT_ID")]
    id: Option<String>,

    /// FQDN or IP address of the event listener API
    #[arg(short, long, env = "VES_COLLECTOR_FQDN")]
    fqdn: String,

    /// Port of the event listener API (1-65535)
    #[arg(short = 'n', long, env = "VES_COLLECTOR_PORT", value_parser = clap::value_parser!(u16).range(1..))]
    port: u16,

    /// Path prefix in front of the event listener route
    #[arg(long)]
    path: Option<String>,

    /// Topic segment appended to the event listener route
    #[arg(short, long)]
    topic: Option<String>,

    /// Username for authentication to the API
    #[arg(short, long)]
    username: Option<String>,

    /// Password for authentication to the API
    #[arg(short, long)]
    password: Option<String>,

    /// Use HTTPS towards the event listener
    #[arg(short, long)]
    secure: bool,

    /// Name of the container to monitor
    #[arg(long, env = "VES_AGENT_CONTAINER")]
    container: Option<String>,

    /// Docker socket path (auto-detected when omitted)
    #[arg(long)]
    docker_socket: Option<String>,

    /// Loop this many times round the poll loop, then drain and exit
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
    cycles: Option<u32>,

    /// Poll interval, e.g. "10s"
    #[arg(long, value_parser = humantime::parse_duration)]
    interval: Option<Duration>,

    /// Ask the collector to exempt this agent from throttling directives
    #[arg(short = 'x', long = "nothrott")]
    nothrott: bool,

    /// Generate much chattier logs
    #[arg(short, long)]
    verbose: bool,

    /// Path to a YAML agent configuration file
    #[arg(long, value_name = "FILE", env = "VES_AGENT_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;

    let config = build_config(&cli)?;
    config.validate().context("invalid agent configuration")?;

    let collector = CollectorConfig {
        fqdn: cli.fqdn.clone(),
        port: cli.port,
        secure: cli.secure,
        path: cli.path.clone(),
        topic: cli.topic.clone(),
        username: cli.username.clone(),
        password: cli.password.clone(),
    };
    let transport = Arc::new(
        CollectorTransport::new(collector).context("failed to initialize collector transport")?,
    );
    info!(endpoint = transport.endpoint(), "event listener configured");

    let docker = docker::connect(cli.docker_socket.as_deref())
        .context("failed to connect to the Docker daemon")?;
    let state_probe = Arc::new(DockerStateProbe::new(docker.clone(), &config.container));
    let measurement_probe = Arc::new(DockerTrafficProbe::new(
        docker,
        &config.container,
        config.poll_interval,
    ));

    let agent = TelemetryAgent::new(config, transport, state_probe, measurement_probe)?;
    let report = agent.run().await;

    info!(
        delivered = report.delivered,
        dropped = report.total_dropped(),
        reason = %report.reason,
        "agent exited"
    );

    // The watchdog alarm is a hard failure, like the demo agents' exit(2).
    if report.reason == StopReason::FatalTimeout {
        std::process::exit(2);
    }
    Ok(())
}

/// Initialize tracing subscriber for logging
fn init_logging(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(default_level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    Ok(())
}

/// Config file first, then CLI flags on top.
fn build_config(cli: &Cli) -> Result<AgentConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AgentConfig::default(),
    };
    apply_overrides(&mut config, cli);
    Ok(config)
}

fn load_config(path: &Path) -> Result<AgentConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn apply_overrides(config: &mut AgentConfig, cli: &Cli) {
    if let Some(id) = &cli.id {
        config.source = Some(id.clone());
    }
    if let Some(container) = &cli.container {
        config.container = container.clone();
    }
    if let Some(cycles) = cli.cycles {
        config.max_cycles = Some(cycles);
    }
    if let Some(interval) = cli.interval {
        config.poll_interval = interval;
    }
    if cli.nothrott {
        config.throttle_exempt = true;
    }
}
