//! pvm-rehearse entry point.
//!
//! Loads the driver configuration from `PROXMOXVE_*` variables, builds a
//! simulated cluster that accepts it, applies the requested faults and runs
//! one driver operation. Every remote call the driver made is printed at the
//! end so integrators can see exactly what a real cluster would receive.

mod cli;

use clap::Parser;
use cli::{Cli, Command};
use pvm_api::VmId;
use pvm_driver::{Driver, DriverConfig, TaskSupervisor};
use pvm_sim::SimCluster;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Template VMID used when none is configured.
const DEFAULT_TEMPLATE: &str = "9000";

/// VMID range used when none is configured.
const DEFAULT_RANGE: &str = "1000:2000";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let store = cli
        .store
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("pvm-rehearse"));
    let mut config = DriverConfig::from_env(cli.machine.clone(), store);
    if config.clone_vmid.is_empty() {
        config.clone_vmid = DEFAULT_TEMPLATE.into();
    }
    if config.vmid_range.is_empty() {
        config.vmid_range = DEFAULT_RANGE.into();
    }

    // Logs go to stderr; stdout carries the operation result.
    let level = if cli.debug || config.debug {
        "pvm=debug"
    } else {
        "pvm=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(level.parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let sim = simulated_cluster(&cli, &config)?;
    tracing::info!(
        endpoint = %config.endpoint(),
        node = %config.effective_node(),
        template = %config.clone_vmid,
        "Simulated cluster ready"
    );

    let supervisor = TaskSupervisor {
        poll_interval: Duration::from_millis(cli.poll_interval_ms),
        ..TaskSupervisor::default()
    };
    let mut driver = Driver::new(config, sim.control_plane()).with_supervisor(supervisor);
    if cli.command != Command::Create {
        driver = driver.with_vmid(VmId::new(cli.vmid));
    }

    let result = run(&mut driver, cli.command).await;

    for call in sim.calls() {
        tracing::info!(?call, "Remote call");
    }

    match result {
        Ok(output) => {
            println!("{output}");
            Ok(())
        }
        Err(e) => {
            tracing::error!(
                error = %e,
                stage = ?driver.create_stage(),
                vmid = ?driver.vmid(),
                "Operation failed"
            );
            Err(e.into())
        }
    }
}

fn simulated_cluster(cli: &Cli, config: &DriverConfig) -> anyhow::Result<SimCluster> {
    let template: VmId = config.clone_vmid.parse()?;
    let node = config.effective_node();

    let sim = SimCluster::new()
        .with_credentials(&config.username, &config.password, &config.realm)
        .with_template(template, node)
        .with_running_vm(VmId::new(cli.vmid), node)
        .with_task_latency(cli.task_latency)
        .with_guest_network(cli.guest_network.into())
        .with_agent_boot_polls(if cli.silent_agent { None } else { Some(1) });

    for (op, mode) in &cli.faults {
        tracing::debug!(?op, ?mode, "Injecting fault");
        sim.inject(op.clone(), *mode);
    }
    Ok(sim)
}

async fn run(driver: &mut Driver, command: Command) -> pvm_driver::Result<String> {
    Ok(match command {
        Command::Create => {
            driver.pre_create_check().await?;
            driver.create().await?;
            format!(
                "created VM {} at {}",
                driver.vmid().map(|id| id.to_string()).unwrap_or_default(),
                driver.cached_ip().unwrap_or_default()
            )
        }
        Command::Start => driver.start().await.map(|()| "started".to_string())?,
        Command::Stop => driver.stop().await.map(|()| "stopped".to_string())?,
        Command::Restart => driver.restart().await.map(|()| "restarted".to_string())?,
        Command::Kill => driver.kill().await.map(|()| "killed".to_string())?,
        Command::Remove => driver.remove().await.map(|()| "removed".to_string())?,
        Command::State => driver.state().await?.to_string(),
        Command::Ip => driver.ip().await?,
        Command::Url => driver.url().await?,
    })
}
