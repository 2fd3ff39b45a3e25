//! net-bootstrap - configure the management network of a fresh host.
//!
//! Intended to run exactly once during image or host provisioning.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use hostnet_bootstrap::bootstrap::Bootstrap;
use hostnet_bootstrap::client::{Connector, Transport};
use hostnet_bootstrap::config::{BootstrapConfig, Cli};
use hostnet_bootstrap::identity::{HostIdentityProvider, StaticHostIdentity, SystemHostIdentity};
use hostnet_bootstrap::{logging, VERSION};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.log_format, cli.log_file.as_deref()) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::from(1);
    }

    info!(version = VERSION, "net-bootstrap starting");

    let config = BootstrapConfig::from(&cli);
    let connector = config.connector();

    let result = match cli.ipaddr {
        Some(addr) => run(&cli, config, StaticHostIdentity::new(addr), connector).await,
        None => run(&cli, config, SystemHostIdentity::new(), connector).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "net-bootstrap failed");
            let mut source = e.source();
            while let Some(cause) = source {
                error!(cause = %cause, "caused by");
                source = cause.source();
            }
            ExitCode::from(1)
        }
    }
}

async fn run<P, C>(cli: &Cli, config: BootstrapConfig, identity: P, connector: C) -> Result<()>
where
    P: HostIdentityProvider,
    C: Connector,
{
    info!(
        endpoint = %config.endpoint,
        api = %config.api,
        tls = matches!(config.transport, Transport::Tls(_)),
        gateway = ?config.gateway,
        "configuration loaded"
    );

    let mut bootstrap = Bootstrap::new(config, identity, connector);

    if cli.dry_run {
        let request = bootstrap.prepare().await?;
        let json = serde_json::to_string_pretty(&request).context("failed to encode request")?;
        println!("{}", json);
        return Ok(());
    }

    bootstrap.run().await?;
    info!(state = %bootstrap.state(), "management network configured");
    Ok(())
}
