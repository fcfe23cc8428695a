//! converge-operator - provisions namespaces from Workspace resources

use std::sync::Arc;

use clap::Parser;
use kube::{Api, Client, CustomResourceExt};
use tokio_util::sync::CancellationToken;

use converge_common::config::OperatorConfig;
use converge_common::telemetry::init_telemetry;
use converge_lifecycle::run_controller;
use converge_operator::crd::Workspace;
use converge_operator::workspace_manager;

/// Workspace operator
#[derive(Parser, Debug)]
#[command(name = "converge-operator", version, about, long_about = None)]
struct Cli {
    /// Print the Workspace CRD manifest and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    operator: OperatorConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&Workspace::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    let telemetry = init_telemetry(&cli.operator.telemetry())?;

    let client = Client::try_default().await?;
    let manager = workspace_manager(client.clone(), &cli.operator.operator_name)?;
    let workspaces: Api<Workspace> = Api::all(client);

    run_controller(
        workspaces,
        Arc::new(manager),
        &cli.operator,
        CancellationToken::new(),
    )
    .await;

    telemetry.shutdown();
    Ok(())
}
