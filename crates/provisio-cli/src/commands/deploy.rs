use provisio_core::{DeploymentStatus, ProvisioConfig, Variables};
use provisio_deploy::{DeployRequest, DeploymentService, Orchestrator};
use provisio_state::{Deployment, StateStore};
use tracing::info;

fn print_deployment(d: &Deployment) {
    println!("Deployment {}", d.id);
    println!("  Design:  {}", d.design_id);
    println!("  Version: {}", d.iac_version_id);
    println!("  Tool:    {}", d.tool);
    println!("  Status:  {}", d.status);
    if let Some(path) = &d.workspace_path {
        println!("  Workspace: {path}");
    }
    if !d.log.is_empty() {
        println!();
        print!("{}", d.log);
        if !d.log.ends_with('\n') {
            println!();
        }
    }
}

fn finish(d: Deployment, expected: DeploymentStatus) -> anyhow::Result<()> {
    print_deployment(&d);
    if d.status != expected {
        anyhow::bail!("deployment {} ended in status {}", d.id, d.status);
    }
    Ok(())
}

pub async fn deploy(
    config: &ProvisioConfig,
    state: StateStore,
    design: String,
    version: String,
    variables: Variables,
    precheck: bool,
) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::from_config(config, state);
    let request = DeployRequest::new(design, version)
        .variables(variables)
        .precheck(precheck);
    let pending = orchestrator.deploy(request).await?;
    info!(deployment = %pending.id, "waiting for deployment run");

    let done = orchestrator.wait(&pending.id).await?;
    finish(done, DeploymentStatus::Success)
}

pub async fn rollback(
    config: &ProvisioConfig,
    state: StateStore,
    deployment: &str,
) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::from_config(config, state);
    orchestrator.rollback(deployment).await?;
    info!(%deployment, "waiting for rollback run");

    let done = orchestrator.wait(deployment).await?;
    finish(done, DeploymentStatus::RolledBack)
}

pub fn status(state: &StateStore, deployment: &str) -> anyhow::Result<()> {
    let d = DeploymentService::new(state.clone()).get(deployment)?;
    print_deployment(&d);
    Ok(())
}

pub fn list(
    state: &StateStore,
    design: &str,
    status: Option<DeploymentStatus>,
) -> anyhow::Result<()> {
    let deployments = DeploymentService::new(state.clone()).list(design, status)?;
    if deployments.is_empty() {
        println!("No deployments.");
    }
    for d in deployments {
        println!(
            "{}  {:<12} {:<10} {}",
            d.id,
            d.status.as_str(),
            d.tool.as_str(),
            d.iac_version_id
        );
    }
    Ok(())
}
