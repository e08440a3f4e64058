//! Staff-only monitoring commands.

use crate::config::CliContext;

#[derive(clap::Subcommand)]
pub enum AdminCommand {
    /// Service metrics dashboard (staff only)
    Metrics,
    /// Every task in the system (staff only)
    Tasks,
}

pub async fn run(context: &CliContext, command: AdminCommand) -> anyhow::Result<()> {
    match command {
        AdminCommand::Metrics => metrics(context).await,
        AdminCommand::Tasks => all_tasks(context).await,
    }
}

async fn metrics(context: &CliContext) -> anyhow::Result<()> {
    let metrics = context.client.monitoring_metrics().await?;
    println!(
        "workers: {} active / {} max",
        metrics.workers.count, metrics.workers.max_replicas
    );
    println!("system:  {}", serde_json::to_string_pretty(&metrics.system)?);
    println!("tasks:   {}", serde_json::to_string_pretty(&metrics.tasks)?);
    println!("users:   {}", serde_json::to_string_pretty(&metrics.users)?);
    Ok(())
}

async fn all_tasks(context: &CliContext) -> anyhow::Result<()> {
    let tasks = context.client.all_tasks().await?;
    if tasks.is_empty() {
        println!("no tasks in the system");
        return Ok(());
    }
    for task in tasks {
        println!(
            "#{:<5} {:<10} {:<12} {}",
            task.id,
            task.status,
            task.owner.as_deref().unwrap_or("-"),
            task.name,
        );
    }
    Ok(())
}
