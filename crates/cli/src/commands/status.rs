//! Workload status command

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use tabled::Tabled;

use super::Session;
use crate::config::current_context;
use crate::output::{color_status, format_age, print_json, print_table, OutputFormat};

/// Row for the instances table
#[derive(Tabled)]
struct InstanceRow {
    #[tabled(rename = "Instance")]
    name: String,
    #[tabled(rename = "Ready")]
    ready: String,
    #[tabled(rename = "Age")]
    age: String,
}

#[derive(Serialize)]
struct InstanceReport {
    name: String,
    ready: bool,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Serialize)]
struct StatusReport {
    workload: String,
    namespace: String,
    deployed: bool,
    replicas: Option<i32>,
    ready_replicas: Option<i32>,
    image: Option<String>,
    instances: Vec<InstanceReport>,
}

/// Show the workload and its instances
pub async fn show_status(session: &Session) -> Result<()> {
    let name = session.workload_name();
    let resources = session.resources();

    let workload = resources.get(&name).await?;
    let selector = match &workload {
        Some(found) => found.spec.label_selector(),
        None => session.settings.workload_spec(&session.agent_name).label_selector(),
    };
    let instances = resources.instances(&selector).await?;

    let report = StatusReport {
        workload: name,
        namespace: session.settings.namespace.clone(),
        deployed: workload.is_some(),
        replicas: workload.as_ref().map(|w| w.spec.replicas),
        ready_replicas: workload.as_ref().and_then(|w| w.ready_replicas),
        image: workload.as_ref().map(|w| w.spec.image.clone()),
        instances: instances
            .iter()
            .map(|i| InstanceReport {
                name: i.name.clone(),
                ready: i.is_ready(),
                started_at: i.started_at,
            })
            .collect(),
    };

    match session.format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => print_report(session, &report),
    }
    Ok(())
}

fn print_report(session: &Session, report: &StatusReport) {
    println!("{}", "Workload Status".bold());
    println!("{}", "=".repeat(50));
    println!("Workload:   {}", report.workload.cyan());
    println!("Namespace:  {}", report.namespace.cyan());
    if session.dry_run {
        println!("Context:    {}", "dry-run".yellow());
    } else if let Some(context) = current_context(session.kubeconfig.as_deref()) {
        println!("Context:    {}", context);
    }

    let deployed = if report.deployed { "deployed" } else { "not deployed" };
    println!("Status:     {}", color_status(deployed));
    if let Some(image) = &report.image {
        println!("Image:      {}", image);
    }
    if let Some(replicas) = report.replicas {
        println!(
            "Replicas:   {}/{} ready",
            report.ready_replicas.unwrap_or(0),
            replicas
        );
    }
    println!();

    let now = chrono::Utc::now();
    let rows: Vec<InstanceRow> = report
        .instances
        .iter()
        .map(|i| InstanceRow {
            name: i.name.clone(),
            ready: color_status(&i.ready.to_string()),
            age: format_age(i.started_at, now),
        })
        .collect();
    print_table(&rows, "No instances found");
}
