//! Provisioning, scaling and teardown commands

use adapter_lib::{AutoscaleSpec, Creation, Lifecycle, LifecycleController, Removal};
use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use std::sync::Arc;

use super::Session;
use crate::output::{print_info, print_json, print_success, print_warning, OutputFormat};

/// Provision the workload and wait until it is ready.
///
/// The workload is left running; use `down` to remove it.
pub async fn up(
    session: &Session,
    image: Option<String>,
    replicas: Option<i32>,
    timeout_secs: Option<u64>,
) -> Result<()> {
    let mut settings = session.settings.clone();
    if image.is_some() {
        settings.image = image;
    }
    if let Some(replicas) = replicas {
        settings.replicas = replicas;
    }
    if let Some(timeout) = timeout_secs {
        settings.readiness_timeout_secs = timeout;
    }

    let mut controller =
        LifecycleController::new(&session.agent_name, &settings, Arc::clone(&session.api))?;

    if session.format == OutputFormat::Table {
        print_info(&format!(
            "Provisioning {} in namespace {} (timeout {}s)",
            controller.workload_name().cyan(),
            settings.namespace.cyan(),
            settings.readiness_timeout_secs
        ));
    }

    controller
        .initialize(false)
        .await
        .with_context(|| format!("Failed to bring up {}", controller.workload_name()))?;

    match session.format {
        OutputFormat::Json => print_json(&controller.snapshot())?,
        OutputFormat::Table => {
            print_success(&format!(
                "{} is {}",
                controller.workload_name(),
                controller.state().to_string().green()
            ));
            if let Some(bounds) = controller.autoscale() {
                print_info(&format!(
                    "Autoscaling between {} and {} replicas at {}% CPU",
                    bounds.min_replicas, bounds.max_replicas, bounds.target_utilization_percent
                ));
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct DownReport {
    workload: String,
    autoscaler: Removal,
    deployment: Removal,
}

/// Delete the autoscaler and the workload; absent resources are fine
pub async fn down(session: &Session) -> Result<()> {
    let name = session.workload_name();
    let resources = session.resources();

    let autoscaler = resources.delete_autoscaler(&name).await?;
    let deployment = resources.delete(&name).await?;

    match session.format {
        OutputFormat::Json => print_json(&DownReport {
            workload: name,
            autoscaler,
            deployment,
        })?,
        OutputFormat::Table => {
            if autoscaler == Removal::Deleted {
                print_success(&format!("Deleted autoscaler {}", name));
            }
            match deployment {
                Removal::Deleted => print_success(&format!("Deleted workload {}", name)),
                Removal::NotFound => print_warning(&format!("Workload {} was not deployed", name)),
            }
        }
    }
    Ok(())
}

/// Set the workload's replica count
pub async fn scale(session: &Session, replicas: i32) -> Result<()> {
    let name = session.workload_name();
    session
        .resources()
        .scale(&name, replicas)
        .await
        .with_context(|| format!("Failed to scale {}", name))?;

    match session.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "workload": name,
            "replicas": replicas,
        }))?,
        OutputFormat::Table => {
            print_success(&format!("Scaled {} to {} replicas", name, replicas));
        }
    }
    Ok(())
}

/// Attach an autoscaler to the workload
pub async fn autoscale(session: &Session, min: i32, max: i32, cpu: i32) -> Result<()> {
    let bounds = AutoscaleSpec::new(min, max, cpu)?;
    let name = session.workload_name();
    let creation = session.resources().create_autoscaler(&name, bounds).await?;

    match session.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "workload": name,
            "autoscaler": creation,
            "bounds": bounds,
        }))?,
        OutputFormat::Table => match creation {
            Creation::Created => print_success(&format!(
                "Autoscaler for {} created ({}-{} replicas, {}% CPU)",
                name, min, max, cpu
            )),
            Creation::AlreadyExists => {
                print_warning(&format!("Autoscaler for {} already exists, left unchanged", name))
            }
        },
    }
    Ok(())
}
