//! Service catalog commands

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{query, segment, ApiClient, Service, ServiceContext, ServiceHealth, ServiceList};
use crate::output::{color_status, print_json, print_rows, print_warning, OutputFormat};

#[derive(Tabled)]
struct ServiceRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Tier")]
    tier: String,
    #[tabled(rename = "Team")]
    team: String,
    #[tabled(rename = "Version")]
    version: u64,
    #[tabled(rename = "Description")]
    description: String,
}

#[derive(Tabled)]
struct HealthRow {
    #[tabled(rename = "Environment")]
    environment: String,
    #[tabled(rename = "Context")]
    context: String,
    #[tabled(rename = "Deployment")]
    deployment: String,
    #[tabled(rename = "Ready")]
    ready: String,
    #[tabled(rename = "Status")]
    status: String,
}

pub async fn list(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let list: ServiceList = client.get("service-catalog/services").await?;

    match format {
        OutputFormat::Json => print_json(&list)?,
        OutputFormat::Table => {
            print_rows(
                list.services
                    .into_iter()
                    .map(|s| ServiceRow {
                        name: s.metadata.name,
                        tier: s.metadata.tier,
                        team: s.spec.team.github_team,
                        version: s.metadata.version,
                        description: s.spec.description,
                    })
                    .collect(),
            );
            println!("{}", format!("{} services", list.total).dimmed());
        }
    }
    Ok(())
}

pub async fn get(client: &ApiClient, name: &str, format: OutputFormat) -> Result<()> {
    let service: Service = client
        .get(&format!("service-catalog/services/{}", segment(name)))
        .await?;

    match format {
        OutputFormat::Json => print_json(&service)?,
        OutputFormat::Table => {
            println!("{}", service.metadata.name.bold());
            println!("{}", "=".repeat(40));
            println!("Tier:         {}", service.metadata.tier);
            println!("Team:         {}", service.spec.team.github_team);
            println!("Description:  {}", service.spec.description);
            println!("Version:      {}", service.metadata.version);
            if let Some(updated) = &service.metadata.updated_at {
                let by = service.metadata.updated_by.as_deref().unwrap_or("unknown");
                println!("Updated:      {} by {}", updated, by);
            }
        }
    }
    Ok(())
}

pub async fn health(client: &ApiClient, name: &str, format: OutputFormat) -> Result<()> {
    let health: ServiceHealth = client
        .get(&format!("service-catalog/services/{}/health", segment(name)))
        .await?;

    match format {
        OutputFormat::Json => print_json(&health)?,
        OutputFormat::Table => {
            println!(
                "{} {}",
                health.service_name.bold(),
                color_status(&health.overall_status)
            );
            let rows = health
                .environments
                .into_iter()
                .flat_map(|env| {
                    let (name, context) = (env.name, env.context);
                    env.deployments.into_iter().map(move |d| HealthRow {
                        environment: name.clone(),
                        context: context.clone(),
                        deployment: d.name,
                        ready: format!("{}/{}", d.ready_replicas, d.desired_replicas),
                        status: color_status(&d.status),
                    })
                })
                .collect();
            print_rows(rows);
        }
    }
    Ok(())
}

pub async fn resolve(
    client: &ApiClient,
    deployment: &str,
    namespace: &str,
    context: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let path = format!(
        "service-catalog/resolve{}",
        query(&[
            ("deployment", Some(deployment.to_string())),
            ("namespace", Some(namespace.to_string())),
            ("context", context),
        ])
    );
    let resolved: ServiceContext = client.get(&path).await?;

    match format {
        OutputFormat::Json => print_json(&resolved)?,
        OutputFormat::Table if !resolved.found => {
            print_warning(&format!("{}/{} is not owned by any service", namespace, deployment));
        }
        OutputFormat::Table => {
            println!("Service:      {}", resolved.service_name.bold());
            println!("Tier:         {}", resolved.service_tier);
            println!("Environment:  {}", resolved.environment);
            println!("Team:         {}", resolved.team);
        }
    }
    Ok(())
}
