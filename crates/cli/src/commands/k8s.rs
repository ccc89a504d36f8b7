//! Cluster and deployment commands

use anyhow::Result;
use tabled::Tabled;

use crate::client::{query, segment, ApiClient, Cluster, Deployment, OperationResponse, Page, ScaleRequest};
use crate::output::{color_status, or_dash, print_json, print_rows, print_success, OutputFormat};

#[derive(Tabled)]
struct ClusterRow {
    #[tabled(rename = "Context")]
    context: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Version")]
    version: String,
}

#[derive(Tabled)]
struct DeploymentRow {
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Ready")]
    ready: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Age")]
    age: String,
}

impl From<Deployment> for DeploymentRow {
    fn from(d: Deployment) -> Self {
        let service = d
            .service_context
            .filter(|c| c.found)
            .map(|c| format!("{} ({})", c.service_name, c.service_tier));
        Self {
            ready: format!("{}/{}", d.replicas.ready, d.replicas.desired),
            status: color_status(&d.status),
            service: or_dash(service.as_deref()),
            age: or_dash(d.age.as_deref()),
            namespace: d.namespace,
            name: d.name,
        }
    }
}

pub async fn list_clusters(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let clusters: Vec<Cluster> = client.get("k8s/clusters").await?;

    match format {
        OutputFormat::Json => print_json(&clusters)?,
        OutputFormat::Table => print_rows(
            clusters
                .into_iter()
                .map(|c| ClusterRow {
                    version: or_dash(c.server_version.as_deref()),
                    status: color_status(&c.status),
                    context: c.context,
                    name: c.name,
                })
                .collect(),
        ),
    }
    Ok(())
}

pub async fn list_deployments(
    client: &ApiClient,
    context: &str,
    namespace: Option<String>,
    search: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let path = format!(
        "k8s/clusters/{}/deployments{}",
        segment(context),
        query(&[("namespace", namespace), ("search", search)])
    );
    let page: Page<Deployment> = client.get(&path).await?;

    match format {
        OutputFormat::Json => print_json(&page)?,
        OutputFormat::Table => print_rows(page.items.into_iter().map(DeploymentRow::from).collect()),
    }
    Ok(())
}

fn deployment_path(context: &str, namespace: &str, name: &str, action: &str) -> String {
    format!(
        "k8s/clusters/{}/namespaces/{}/deployments/{}/{}",
        segment(context),
        segment(namespace),
        segment(name),
        action
    )
}

fn report(result: OperationResponse, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Table => print_success(&result.message),
    }
    Ok(())
}

pub async fn scale(
    client: &ApiClient,
    context: &str,
    namespace: &str,
    name: &str,
    replicas: i32,
    format: OutputFormat,
) -> Result<()> {
    if !(0..=100).contains(&replicas) {
        anyhow::bail!("replicas must be between 0 and 100, got {}", replicas);
    }
    let result: OperationResponse = client
        .put(&deployment_path(context, namespace, name, "scale"), &ScaleRequest { replicas })
        .await?;
    report(result, format)
}

pub async fn restart(
    client: &ApiClient,
    context: &str,
    namespace: &str,
    name: &str,
    format: OutputFormat,
) -> Result<()> {
    let result: OperationResponse = client
        .post(&deployment_path(context, namespace, name, "restart"), &serde_json::json!({}))
        .await?;
    report(result, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Identity, Replicas, ServiceContext};

    #[test]
    fn test_deployment_path() {
        assert_eq!(
            deployment_path("docker-desktop", "shop", "api", "scale"),
            "k8s/clusters/docker-desktop/namespaces/shop/deployments/api/scale"
        );
    }

    #[test]
    fn test_row_shows_resolved_service() {
        let deployment = Deployment {
            name: "api".into(),
            namespace: "shop".into(),
            replicas: Replicas { desired: 3, ready: 2 },
            status: "degraded".into(),
            age: None,
            service_context: Some(ServiceContext {
                service_name: "checkout".into(),
                service_tier: "TIER-1".into(),
                environment: "prod".into(),
                team: "shop-team".into(),
                found: true,
            }),
        };
        let row = DeploymentRow::from(deployment);
        assert_eq!(row.ready, "2/3");
        assert_eq!(row.service, "checkout (TIER-1)");
        assert_eq!(row.age, "-");
    }

    #[tokio::test]
    async fn test_scale_out_of_range_never_calls_server() {
        let client = ApiClient::new("http://127.0.0.1:9", Identity::default()).unwrap();
        let err = scale(&client, "ctx", "shop", "api", 101, OutputFormat::Json)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("between 0 and 100"));
    }

    #[tokio::test]
    async fn test_restart_posts_to_deployment() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/k8s/clusters/docker-desktop/namespaces/shop/deployments/api/restart")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"success":true,"message":"deployment api restart triggered","operation":"restart","resource":"docker-desktop/shop/api"}"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url(), Identity::default()).unwrap();
        restart(&client, "docker-desktop", "shop", "api", OutputFormat::Json)
            .await
            .unwrap();
        mock.assert_async().await;
    }
}
