//! API client for the dash-ops server

use anyhow::{Context, Result};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;

pub const USER_HEADER: &str = "X-Forwarded-User";
pub const GROUPS_HEADER: &str = "X-Forwarded-Groups";

/// Identity forwarded with every request
#[derive(Debug, Clone, Default)]
pub struct Identity {
    pub user: Option<String>,
    pub groups: Vec<String>,
}

/// API client for the dash-ops HTTP surface
pub struct ApiClient {
    client: Client,
    base_url: Url,
    identity: Identity,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str, identity: Identity) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self {
            client,
            base_url,
            identity,
        })
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self.base_url.join(path).context("Invalid path")?;
        let mut request = self.client.request(method, url);
        if let Some(user) = &self.identity.user {
            request = request
                .header(USER_HEADER, user)
                .header(GROUPS_HEADER, self.identity.groups.join(","));
        }
        Ok(request)
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            anyhow::bail!("API error ({}): {}", status, message);
        }

        response.json().await.context("Failed to parse response")
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .request(Method::GET, path)?
            .send()
            .await
            .context("Failed to send request")?;
        Self::decode(response).await
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let response = self
            .request(Method::POST, path)?
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;
        Self::decode(response).await
    }

    /// Make a PUT request with JSON body
    pub async fn put<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let response = self
            .request(Method::PUT, path)?
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;
        Self::decode(response).await
    }
}

/// Percent-encode a single path segment
pub fn segment(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// Render query pairs, skipping unset values
pub fn query(pairs: &[(&str, Option<String>)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        if let Some(value) = value {
            serializer.append_pair(key, value);
        }
    }
    let encoded = serializer.finish();
    if encoded.is_empty() {
        encoded
    } else {
        format!("?{}", encoded)
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub name: String,
    pub key: String,
    pub region: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceState {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub instance_id: String,
    pub name: String,
    pub state: InstanceState,
    #[serde(default)]
    pub instance_type: String,
    #[serde(default)]
    pub private_ip: Option<String>,
    #[serde(default)]
    pub public_ip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstancePage {
    pub instances: Vec<Instance>,
    pub total: usize,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateResponse {
    pub current_state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSummary {
    pub account: String,
    pub region: String,
    pub total: usize,
    pub running: usize,
    pub stopped: usize,
    pub pending: usize,
    pub estimated_monthly_cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
    pub context: String,
    pub status: String,
    #[serde(default)]
    pub server_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Replicas {
    pub desired: i32,
    pub ready: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceContext {
    pub service_name: String,
    pub service_tier: String,
    pub environment: String,
    pub team: String,
    pub found: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub name: String,
    pub namespace: String,
    pub replicas: Replicas,
    pub status: String,
    #[serde(default)]
    pub age: Option<String>,
    #[serde(default)]
    pub service_context: Option<ServiceContext>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleRequest {
    pub replicas: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResponse {
    pub success: bool,
    pub message: String,
    pub operation: String,
    pub resource: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMetadata {
    pub name: String,
    pub tier: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub updated_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub github_team: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub description: String,
    pub team: Team,
    /// Kept opaque; only passed through for JSON output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub metadata: ServiceMetadata,
    pub spec: ServiceSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceList {
    pub services: Vec<Service>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentHealth {
    pub name: String,
    pub ready_replicas: i32,
    pub desired_replicas: i32,
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentHealth {
    pub name: String,
    pub context: String,
    pub namespace: String,
    pub status: String,
    pub deployments: Vec<DeploymentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub service_name: String,
    pub overall_status: String,
    pub environments: Vec<EnvironmentHealth>,
    pub last_updated: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_skips_unset() {
        assert_eq!(query(&[("region", None)]), "");
        assert_eq!(
            query(&[("region", Some("eu-west-1".into())), ("state", None), ("search", Some("web api".into()))]),
            "?region=eu-west-1&search=web+api"
        );
    }

    #[test]
    fn test_segment_escapes_separators() {
        assert_eq!(segment("prod"), "prod");
        assert_eq!(segment("a/b c"), "a%2Fb%20c");
    }

    #[tokio::test]
    async fn test_identity_headers_and_error_body() {
        let mut server = mockito::Server::new_async().await;
        let denied = server
            .mock("POST", "/aws/prod/ec2/instance/stop/i-aaaaaaaa")
            .match_header("x-forwarded-user", "alice")
            .match_header("x-forwarded-groups", "dev,ops")
            .with_status(403)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":"user does not have permission to stop instances in account prod"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(
            &server.url(),
            Identity {
                user: Some("alice".into()),
                groups: vec!["dev".into(), "ops".into()],
            },
        )
        .unwrap();

        let err = client
            .post::<StateResponse, _>("aws/prod/ec2/instance/stop/i-aaaaaaaa", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("403"));
        assert!(err.to_string().contains("permission to stop"));
        denied.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_decodes_body() {
        let mut server = mockito::Server::new_async().await;
        let _accounts = server
            .mock("GET", "/aws/accounts")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"name":"Prod","key":"prod","region":"us-east-1","status":"active"}]"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url(), Identity::default()).unwrap();
        let accounts: Vec<Account> = client.get("aws/accounts").await.unwrap();
        assert_eq!(accounts[0].key, "prod");
    }
}
