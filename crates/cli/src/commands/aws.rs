//! Cloud account and instance commands

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{query, segment, Account, AccountSummary, ApiClient, InstancePage, StateResponse};
use crate::output::{color_status, format_currency, or_dash, print_json, print_rows, print_success, OutputFormat};

/// Row for accounts table
#[derive(Tabled)]
struct AccountRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Region")]
    region: String,
    #[tabled(rename = "Status")]
    status: String,
}

/// Row for instances table
#[derive(Tabled)]
struct InstanceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Type")]
    instance_type: String,
    #[tabled(rename = "Private IP")]
    private_ip: String,
}

/// Filters accepted by `dashctl instances`
#[derive(Debug, Default)]
pub struct InstanceFilters {
    pub region: Option<String>,
    pub state: Option<String>,
    pub instance_type: Option<String>,
    pub search: Option<String>,
    pub tags: Vec<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl InstanceFilters {
    fn to_query(&self) -> Result<String> {
        let mut pairs = vec![
            ("region", self.region.clone()),
            ("state", self.state.clone()),
            ("instance_type", self.instance_type.clone()),
            ("search", self.search.clone()),
            ("limit", self.limit.map(|l| l.to_string())),
            ("offset", self.offset.map(|o| o.to_string())),
        ];
        let tags: Vec<(String, String)> = self
            .tags
            .iter()
            .map(|t| match t.split_once('=') {
                Some((k, v)) => Ok((format!("tag.{}", k), v.to_string())),
                None => Err(anyhow::anyhow!("tag filter must be key=value, got {}", t)),
            })
            .collect::<Result<_>>()?;
        pairs.extend(tags.iter().map(|(k, v)| (k.as_str(), Some(v.clone()))));
        Ok(query(&pairs))
    }
}

pub async fn list_accounts(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let accounts: Vec<Account> = client.get("aws/accounts").await?;

    match format {
        OutputFormat::Json => print_json(&accounts)?,
        OutputFormat::Table => print_rows(
            accounts
                .into_iter()
                .map(|a| AccountRow {
                    key: a.key,
                    name: a.name,
                    region: a.region,
                    status: color_status(&a.status),
                })
                .collect(),
        ),
    }
    Ok(())
}

pub async fn list_instances(
    client: &ApiClient,
    account: &str,
    filters: &InstanceFilters,
    format: OutputFormat,
) -> Result<()> {
    let path = format!("aws/{}/ec2/instances{}", segment(account), filters.to_query()?);
    let page: InstancePage = client.get(&path).await?;

    match format {
        OutputFormat::Json => print_json(&page)?,
        OutputFormat::Table => {
            let shown = page.instances.len();
            print_rows(
                page.instances
                    .into_iter()
                    .map(|i| InstanceRow {
                        id: i.instance_id,
                        name: i.name,
                        state: color_status(&i.state.name),
                        instance_type: or_dash(Some(&i.instance_type)),
                        private_ip: or_dash(i.private_ip.as_deref()),
                    })
                    .collect(),
            );
            println!("{}", format!("{} of {} instances", shown, page.total).dimmed());
        }
    }
    Ok(())
}

/// Start, stop or restart a single instance
pub async fn change_state(
    client: &ApiClient,
    action: &str,
    account: &str,
    instance_id: &str,
    region: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let path = format!(
        "aws/{}/ec2/instance/{}/{}{}",
        segment(account),
        action,
        segment(instance_id),
        query(&[("region", region)])
    );
    let result: StateResponse = client.post(&path, &serde_json::json!({})).await?;

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Table => print_success(&format!(
            "{} {}: instance is now {}",
            action,
            instance_id,
            color_status(&result.current_state)
        )),
    }
    Ok(())
}

pub async fn summary(
    client: &ApiClient,
    account: &str,
    region: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let path = format!("aws/{}/summary{}", segment(account), query(&[("region", region)]));
    let summary: AccountSummary = client.get(&path).await?;

    match format {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Table => {
            println!("{}", "Account Summary".bold());
            println!("{}", "=".repeat(40));
            println!("Account:                {}", summary.account.cyan());
            println!("Region:                 {}", summary.region);
            println!("Instances:              {}", summary.total);
            println!("  Running:              {}", summary.running.to_string().green());
            println!("  Stopped:              {}", summary.stopped);
            println!("  Transitioning:        {}", summary.pending.to_string().yellow());
            println!(
                "{}   {}",
                "Est. monthly cost:".bold(),
                format_currency(summary.estimated_monthly_cost).green().bold()
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_filters_to_query() {
        let filters = InstanceFilters {
            region: Some("eu-west-1".into()),
            state: Some("running".into()),
            tags: vec!["env=prod".into()],
            limit: Some(10),
            ..Default::default()
        };
        assert_eq!(
            filters.to_query().unwrap(),
            "?region=eu-west-1&state=running&limit=10&tag.env=prod"
        );
    }

    #[test]
    fn test_malformed_tag_rejected() {
        let filters = InstanceFilters {
            tags: vec!["env".into()],
            ..Default::default()
        };
        assert!(filters.to_query().is_err());
    }

    #[tokio::test]
    async fn test_list_instances_reads_instances_key() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/aws/prod/ec2/instances")
            .match_query(mockito::Matcher::UrlEncoded("state".into(), "running".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"instances":[{"instance_id":"i-2","name":"web","state":{"name":"running","code":16},"instance_type":"t3.micro"}],"total":1,"offset":0}"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url(), crate::client::Identity::default()).unwrap();
        let filters = InstanceFilters {
            state: Some("running".into()),
            ..Default::default()
        };
        list_instances(&client, "prod", &filters, OutputFormat::Table)
            .await
            .unwrap();
        mock.assert_async().await;
    }
}
