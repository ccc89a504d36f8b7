//! dashctl: command-line client for the dash-ops control plane
//!
//! Lists cloud instances, cluster workloads and catalog services, and
//! drives the start/stop/scale/restart operations exposed over HTTP.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{aws, k8s, services};
use output::{print_error, OutputFormat};

/// dash-ops control plane CLI
#[derive(Parser)]
#[command(name = "dashctl")]
#[command(author, version, about = "CLI for the dash-ops control plane", long_about = None)]
pub struct Cli {
    /// API endpoint URL (falls back to the config file, then http://localhost:8080)
    #[arg(long, env = "DASHCTL_API_URL")]
    pub api_url: Option<String>,

    /// User identity forwarded to the server
    #[arg(long, env = "DASHCTL_USER")]
    pub user: Option<String>,

    /// Comma-separated groups forwarded to the server
    #[arg(long, env = "DASHCTL_GROUPS")]
    pub groups: Option<String>,

    /// Output format
    #[arg(long, short, value_enum)]
    pub format: Option<OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List configured cloud accounts
    Accounts,

    /// List instances in an account
    Instances {
        account: String,
        #[arg(long)]
        region: Option<String>,
        /// Filter by state (running, stopped, ...)
        #[arg(long)]
        state: Option<String>,
        #[arg(long)]
        instance_type: Option<String>,
        /// Free-text search over id, name and IPs
        #[arg(long)]
        search: Option<String>,
        /// Tag filter as key=value, repeatable
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        offset: Option<usize>,
    },

    /// Start an instance
    Start {
        account: String,
        instance_id: String,
        #[arg(long)]
        region: Option<String>,
    },

    /// Stop an instance
    Stop {
        account: String,
        instance_id: String,
        #[arg(long)]
        region: Option<String>,
    },

    /// Restart an instance
    Restart {
        account: String,
        instance_id: String,
        #[arg(long)]
        region: Option<String>,
    },

    /// Show instance counts and estimated cost for an account
    Summary {
        account: String,
        #[arg(long)]
        region: Option<String>,
    },

    /// List configured clusters
    Clusters,

    /// List deployments in a cluster
    Deployments {
        context: String,
        #[arg(long, short)]
        namespace: Option<String>,
        #[arg(long)]
        search: Option<String>,
    },

    /// Scale a deployment
    Scale {
        context: String,
        namespace: String,
        deployment: String,
        #[arg(long, short)]
        replicas: i32,
    },

    /// Trigger a rolling restart of a deployment
    RestartDeployment {
        context: String,
        namespace: String,
        deployment: String,
    },

    /// Service catalog commands
    #[command(subcommand)]
    Services(ServiceCommands),

    /// Find the service that owns a deployment
    Resolve {
        deployment: String,
        #[arg(long, short)]
        namespace: String,
        #[arg(long)]
        context: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ServiceCommands {
    /// List all services
    List,
    /// Show a single service
    Get { name: String },
    /// Show live health of a service across its environments
    Health { name: String },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run(Cli::parse()).await {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let file = config::Config::load()?;

    let api_url = cli
        .api_url
        .or(file.api_url)
        .unwrap_or_else(|| config::DEFAULT_API_URL.to_string());
    let identity = client::Identity {
        user: cli.user.or(file.user),
        groups: cli
            .groups
            .as_deref()
            .map(config::parse_groups)
            .unwrap_or(file.groups),
    };
    let format = cli
        .format
        .or_else(|| file.default_format.as_deref().and_then(OutputFormat::parse))
        .unwrap_or_default();

    let client = client::ApiClient::new(&api_url, identity)?;

    match cli.command {
        Commands::Accounts => aws::list_accounts(&client, format).await?,
        Commands::Instances {
            account,
            region,
            state,
            instance_type,
            search,
            tags,
            limit,
            offset,
        } => {
            let filters = aws::InstanceFilters {
                region,
                state,
                instance_type,
                search,
                tags,
                limit,
                offset,
            };
            aws::list_instances(&client, &account, &filters, format).await?;
        }
        Commands::Start {
            account,
            instance_id,
            region,
        } => aws::change_state(&client, "start", &account, &instance_id, region, format).await?,
        Commands::Stop {
            account,
            instance_id,
            region,
        } => aws::change_state(&client, "stop", &account, &instance_id, region, format).await?,
        Commands::Restart {
            account,
            instance_id,
            region,
        } => aws::change_state(&client, "restart", &account, &instance_id, region, format).await?,
        Commands::Summary { account, region } => aws::summary(&client, &account, region, format).await?,
        Commands::Clusters => k8s::list_clusters(&client, format).await?,
        Commands::Deployments {
            context,
            namespace,
            search,
        } => k8s::list_deployments(&client, &context, namespace, search, format).await?,
        Commands::Scale {
            context,
            namespace,
            deployment,
            replicas,
        } => k8s::scale(&client, &context, &namespace, &deployment, replicas, format).await?,
        Commands::RestartDeployment {
            context,
            namespace,
            deployment,
        } => k8s::restart(&client, &context, &namespace, &deployment, format).await?,
        Commands::Services(cmd) => match cmd {
            ServiceCommands::List => services::list(&client, format).await?,
            ServiceCommands::Get { name } => services::get(&client, &name, format).await?,
            ServiceCommands::Health { name } => services::health(&client, &name, format).await?,
        },
        Commands::Resolve {
            deployment,
            namespace,
            context,
        } => services::resolve(&client, &deployment, &namespace, context, format).await?,
    }

    Ok(())
}
