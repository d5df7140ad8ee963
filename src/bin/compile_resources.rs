use anyhow::{Context, Result};
use clap::Parser;
use openapi_connector::{
    config::{BaseUrl, ConnectorConfig},
    core::{compiler::SchemaCompiler, util::ReqwestClient},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Compile an OpenAPI document into resources, policies and contracts, and
/// print them as JSON.
///
/// Settings not given on the command line are read from `CONNECTOR_*`
/// environment variables.
#[derive(Parser, Debug)]
#[command(name = "compile-resources")]
struct Args {
    /// Url or path of the OpenAPI document
    #[arg(long)]
    openapi_url: Option<String>,

    /// Base url of the backend, overriding the document's servers
    #[arg(long)]
    base_url: Option<BaseUrl>,

    /// Print on a single line
    #[arg(long, default_value = "false")]
    compact: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("openapi_connector=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = ConnectorConfig::from_env().context("invalid connector configuration")?;
    if args.openapi_url.is_some() {
        config.openapi_url = args.openapi_url;
    }
    if args.base_url.is_some() {
        config.base_url = args.base_url;
    }

    let client = ReqwestClient::new()?;
    let graph = SchemaCompiler::new(&config)
        .compile_source(config.openapi_url.as_deref(), &client)
        .await
        .context("compilation failed")?;

    info!("compiled {} resources", graph.resources.len());

    let output = if args.compact {
        serde_json::to_string(&graph)?
    } else {
        serde_json::to_string_pretty(&graph)?
    };
    println!("{output}");

    Ok(())
}
