use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use wikiedit_core::config::ConfigSource;
use wikiedit_core::gateway::MediaWikiGateway;
use wikiedit_core::pages::{CreatePageRequest, ToolOutput, UpdatePageRequest, create_page, update_page};
use wikiedit_core::registry::WikiRegistry;
use wikiedit_core::server::WikiEditServer;

#[derive(Debug, Parser)]
#[command(
    name = "wikiedit",
    version,
    about = "MCP server and CLI for creating and updating MediaWiki pages"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH", help = "Wiki config JSON (default: $WIKIEDIT_CONFIG or config.json)")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "KEY", help = "Select the current wiki by key")]
    wiki: Option<String>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    config: Option<PathBuf>,
    wiki: Option<String>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            config: cli.config.clone(),
            wiki: cli.wiki.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the MCP server over stdio (default)")]
    Serve,
    #[command(about = "List configured wikis")]
    Wikis(WikisArgs),
    #[command(name = "create-page", about = "Create a page from a file or stdin")]
    CreatePage(CreatePageArgs),
    #[command(name = "update-page", about = "Replace the content of an existing page")]
    UpdatePage(UpdatePageArgs),
}

#[derive(Debug, Args)]
struct WikisArgs {
    #[arg(long, help = "Print as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct CreatePageArgs {
    #[arg(long)]
    title: String,
    #[arg(long, help = "Reason for creating the page")]
    comment: Option<String>,
    #[arg(long, value_name = "MODEL", help = "Content model, defaults to wikitext")]
    content_model: Option<String>,
    #[arg(long, value_name = "PATH", help = "Read page source from PATH instead of stdin")]
    source_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct UpdatePageArgs {
    #[arg(long)]
    title: String,
    #[arg(long, value_name = "REVID", help = "Revision the new source is based on")]
    latest_id: u64,
    #[arg(long, help = "Summary of the edit")]
    comment: Option<String>,
    #[arg(long, value_name = "PATH", help = "Read page source from PATH instead of stdin")]
    source_file: Option<PathBuf>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        None | Some(Commands::Serve) => run_serve(&runtime),
        Some(Commands::Wikis(args)) => run_wikis(&runtime, args),
        Some(Commands::CreatePage(args)) => run_create_page(&runtime, args),
        Some(Commands::UpdatePage(args)) => run_update_page(&runtime, args),
    }
}

fn init_tracing() {
    // stdout carries the MCP protocol; logs go to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();
}

fn run_serve(runtime: &RuntimeOptions) -> Result<()> {
    let registry = load_registry(runtime)?;
    let gateway = MediaWikiGateway::from_env().context("failed to build MediaWiki HTTP client")?;
    let server = WikiEditServer::new(registry, Arc::new(gateway));

    build_runtime()?.block_on(async move {
        info!(wiki = %server.registry().current_key(), "starting MCP server on stdio");
        let service = rmcp::serve_server(server, rmcp::transport::io::stdio())
            .await
            .context("failed to start MCP server")?;
        service.waiting().await.context("MCP server stopped")?;
        Ok::<_, anyhow::Error>(())
    })
}

fn run_wikis(runtime: &RuntimeOptions, args: WikisArgs) -> Result<()> {
    let registry = load_registry(runtime)?;
    let current = registry.current_key();
    let profiles = registry.list_profiles();

    if args.json {
        let rendered: Vec<serde_json::Value> = profiles
            .iter()
            .map(|(key, profile)| {
                let is_default = key == registry.default_key();
                let is_current = *key == current;
                serde_json::json!({
                    "key": key,
                    "sitename": profile.site_name,
                    "server": profile.server_url,
                    "articlepath": profile.article_path,
                    "scriptpath": profile.script_path,
                    "private": profile.is_private.unwrap_or(false),
                    "hasToken": profile.oauth_token().is_some(),
                    "default": is_default,
                    "current": is_current,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rendered)?);
        return Ok(());
    }

    println!("wikis: {}", profiles.len());
    for (key, profile) in &profiles {
        let mut markers = Vec::new();
        if key == registry.default_key() {
            markers.push("default");
        }
        if *key == current {
            markers.push("current");
        }
        println!(
            "  {key}{}",
            if markers.is_empty() {
                String::new()
            } else {
                format!(" [{}]", markers.join(", "))
            }
        );
        println!("    sitename: {}", profile.site_name);
        println!("    api: {}", profile.api_url());
        println!("    private: {}", format_flag(profile.is_private.unwrap_or(false)));
        println!("    token: {}", format_flag(profile.oauth_token().is_some()));
    }
    Ok(())
}

fn run_create_page(runtime: &RuntimeOptions, args: CreatePageArgs) -> Result<()> {
    let registry = load_registry(runtime)?;
    let source = read_source(args.source_file.as_deref())?;
    let request = CreatePageRequest {
        source,
        title: args.title,
        comment: args.comment,
        content_model: args.content_model,
    };
    let gateway = MediaWikiGateway::from_env().context("failed to build MediaWiki HTTP client")?;
    let profile = registry.current_profile();
    let output = build_runtime()?.block_on(create_page(&gateway, &profile, &request));
    print_output(output)
}

fn run_update_page(runtime: &RuntimeOptions, args: UpdatePageArgs) -> Result<()> {
    let registry = load_registry(runtime)?;
    let source = read_source(args.source_file.as_deref())?;
    let request = UpdatePageRequest {
        title: args.title,
        source,
        latest_id: args.latest_id,
        comment: args.comment,
    };
    let gateway = MediaWikiGateway::from_env().context("failed to build MediaWiki HTTP client")?;
    let profile = registry.current_profile();
    let output = build_runtime()?.block_on(update_page(&gateway, &profile, &request));
    print_output(output)
}

fn load_registry(runtime: &RuntimeOptions) -> Result<Arc<WikiRegistry>> {
    let source = ConfigSource::from_process(runtime.config.clone());
    if runtime.diagnostics {
        eprintln!("[diagnostics]\n{}", source.diagnostics());
    }
    let registry = WikiRegistry::load(&source)?;
    if let Some(key) = &runtime.wiki {
        registry.set_current(key)?;
    }
    if runtime.diagnostics {
        eprintln!(
            "current_wiki={}\napi_url={}",
            registry.current_key(),
            registry.current_profile().api_url()
        );
    }
    Ok(Arc::new(registry))
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

fn read_source(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", normalize_path(path))),
        None => io::read_to_string(io::stdin()).context("failed to read page source from stdin"),
    }
}

fn print_output(output: ToolOutput) -> Result<()> {
    if output.is_error {
        bail!("{}", output.text());
    }
    for block in &output.content {
        println!("{block}");
    }
    Ok(())
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
