//! MCP surface: exposes the page operations and wiki selection as tools.

use std::future::Future;
use std::sync::Arc;

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::RegistryError;
use crate::gateway::{WikiGateway, discover_profile, wiki_key_for_url};
use crate::pages::{self, CreatePageRequest, ToolOutput, UpdatePageRequest};
use crate::registry::WikiRegistry;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SetWikiRequest {
    #[schemars(description = "Key of a configured wiki, or the URL of a wiki to register and use")]
    pub wiki: String,
}

#[derive(Clone)]
pub struct WikiEditServer {
    registry: Arc<WikiRegistry>,
    gateway: Arc<dyn WikiGateway>,
    tool_router: ToolRouter<Self>,
}

impl WikiEditServer {
    pub fn new(registry: Arc<WikiRegistry>, gateway: Arc<dyn WikiGateway>) -> Self {
        Self {
            registry,
            gateway,
            tool_router: Self::tool_router(),
        }
    }

    pub fn registry(&self) -> &WikiRegistry {
        &self.registry
    }

    /// Configured wikis are matched by `host[:port]` and used as is; only
    /// unknown hosts are discovered and registered.
    async fn switch_to_url(&self, wiki_url: &str) -> Result<(), String> {
        let key = wiki_key_for_url(wiki_url).map_err(|error| error.to_string())?;
        if !self.registry.contains(&key) {
            let (key, profile) = discover_profile(&*self.gateway, wiki_url)
                .await
                .map_err(|error| error.to_string())?;
            self.registry.update_profile(&key, &profile);
        }
        self.registry
            .set_current(&key)
            .map_err(|error| error.to_string())
    }

    fn current_wiki_summary(&self) -> String {
        let profile = self.registry.current_profile();
        format!(
            "Current wiki: {} ({}) [{}]",
            profile.site_name,
            profile.server_url,
            self.registry.current_key()
        )
    }
}

#[tool_router]
impl WikiEditServer {
    #[tool(
        name = "create-page",
        description = "Creates a wiki page with the provided content.",
        annotations(title = "Create page", read_only_hint = false, destructive_hint = true)
    )]
    async fn create_page(
        &self,
        Parameters(request): Parameters<CreatePageRequest>,
    ) -> Result<CallToolResult, McpError> {
        info!(tool = "create-page", title = %request.title, wiki = %self.registry.current_key(), "tool call");
        let gateway = Arc::clone(&self.gateway);
        let profile = self.registry.current_profile();
        Ok(run_tool("create-page", async move {
            pages::create_page(&*gateway, &profile, &request).await
        })
        .await)
    }

    #[tool(
        name = "update-page",
        description = "Updates a wiki page. Replaces the existing content of a page with the provided content",
        annotations(title = "Update page", read_only_hint = false, destructive_hint = true)
    )]
    async fn update_page(
        &self,
        Parameters(request): Parameters<UpdatePageRequest>,
    ) -> Result<CallToolResult, McpError> {
        info!(tool = "update-page", title = %request.title, wiki = %self.registry.current_key(), "tool call");
        let gateway = Arc::clone(&self.gateway);
        let profile = self.registry.current_profile();
        Ok(run_tool("update-page", async move {
            pages::update_page(&*gateway, &profile, &request).await
        })
        .await)
    }

    #[tool(
        name = "set-wiki",
        description = "Sets the wiki that subsequent tool calls operate on. Accepts a configured wiki key or a wiki URL.",
        annotations(title = "Set wiki", read_only_hint = false, destructive_hint = false)
    )]
    async fn set_wiki(
        &self,
        Parameters(request): Parameters<SetWikiRequest>,
    ) -> Result<CallToolResult, McpError> {
        let wiki = request.wiki.trim();
        let switched = if self.registry.contains(wiki) {
            self.registry
                .set_current(wiki)
                .map_err(|error| error.to_string())
        } else if wiki.starts_with("http://") || wiki.starts_with("https://") {
            self.switch_to_url(wiki).await
        } else {
            Err(RegistryError::UnknownWiki(wiki.to_string()).to_string())
        };

        Ok(match switched {
            Ok(()) => into_call_tool_result(ToolOutput::success(vec![self.current_wiki_summary()])),
            Err(message) => {
                warn!(tool = "set-wiki", wiki, error = %message, "wiki switch failed");
                into_call_tool_result(ToolOutput::error(format!("Failed to set wiki: {message}")))
            }
        })
    }

    #[tool(
        name = "reset-wiki",
        description = "Resets the current wiki to the configured default wiki.",
        annotations(title = "Reset wiki", read_only_hint = false, destructive_hint = false)
    )]
    async fn reset_wiki(&self) -> Result<CallToolResult, McpError> {
        Ok(match self.registry.reset_to_default() {
            Ok(()) => into_call_tool_result(ToolOutput::success(vec![self.current_wiki_summary()])),
            Err(error) => {
                warn!(tool = "reset-wiki", error = %error, "wiki reset failed");
                into_call_tool_result(ToolOutput::error(format!("Failed to reset wiki: {error}")))
            }
        })
    }
}

#[tool_handler]
impl ServerHandler for WikiEditServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Create and update pages on MediaWiki sites. Use set-wiki to choose the target wiki."
                    .to_string(),
            ),
            ..Default::default()
        }
    }
}

/// Run an operation on its own task so a panic still yields an error result.
async fn run_tool<F>(tool: &'static str, task: F) -> CallToolResult
where
    F: Future<Output = ToolOutput> + Send + 'static,
{
    let output = match tokio::spawn(task).await {
        Ok(output) => output,
        Err(error) => {
            warn!(tool, error = %error, "tool task aborted");
            ToolOutput::error(format!("{tool} failed unexpectedly: {error}"))
        }
    };
    into_call_tool_result(output)
}

fn into_call_tool_result(output: ToolOutput) -> CallToolResult {
    let content = output.content.into_iter().map(Content::text).collect();
    if output.is_error {
        CallToolResult::error(content)
    } else {
        CallToolResult::success(content)
    }
}
