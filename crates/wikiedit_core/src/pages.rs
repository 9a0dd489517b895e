use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::WikiProfile;
use crate::error::GatewayError;
use crate::gateway::WikiGateway;

pub const SUCCESS_RESULT: &str = "Success";

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatePageRequest {
    #[schemars(description = "Page content in the format specified by the contentModel parameter")]
    pub source: String,
    #[schemars(description = "Wiki page title")]
    pub title: String,
    #[schemars(description = "Reason for creating the page")]
    pub comment: Option<String>,
    #[schemars(description = "Type of content on the page. Defaults to \"wikitext\"")]
    pub content_model: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePageRequest {
    #[schemars(description = "Wiki page title")]
    pub title: String,
    #[schemars(description = "Page content in the same content model of the existing page")]
    pub source: String,
    #[schemars(description = "Identifier for the revision used as the base for the new source")]
    pub latest_id: u64,
    #[schemars(description = "Summary of the edit")]
    pub comment: Option<String>,
}

/// Text blocks handed back to the tool caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub content: Vec<String>,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn success(content: Vec<String>) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![message.into()],
            is_error: true,
        }
    }

    pub fn text(&self) -> String {
        self.content.join("\n")
    }
}

/// Outcome of one `action=edit` call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PageEditResult {
    #[serde(rename = "result", default)]
    pub result_status: Option<String>,
    #[serde(rename = "pageid", default)]
    pub page_id: Option<u64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "oldrevid", default)]
    pub old_revision_id: Option<u64>,
    #[serde(rename = "newrevid", default)]
    pub new_revision_id: Option<u64>,
}

#[derive(Debug, Error)]
pub enum EditFailure {
    #[error("Could not obtain CSRF token")]
    MissingToken,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("No data returned from API")]
    NoData,
    #[error("{0}")]
    Unsuccessful(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageAction {
    Create,
    Update,
}

impl PageAction {
    fn tool_name(self) -> &'static str {
        match self {
            Self::Create => "create-page",
            Self::Update => "update-page",
        }
    }

    fn verb(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
        }
    }

    fn past_tense(self) -> &'static str {
        match self {
            Self::Create => "created",
            Self::Update => "updated",
        }
    }
}

/// Edit summary attached to every write: the caller's comment tagged with
/// the tool that made it.
pub fn format_edit_comment(tool: &str, comment: Option<&str>) -> String {
    let suffix = format!("(via {tool} on wikiedit)");
    match comment.map(str::trim).filter(|value| !value.is_empty()) {
        Some(comment) => format!("{comment} {suffix}"),
        None => format!("Automated edit {suffix}"),
    }
}

pub async fn create_page<G>(
    gateway: &G,
    profile: &WikiProfile,
    request: &CreatePageRequest,
) -> ToolOutput
where
    G: WikiGateway + ?Sized,
{
    let mut extra = Vec::new();
    if let Some(model) = request
        .content_model
        .as_deref()
        .filter(|model| !model.is_empty())
    {
        extra.push(("contentmodel", model.to_string()));
    }
    run_edit(
        gateway,
        profile,
        PageAction::Create,
        &request.title,
        &request.source,
        request.comment.as_deref(),
        extra,
    )
    .await
}

pub async fn update_page<G>(
    gateway: &G,
    profile: &WikiProfile,
    request: &UpdatePageRequest,
) -> ToolOutput
where
    G: WikiGateway + ?Sized,
{
    run_edit(
        gateway,
        profile,
        PageAction::Update,
        &request.title,
        &request.source,
        request.comment.as_deref(),
        vec![("baserevid", request.latest_id.to_string())],
    )
    .await
}

async fn run_edit<G>(
    gateway: &G,
    profile: &WikiProfile,
    action: PageAction,
    title: &str,
    source: &str,
    comment: Option<&str>,
    extra: Vec<(&'static str, String)>,
) -> ToolOutput
where
    G: WikiGateway + ?Sized,
{
    match execute_edit(gateway, profile, action, title, source, comment, extra).await {
        Ok(result) => {
            info!(
                tool = action.tool_name(),
                title = result.title.as_deref().unwrap_or(title),
                newrevid = ?result.new_revision_id,
                "page edit succeeded"
            );
            ToolOutput::success(format_success(profile, action, title, &result))
        }
        Err(failure) => {
            let auth = matches!(&failure, EditFailure::Gateway(error) if error.is_auth());
            warn!(tool = action.tool_name(), title, auth, error = %failure, "page edit failed");
            ToolOutput::error(format!("Failed to {} page: {failure}", action.verb()))
        }
    }
}

async fn execute_edit<G>(
    gateway: &G,
    profile: &WikiProfile,
    action: PageAction,
    title: &str,
    source: &str,
    comment: Option<&str>,
    extra: Vec<(&'static str, String)>,
) -> Result<PageEditResult, EditFailure>
where
    G: WikiGateway + ?Sized,
{
    let token = gateway.fetch_write_token(profile).await?;
    if token.is_empty() {
        return Err(EditFailure::MissingToken);
    }

    let mut params = vec![
        ("action", "edit".to_string()),
        ("title", title.to_string()),
        ("text", source.to_string()),
        ("summary", format_edit_comment(action.tool_name(), comment)),
        ("token", token),
        ("format", "json".to_string()),
    ];
    params.extend(extra);

    let response = gateway.perform_write(profile, &params).await?;
    interpret_edit_response(&response)
}

fn interpret_edit_response(response: &Value) -> Result<PageEditResult, EditFailure> {
    let edit = match response.get("edit") {
        Some(edit) if edit.is_object() => edit,
        _ => return Err(EditFailure::NoData),
    };
    let result: PageEditResult = serde_json::from_value(edit.clone())
        .map_err(|error| EditFailure::Gateway(GatewayError::Decode(error.to_string())))?;
    match result.result_status.as_deref() {
        Some(SUCCESS_RESULT) => Ok(result),
        Some(other) => Err(EditFailure::Unsuccessful(other.to_string())),
        None => Err(EditFailure::Unsuccessful("unknown result".to_string())),
    }
}

fn format_success(
    profile: &WikiProfile,
    action: PageAction,
    requested_title: &str,
    result: &PageEditResult,
) -> Vec<String> {
    let title = result.title.as_deref().unwrap_or(requested_title);
    let page_id = result
        .page_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let revision = result
        .new_revision_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "unchanged".to_string());
    vec![
        format!(
            "Page {} successfully: {}",
            action.past_tense(),
            profile.page_url(title)
        ),
        [
            "Page object:".to_string(),
            format!("Page ID: {page_id}"),
            format!("Title: {title}"),
            format!("Latest revision ID: {revision}"),
            format!("Result: {}", result.result_status.as_deref().unwrap_or(SUCCESS_RESULT)),
        ]
        .join("\n"),
    ]
}
