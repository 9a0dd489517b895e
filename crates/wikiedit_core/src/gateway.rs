use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::WikiProfile;
use crate::error::GatewayError;

pub const DEFAULT_USER_AGENT: &str = concat!("wikiedit/", env!("CARGO_PKG_VERSION"));

/// Calls made against the current wiki on behalf of one tool invocation.
#[async_trait]
pub trait WikiGateway: Send + Sync {
    /// Fetch a CSRF token scoped to `profile`.
    async fn fetch_write_token(&self, profile: &WikiProfile) -> Result<String, GatewayError>;

    /// Issue one authenticated POST and return the decoded body.
    async fn perform_write(
        &self,
        profile: &WikiProfile,
        params: &[(&str, String)],
    ) -> Result<Value, GatewayError>;

    /// Read `meta=siteinfo` from an arbitrary `api.php` endpoint.
    async fn fetch_site_info(&self, api_url: &str) -> Result<SiteInfo, GatewayError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteInfo {
    pub site_name: String,
    pub server: String,
    pub article_path: String,
    pub script_path: String,
}

impl SiteInfo {
    pub fn into_profile(self, scheme: &str) -> WikiProfile {
        let server = if self.server.starts_with("//") {
            format!("{scheme}:{}", self.server)
        } else {
            self.server
        };
        let article_path = match self.article_path.strip_suffix("/$1") {
            Some(stripped) if !stripped.is_empty() => stripped.to_string(),
            _ => self.article_path,
        };
        // Root installs report an empty script path; `/` keeps the profile usable.
        let script_path = if self.script_path.is_empty() {
            "/".to_string()
        } else {
            self.script_path
        };
        WikiProfile {
            site_name: self.site_name,
            server_url: server,
            article_path,
            script_path,
            auth_token: None,
            is_private: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub user_agent: String,
    pub timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_ms: 30_000,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            user_agent: env::var("WIKIEDIT_USER_AGENT")
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or(defaults.user_agent),
            timeout_ms: env::var("WIKIEDIT_HTTP_TIMEOUT_MS")
                .ok()
                .and_then(|value| value.trim().parse::<u64>().ok())
                .unwrap_or(defaults.timeout_ms),
        }
    }
}

/// `reqwest` backed gateway speaking the MediaWiki Action API.
pub struct MediaWikiGateway {
    client: Client,
    config: GatewayConfig,
}

impl MediaWikiGateway {
    pub fn from_env() -> Result<Self, GatewayError> {
        Self::new(GatewayConfig::from_env())
    }

    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .build()?;
        Ok(Self { client, config })
    }

    async fn request_json_get(
        &self,
        api_url: &str,
        token: Option<&str>,
        params: &[(&str, &str)],
    ) -> Result<Value, GatewayError> {
        let base_url =
            Url::parse(api_url).map_err(|_| GatewayError::InvalidUrl(api_url.to_string()))?;
        let mut pairs = Vec::with_capacity(params.len() + 2);
        pairs.push(("format", "json"));
        pairs.push(("formatversion", "2"));
        pairs.extend_from_slice(params);

        debug!(url = %base_url, "GET MediaWiki API");
        let request = self
            .client
            .get(base_url)
            .header("User-Agent", self.config.user_agent.clone())
            .query(&pairs);
        let response = with_bearer(request, token).send().await?;
        decode_payload(response).await
    }

    async fn request_json_post(
        &self,
        api_url: &str,
        token: Option<&str>,
        params: &[(&str, String)],
    ) -> Result<Value, GatewayError> {
        let base_url =
            Url::parse(api_url).map_err(|_| GatewayError::InvalidUrl(api_url.to_string()))?;

        debug!(url = %base_url, "POST MediaWiki API");
        let request = self
            .client
            .post(base_url)
            .header("User-Agent", self.config.user_agent.clone())
            .form(params);
        let response = with_bearer(request, token).send().await?;
        decode_payload(response).await
    }
}

#[async_trait]
impl WikiGateway for MediaWikiGateway {
    async fn fetch_write_token(&self, profile: &WikiProfile) -> Result<String, GatewayError> {
        let response = self
            .request_json_get(
                &profile.api_url(),
                profile.oauth_token(),
                &[("action", "query"), ("meta", "tokens"), ("type", "csrf")],
            )
            .await
            .map_err(|error| match error {
                GatewayError::TokenAcquisition(_) => error,
                other => GatewayError::TokenAcquisition(other.to_string()),
            })?;
        let parsed: TokenQueryResponse = serde_json::from_value(response)
            .map_err(|error| GatewayError::TokenAcquisition(error.to_string()))?;
        parsed
            .query
            .tokens
            .and_then(|tokens| tokens.csrftoken)
            .ok_or_else(|| GatewayError::TokenAcquisition("no csrftoken in response".to_string()))
    }

    async fn perform_write(
        &self,
        profile: &WikiProfile,
        params: &[(&str, String)],
    ) -> Result<Value, GatewayError> {
        self.request_json_post(&profile.api_url(), profile.oauth_token(), params)
            .await
    }

    async fn fetch_site_info(&self, api_url: &str) -> Result<SiteInfo, GatewayError> {
        let response = self
            .request_json_get(
                api_url,
                None,
                &[
                    ("action", "query"),
                    ("meta", "siteinfo"),
                    ("siprop", "general"),
                ],
            )
            .await?;
        let parsed: SiteInfoResponse = serde_json::from_value(response)
            .map_err(|error| GatewayError::Decode(error.to_string()))?;
        let general = parsed
            .query
            .general
            .ok_or_else(|| GatewayError::Decode("missing siteinfo general block".to_string()))?;
        Ok(SiteInfo {
            site_name: general.sitename,
            server: general.server,
            article_path: general.articlepath,
            script_path: general.scriptpath,
        })
    }
}

/// Register-by-URL lookup: probe `/w/api.php` then `/api.php` under the
/// URL's origin and build a profile keyed by `host[:port]`.
pub async fn discover_profile<G>(
    gateway: &G,
    wiki_url: &str,
) -> Result<(String, WikiProfile), GatewayError>
where
    G: WikiGateway + ?Sized,
{
    let url = Url::parse(wiki_url).map_err(|_| GatewayError::InvalidUrl(wiki_url.to_string()))?;
    let key = registry_key(&url).ok_or_else(|| GatewayError::InvalidUrl(wiki_url.to_string()))?;
    let origin = url.origin().ascii_serialization();

    let mut last_error = None;
    for script_path in ["/w", ""] {
        let api_url = format!("{origin}{script_path}/api.php");
        match gateway.fetch_site_info(&api_url).await {
            Ok(info) => return Ok((key, info.into_profile(url.scheme()))),
            Err(error) => {
                debug!(api_url = %api_url, error = %error, "siteinfo probe failed");
                last_error = Some(error);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| GatewayError::InvalidUrl(wiki_url.to_string())))
}

/// Registry key a wiki URL is stored under: `host[:port]`.
pub fn wiki_key_for_url(wiki_url: &str) -> Result<String, GatewayError> {
    Url::parse(wiki_url)
        .ok()
        .and_then(|url| registry_key(&url))
        .ok_or_else(|| GatewayError::InvalidUrl(wiki_url.to_string()))
}

fn registry_key(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

fn with_bearer(request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

async fn decode_payload(response: Response) -> Result<Value, GatewayError> {
    let status = response.status();
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return Err(GatewayError::Auth {
            code: status.as_str().to_string(),
            info: status.canonical_reason().unwrap_or("access denied").to_string(),
        });
    }
    if !status.is_success() {
        return Err(GatewayError::HttpStatus(status));
    }
    let payload: Value = response
        .json()
        .await
        .map_err(|error| GatewayError::Decode(error.to_string()))?;
    if let Some(error) = payload.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info");
        return Err(GatewayError::from_api(code, info));
    }
    Ok(payload)
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryResponse {
    #[serde(default)]
    query: TokenQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryPayload {
    tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenPayload {
    csrftoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SiteInfoResponse {
    #[serde(default)]
    query: SiteInfoPayload,
}

#[derive(Debug, Deserialize, Default)]
struct SiteInfoPayload {
    general: Option<SiteInfoGeneral>,
}

#[derive(Debug, Deserialize)]
struct SiteInfoGeneral {
    sitename: String,
    server: String,
    articlepath: String,
    scriptpath: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn profile(server: &MockServer, token: Option<&str>) -> WikiProfile {
        WikiProfile {
            site_name: "Mock".to_string(),
            server_url: server.uri(),
            article_path: "/wiki".to_string(),
            script_path: "/w".to_string(),
            auth_token: token.map(ToString::to_string),
            is_private: None,
        }
    }

    fn gateway() -> MediaWikiGateway {
        MediaWikiGateway::new(GatewayConfig::default()).expect("gateway")
    }

    #[tokio::test]
    async fn fetch_write_token_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/w/api.php"))
            .and(query_param("meta", "tokens"))
            .and(query_param("type", "csrf"))
            .and(header("authorization", "Bearer owner-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "batchcomplete": true,
                "query": {"tokens": {"csrftoken": "abc123+\\"}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = gateway()
            .fetch_write_token(&profile(&server, Some("owner-token")))
            .await
            .expect("token");
        assert_eq!(token, "abc123+\\");
    }

    #[tokio::test]
    async fn fetch_write_token_without_token_field_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/w/api.php"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"query": {}})))
            .mount(&server)
            .await;

        let error = gateway()
            .fetch_write_token(&profile(&server, None))
            .await
            .expect_err("must fail");
        assert!(matches!(error, GatewayError::TokenAcquisition(_)));
    }

    #[tokio::test]
    async fn perform_write_posts_form_and_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/w/api.php"))
            .and(body_string_contains("action=edit"))
            .and(body_string_contains("title=Sandbox"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "edit": {"result": "Success", "pageid": 3, "title": "Sandbox", "newrevid": 11}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let body = gateway()
            .perform_write(
                &profile(&server, None),
                &[
                    ("action", "edit".to_string()),
                    ("title", "Sandbox".to_string()),
                    ("text", "hello".to_string()),
                ],
            )
            .await
            .expect("write");
        assert_eq!(body["edit"]["newrevid"], 11);
    }

    #[tokio::test]
    async fn perform_write_maps_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/w/api.php"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": {"code": "readapidenied", "info": "You need read permission."}
            })))
            .mount(&server)
            .await;

        let error = gateway()
            .perform_write(&profile(&server, None), &[("action", "edit".to_string())])
            .await
            .expect_err("must fail");
        assert!(error.is_auth());
        assert!(error.to_string().contains("readapidenied"));
    }

    #[tokio::test]
    async fn perform_write_maps_http_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/w/api.php"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let error = gateway()
            .perform_write(&profile(&server, None), &[("action", "edit".to_string())])
            .await
            .expect_err("must fail");
        assert!(matches!(
            error,
            GatewayError::HttpStatus(StatusCode::SERVICE_UNAVAILABLE)
        ));
    }

    #[tokio::test]
    async fn perform_write_treats_unauthorized_as_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/w/api.php"))
            .and(header("authorization", "Bearer stale-token"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let error = gateway()
            .perform_write(
                &profile(&server, Some("stale-token")),
                &[("action", "edit".to_string())],
            )
            .await
            .expect_err("must fail");
        assert!(error.is_auth());
        match error {
            GatewayError::Auth { code, .. } => assert_eq!(code, "401"),
            other => panic!("expected auth failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fetch_write_token_wraps_http_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/w/api.php"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let error = gateway()
            .fetch_write_token(&profile(&server, None))
            .await
            .expect_err("must fail");
        match error {
            GatewayError::TokenAcquisition(message) => assert!(message.contains("HTTP 500")),
            other => panic!("expected token failure, got {other:?}"),
        }
    }

    #[test]
    fn wiki_key_keeps_explicit_port() {
        assert_eq!(
            wiki_key_for_url("https://wiki.example.org/wiki/Main_Page").expect("key"),
            "wiki.example.org"
        );
        assert_eq!(
            wiki_key_for_url("http://localhost:8080/index.php").expect("key"),
            "localhost:8080"
        );
        assert!(wiki_key_for_url("not a url").is_err());
    }

    #[tokio::test]
    async fn discover_profile_reads_siteinfo() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/w/api.php"))
            .and(query_param("meta", "siteinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "query": {"general": {
                    "sitename": "Mock Wiki",
                    "server": "//mock.example",
                    "articlepath": "/wiki/$1",
                    "scriptpath": "/w"
                }}
            })))
            .mount(&server)
            .await;

        let (key, profile) = discover_profile(&gateway(), &format!("{}/wiki/Main_Page", server.uri()))
            .await
            .expect("discover");
        let address = server.address();
        assert_eq!(key, format!("{}:{}", address.ip(), address.port()));
        assert_eq!(profile.site_name, "Mock Wiki");
        assert_eq!(profile.server_url, "http://mock.example");
        assert_eq!(profile.article_path, "/wiki");
        assert_eq!(profile.script_path, "/w");
    }

    #[test]
    fn site_info_keeps_root_article_template() {
        let profile = SiteInfo {
            site_name: "Root".to_string(),
            server: "https://root.example".to_string(),
            article_path: "/$1".to_string(),
            script_path: String::new(),
        }
        .into_profile("https");
        assert_eq!(profile.article_path, "/$1");
        assert_eq!(profile.script_path, "/");
        assert_eq!(profile.api_url(), "https://root.example/api.php");
        assert_eq!(profile.page_url("Main Page"), "https://root.example/Main_Page");
    }
}
