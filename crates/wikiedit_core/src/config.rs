use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const CONFIG_ENV_VAR: &str = "WIKIEDIT_CONFIG";
pub const DEFAULT_CONFIG_FILENAME: &str = "config.json";
pub const DEFAULT_WIKI_KEY: &str = "en.wikipedia.org";

/// Connection profile for one remote MediaWiki instance.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct WikiProfile {
    /// `$wgSitename` of the wiki.
    #[serde(rename = "sitename", default)]
    pub site_name: String,
    /// `$wgServer`, e.g. `https://en.wikipedia.org`.
    #[serde(rename = "server")]
    pub server_url: String,
    /// `$wgArticlePath`, either `/wiki` or a `/wiki/$1` template.
    #[serde(rename = "articlepath")]
    pub article_path: String,
    /// `$wgScriptPath`, the directory holding `api.php`.
    #[serde(rename = "scriptpath")]
    pub script_path: String,
    /// OAuth owner-only consumer access token.
    #[serde(rename = "token", default)]
    pub auth_token: Option<String>,
    /// `$wgGroupPermissions['*']['read'] = false` on the wiki.
    #[serde(rename = "private", default)]
    pub is_private: Option<bool>,
}

impl WikiProfile {
    /// Token to send with requests, if it is usable at all.
    pub fn oauth_token(&self) -> Option<&str> {
        self.auth_token.as_deref().filter(|token| is_token_valid(Some(token)))
    }

    pub fn api_url(&self) -> String {
        format!(
            "{}{}/api.php",
            self.server_url.trim_end_matches('/'),
            self.script_path.trim_end_matches('/')
        )
    }

    pub fn page_url(&self, title: &str) -> String {
        let server = self.server_url.trim_end_matches('/');
        let encoded = encode_title(title);
        if self.article_path.contains("$1") {
            format!("{server}{}", self.article_path.replace("$1", &encoded))
        } else {
            format!(
                "{server}{}/{encoded}",
                self.article_path.trim_end_matches('/')
            )
        }
    }

    /// Name of the first required field that is blank.
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.server_url.trim().is_empty() {
            Some("server")
        } else if self.article_path.trim().is_empty() {
            Some("articlepath")
        } else if self.script_path.trim().is_empty() {
            Some("scriptpath")
        } else {
            None
        }
    }
}

pub fn is_token_valid(token: Option<&str>) -> bool {
    matches!(token, Some(value) if !value.is_empty())
}

/// On-disk shape of the wiki configuration file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WikiConfigFile {
    pub default_wiki: String,
    #[serde(default)]
    pub wikis: BTreeMap<String, WikiProfile>,
}

impl Default for WikiConfigFile {
    fn default() -> Self {
        let mut wikis = BTreeMap::new();
        wikis.insert(
            DEFAULT_WIKI_KEY.to_string(),
            WikiProfile {
                site_name: "Wikipedia".to_string(),
                server_url: "https://en.wikipedia.org".to_string(),
                article_path: "/wiki".to_string(),
                script_path: "/w".to_string(),
                auth_token: None,
                is_private: Some(false),
            },
        );
        wikis.insert(
            "localhost:8080".to_string(),
            WikiProfile {
                site_name: "Local MediaWiki Docker".to_string(),
                server_url: "http://localhost:8080".to_string(),
                article_path: "/wiki".to_string(),
                script_path: "/w".to_string(),
                auth_token: None,
                is_private: Some(false),
            },
        );
        Self {
            default_wiki: DEFAULT_WIKI_KEY.to_string(),
            wikis,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Default => "default",
        }
    }
}

/// Where the wiki configuration is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSource {
    pub path: PathBuf,
    pub source: ValueSource,
}

impl ConfigSource {
    /// Resolve the config path: flag > env > `config.json`.
    pub fn resolve(flag: Option<PathBuf>, env_value: Option<String>) -> Self {
        if let Some(path) = flag {
            return Self {
                path,
                source: ValueSource::Flag,
            };
        }
        if let Some(value) = env_value {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Self {
                    path: PathBuf::from(trimmed),
                    source: ValueSource::Env,
                };
            }
        }
        Self {
            path: PathBuf::from(DEFAULT_CONFIG_FILENAME),
            source: ValueSource::Default,
        }
    }

    pub fn from_process(flag: Option<PathBuf>) -> Self {
        Self::resolve(flag, env::var(CONFIG_ENV_VAR).ok())
    }

    pub fn diagnostics(&self) -> String {
        format!(
            "config_path={} ({})\nconfig_exists={}",
            self.path.to_string_lossy().replace('\\', "/"),
            self.source.as_str(),
            self.path.exists()
        )
    }
}

/// Load the wiki configuration. A missing file yields the built-in defaults.
pub fn load_config(config_path: &Path) -> Result<WikiConfigFile> {
    if !config_path.exists() {
        return Ok(WikiConfigFile::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: WikiConfigFile = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn encode_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    for ch in title.trim().chars() {
        match ch {
            ' ' => out.push('_'),
            'A'..='Z' | 'a'..='z' | '0'..='9' => out.push(ch),
            '-' | '_' | '.' | '~' | '!' | '*' | '\'' | '(' | ')' | ':' | '/' | ',' | ';' | '@'
            | '$' => out.push(ch),
            _ => {
                let mut buffer = [0u8; 4];
                for byte in ch.encode_utf8(&mut buffer).bytes() {
                    out.push_str(&format!("%{byte:02X}"));
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn profile(article_path: &str) -> WikiProfile {
        WikiProfile {
            site_name: "Example".to_string(),
            server_url: "https://wiki.example.org/".to_string(),
            article_path: article_path.to_string(),
            script_path: "/w".to_string(),
            auth_token: None,
            is_private: None,
        }
    }

    #[test]
    fn builtin_defaults_contain_default_wiki() {
        let config = WikiConfigFile::default();
        assert_eq!(config.default_wiki, "en.wikipedia.org");
        assert!(config.wikis.contains_key("en.wikipedia.org"));
        assert!(config.wikis.contains_key("localhost:8080"));
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/config.json")).expect("load config");
        assert_eq!(config, WikiConfigFile::default());
    }

    #[test]
    fn load_config_parses_wikis() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.json");
        fs::write(
            &config_path,
            r#"{
  "defaultWiki": "wiki.example.org",
  "wikis": {
    "wiki.example.org": {
      "sitename": "Example",
      "server": "https://wiki.example.org",
      "articlepath": "/wiki",
      "scriptpath": "/w",
      "token": "abc123",
      "private": true
    },
    "other.example.org": {
      "sitename": "Other",
      "server": "https://other.example.org",
      "articlepath": "/$1",
      "scriptpath": "",
      "token": null
    }
  }
}"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.default_wiki, "wiki.example.org");
        let example = &config.wikis["wiki.example.org"];
        assert_eq!(example.auth_token.as_deref(), Some("abc123"));
        assert_eq!(example.is_private, Some(true));
        let other = &config.wikis["other.example.org"];
        assert!(other.auth_token.is_none());
        assert!(other.is_private.is_none());
    }

    #[test]
    fn load_config_returns_error_for_invalid_json() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.json");
        fs::write(&config_path, "{ \"defaultWiki\": ").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn resolve_prefers_flag_then_env_then_default() {
        let flagged = ConfigSource::resolve(
            Some(PathBuf::from("flag.json")),
            Some("env.json".to_string()),
        );
        assert_eq!(flagged.path, PathBuf::from("flag.json"));
        assert_eq!(flagged.source, ValueSource::Flag);

        let from_env = ConfigSource::resolve(None, Some(" env.json ".to_string()));
        assert_eq!(from_env.path, PathBuf::from("env.json"));
        assert_eq!(from_env.source, ValueSource::Env);

        let fallback = ConfigSource::resolve(None, Some("   ".to_string()));
        assert_eq!(fallback.path, PathBuf::from("config.json"));
        assert_eq!(fallback.source, ValueSource::Default);
    }

    #[test]
    fn token_validity() {
        assert!(!is_token_valid(None));
        assert!(!is_token_valid(Some("")));
        assert!(is_token_valid(Some("abc")));

        let mut wiki = profile("/wiki");
        assert_eq!(wiki.oauth_token(), None);
        wiki.auth_token = Some(String::new());
        assert_eq!(wiki.oauth_token(), None);
        wiki.auth_token = Some("secret".to_string());
        assert_eq!(wiki.oauth_token(), Some("secret"));
    }

    #[test]
    fn api_url_joins_server_and_script_path() {
        assert_eq!(
            profile("/wiki").api_url(),
            "https://wiki.example.org/w/api.php"
        );
        let mut root = profile("/wiki");
        root.script_path = "/".to_string();
        assert_eq!(root.api_url(), "https://wiki.example.org/api.php");
    }

    #[test]
    fn page_url_encodes_title() {
        assert_eq!(
            profile("/wiki").page_url("Main Page"),
            "https://wiki.example.org/wiki/Main_Page"
        );
        assert_eq!(
            profile("/wiki/$1").page_url("What? 100%"),
            "https://wiki.example.org/wiki/What%3F_100%25"
        );
        assert_eq!(
            profile("/wiki").page_url("Café"),
            "https://wiki.example.org/wiki/Caf%C3%A9"
        );
    }

    #[test]
    fn missing_field_reports_first_blank() {
        assert_eq!(profile("/wiki").missing_field(), None);
        let mut blank = profile("");
        assert_eq!(blank.missing_field(), Some("articlepath"));
        blank.server_url = " ".to_string();
        assert_eq!(blank.missing_field(), Some("server"));
    }
}
