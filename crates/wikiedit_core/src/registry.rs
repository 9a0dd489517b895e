use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::{Context, Result};
use tracing::info;

use crate::config::{ConfigSource, WikiConfigFile, WikiProfile, load_config};
use crate::error::RegistryError;

#[derive(Debug, Clone)]
struct CurrentWiki {
    key: String,
    profile: Arc<WikiProfile>,
}

/// Set of configured wikis and the one tool calls are routed to.
///
/// The current profile is a snapshot taken when it was selected.
/// `update_profile` replaces map entries only, so an update to the active
/// key becomes visible after the next `set_current` or `reset_to_default`.
#[derive(Debug)]
pub struct WikiRegistry {
    default_key: String,
    profiles: RwLock<BTreeMap<String, WikiProfile>>,
    current: RwLock<CurrentWiki>,
}

impl WikiRegistry {
    pub fn new(config: WikiConfigFile) -> Result<Self, RegistryError> {
        let WikiConfigFile {
            default_wiki,
            wikis,
        } = config;
        let profile = wikis
            .get(&default_wiki)
            .cloned()
            .ok_or_else(|| RegistryError::DefaultWikiMissing(default_wiki.clone()))?;
        ensure_usable(&default_wiki, &profile)?;
        Ok(Self {
            current: RwLock::new(CurrentWiki {
                key: default_wiki.clone(),
                profile: Arc::new(profile),
            }),
            default_key: default_wiki,
            profiles: RwLock::new(wikis),
        })
    }

    /// Load the config file named by `source` and build a registry from it.
    pub fn load(source: &ConfigSource) -> Result<Self> {
        let config = load_config(&source.path)?;
        let registry = Self::new(config).with_context(|| {
            format!("invalid wiki config {}", source.path.display())
        })?;
        info!(
            default_wiki = %registry.default_key,
            wikis = registry.profile_count(),
            "loaded wiki registry"
        );
        Ok(registry)
    }

    pub fn default_key(&self) -> &str {
        &self.default_key
    }

    pub fn list_profiles(&self) -> BTreeMap<String, WikiProfile> {
        self.profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn profile_count(&self) -> usize {
        self.profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn current_profile(&self) -> Arc<WikiProfile> {
        Arc::clone(
            &self
                .current
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .profile,
        )
    }

    pub fn current_key(&self) -> String {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .key
            .clone()
    }

    pub fn set_current(&self, key: &str) -> Result<(), RegistryError> {
        let profile = self
            .profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownWiki(key.to_string()))?;
        ensure_usable(key, &profile)?;
        self.bind(key, profile);
        Ok(())
    }

    pub fn update_profile(&self, key: &str, profile: &WikiProfile) {
        self.profiles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), profile.clone());
        info!(wiki = key, server = %profile.server_url, "updated wiki profile");
    }

    pub fn reset_to_default(&self) -> Result<(), RegistryError> {
        let profile = self
            .profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&self.default_key)
            .cloned()
            .ok_or_else(|| RegistryError::DefaultWikiMissing(self.default_key.clone()))?;
        ensure_usable(&self.default_key, &profile)?;
        self.bind(&self.default_key, profile);
        Ok(())
    }

    pub fn wiki_server(&self) -> String {
        self.current_profile().server_url.clone()
    }

    pub fn article_path(&self) -> String {
        self.current_profile().article_path.clone()
    }

    pub fn script_path(&self) -> String {
        self.current_profile().script_path.clone()
    }

    pub fn oauth_token(&self) -> Option<String> {
        self.current_profile().oauth_token().map(ToString::to_string)
    }

    pub fn private_wiki(&self) -> Option<bool> {
        self.current_profile().is_private
    }

    pub fn site_name(&self) -> String {
        self.current_profile().site_name.clone()
    }

    fn bind(&self, key: &str, profile: WikiProfile) {
        let server = profile.server_url.clone();
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = CurrentWiki {
            key: key.to_string(),
            profile: Arc::new(profile),
        };
        info!(wiki = key, server = %server, "switched current wiki");
    }
}

fn ensure_usable(key: &str, profile: &WikiProfile) -> Result<(), RegistryError> {
    match profile.missing_field() {
        Some(field) => Err(RegistryError::InvalidProfile {
            key: key.to_string(),
            field,
        }),
        None => Ok(()),
    }
}
