//! Configuration manager for ldapsync.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::AppState;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_TIMEOUT: u64 = 10;
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Marker written on Mattermost accounts managed by the directory.
pub const DEFAULT_AUTH_SERVICE: &str = "gitlab";

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    /// Port the HTTP server listens on.
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Related to LDAP3 configuration.
    #[serde(skip_serializing)]
    pub ldap: Option<Ldap>,
    /// Related to Mattermost synchronization.
    #[serde(skip_serializing)]
    pub mattermost: Option<Mattermost>,
}

/// LDAP configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ldap {
    /// URL of LDAP instance, e.g. `ldap://localhost:389`.
    pub address: String,
    /// Service DN credential to connect.
    pub user: Option<String>,
    /// Password credential to connect.
    pub password: Option<String>,
    /// DN for domain.
    pub base_dn: String,
    /// Subtree holding users, also used to build `member` values.
    pub users_dn: String,
    /// Filter to find a user by login, `{uid}` is replaced.
    pub users_filter: Option<String>,
    /// Search base for groups. Defaults to `base_dn`.
    pub groups_dn: Option<String>,
    #[serde(default)]
    pub attributes: Attributes,
}

impl Ldap {
    /// Search base for group lookups.
    pub fn groups_dn(&self) -> &str {
        self.groups_dn.as_deref().unwrap_or(&self.base_dn)
    }
}

/// Names of user attributes on the directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Attributes {
    /// Numeric identifier, stored as Mattermost `auth_data`.
    pub id: String,
    pub username: String,
    /// Display name.
    pub name: String,
    pub email: String,
}

impl Default for Attributes {
    fn default() -> Self {
        Self {
            id: "uidNumber".into(),
            username: "uid".into(),
            name: "cn".into(),
            email: "mail".into(),
        }
    }
}

/// Mattermost configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mattermost {
    /// Base URL of Mattermost instance.
    pub url: String,
    /// Admin login used to open a session.
    pub username: Option<String>,
    pub password: Option<String>,
    /// Personal access token, preferred over login.
    pub token: Option<String>,
    /// Value of `auth_service` on synced accounts.
    pub auth_service: Option<String>,
    /// HTTP timeout in seconds.
    pub timeout: Option<u64>,
}

impl Mattermost {
    pub fn auth_service(&self) -> &str {
        self.auth_service.as_deref().unwrap_or(DEFAULT_AUTH_SERVICE)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.unwrap_or(DEFAULT_TIMEOUT))
    }
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Current crate version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Normalizes a URL string by ensuring it starts with a valid scheme
    /// (`http` or `https`).
    fn normalize_url(&self, url: &str) -> Result<String, url::ParseError> {
        let url_with_scheme =
            if url.starts_with("http://") || url.starts_with("https://") {
                url.to_string()
            } else {
                format!("https://{url}")
            };

        let parsed_url = Url::parse(&url_with_scheme)?;
        Ok(parsed_url.to_string())
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location.
    ///
    /// A missing or malformed file falls back to the default configuration.
    pub fn read(self) -> Result<Arc<Self>, url::ParseError> {
        let file_path = if self.path.is_file() {
            self.path.clone()
        } else {
            PathBuf::from(DEFAULT_CONFIG_PATH)
        };

        let content = match std::fs::read_to_string(&file_path) {
            Ok(content) => content,
            Err(err) => {
                tracing::error!(
                    error = %err,
                    path = %file_path.display(),
                    "`config.yaml` file not found"
                );
                return Ok(Arc::new(self.fallback()));
            },
        };

        match self.clone().from_yaml(&content) {
            Ok(config) => Ok(Arc::new(config)),
            Err(ConfigError::Yaml(err)) => {
                tracing::error!(
                    error = %err,
                    path = %file_path.display(),
                    "`config.yaml` file is invalid"
                );
                Ok(Arc::new(self.fallback()))
            },
            Err(ConfigError::Url(err)) => Err(err),
        }
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(self, content: &str) -> Result<Self, ConfigError> {
        let config = serde_yaml::from_str(content)?;
        Ok(self.finalize(config)?)
    }

    fn finalize(
        &self,
        mut config: Configuration,
    ) -> Result<Self, url::ParseError> {
        // set app version.
        config.version = VERSION.to_owned();
        config.path = self.path.clone();

        // secrets may be kept out of the file.
        if let Some(ldap) = config.ldap.as_mut() {
            if let Ok(password) = std::env::var("LDAP_PASSWORD") {
                ldap.password = Some(password);
            }
        }

        if let Some(mattermost) = config.mattermost.as_mut() {
            mattermost.url = self.normalize_url(&mattermost.url)?;

            if let Ok(password) = std::env::var("MATTERMOST_PASSWORD") {
                mattermost.password = Some(password);
            }
            if let Ok(token) = std::env::var("MATTERMOST_TOKEN") {
                mattermost.token = Some(token);
            }
        }

        Ok(config)
    }

    /// Return a default configuration as fallback.
    fn fallback(&self) -> Self {
        Self {
            port: DEFAULT_PORT,
            version: VERSION.to_owned(),
            ..Default::default()
        }
    }
}

/// Errors raised while parsing configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}
