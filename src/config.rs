use std::path::Path;

use serde::Deserialize;

use crate::cli::Cli;
use crate::error::{Error, Result};

pub const DEFAULT_CONFIG_PATH: &str = "firetodo.toml";
pub const DEFAULT_COLLECTION: &str = "todos";
pub const DEFAULT_ENDPOINT: &str = "https://firestore.googleapis.com";
pub const DEFAULT_DATABASE: &str = "(default)";
pub const API_KEY_ENV: &str = "FIREBASE_API_KEY";

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub store: Option<String>,
    pub collection: Option<String>,
    pub poll_seconds: Option<u64>,
    pub request_timeout: Option<u64>,
    pub log_file: Option<String>,
    pub firebase: Option<FirebaseConfig>,
}

/// The Firebase web-app configuration bag. Only `project_id`, `api_key`,
/// `database` and `endpoint` affect where requests go; the other keys are
/// accepted so a config copied from the Firebase console parses as-is.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FirebaseConfig {
    pub api_key: Option<String>,
    pub auth_domain: Option<String>,
    #[serde(default)]
    pub project_id: String,
    pub storage_bucket: Option<String>,
    pub messaging_sender_id: Option<String>,
    pub app_id: Option<String>,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

impl Default for FirebaseConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            auth_domain: None,
            project_id: String::new(),
            storage_bucket: None,
            messaging_sender_id: None,
            app_id: None,
            database: default_database(),
            endpoint: default_endpoint(),
        }
    }
}

fn default_database() -> String {
    DEFAULT_DATABASE.to_string()
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Firestore,
    Memory,
}

impl StoreKind {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "firestore" => Ok(StoreKind::Firestore),
            "memory" => Ok(StoreKind::Memory),
            other => Err(Error::ConfigValidation(format!(
                "unknown store: {other} (expected: firestore, memory)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub store: StoreKind,
    pub collection: String,
    pub poll_seconds: u64,
    pub request_timeout: u64,
    pub log_file: Option<String>,
    pub firebase: Option<FirebaseConfig>,
}

impl Config {
    pub fn load(cli: &Cli) -> Result<Self> {
        let file_config = match cli.config.as_deref() {
            Some(path) => {
                let path = Path::new(path);
                if !path.exists() {
                    return Err(Error::ConfigNotFound(path.to_path_buf()));
                }
                parse_config(&std::fs::read_to_string(path)?)?
            }
            None => {
                let path = Path::new(DEFAULT_CONFIG_PATH);
                if path.exists() {
                    parse_config(&std::fs::read_to_string(path)?)?
                } else {
                    ConfigFile::default()
                }
            }
        };

        merge(file_config, cli)
    }

    /// Firebase settings, required when the store is Firestore.
    pub fn firebase(&self) -> Result<&FirebaseConfig> {
        self.firebase
            .as_ref()
            .filter(|f| !f.project_id.is_empty())
            .ok_or_else(|| {
                Error::ConfigValidation(
                    "[firebase] project_id required when store = \"firestore\"".to_string(),
                )
            })
    }
}

pub fn parse_config(content: &str) -> Result<ConfigFile> {
    let config: ConfigFile = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &ConfigFile) -> Result<()> {
    if let Some(ref store) = config.store {
        StoreKind::parse(store)?;
    }
    if let Some(ref collection) = config.collection {
        validate_collection(collection)?;
    }
    if let Some(interval) = config.poll_seconds
        && interval == 0
    {
        return Err(Error::ConfigValidation(
            "poll_seconds must be > 0".to_string(),
        ));
    }
    if let Some(timeout) = config.request_timeout
        && timeout == 0
    {
        return Err(Error::ConfigValidation(
            "request_timeout must be > 0".to_string(),
        ));
    }
    if let Some(ref firebase) = config.firebase
        && firebase.project_id.trim().is_empty()
    {
        return Err(Error::ConfigValidation(
            "firebase.project_id must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_collection(collection: &str) -> Result<()> {
    if collection.is_empty() || collection.contains('/') {
        return Err(Error::ConfigValidation(format!(
            "invalid collection name: {collection:?}"
        )));
    }
    Ok(())
}

/// Combine file values with CLI overrides. CLI wins; defaults fill the rest.
pub fn merge(file: ConfigFile, cli: &Cli) -> Result<Config> {
    let store = StoreKind::parse(
        cli.store
            .as_deref()
            .or(file.store.as_deref())
            .unwrap_or("firestore"),
    )?;

    let collection = cli
        .collection
        .clone()
        .or(file.collection)
        .unwrap_or_else(|| DEFAULT_COLLECTION.to_string());
    validate_collection(&collection)?;

    let poll_seconds = cli.poll_seconds.or(file.poll_seconds).unwrap_or(2);
    if poll_seconds == 0 {
        return Err(Error::ConfigValidation(
            "poll_seconds must be > 0".to_string(),
        ));
    }

    let firebase = match (file.firebase, cli.project_id.clone()) {
        (Some(mut firebase), Some(project_id)) => {
            firebase.project_id = project_id;
            Some(firebase)
        }
        (Some(firebase), None) => Some(firebase),
        (None, Some(project_id)) => Some(FirebaseConfig {
            project_id,
            ..Default::default()
        }),
        (None, None) => None,
    };

    let config = Config {
        store,
        collection,
        poll_seconds,
        request_timeout: file.request_timeout.unwrap_or(10),
        log_file: cli.log_file.clone().or(file.log_file),
        firebase,
    };

    if config.store == StoreKind::Firestore {
        config.firebase()?;
    }

    Ok(config)
}

/// Resolve the Firebase API key: env var first, then the config file.
pub fn resolve_api_key(firebase: &FirebaseConfig) -> Option<String> {
    if let Ok(key) = std::env::var(API_KEY_ENV)
        && !key.is_empty()
    {
        return Some(key);
    }
    firebase.api_key.clone().filter(|k| !k.is_empty())
}
