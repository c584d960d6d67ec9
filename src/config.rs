use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Application settings, usually read from a `sitestudio.yaml` file.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct StudioConfig {
    #[serde(default)]
    pub form: FormSettings,

    #[serde(default)]
    pub preview: PreviewSettings,

    #[serde(default)]
    pub template: TemplateSettings,

    #[serde(default)]
    pub export: ExportSettings,

    #[serde(default)]
    pub github: GitHubSettings,

    #[serde(default)]
    pub drafts: DraftSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FormSettings {
    /// Window in which field writes are merged into one state transition.
    #[serde(default = "default_coalesce_window_ms")]
    pub coalesce_window_ms: u64,
}

impl Default for FormSettings {
    fn default() -> Self {
        Self {
            coalesce_window_ms: default_coalesce_window_ms(),
        }
    }
}

impl FormSettings {
    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_window_ms)
    }
}

fn default_coalesce_window_ms() -> u64 {
    16
}

#[derive(Debug, Deserialize, Clone)]
pub struct PreviewSettings {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_entry_file")]
    pub entry_file: String,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            entry_file: default_entry_file(),
        }
    }
}

impl PreviewSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

fn default_debounce_ms() -> u64 {
    800
}

fn default_entry_file() -> String {
    "index.html".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct TemplateSettings {
    /// File name of the form definition inside a template folder.
    #[serde(default = "default_config_file")]
    pub config_file: String,
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self {
            config_file: default_config_file(),
        }
    }
}

fn default_config_file() -> String {
    "config.json".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExportSettings {
    #[serde(default = "default_enabled")]
    pub generate_readme: bool,
    #[serde(default = "default_archive_name")]
    pub default_archive_name: String,
    #[serde(default)]
    pub private_repository: bool,
    #[serde(default = "default_description")]
    pub default_description: String,
    /// `{path}` is replaced with the uploaded file's path.
    #[serde(default = "default_commit_message")]
    pub commit_message: String,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            generate_readme: default_enabled(),
            default_archive_name: default_archive_name(),
            private_repository: false,
            default_description: default_description(),
            commit_message: default_commit_message(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_archive_name() -> String {
    "website".to_string()
}

fn default_description() -> String {
    "Website created with sitestudio".to_string()
}

fn default_commit_message() -> String {
    "Add {path}".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitHubSettings {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Environment variable holding a personal access token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default)]
    pub oauth: OAuthSettings,
}

impl Default for GitHubSettings {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            token_env: default_token_env(),
            oauth: OAuthSettings::default(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct OAuthSettings {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            redirect_uri: String::new(),
            scope: default_scope(),
            authorize_url: default_authorize_url(),
        }
    }
}

fn default_scope() -> String {
    "repo".to_string()
}

fn default_authorize_url() -> String {
    "https://github.com/login/oauth/authorize".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DraftSettings {
    /// Directory for JSON drafts; drafts stay in memory when unset.
    pub dir: Option<PathBuf>,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl StudioConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: StudioConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }
}
