//! Minimal GitHub REST client: repository creation, identity lookup, the
//! contents API for uploads, and a [`TemplateSource`] reading templates out
//! of a repository folder.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use log::{debug, warn};
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

use crate::auth::IdentityProvider;
use crate::catalog::TemplateDescriptor;
use crate::config::GitHubSettings;
use crate::files::{TemplateFile, TemplateFileSet};
use crate::loader::{parse_config_document, LoadError, TemplateContent, TemplateSource};
use crate::remote::{CreatedRepository, RepositoryHost};

#[derive(Error, Debug)]
pub enum GitHubError {
    #[error("GitHub rejected the credentials")]
    Unauthorized,
    #[error("Repository '{0}' already exists")]
    NameConflict(String),
    #[error("GitHub returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Invalid GitHub URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid file content for {path}: {message}")]
    Decode { path: String, message: String },
    #[error("GitHub request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Deserialize)]
struct RepositoryResponse {
    name: String,
    html_url: String,
}

#[derive(Deserialize)]
struct UserResponse {
    login: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

/// One entry of a contents API directory listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentEntry {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Deserialize)]
struct FileResponse {
    content: String,
}

pub struct GitHubClient {
    http: reqwest::Client,
    api_base: String,
    identity: Arc<dyn IdentityProvider>,
}

impl GitHubClient {
    pub fn new(settings: &GitHubSettings, identity: Arc<dyn IdentityProvider>) -> Result<Self, GitHubError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            api_base: settings.api_base.clone(),
            identity,
        })
    }

    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url, GitHubError> {
        let mut url = Url::parse(&self.api_base).map_err(|e| GitHubError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| GitHubError::InvalidUrl(self.api_base.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self
            .http
            .request(method, url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        match self.identity.token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn check(response: Response) -> Result<Response, GitHubError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(GitHubError::Unauthorized);
        }
        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(parsed) => {
                let details: Vec<String> = parsed.errors.into_iter().filter_map(|e| e.message).collect();
                if details.is_empty() {
                    parsed.message
                } else {
                    format!("{} ({})", parsed.message, details.join("; "))
                }
            }
            Err(_) => body,
        };
        Err(GitHubError::Status {
            status: status.as_u16(),
            message,
        })
    }

    /// Lists one directory of a repository at `branch`.
    pub async fn list_directory(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        branch: &str,
    ) -> Result<Vec<ContentEntry>, GitHubError> {
        let mut url = self.contents_url(owner, repo, path)?;
        url.query_pairs_mut().append_pair("ref", branch);
        let response = self.request(Method::GET, url).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Raw bytes of one file at `branch`.
    pub async fn file_content(&self, owner: &str, repo: &str, path: &str, branch: &str) -> Result<Vec<u8>, GitHubError> {
        let mut url = self.contents_url(owner, repo, path)?;
        url.query_pairs_mut().append_pair("ref", branch);
        let response = self.request(Method::GET, url).send().await?;
        let file: FileResponse = Self::check(response).await?.json().await?;
        let encoded: String = file.content.split_whitespace().collect();
        STANDARD.decode(encoded).map_err(|e| GitHubError::Decode {
            path: path.to_string(),
            message: e.to_string(),
        })
    }

    fn contents_url(&self, owner: &str, repo: &str, path: &str) -> Result<Url, GitHubError> {
        let segments = ["repos", owner, repo, "contents"]
            .into_iter()
            .chain(path.split('/').filter(|s| !s.is_empty()));
        self.endpoint(segments)
    }
}

#[async_trait]
impl RepositoryHost for GitHubClient {
    async fn create_repository(
        &self,
        name: &str,
        description: &str,
        private: bool,
    ) -> Result<CreatedRepository, GitHubError> {
        let url = self.endpoint(["user", "repos"])?;
        let body = json!({
            "name": name,
            "description": description,
            "private": private,
            "auto_init": false,
        });
        let response = self.request(Method::POST, url).json(&body).send().await?;
        let repository: RepositoryResponse = match Self::check(response).await {
            Ok(response) => response.json().await?,
            Err(GitHubError::Status { status: 422, message }) if message.contains("already exists") => {
                return Err(GitHubError::NameConflict(name.to_string()));
            }
            Err(e) => return Err(e),
        };
        Ok(CreatedRepository {
            name: repository.name,
            html_url: repository.html_url,
        })
    }

    async fn authenticated_user(&self) -> Result<String, GitHubError> {
        let url = self.endpoint(["user"])?;
        let response = self.request(Method::GET, url).send().await?;
        let user: UserResponse = Self::check(response).await?.json().await?;
        Ok(user.login)
    }

    async fn upload_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        content: &str,
        message: &str,
    ) -> Result<(), GitHubError> {
        let url = self.contents_url(owner, repo, path)?;
        let body = json!({
            "message": message,
            "content": STANDARD.encode(content),
        });
        let response = self.request(Method::PUT, url).json(&body).send().await?;
        Self::check(response).await?;
        debug!("Uploaded {}/{}/{}", owner, repo, path);
        Ok(())
    }
}

/// Reads `<repo>/<folder>` at the descriptor's branch through the contents
/// API.
pub struct GitHubTemplateSource {
    client: GitHubClient,
    config_file: String,
}

impl GitHubTemplateSource {
    pub fn new(client: GitHubClient, config_file: impl Into<String>) -> Self {
        Self {
            client,
            config_file: config_file.into(),
        }
    }
}

fn fetch_error(e: GitHubError) -> LoadError {
    match e {
        GitHubError::Status { status: 404, message } => LoadError::NotFound(message),
        other => LoadError::Fetch(other.to_string()),
    }
}

#[async_trait]
impl TemplateSource for GitHubTemplateSource {
    async fn fetch(&self, descriptor: &TemplateDescriptor) -> Result<TemplateContent, LoadError> {
        let repo = descriptor
            .repository()
            .ok_or_else(|| LoadError::NotFound(format!("'{}' has no GitHub repository", descriptor.id())))?;
        let root = descriptor.folder().trim_matches('/');
        let relative = |path: &str| -> String {
            match path.strip_prefix(root) {
                Some(rest) if !root.is_empty() => rest.trim_start_matches('/').to_string(),
                _ => path.to_string(),
            }
        };

        let mut config = None;
        let mut files = TemplateFileSet::new();
        let mut dirs = vec![root.to_string()];
        while let Some(dir) = dirs.pop() {
            let entries = self
                .client
                .list_directory(&repo.owner, &repo.name, &dir, descriptor.branch())
                .await
                .map_err(fetch_error)?;
            for entry in entries {
                if entry.name.starts_with('.') {
                    continue;
                }
                match entry.kind.as_str() {
                    "dir" => dirs.push(entry.path),
                    "file" => {
                        let bytes = self
                            .client
                            .file_content(&repo.owner, &repo.name, &entry.path, descriptor.branch())
                            .await
                            .map_err(fetch_error)?;
                        let path = relative(&entry.path);
                        let Ok(text) = String::from_utf8(bytes) else {
                            warn!("Skipping non-text template file {}", entry.path);
                            continue;
                        };
                        if path == self.config_file {
                            config = Some(parse_config_document(&self.config_file, &text)?);
                        } else {
                            files.insert(TemplateFile::new(path, text));
                        }
                    }
                    other => debug!("Ignoring {} entry {}", other, entry.path),
                }
            }
        }

        let config = config.ok_or_else(|| {
            LoadError::NotFound(format!("{} in {}/{}/{}", self.config_file, repo.owner, repo.name, root))
        })?;
        Ok(TemplateContent { config, files })
    }
}
