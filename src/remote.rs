use async_trait::async_trait;
use futures::future::join_all;
use log::{error, info};
use serde::Serialize;
use std::sync::Arc;

use crate::auth::IdentityProvider;
use crate::config::ExportSettings;
use crate::export::{ExportError, UploadFailure};
use crate::files::RenderedFileSet;
use crate::github::GitHubError;

/// Location of a repository created by an export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteRepository {
    pub url: String,
    pub owner: String,
    pub name: String,
}

/// What the host reports back after creating a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedRepository {
    pub name: String,
    pub html_url: String,
}

/// The three remote calls an export needs.
#[async_trait]
pub trait RepositoryHost: Send + Sync {
    async fn create_repository(
        &self,
        name: &str,
        description: &str,
        private: bool,
    ) -> Result<CreatedRepository, GitHubError>;

    /// Login of the identity behind the current token.
    async fn authenticated_user(&self) -> Result<String, GitHubError>;

    /// Creates or overwrites one file. Safe to repeat for the same path.
    async fn upload_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        content: &str,
        message: &str,
    ) -> Result<(), GitHubError>;
}

pub struct RemoteExporter {
    host: Arc<dyn RepositoryHost>,
    identity: Arc<dyn IdentityProvider>,
    private: bool,
    commit_message: String,
}

impl RemoteExporter {
    pub fn new(host: Arc<dyn RepositoryHost>, identity: Arc<dyn IdentityProvider>, settings: &ExportSettings) -> Self {
        Self {
            host,
            identity,
            private: settings.private_repository,
            commit_message: settings.commit_message.clone(),
        }
    }

    /// Creates `repo_name` and uploads every file into it concurrently.
    ///
    /// Upload failures do not delete the repository: the returned
    /// [`ExportError::Upload`] names each failed file and the repository
    /// that was left behind.
    pub async fn export_to_remote(
        &self,
        files: &RenderedFileSet,
        repo_name: &str,
        description: &str,
    ) -> Result<RemoteRepository, ExportError> {
        if !self.identity.is_authenticated() {
            return Err(ExportError::AuthRequired);
        }
        let repo_name = repo_name.trim();
        if repo_name.is_empty() {
            return Err(ExportError::CreateRepository("Repository name is required".to_string()));
        }

        let created = self
            .host
            .create_repository(repo_name, description, self.private)
            .await
            .map_err(|e| match e {
                GitHubError::NameConflict(name) => ExportError::NameConflict(name),
                GitHubError::Unauthorized => ExportError::AuthRequired,
                other => ExportError::CreateRepository(other.to_string()),
            })?;
        info!("Created repository {}", created.html_url);

        let owner = self
            .host
            .authenticated_user()
            .await
            .map_err(|e| ExportError::Identity(e.to_string()))?;
        let repository = RemoteRepository {
            url: created.html_url,
            owner,
            name: created.name,
        };

        let uploads = files.iter().map(|file| {
            let message = self.commit_message.replace("{path}", &file.path);
            let repository = &repository;
            async move {
                self.host
                    .upload_file(&repository.owner, &repository.name, &file.path, &file.content, &message)
                    .await
                    .map_err(|e| UploadFailure {
                        path: file.path.clone(),
                        message: e.to_string(),
                    })
            }
        });
        let failures: Vec<UploadFailure> = join_all(uploads)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();

        if !failures.is_empty() {
            for failure in &failures {
                error!("Upload of {} failed: {}", failure.path, failure.message);
            }
            return Err(ExportError::Upload { repository, failures });
        }
        info!("Uploaded {} files to {}", files.len(), repository.url);
        Ok(repository)
    }
}
