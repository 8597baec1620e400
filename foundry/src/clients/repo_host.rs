//! Repository-host app contract: repo creation and encrypted CI secret upload.
//!
//! The host particulars (app auth, encryption of secrets) live outside the core;
//! this trait is the seam the engineering architect and the deployer use.

use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::RepositoryInfo;

#[derive(Debug, Error)]
pub enum RepoHostError {
    #[error("repository already exists: {0}")]
    AlreadyExists(String),
    #[error("transient: {0}")]
    Transient(String),
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Repository-host app API.
#[async_trait]
pub trait RepoHost: Send + Sync {
    /// Creates an empty repository and returns its info.
    async fn create_repository(&self, name: &str) -> Result<RepositoryInfo, RepoHostError>;

    /// Uploads one CI secret to the repository (value encrypted by the host API).
    async fn upload_ci_secret(
        &self,
        repository_url: &str,
        name: &str,
        value: &str,
    ) -> Result<(), RepoHostError>;
}

/// HTTP implementation against the repository-host app API.
pub struct HttpRepoHost {
    http: reqwest::Client,
    base: String,
    app_id: String,
}

impl HttpRepoHost {
    pub fn new(base_url: &str, app_id: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base_url.trim_end_matches('/').to_string(),
            app_id: app_id.to_string(),
        }
    }
}

#[async_trait]
impl RepoHost for HttpRepoHost {
    async fn create_repository(&self, name: &str) -> Result<RepositoryInfo, RepoHostError> {
        let response = self
            .http
            .post(format!("{}/app/{}/repositories", self.base, self.app_id))
            .json(&serde_json::json!({ "name": name, "private": true }))
            .send()
            .await
            .map_err(|e| RepoHostError::Transient(e.to_string()))?;
        match response.status().as_u16() {
            409 | 422 => Err(RepoHostError::AlreadyExists(name.to_string())),
            s if (500..600).contains(&s) => {
                Err(RepoHostError::Transient(format!("status {}", s)))
            }
            s if !(200..300).contains(&s) => {
                Err(RepoHostError::Rejected(format!("status {}", s)))
            }
            _ => response
                .json()
                .await
                .map_err(|e| RepoHostError::Rejected(e.to_string())),
        }
    }

    async fn upload_ci_secret(
        &self,
        repository_url: &str,
        name: &str,
        value: &str,
    ) -> Result<(), RepoHostError> {
        // The host API encrypts the value server-side before storage.
        let response = self
            .http
            .put(format!("{}/app/{}/secrets/{}", self.base, self.app_id, name))
            .json(&serde_json::json!({ "repository": repository_url, "value": value }))
            .send()
            .await
            .map_err(|e| RepoHostError::Transient(e.to_string()))?;
        if !response.status().is_success() {
            return Err(RepoHostError::Rejected(format!(
                "status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// In-memory repository host for tests: records created repos and uploaded
/// secret names (values are kept only to assert they never leak elsewhere).
#[derive(Default)]
pub struct InMemoryRepoHost {
    inner: Mutex<InMemoryRepoHostInner>,
}

#[derive(Default)]
struct InMemoryRepoHostInner {
    repos: Vec<String>,
    secrets: Vec<(String, String)>,
}

impl InMemoryRepoHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created_repos(&self) -> Vec<String> {
        self.inner.lock().expect("poisoned").repos.clone()
    }

    /// Names of CI secrets uploaded per repository.
    pub fn uploaded_secret_names(&self) -> Vec<String> {
        self.inner
            .lock()
            .expect("poisoned")
            .secrets
            .iter()
            .map(|(_, name)| name.clone())
            .collect()
    }
}

#[async_trait]
impl RepoHost for InMemoryRepoHost {
    async fn create_repository(&self, name: &str) -> Result<RepositoryInfo, RepoHostError> {
        let mut inner = self.inner.lock().expect("poisoned");
        if inner.repos.iter().any(|r| r == name) {
            return Err(RepoHostError::AlreadyExists(name.to_string()));
        }
        inner.repos.push(name.to_string());
        Ok(RepositoryInfo {
            url: format!("https://git.example/{}", name),
            default_branch: "main".to_string(),
        })
    }

    async fn upload_ci_secret(
        &self,
        repository_url: &str,
        name: &str,
        _value: &str,
    ) -> Result<(), RepoHostError> {
        let mut inner = self.inner.lock().expect("poisoned");
        inner
            .secrets
            .push((repository_url.to_string(), name.to_string()));
        Ok(())
    }
}
