//! HTTP implementation of [`CrudApi`] over the external CRUD layer.
//!
//! The base URL is normalized at construction so every request path carries
//! exactly one `/api` prefix, whether or not the configured base already ends
//! with `/api`.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::domain::{Allocation, Project, ProjectStatus, Server};

use super::api::{ApiError, CrudApi, Incident, UserRecord};

/// CRUD client over HTTP.
pub struct HttpCrudClient {
    http: reqwest::Client,
    /// Normalized base; never ends with `/` or `/api`.
    base: String,
}

impl HttpCrudClient {
    /// Builds a client, normalizing `base_url` (trailing slashes and a trailing
    /// `/api` segment are stripped).
    pub fn new(base_url: &str) -> Self {
        let mut base = base_url.trim_end_matches('/').to_string();
        if base.ends_with("/api") {
            base.truncate(base.len() - "/api".len());
        }
        Self {
            http: reqwest::Client::new(),
            base,
        }
    }

    /// Full URL for a path like `/projects/p1`. Exactly one `/api` prefix.
    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base, path)
    }

    async fn check<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => Err(ApiError::NotFound(
                response.text().await.unwrap_or_default(),
            )),
            StatusCode::CONFLICT => Err(ApiError::Conflict(
                response.text().await.unwrap_or_default(),
            )),
            s if s.is_server_error() => Err(ApiError::Transient(format!("status {}", s))),
            s if !s.is_success() => Err(ApiError::Protocol(format!("status {}", s))),
            _ => response
                .json()
                .await
                .map_err(|e| ApiError::Protocol(e.to_string())),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| ApiError::Transient(e.to_string()))?;
        Self::check(response).await
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, ApiError> {
        let response = self
            .http
            .request(method, self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Transient(e.to_string()))?;
        Self::check(response).await
    }
}

#[async_trait]
impl CrudApi for HttpCrudClient {
    async fn list_projects(&self, owner_id: &str) -> Result<Vec<Project>, ApiError> {
        self.get_json(&format!("/projects?owner_only=true&owner_id={}", owner_id))
            .await
    }

    async fn get_project(&self, id: &str) -> Result<Project, ApiError> {
        self.get_json(&format!("/projects/{}", id)).await
    }

    async fn update_project_status(
        &self,
        id: &str,
        status: ProjectStatus,
    ) -> Result<Project, ApiError> {
        self.send_json(
            reqwest::Method::PATCH,
            &format!("/projects/{}", id),
            &json!({ "status": status }),
        )
        .await
    }

    async fn set_repository_url(&self, id: &str, url: &str) -> Result<Project, ApiError> {
        self.send_json(
            reqwest::Method::PATCH,
            &format!("/projects/{}", id),
            &json!({ "repository_url": url }),
        )
        .await
    }

    async fn store_project_secret(
        &self,
        project_id: &str,
        name: &str,
        value: &str,
    ) -> Result<(), ApiError> {
        let _: serde_json::Value = self
            .send_json(
                reqwest::Method::PATCH,
                &format!("/projects/{}", project_id),
                &json!({ "config": { "secrets": { name: value } } }),
            )
            .await?;
        Ok(())
    }

    async fn list_servers(&self, managed_only: bool) -> Result<Vec<Server>, ApiError> {
        let path = if managed_only {
            "/servers?is_managed=true"
        } else {
            "/servers"
        };
        self.get_json(path).await
    }

    async fn create_allocation(&self, allocation: &Allocation) -> Result<Allocation, ApiError> {
        self.send_json(
            reqwest::Method::POST,
            &format!("/servers/{}/services", allocation.server_handle),
            &serde_json::to_value(allocation).map_err(|e| ApiError::Protocol(e.to_string()))?,
        )
        .await
    }

    async fn list_allocations(&self, server_handle: &str) -> Result<Vec<Allocation>, ApiError> {
        self.get_json(&format!("/servers/{}/services", server_handle))
            .await
    }

    async fn upsert_user(&self, telegram_id: i64) -> Result<UserRecord, ApiError> {
        self.send_json(
            reqwest::Method::POST,
            "/users/upsert",
            &json!({ "telegram_id": telegram_id }),
        )
        .await
    }

    async fn get_user_by_telegram(&self, telegram_id: i64) -> Result<Option<UserRecord>, ApiError> {
        match self
            .get_json(&format!("/users/by-telegram/{}", telegram_id))
            .await
        {
            Ok(user) => Ok(Some(user)),
            Err(ApiError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_incident(
        &self,
        server_handle: &str,
        summary: &str,
    ) -> Result<Incident, ApiError> {
        self.send_json(
            reqwest::Method::POST,
            "/incidents",
            &json!({ "server_handle": server_handle, "summary": summary }),
        )
        .await
    }

    async fn active_incidents(&self) -> Result<Vec<Incident>, ApiError> {
        self.get_json("/incidents/active").await
    }
}
