//! Container driver abstraction and the scripted mock used in tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::SandboxError;

/// Creation parameters for one sandbox container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Injected environment (credentials included); values never logged.
    pub env: Vec<(String, String)>,
    /// `false` detaches the container from any network.
    pub has_internet: bool,
}

/// Output of one command executed inside a container.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

/// Platform abstraction over the container runtime.
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    async fn image_exists(&self, tag: &str) -> Result<bool, SandboxError>;
    /// Snapshots a prepared container as a reusable image.
    async fn commit_image(&self, container_id: &str, tag: &str) -> Result<(), SandboxError>;
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, SandboxError>;
    async fn start(&self, container_id: &str) -> Result<(), SandboxError>;
    /// Suspends CPU while preserving memory.
    async fn pause(&self, container_id: &str) -> Result<(), SandboxError>;
    async fn unpause(&self, container_id: &str) -> Result<(), SandboxError>;
    async fn remove(&self, container_id: &str) -> Result<(), SandboxError>;
    async fn exec(
        &self,
        container_id: &str,
        argv: &[String],
        timeout: Duration,
    ) -> Result<ExecOutput, SandboxError>;
    async fn write_file(
        &self,
        container_id: &str,
        path: &str,
        content: &str,
    ) -> Result<(), SandboxError>;
    async fn logs(&self, container_id: &str) -> Result<String, SandboxError>;
}

/// Scripted driver for tests: records every call, plays back queued exec outputs.
#[derive(Default)]
pub struct MockDriver {
    inner: Mutex<MockDriverInner>,
}

#[derive(Default)]
struct MockDriverInner {
    images: Vec<String>,
    containers: HashMap<String, ContainerSpec>,
    paused: HashMap<String, bool>,
    removed: Vec<String>,
    execs: Vec<(String, Vec<String>)>,
    files: Vec<(String, String, String)>,
    exec_script: std::collections::VecDeque<ExecOutput>,
    next: u64,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the output of the next exec call.
    pub fn push_exec_output(&self, output: ExecOutput) {
        self.inner.lock().expect("poisoned").exec_script.push_back(output);
    }

    pub fn exec_calls(&self) -> Vec<(String, Vec<String>)> {
        self.inner.lock().expect("poisoned").execs.clone()
    }

    pub fn written_files(&self) -> Vec<(String, String, String)> {
        self.inner.lock().expect("poisoned").files.clone()
    }

    pub fn committed_images(&self) -> Vec<String> {
        self.inner.lock().expect("poisoned").images.clone()
    }

    pub fn is_paused(&self, container_id: &str) -> bool {
        self.inner
            .lock()
            .expect("poisoned")
            .paused
            .get(container_id)
            .copied()
            .unwrap_or(false)
    }

    pub fn removed_containers(&self) -> Vec<String> {
        self.inner.lock().expect("poisoned").removed.clone()
    }

    /// Env pairs the container was created with (assertion helper).
    pub fn env_of(&self, container_id: &str) -> Vec<(String, String)> {
        self.inner
            .lock()
            .expect("poisoned")
            .containers
            .get(container_id)
            .map(|s| s.env.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ContainerDriver for MockDriver {
    async fn image_exists(&self, tag: &str) -> Result<bool, SandboxError> {
        Ok(self.inner.lock().expect("poisoned").images.iter().any(|i| i == tag))
    }

    async fn commit_image(&self, _container_id: &str, tag: &str) -> Result<(), SandboxError> {
        self.inner.lock().expect("poisoned").images.push(tag.to_string());
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, SandboxError> {
        let mut inner = self.inner.lock().expect("poisoned");
        inner.next += 1;
        let id = format!("ctr-{}", inner.next);
        inner.containers.insert(id.clone(), spec.clone());
        Ok(id)
    }

    async fn start(&self, _container_id: &str) -> Result<(), SandboxError> {
        Ok(())
    }

    async fn pause(&self, container_id: &str) -> Result<(), SandboxError> {
        self.inner
            .lock()
            .expect("poisoned")
            .paused
            .insert(container_id.to_string(), true);
        Ok(())
    }

    async fn unpause(&self, container_id: &str) -> Result<(), SandboxError> {
        self.inner
            .lock()
            .expect("poisoned")
            .paused
            .insert(container_id.to_string(), false);
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> Result<(), SandboxError> {
        self.inner
            .lock()
            .expect("poisoned")
            .removed
            .push(container_id.to_string());
        Ok(())
    }

    async fn exec(
        &self,
        container_id: &str,
        argv: &[String],
        _timeout: Duration,
    ) -> Result<ExecOutput, SandboxError> {
        let mut inner = self.inner.lock().expect("poisoned");
        inner.execs.push((container_id.to_string(), argv.to_vec()));
        Ok(inner.exec_script.pop_front().unwrap_or_default())
    }

    async fn write_file(
        &self,
        container_id: &str,
        path: &str,
        content: &str,
    ) -> Result<(), SandboxError> {
        self.inner.lock().expect("poisoned").files.push((
            container_id.to_string(),
            path.to_string(),
            content.to_string(),
        ));
        Ok(())
    }

    async fn logs(&self, container_id: &str) -> Result<String, SandboxError> {
        let inner = self.inner.lock().expect("poisoned");
        Ok(inner
            .execs
            .iter()
            .filter(|(id, _)| id == container_id)
            .map(|(_, argv)| argv.join(" "))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}
