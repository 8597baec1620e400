//! Docker implementation of [`ContainerDriver`] via bollard.

use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogsOptions, RemoveContainerOptions, StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CommitContainerOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use tracing::debug;

use super::driver::{ContainerDriver, ContainerSpec, ExecOutput};
use super::SandboxError;

/// Docker driver. Containers run detached with a long-sleep entrypoint so the
/// manager can exec agent commands into them.
pub struct DockerDriver {
    docker: Docker,
}

impl DockerDriver {
    pub fn connect() -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::Driver(e.to_string()))?;
        Ok(Self { docker })
    }

    fn map_err(e: bollard::errors::Error) -> SandboxError {
        SandboxError::Driver(e.to_string())
    }
}

#[async_trait]
impl ContainerDriver for DockerDriver {
    async fn image_exists(&self, tag: &str) -> Result<bool, SandboxError> {
        match self.docker.inspect_image(tag).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(Self::map_err(e)),
        }
    }

    async fn commit_image(&self, container_id: &str, tag: &str) -> Result<(), SandboxError> {
        let (repo, tag_part) = tag.split_once(':').unwrap_or((tag, "latest"));
        let options = CommitContainerOptions {
            container: container_id.to_string(),
            repo: repo.to_string(),
            tag: tag_part.to_string(),
            pause: true,
            ..Default::default()
        };
        self.docker
            .commit_container(options, Config::<String>::default())
            .await
            .map_err(Self::map_err)?;
        debug!(container_id, tag, "committed agent image");
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, SandboxError> {
        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        let host_config = HostConfig {
            network_mode: Some(if spec.has_internet {
                "bridge".to_string()
            } else {
                "none".to_string()
            }),
            ..Default::default()
        };
        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(env),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            host_config: Some(host_config),
            ..Default::default()
        };
        let response = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(Self::map_err)?;
        debug!(name = %spec.name, image = %spec.image, "created container");
        Ok(response.id)
    }

    async fn start(&self, container_id: &str) -> Result<(), SandboxError> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(Self::map_err)
    }

    async fn pause(&self, container_id: &str) -> Result<(), SandboxError> {
        self.docker
            .pause_container(container_id)
            .await
            .map_err(Self::map_err)
    }

    async fn unpause(&self, container_id: &str) -> Result<(), SandboxError> {
        self.docker
            .unpause_container(container_id)
            .await
            .map_err(Self::map_err)
    }

    async fn remove(&self, container_id: &str) -> Result<(), SandboxError> {
        self.docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(Self::map_err)
    }

    async fn exec(
        &self,
        container_id: &str,
        argv: &[String],
        timeout: Duration,
    ) -> Result<ExecOutput, SandboxError> {
        let exec = self
            .docker
            .create_exec(
                container_id,
                CreateExecOptions {
                    cmd: Some(argv.to_vec()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(Self::map_err)?;

        let collect = async {
            let mut stdout = String::new();
            let mut stderr = String::new();
            if let StartExecResults::Attached { mut output, .. } = self
                .docker
                .start_exec(&exec.id, None)
                .await
                .map_err(Self::map_err)?
            {
                while let Some(chunk) = output.next().await {
                    match chunk.map_err(Self::map_err)? {
                        bollard::container::LogOutput::StdOut { message } => {
                            stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                        bollard::container::LogOutput::StdErr { message } => {
                            stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                        _ => {}
                    }
                }
            }
            Ok::<(String, String), SandboxError>((stdout, stderr))
        };

        let (stdout, stderr) = tokio::time::timeout(timeout, collect)
            .await
            .map_err(|_| SandboxError::Timeout(timeout.as_secs()))??;

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(Self::map_err)?;
        Ok(ExecOutput {
            exit_code: inspect.exit_code.unwrap_or(-1),
            stdout,
            stderr,
        })
    }

    async fn write_file(
        &self,
        container_id: &str,
        path: &str,
        content: &str,
    ) -> Result<(), SandboxError> {
        let dir = std::path::Path::new(path)
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "/".to_string());
        // Base64 round-trip avoids quoting issues for arbitrary file content.
        use base64::Engine as _;
        let encoded = base64::engine::general_purpose::STANDARD.encode(content);
        let script = format!(
            "mkdir -p '{}' && printf '%s' '{}' | base64 -d > '{}'",
            dir, encoded, path
        );
        let output = self
            .exec(
                container_id,
                &["sh".to_string(), "-lc".to_string(), script],
                Duration::from_secs(30),
            )
            .await?;
        if output.exit_code != 0 {
            return Err(SandboxError::Driver(format!(
                "write_file {} failed: {}",
                path, output.stderr
            )));
        }
        Ok(())
    }

    async fn logs(&self, container_id: &str) -> Result<String, SandboxError> {
        let mut stream = self.docker.logs(
            container_id,
            Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                tail: "500".to_string(),
                ..Default::default()
            }),
        );
        let mut out = String::new();
        while let Some(chunk) = stream.next().await {
            let log = chunk.map_err(Self::map_err)?;
            out.push_str(&String::from_utf8_lossy(&log.into_bytes()));
        }
        Ok(out)
    }
}
