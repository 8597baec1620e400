//! Build sandbox: lightweight container runs for workspace preparation and the
//! project test suite.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::GraphError;
use crate::sandbox::{ContainerDriver, ContainerSpec};
use crate::state::TestResults;

/// Sandboxed build steps used by the preparer and tester nodes.
#[async_trait]
pub trait BuildSandbox: Send + Sync {
    /// Clones the empty repo, materializes the selected template modules,
    /// writes the task and agent-guide files, commits and pushes.
    async fn prepare_workspace(
        &self,
        repository_url: &str,
        modules: &[String],
        task: &str,
        timeout: Duration,
    ) -> Result<(), GraphError>;

    /// Runs the project's test suite and parses pass/fail counts.
    async fn run_test_suite(
        &self,
        repository_url: &str,
        timeout: Duration,
    ) -> Result<TestResults, GraphError>;
}

/// Container-backed sandbox: one throwaway builder container per step.
pub struct DockerBuildSandbox {
    driver: Arc<dyn ContainerDriver>,
    builder_image: String,
}

impl DockerBuildSandbox {
    pub fn new(driver: Arc<dyn ContainerDriver>) -> Self {
        Self {
            driver,
            builder_image: "foundry-base:builder".to_string(),
        }
    }

    async fn run_script(&self, script: String, timeout: Duration) -> Result<String, GraphError> {
        let spec = ContainerSpec {
            name: format!("builder-{}", &uuid::Uuid::new_v4().simple().to_string()[..12]),
            image: self.builder_image.clone(),
            env: Vec::new(),
            has_internet: true,
        };
        let container_id = self
            .driver
            .create_container(&spec)
            .await
            .map_err(|e| GraphError::Transient(e.to_string()))?;
        self.driver
            .start(&container_id)
            .await
            .map_err(|e| GraphError::Transient(e.to_string()))?;
        let result = self
            .driver
            .exec(
                &container_id,
                &["sh".to_string(), "-lc".to_string(), script],
                timeout,
            )
            .await;
        // Builder containers are throwaway.
        let _ = self.driver.remove(&container_id).await;
        let output = result.map_err(|e| GraphError::Transient(e.to_string()))?;
        if output.exit_code != 0 {
            return Err(GraphError::ExecutionFailed(format!(
                "sandbox step failed ({}): {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }
        Ok(output.stdout)
    }

    /// Parses `N passed` / `M failed` counters from test output.
    fn parse_counts(stdout: &str) -> TestResults {
        let mut passed = 0;
        let mut failed = 0;
        for line in stdout.lines() {
            for (index, word) in line.split_whitespace().enumerate() {
                let count = |offset: usize| {
                    line.split_whitespace()
                        .nth(offset)
                        .and_then(|w| w.parse::<u32>().ok())
                };
                if word.starts_with("passed") && index >= 1 {
                    passed = count(index - 1).unwrap_or(passed);
                }
                if word.starts_with("failed") && index >= 1 {
                    failed = count(index - 1).unwrap_or(failed);
                }
            }
        }
        let summary = stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("")
            .trim()
            .to_string();
        TestResults {
            passed,
            failed,
            summary,
        }
    }
}

#[async_trait]
impl BuildSandbox for DockerBuildSandbox {
    async fn prepare_workspace(
        &self,
        repository_url: &str,
        modules: &[String],
        task: &str,
        timeout: Duration,
    ) -> Result<(), GraphError> {
        let script = format!(
            "git clone {repo} /workspace/app && cd /workspace/app \
             && foundry-template generate {modules} \
             && printf '%s' '{task}' > TASK.md \
             && git add -A && git commit -m 'scaffold template modules' && git push",
            repo = repository_url,
            modules = modules.join(" "),
            task = task.replace('\'', "'\\''"),
        );
        self.run_script(script, timeout).await.map(|_| ())
    }

    async fn run_test_suite(
        &self,
        repository_url: &str,
        timeout: Duration,
    ) -> Result<TestResults, GraphError> {
        let script = format!(
            "git clone {repo} /workspace/app && cd /workspace/app && ./scripts/test.sh",
            repo = repository_url
        );
        let stdout = self.run_script(script, timeout).await?;
        Ok(Self::parse_counts(&stdout))
    }
}

/// Scripted sandbox for tests: plays back test results in order and records
/// prepared workspaces.
pub struct MockBuildSandbox {
    results: Mutex<std::collections::VecDeque<TestResults>>,
    prepared: Mutex<Vec<(String, Vec<String>)>>,
}

impl MockBuildSandbox {
    pub fn new(results: Vec<TestResults>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            prepared: Mutex::new(Vec::new()),
        }
    }

    pub fn prepared(&self) -> Vec<(String, Vec<String>)> {
        self.prepared.lock().expect("poisoned").clone()
    }
}

#[async_trait]
impl BuildSandbox for MockBuildSandbox {
    async fn prepare_workspace(
        &self,
        repository_url: &str,
        modules: &[String],
        _task: &str,
        _timeout: Duration,
    ) -> Result<(), GraphError> {
        self.prepared
            .lock()
            .expect("poisoned")
            .push((repository_url.to_string(), modules.to_vec()));
        Ok(())
    }

    async fn run_test_suite(
        &self,
        _repository_url: &str,
        _timeout: Duration,
    ) -> Result<TestResults, GraphError> {
        self.results
            .lock()
            .expect("poisoned")
            .pop_front()
            .ok_or_else(|| GraphError::ExecutionFailed("no scripted test result".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: pass/fail counters parse from a typical test summary line.
    #[test]
    fn parse_counts_from_summary() {
        let report = DockerBuildSandbox::parse_counts("collected 14 items\n\n12 passed, 2 failed in 3.1s\n");
        assert_eq!(report.passed, 12);
        assert_eq!(report.failed, 2);
        assert!(report.summary.contains("12 passed"));
    }

    /// **Scenario**: Output without counters yields zeros, not an error.
    #[test]
    fn parse_counts_tolerates_missing() {
        let report = DockerBuildSandbox::parse_counts("build ok\n");
        assert_eq!(report.passed, 0);
        assert_eq!(report.failed, 0);
    }
}
