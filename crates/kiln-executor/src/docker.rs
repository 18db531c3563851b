//! Docker step runner.

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, LogsOptions, RemoveContainerOptions, StartContainerOptions,
    WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use futures::StreamExt;
use kiln_core::executor::{LogSink, StepRunner, StepSpec, WORKSPACE_MOUNT};
use kiln_core::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Runs each step in a fresh container on the local Docker daemon.
pub struct DockerRunner {
    docker: Docker,
}

impl DockerRunner {
    /// Connect to the local Docker daemon.
    pub fn new() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Create with a custom Docker client.
    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    /// Check that the daemon answers.
    pub async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| Error::ExecutionFailed(format!("Docker daemon unreachable: {}", e)))
    }

    fn container_name(spec: &StepSpec) -> String {
        format!("kiln-{}-{}", spec.build_id, spec.index)
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let reference = image_reference(image);
        info!(image = %reference, "Pulling image");

        let options = CreateImageOptions {
            from_image: reference.clone(),
            ..Default::default()
        };
        let mut pull_stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = pull_stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(status = %status, "Pull progress");
                    }
                }
                Err(e) => {
                    return Err(Error::ExecutionFailed(format!(
                        "Failed to pull image {}: {}",
                        reference, e
                    )));
                }
            }
        }
        Ok(())
    }

    fn container_config(spec: &StepSpec) -> Config<String> {
        let host_config = HostConfig {
            binds: Some(vec![format!(
                "{}:{}",
                spec.workspace.display(),
                WORKSPACE_MOUNT
            )]),
            ..Default::default()
        };

        Config {
            image: Some(spec.image.clone()),
            cmd: Some(vec!["sh".to_string(), "-c".to_string(), spec.script()]),
            env: Some(spec.env_list()),
            working_dir: Some(WORKSPACE_MOUNT.to_string()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            // One pseudo-terminal keeps stdout and stderr interleaved in order.
            tty: Some(true),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    /// Start the container, drain its output and wait for it to stop.
    async fn run_container(
        &self,
        name: &str,
        spec: &StepSpec,
        sink: Arc<dyn LogSink>,
    ) -> Result<i64> {
        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::ExecutionFailed(format!("Failed to start container: {}", e)))?;

        let drain = tokio::spawn(drain_output(
            self.docker.clone(),
            name.to_string(),
            spec.name.clone(),
            sink,
        ));

        match self.wait_for_exit(name).await {
            Ok(exit_code) => {
                if let Err(e) = drain.await {
                    warn!(container = %name, error = %e, "Log drain task failed");
                }
                Ok(exit_code)
            }
            Err(e) => {
                drain.abort();
                Err(e)
            }
        }
    }

    async fn wait_for_exit(&self, name: &str) -> Result<i64> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(name, Some(options));

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit as an error carrying the code.
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(Error::ExecutionFailed(format!(
                "Failed waiting for container {}: {}",
                name, e
            ))),
            None => Err(Error::ExecutionFailed(format!(
                "Container {} stopped without reporting a status",
                name
            ))),
        }
    }

    async fn remove_container(&self, name: &str) {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(name, Some(options)).await {
            Ok(()) => debug!(container = %name, "Removed container"),
            Err(e) => warn!(container = %name, error = %e, "Failed to remove container"),
        }
    }
}

#[async_trait]
impl StepRunner for DockerRunner {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn run_step(&self, spec: &StepSpec, sink: Arc<dyn LogSink>) -> Result<i64> {
        self.pull_image(&spec.image).await?;

        let name = Self::container_name(spec);
        let create_options = CreateContainerOptions {
            name: name.clone(),
            platform: None,
        };

        info!(container = %name, step = %spec.name, "Creating container");
        self.docker
            .create_container(Some(create_options), Self::container_config(spec))
            .await
            .map_err(|e| Error::ExecutionFailed(format!("Failed to create container: {}", e)))?;

        let result = self.run_container(&name, spec, sink).await;
        self.remove_container(&name).await;

        if let Ok(exit_code) = &result {
            info!(container = %name, step = %spec.name, exit_code, "Step finished");
        }
        result
    }
}

/// Forward the container's combined output to `sink` until end of stream.
async fn drain_output(docker: Docker, container: String, step: String, sink: Arc<dyn LogSink>) {
    let options = LogsOptions::<String> {
        follow: true,
        stdout: true,
        stderr: true,
        ..Default::default()
    };
    let mut stream = docker.logs(&container, Some(options));

    while let Some(result) = stream.next().await {
        match result {
            Ok(output) => {
                let chunk = output.into_bytes();
                if chunk.is_empty() {
                    continue;
                }
                if let Err(e) = sink.write(chunk).await {
                    warn!(step = %step, error = %e, "Failed to publish log chunk");
                }
            }
            Err(e) => {
                warn!(container = %container, error = %e, "Log stream error");
                break;
            }
        }
    }

    if let Err(e) = sink.flush().await {
        warn!(step = %step, error = %e, "Failed to flush step output");
    }
}

/// Image reference with an explicit tag; an empty tag makes the daemon
/// pull every tag of the repository.
fn image_reference(image: &str) -> String {
    if image.contains('@') {
        return image.to_string();
    }
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    if image[name_start..].contains(':') {
        image.to_string()
    } else {
        format!("{}:latest", image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::ResourceId;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn make_spec(index: usize) -> StepSpec {
        let mut env = BTreeMap::new();
        env.insert("FOO".to_string(), "bar".to_string());
        StepSpec {
            build_id: ResourceId::new(),
            index,
            name: "test".to_string(),
            image: "alpine:3.20".to_string(),
            commands: vec!["echo hello".to_string(), "ls".to_string()],
            env,
            workspace: PathBuf::from("/tmp/kiln-ws"),
        }
    }

    #[test]
    fn test_container_name_per_step() {
        let spec = make_spec(0);
        let mut next = spec.clone();
        next.index = 1;

        let name = DockerRunner::container_name(&spec);
        assert!(name.starts_with("kiln-"));
        assert_eq!(name, DockerRunner::container_name(&spec));
        assert_ne!(name, DockerRunner::container_name(&next));
    }

    #[test]
    fn test_container_config() {
        let spec = make_spec(0);
        let config = DockerRunner::container_config(&spec);

        assert_eq!(config.image.as_deref(), Some("alpine:3.20"));
        assert_eq!(
            config.cmd,
            Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo hello && ls".to_string()
            ])
        );
        assert_eq!(config.env, Some(vec!["FOO=bar".to_string()]));
        assert_eq!(config.working_dir.as_deref(), Some("/workspace"));
        assert_eq!(config.tty, Some(true));
        let binds = config.host_config.and_then(|h| h.binds).unwrap();
        assert_eq!(binds, vec!["/tmp/kiln-ws:/workspace".to_string()]);
    }

    #[test]
    fn test_image_reference() {
        assert_eq!(image_reference("alpine"), "alpine:latest");
        assert_eq!(image_reference("alpine:3.20"), "alpine:3.20");
        assert_eq!(
            image_reference("localhost:5000/tools/rust"),
            "localhost:5000/tools/rust:latest"
        );
        assert_eq!(
            image_reference("ghcr.io/acme/ci:v2"),
            "ghcr.io/acme/ci:v2"
        );
        assert_eq!(
            image_reference("alpine@sha256:abcd"),
            "alpine@sha256:abcd"
        );
    }
}
