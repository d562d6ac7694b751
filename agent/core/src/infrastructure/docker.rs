// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Docker probes
//
// Container state via the inspect API, request rate via log-line counting
// over the last poll window. These replace the demo-era shell pipelines
// ("docker inspect | grep Status", "docker logs | grep -c <timestamp>").

use std::time::Duration;

use async_trait::async_trait;
use bollard::query_parameters::LogsOptions;
use bollard::Docker;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::Mutex;

use crate::domain::probe::{
    ContainerState, MeasurementObservation, MeasurementProbe, ProbeError, StateObservation,
    StateProbe,
};

/// Connect to the Docker daemon, preferring an explicit socket path.
pub fn connect(socket_path: Option<&str>) -> Result<Docker, ProbeError> {
    let docker = if let Some(path) = socket_path {
        #[cfg(unix)]
        let result = Docker::connect_with_unix(path, 120, bollard::API_DEFAULT_VERSION);

        #[cfg(windows)]
        let result = Docker::connect_with_named_pipe(path, 120, bollard::API_DEFAULT_VERSION);

        result.map_err(|err| {
            ProbeError::Failed(format!("failed to connect to Docker at {path}: {err}"))
        })?
    } else {
        Docker::connect_with_local_defaults().map_err(|err| {
            ProbeError::Failed(format!(
                "failed to connect to Docker: {err}. Ensure the daemon is running \
                 and the socket is accessible (check: docker ps)"
            ))
        })?
    };
    Ok(docker)
}

fn map_docker_error(container: &str, err: bollard::errors::Error) -> ProbeError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => ProbeError::ContainerNotFound(container.to_string()),
        other => ProbeError::Failed(format!("docker api error: {other}")),
    }
}

/// Reports whether the monitored container is running.
pub struct DockerStateProbe {
    docker: Docker,
    container: String,
}

impl DockerStateProbe {
    pub fn new(docker: Docker, container: impl Into<String>) -> Self {
        Self {
            docker,
            container: container.into(),
        }
    }
}

#[async_trait]
impl StateProbe for DockerStateProbe {
    async fn observe(&self) -> Result<StateObservation, ProbeError> {
        let inspect = self
            .docker
            .inspect_container(&self.container, None)
            .await
            .map_err(|err| map_docker_error(&self.container, err))?;

        let running = inspect
            .state
            .as_ref()
            .and_then(|state| state.running)
            .unwrap_or(false);
        Ok(StateObservation {
            state: if running {
                ContainerState::Running
            } else {
                ContainerState::Stopped
            },
        })
    }
}

/// Derives a request rate from the container's log volume since the
/// previous observation.
pub struct DockerTrafficProbe {
    docker: Docker,
    container: String,
    interval: Duration,
    last_poll: Mutex<Option<DateTime<Utc>>>,
}

impl DockerTrafficProbe {
    pub fn new(docker: Docker, container: impl Into<String>, interval: Duration) -> Self {
        Self {
            docker,
            container: container.into(),
            interval,
            last_poll: Mutex::new(None),
        }
    }
}

#[async_trait]
impl MeasurementProbe for DockerTrafficProbe {
    async fn observe(&self) -> Result<MeasurementObservation, ProbeError> {
        let now = Utc::now();
        let since = {
            let mut last_poll = self.last_poll.lock();
            let interval = chrono::Duration::from_std(self.interval)
                .unwrap_or_else(|_| chrono::Duration::seconds(10));
            last_poll.replace(now).unwrap_or(now - interval)
        };

        let options = LogsOptions {
            stdout: true,
            stderr: true,
            since: since.timestamp() as i32,
            ..Default::default()
        };
        let mut stream = self.docker.logs(&self.container, Some(options));
        let mut lines: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let output = chunk.map_err(|err| map_docker_error(&self.container, err))?;
            lines += count_lines(&output.into_bytes());
        }

        let elapsed_secs = ((now - since).num_milliseconds().max(1) as f64) / 1000.0;
        Ok(MeasurementObservation {
            interval_secs: elapsed_secs,
            request_rate: (lines as f64 / elapsed_secs).round() as u64,
            ..Default::default()
        })
    }
}

fn count_lines(bytes: &[u8]) -> u64 {
    if bytes.is_empty() {
        return 0;
    }
    let newlines = bytes.iter().filter(|byte| **byte == b'\n').count() as u64;
    if bytes.ends_with(b"\n") {
        newlines
    } else {
        newlines + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_lines() {
        assert_eq!(count_lines(b""), 0);
        assert_eq!(count_lines(b"one line\n"), 1);
        assert_eq!(count_lines(b"no trailing newline"), 1);
        assert_eq!(count_lines(b"a\nb\nc\n"), 3);
        assert_eq!(count_lines(b"a\nb\npartial"), 3);
    }
}
