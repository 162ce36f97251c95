// SPDX-License-Identifier: Apache-2.0

//! `RuntimeClient` backed by the Docker Engine API.

use async_trait::async_trait;
use bollard::container::{InspectContainerOptions, ListContainersOptions, LogOutput, LogsOptions};
use bollard::system::EventsOptions;
use bollard::{API_DEFAULT_VERSION, Docker};
use futures::StreamExt;
use std::collections::HashMap;
use tower::BoxError;

use super::error::RuntimeError;
use super::runtime::{ContainerIdStream, ContainerInfo, RuntimeClient};
use crate::registry::StartAt;
use crate::tailer::stream::ByteStream;

pub const DEFAULT_DOCKER_HOST: &str = "unix:///var/run/docker.sock";

const REQUEST_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, PartialEq, Eq)]
enum DockerHost {
    Unix(String),
    Http(String),
}

impl DockerHost {
    fn parse(host: &str) -> Result<Self, RuntimeError> {
        if let Some(path) = host.strip_prefix("unix://") {
            if !path.is_empty() {
                return Ok(DockerHost::Unix(path.to_string()));
            }
        } else if let Some(addr) = host.strip_prefix("tcp://") {
            if !addr.is_empty() {
                return Ok(DockerHost::Http(format!("http://{}", addr)));
            }
        } else if host.starts_with("http://") {
            return Ok(DockerHost::Http(host.to_string()));
        }

        Err(RuntimeError::UnsupportedHost(host.to_string()))
    }
}

pub struct DockerClient {
    docker: Docker,
    host: String,
}

impl DockerClient {
    pub fn connect(host: &str) -> Result<Self, RuntimeError> {
        let connect_err = |e: bollard::errors::Error| RuntimeError::Connect {
            host: host.to_string(),
            reason: e.to_string(),
        };

        let docker = match DockerHost::parse(host)? {
            #[cfg(unix)]
            DockerHost::Unix(path) => {
                Docker::connect_with_unix(&path, REQUEST_TIMEOUT_SECS, API_DEFAULT_VERSION)
                    .map_err(connect_err)?
            }
            #[cfg(not(unix))]
            DockerHost::Unix(_) => return Err(RuntimeError::UnsupportedHost(host.to_string())),
            DockerHost::Http(addr) => {
                Docker::connect_with_http(&addr, REQUEST_TIMEOUT_SECS, API_DEFAULT_VERSION)
                    .map_err(connect_err)?
            }
        };

        Ok(Self {
            docker,
            host: host.to_string(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

#[async_trait]
impl RuntimeClient for DockerClient {
    async fn list_running(&self) -> Result<Vec<String>, RuntimeError> {
        let options = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| RuntimeError::List(e.to_string()))?;

        Ok(containers.into_iter().filter_map(|c| c.id).collect())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInfo, RuntimeError> {
        let details = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| RuntimeError::Inspect {
                id: id.to_string(),
                reason: e.to_string(),
            })?;

        Ok(ContainerInfo {
            id: details.id.unwrap_or_else(|| id.to_string()),
            name: details.name,
            env: details.config.and_then(|c| c.env).unwrap_or_default(),
        })
    }

    async fn started_events(&self) -> Result<ContainerIdStream, RuntimeError> {
        let filters = HashMap::from([
            ("type".to_string(), vec!["container".to_string()]),
            ("event".to_string(), vec!["start".to_string()]),
        ]);
        let options = EventsOptions::<String> {
            filters,
            ..Default::default()
        };

        let stream = self.docker.events(Some(options)).filter_map(|event| async move {
            match event {
                Ok(message) => message.actor.and_then(|actor| actor.id).map(Ok),
                Err(e) => Some(Err(RuntimeError::Events(e.to_string()))),
            }
        });

        Ok(stream.boxed())
    }

    async fn logs(&self, id: &str, start_at: StartAt) -> Result<ByteStream, RuntimeError> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            tail: log_tail(start_at).to_string(),
            ..Default::default()
        };

        let stream = self.docker.logs(id, Some(options)).map(|chunk| {
            chunk
                .map(LogOutput::into_bytes)
                .map_err(|e| Box::new(e) as BoxError)
        });

        Ok(stream.boxed())
    }
}

/// Docker's `tail` option for a start position: `"0"` attaches at the end,
/// `"all"` replays the retained output.
fn log_tail(start_at: StartAt) -> &'static str {
    match start_at {
        StartAt::End => "0",
        StartAt::Beginning => "all",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hosts() {
        assert_eq!(
            DockerHost::Unix("/var/run/docker.sock".to_string()),
            DockerHost::parse(DEFAULT_DOCKER_HOST).unwrap()
        );
        assert_eq!(
            DockerHost::Http("http://10.0.0.1:2375".to_string()),
            DockerHost::parse("tcp://10.0.0.1:2375").unwrap()
        );
        assert_eq!(
            DockerHost::Http("http://localhost:2375".to_string()),
            DockerHost::parse("http://localhost:2375").unwrap()
        );

        for bad in ["", "unix://", "tcp://", "ssh://host", "npipe:////./pipe/docker"] {
            assert!(
                matches!(DockerHost::parse(bad), Err(RuntimeError::UnsupportedHost(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn connect_rejects_unsupported_hosts() {
        assert!(matches!(
            DockerClient::connect("ssh://host"),
            Err(RuntimeError::UnsupportedHost(_))
        ));
    }

    #[test]
    fn attaching_at_end_skips_retained_output() {
        assert_eq!("0", log_tail(StartAt::End));
        assert_eq!("all", log_tail(StartAt::Beginning));
    }

    #[cfg(unix)]
    #[test]
    fn connect_is_lazy() {
        // no request is made until the first API call
        let client = DockerClient::connect("unix:///nonexistent/docker.sock").unwrap();
        assert_eq!("unix:///nonexistent/docker.sock", client.host());
    }
}
