// SPDX-License-Identifier: Apache-2.0

use clap::{Args, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::discovery::DiscoveryKind;
use crate::discovery::docker::DEFAULT_DOCKER_HOST;
use crate::discovery::watcher::WatchMode;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgsError {
    #[error("Required --{0} missing.")]
    Missing(&'static str),

    #[error("Log directory {} is not a directory.", .0.display())]
    NotADirectory(PathBuf),
}

#[derive(Debug, Args, Clone)]
pub struct AgentRun {
    /// Sources configuration file
    #[arg(long, env = "DLE_CONFIG_FILE", default_value = "config.toml")]
    pub config: PathBuf,

    /// Token for sources without a configured one
    #[arg(long, env = "DLE_DEFAULT_TOKEN")]
    pub default_token: Option<String>,

    /// How sources are discovered
    #[arg(value_enum, long, env = "DLE_DISCOVERY", default_value = "directory")]
    pub discovery: DiscoveryKind,

    /// Root of the per-source log directories
    #[arg(long, env = "DLE_LOG_DIRECTORY")]
    pub log_directory: Option<PathBuf>,

    /// Watch the log directory for new and removed sources
    #[arg(long, env = "DLE_WATCH_LOG_DIRECTORY", default_value = "false")]
    pub watch_ld: bool,

    /// Directory watching backend
    #[arg(value_enum, long, env = "DLE_WATCH_MODE", default_value = "auto")]
    pub watch_mode: WatchMode,

    /// Decode {"log": .., "stream": ..} lines
    #[arg(
        long,
        env = "DLE_PARSE_DOCKER_LOGS",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub parse_docker_logs: bool,

    /// Container runtime endpoint
    #[arg(long, env = "DOCKER_HOST", default_value = DEFAULT_DOCKER_HOST)]
    pub docker_host: String,

    /// Log endpoint (host:port), TLS only
    #[arg(long, env = "DLE_LOG_ENTRIES_HOST", default_value = "data.logentries.com:20000")]
    pub le_host: String,

    /// PEM certificate bundle used to verify the log endpoint
    #[arg(long, env = "DLE_PEM_FILE", default_value = "certs.pem")]
    pub pem_file: PathBuf,

    /// Seconds allowed for the TCP connect to the log endpoint
    #[arg(long, env = "DLE_CONNECT_TIMEOUT_SECS", default_value = "30")]
    pub connect_timeout_secs: u64,

    /// Seconds to wait for a tailer to acknowledge quit
    #[arg(long, env = "DLE_QUIT_TIMEOUT_SECS", default_value = "5")]
    pub quit_timeout_secs: u64,
}

impl AgentRun {
    /// Check the options that have no usable default.
    pub fn validate(&self) -> Result<(), ArgsError> {
        if self.default_token().is_none() {
            return Err(ArgsError::Missing("default-token"));
        }

        if self.discovery == DiscoveryKind::Directory {
            match &self.log_directory {
                Some(dir) if dir.as_os_str().is_empty() => {
                    return Err(ArgsError::Missing("log-directory"));
                }
                Some(dir) if !dir.is_dir() => return Err(ArgsError::NotADirectory(dir.clone())),
                Some(_) => {}
                None => return Err(ArgsError::Missing("log-directory")),
            }
        }

        if self.le_host.trim().is_empty() {
            return Err(ArgsError::Missing("le-host"));
        }

        Ok(())
    }

    pub fn default_token(&self) -> Option<&str> {
        self.default_token.as_deref().filter(|t| !t.is_empty())
    }

    pub fn quit_timeout(&self) -> Duration {
        Duration::from_secs(self.quit_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;

    #[derive(Debug, Parser)]
    struct TestArgs {
        #[command(flatten)]
        agent: AgentRun,
    }

    fn parse(args: &[&str]) -> AgentRun {
        let mut argv = vec!["dle"];
        argv.extend_from_slice(args);
        TestArgs::try_parse_from(argv).unwrap().agent
    }

    #[test]
    fn defaults() {
        let args = parse(&[]);
        assert_eq!(PathBuf::from("config.toml"), args.config);
        assert_eq!(DiscoveryKind::Directory, args.discovery);
        assert_eq!(WatchMode::Auto, args.watch_mode);
        assert!(!args.watch_ld);
        assert!(args.parse_docker_logs);
        assert_eq!("data.logentries.com:20000", args.le_host);
        assert_eq!(Duration::from_secs(5), args.quit_timeout());
        assert_eq!(Duration::from_secs(30), args.connect_timeout());
    }

    #[test]
    fn connect_timeout_is_configurable() {
        let args = parse(&["--connect-timeout-secs", "3"]);
        assert_eq!(Duration::from_secs(3), args.connect_timeout());
    }

    #[test]
    fn structured_parsing_can_be_disabled() {
        let args = parse(&["--parse-docker-logs", "false", "--watch-ld"]);
        assert!(!args.parse_docker_logs);
        assert!(args.watch_ld);
    }

    #[test]
    fn missing_required_options() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_str().unwrap();

        assert_eq!(
            Err(ArgsError::Missing("default-token")),
            parse(&["--log-directory", root]).validate()
        );
        assert_eq!(
            Err(ArgsError::Missing("default-token")),
            parse(&["--default-token", "", "--log-directory", root]).validate()
        );
        assert_eq!(
            Err(ArgsError::Missing("log-directory")),
            parse(&["--default-token", "DEF"]).validate()
        );
        assert_eq!(
            Err(ArgsError::Missing("le-host")),
            parse(&["--default-token", "DEF", "--log-directory", root, "--le-host", ""])
                .validate()
        );
        assert_eq!(
            Ok(()),
            parse(&["--default-token", "DEF", "--log-directory", root]).validate()
        );
    }

    #[test]
    fn log_directory_must_exist() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");

        let args = parse(&[
            "--default-token",
            "DEF",
            "--log-directory",
            missing.to_str().unwrap(),
        ]);
        assert_eq!(Err(ArgsError::NotADirectory(missing)), args.validate());
    }

    #[test]
    fn docker_discovery_needs_no_directory() {
        let args = parse(&["--default-token", "DEF", "--discovery", "docker"]);
        assert_eq!(Ok(()), args.validate());
        assert_eq!(
            "Required --default-token missing.",
            ArgsError::Missing("default-token").to_string()
        );
    }
}
