use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use nix::{sys::signal::Signal, unistd::Pid};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type ArcReload = Arc<dyn ReloadTrigger + Send + Sync>;

/// Asks running services to re-read their configuration.
#[async_trait]
pub trait ReloadTrigger {
    async fn reload(&self) -> Result<(), ReloadError>;
}

#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("unable to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with status {code}: {stderr}")]
    NonZeroExit {
        command: String,
        code: i32,
        stderr: String,
    },
    #[error("`{0}` was terminated by a signal")]
    Killed(String),
    #[error("unable to read pid file {path:?}: {source}")]
    PidFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid pid {0:?}")]
    InvalidPid(String),
    #[error("unknown signal {0:?}")]
    InvalidSignal(String),
    #[error("unable to send {signal} to pid {pid}: {source}")]
    Signal {
        pid: i32,
        signal: Signal,
        #[source]
        source: nix::Error,
    },
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("reload failed for {}", ServiceFailure::list(.0))]
    Services(Vec<ServiceFailure>),
}

#[derive(Debug)]
pub struct ServiceFailure {
    pub service: String,
    pub error: ReloadError,
}

impl ServiceFailure {
    fn list(failures: &[ServiceFailure]) -> String {
        failures
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for ServiceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.service, self.error)
    }
}

// ---- configuration ----

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ReloadConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_services")]
    pub services: Vec<ServiceConfig>,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            services: default_services(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub name: String,
    #[serde(flatten)]
    pub trigger: TriggerConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "trigger", rename_all = "lowercase")]
pub enum TriggerConfig {
    /// Run through `sh -c`, success is a zero exit status.
    Command { command: String },
    /// Send a signal to a daemon, identified by its pid or its pid file.
    Signal {
        pid: Option<i32>,
        pid_file: Option<PathBuf>,
        #[serde(default = "default_signal")]
        signal: String,
    },
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_signal() -> String {
    "SIGHUP".into()
}

fn default_services() -> Vec<ServiceConfig> {
    vec![
        ServiceConfig {
            name: "postfix".into(),
            trigger: TriggerConfig::Command {
                command: "postfix reload".into(),
            },
        },
        ServiceConfig {
            name: "dovecot".into(),
            trigger: TriggerConfig::Command {
                command: "doveadm reload".into(),
            },
        },
    ]
}

// ---- triggers ----

pub struct CommandReload {
    command: String,
}

impl CommandReload {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl ReloadTrigger for CommandReload {
    async fn reload(&self) -> Result<(), ReloadError> {
        tracing::debug!(cmd = %self.command, "run reload command");
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ReloadError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        match output.status.code() {
            Some(0) => Ok(()),
            Some(code) => Err(ReloadError::NonZeroExit {
                command: self.command.clone(),
                code,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
            None => Err(ReloadError::Killed(self.command.clone())),
        }
    }
}

#[derive(Debug, Clone)]
pub enum PidSource {
    Pid(i32),
    File(PathBuf),
}

pub struct SignalReload {
    pid: PidSource,
    signal: Signal,
}

impl SignalReload {
    pub fn new(pid: PidSource, signal: Signal) -> Self {
        Self { pid, signal }
    }

    /// Accepts `SIGHUP` as well as `HUP`.
    pub fn parse_signal(name: &str) -> Result<Signal, ReloadError> {
        let upper = name.trim().to_ascii_uppercase();
        let full = match upper.starts_with("SIG") {
            true => upper,
            false => format!("SIG{}", upper),
        };
        Signal::from_str(&full).map_err(|_| ReloadError::InvalidSignal(name.to_string()))
    }

    async fn resolve_pid(&self) -> Result<i32, ReloadError> {
        let raw = match &self.pid {
            PidSource::Pid(pid) => return Ok(*pid),
            PidSource::File(path) => tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ReloadError::PidFile {
                    path: path.clone(),
                    source,
                })?,
        };
        match raw.trim().parse::<i32>() {
            Ok(pid) if pid > 0 => Ok(pid),
            _ => Err(ReloadError::InvalidPid(raw.trim().to_string())),
        }
    }
}

#[async_trait]
impl ReloadTrigger for SignalReload {
    async fn reload(&self) -> Result<(), ReloadError> {
        let pid = self.resolve_pid().await?;
        tracing::debug!(pid, signal=%self.signal, "send reload signal");
        nix::sys::signal::kill(Pid::from_raw(pid), self.signal).map_err(|source| {
            ReloadError::Signal {
                pid,
                signal: self.signal,
                source,
            }
        })
    }
}

/// Reloads every configured service concurrently.
///
/// All services are attempted even when one of them fails; each attempt is
/// bounded by the same timeout. An empty service list always succeeds.
pub struct MultiReload {
    services: Vec<(String, ArcReload)>,
    timeout: Duration,
}

impl MultiReload {
    pub fn new(timeout: Duration) -> Self {
        Self {
            services: vec![],
            timeout,
        }
    }

    pub fn with_service(mut self, name: impl Into<String>, trigger: ArcReload) -> Self {
        self.services.push((name.into(), trigger));
        self
    }

    pub fn from_config(config: &ReloadConfig) -> Result<Self, ReloadError> {
        let mut multi = Self::new(Duration::from_secs(config.timeout_secs));
        for svc in config.services.iter() {
            let trigger: ArcReload = match &svc.trigger {
                TriggerConfig::Command { command } => Arc::new(CommandReload::new(command)),
                TriggerConfig::Signal {
                    pid,
                    pid_file,
                    signal,
                } => {
                    let source = match (pid, pid_file) {
                        (Some(pid), _) => PidSource::Pid(*pid),
                        (None, Some(path)) => PidSource::File(path.clone()),
                        (None, None) => {
                            return Err(ReloadError::InvalidPid(format!(
                                "service {} needs a pid or a pid_file",
                                svc.name
                            )))
                        }
                    };
                    Arc::new(SignalReload::new(source, SignalReload::parse_signal(signal)?))
                }
            };
            multi = multi.with_service(svc.name.clone(), trigger);
        }
        Ok(multi)
    }

    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.services.iter().map(|(name, _)| name.as_str())
    }
}

#[async_trait]
impl ReloadTrigger for MultiReload {
    async fn reload(&self) -> Result<(), ReloadError> {
        let attempts = self.services.iter().map(|(name, trigger)| async move {
            let res = match tokio::time::timeout(self.timeout, trigger.reload()).await {
                Ok(res) => res,
                Err(_) => Err(ReloadError::Timeout(self.timeout)),
            };
            match res {
                Ok(()) => {
                    tracing::info!(service = %name, "reloaded");
                    None
                }
                Err(error) => {
                    tracing::warn!(service = %name, err = %error, "reload failed");
                    Some(ServiceFailure {
                        service: name.clone(),
                        error,
                    })
                }
            }
        });

        let failures: Vec<ServiceFailure> = join_all(attempts).await.into_iter().flatten().collect();
        match failures.is_empty() {
            true => Ok(()),
            false => Err(ReloadError::Services(failures)),
        }
    }
}
