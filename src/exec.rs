// File: ./src/exec.rs
//! Async command executor.
//!
//! Every external process an adapter needs goes through [`CommandExecutor`],
//! so the timeout and cancellation policy has a single enforcement point.
//! The child is spawned with `kill_on_drop`: dropping the future returned by
//! [`CommandExecutor::execute`] (timeout, aborted cycle task) kills it.
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Cap on how much stderr is carried inside an error message.
const MAX_STDERR_CHARS: usize = 2000;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{program}' exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("'{program}' timed out after {}s", .after.as_secs())]
    TimedOut { program: String, after: Duration },
    #[error("i/o error talking to '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<Vec<u8>>,
    pub envs: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// First element is the program. `None` for an empty argv.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            ..Default::default()
        })
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn stdin(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(payload.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.insert(key.into(), value.into());
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandExecutor {
    timeout: Option<Duration>,
}

impl CommandExecutor {
    /// `None` disables the timeout.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Runs the command to completion and returns its stdout lines.
    ///
    /// A non-zero exit is `ExecError::Failed` carrying the captured stderr.
    pub async fn execute(&self, spec: &CommandSpec) -> Result<Vec<String>, ExecError> {
        let run = Self::run(spec);
        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(res) => res,
                Err(_) => {
                    log::warn!("Command '{}' timed out after {:?}", spec.program, limit);
                    Err(ExecError::TimedOut {
                        program: spec.program.clone(),
                        after: limit,
                    })
                }
            },
            None => run.await,
        }
    }

    async fn run(spec: &CommandSpec) -> Result<Vec<String>, ExecError> {
        log::debug!("Executing '{}' with {} arg(s)", spec.program, spec.args.len());

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.envs)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        // Feed stdin concurrently so a chatty child cannot deadlock on a full
        // stdout pipe while we are still writing.
        let writer = match (child.stdin.take(), &spec.stdin) {
            (Some(mut pipe), Some(payload)) => {
                let payload = payload.clone();
                Some(tokio::spawn(async move {
                    let res = pipe.write_all(&payload).await;
                    drop(pipe);
                    res
                }))
            }
            _ => None,
        };

        let output = child.wait_with_output().await.map_err(|source| ExecError::Io {
            program: spec.program.clone(),
            source,
        })?;

        if let Some(writer) = writer
            && let Ok(Err(e)) = writer.await
            && e.kind() != std::io::ErrorKind::BrokenPipe
        {
            return Err(ExecError::Io {
                program: spec.program.clone(),
                source: e,
            });
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let mut stderr: String = stderr.trim().chars().take(MAX_STDERR_CHARS).collect();
            if stderr.is_empty() {
                stderr = "no error output".to_string();
            }
            return Err(ExecError::Failed {
                program: spec.program.clone(),
                status: output.status.to_string(),
                stderr,
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().map(str::to_string).collect())
    }
}
