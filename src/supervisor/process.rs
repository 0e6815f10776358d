//! Worker process abstraction used by the supervisor.

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, Command};

/// Environment variable carrying a worker's logical id.
pub const WORKER_ID_ENV: &str = "PROTOMEMPOOL_WORKER_ID";

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkerExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl WorkerExit {
    pub fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl core::fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => f.write_str("unknown exit"),
        }
    }
}

/// A running worker. `wait` resolves when the process exits.
pub trait WorkerProcess: Send {
    fn pid(&self) -> Option<u32>;

    fn wait(&mut self) -> BoxFuture<'_, Result<WorkerExit>>;

    fn kill(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// Starts worker processes tagged with a logical id.
pub trait WorkerSpawner: Send + Sync + 'static {
    fn spawn(&self, logical_id: usize) -> Result<Box<dyn WorkerProcess>>;
}

/// Spawns OS processes, by default re-executing the current binary.
#[derive(Debug, Clone)]
pub struct CommandSpawner {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
    inherit_stdio: bool,
}

impl CommandSpawner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            inherit_stdio: true,
        }
    }

    pub fn current_exe() -> Result<Self> {
        let exe = std::env::current_exe().context("failed to resolve current executable")?;
        Ok(Self::new(exe).args(std::env::args_os().skip(1)))
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn inherit_stdio(mut self, inherit: bool) -> Self {
        self.inherit_stdio = inherit;
        self
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

impl WorkerSpawner for CommandSpawner {
    fn spawn(&self, logical_id: usize) -> Result<Box<dyn WorkerProcess>> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .env(WORKER_ID_ENV, logical_id.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if !self.inherit_stdio {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let child = command.spawn().with_context(|| {
            format!(
                "failed to spawn worker {logical_id} ({})",
                self.program.display()
            )
        })?;
        Ok(Box::new(ChildProcess { child }))
    }
}

struct ChildProcess {
    child: Child,
}

impl WorkerProcess for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn wait(&mut self) -> BoxFuture<'_, Result<WorkerExit>> {
        Box::pin(async move {
            let status = self.child.wait().await.context("failed to wait on worker")?;
            Ok(WorkerExit::from_status(status))
        })
    }

    fn kill(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.child.kill().await.context("failed to kill worker") })
    }
}

/// Role of the current process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    /// Forks and watches `count` workers; does no sync work itself.
    Supervisor { count: usize },
    /// Runs the sync engine. `None` when running standalone.
    Worker(Option<usize>),
}

impl ProcessRole {
    /// A process started with [`WORKER_ID_ENV`] set is always a worker.
    pub fn detect(worker_processes: usize) -> Result<Self> {
        match std::env::var(WORKER_ID_ENV) {
            Ok(raw) => Self::resolve(Some(raw.as_str()), worker_processes),
            Err(std::env::VarError::NotPresent) => Self::resolve(None, worker_processes),
            Err(err) => Err(err).with_context(|| format!("invalid {WORKER_ID_ENV}")),
        }
    }

    pub fn resolve(worker_id: Option<&str>, worker_processes: usize) -> Result<Self> {
        if let Some(raw) = worker_id {
            let id = raw
                .trim()
                .parse::<usize>()
                .with_context(|| format!("{WORKER_ID_ENV} must be a worker index, got {raw:?}"))?;
            return Ok(ProcessRole::Worker(Some(id)));
        }
        if worker_processes > 0 {
            Ok(ProcessRole::Supervisor {
                count: worker_processes,
            })
        } else {
            Ok(ProcessRole::Worker(None))
        }
    }
}
