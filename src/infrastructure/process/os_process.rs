use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::domain::ports::{ProcessExit, WorkerProcess};

/// A worker running as a child OS process of this agent.
///
/// The child leads its own process group, so a kill also reaches whatever the
/// worker command started (e.g. the workload behind an `sh -c` wrapper).
#[derive(Debug)]
pub struct OsWorkerProcess {
    child: Child,
    pid: Option<u32>,
    exit: Option<ProcessExit>,
}

impl OsWorkerProcess {
    /// Spawn `command` as the leader of a new process group.
    pub fn spawn(command: &mut Command) -> io::Result<Self> {
        let child = command.process_group(0).spawn()?;
        let pid = child.id();
        debug!(pid = ?pid, "worker process spawned");
        Ok(Self {
            child,
            pid,
            exit: None,
        })
    }

    fn record_exit(&mut self, status: ExitStatus) -> ProcessExit {
        let exit = match (status.code(), status.signal()) {
            (Some(code), _) => ProcessExit::Code(code),
            (None, Some(signal)) => ProcessExit::Signal(signal),
            // Neither code nor signal: treat as abnormal.
            (None, None) => ProcessExit::Code(-1),
        };
        self.exit = Some(exit);
        exit
    }
}

#[async_trait]
impl WorkerProcess for OsWorkerProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn try_exit(&mut self) -> io::Result<Option<ProcessExit>> {
        if let Some(exit) = self.exit {
            return Ok(Some(exit));
        }
        Ok(self.child.try_wait()?.map(|status| self.record_exit(status)))
    }

    async fn kill(&mut self) -> io::Result<()> {
        if self.exit.is_some() {
            return Ok(());
        }
        let Some(pid) = self.pid else {
            return Ok(());
        };

        let raw_pid = i32::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        match signal::killpg(Pid::from_raw(raw_pid), Signal::SIGKILL) {
            // ESRCH: the whole group is already gone.
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => {
                warn!(pgid = raw_pid, error = %e, "failed to kill worker process group");
                return Err(e.into());
            }
        }

        // Reap the leader so it does not linger as a zombie.
        let status = self.child.wait().await?;
        let exit = self.record_exit(status);
        debug!(pgid = raw_pid, exit = %exit, "worker process group killed");
        Ok(())
    }
}
