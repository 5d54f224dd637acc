use std::{
    ffi::OsStr,
    fs::File,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
};

use tokio::process::{Child, Command};

use crate::error::{Error, Result};

/// A child process whose stdout and stderr are captured into a file. The process is killed when
/// this handle is dropped.
#[derive(Debug)]
pub(crate) struct Process {
    child: Child,
    output_path: PathBuf,
}

impl Process {
    pub(crate) fn spawn<P, I, A>(path: P, args: I, output_path: &Path) -> Result<Self>
    where
        P: AsRef<OsStr>,
        I: IntoIterator<Item = A>,
        A: AsRef<OsStr>,
    {
        let stdout = File::create(output_path).map_err(|e| Error::io_at(output_path, e))?;
        let stderr = stdout.try_clone().map_err(|e| Error::io_at(output_path, e))?;

        let child = Command::new(path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn()?;
        Ok(Self {
            child,
            output_path: output_path.to_path_buf(),
        })
    }

    pub(crate) fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Where stdout and stderr are written.
    pub(crate) fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Issue a kill signal to the child process and immediately return; to wait for the process to
    /// actually exit, use `wait`.
    pub(crate) fn kill(&mut self) -> Result<()> {
        Ok(self.child.start_kill()?)
    }

    pub(crate) async fn wait(&mut self) -> Result<ExitStatus> {
        Ok(self.child.wait().await?)
    }

    pub(crate) fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }
}

/// Runs `path` to completion and returns its stdout.
pub(crate) async fn output<P, I, A>(path: P, args: I) -> Result<String>
where
    P: AsRef<OsStr>,
    I: IntoIterator<Item = A>,
    A: AsRef<OsStr>,
{
    let output = Command::new(path)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
