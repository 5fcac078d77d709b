//! Archive extraction through an external converter process
//!
//! The converter is invoked as `<program> [leading args] <archive> <xml entry> <json output>`.
//! Its stdout is forwarded to the log at info level and its stderr at error
//! level, line by line while it runs. Exit code 0 is the only success.

use crate::error::{IngestError, Result};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Host family, as far as launching the converter is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPlatform {
    Windows,
    Unix,
}

impl HostPlatform {
    pub fn current() -> Self {
        if cfg!(windows) {
            HostPlatform::Windows
        } else {
            HostPlatform::Unix
        }
    }
}

/// How the converter executable is launched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractorCommand {
    program: PathBuf,
    leading_args: Vec<OsString>,
}

impl ExtractorCommand {
    /// Run `executable` directly
    pub fn direct(executable: impl Into<PathBuf>) -> Self {
        Self {
            program: executable.into(),
            leading_args: Vec::new(),
        }
    }

    /// Run `script` through `interpreter`, e.g. `python script.py ...`
    pub fn interpreted(interpreter: impl Into<PathBuf>, script: impl Into<OsString>) -> Self {
        Self {
            program: interpreter.into(),
            leading_args: vec![script.into()],
        }
    }

    /// Invocation template for `platform`
    ///
    /// Windows has no shebang support, so a script converter is handed to the
    /// configured interpreter there. Without an interpreter, and on every other
    /// host, the executable is run as is, which is how the packaged
    /// `zipped-xml-to-json` binary is launched everywhere.
    pub fn for_platform(
        platform: HostPlatform,
        executable: impl Into<PathBuf>,
        interpreter: Option<&str>,
    ) -> Self {
        let interpreter = interpreter.map(str::trim).filter(|i| !i.is_empty());
        match (platform, interpreter) {
            (HostPlatform::Windows, Some(interpreter)) => {
                Self::interpreted(interpreter, executable.into())
            },
            _ => Self::direct(executable),
        }
    }

    /// Invocation suited to the current host
    pub fn for_host(executable: impl Into<PathBuf>, interpreter: Option<&str>) -> Self {
        Self::for_platform(HostPlatform::current(), executable, interpreter)
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn leading_args(&self) -> &[OsString] {
        &self.leading_args
    }
}

impl fmt::Display for ExtractorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.leading_args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Inputs for one extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionRequest {
    archive: PathBuf,
    entry: String,
    output: PathBuf,
}

impl ExtractionRequest {
    /// Paths are not checked for existence; the converter reports missing inputs itself
    pub fn new(
        archive: impl Into<PathBuf>,
        entry: impl Into<String>,
        output: impl Into<PathBuf>,
    ) -> Result<Self> {
        let request = Self {
            archive: archive.into(),
            entry: entry.into(),
            output: output.into(),
        };

        if request.archive.as_os_str().is_empty() {
            return Err(IngestError::Config("archive path cannot be empty".to_string()));
        }
        if request.entry.trim().is_empty() {
            return Err(IngestError::Config("archive entry cannot be empty".to_string()));
        }
        if request.output.as_os_str().is_empty() {
            return Err(IngestError::Config("output path cannot be empty".to_string()));
        }

        Ok(request)
    }

    pub fn archive(&self) -> &Path {
        &self.archive
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn output(&self) -> &Path {
        &self.output
    }
}

#[derive(Debug, Clone, Copy)]
enum OutputStream {
    Stdout,
    Stderr,
}

/// Runs the converter and waits for it
#[derive(Debug, Clone)]
pub struct ArchiveExtractor {
    command: ExtractorCommand,
    timeout: Option<Duration>,
}

impl ArchiveExtractor {
    pub fn new(command: ExtractorCommand) -> Self {
        Self {
            command,
            timeout: None,
        }
    }

    /// Kill the converter if it runs longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn command(&self) -> &ExtractorCommand {
        &self.command
    }

    /// Convert the archive, returning the JSON output path on success
    pub async fn extract(&self, request: &ExtractionRequest) -> Result<PathBuf> {
        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.leading_args)
            .arg(&request.archive)
            .arg(&request.entry)
            .arg(&request.output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(
            command = %self.command,
            archive = %request.archive.display(),
            entry = %request.entry,
            output = %request.output.display(),
            "Launching archive extractor"
        );

        let mut child = cmd.spawn().map_err(|source| IngestError::ExtractorLaunch {
            program: self.command.program.display().to_string(),
            source,
        })?;

        let mut drains: Vec<JoinHandle<()>> = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            drains.push(tokio::spawn(forward_lines(stdout, OutputStream::Stdout)));
        }
        if let Some(stderr) = child.stderr.take() {
            drains.push(tokio::spawn(forward_lines(stderr, OutputStream::Stderr)));
        }

        let waited = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(waited) => waited,
                Err(_) => {
                    if let Err(e) = child.kill().await {
                        warn!(error = %e, "Failed to kill extractor after timeout");
                    }
                    // Orphaned grandchildren may still hold the pipes open
                    for drain in drains {
                        drain.abort();
                    }
                    return Err(IngestError::ExtractorTimeout(limit.as_secs()));
                },
            },
            None => child.wait().await,
        };

        let status = waited.map_err(IngestError::ExtractorIo)?;

        for drain in drains {
            if let Err(e) = drain.await {
                warn!(error = %e, "Extractor output reader failed");
            }
        }

        match status.code() {
            Some(0) => {
                info!(output = %request.output.display(), "Archive extraction finished");
                Ok(request.output.clone())
            },
            Some(code) => {
                error!(code, "Archive extractor failed");
                Err(IngestError::ExtractorExit(code))
            },
            None => {
                error!("Archive extractor was terminated by a signal");
                Err(IngestError::ExtractorTerminated)
            },
        }
    }
}

async fn forward_lines<R>(reader: R, stream: OutputStream)
where
    R: AsyncRead + Unpin,
{
    let mut segments = BufReader::new(reader).split(b'\n');

    loop {
        match segments.next_segment().await {
            Ok(Some(bytes)) => {
                let line = String::from_utf8_lossy(&bytes);
                let line = line.trim_end();
                if line.is_empty() {
                    continue;
                }
                match stream {
                    OutputStream::Stdout => info!(target: "medsync::extractor", "{}", line),
                    OutputStream::Stderr => error!(target: "medsync::extractor", "{}", line),
                }
            },
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, ?stream, "Stopped reading extractor output");
                break;
            },
        }
    }
}
