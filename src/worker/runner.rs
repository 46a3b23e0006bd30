use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use super::protocol::{LineBuffer, StatusBatch, StatusUpdate};
use crate::errors::{DEFAULT_JOB_ERROR, JobError};
use crate::job::{EMIT_PROGRESS_FLAG, JobDescriptor};
use crate::progress::RunHandle;

const READ_CHUNK: usize = 8 * 1024;

/// Receives status updates parsed from a running worker.
pub trait ProgressSink: Send + Sync {
    fn progress(&self, value: f64);
    fn message(&self, text: &str);
    fn error(&self, text: &str);
}

impl ProgressSink for RunHandle {
    fn progress(&self, value: f64) {
        self.set_progress(value);
    }

    fn message(&self, text: &str) {
        self.set_message(text);
    }

    fn error(&self, text: &str) {
        self.set_error(text);
    }
}

/// Abstraction over worker execution for testability.
/// Real implementation: `ProcessRunner`.
#[async_trait]
pub trait WorkerRunner: Send + Sync {
    /// Run one job to completion, reporting status to `sink`.
    async fn run(&self, job: &JobDescriptor, sink: &dyn ProgressSink) -> Result<(), JobError>;
}

/// Runs each job as an external worker process.
///
/// The command line is `program base_args.. job.to_args().. --emit-progress`.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: String,
    base_args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl ProcessRunner {
    pub fn new(program: impl Into<String>, base_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            base_args,
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn command(&self, job: &JobDescriptor) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args)
            .args(job.to_args())
            .arg(EMIT_PROGRESS_FLAG)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

#[async_trait]
impl WorkerRunner for ProcessRunner {
    async fn run(&self, job: &JobDescriptor, sink: &dyn ProgressSink) -> Result<(), JobError> {
        let run_id = job.run_id().to_string();
        let mut child = self
            .command(job)
            .spawn()
            .map_err(|source| JobError::LaunchFailed {
                program: self.program.clone(),
                source,
            })?;
        info!(run_id = %run_id, kind = %job.kind(), pid = ?child.id(), "Worker started");

        let stdout_task = child.stdout.take().map(|stdout| {
            let run_id = run_id.clone();
            tokio::spawn(async move {
                read_lines(stdout, &run_id, "stdout", |lines| {
                    for line in lines {
                        info!(target: "topomap::worker::stdout", run_id = %run_id, "{}", line);
                    }
                })
                .await;
            })
        });

        let mut last_error: Option<String> = None;
        if let Some(stderr) = child.stderr.take() {
            read_lines(stderr, &run_id, "stderr", |lines| {
                apply_batch(&run_id, StatusBatch::from_lines(lines), sink, &mut last_error);
            })
            .await;
        }

        let status = child.wait().await?;
        if let Some(task) = stdout_task {
            let _ = task.await;
        }

        if status.success() {
            info!(run_id = %run_id, "Worker finished");
            return Ok(());
        }

        let message = last_error.unwrap_or_else(|| DEFAULT_JOB_ERROR.to_string());
        error!(run_id = %run_id, exit_code = ?status.code(), error = %message, "Worker failed");
        Err(JobError::JobFailed {
            exit_code: status.code(),
            message,
        })
    }
}

/// Read `stream` to EOF one chunk at a time, handing each chunk's complete
/// lines to `on_lines`.
///
/// Invalid UTF-8 never ends the loop. After a read error the rest of the
/// stream is drained into a sink instead of closing the pipe under the worker.
async fn read_lines<R>(
    mut stream: R,
    run_id: &str,
    name: &str,
    mut on_lines: impl FnMut(Vec<String>),
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    let mut lines = LineBuffer::new();
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let complete = lines.push(&buf[..n]);
                if !complete.is_empty() {
                    on_lines(complete);
                }
            }
            Err(e) => {
                warn!(
                    run_id = %run_id,
                    stream = name,
                    error = %e,
                    "Failed to read worker output, discarding the rest"
                );
                if let Err(e) = tokio::io::copy(&mut stream, &mut tokio::io::sink()).await {
                    debug!(run_id = %run_id, stream = name, error = %e, "Worker output drain ended");
                }
                break;
            }
        }
    }
    if let Some(tail) = lines.finish() {
        on_lines(vec![tail]);
    }
}

fn apply_batch(
    run_id: &str,
    batch: StatusBatch,
    sink: &dyn ProgressSink,
    last_error: &mut Option<String>,
) {
    for line in &batch.log_lines {
        error!(target: "topomap::worker::stderr", run_id = %run_id, "{}", line);
    }
    for update in batch.updates {
        match update {
            StatusUpdate::Progress(value) => {
                debug!(run_id = %run_id, progress = value, "Worker progress");
                sink.progress(value);
            }
            StatusUpdate::Message(text) => {
                debug!(run_id = %run_id, message = %text, "Worker message");
                sink.message(&text);
            }
            StatusUpdate::Error(text) => {
                sink.error(&text);
                *last_error = Some(text);
            }
        }
    }
}
