//! External encoder process management
//!
//! [`ProcessEncoder`] runs one transcoding process per track (ffmpeg by
//! default) and exposes its stdout as a sequence of chunks. At most one
//! process is alive at a time: starting a track stops the previous one.
//!
//! Termination is cooperative first (SIGTERM on unix), then forced after
//! the grace period. Every child is spawned with `kill_on_drop` so a
//! dropped encoder never leaks a process.

use std::{path::Path, process::Stdio, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::{
    process::{Child, ChildStdout, Command},
    sync::Mutex,
    time::timeout,
};
use tokio_util::{io::ReaderStream, sync::CancellationToken};
use tracing::{debug, info, warn};

use crate::{
    error::{Error, Result},
    track::TrackRef,
};

/// Upper bound for reaping a force-killed process
const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// Default ffmpeg invocation: real-time read, audio only, to stdout
pub const DEFAULT_ENCODER_ARGS: &[&str] = &[
    "-hide_banner",
    "-loglevel",
    "error",
    "-nostdin",
    "-re",
    "-i",
    "{input}",
    "-vn",
    "-f",
    "{format}",
    "-b:a",
    "{bitrate}k",
    "pipe:1",
];

/// Encoded output of one track.
#[async_trait]
pub trait ChunkSource: Send {
    /// Next chunk of encoded bytes, `None` at the clean end of the track.
    async fn next_chunk(&mut self) -> Result<Option<Bytes>>;
}

/// Turns a track into a stream of encoded chunks.
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Starts encoding `track`, stopping whatever was running before.
    async fn start(&mut self, track: &TrackRef) -> Result<Box<dyn ChunkSource>>;

    /// Stops the active encoding, if any. Returns once it is gone.
    async fn stop(&mut self);

    /// OS process id of the active encoding, when there is one
    fn current_pid(&self) -> Option<u32> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    pub program: String,
    /// Argument template; `{input}`, `{format}` and `{bitrate}` are substituted
    pub args: Vec<String>,
    pub format: String,
    pub bitrate_kbps: u32,
    pub chunk_size: usize,
    pub grace_period: Duration,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            args: DEFAULT_ENCODER_ARGS.iter().map(|s| s.to_string()).collect(),
            format: "mp3".to_string(),
            bitrate_kbps: 128,
            chunk_size: 4096,
            grace_period: Duration::from_millis(500),
        }
    }
}

impl EncoderSettings {
    /// Command line for `track` with the placeholders filled in
    pub fn render_args(&self, track: &TrackRef) -> Vec<String> {
        let bitrate = self.bitrate_kbps.to_string();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{input}", &track.id)
                    .replace("{format}", &self.format)
                    .replace("{bitrate}", &bitrate)
            })
            .collect()
    }
}

struct ActiveProcess {
    track: TrackRef,
    pid: Option<u32>,
    child: Arc<Mutex<Child>>,
    stop: CancellationToken,
}

/// Encoder backed by an external process writing to stdout.
pub struct ProcessEncoder {
    settings: EncoderSettings,
    active: Option<ActiveProcess>,
}

impl ProcessEncoder {
    pub fn new(settings: EncoderSettings) -> Self {
        Self {
            settings,
            active: None,
        }
    }

    pub fn settings(&self) -> &EncoderSettings {
        &self.settings
    }
}

#[async_trait]
impl Encoder for ProcessEncoder {
    async fn start(&mut self, track: &TrackRef) -> Result<Box<dyn ChunkSource>> {
        self.stop().await;

        if !track.is_remote() && !Path::new(&track.id).is_file() {
            return Err(Error::launch(&track.name, "file not found"));
        }

        let args = self.settings.render_args(track);
        debug!(program = %self.settings.program, ?args, "Spawning encoder");

        let mut child = Command::new(&self.settings.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::launch(&track.name, e))?;

        let Some(stdout) = child.stdout.take() else {
            let _ = child.start_kill();
            return Err(Error::launch(&track.name, "encoder stdout not available"));
        };

        let pid = child.id();
        info!(track = %track.name, pid = ?pid, "Encoder started");

        let child = Arc::new(Mutex::new(child));
        let stop = CancellationToken::new();
        self.active = Some(ActiveProcess {
            track: track.clone(),
            pid,
            child: child.clone(),
            stop: stop.clone(),
        });

        Ok(Box::new(ProcessOutput {
            track: track.clone(),
            stream: ReaderStream::with_capacity(stdout, self.settings.chunk_size.max(1)),
            child,
            stop,
            exit_timeout: self.settings.grace_period + KILL_REAP_TIMEOUT,
            finished: false,
        }))
    }

    async fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.stop.cancel();
        let mut child = active.child.lock().await;
        terminate(&mut child, self.settings.grace_period, &active.track).await;
    }

    fn current_pid(&self) -> Option<u32> {
        self.active.as_ref().and_then(|a| a.pid)
    }
}

/// Stdout of one encoder process.
struct ProcessOutput {
    track: TrackRef,
    stream: ReaderStream<ChildStdout>,
    child: Arc<Mutex<Child>>,
    stop: CancellationToken,
    exit_timeout: Duration,
    finished: bool,
}

#[async_trait]
impl ChunkSource for ProcessOutput {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if self.finished || self.stop.is_cancelled() {
            return Ok(None);
        }

        let item = tokio::select! {
            biased;
            _ = self.stop.cancelled() => None,
            item = self.stream.next() => Some(item),
        };

        match item {
            // Stopped: buffered output is dropped
            None => {
                self.finished = true;
                Ok(None)
            }
            Some(Some(Ok(bytes))) => Ok(Some(bytes)),
            Some(Some(Err(e))) => {
                self.finished = true;
                Err(Error::EncoderCrashed {
                    track: self.track.name.clone(),
                    status: format!("read error: {}", e),
                })
            }
            Some(None) => {
                self.finished = true;
                self.exit_status().await
            }
        }
    }
}

impl ProcessOutput {
    async fn exit_status(&self) -> Result<Option<Bytes>> {
        let mut child = self.child.lock().await;
        match timeout(self.exit_timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => {
                debug!(track = %self.track.name, "Encoder finished");
                Ok(None)
            }
            Ok(Ok(status)) => Err(Error::EncoderCrashed {
                track: self.track.name.clone(),
                status: status.to_string(),
            }),
            Ok(Err(e)) => Err(Error::EncoderCrashed {
                track: self.track.name.clone(),
                status: format!("wait failed: {}", e),
            }),
            Err(_) => {
                warn!(track = %self.track.name, "Encoder closed its output but did not exit");
                Ok(None)
            }
        }
    }
}

/// SIGTERM, grace period, then SIGKILL and reap.
async fn terminate(child: &mut Child, grace: Duration, track: &TrackRef) {
    if let Ok(Some(status)) = child.try_wait() {
        debug!(track = %track.name, %status, "Encoder already exited");
        return;
    }

    if request_termination(child) {
        if let Ok(Ok(status)) = timeout(grace, child.wait()).await {
            debug!(track = %track.name, %status, "Encoder stopped");
            return;
        }
    }

    if let Err(e) = child.start_kill() {
        warn!(track = %track.name, "Failed to kill encoder: {}", e);
    }
    match timeout(KILL_REAP_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => debug!(track = %track.name, %status, "Encoder killed"),
        Ok(Err(e)) => warn!(track = %track.name, "Failed to reap encoder: {}", e),
        Err(_) => warn!(track = %track.name, "Encoder did not exit after kill"),
    }
}

#[cfg(unix)]
fn request_termination(child: &Child) -> bool {
    let Some(pid) = child.id() else {
        return false;
    };
    // SAFETY: plain syscall on a child that has not been reaped yet.
    unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn request_termination(_child: &Child) -> bool {
    false
}
