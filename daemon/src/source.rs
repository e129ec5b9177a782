//! Telemetry sampler process and its stdout reader

use crate::config::SourceConfig;
use crate::executor::{send_signal, Signal};
use crate::wire::{Frame, FrameReader};
use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Forwards decoded frames in arrival order until EOF, a read error,
/// `running` being cleared, or the receiver going away.
pub async fn read_frames<R>(reader: R, frames: mpsc::Sender<Frame>, running: Arc<AtomicBool>) -> u64
where
    R: AsyncBufRead + Unpin,
{
    let mut reader = FrameReader::new(reader);
    let mut sent = 0;
    loop {
        if !running.load(Ordering::Acquire) {
            debug!("reader stopping on request");
            break;
        }
        match reader.next_frame().await {
            Ok(Some(frame)) => {
                if frames.send(frame).await.is_err() {
                    break;
                }
                sent += 1;
            }
            Ok(None) => {
                info!("Telemetry stream closed");
                break;
            }
            Err(e) => {
                warn!("Telemetry read error: {}", e);
                break;
            }
        }
    }
    debug!(frames = sent, dropped = reader.decoder().dropped(), "reader finished");
    sent
}

pub struct TelemetrySource {
    child: Child,
    reader: JoinHandle<u64>,
    running: Arc<AtomicBool>,
    grace: Duration,
}

impl TelemetrySource {
    /// Starts the sampler and returns it with the receiving end of its frame queue.
    pub fn spawn(config: &SourceConfig, running: Arc<AtomicBool>) -> io::Result<(Self, mpsc::Receiver<Frame>)> {
        let mut child = Command::new(&config.command)
            .args(&config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "sampler stdout not captured"))?;
        info!(pid = ?child.id(), "Started telemetry source {}", config.command);

        let (tx, rx) = mpsc::channel(config.frame_queue.max(1));
        let reader = tokio::spawn(read_frames(BufReader::new(stdout), tx, Arc::clone(&running)));

        Ok((Self { child, reader, running, grace: config.shutdown_grace() }, rx))
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// SIGTERM, then SIGKILL if the sampler is still alive after the grace period.
    pub async fn shutdown(mut self) -> io::Result<()> {
        self.running.store(false, Ordering::Release);

        if let Some(pid) = self.child.id() {
            if let Err(e) = send_signal(pid, Signal::Term) {
                debug!(pid, "SIGTERM failed: {}", e);
            }
            match tokio::time::timeout(self.grace, self.child.wait()).await {
                Ok(status) => info!("Telemetry source exited: {}", status?),
                Err(_) => {
                    warn!(pid, "Telemetry source ignored SIGTERM, killing");
                    self.child.kill().await?;
                }
            }
        }

        // stdout is closed now, so the reader sees EOF
        match tokio::time::timeout(self.grace, &mut self.reader).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!("reader task failed: {}", e),
            Err(_) => self.reader.abort(),
        }
        Ok(())
    }
}
