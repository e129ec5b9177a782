//! Unix socket endpoint for the presentation layer: JSON lines both ways

use crate::protocol::{Request, Response};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

#[async_trait::async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: Request) -> Response;
}

/// Listening socket plus the fan-out channel for pushed messages.
///
/// The socket file is removed again when the server is dropped.
pub struct IpcServer {
    path: PathBuf,
    listener: UnixListener,
    pushes: broadcast::Sender<String>,
}

impl IpcServer {
    /// Binds `path`, replacing a stale socket file left by a previous run.
    pub async fn bind(path: &Path, capacity: usize) -> io::Result<Self> {
        match std::fs::remove_file(path) {
            Ok(()) => debug!("removed stale socket {:?}", path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let listener = UnixListener::bind(path)?;
        let (pushes, _) = broadcast::channel(capacity.max(1));
        info!("IPC listening on {:?}", path);
        Ok(Self { path: path.to_path_buf(), listener, pushes })
    }

    /// Per-user runtime location, `/run/user/<uid>/procwatch.sock`.
    pub fn default_path() -> PathBuf {
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/run/user/{}/procwatch.sock", uid))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sender for lines pushed to every connected client.
    pub fn pushes(&self) -> broadcast::Sender<String> {
        self.pushes.clone()
    }

    /// Accepts clients, one task each, until `shutdown` completes.
    pub async fn serve<H, F>(&self, handler: Arc<H>, shutdown: F)
    where
        H: RequestHandler + 'static,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let session = Session { handler: Arc::clone(&handler), pushes: self.pushes.subscribe() };
                        tokio::spawn(session.run(stream));
                    }
                    Err(e) => error!("accept failed: {}", e),
                },
                _ = &mut shutdown => break,
            }
        }
        debug!("IPC accept loop stopped");
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Serializes `response` as one JSON line.
pub fn encode(response: &Response) -> String {
    match serde_json::to_string(response) {
        Ok(json) => json + "\n",
        Err(e) => encode_error(&e.to_string()),
    }
}

fn encode_error(message: &str) -> String {
    let body = serde_json::json!({ "type": "response", "id": null, "data": { "error": message } });
    format!("{}\n", body)
}

/// Decodes one request line and dispatches it; malformed input gets an error reply.
pub async fn respond<H: RequestHandler + ?Sized>(handler: &H, line: &str) -> Response {
    match serde_json::from_str::<Request>(line) {
        Ok(request) => handler.handle(request).await,
        Err(e) => {
            warn!("rejecting request {:?}: {}", line, e);
            Response::error(format!("invalid request: {}", e))
        }
    }
}

async fn send_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    if !line.ends_with('\n') {
        writer.write_all(b"\n").await?;
    }
    writer.flush().await
}

struct Session<H> {
    handler: Arc<H>,
    pushes: broadcast::Receiver<String>,
}

impl<H: RequestHandler + 'static> Session<H> {
    async fn run(mut self, stream: UnixStream) {
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();
        debug!("client connected");

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let line = match line {
                        Ok(Some(line)) => line,
                        Ok(None) => break,
                        Err(e) => {
                            warn!("client read failed: {}", e);
                            break;
                        }
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    let reply = encode(&respond(self.handler.as_ref(), &line).await);
                    if let Err(e) = send_line(&mut writer, &reply).await {
                        warn!("client write failed: {}", e);
                        break;
                    }
                }
                pushed = self.pushes.recv() => match pushed {
                    Ok(message) => {
                        if let Err(e) = send_line(&mut writer, &message).await {
                            warn!("push to client failed: {}", e);
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!(skipped = n, "client lagging behind pushes");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!("client disconnected");
    }
}
