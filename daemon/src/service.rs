//! Request handling and pushed messages over the shared monitor state

use crate::aggregator::GroupKey;
use crate::executor::{end_task, send_signal, Signal};
use crate::pipeline::{MonitorEvent, SharedState};
use crate::protocol::{Request, Response, StatusData};
use crate::resolver::WindowPids;
use crate::socket::{encode, RequestHandler};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

pub struct Service {
    state: SharedState,
    windows: WindowPids,
    end_task_grace: Duration,
}

impl Service {
    pub fn new(state: SharedState, windows: WindowPids, end_task_grace: Duration) -> Self {
        Self { state, windows, end_task_grace }
    }

    pub async fn status(&self) -> StatusData {
        self.state.read().await.status(self.windows.current().len())
    }

    async fn group_pids(&self, key: &GroupKey) -> Option<Vec<u32>> {
        let state = self.state.read().await;
        state.groups.get(key).map(|group| group.pids.iter().copied().collect())
    }
}

#[async_trait::async_trait]
impl RequestHandler for Service {
    async fn handle(&self, request: Request) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::ListGroups => {
                let state = self.state.read().await;
                let groups: Vec<_> = state.groups.values().collect();
                Response::data(serde_json::json!(groups))
            }

            Request::GetGroup { params } => {
                let key = GroupKey::new(params.category, params.name);
                let state = self.state.read().await;
                match state.groups.get(&key) {
                    Some(group) => Response::data(serde_json::json!(group)),
                    None => Response::error(format!("no group {}", key)),
                }
            }

            Request::GetGpu => Response::Gpu { data: self.state.read().await.gpus.clone() },

            Request::GetStatus => Response::Status { data: self.status().await },

            Request::KillProcess { params } => {
                let signal = match params.signal.parse::<Signal>() {
                    Ok(signal) => signal,
                    Err(e) => return Response::error(e.to_string()),
                };
                match send_signal(params.pid, signal) {
                    Ok(()) => {
                        info!(pid = params.pid, ?signal, "Signal sent");
                        Response::data(serde_json::json!({ "success": true }))
                    }
                    Err(e) => Response::error(format!("failed to signal {}: {}", params.pid, e)),
                }
            }

            Request::KillGroup { params } => {
                let key = GroupKey::new(params.category, params.name);
                // Lock is released before the grace wait
                let Some(pids) = self.group_pids(&key).await else {
                    return Response::error(format!("no group {}", key));
                };
                info!(group = %key, pids = pids.len(), force = params.force, "Ending group");
                let report = end_task(&pids, params.force, self.end_task_grace).await;
                Response::data(serde_json::json!(report))
            }
        }
    }
}

/// Forwards pipeline events to every client; a status line follows each process update.
pub async fn publish_events(
    mut events: mpsc::Receiver<MonitorEvent>,
    pushes: broadcast::Sender<String>,
    service: Arc<Service>,
) {
    while let Some(event) = events.recv().await {
        let mut lines = Vec::with_capacity(2);
        match event {
            MonitorEvent::Processes(update) => {
                lines.push(encode(&Response::Update { data: update }));
                lines.push(encode(&Response::Status { data: service.status().await }));
            }
            MonitorEvent::Gpu(gpus) => lines.push(encode(&Response::Gpu { data: gpus })),
        }
        for line in lines {
            // No subscribers is fine
            if pushes.send(line).is_err() {
                debug!("no clients for pushed message");
            }
        }
    }
}
