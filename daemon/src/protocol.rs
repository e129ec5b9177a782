//! IPC protocol definitions (JSON messages)

use crate::aggregator::{Category, ProcessGroup};
use crate::reconciler::Delta;
use crate::wire::GpuSample;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Request {
    Ping,
    ListGroups,
    GetGroup { params: GetGroupParams },
    GetGpu,
    GetStatus,
    KillProcess { params: KillProcessParams },
    KillGroup { params: KillGroupParams },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetGroupParams {
    pub category: Category,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillProcessParams {
    pub pid: u32,
    #[serde(default = "default_signal")]
    pub signal: String,
}

/// End task on a whole group; `force` skips straight to SIGKILL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillGroupParams {
    pub category: Category,
    pub name: String,
    #[serde(default)]
    pub force: bool,
}

fn default_signal() -> String {
    "TERM".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Pong,
    Response { id: Option<String>, data: serde_json::Value },
    Update { data: ProcessUpdate },
    Gpu { data: Vec<GpuSample> },
    Status { data: StatusData },
}

impl Response {
    pub fn data(data: serde_json::Value) -> Self {
        Response::Response { id: None, data }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::data(serde_json::json!({ "error": message.into() }))
    }
}

/// One reconciled process frame as seen by the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessUpdate {
    #[serde(flatten)]
    pub delta: Delta,
    pub groups: Vec<ProcessGroup>,
    pub process_count: usize,
    pub app_count: usize,
    pub background_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusData {
    pub process_count: usize,
    pub app_count: usize,
    pub background_count: usize,
    pub gpu_count: usize,
    pub frames_seen: u64,
    pub window_owners: usize,
}
