//! Frame processing: aggregate, reconcile, publish

use crate::aggregator::{count_by_category, Aggregator, Category, GroupMap};
use crate::classifier::Classifier;
use crate::protocol::{ProcessUpdate, StatusData};
use crate::reconciler::Reconciler;
use crate::wire::{Frame, GpuSample, Sample};
use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    Processes(ProcessUpdate),
    Gpu(Vec<GpuSample>),
}

/// Latest published view, read by IPC handlers.
#[derive(Debug, Clone, Default)]
pub struct MonitorState {
    pub groups: Arc<GroupMap>,
    pub gpus: Vec<GpuSample>,
    pub process_count: usize,
    pub frames_seen: u64,
}

impl MonitorState {
    pub fn status(&self, window_owners: usize) -> StatusData {
        StatusData {
            process_count: self.process_count,
            app_count: count_by_category(&self.groups, Category::App),
            background_count: count_by_category(&self.groups, Category::Background),
            gpu_count: self.gpus.len(),
            frames_seen: self.frames_seen,
            window_owners,
        }
    }
}

pub type SharedState = Arc<RwLock<MonitorState>>;

// Classification may stat /proc; on a multi-threaded runtime the worker is
// handed off for the duration so other tasks keep running.
fn off_worker<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current().map(|h| h.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(f),
        _ => f(),
    }
}

pub struct Pipeline {
    classifier: Classifier,
    aggregator: Aggregator,
    reconciler: Reconciler,
    current: Arc<GroupMap>,
    state: SharedState,
}

impl Pipeline {
    pub fn new(classifier: Classifier, aggregator: Aggregator) -> Self {
        Self {
            classifier,
            aggregator,
            reconciler: Reconciler::new(),
            current: Arc::new(GroupMap::new()),
            state: SharedState::default(),
        }
    }

    pub fn state(&self) -> SharedState {
        Arc::clone(&self.state)
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn current(&self) -> &GroupMap {
        &self.current
    }

    /// Runs one frame through the stages without touching the shared state.
    pub fn apply(&mut self, frame: Frame) -> MonitorEvent {
        match frame {
            Frame::Process(samples) => MonitorEvent::Processes(self.apply_processes(&samples)),
            Frame::Gpu(gpus) => MonitorEvent::Gpu(gpus),
        }
    }

    fn apply_processes(&mut self, samples: &[Sample]) -> ProcessUpdate {
        let (aggregator, classifier) = (&mut self.aggregator, &mut self.classifier);
        let groups = off_worker(|| aggregator.aggregate(samples, classifier));
        let delta = self.reconciler.reconcile(&groups);
        debug!(
            added = delta.added.len(),
            updated = delta.updated.len(),
            removed = delta.removed.len(),
            "reconciled process frame"
        );
        let update = ProcessUpdate {
            app_count: count_by_category(&groups, Category::App),
            background_count: count_by_category(&groups, Category::Background),
            groups: groups.values().cloned().collect(),
            process_count: samples.len(),
            delta,
        };
        self.current = Arc::new(groups);
        update
    }

    pub async fn handle_frame(&mut self, frame: Frame) -> MonitorEvent {
        let event = self.apply(frame);
        let mut state = self.state.write().await;
        state.frames_seen += 1;
        match &event {
            MonitorEvent::Processes(update) => {
                state.groups = Arc::clone(&self.current);
                state.process_count = update.process_count;
            }
            MonitorEvent::Gpu(gpus) => state.gpus = gpus.clone(),
        }
        event
    }

    /// Consumes frames in arrival order until the source closes its channel.
    pub async fn run(mut self, mut frames: mpsc::Receiver<Frame>, events: mpsc::Sender<MonitorEvent>) {
        while let Some(frame) = frames.recv().await {
            let event = self.handle_frame(frame).await;
            if events.send(event).await.is_err() {
                debug!("event consumer gone, stopping pipeline");
                break;
            }
        }
        info!("Frame stream ended");
    }
}
