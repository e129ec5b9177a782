//! Window-ownership resolver: which pids own a visible window

use crate::config::ResolverConfig;
use regex::Regex;
use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("failed to run {tool}: {source}")]
    Spawn { tool: String, source: io::Error },
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("exited with status {0}")]
    Status(i32),
}

/// Shared handle to the latest complete window-owner set.
///
/// Writers replace the whole set; readers get an `Arc` to a snapshot that is
/// never modified afterwards.
#[derive(Debug, Clone, Default)]
pub struct WindowPids {
    inner: Arc<RwLock<Arc<HashSet<u32>>>>,
}

impl WindowPids {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Arc<HashSet<u32>> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&*guard)
    }

    pub fn replace(&self, pids: HashSet<u32>) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(pids);
    }
}

#[async_trait::async_trait]
pub trait WindowStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    async fn window_pids(&self) -> Result<HashSet<u32>, ResolveError>;
}

/// External program a strategy shells out to, with any leading arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tool {
    program: String,
    leading: Vec<String>,
}

impl Tool {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into(), leading: Vec::new() }
    }

    /// Runs `program leading.. args..`, e.g. `sh -c <script> xprop`.
    pub fn with_args(program: impl Into<String>, leading: Vec<String>) -> Self {
        Self { program: program.into(), leading }
    }

    /// Stdout of a successful run within `limit`; the child is killed on timeout.
    async fn run(&self, args: &[&str], limit: Duration) -> Result<String, ResolveError> {
        let mut command = Command::new(&self.program);
        command.args(&self.leading).args(args).kill_on_drop(true);
        let output = tokio::time::timeout(limit, command.output())
            .await
            .map_err(|_| ResolveError::Timeout(limit))?
            .map_err(|source| ResolveError::Spawn { tool: self.program.clone(), source })?;
        if !output.status.success() {
            return Err(ResolveError::Status(output.status.code().unwrap_or(-1)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// `wmctrl -lp`: one line per window, owning pid in the third column.
pub struct BulkWindowList {
    tool: Tool,
    timeout: Duration,
}

impl BulkWindowList {
    pub fn new(timeout: Duration) -> Self {
        Self::with_tool(Tool::new("wmctrl"), timeout)
    }

    pub fn with_tool(tool: Tool, timeout: Duration) -> Self {
        Self { tool, timeout }
    }
}

pub fn parse_window_list(output: &str) -> HashSet<u32> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().nth(2))
        .filter_map(|pid| pid.parse::<i64>().ok())
        .filter(|pid| *pid > 0)
        .filter_map(|pid| u32::try_from(pid).ok())
        .collect()
}

#[async_trait::async_trait]
impl WindowStrategy for BulkWindowList {
    fn name(&self) -> &'static str {
        "wmctrl"
    }

    async fn window_pids(&self) -> Result<HashSet<u32>, ResolveError> {
        let output = self.tool.run(&["-lp"], self.timeout).await?;
        Ok(parse_window_list(&output))
    }
}

static WINDOW_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"0x[0-9a-fA-F]+").expect("window id pattern"));
static WM_PID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"=\s*(\d+)").expect("wm pid pattern"));

/// `xprop`: list client windows from the root window, then ask each for its pid.
pub struct RootWindowQuery {
    tool: Tool,
    list_timeout: Duration,
    per_window_timeout: Duration,
    max_windows: usize,
}

impl RootWindowQuery {
    pub fn new(list_timeout: Duration, per_window_timeout: Duration, max_windows: usize) -> Self {
        Self::with_tool(Tool::new("xprop"), list_timeout, per_window_timeout, max_windows)
    }

    pub fn with_tool(
        tool: Tool,
        list_timeout: Duration,
        per_window_timeout: Duration,
        max_windows: usize,
    ) -> Self {
        Self { tool, list_timeout, per_window_timeout, max_windows }
    }
}

pub fn parse_client_list(output: &str) -> Vec<String> {
    WINDOW_ID.find_iter(output).map(|m| m.as_str().to_string()).collect()
}

pub fn parse_wm_pid(output: &str) -> Option<u32> {
    if !output.contains("_NET_WM_PID") {
        return None;
    }
    WM_PID.captures(output)?.get(1)?.as_str().parse().ok()
}

#[async_trait::async_trait]
impl WindowStrategy for RootWindowQuery {
    fn name(&self) -> &'static str {
        "xprop"
    }

    async fn window_pids(&self) -> Result<HashSet<u32>, ResolveError> {
        let output = self.tool.run(&["-root", "_NET_CLIENT_LIST"], self.list_timeout).await?;
        let mut pids = HashSet::new();
        for wid in parse_client_list(&output).iter().take(self.max_windows) {
            match self.tool.run(&["-id", wid.as_str(), "_NET_WM_PID"], self.per_window_timeout).await {
                Ok(reply) => pids.extend(parse_wm_pid(&reply)),
                Err(e) => debug!(window = %wid, "pid query failed: {}", e),
            }
        }
        Ok(pids)
    }
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct WindowResolver {
    strategies: Vec<Box<dyn WindowStrategy>>,
    pids: WindowPids,
    in_flight: AtomicBool,
}

impl WindowResolver {
    pub fn new(strategies: Vec<Box<dyn WindowStrategy>>) -> Self {
        Self { strategies, pids: WindowPids::new(), in_flight: AtomicBool::new(false) }
    }

    /// wmctrl first, xprop as the fallback.
    pub fn from_config(config: &ResolverConfig) -> Self {
        Self::new(vec![
            Box::new(BulkWindowList::new(config.bulk_timeout())),
            Box::new(RootWindowQuery::new(
                config.bulk_timeout(),
                config.per_window_timeout(),
                config.max_windows,
            )),
        ])
    }

    pub fn handle(&self) -> WindowPids {
        self.pids.clone()
    }

    pub fn current(&self) -> Arc<HashSet<u32>> {
        self.pids.current()
    }

    pub fn is_refreshing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Starts a background refresh and returns immediately.
    ///
    /// Returns `false` without doing anything if a refresh is already running.
    pub fn refresh(self: &Arc<Self>) -> bool {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return false;
        }
        let resolver = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = InFlight(&resolver.in_flight);
            resolver.resolve_and_store().await;
        });
        true
    }

    /// Runs one refresh inline. Returns `None` if another refresh holds the flag.
    pub async fn refresh_now(&self) -> Option<usize> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return None;
        }
        let _guard = InFlight(&self.in_flight);
        Some(self.resolve_and_store().await)
    }

    async fn resolve_and_store(&self) -> usize {
        let pids = self.resolve().await;
        let count = pids.len();
        // Total failure stores an empty set instead of keeping stale owners
        self.pids.replace(pids);
        count
    }

    async fn resolve(&self) -> HashSet<u32> {
        for strategy in &self.strategies {
            match strategy.window_pids().await {
                Ok(pids) => {
                    debug!(strategy = strategy.name(), windows = pids.len(), "window owners resolved");
                    return pids;
                }
                Err(e) => warn!(strategy = strategy.name(), "window owner query failed: {}", e),
            }
        }
        HashSet::new()
    }
}

/// Refreshes on a fixed schedule until `running` is cleared.
pub async fn run_periodic(resolver: Arc<WindowResolver>, every: Duration, running: Arc<AtomicBool>) {
    let mut interval = tokio::time::interval(every);
    info!("Window resolver refreshing every {:?}", every);
    loop {
        interval.tick().await;
        if !running.load(Ordering::Acquire) {
            break;
        }
        if !resolver.refresh() {
            debug!("previous window refresh still running, skipping");
        }
    }
}
