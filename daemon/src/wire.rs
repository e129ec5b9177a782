//! Sampler wire format: `|`-delimited lines framed by sentinel lines

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

pub const PROCESS_END: &str = "END";
pub const GPU_START: &str = "GPU_START";
pub const GPU_END: &str = "GPU_END";
const GPU_TAG: &str = "GPU";

const SAMPLE_FIELDS: usize = 6;
const GPU_FIELDS: usize = 9;

#[derive(Debug, Error, PartialEq)]
pub enum LineError {
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },
    #[error("invalid {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },
    #[error("line is not tagged GPU")]
    MissingGpuTag,
}

/// One process's metrics for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub pid: u32,
    pub name: String,
    pub state: char,
    pub cpu_percent: f64,
    pub mem_kb: u64,
    pub thread_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuSample {
    pub index: u32,
    pub name: String,
    pub util_percent: u32,
    pub mem_used_mb: u64,
    pub mem_total_mb: u64,
    pub temp_c: i32,
    pub power_w: f64,
    pub power_limit_w: f64,
}

impl GpuSample {
    pub fn mem_percent(&self) -> f64 {
        if self.mem_total_mb == 0 {
            return 0.0;
        }
        self.mem_used_mb as f64 / self.mem_total_mb as f64 * 100.0
    }
}

/// A complete, sentinel-delimited batch of samples of one kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Process(Vec<Sample>),
    Gpu(Vec<GpuSample>),
}

fn field<T: FromStr>(name: &'static str, raw: &str) -> Result<T, LineError> {
    raw.trim().parse().map_err(|_| LineError::InvalidField {
        field: name,
        value: raw.to_string(),
    })
}

// nvidia-smi reports "[N/A]" for boards without a configurable limit
fn power_field(name: &'static str, raw: &str) -> Result<f64, LineError> {
    if raw.contains("N/A") {
        return Ok(0.0);
    }
    field(name, raw)
}

impl FromStr for Sample {
    type Err = LineError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = line.split('|').collect();
        if parts.len() != SAMPLE_FIELDS {
            return Err(LineError::FieldCount { expected: SAMPLE_FIELDS, found: parts.len() });
        }
        let state = parts[2].trim().chars().next().ok_or_else(|| LineError::InvalidField {
            field: "state",
            value: parts[2].to_string(),
        })?;
        Ok(Sample {
            pid: field("pid", parts[0])?,
            name: parts[1].to_string(),
            state,
            cpu_percent: field("cpu_percent", parts[3])?,
            mem_kb: field("mem_kb", parts[4])?,
            thread_count: field("thread_count", parts[5])?,
        })
    }
}

impl FromStr for GpuSample {
    type Err = LineError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = line.split('|').collect();
        if parts[0] != GPU_TAG {
            return Err(LineError::MissingGpuTag);
        }
        if parts.len() != GPU_FIELDS {
            return Err(LineError::FieldCount { expected: GPU_FIELDS, found: parts.len() });
        }
        Ok(GpuSample {
            index: field("index", parts[1])?,
            name: parts[2].trim().to_string(),
            util_percent: field("util_percent", parts[3])?,
            mem_used_mb: field("mem_used_mb", parts[4])?,
            mem_total_mb: field("mem_total_mb", parts[5])?,
            temp_c: field("temp_c", parts[6])?,
            power_w: power_field("power_w", parts[7])?,
            power_limit_w: power_field("power_limit_w", parts[8])?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecoderState {
    #[default]
    Normal,
    InGpuBlock,
}

/// Line-at-a-time frame assembler.
///
/// Malformed lines are dropped and never abort decoding. A frame is only
/// returned once its terminating sentinel has been seen.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    state: DecoderState,
    processes: Vec<Sample>,
    gpus: Vec<GpuSample>,
    dropped: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Number of lines rejected so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn push_line(&mut self, raw: &str) -> Option<Frame> {
        let line = raw.trim();
        if line.is_empty() {
            return None;
        }

        match self.state {
            DecoderState::Normal => match line {
                PROCESS_END => {
                    if self.processes.is_empty() {
                        return None;
                    }
                    Some(Frame::Process(std::mem::take(&mut self.processes)))
                }
                GPU_START => {
                    self.gpus.clear();
                    self.state = DecoderState::InGpuBlock;
                    None
                }
                _ => {
                    match line.parse::<Sample>() {
                        Ok(sample) => self.processes.push(sample),
                        Err(e) => self.drop_line(line, e),
                    }
                    None
                }
            },
            DecoderState::InGpuBlock => match line {
                GPU_END => {
                    self.state = DecoderState::Normal;
                    if self.gpus.is_empty() {
                        return None;
                    }
                    Some(Frame::Gpu(std::mem::take(&mut self.gpus)))
                }
                // A restarted block replaces the unfinished one
                GPU_START => {
                    if !self.gpus.is_empty() {
                        debug!(discarded = self.gpus.len(), "gpu block restarted");
                    }
                    self.gpus.clear();
                    None
                }
                _ => {
                    match line.parse::<GpuSample>() {
                        Ok(gpu) => self.gpus.push(gpu),
                        Err(e) => self.drop_line(line, e),
                    }
                    None
                }
            },
        }
    }

    fn drop_line(&mut self, line: &str, reason: LineError) {
        self.dropped += 1;
        debug!(state = ?self.state, %reason, "dropping line {:?}", line);
    }
}

/// Lazy frame sequence over a line-oriented reader.
pub struct FrameReader<R> {
    reader: R,
    decoder: FrameDecoder,
    buf: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, decoder: FrameDecoder::new(), buf: Vec::new() }
    }

    pub fn decoder(&self) -> &FrameDecoder {
        &self.decoder
    }

    /// Returns `Ok(None)` at end of stream; a partially received frame is discarded.
    pub async fn next_frame(&mut self) -> std::io::Result<Option<Frame>> {
        loop {
            self.buf.clear();
            if self.reader.read_until(b'\n', &mut self.buf).await? == 0 {
                return Ok(None);
            }
            // Invalid UTF-8 is decoded lossily so it fails validation instead of ending the stream
            let line = String::from_utf8_lossy(&self.buf);
            if let Some(frame) = self.decoder.push_line(&line) {
                return Ok(Some(frame));
            }
        }
    }
}
