//! Live process/GPU monitor core: decodes the sampler stream, classifies and
//! groups processes, and publishes minimal per-frame deltas.

pub mod aggregator;
pub mod classifier;
pub mod config;
pub mod executor;
pub mod pipeline;
pub mod protocol;
pub mod reconciler;
pub mod resolver;
pub mod service;
pub mod socket;
pub mod source;
pub mod wire;
