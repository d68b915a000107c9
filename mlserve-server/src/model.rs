//! Stand-in text model served behind the batch queue.
//!
//! Real deployments plug an inference backend in here; this one applies a
//! cheap per-item text transform so the batching path can be exercised end to
//! end without model weights.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use mlserve_core::BatchHandler;
use tracing::debug;

use crate::metrics;

/// Transform applied to every input of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformKind {
    #[default]
    Uppercase,
    Reverse,
    Identity,
}

impl TransformKind {
    pub fn apply(self, input: &str) -> String {
        match self {
            Self::Uppercase => input.to_uppercase(),
            Self::Reverse => input.chars().rev().collect(),
            Self::Identity => input.to_string(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uppercase => "uppercase",
            Self::Reverse => "reverse",
            Self::Identity => "identity",
        }
    }
}

impl fmt::Display for TransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransformKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "uppercase" | "upper" => Ok(Self::Uppercase),
            "reverse" => Ok(Self::Reverse),
            "identity" | "echo" => Ok(Self::Identity),
            other => Err(format!("unknown transform '{other}'")),
        }
    }
}

/// Batch handler running a [`TransformKind`] over each input
#[derive(Debug, Clone)]
pub struct TextModel {
    kind: TransformKind,
    /// Fixed per-batch delay standing in for device time
    latency: Duration,
}

impl TextModel {
    pub fn new(kind: TransformKind, latency: Duration) -> Self {
        Self { kind, latency }
    }

    pub fn kind(&self) -> TransformKind {
        self.kind
    }
}

#[async_trait]
impl BatchHandler<String, String> for TextModel {
    async fn handle(&self, batch: Vec<String>) -> anyhow::Result<Vec<String>> {
        let start = Instant::now();
        metrics::record_batch_size(batch.len());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let outputs: Vec<String> = batch.iter().map(|input| self.kind.apply(input)).collect();

        metrics::record_handler_duration(start.elapsed().as_secs_f64());
        debug!(batch_size = outputs.len(), transform = %self.kind, "Batch transformed");

        Ok(outputs)
    }
}
