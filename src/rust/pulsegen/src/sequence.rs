// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One entry of a pulse sequence: the named channels are held high for
/// `duration` nanoseconds while every other channel stays low.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulseStep {
    pub channels: BTreeSet<String>,
    /// Duration in nanoseconds. Steps shorter than half a time quantum
    /// vanish during quantization.
    pub duration: f64,
}

impl PulseStep {
    pub fn new<S: Into<String>>(channels: impl IntoIterator<Item = S>, duration: f64) -> Self {
        PulseStep {
            channels: channels.into_iter().map(Into::into).collect(),
            duration,
        }
    }

    /// A step with all channels low.
    pub fn low(duration: f64) -> Self {
        PulseStep {
            channels: BTreeSet::new(),
            duration,
        }
    }
}

/// Ordered pulse sequence. Whether the device replays it once or forever is
/// decided at compile time, not stored here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sequence {
    pub steps: Vec<PulseStep>,
}

impl Sequence {
    pub fn new(steps: Vec<PulseStep>) -> Self {
        Sequence { steps }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text).map_err(anyhow::Error::from)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self).map_err(anyhow::Error::from)?)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl From<Vec<PulseStep>> for Sequence {
    fn from(steps: Vec<PulseStep>) -> Self {
        Sequence { steps }
    }
}
