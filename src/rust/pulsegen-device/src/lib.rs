// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

pub mod controller;
pub mod link;
pub mod protocol;

pub use controller::PulseController;
pub use link::{DeviceLink, LinkError};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("device link failure: {0}")]
    Connection(#[from] link::LinkError),

    #[error("core identity mismatch: expected {expected:#06x}, read back {actual:#06x}")]
    Configuration { expected: u16, actual: u16 },

    #[error("channel registry defines {registry} channels but the core has {core}")]
    RegistryMismatch { registry: usize, core: usize },

    #[error("program length {0} is not a whole number of 1024-byte pages")]
    Alignment(usize),

    #[error("device state error: expected '{expected}', got '{actual}'")]
    DeviceState {
        expected: &'static str,
        actual: String,
    },

    #[error(transparent)]
    Compile(#[from] pulsegen::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
