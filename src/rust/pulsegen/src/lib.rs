// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

pub mod channel;
pub mod compiler;
pub mod core_profile;
pub mod sequence;
pub mod word;

/// Number of hardware time quanta.
pub type Ticks = u64;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("unknown channel '{0}'")]
    InvalidChannel(String),

    #[error("sequence duration exceeds the representable repetition range")]
    SequenceTooLong,

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
