// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::path::Path;

/// Raw transport failure reported by a link implementation.
#[derive(thiserror::Error, Debug)]
#[error("{0}")]
pub struct LinkError(pub String);

impl LinkError {
    pub fn new(message: impl Into<String>) -> Self {
        LinkError(message.into())
    }
}

pub type LinkResult<T> = std::result::Result<T, LinkError>;

/// Low-level access to the FPGA front panel: latched wire registers,
/// one-shot triggers and the block pipe used for program upload.
///
/// Implementations wrap the vendor USB library and are constructed from a
/// device identifier outside this crate. The controller only talks to this
/// trait, so the whole protocol can be exercised against a software double.
///
/// Wire registers are latched: `set_wire_in` stages a masked value that
/// only reaches the device on `update_wire_ins`, and `get_wire_out` returns
/// the snapshot taken by the last `update_wire_outs`. Trigger-outs behave
/// the same way via `update_trigger_outs` / `is_triggered`.
pub trait DeviceLink {
    /// Open the device with the given identifier, e.g. a USB serial. An
    /// empty identifier selects the first device found.
    fn open(identifier: &str) -> LinkResult<Self>
    where
        Self: Sized;

    /// Program the PLL driving the replay clock. One-time setup.
    fn configure_clock(&mut self, vco: u16) -> LinkResult<()>;

    /// Flash the FPGA bitstream. One-time setup.
    fn configure_bitstream(&mut self, path: &Path) -> LinkResult<()>;

    fn set_wire_in(&mut self, addr: u16, value: u16, mask: u16) -> LinkResult<()>;

    fn update_wire_ins(&mut self) -> LinkResult<()>;

    fn update_wire_outs(&mut self) -> LinkResult<()>;

    fn get_wire_out(&mut self, addr: u16) -> LinkResult<u16>;

    /// Fire a one-shot trigger at `addr`, bit `bit`.
    fn activate_trigger_in(&mut self, addr: u16, bit: u8) -> LinkResult<()>;

    fn update_trigger_outs(&mut self) -> LinkResult<()>;

    /// Whether any of the masked trigger-out bits latched since the last
    /// `update_trigger_outs`.
    fn is_triggered(&mut self, addr: u16, mask: u16) -> LinkResult<bool>;

    /// Stream `data` to the pipe at `addr` in fixed `block_size` chunks;
    /// returns the number of bytes written.
    fn write_block_pipe(
        &mut self,
        addr: u16,
        block_size: usize,
        data: &[u8],
    ) -> LinkResult<usize>;
}
