// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Wire protocol of the replay core: command pulses, reported states and
//! the front-panel register map.

use std::fmt;
use std::time::Duration;

/// Command pulses accepted on [`TRIG_COMMAND`], keyed by bit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Run,
    Load,
    ResetRead,
    ResetSdram,
    ResetWrite,
    Return,
}

impl Command {
    pub const fn code(&self) -> u8 {
        match self {
            Command::Run => 0,
            Command::Load => 1,
            Command::ResetRead => 2,
            Command::ResetSdram => 3,
            Command::ResetWrite => 4,
            Command::Return => 5,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Command::Run => "RUN",
            Command::Load => "LOAD",
            Command::ResetRead => "RESET_READ",
            Command::ResetSdram => "RESET_SDRAM",
            Command::ResetWrite => "RESET_WRITE",
            Command::Return => "RETURN",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core state reported on [`EP_STATE`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceState {
    Idle,
    ResetRead,
    ResetSdram,
    ResetWrite,
    Load0,
    Load1,
    Load2,
    Read0,
    Read1,
    Read2,
}

impl DeviceState {
    pub const fn code(&self) -> u16 {
        match self {
            DeviceState::Idle => 0,
            DeviceState::ResetRead => 1,
            DeviceState::ResetSdram => 2,
            DeviceState::ResetWrite => 3,
            DeviceState::Load0 => 4,
            DeviceState::Load1 => 5,
            DeviceState::Load2 => 6,
            DeviceState::Read0 => 7,
            DeviceState::Read1 => 8,
            DeviceState::Read2 => 9,
        }
    }

    pub const fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(DeviceState::Idle),
            1 => Some(DeviceState::ResetRead),
            2 => Some(DeviceState::ResetSdram),
            3 => Some(DeviceState::ResetWrite),
            4 => Some(DeviceState::Load0),
            5 => Some(DeviceState::Load1),
            6 => Some(DeviceState::Load2),
            7 => Some(DeviceState::Read0),
            8 => Some(DeviceState::Read1),
            9 => Some(DeviceState::Read2),
            _ => None,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Idle => "IDLE",
            DeviceState::ResetRead => "RESET_READ",
            DeviceState::ResetSdram => "RESET_SDRAM",
            DeviceState::ResetWrite => "RESET_WRITE",
            DeviceState::Load0 => "LOAD_0",
            DeviceState::Load1 => "LOAD_1",
            DeviceState::Load2 => "LOAD_2",
            DeviceState::Read0 => "READ_0",
            DeviceState::Read1 => "READ_1",
            DeviceState::Read2 => "READ_2",
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire-in: control bits. Bit 0 *set* disables the instruction decoder,
/// bit 1 set opens the external trigger gate.
pub const EP_CONTROL: u16 = 0x00;
/// Wire-in: static output register, channels 0-15.
pub const EP_STATIC_LOW: u16 = 0x01;
/// Wire-in: static output register, channels 16-23 (24-channel core only).
pub const EP_STATIC_HIGH: u16 = 0x02;
/// Wire-out: `channel_count | channel_width << 8` identity readback.
pub const EP_IDENTITY: u16 = 0x20;
/// Wire-out: [`DeviceState`] code.
pub const EP_STATE: u16 = 0x21;
/// Trigger-in: [`Command`] pulses.
pub const TRIG_COMMAND: u16 = 0x40;
/// Trigger-out: sticky status flags.
pub const TRIG_FLAGS: u16 = 0x60;
/// Block pipe: program upload, one SDRAM page per block.
pub const PIPE_PROGRAM: u16 = 0x80;

pub const DECODER_DISABLE_MASK: u16 = 0x0001;
pub const TRIGGER_GATE_MASK: u16 = 0x0002;
/// Bit 1 of [`TRIG_FLAGS`]: replay ran out of loaded data before halt.
pub const UNDERFLOW_MASK: u16 = 0x0002;

/// Settling time after a commanded state transition; the next state
/// readback is unreliable before it elapses.
pub(crate) const SETTLE_COMMAND: Duration = Duration::from_millis(10);
/// Shorter settle between the write/read pointer resets.
pub(crate) const SETTLE_RESET: Duration = Duration::from_millis(1);
