// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Drives the load/run/halt command-state machine of one replay core.
//!
//! Every operation is a blocking round trip over the Device Link; the
//! controller owns the link, so all register and SDRAM access is serialized
//! by construction. Commanded transitions are followed by fixed settle
//! delays, and the reported state is verified before the protocol moves on.
//! A state mismatch aborts the operation with a typed error and leaves the
//! device in an unknown condition; recovery via [`PulseController::reset`]
//! is the caller's decision.

use crate::link::DeviceLink;
use crate::protocol::{
    Command, DECODER_DISABLE_MASK, DeviceState, EP_CONTROL, EP_IDENTITY, EP_STATE, EP_STATIC_HIGH,
    EP_STATIC_LOW, PIPE_PROGRAM, SETTLE_COMMAND, SETTLE_RESET, TRIG_COMMAND, TRIG_FLAGS,
    TRIGGER_GATE_MASK, UNDERFLOW_MASK,
};
use crate::{Error, Result};
use anyhow::anyhow;
use log::debug;
use pulsegen::channel::{ChannelRegistry, OutputSelection};
use pulsegen::compiler::compile;
use pulsegen::core_profile::{CoreProfile, CoreVariant};
use pulsegen::sequence::Sequence;
use pulsegen::word::PAGE_SIZE;
use std::path::Path;
use std::thread;

/// Bitstream file per core variant, looked up inside the directory handed
/// to [`PulseController::connect`].
const fn bitstream_file(variant: CoreVariant) -> &'static str {
    match variant {
        CoreVariant::C12x8 => "PulseGenerator12x8.bit",
        CoreVariant::C24x4 => "PulseGenerator24x4.bit",
    }
}

/// Synchronous driver for one pulse generator core.
pub struct PulseController<L: DeviceLink> {
    link: L,
    profile: &'static CoreProfile,
    registry: ChannelRegistry,
}

impl<L: DeviceLink> PulseController<L> {
    /// Open the device by identifier and bring it up via
    /// [`PulseController::connect`].
    pub fn open(
        identifier: &str,
        variant: CoreVariant,
        registry: ChannelRegistry,
        bitstream_dir: &Path,
    ) -> Result<Self> {
        Self::connect(L::open(identifier)?, variant, registry, bitstream_dir)
    }

    /// Bring a freshly opened link up to a known-idle device: program the
    /// replay clock, flash the variant's bitstream, verify the identity
    /// readback, force all outputs low and reset the core.
    pub fn connect(
        mut link: L,
        variant: CoreVariant,
        registry: ChannelRegistry,
        bitstream_dir: &Path,
    ) -> Result<Self> {
        let profile = variant.profile();
        if registry.channel_count() != profile.channel_count {
            return Err(Error::RegistryMismatch {
                registry: registry.channel_count(),
                core: profile.channel_count,
            });
        }
        link.configure_clock(profile.clock_vco)?;
        link.configure_bitstream(&bitstream_dir.join(bitstream_file(variant)))?;
        let mut controller = PulseController {
            link,
            profile,
            registry,
        };
        let identity = controller.identity()?;
        if identity != profile.identity_word() {
            return Err(Error::Configuration {
                expected: profile.identity_word(),
                actual: identity,
            });
        }
        controller.write_static_output(0)?;
        controller.reset()?;
        // Drain the sticky underflow flag left over from a previous run.
        controller.check_underflow()?;
        Ok(controller)
    }

    pub fn profile(&self) -> &'static CoreProfile {
        self.profile
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Identity word reported by the configured core.
    pub fn identity(&mut self) -> Result<u16> {
        self.link.update_wire_outs()?;
        Ok(self.link.get_wire_out(EP_IDENTITY)?)
    }

    /// Current state of the command-state machine.
    pub fn state(&mut self) -> Result<DeviceState> {
        let code = self.read_state_code()?;
        DeviceState::from_code(code)
            .ok_or_else(|| anyhow!("device reported undefined state code {code}").into())
    }

    fn read_state_code(&mut self) -> Result<u16> {
        self.link.update_wire_outs()?;
        Ok(self.link.get_wire_out(EP_STATE)?)
    }

    fn check_state(&mut self, wanted: DeviceState) -> Result<()> {
        let code = self.read_state_code()?;
        if code != wanted.code() {
            return Err(Error::DeviceState {
                expected: wanted.as_str(),
                actual: DeviceState::from_code(code)
                    .map_or_else(|| format!("UNKNOWN({code})"), |s| s.as_str().to_string()),
            });
        }
        Ok(())
    }

    fn pulse(&mut self, command: Command) -> Result<()> {
        debug!("command {command}");
        self.link.activate_trigger_in(TRIG_COMMAND, command.code())?;
        Ok(())
    }

    fn set_control(&mut self, value: u16, mask: u16) -> Result<()> {
        self.link.set_wire_in(EP_CONTROL, value, mask)?;
        self.link.update_wire_ins()?;
        Ok(())
    }

    fn enable_decoder(&mut self) -> Result<()> {
        self.set_control(0x0000, DECODER_DISABLE_MASK)
    }

    fn disable_decoder(&mut self) -> Result<()> {
        self.set_control(0x00FF, DECODER_DISABLE_MASK)
    }

    fn set_trigger_gate(&mut self, open: bool) -> Result<()> {
        self.set_control(if open { 0x00FF } else { 0x0000 }, TRIGGER_GATE_MASK)
    }

    /// Reset write/read pointers and the SDRAM controller. Memory contents
    /// are undefined afterwards.
    pub fn reset(&mut self) -> Result<()> {
        self.disable_decoder()?;
        self.pulse(Command::ResetWrite)?;
        thread::sleep(SETTLE_RESET);
        self.pulse(Command::ResetRead)?;
        thread::sleep(SETTLE_RESET);
        self.pulse(Command::ResetSdram)?;
        thread::sleep(SETTLE_COMMAND);
        Ok(())
    }

    /// Upload a page-aligned program image into device memory.
    ///
    /// The buffer length is validated before any link traffic. The load
    /// state is verified on entry and re-verified after the transfer, which
    /// must not perturb it; the device is returned to IDLE afterwards.
    pub fn load_pages(&mut self, buf: &[u8]) -> Result<()> {
        if buf.is_empty() || !buf.len().is_multiple_of(PAGE_SIZE) {
            return Err(Error::Alignment(buf.len()));
        }
        self.disable_decoder()?;
        self.pulse(Command::ResetWrite)?;
        thread::sleep(SETTLE_COMMAND);
        self.pulse(Command::Load)?;
        self.check_state(DeviceState::Load0)?;
        let written = self.link.write_block_pipe(PIPE_PROGRAM, PAGE_SIZE, buf)?;
        if written != buf.len() {
            return Err(anyhow!("short page transfer: {written} of {} bytes", buf.len()).into());
        }
        debug!("streamed {written} bytes into SDRAM");
        thread::sleep(SETTLE_COMMAND);
        self.check_state(DeviceState::Load0)?;
        self.pulse(Command::Return)?;
        self.check_state(DeviceState::Idle)?;
        Ok(())
    }

    /// Start replaying the loaded program, optionally gated on the
    /// external trigger input.
    pub fn run(&mut self, triggered: bool) -> Result<()> {
        self.halt()?;
        self.set_trigger_gate(triggered)?;
        self.pulse(Command::ResetRead)?;
        thread::sleep(SETTLE_COMMAND);
        self.pulse(Command::Run)?;
        thread::sleep(SETTLE_COMMAND);
        // Decoding is enabled only once the replay engine owns the output
        // path, so stale SDRAM never reaches the channels.
        self.enable_decoder()?;
        Ok(())
    }

    /// Stop any running replay and return the core to IDLE.
    pub fn halt(&mut self) -> Result<()> {
        self.disable_decoder()?;
        thread::sleep(SETTLE_COMMAND);
        self.pulse(Command::Return)?;
        self.check_state(DeviceState::Idle)
    }

    /// Compile and output a pulse sequence: halt, load, run. Compilation
    /// happens before any load traffic, so a failure never leaves the
    /// device mid-load.
    pub fn set_sequence(
        &mut self,
        sequence: &Sequence,
        looping: bool,
        triggered: bool,
    ) -> Result<()> {
        self.halt()?;
        let program = compile(self.profile, &self.registry, sequence, looping)?;
        debug!(
            "compiled {} steps into {} pages",
            sequence.len(),
            program.page_count()
        );
        self.load_pages(program.as_bytes())?;
        self.run(triggered)
    }

    /// Drive the outputs to a static level, bypassing the program path.
    pub fn set_continuous(&mut self, selection: &OutputSelection) -> Result<()> {
        let mask = selection.resolve(&self.registry)?;
        self.write_static_output(mask)?;
        self.halt()
    }

    fn write_static_output(&mut self, bits: u32) -> Result<()> {
        self.link.set_wire_in(EP_STATIC_LOW, bits as u16, 0xFFFF)?;
        if self.profile.channel_count > 16 {
            self.link
                .set_wire_in(EP_STATIC_HIGH, (bits >> 16) as u16, 0xFFFF)?;
        }
        self.link.update_wire_ins()?;
        Ok(())
    }

    /// Whether the replay engine ran out of loaded data before being
    /// halted. The flag is sticky and cleared by reading it.
    pub fn check_underflow(&mut self) -> Result<bool> {
        self.link.update_trigger_outs()?;
        Ok(self.link.is_triggered(TRIG_FLAGS, UNDERFLOW_MASK)?)
    }
}

#[cfg(test)]
impl<L: DeviceLink> PulseController<L> {
    /// Assemble a controller around an already-configured link, skipping
    /// the connect handshake.
    fn with_parts(link: L, variant: CoreVariant, registry: ChannelRegistry) -> Self {
        PulseController {
            link,
            profile: variant.profile(),
            registry,
        }
    }
}
