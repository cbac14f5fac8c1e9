// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Lowers a pulse sequence into the page-aligned instruction stream the
//! replay engine executes.
//!
//! Durations are quantized to hardware ticks, then folded into 128-bit
//! instruction words: short intervals accumulate inside one word's lanes,
//! long intervals become whole-word repetitions with the count carried in
//! the 31-bit repetition field.

use crate::channel::ChannelRegistry;
use crate::core_profile::CoreProfile;
use crate::sequence::Sequence;
use crate::word::{BinaryProgram, InstructionWord, MAX_REPLAYS_PER_WORD, REP_FIELD_MAX};
use crate::{Error, Result, Ticks};
use log::warn;

/// Convert a duration in nanoseconds into hardware ticks, rounding to the
/// nearest tick (half a quantum rounds away from zero).
pub fn duration_to_ticks(duration: f64, time_quantum: f64) -> Result<Ticks> {
    let ticks = (duration / time_quantum).round();
    if ticks <= 0.0 {
        return Ok(0);
    }
    if !ticks.is_finite() || ticks >= u64::MAX as f64 {
        return Err(Error::SequenceTooLong);
    }
    Ok(ticks as Ticks)
}

/// Bit accumulator for the word currently being filled, one lane per
/// channel, plus the tick cursor within the word.
struct LaneAccumulator {
    lanes: Vec<u8>,
    index: u32,
}

impl LaneAccumulator {
    fn new(channel_count: usize) -> Self {
        LaneAccumulator {
            lanes: vec![0; channel_count],
            index: 0,
        }
    }

    /// Set `count` tick bits starting at `start` on every active channel.
    fn set_bits(&mut self, start: u32, count: u32, active: &[bool]) {
        let mask = (((1u16 << count) - 1) << start) as u8;
        for (lane, on) in self.lanes.iter_mut().zip(active) {
            if *on {
                *lane |= mask;
            }
        }
    }

    fn take_word(&mut self) -> InstructionWord {
        let blank = vec![0; self.lanes.len()];
        self.index = 0;
        InstructionWord::new(0, std::mem::replace(&mut self.lanes, blank))
    }
}

/// Pattern with every active channel's lane fully high.
fn full_word_lanes(profile: &CoreProfile, active: &[bool]) -> Vec<u8> {
    active
        .iter()
        .map(|on| if *on { profile.lane_mask() } else { 0 })
        .collect()
}

/// Emit `repeats` whole-word replays of `active`, splitting across words
/// whenever the count exceeds what one repetition field can carry.
fn push_repeated(
    words: &mut Vec<InstructionWord>,
    profile: &CoreProfile,
    active: &[bool],
    repeats: u64,
) {
    let lanes = full_word_lanes(profile, active);
    let mut remaining = repeats;
    while remaining > MAX_REPLAYS_PER_WORD {
        words.push(InstructionWord::new(REP_FIELD_MAX, lanes.clone()));
        remaining -= MAX_REPLAYS_PER_WORD;
    }
    words.push(InstructionWord::new((remaining - 1) as u32, lanes));
}

/// Compile `sequence` into a page-aligned binary program.
///
/// With `looping` the device replays the image from offset 0 indefinitely;
/// otherwise the program ends in two park words that hold the final output
/// level. An empty sequence compiles to a single blank page.
pub fn compile(
    profile: &CoreProfile,
    registry: &ChannelRegistry,
    sequence: &Sequence,
    looping: bool,
) -> Result<BinaryProgram> {
    let width = profile.channel_width;
    let mut words: Vec<InstructionWord> = Vec::new();
    let mut acc = LaneAccumulator::new(profile.channel_count);
    let mut last_active: Option<Vec<bool>> = None;

    for step in &sequence.steps {
        let mut ticks = duration_to_ticks(step.duration, profile.time_quantum)?;
        if ticks == 0 {
            if step.duration > 0.0 {
                warn!(
                    "dropping {} ns step, shorter than half a {} ns tick",
                    step.duration, profile.time_quantum
                );
            }
            continue;
        }
        let active = registry.lane_flags(&step.channels)?;

        // Fits in the open word: accumulate and move on.
        if u64::from(acc.index) + ticks < u64::from(width) {
            acc.set_bits(acc.index, ticks as u32, &active);
            acc.index += ticks as u32;
            last_active = Some(active);
            continue;
        }

        // Close the open word with this step's pattern.
        if acc.index > 0 {
            let fill = width - acc.index;
            acc.set_bits(acc.index, fill, &active);
            ticks -= u64::from(fill);
            words.push(acc.take_word());
        }

        let repeats = ticks / u64::from(width);
        let leftover = (ticks % u64::from(width)) as u32;
        if repeats > 0 {
            push_repeated(&mut words, profile, &active, repeats);
        }
        if leftover > 0 {
            acc.set_bits(0, leftover, &active);
            acc.index = leftover;
        }
        last_active = Some(active);
    }

    let Some(last_active) = last_active else {
        // Nothing survived quantization; a blank page keeps the device on
        // a well-formed all-low program.
        return Ok(BinaryProgram::from_words(profile, &[]));
    };

    if looping {
        if acc.index > 0 {
            // Trailing ticks of the word stay low until the program wraps.
            words.push(acc.take_word());
        }
    } else {
        if acc.index > 0 {
            acc.set_bits(acc.index, width - acc.index, &last_active);
            words.push(acc.take_word());
        }
        // Two park words: the replay engine stops on the command flag and
        // holds the last pattern instead of running into stale SDRAM.
        let park = full_word_lanes(profile, &last_active);
        words.push(InstructionWord::park(park.clone()));
        words.push(InstructionWord::park(park));
    }

    Ok(BinaryProgram::from_words(profile, &words))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_profile::{CORE_12X8, CORE_24X4};
    use crate::sequence::PulseStep;
    use crate::word::PAGE_SIZE;

    fn registry_12x8() -> ChannelRegistry {
        ChannelRegistry::with_default_names(&CORE_12X8)
    }

    /// Expand decoded words into one boolean trace per channel, replays
    /// included. Only usable on programs with small repetition counts.
    fn traces(profile: &CoreProfile, program: &BinaryProgram, words_limit: usize) -> Vec<Vec<bool>> {
        let mut out = vec![Vec::new(); profile.channel_count];
        for word in program.decode(profile).unwrap().iter().take(words_limit) {
            for _ in 0..word.replays() {
                for tick in 0..profile.channel_width {
                    for (channel, lane) in word.lanes.iter().enumerate() {
                        out[channel].push(lane >> tick & 1 == 1);
                    }
                }
            }
        }
        out
    }

    #[test]
    fn test_duration_to_ticks_rounds_to_nearest() {
        assert_eq!(duration_to_ticks(6.0, 1.5).unwrap(), 4);
        assert_eq!(duration_to_ticks(6.7, 1.5).unwrap(), 4);
        assert_eq!(duration_to_ticks(6.8, 1.5).unwrap(), 5);
        assert_eq!(duration_to_ticks(0.0, 1.5).unwrap(), 0);
        assert_eq!(duration_to_ticks(-3.0, 1.5).unwrap(), 0);
    }

    #[test]
    fn test_duration_to_ticks_half_quantum_rounds_up() {
        // Exactly half a tick rounds away from zero on both cores.
        assert_eq!(duration_to_ticks(0.75, 1.5).unwrap(), 1);
        assert_eq!(duration_to_ticks(1.0, 2.0).unwrap(), 1);
        assert_eq!(duration_to_ticks(3.75, 1.5).unwrap(), 3);
    }

    #[test]
    fn test_duration_to_ticks_unrepresentable() {
        assert!(matches!(
            duration_to_ticks(1e300, 1.5),
            Err(Error::SequenceTooLong)
        ));
    }

    #[test]
    fn test_empty_sequence_is_one_blank_page() {
        for looping in [true, false] {
            let program =
                compile(&CORE_12X8, &registry_12x8(), &Sequence::default(), looping).unwrap();
            assert_eq!(program.len(), PAGE_SIZE);
            assert!(program.as_bytes().iter().all(|b| *b == 0));
        }
    }

    #[test]
    fn test_sub_quantum_steps_are_dropped() {
        let with_runt = Sequence::new(vec![
            PulseStep::new(["ch0"], 12.0),
            PulseStep::new(["ch1"], 0.4),
            PulseStep::low(12.0),
        ]);
        let without = Sequence::new(vec![PulseStep::new(["ch0"], 12.0), PulseStep::low(12.0)]);
        let registry = registry_12x8();
        assert_eq!(
            compile(&CORE_12X8, &registry, &with_runt, true).unwrap(),
            compile(&CORE_12X8, &registry, &without, true).unwrap()
        );
    }

    #[test]
    fn test_all_zero_duration_sequence_is_blank_page() {
        let sequence = Sequence::new(vec![PulseStep::new(["ch0"], 0.1)]);
        let program = compile(&CORE_12X8, &registry_12x8(), &sequence, false).unwrap();
        assert_eq!(program.len(), PAGE_SIZE);
        assert!(program.as_bytes().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_unknown_channel_fails() {
        let sequence = Sequence::new(vec![PulseStep::new(["ch99"], 6.0)]);
        assert!(matches!(
            compile(&CORE_12X8, &registry_12x8(), &sequence, true),
            Err(Error::InvalidChannel(name)) if name == "ch99"
        ));
    }

    #[test]
    fn test_program_length_is_positive_page_multiple() {
        let registry = registry_12x8();
        // 65 content words spill into a second page.
        let steps: Vec<PulseStep> = (0..65)
            .flat_map(|_| [PulseStep::new(["ch0"], 6.0), PulseStep::low(6.0)])
            .collect();
        for (sequence, pages) in [
            (Sequence::new(vec![PulseStep::new(["ch0"], 12.0)]), 1),
            (Sequence::new(steps), 2),
        ] {
            let program = compile(&CORE_12X8, &registry, &sequence, true).unwrap();
            assert_eq!(program.len() % PAGE_SIZE, 0);
            assert_eq!(program.page_count(), pages);
        }
    }

    #[test]
    fn test_steps_accumulate_within_one_word() {
        // 2 ticks of ch0, then 3 ticks of ch1, then low until the word
        // wraps: a single word with disjoint lane patterns.
        let sequence = Sequence::new(vec![
            PulseStep::new(["ch0"], 3.0),
            PulseStep::new(["ch1"], 4.5),
            PulseStep::low(4.5),
        ]);
        let program = compile(&CORE_12X8, &registry_12x8(), &sequence, true).unwrap();
        let words = program.decode(&CORE_12X8).unwrap();
        assert_eq!(words[0].repetition, 0);
        assert_eq!(words[0].lanes[0], 0b0000_0011);
        assert_eq!(words[0].lanes[1], 0b0001_1100);
        assert!(words[1..].iter().all(|w| w.lanes.iter().all(|l| *l == 0)));
    }

    #[test]
    fn test_single_channel_lane_isolation() {
        // ch5 high for 4 ticks, then low for 12: two words in loop mode.
        let sequence = Sequence::new(vec![PulseStep::new(["ch5"], 6.0), PulseStep::low(18.0)]);
        let program = compile(&CORE_12X8, &registry_12x8(), &sequence, true).unwrap();
        let traces = traces(&CORE_12X8, &program, 2);
        for (channel, trace) in traces.iter().enumerate() {
            assert_eq!(trace.len(), 16);
            for (tick, high) in trace.iter().enumerate() {
                let expected = channel == 5 && tick < 4;
                assert_eq!(*high, expected, "channel {channel} tick {tick}");
            }
        }
    }

    #[test]
    fn test_long_interval_becomes_repetition_word() {
        // 8 ticks of ch0 exactly fill one word; 80 ticks of low become a
        // tenfold repetition of the blank word.
        let sequence = Sequence::new(vec![PulseStep::new(["ch0"], 12.0), PulseStep::low(120.0)]);
        let program = compile(&CORE_12X8, &registry_12x8(), &sequence, true).unwrap();
        let words = program.decode(&CORE_12X8).unwrap();
        assert_eq!(words[0].repetition, 0);
        assert_eq!(words[0].lanes[0], 0xFF);
        assert_eq!(words[1].repetition, 9);
        assert!(words[1].lanes.iter().all(|l| *l == 0));
    }

    #[test]
    fn test_non_looping_tick_total_survives_decode() {
        // Word-aligned durations, so no partial-word padding: the decoded
        // replay total equals the quantized input total exactly.
        let sequence = Sequence::new(vec![
            PulseStep::new(["ch0"], 12.0),  // 8 ticks
            PulseStep::new(["ch1"], 24.0),  // 16 ticks
            PulseStep::low(96.0),           // 64 ticks
        ]);
        let program = compile(&CORE_12X8, &registry_12x8(), &sequence, false).unwrap();
        let words = program.decode(&CORE_12X8).unwrap();
        let content: Vec<_> = words.iter().filter(|w| !w.command).collect();
        let parks: Vec<_> = words.iter().filter(|w| w.command).collect();
        assert_eq!(parks.len(), 2);
        let ticks: u64 = content
            .iter()
            .take_while(|w| w.lanes.iter().any(|l| *l != 0) || w.repetition > 0)
            .map(|w| w.replays() * u64::from(CORE_12X8.channel_width))
            .sum();
        // Padding words past the program are all-zero with repetition 0 and
        // are excluded by the take_while above.
        assert_eq!(ticks, 8 + 16 + 64);
    }

    #[test]
    fn test_non_looping_pads_with_last_pattern_and_parks() {
        // 4 ticks of ch0: the partial word is padded with ch0 still high,
        // then two park words hold ch0 high.
        let sequence = Sequence::new(vec![PulseStep::new(["ch0"], 6.0)]);
        let program = compile(&CORE_12X8, &registry_12x8(), &sequence, false).unwrap();
        let words = program.decode(&CORE_12X8).unwrap();
        assert_eq!(words[0].lanes[0], 0xFF);
        assert!(!words[0].command);
        for park in &words[1..3] {
            assert!(park.command);
            assert_eq!(park.repetition, 0);
            assert_eq!(park.lanes[0], 0xFF);
            assert!(park.lanes[1..].iter().all(|l| *l == 0));
        }
    }

    #[test]
    fn test_looping_pads_partial_word_low() {
        let sequence = Sequence::new(vec![PulseStep::new(["ch0"], 6.0)]);
        let program = compile(&CORE_12X8, &registry_12x8(), &sequence, true).unwrap();
        let words = program.decode(&CORE_12X8).unwrap();
        assert_eq!(words[0].lanes[0], 0x0F);
        assert!(words.iter().all(|w| !w.command));
    }

    #[test]
    fn test_repetition_overflow_splits_exactly() {
        // More replays than one repetition field can carry: (2^31 + 3)
        // whole words split into one maximum word plus the remainder.
        let replays: u64 = (1 << 31) + 3;
        let ticks = replays * u64::from(CORE_12X8.channel_width);
        let duration = ticks as f64 * CORE_12X8.time_quantum;
        let sequence = Sequence::new(vec![PulseStep::new(["ch0"], duration)]);
        let program = compile(&CORE_12X8, &registry_12x8(), &sequence, true).unwrap();
        let words = program.decode(&CORE_12X8).unwrap();
        let content: Vec<_> = words
            .iter()
            .filter(|w| w.lanes.iter().any(|l| *l != 0))
            .collect();
        assert_eq!(content.len(), 2);
        assert_eq!(content[0].repetition, REP_FIELD_MAX);
        assert_eq!(content[1].repetition, 2);
        assert!(words.iter().all(|w| w.repetition <= REP_FIELD_MAX));
        let total: u64 = content.iter().map(|w| w.replays()).sum();
        assert_eq!(total, replays);
    }

    #[test]
    fn test_compilation_is_deterministic() {
        let sequence = Sequence::new(vec![
            PulseStep::new(["ch0"], 6.0),
            PulseStep::new(["ch1"], 6.0),
            PulseStep::low(1000.0),
        ]);
        let registry = registry_12x8();
        let first = compile(&CORE_12X8, &registry, &sequence, true).unwrap();
        let second = compile(&CORE_12X8, &registry, &sequence, true).unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn test_4bit_core_compilation() {
        let registry = ChannelRegistry::with_default_names(&CORE_24X4);
        // 4 ticks each at 2 ns: one full word per step.
        let sequence = Sequence::new(vec![
            PulseStep::new(["ch0"], 8.0),
            PulseStep::new(["ch1"], 8.0),
        ]);
        let program = compile(&CORE_24X4, &registry, &sequence, true).unwrap();
        let words = program.decode(&CORE_24X4).unwrap();
        assert_eq!(words[0].lanes[0], 0x0F);
        assert!(words[0].lanes[1..].iter().all(|l| *l == 0));
        assert_eq!(words[1].lanes[1], 0x0F);
        assert_eq!(words[1].lanes[0], 0x00);
    }
}
