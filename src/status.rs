//! Channel/mode status tracking and re-synchronization (spec §4.4).
//!
//! [`MidiStatus`] is a snapshot of observable device state: tempo, time and
//! key signature, and per-port/per-channel program/controller/key state.
//! [`StatusProcessor::process`] keeps it current as messages are played
//! (real or emulated during a seek); [`report_status`] re-derives a message
//! sequence that would reproduce the snapshot on a freshly reset device.

use crate::emitter::{EventEmitter, KeySignatureChanged, TempoChanged, TimeSignatureChanged};
use crate::message::{MidiMessage, OwnedMessage};
use crate::tempo::Tempo;

pub const NUM_PORTS: usize = 16;
pub const NUM_CHANNELS: usize = 16;
pub const NUM_CONTROLLERS: usize = 120;
pub const NUM_KEYS: usize = 128;

/// Per-channel channel-voice state: program, aftertouch, pitch bend, and a
/// raw 120-entry controller value map (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelVoiceStatus {
    pub program: Option<u8>,
    pub aftertouch: Option<u8>,
    pub pitch_bend: Option<i16>,
    pub controllers: [Option<u8>; NUM_CONTROLLERS],
}

impl Default for ChannelVoiceStatus {
    fn default() -> Self {
        ChannelVoiceStatus {
            program: None,
            aftertouch: None,
            pitch_bend: None,
            controllers: [None; NUM_CONTROLLERS],
        }
    }
}

/// One key's on/off state, velocity, and polyphonic (per-key) pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyState {
    pub on: bool,
    pub velocity: u8,
    pub pressure: u8,
}

/// A snapshot of observable MIDI state across 16 ports × 16 channels.
#[derive(Debug, Clone)]
pub struct MidiStatus {
    pub tempo: Tempo,
    pub numerator: u8,
    /// The raw time-signature denominator exponent (`2.pow(x)` gives the
    /// displayed denominator), matching the `den_raw` naming of spec §6's
    /// `time_signature_changed` event.
    pub denominator_raw: u8,
    pub sharps_flats: i8,
    pub minor: bool,
    channels: Box<[[ChannelVoiceStatus; NUM_CHANNELS]; NUM_PORTS]>,
    keys: Box<[[[KeyState; NUM_KEYS]; NUM_CHANNELS]; NUM_PORTS]>,
}

impl Default for MidiStatus {
    fn default() -> Self {
        MidiStatus::new()
    }
}

impl MidiStatus {
    pub fn new() -> Self {
        MidiStatus {
            tempo: Tempo::default(),
            numerator: 4,
            denominator_raw: 2,
            sharps_flats: 0,
            minor: false,
            channels: Box::new([[ChannelVoiceStatus::default(); NUM_CHANNELS]; NUM_PORTS]),
            keys: Box::new([[[KeyState::default(); NUM_KEYS]; NUM_CHANNELS]; NUM_PORTS]),
        }
    }

    pub fn channel(&self, port: u8, channel: u8) -> Option<&ChannelVoiceStatus> {
        let (p, c) = indices(port, channel)?;
        Some(&self.channels[p][c])
    }

    fn channel_mut(&mut self, port: u8, channel: u8) -> Option<&mut ChannelVoiceStatus> {
        let (p, c) = indices(port, channel)?;
        Some(&mut self.channels[p][c])
    }

    pub fn key(&self, port: u8, channel: u8, note: u8) -> Option<&KeyState> {
        let (p, c) = indices(port, channel)?;
        self.keys[p][c].get(note as usize)
    }

    fn key_mut(&mut self, port: u8, channel: u8, note: u8) -> Option<&mut KeyState> {
        let (p, c) = indices(port, channel)?;
        self.keys[p][c].get_mut(note as usize)
    }
}

/// Convert 1-based `(port, channel)` to 0-based array indices, or `None` if
/// out of the supported 16×16 range.
fn indices(port: u8, channel: u8) -> Option<(usize, usize)> {
    if !(1..=NUM_PORTS as u8).contains(&port) || !(1..=NUM_CHANNELS as u8).contains(&channel) {
        return None;
    }
    Some((port as usize - 1, channel as usize - 1))
}

/// Whether to track note on/off/pressure into the key matrix. Disabled by
/// default in contexts that only care about channel/controller state (the
/// key matrix is the bulkiest part of the snapshot).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusProcessor {
    process_note: bool,
}

impl StatusProcessor {
    pub fn new(process_note: bool) -> Self {
        StatusProcessor { process_note }
    }

    /// Apply one message to `status`, mutating it in place, then notify
    /// `emitter` (if given) of any high-level transition. Per spec §4.4,
    /// data is written before notification.
    pub fn process(
        &self,
        status: &mut MidiStatus,
        msg: &MidiMessage<'_>,
        port: u8,
        emitter: Option<&EventEmitter>,
    ) {
        if let Some(channel) = msg.channel() {
            self.process_channel_voice(status, msg, port, channel);
            return;
        }
        if msg.is_tempo() {
            if let Some(tempo) = msg.tempo() {
                status.tempo = tempo;
                if let Some(emitter) = emitter {
                    emitter.emit(TempoChanged { tempo });
                }
            }
        } else if msg.is_time_signature() {
            if let Some(sig) = msg.time_signature() {
                status.numerator = sig.numerator;
                status.denominator_raw = sig.denominator.trailing_zeros() as u8;
                if let Some(emitter) = emitter {
                    emitter.emit(TimeSignatureChanged {
                        numerator: status.numerator,
                        denominator_raw: status.denominator_raw,
                    });
                }
            }
        } else if msg.is_key_signature() {
            if let Some(sig) = msg.key_signature() {
                status.sharps_flats = sig.sharps_flats;
                status.minor = sig.minor;
                if let Some(emitter) = emitter {
                    emitter.emit(KeySignatureChanged {
                        sharps_flats: sig.sharps_flats,
                        minor: sig.minor,
                    });
                }
            }
        }
    }

    fn process_channel_voice(&self, status: &mut MidiStatus, msg: &MidiMessage<'_>, port: u8, channel: u8) {
        if msg.is_note_on() || msg.is_note_off() {
            if self.process_note {
                if let (Some(note), Some(velocity)) = (msg.note(), msg.velocity()) {
                    if let Some(key) = status.key_mut(port, channel + 1, note) {
                        key.on = msg.is_note_on();
                        key.velocity = velocity;
                    }
                }
            }
            return;
        }
        if msg.is_polyphonic_pressure() {
            if self.process_note {
                if let (Some(note), Some(pressure)) = (msg.note(), msg.pressure()) {
                    if let Some(key) = status.key_mut(port, channel + 1, note) {
                        key.pressure = pressure;
                    }
                }
            }
            return;
        }
        if let Some(cs) = status.channel_mut(port, channel + 1) {
            if msg.is_program_change() {
                cs.program = msg.program();
            } else if msg.is_channel_pressure() {
                cs.aftertouch = msg.pressure();
            } else if msg.is_pitch_bend() {
                cs.pitch_bend = msg.pitch_bend();
            } else if msg.is_controller() {
                if let (Some(cc), Some(value)) = (msg.controller(), msg.controller_value()) {
                    if let Some(slot) = cs.controllers.get_mut(cc as usize) {
                        *slot = Some(value);
                    }
                }
            }
        }
    }
}

/// Policy for the Program Change entry in [`report_status`] when no program
/// has ever been observed on a channel (original `reportMIDIStatus`'s
/// `programSetting` parameter, spec.md is silent on this edge case).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramFallback {
    /// Omit the Program Change entirely for that channel.
    Omit,
    /// Emit a Program Change to this patch number.
    Default(u8),
}

/// Combine a 14-bit value's MSB into the existing LSB (or vice versa);
/// mirrors the original's `MLSBtoU16`/`U16toMLSB` round trip but over a
/// single `u8` controller slot rather than a combined `u16`.
fn msb_lsb(value: Option<u8>) -> u8 {
    value.unwrap_or(0)
}

/// Re-derive a deterministic message sequence that would reproduce `port`'s
/// observable state on a freshly reset device (spec §4.4): tempo, time
/// signature, then per channel balance/pan/expression/volume (MSB, LSB)
/// and program.
pub fn report_status(status: &MidiStatus, port: u8, program_fallback: ProgramFallback) -> Vec<OwnedMessage> {
    use crate::message::{
        CC_BALANCE, CC_BALANCE_LSB, CC_EXPRESSION, CC_EXPRESSION_LSB, CC_PAN, CC_PAN_LSB, CC_VOLUME,
        CC_VOLUME_LSB,
    };

    let mut out = Vec::new();
    out.push(OwnedMessage::tempo(status.tempo));
    out.push(OwnedMessage::time_signature(
        status.numerator,
        status.denominator_raw,
        24,
        8,
    ));

    for channel in 1..=NUM_CHANNELS as u8 {
        let Some(cs) = status.channel(port, channel) else {
            continue;
        };
        out.push(OwnedMessage::control_change(
            channel,
            CC_BALANCE,
            msb_lsb(cs.controllers[CC_BALANCE as usize]),
        ));
        out.push(OwnedMessage::control_change(
            channel,
            CC_BALANCE_LSB,
            msb_lsb(cs.controllers[CC_BALANCE_LSB as usize]),
        ));
        out.push(OwnedMessage::control_change(
            channel,
            CC_PAN,
            msb_lsb(cs.controllers[CC_PAN as usize]),
        ));
        out.push(OwnedMessage::control_change(
            channel,
            CC_PAN_LSB,
            msb_lsb(cs.controllers[CC_PAN_LSB as usize]),
        ));
        out.push(OwnedMessage::control_change(
            channel,
            CC_EXPRESSION,
            msb_lsb(cs.controllers[CC_EXPRESSION as usize]),
        ));
        out.push(OwnedMessage::control_change(
            channel,
            CC_EXPRESSION_LSB,
            msb_lsb(cs.controllers[CC_EXPRESSION_LSB as usize]),
        ));
        out.push(OwnedMessage::control_change(
            channel,
            CC_VOLUME,
            msb_lsb(cs.controllers[CC_VOLUME as usize]),
        ));
        out.push(OwnedMessage::control_change(
            channel,
            CC_VOLUME_LSB,
            msb_lsb(cs.controllers[CC_VOLUME_LSB as usize]),
        ));

        match (cs.program, program_fallback) {
            (Some(p), _) => out.push(OwnedMessage::program_change(channel, p)),
            (None, ProgramFallback::Default(p)) => out.push(OwnedMessage::program_change(channel, p)),
            (None, ProgramFallback::Omit) => {}
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::META_TEMPO;

    #[test]
    fn tempo_meta_updates_status_and_notifies() {
        let emitter = EventEmitter::new();
        let seen = std::sync::Arc::new(std::sync::Mutex::new(None));
        {
            let seen = std::sync::Arc::clone(&seen);
            emitter.add_handler::<TempoChanged, _>(move |ev| {
                *seen.lock().unwrap() = Some(ev.tempo);
            });
        }

        let mut status = MidiStatus::new();
        let processor = StatusProcessor::new(false);
        let msg = MidiMessage::Meta {
            meta_type: META_TEMPO,
            data: &[0x07, 0xA1, 0x20],
        };
        processor.process(&mut status, &msg, 1, Some(&emitter));

        assert_eq!(status.tempo.mspq(), 500_000);
        assert_eq!(seen.lock().unwrap().unwrap().mspq(), 500_000);
    }

    #[test]
    fn program_change_is_tracked_per_channel() {
        let mut status = MidiStatus::new();
        let processor = StatusProcessor::new(false);
        let msg = MidiMessage::ChannelVoice {
            status: 0xC2,
            data: &[5],
        };
        processor.process(&mut status, &msg, 1, None);
        assert_eq!(status.channel(1, 3).unwrap().program, Some(5));
    }

    #[test]
    fn note_on_tracked_into_key_matrix_when_enabled() {
        let mut status = MidiStatus::new();
        let processor = StatusProcessor::new(true);
        let msg = MidiMessage::ChannelVoice {
            status: 0x90,
            data: &[60, 100],
        };
        processor.process(&mut status, &msg, 1, None);
        let key = status.key(1, 1, 60).unwrap();
        assert!(key.on);
        assert_eq!(key.velocity, 100);
    }

    #[test]
    fn note_ignored_when_process_note_disabled() {
        let mut status = MidiStatus::new();
        let processor = StatusProcessor::new(false);
        let msg = MidiMessage::ChannelVoice {
            status: 0x90,
            data: &[60, 100],
        };
        processor.process(&mut status, &msg, 1, None);
        assert!(!status.key(1, 1, 60).unwrap().on);
    }

    #[test]
    fn report_status_includes_tempo_timesig_and_program() {
        let mut status = MidiStatus::new();
        let processor = StatusProcessor::new(false);
        processor.process(
            &mut status,
            &MidiMessage::ChannelVoice {
                status: 0xC0,
                data: &[12],
            },
            1,
            None,
        );

        let report = report_status(&status, 1, ProgramFallback::Omit);
        assert_eq!(report[0].as_bytes()[0], 0xFF);
        assert_eq!(report[0].as_bytes()[1], META_TEMPO);
        // channel 1 has an observed program; later channels fall back to Omit.
        let has_program_ch1 = report
            .iter()
            .any(|m| m.as_bytes().first() == Some(&0xC0) && m.as_bytes().get(1) == Some(&12));
        assert!(has_program_ch1);
    }

    #[test]
    fn report_status_program_fallback_default() {
        let status = MidiStatus::new();
        let report = report_status(&status, 1, ProgramFallback::Default(7));
        let programs: Vec<_> = report
            .iter()
            .filter(|m| m.as_bytes().first().copied().map(|b| b & 0xF0 == 0xC0).unwrap_or(false))
            .collect();
        assert_eq!(programs.len(), NUM_CHANNELS);
        assert_eq!(programs[0].as_bytes()[1], 7);
    }
}
