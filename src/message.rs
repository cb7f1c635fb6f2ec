//! MIDI message view and predicates (spec §3, §4.3, §6).
//!
//! Per REDESIGN FLAGS §9 ("Message as inheriting view... → a sum type or a
//! tagged view"), `MidiMessage` is a plain enum over borrowed byte slices
//! rather than a single opaque byte range. This sidesteps the source's
//! running-status ambiguity directly: a channel-voice event whose status
//! byte was omitted on the wire is represented with its (remembered) status
//! carried in the enum and its `data` slice borrowed straight from the
//! track bytes — no synthesis, no allocation, still zero-copy.

use crate::tempo::Tempo;

/// A parsed view over one MIDI message's bytes. Borrows from whatever
/// buffer the track's bytes live in; never owns or copies data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage<'a> {
    /// Channel voice message, `0x80..=0xEF`. `status` is the full status
    /// byte (high nibble + 0-based channel), reconstructed from running
    /// status when the wire omitted it. `data` is the 1 or 2 data bytes.
    ChannelVoice { status: u8, data: &'a [u8] },
    /// System common / system real-time, `0xF1..=0xFE` (excluding SysEx).
    SystemCommon { status: u8, data: &'a [u8] },
    /// Meta event (`0xFF <type> <len> <data>`). `data` excludes the type
    /// and length bytes.
    Meta { meta_type: u8, data: &'a [u8] },
    /// SysEx start (`0xF0 <len> <data> 0xF7`). `data` excludes the leading
    /// `0xF0` and, when present, the trailing `0xF7`.
    SysEx { data: &'a [u8] },
    /// SysEx continuation (`0xF7 <len> <data>`).
    SysExContinuation { data: &'a [u8] },
}

/// Time signature meta event payload (`0x58`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSignature {
    pub numerator: u8,
    /// The actual denominator, i.e. `2.pow(denominator_raw)` — a 4 here
    /// means a quarter note, matching common usage, not the raw exponent
    /// byte.
    pub denominator: u8,
    pub clocks_per_click: u8,
    pub thirtyseconds_per_quarter: u8,
}

/// Key signature meta event payload (`0x59`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySignature {
    /// Negative = flats, positive = sharps.
    pub sharps_flats: i8,
    pub minor: bool,
}

pub const META_TEXT_MIN: u8 = 0x01;
pub const META_TEXT_MAX: u8 = 0x07;
pub const META_CHANNEL_PREFIX: u8 = 0x20;
pub const META_END_OF_TRACK: u8 = 0x2F;
pub const META_TEMPO: u8 = 0x51;
pub const META_SMPTE_OFFSET: u8 = 0x54;
pub const META_TIME_SIGNATURE: u8 = 0x58;
pub const META_KEY_SIGNATURE: u8 = 0x59;
pub const META_SEQUENCER_SPECIFIC: u8 = 0x7F;

pub const CC_BALANCE: u8 = 8;
pub const CC_BALANCE_LSB: u8 = 40;
pub const CC_PAN: u8 = 10;
pub const CC_PAN_LSB: u8 = 42;
pub const CC_VOLUME: u8 = 7;
pub const CC_VOLUME_LSB: u8 = 39;
pub const CC_EXPRESSION: u8 = 11;
pub const CC_EXPRESSION_LSB: u8 = 43;
pub const CC_SUSTAIN: u8 = 64;
pub const CC_ALL_SOUND_OFF: u8 = 120;

impl<'a> MidiMessage<'a> {
    pub const fn is_channel_voice(&self) -> bool {
        matches!(self, MidiMessage::ChannelVoice { .. })
    }

    pub const fn is_meta(&self) -> bool {
        matches!(self, MidiMessage::Meta { .. })
    }

    pub const fn is_sys_ex(&self) -> bool {
        matches!(
            self,
            MidiMessage::SysEx { .. } | MidiMessage::SysExContinuation { .. }
        )
    }

    /// The 0-based MIDI channel (0..=15) of a channel-voice message.
    pub const fn channel(&self) -> Option<u8> {
        match self {
            MidiMessage::ChannelVoice { status, .. } => Some(status & 0x0F),
            _ => None,
        }
    }

    fn channel_voice_kind(&self) -> Option<(u8, &'a [u8])> {
        match self {
            MidiMessage::ChannelVoice { status, data } => Some((status & 0xF0, data)),
            _ => None,
        }
    }

    pub fn is_note_on(&self) -> bool {
        matches!(self.channel_voice_kind(), Some((0x90, data)) if data.get(1).copied().unwrap_or(0) != 0)
    }

    pub fn is_note_off(&self) -> bool {
        match self.channel_voice_kind() {
            Some((0x80, _)) => true,
            Some((0x90, data)) => data.get(1).copied().unwrap_or(1) == 0,
            _ => false,
        }
    }

    pub fn is_polyphonic_pressure(&self) -> bool {
        matches!(self.channel_voice_kind(), Some((0xA0, _)))
    }

    pub fn is_controller(&self) -> bool {
        matches!(self.channel_voice_kind(), Some((0xB0, _)))
    }

    pub fn is_program_change(&self) -> bool {
        matches!(self.channel_voice_kind(), Some((0xC0, _)))
    }

    pub fn is_channel_pressure(&self) -> bool {
        matches!(self.channel_voice_kind(), Some((0xD0, _)))
    }

    pub fn is_pitch_bend(&self) -> bool {
        matches!(self.channel_voice_kind(), Some((0xE0, _)))
    }

    pub fn is_tempo(&self) -> bool {
        matches!(self, MidiMessage::Meta { meta_type, .. } if *meta_type == META_TEMPO)
    }

    pub fn is_time_signature(&self) -> bool {
        matches!(self, MidiMessage::Meta { meta_type, .. } if *meta_type == META_TIME_SIGNATURE)
    }

    pub fn is_key_signature(&self) -> bool {
        matches!(self, MidiMessage::Meta { meta_type, .. } if *meta_type == META_KEY_SIGNATURE)
    }

    pub fn is_end_of_track(&self) -> bool {
        matches!(self, MidiMessage::Meta { meta_type, .. } if *meta_type == META_END_OF_TRACK)
    }

    pub fn is_text(&self) -> bool {
        matches!(self, MidiMessage::Meta { meta_type, .. } if (META_TEXT_MIN..=META_TEXT_MAX).contains(meta_type))
    }

    /// Note number for a note on/off or polyphonic pressure event.
    pub fn note(&self) -> Option<u8> {
        match self.channel_voice_kind() {
            Some((0x80 | 0x90 | 0xA0, data)) => data.first().copied(),
            _ => None,
        }
    }

    /// Velocity for a note on/off event.
    pub fn velocity(&self) -> Option<u8> {
        match self.channel_voice_kind() {
            Some((0x80 | 0x90, data)) => data.get(1).copied(),
            _ => None,
        }
    }

    /// The pressure value for a polyphonic or channel pressure message.
    pub fn pressure(&self) -> Option<u8> {
        match self.channel_voice_kind() {
            Some((0xA0, data)) => data.get(1).copied(),
            Some((0xD0, data)) => data.first().copied(),
            _ => None,
        }
    }

    pub fn controller(&self) -> Option<u8> {
        match self.channel_voice_kind() {
            Some((0xB0, data)) => data.first().copied(),
            _ => None,
        }
    }

    pub fn controller_value(&self) -> Option<u8> {
        match self.channel_voice_kind() {
            Some((0xB0, data)) => data.get(1).copied(),
            _ => None,
        }
    }

    pub fn program(&self) -> Option<u8> {
        match self.channel_voice_kind() {
            Some((0xC0, data)) => data.first().copied(),
            _ => None,
        }
    }

    /// Signed 14-bit pitch bend, centered at 0 (raw range 0..=16383, center
    /// 8192).
    pub fn pitch_bend(&self) -> Option<i16> {
        match self.channel_voice_kind() {
            Some((0xE0, data)) => {
                let lsb = *data.first()? as u16;
                let msb = *data.get(1)? as u16;
                let raw = (msb << 7) | lsb;
                Some(raw as i16 - 8192)
            }
            _ => None,
        }
    }

    /// 24-bit MSPQ tempo from a `0x51` meta event.
    pub fn tempo(&self) -> Option<Tempo> {
        match self {
            MidiMessage::Meta { meta_type, data } if *meta_type == META_TEMPO && data.len() >= 3 => {
                Some(Tempo::from_be_bytes([data[0], data[1], data[2]]))
            }
            _ => None,
        }
    }

    pub fn time_signature(&self) -> Option<TimeSignature> {
        match self {
            MidiMessage::Meta { meta_type, data }
                if *meta_type == META_TIME_SIGNATURE && data.len() >= 4 =>
            {
                Some(TimeSignature {
                    numerator: data[0],
                    denominator: 1u8.checked_shl(data[1] as u32).unwrap_or(0),
                    clocks_per_click: data[2],
                    thirtyseconds_per_quarter: data[3],
                })
            }
            _ => None,
        }
    }

    pub fn key_signature(&self) -> Option<KeySignature> {
        match self {
            MidiMessage::Meta { meta_type, data }
                if *meta_type == META_KEY_SIGNATURE && data.len() >= 2 =>
            {
                Some(KeySignature {
                    sharps_flats: data[0] as i8,
                    minor: data[1] != 0,
                })
            }
            _ => None,
        }
    }

    /// Reconstruct this message's full wire bytes, independent of whether
    /// the source used running status — the playhead needs this to forward
    /// a self-contained message to a [`crate::device::MidiDevice`], which
    /// cannot see the track's running-status history.
    pub fn to_wire_bytes(&self) -> Vec<u8> {
        match self {
            MidiMessage::ChannelVoice { status, data } | MidiMessage::SystemCommon { status, data } => {
                let mut out = Vec::with_capacity(1 + data.len());
                out.push(*status);
                out.extend_from_slice(data);
                out
            }
            MidiMessage::Meta { meta_type, data } => {
                let mut out = Vec::with_capacity(2 + data.len() + 4);
                out.push(0xFF);
                out.push(*meta_type);
                out.extend_from_slice(crate::vlq::encode(data.len() as u32).as_slice());
                out.extend_from_slice(data);
                out
            }
            MidiMessage::SysEx { data } => {
                let mut out = Vec::with_capacity(2 + data.len() + 4);
                out.push(0xF0);
                out.extend_from_slice(crate::vlq::encode((data.len() + 1) as u32).as_slice());
                out.extend_from_slice(data);
                out.push(0xF7);
                out
            }
            MidiMessage::SysExContinuation { data } => {
                let mut out = Vec::with_capacity(1 + data.len() + 4);
                out.push(0xF7);
                out.extend_from_slice(crate::vlq::encode(data.len() as u32).as_slice());
                out.extend_from_slice(data);
                out
            }
        }
    }
}

/// Number of data bytes following a channel-voice status byte, keyed by
/// the status high nibble (`0x80..=0xE0`). Program Change and Channel
/// Pressure take 1 data byte; all others take 2.
pub const fn expected_channel_data_len(status_high_nibble: u8) -> usize {
    match status_high_nibble {
        0xC0 | 0xD0 => 1,
        _ => 2,
    }
}

/// Number of data bytes following a system common/real-time status byte
/// (`0xF1..=0xFE`, excluding `0xF0`/`0xF7`), or `None` if `status` isn't
/// one of the known fixed-length system messages.
pub const fn expected_system_data_len(status: u8) -> Option<usize> {
    match status {
        0xF1 => Some(1), // MTC quarter frame
        0xF2 => Some(2), // song position pointer
        0xF3 => Some(1), // song select
        0xF4 | 0xF5 => Some(0),
        0xF6 => Some(0), // tune request
        0xF8..=0xFE => Some(0), // real-time
        _ => None,
    }
}

/// An owned, synthesizable MIDI wire message, used to re-emit state (status
/// re-sync, panic buttons) rather than to parse one.
///
/// Channels are 1-based (`1..=16`) in this constructor API to match
/// [`crate::status::MidiStatus`]'s indexing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedMessage {
    bytes: Vec<u8>,
}

impl OwnedMessage {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn note_on(channel: u8, note: u8, velocity: u8) -> Self {
        OwnedMessage {
            bytes: vec![0x90 | (channel - 1), note, velocity],
        }
    }

    pub fn note_off(channel: u8, note: u8, velocity: u8) -> Self {
        OwnedMessage {
            bytes: vec![0x80 | (channel - 1), note, velocity],
        }
    }

    pub fn control_change(channel: u8, controller: u8, value: u8) -> Self {
        OwnedMessage {
            bytes: vec![0xB0 | (channel - 1), controller, value],
        }
    }

    pub fn program_change(channel: u8, program: u8) -> Self {
        OwnedMessage {
            bytes: vec![0xC0 | (channel - 1), program],
        }
    }

    /// A `0x51` tempo meta event, wire-format complete (status, type,
    /// length prefix, payload).
    pub fn tempo(tempo: Tempo) -> Self {
        let mspq = tempo.to_be_bytes();
        OwnedMessage {
            bytes: vec![0xFF, META_TEMPO, 0x03, mspq[0], mspq[1], mspq[2]],
        }
    }

    /// A `0x58` time signature meta event. `denominator_raw` is the
    /// exponent byte (e.g. `2` for a quarter-note denominator), not the
    /// expanded `2^x` value.
    pub fn time_signature(
        numerator: u8,
        denominator_raw: u8,
        clocks_per_click: u8,
        thirtyseconds_per_quarter: u8,
    ) -> Self {
        OwnedMessage {
            bytes: vec![
                0xFF,
                META_TIME_SIGNATURE,
                0x04,
                numerator,
                denominator_raw,
                clocks_per_click,
                thirtyseconds_per_quarter,
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_on_and_off_predicates() {
        let on = MidiMessage::ChannelVoice {
            status: 0x90,
            data: &[60, 100],
        };
        assert!(on.is_note_on());
        assert!(!on.is_note_off());
        assert_eq!(on.note(), Some(60));
        assert_eq!(on.velocity(), Some(100));

        let velocity_zero = MidiMessage::ChannelVoice {
            status: 0x90,
            data: &[60, 0],
        };
        assert!(velocity_zero.is_note_off());
        assert!(!velocity_zero.is_note_on());

        let off = MidiMessage::ChannelVoice {
            status: 0x80,
            data: &[60, 0],
        };
        assert!(off.is_note_off());
    }

    #[test]
    fn pitch_bend_is_centered() {
        let msg = MidiMessage::ChannelVoice {
            status: 0xE3,
            data: &[0x00, 0x40], // center
        };
        assert_eq!(msg.channel(), Some(3));
        assert_eq!(msg.pitch_bend(), Some(0));
    }

    #[test]
    fn tempo_meta_decodes() {
        let msg = MidiMessage::Meta {
            meta_type: META_TEMPO,
            data: &[0x07, 0xA1, 0x20],
        };
        assert!(msg.is_tempo());
        assert_eq!(msg.tempo().unwrap().mspq(), 500_000);
    }

    #[test]
    fn time_signature_decodes_pow2_denominator() {
        let msg = MidiMessage::Meta {
            meta_type: META_TIME_SIGNATURE,
            data: &[4, 2, 24, 8],
        };
        let sig = msg.time_signature().unwrap();
        assert_eq!(sig.numerator, 4);
        assert_eq!(sig.denominator, 4); // 2^2
    }

    #[test]
    fn key_signature_decodes_sharps_and_mode() {
        let msg = MidiMessage::Meta {
            meta_type: META_KEY_SIGNATURE,
            data: &[(-2i8) as u8, 1],
        };
        let sig = msg.key_signature().unwrap();
        assert_eq!(sig.sharps_flats, -2);
        assert!(sig.minor);
    }

    #[test]
    fn channel_data_lengths_match_status_table() {
        assert_eq!(expected_channel_data_len(0x90), 2);
        assert_eq!(expected_channel_data_len(0xC0), 1);
        assert_eq!(expected_channel_data_len(0xD0), 1);
        assert_eq!(expected_channel_data_len(0xB0), 2);
    }
}
