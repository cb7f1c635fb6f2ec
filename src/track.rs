//! Track event iteration (spec §3, §4.3).
//!
//! [`SpanTrack`] is the zero-copy representation: it borrows an `MTrk`
//! chunk (as returned by [`crate::header::parse_smf`]) and decodes events on
//! demand, maintaining running-status state. [`OwnedTrack`] is the owned
//! alternative used for synthesis and tests.

use crate::error::ParseError;
use crate::message::{expected_channel_data_len, expected_system_data_len, MidiMessage, META_END_OF_TRACK};
use crate::timed::TimedMessage;
use crate::vlq::{self, VlqError};

/// A track: anything forward-iterable over timed, borrowed MIDI messages.
///
/// Implemented by [`SpanTrack`] (zero-copy, decodes on demand) and
/// [`OwnedTrack`] (a plain `Vec`, used for synthesized or test tracks).
pub trait Track {
    type Iter<'a>: Iterator<Item = Result<TimedMessage<MidiMessage<'a>>, ParseError>>
    where
        Self: 'a;

    fn iter(&self) -> Self::Iter<'_>;
}

fn vlq_error_at(offset: usize, err: VlqError) -> ParseError {
    match err {
        VlqError::Overflow => ParseError::VlqOverflow { offset },
        VlqError::UnexpectedEof => ParseError::UnexpectedEof { offset },
    }
}

/// A zero-copy, forward-only iterator over one `MTrk` chunk's events.
pub struct SpanTrack<'a> {
    /// The chunk payload, i.e. the bytes after the 8-byte `MTrk`+length
    /// header.
    payload: &'a [u8],
}

impl<'a> SpanTrack<'a> {
    /// Wrap a full `MTrk` chunk (header included), as produced by
    /// [`crate::header::parse_smf`].
    pub fn new(chunk: &'a [u8]) -> Result<Self, ParseError> {
        if chunk.len() < 8 || &chunk[0..4] != b"MTrk" {
            return Err(ParseError::InvalidTrackHeader { offset: 0 });
        }
        let length = u32::from_be_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]) as usize;
        let payload = chunk
            .get(8..8 + length)
            .ok_or(ParseError::UnexpectedEof { offset: 8 })?;
        Ok(SpanTrack { payload })
    }

    /// Wrap a bare payload slice directly (no chunk header), e.g. for
    /// hand-built test fixtures.
    pub fn from_payload(payload: &'a [u8]) -> Self {
        SpanTrack { payload }
    }

    /// An iterator borrowing the chunk's own lifetime `'a` rather than
    /// `&self`. `payload` is a plain `&'a [u8]`, so this holds onto nothing
    /// from `self` and the returned `SpanTrackIter<'a>` can outlive the
    /// `SpanTrack` value it came from — needed by callers (e.g. a
    /// `PlayheadGroup` restart closure) that build a fresh `SpanTrack` as a
    /// temporary and need its iterator to live on regardless. Shadows
    /// `Track::iter` for direct calls; generic code bound by `Track` still
    /// goes through the trait method.
    pub fn iter(&self) -> SpanTrackIter<'a> {
        SpanTrackIter {
            bytes: self.payload,
            pos: 0,
            running_status: 0,
            saw_end_of_track: false,
            done: false,
        }
    }
}

impl<'a> Track for SpanTrack<'a> {
    type Iter<'b>
        = SpanTrackIter<'b>
    where
        Self: 'b;

    fn iter(&self) -> Self::Iter<'_> {
        SpanTrack::iter(self)
    }
}

/// Iterator state for [`SpanTrack`]. Holds the running-status byte and a
/// `done` latch so a decode error is reported exactly once.
pub struct SpanTrackIter<'a> {
    bytes: &'a [u8],
    pos: usize,
    running_status: u8,
    saw_end_of_track: bool,
    done: bool,
}

impl<'a> SpanTrackIter<'a> {
    fn take(&mut self, len: usize, offset: usize) -> Result<&'a [u8], ParseError> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or(ParseError::UnexpectedEof { offset })?;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or(ParseError::UnexpectedEof { offset })?;
        self.pos = end;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8, ParseError> {
        let offset = self.pos;
        let b = *self
            .bytes
            .get(self.pos)
            .ok_or(ParseError::UnexpectedEof { offset })?;
        self.pos += 1;
        Ok(b)
    }

    fn read_event(&mut self) -> Result<TimedMessage<MidiMessage<'a>>, ParseError> {
        let delta_offset = self.pos;
        let (delta, consumed) =
            vlq::decode(&self.bytes[self.pos..]).map_err(|e| vlq_error_at(delta_offset, e))?;
        self.pos += consumed;

        let status_offset = self.pos;
        let first = *self
            .bytes
            .get(self.pos)
            .ok_or(ParseError::UnexpectedEof {
                offset: status_offset,
            })?;

        let status = if first < 0x80 {
            if self.running_status == 0 {
                return Err(ParseError::RunningStatusWithoutStatus {
                    offset: status_offset,
                });
            }
            self.running_status
        } else {
            self.pos += 1;
            first
        };

        let message = match status {
            0x80..=0xEF => {
                self.running_status = status;
                let len = expected_channel_data_len(status & 0xF0);
                let data = self.take(len, status_offset)?;
                MidiMessage::ChannelVoice { status, data }
            }
            0xFF => {
                self.running_status = 0;
                let meta_type = self.take_u8()?;
                let len_offset = self.pos;
                let (len, len_consumed) = vlq::decode(&self.bytes[self.pos..])
                    .map_err(|e| vlq_error_at(len_offset, e))?;
                self.pos += len_consumed;
                let data = self.take(len as usize, len_offset)?;
                if meta_type == META_END_OF_TRACK {
                    self.saw_end_of_track = true;
                }
                MidiMessage::Meta { meta_type, data }
            }
            0xF0 => {
                self.running_status = 0;
                let len_offset = self.pos;
                let (declared_len, len_consumed) = vlq::decode(&self.bytes[self.pos..])
                    .map_err(|e| vlq_error_at(len_offset, e))?;
                self.pos += len_consumed;
                let start = self.pos;
                loop {
                    if self.take_u8()? == 0xF7 {
                        break;
                    }
                }
                let end = self.pos;
                let actual_len = (end - start) as u32;
                if actual_len != declared_len + 1 {
                    // Open Question (spec §9), resolved: trust the
                    // terminator over the declared length.
                    log::warn!(
                        "sysex length mismatch at offset {start}: declared {declared_len}, found terminator after {actual_len} bytes"
                    );
                }
                let raw = &self.bytes[start..end];
                MidiMessage::SysEx {
                    data: &raw[..raw.len() - 1],
                }
            }
            0xF7 => {
                self.running_status = 0;
                let len_offset = self.pos;
                let (len, len_consumed) = vlq::decode(&self.bytes[self.pos..])
                    .map_err(|e| vlq_error_at(len_offset, e))?;
                self.pos += len_consumed;
                let data = self.take(len as usize, len_offset)?;
                MidiMessage::SysExContinuation { data }
            }
            _ if status & 0xF0 == 0xF0 => {
                if !(0xF8..=0xFE).contains(&status) {
                    self.running_status = 0;
                }
                let len = expected_system_data_len(status).ok_or(ParseError::InvalidEventType {
                    offset: status_offset,
                    status,
                })?;
                let data = self.take(len, status_offset)?;
                MidiMessage::SystemCommon { status, data }
            }
            _ => {
                return Err(ParseError::InvalidEventType {
                    offset: status_offset,
                    status,
                })
            }
        };

        Ok(TimedMessage::new(delta, message))
    }
}

impl<'a> Iterator for SpanTrackIter<'a> {
    type Item = Result<TimedMessage<MidiMessage<'a>>, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.pos >= self.bytes.len() {
            if !self.done && !self.saw_end_of_track && !self.bytes.is_empty() {
                log::warn!("track ended without an end-of-track meta event");
            }
            self.done = true;
            return None;
        }
        match self.read_event() {
            Ok(event) => Some(Ok(event)),
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// An owned, `Vec`-backed track — the non-zero-copy representation
/// permitted by spec §3, used for synthesized tracks and fixtures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnedTrack {
    events: Vec<TimedMessage<Vec<u8>>>,
}

/// How an owned event's bytes should be interpreted; mirrors
/// [`MidiMessage`]'s shape without borrowing.
impl OwnedTrack {
    pub fn new() -> Self {
        OwnedTrack { events: Vec::new() }
    }

    pub fn push_channel_voice(&mut self, delta_ticks: u32, status: u8, data: &[u8]) {
        let mut bytes = Vec::with_capacity(1 + data.len());
        bytes.push(status);
        bytes.extend_from_slice(data);
        self.events.push(TimedMessage::new(delta_ticks, bytes));
    }

    pub fn push_meta(&mut self, delta_ticks: u32, meta_type: u8, data: &[u8]) {
        let mut bytes = Vec::with_capacity(2 + data.len());
        bytes.push(0xFF);
        bytes.push(meta_type);
        bytes.extend_from_slice(&vlq::encode(data.len() as u32).as_slice());
        bytes.extend_from_slice(data);
        self.events.push(TimedMessage::new(delta_ticks, bytes));
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Parse one already-assembled wire-format event (status byte, and for
/// meta events its type+VLQ-length prefix) back into a [`MidiMessage`].
fn reparse_owned(bytes: &[u8]) -> Result<TimedMessage<MidiMessage<'_>>, ParseError> {
    let mut iter = SpanTrackIter {
        bytes,
        pos: 0,
        running_status: 0,
        saw_end_of_track: false,
        done: false,
    };
    // The owned event's own bytes don't carry a delta prefix; prepend a
    // zero-length VLQ view by decoding directly from the status byte.
    iter.read_event_from(0)
}

impl<'a> SpanTrackIter<'a> {
    /// Decode one event whose status begins at `pos`, with an implicit
    /// delta of 0 (used to re-decode [`OwnedTrack`] events, which store
    /// their own delta separately).
    fn read_event_from(&mut self, pos: usize) -> Result<TimedMessage<MidiMessage<'a>>, ParseError> {
        self.pos = pos;
        let status_offset = self.pos;
        let status = self.take_u8()?;
        let message = match status {
            0x80..=0xEF => {
                let len = expected_channel_data_len(status & 0xF0);
                let data = self.take(len, status_offset)?;
                MidiMessage::ChannelVoice { status, data }
            }
            0xFF => {
                let meta_type = self.take_u8()?;
                let len_offset = self.pos;
                let (len, len_consumed) = vlq::decode(&self.bytes[self.pos..])
                    .map_err(|e| vlq_error_at(len_offset, e))?;
                self.pos += len_consumed;
                let data = self.take(len as usize, len_offset)?;
                MidiMessage::Meta { meta_type, data }
            }
            _ => {
                return Err(ParseError::InvalidEventType {
                    offset: status_offset,
                    status,
                })
            }
        };
        Ok(TimedMessage::new(0, message))
    }
}

impl Track for OwnedTrack {
    type Iter<'a> = OwnedTrackIter<'a>;

    fn iter(&self) -> Self::Iter<'_> {
        OwnedTrackIter {
            events: &self.events,
            index: 0,
        }
    }
}

pub struct OwnedTrackIter<'a> {
    events: &'a [TimedMessage<Vec<u8>>],
    index: usize,
}

impl<'a> Iterator for OwnedTrackIter<'a> {
    type Item = Result<TimedMessage<MidiMessage<'a>>, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        let event = self.events.get(self.index)?;
        self.index += 1;
        let parsed = reparse_owned(&event.message).map(|tm| TimedMessage {
            delta_ticks: event.delta_ticks,
            message: tm.message,
        });
        Some(parsed)
    }
}

impl<'a> crate::playhead::IndexedIter for OwnedTrackIter<'a> {
    /// Move the cursor back by one and return the event now at it, or
    /// `None` if already at the first event. Unlike [`SpanTrackIter`],
    /// `OwnedTrackIter` indexes a `Vec` it never mutates, so stepping
    /// backward is as cheap as stepping forward — this is what makes
    /// `OwnedTrack` the "bidirectional track" `TrackPlayhead::go_rewind`
    /// requires.
    fn step_back(&mut self) -> Option<Self::Item> {
        if self.index == 0 {
            return None;
        }
        self.index -= 1;
        let event = &self.events[self.index];
        Some(reparse_owned(&event.message).map(|tm| TimedMessage {
            delta_ticks: event.delta_ticks,
            message: tm.message,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s3_vector_tempo_then_end_of_track() {
        // spec §8 S3
        let payload = [0x00, 0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20, 0x00, 0xFF, 0x2F, 0x00];
        let track = SpanTrack::from_payload(&payload);
        let events: Vec<_> = track.iter().collect::<Result<_, _>>().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].delta_ticks, 0);
        assert!(events[0].message.is_tempo());
        assert_eq!(events[0].message.tempo().unwrap().mspq(), 500_000);
        assert_eq!(events[1].delta_ticks, 0);
        assert!(events[1].message.is_end_of_track());
    }

    #[test]
    fn s4_vector_running_status() {
        // spec §8 S4
        let payload = [0x00, 0x90, 0x3C, 0x64, 0x60, 0x3C, 0x00];
        let track = SpanTrack::from_payload(&payload);
        let events: Vec<_> = track.iter().collect::<Result<_, _>>().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].delta_ticks, 0);
        assert!(events[0].message.is_note_on());
        assert_eq!(events[0].message.note(), Some(60));
        assert_eq!(events[0].message.velocity(), Some(100));

        assert_eq!(events[1].delta_ticks, 96);
        assert!(events[1].message.is_note_off());
        assert_eq!(events[1].message.channel(), Some(0));
        assert_eq!(events[1].message.note(), Some(60));
    }

    #[test]
    fn running_status_without_prior_status_errors() {
        let payload = [0x00, 0x3C, 0x64];
        let track = SpanTrack::from_payload(&payload);
        let err = track.iter().next().unwrap().unwrap_err();
        assert!(matches!(
            err,
            ParseError::RunningStatusWithoutStatus { .. }
        ));
    }

    #[test]
    fn sysex_terminator_is_trusted_over_declared_length() {
        // declared length 1 but the terminator is two bytes in
        let payload = [0x00, 0xF0, 0x01, 0xAA, 0xF7];
        let track = SpanTrack::from_payload(&payload);
        let events: Vec<_> = track.iter().collect::<Result<_, _>>().unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].message.is_sys_ex());
    }

    #[test]
    fn owned_track_round_trips_through_reparse() {
        let mut track = OwnedTrack::new();
        track.push_channel_voice(0, 0x90, &[60, 100]);
        track.push_meta(10, 0x2F, &[]);
        assert_eq!(track.len(), 2);

        let events: Vec<_> = track.iter().collect::<Result<_, _>>().unwrap();
        assert_eq!(events[0].delta_ticks, 0);
        assert!(events[0].message.is_note_on());
        assert_eq!(events[1].delta_ticks, 10);
        assert!(events[1].message.is_end_of_track());
    }
}
