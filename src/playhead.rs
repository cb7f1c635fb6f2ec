//! Track playhead: the per-track scheduling state machine (spec §4.5).
//!
//! [`TrackPlayhead`] owns one track's playback cursor: the current
//! tick-to-nanosecond conversion, the accumulated oversleep debt, and the
//! iterator over upcoming events. It is generic over the bound iterator type
//! `I` rather than over a `dyn Track`, so a [`crate::group::PlayheadGroup`]
//! of playheads sharing one track type never needs a trait object or an
//! allocation per event.

use std::time::Duration;

use crate::device::MidiDevice;
use crate::division::{division_to_duration, Division};
use crate::emitter::EventEmitter;
use crate::error::{ParseError, SchedulingError};
use crate::message::MidiMessage;
use crate::status::{MidiStatus, StatusProcessor};
use crate::tempo::Tempo;
use crate::timed::TimedMessage;

/// Sentinel returned by [`TrackPlayhead::tick`] once the track has reached
/// end of stream (original `ns::MAX`).
pub const EOF: Duration = Duration::MAX;

/// Lifecycle state (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayheadState {
    /// No track bound.
    Idle,
    /// Bound, positioned at the start or at a seek target, not advancing.
    Armed,
    /// The scheduler is actively driving this playhead.
    Ticking,
    /// The bound track's iterator is exhausted.
    Eof,
}

/// Whether a delivered message is realtime (forwarded to the device) or
/// emulated (replayed silently during [`TrackPlayhead::go_forward`], status
/// only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Realtime,
    Emulated,
}

/// User callback invoked for every message a playhead delivers (original
/// `Handler` template parameter to `track_playhead`). Replaces the source's
/// CRTP notifier mixin (REDESIGN FLAGS §9) with an explicit, object-safe
/// capability handed in by reference.
pub trait PlayheadHandler: Send + Sync {
    fn handle(&self, kind: MessageKind, message: &MidiMessage<'_>);
}

impl<F: Fn(MessageKind, &MidiMessage<'_>) + Send + Sync> PlayheadHandler for F {
    fn handle(&self, kind: MessageKind, message: &MidiMessage<'_>) {
        self(kind, message)
    }
}

/// A track whose events can be addressed by position, enabling
/// [`TrackPlayhead::go_rewind`]'s backward seek fast path. `SpanTrackIter`
/// (a forward-only decode-on-demand stream) does not implement this;
/// `OwnedTrackIter` does, since it already indexes a `Vec` it never
/// mutates. Mirrors the original `track_playhead::go_rewind`'s
/// `requires(!have_handler)` constraint: the trait bound on `go_rewind`
/// itself plays the role `requires bidirectional track` plays in the
/// source.
pub trait IndexedIter: Iterator {
    /// Move the cursor back by one and return the event now at it, or
    /// `None` if already at the first event.
    fn step_back(&mut self) -> Option<Self::Item>;
}

type TickItem<'a> = Result<TimedMessage<MidiMessage<'a>>, ParseError>;

/// Per-track playback cursor. `'a` is the lifetime of the bytes backing the
/// bound track's messages; `I` is the concrete iterator type produced by
/// that track (e.g. `SpanTrackIter<'a>` or `OwnedTrackIter<'a>`).
pub struct TrackPlayhead<'a, I> {
    name: String,
    state: PlayheadState,
    iter: Option<I>,
    current: Option<TimedMessage<MidiMessage<'a>>>,
    division: Division,
    tempo: Tempo,
    ticks_to_ns: Duration,
    sleep_remaining: Duration,
    playtime: Duration,
    compensation: Duration,
    tempo_change_aware: bool,
    device: Option<&'a dyn MidiDevice>,
    handler: Option<&'a dyn PlayheadHandler>,
    emitter: Option<&'a EventEmitter>,
    status: MidiStatus,
    status_processor: StatusProcessor,
}

impl<'a, I> TrackPlayhead<'a, I>
where
    I: Iterator<Item = TickItem<'a>>,
{
    /// A fresh, unbound playhead. `tempo_change_aware` mirrors the
    /// like-named `Config` option (spec §6): when set, a `0x51` tempo meta
    /// played through this playhead retimes it immediately.
    pub fn new(name: impl Into<String>, tempo_change_aware: bool) -> Self {
        TrackPlayhead {
            name: name.into(),
            state: PlayheadState::Idle,
            iter: None,
            current: None,
            division: Division::ppq(96),
            tempo: Tempo::default(),
            ticks_to_ns: Duration::ZERO,
            sleep_remaining: Duration::ZERO,
            playtime: Duration::ZERO,
            compensation: Duration::ZERO,
            tempo_change_aware,
            device: None,
            handler: None,
            emitter: None,
            status: MidiStatus::new(),
            status_processor: StatusProcessor::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> PlayheadState {
        self.state
    }

    pub fn playtime(&self) -> Duration {
        self.playtime
    }

    pub fn status(&self) -> &MidiStatus {
        &self.status
    }

    pub fn with_device(mut self, device: &'a dyn MidiDevice) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_handler(mut self, handler: &'a dyn PlayheadHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_emitter(mut self, emitter: &'a EventEmitter) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn with_status_processor(mut self, processor: StatusProcessor) -> Self {
        self.status_processor = processor;
        self
    }

    /// Bind a new track: resets playtime, tempo, compensation and status,
    /// then primes the cursor on the first event. Errors: none per spec
    /// §4.5 — an empty or immediately-erroring track just reaches `Eof` on
    /// the first [`Self::tick`].
    pub fn bind_track(&mut self, mut iter: I) -> Result<(), ParseError> {
        self.tempo = Tempo::default();
        self.playtime = Duration::ZERO;
        self.compensation = Duration::ZERO;
        self.sleep_remaining = Duration::ZERO;
        self.status = MidiStatus::new();
        self.retime();

        self.current = iter.next().transpose()?;
        self.sleep_remaining = self.delta_duration(self.current.as_ref());
        self.iter = Some(iter);
        self.state = if self.current.is_some() {
            PlayheadState::Armed
        } else {
            PlayheadState::Eof
        };
        Ok(())
    }

    pub fn set_division(&mut self, division: Division) {
        self.division = division;
        self.retime();
    }

    pub fn set_tempo(&mut self, tempo: Tempo) {
        // Testable property 4 (spec §8): setting the same tempo twice is a
        // no-op beyond the first call, since retiming is a pure function of
        // (division, tempo) and ticks_to_ns; idempotent by construction.
        self.tempo = tempo;
        self.retime();
    }

    fn delta_duration(&self, event: Option<&TimedMessage<MidiMessage<'a>>>) -> Duration {
        event
            .map(|tm| self.ticks_to_ns * tm.delta_ticks)
            .unwrap_or(Duration::ZERO)
    }

    /// Recompute `ticks_to_ns` from the current division/tempo and rescale
    /// `sleep_remaining` proportionally, preserving the in-flight delta's
    /// elapsed fraction (spec §4.5, testable property 5).
    fn retime(&mut self) {
        let new_ticks_to_ns = division_to_duration(self.division, self.tempo);
        if !self.ticks_to_ns.is_zero() && !self.sleep_remaining.is_zero() {
            let scaled = self.sleep_remaining.as_nanos() * new_ticks_to_ns.as_nanos() / self.ticks_to_ns.as_nanos();
            self.sleep_remaining = Duration::from_nanos(scaled.min(u128::from(u64::MAX)) as u64);
        }
        self.ticks_to_ns = new_ticks_to_ns;
    }

    /// Deliver `message` to the status processor, the handler, and — for
    /// realtime messages — the device. Per spec §4.4 status is written
    /// before any notification.
    fn deliver(&mut self, kind: MessageKind, message: MidiMessage<'a>) {
        self.status_processor.process(&mut self.status, &message, 1, self.emitter);
        if self.tempo_change_aware {
            if let Some(tempo) = message.tempo() {
                self.set_tempo(tempo);
            }
        }
        if let Some(handler) = self.handler {
            handler.handle(kind, &message);
        }
        if matches!(kind, MessageKind::Realtime) {
            if let Some(device) = self.device {
                if let Err(err) = device.send(&message.to_wire_bytes()) {
                    log::warn!("playhead {:?}: device send failed: {err}", self.name);
                    if let Some(emitter) = self.emitter {
                        emitter.emit(crate::emitter::SendFailed {
                            reason: err.to_string(),
                        });
                    }
                }
            }
        }
    }

    /// Advance the scheduler by `slept` wall-nanoseconds. Returns the
    /// duration to sleep before the next call, or [`EOF`] once the track is
    /// exhausted. Implements the eight-step contract of spec §4.5: steps 1-4
    /// (the Eof check, `playtime` accumulation, and oversleep-debt capture)
    /// run exactly once per call; steps 5-7 (deliver, advance, and the
    /// zero-delta/catch-up recheck) then loop on their own, without touching
    /// `playtime` or the caller's `slept` again, so a catch-up burst consumed
    /// out of `compensation` is never double-counted into `playtime`.
    pub fn tick(&mut self, mut slept: Duration) -> Result<Duration, ParseError> {
        if self.state == PlayheadState::Eof {
            return Ok(EOF);
        }
        self.state = PlayheadState::Ticking;

        self.playtime += slept;
        if slept > self.sleep_remaining {
            self.compensation += slept - self.sleep_remaining;
            slept = self.sleep_remaining;
        }
        self.sleep_remaining -= slept;
        if !self.sleep_remaining.is_zero() {
            return Ok(self.sleep_remaining);
        }

        loop {
            if let Some(tm) = self.current.take() {
                self.deliver(MessageKind::Realtime, tm.message);
            }

            let next = self
                .iter
                .as_mut()
                .expect("tick called on an unbound playhead")
                .next()
                .transpose()?;
            match next {
                None => {
                    self.current = None;
                    self.state = PlayheadState::Eof;
                    return Ok(EOF);
                }
                Some(tm) => {
                    self.sleep_remaining = self.ticks_to_ns * tm.delta_ticks;
                    self.current = Some(tm);
                }
            }

            if self.sleep_remaining <= self.compensation {
                self.compensation -= self.sleep_remaining;
                continue;
            }
            let taken = std::mem::take(&mut self.compensation);
            return Ok(self.sleep_remaining - taken);
        }
    }

    /// `target == playtime` is a no-op; `target > playtime` delegates to
    /// [`Self::go_forward`]; otherwise resets to the beginning and forwards
    /// — the generic fallback available to any bound track. Returns `false`
    /// if `target` is past the track's end.
    pub fn seek(&mut self, target: Duration, restart: impl FnOnce() -> I) -> bool {
        if self.state == PlayheadState::Idle {
            return false;
        }
        if target == self.playtime {
            return true;
        }
        if target > self.playtime {
            return self.go_forward(target);
        }
        let mut iter = restart();
        self.tempo = Tempo::default();
        self.retime();
        self.playtime = Duration::ZERO;
        self.compensation = Duration::ZERO;
        self.status = MidiStatus::new();
        self.current = match iter.next() {
            Some(Ok(tm)) => Some(tm),
            Some(Err(_)) => return false,
            None => None,
        };
        self.sleep_remaining = self.delta_duration(self.current.as_ref());
        self.iter = Some(iter);
        self.state = if self.current.is_some() {
            PlayheadState::Armed
        } else {
            PlayheadState::Eof
        };
        self.go_forward(target)
    }

    /// [`Self::seek`], raising [`SchedulingError::SeekOutOfRange`] instead
    /// of returning `false` (spec §7: both variants are required).
    pub fn seek_throw(&mut self, target: Duration, restart: impl FnOnce() -> I) -> Result<(), SchedulingError> {
        if self.seek(target, restart) {
            Ok(())
        } else {
            Err(SchedulingError::SeekOutOfRange)
        }
    }

    /// Replay events as `Emulated` (status updated, handler notified, device
    /// untouched) until `playtime + sleep_remaining >= target`, then clamp.
    /// Returns `false` if the track ends before reaching `target`.
    pub fn go_forward(&mut self, target: Duration) -> bool {
        if self.state == PlayheadState::Idle {
            return false;
        }
        loop {
            if self.playtime + self.sleep_remaining >= target {
                self.sleep_remaining = (self.playtime + self.sleep_remaining) - target;
                self.playtime = target;
                self.state = PlayheadState::Armed;
                return true;
            }
            self.playtime += self.sleep_remaining;
            self.sleep_remaining = Duration::ZERO;

            if let Some(tm) = self.current.take() {
                self.deliver(MessageKind::Emulated, tm.message);
            }

            let next = match self.iter.as_mut() {
                Some(iter) => iter.next(),
                None => None,
            };
            match next {
                Some(Ok(tm)) => {
                    self.sleep_remaining = self.ticks_to_ns * tm.delta_ticks;
                    self.current = Some(tm);
                }
                Some(Err(_)) | None => {
                    self.current = None;
                    self.state = PlayheadState::Eof;
                    return false;
                }
            }
        }
    }
}

impl<'a, I> TrackPlayhead<'a, I>
where
    I: IndexedIter<Item = TickItem<'a>>,
{
    /// Walk the cursor backwards without emitting anything, landing on
    /// `playtime == target`. Only available when the bound iterator
    /// supports [`IndexedIter`] and no handler is attached — the original's
    /// `requires(!have_handler)` constraint, since a handler expects to see
    /// every message in forward order and rewinding skips that.
    pub fn go_rewind(&mut self, target: Duration) -> bool {
        if self.handler.is_some() {
            return false;
        }
        if self.current.is_none() {
            let Some(iter) = self.iter.as_mut() else {
                return false;
            };
            match iter.step_back() {
                None => {
                    self.playtime = Duration::ZERO;
                    self.sleep_remaining = Duration::ZERO;
                    self.state = PlayheadState::Armed;
                    return true;
                }
                Some(Ok(tm)) => self.current = Some(tm),
                Some(Err(_)) => return false,
            }
            self.sleep_remaining = Duration::ZERO;
        }
        loop {
            let pending = self.delta_duration(self.current.as_ref());
            let last = self.playtime.saturating_sub(pending.saturating_sub(self.sleep_remaining));
            if last <= target {
                self.sleep_remaining = (self.playtime + self.sleep_remaining).saturating_sub(target);
                self.playtime = target;
                self.state = PlayheadState::Armed;
                return true;
            }
            self.playtime = last;
            self.sleep_remaining = Duration::ZERO;

            let Some(iter) = self.iter.as_mut() else {
                return false;
            };
            match iter.step_back() {
                None => {
                    self.playtime = Duration::ZERO;
                    self.sleep_remaining = Duration::ZERO;
                    self.state = PlayheadState::Armed;
                    return true;
                }
                Some(Ok(tm)) => self.current = Some(tm),
                Some(Err(_)) => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::{OwnedTrack, SpanTrack, Track};

    fn span_playhead<'a>(payload: &'a [u8], division: Division) -> TrackPlayhead<'a, crate::track::SpanTrackIter<'a>> {
        let track = SpanTrack::from_payload(payload);
        let mut ph = TrackPlayhead::new("t", true);
        ph.set_division(division);
        ph.bind_track(track.iter()).unwrap();
        ph
    }

    #[test]
    fn s1_vector_sleep_before_event() {
        // spec §8 S1: 96 PPQ, 500_000 MSPQ, delta 96 ticks. ticks_to_ns is
        // truncated to 5_208_333 ns (division.rs's own S1 test), so the
        // per-event sleep is that truncated rate times the delta, not a
        // re-derived exact 500_000_000.
        let payload = [0x60, 0x90, 0x3C, 0x64];
        let mut ph = span_playhead(&payload, Division::ppq(96));
        let expected = Duration::from_nanos(5_208_333) * 96;
        assert_eq!(ph.tick(Duration::ZERO).unwrap(), expected);
    }

    #[test]
    fn eof_after_end_of_track() {
        let payload = [0x00, 0xFF, 0x2F, 0x00];
        let mut ph = span_playhead(&payload, Division::ppq(96));
        assert_eq!(ph.tick(Duration::ZERO).unwrap(), Duration::ZERO);
        assert_eq!(ph.tick(Duration::ZERO).unwrap(), EOF);
        assert_eq!(ph.state(), PlayheadState::Eof);
    }

    #[test]
    fn oversleep_is_carried_as_compensation_debt() {
        // Two back-to-back zero-delta events after a 10-tick gap: an
        // oversleep on the gap should let the scheduler catch straight
        // through the zero-delta event without an extra sleep.
        let payload = [0x0A, 0x90, 0x3C, 0x64, 0x00, 0x80, 0x3C, 0x00, 0x00, 0xFF, 0x2F, 0x00];
        let mut ph = span_playhead(&payload, Division::ppq(96));
        let gap = ph.tick(Duration::ZERO).unwrap();
        // Oversleep past the gap by a good margin.
        let t = ph.tick(gap + Duration::from_millis(50)).unwrap();
        // The debt swallows the (zero-delta) note-off and end-of-track in
        // the same call, landing on Eof without the caller ever observing
        // an intermediate nonzero sleep for those zero-delta events.
        assert_eq!(t, EOF);
    }

    #[test]
    fn s6_vector_seek_across_tempo_change() {
        // spec §8 S6.
        let mut track = OwnedTrack::new();
        track.push_channel_voice(0, 0x90, &[60, 100]);
        track.push_meta(480, 0x51, &Tempo::from_mspq(250_000).to_be_bytes());
        track.push_channel_voice(0, 0x80, &[60, 0]);
        track.push_meta(10_000, 0x2F, &[]);

        let mut ph: TrackPlayhead<'_, crate::track::OwnedTrackIter<'_>> = TrackPlayhead::new("t", true);
        ph.set_division(Division::ppq(96));
        ph.bind_track(track.iter()).unwrap();

        assert!(ph.seek(Duration::from_nanos(1_500_000_000), || track.iter()));
        assert_eq!(ph.playtime(), Duration::from_nanos(1_500_000_000));
        assert_eq!(ph.status().tempo.mspq(), 250_000);
        let ns = ph.ticks_to_ns.as_nanos() as i64;
        assert!((ns - 2_604_166).abs() <= 1);
    }

    #[test]
    fn go_rewind_requires_owned_track_and_no_handler() {
        let mut track = OwnedTrack::new();
        track.push_channel_voice(0, 0x90, &[60, 100]);
        track.push_channel_voice(480, 0x80, &[60, 0]);
        track.push_meta(480, 0x2F, &[]);

        let mut ph: TrackPlayhead<'_, crate::track::OwnedTrackIter<'_>> = TrackPlayhead::new("t", false);
        ph.set_division(Division::ppq(96));
        ph.bind_track(track.iter()).unwrap();
        ph.go_forward(Duration::from_nanos(1_000_000_000));
        assert!(ph.go_rewind(Duration::ZERO));
        assert_eq!(ph.playtime(), Duration::ZERO);
    }

    #[test]
    fn go_rewind_from_eof_steps_back_onto_the_last_event() {
        let mut track = OwnedTrack::new();
        track.push_channel_voice(0, 0x90, &[60, 100]);
        track.push_channel_voice(480, 0x80, &[60, 0]);
        track.push_meta(0, 0x2F, &[]);

        let mut ph: TrackPlayhead<'_, crate::track::OwnedTrackIter<'_>> = TrackPlayhead::new("t", false);
        ph.set_division(Division::ppq(96));
        ph.bind_track(track.iter()).unwrap();

        while ph.tick(Duration::from_secs(10)).unwrap() != EOF {}
        assert_eq!(ph.state(), PlayheadState::Eof);
        assert!(ph.current.is_none());

        assert!(ph.go_rewind(Duration::ZERO));
        assert_eq!(ph.playtime(), Duration::ZERO);
        assert_eq!(ph.state(), PlayheadState::Armed);
    }

    #[test]
    fn retime_preserves_elapsed_fraction() {
        // spec §8 testable property 5.
        let payload = [0x60, 0x90, 0x3C, 0x64];
        let mut ph = span_playhead(&payload, Division::ppq(96));
        let half = ph.sleep_remaining / 2;
        ph.sleep_remaining -= half;
        let old_ns = ph.ticks_to_ns.as_nanos();
        ph.set_tempo(Tempo::from_mspq(250_000));
        let new_ns = ph.ticks_to_ns.as_nanos();
        let expected = (half.as_nanos() * new_ns / old_ns) as u64;
        assert!((ph.sleep_remaining.as_nanos() as i128 - expected as i128).abs() <= 1);
    }
}
