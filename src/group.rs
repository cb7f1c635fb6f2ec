//! Playhead group scheduler (spec §4.6, §5): a single worker thread driving
//! every attached [`TrackPlayhead`] with one shared "slept" value.
//!
//! The worker is spawned into a [`std::thread::Scope`] the caller provides
//! (via [`PlayheadGroup::run`]), rather than with `thread::spawn`, so a
//! group can hold playheads that borrow a non-`'static` device, handler, or
//! memory-mapped track buffer — the common case for this crate, where
//! `TrackPlayhead<'a, I>` is generic over exactly such a lifetime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::emitter::{EndOfSong, EventEmitter, ModeChanged};
use crate::error::{ParseError, SchedulingError};
use crate::playhead::{TrackPlayhead, EOF};
use crate::timed::TimedMessage;
use crate::timing;

type TickItem<'a, M> = Result<TimedMessage<M>, ParseError>;

/// Stable, non-reused handle to a playhead attached to a group (original's
/// "non-owning pointer... use an index or a pinned handle", resolved as a
/// monotonic id so removal never invalidates another playhead's handle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlayheadId(u64);

struct Slot<'a, I> {
    id: PlayheadId,
    playhead: TrackPlayhead<'a, I>,
    offset: Duration,
    restart: Box<dyn Fn() -> I + Send + 'a>,
}

struct Inner<'a, I> {
    playheads: Vec<Slot<'a, I>>,
    last_slept: Duration,
    compensation: Duration,
    wakeup: bool,
    next_id: u64,
}

type RemovalHandler<'a, I> = Box<dyn FnMut(PlayheadId, TrackPlayhead<'a, I>) + Send + 'a>;

struct State<'a, I> {
    inner: Mutex<Inner<'a, I>>,
    condvar: Condvar,
    play: AtomicBool,
    stop: AtomicBool,
    max_sleep: Duration,
    emitter: Option<&'a EventEmitter>,
    removal_handler: Mutex<Option<RemovalHandler<'a, I>>>,
}

/// Owns zero or more [`TrackPlayhead`]s and a shared play/pause clock.
/// Public methods here are the "controller thread" half described in spec
/// §5; [`PlayheadGroup::run`] spawns the "worker thread" half.
pub struct PlayheadGroup<'a, I> {
    state: State<'a, I>,
}

impl<'a, I> PlayheadGroup<'a, I>
where
    I: Iterator<Item = TickItem<'a, crate::message::MidiMessage<'a>>> + Send + 'a,
{
    pub fn new(config: &Config) -> Self {
        PlayheadGroup {
            state: State {
                inner: Mutex::new(Inner {
                    playheads: Vec::new(),
                    last_slept: Duration::ZERO,
                    compensation: Duration::ZERO,
                    wakeup: false,
                    next_id: 0,
                }),
                condvar: Condvar::new(),
                play: AtomicBool::new(false),
                stop: AtomicBool::new(false),
                max_sleep: config.max_sleep(),
                emitter: None,
                removal_handler: Mutex::new(None),
            },
        }
    }

    pub fn with_emitter(mut self, emitter: &'a EventEmitter) -> Self {
        self.state.emitter = Some(emitter);
        self
    }

    /// Register the callback invoked, once per removed playhead, when its
    /// `tick()` returns EOF (spec §4.6 `PlayheadRemovalHandler`). The
    /// callback receives ownership of the playhead, so it can be rewound
    /// and handed back to [`Self::add_playhead`] (the "loop" use case).
    pub fn set_playhead_removal_handler(
        &self,
        handler: impl FnMut(PlayheadId, TrackPlayhead<'a, I>) + Send + 'a,
    ) {
        *self.state.removal_handler.lock().unwrap() = Some(Box::new(handler));
    }

    /// Attach a bound playhead, offset by `offset` in the group's shared
    /// timeline. `restart` rebuilds a fresh iterator from the track's start,
    /// used internally by [`Self::seek`] when it needs to play forward from
    /// the beginning rather than rewind.
    pub fn add_playhead(
        &self,
        playhead: TrackPlayhead<'a, I>,
        restart: impl Fn() -> I + Send + 'a,
        offset: Duration,
    ) -> PlayheadId {
        let mut inner = self.state.inner.lock().unwrap();
        let id = PlayheadId(inner.next_id);
        inner.next_id += 1;
        inner.playheads.push(Slot {
            id,
            playhead,
            offset,
            restart: Box::new(restart),
        });
        inner.last_slept = Duration::ZERO;
        id
    }

    pub fn is_empty(&self) -> bool {
        self.state.inner.lock().unwrap().playheads.is_empty()
    }

    pub fn is_playing(&self) -> bool {
        self.state.play.load(Ordering::Acquire)
    }

    /// `playtime` of the first-attached playhead, adjusted by its offset —
    /// the group's own notion of "now" (original `base_time`).
    pub fn base_time(&self) -> Option<Duration> {
        let inner = self.state.inner.lock().unwrap();
        let first = inner.playheads.first()?;
        Some(first.playhead.playtime().saturating_sub(first.offset))
    }

    /// Start (or resume) playback. Returns `false` if no playheads are
    /// attached yet, mirroring the original's guard in `play()`.
    pub fn play(&self) -> bool {
        if self.is_empty() {
            return false;
        }
        self.state.play.store(true, Ordering::Release);
        let mut inner = self.state.inner.lock().unwrap();
        inner.wakeup = true;
        self.state.condvar.notify_all();
        true
    }

    /// Pause playback. Best-effort: the worker finishes whatever sleep is
    /// already in flight before parking (spec §5). Returns whether playback
    /// was active beforehand.
    pub fn pause(&self) -> bool {
        self.state.play.swap(false, Ordering::AcqRel)
    }

    pub fn set_division(&self, division: crate::division::Division) {
        let was_playing = self.pause();
        {
            let mut inner = self.state.inner.lock().unwrap();
            for slot in inner.playheads.iter_mut() {
                slot.playhead.set_division(division);
            }
        }
        if was_playing {
            self.play();
        }
    }

    /// `seek(t)` applied to every attached playhead at `t + offset` (spec
    /// §4.6). Auto-pauses and resumes (original `Pauser`).
    pub fn seek(&self, target: Duration) -> bool {
        let was_playing = self.pause();
        let ok = {
            let mut inner = self.state.inner.lock().unwrap();
            inner.last_slept = Duration::ZERO;
            inner.compensation = Duration::ZERO;
            let mut all_ok = true;
            for slot in inner.playheads.iter_mut() {
                let restart = &slot.restart;
                if !slot.playhead.seek(target + slot.offset, || restart()) {
                    all_ok = false;
                }
            }
            all_ok
        };
        if was_playing {
            self.play();
        }
        ok
    }

    pub fn seek_throw(&self, target: Duration) -> Result<(), SchedulingError> {
        if self.seek(target) {
            Ok(())
        } else {
            Err(SchedulingError::SeekOutOfRange)
        }
    }

    /// Signal the worker thread (if running, via [`Self::run`]) to stop and
    /// wake it so it notices. Does not block; join the `run` call's scoped
    /// thread handle (or exit the enclosing `thread::scope`) to wait for it.
    pub fn shutdown(&self) {
        self.state.stop.store(true, Ordering::Release);
        let mut inner = self.state.inner.lock().unwrap();
        inner.wakeup = true;
        self.state.condvar.notify_all();
    }

    /// Spawn the worker loop as a scoped thread. The returned join handle's
    /// lifetime is tied to `scope`; call [`Self::shutdown`] then join (or
    /// let the enclosing `thread::scope` block end) to stop it cleanly.
    pub fn run<'scope, 'env>(
        &'scope self,
        scope: &'scope thread::Scope<'scope, 'env>,
    ) -> thread::ScopedJoinHandle<'scope, ()> {
        scope.spawn(move || self.worker_loop())
    }

    fn worker_loop(&self) {
        let state = &self.state;
        loop {
            if state.stop.load(Ordering::Acquire) {
                return;
            }

            if !state.play.load(Ordering::Acquire) {
                if let Some(emitter) = state.emitter {
                    emitter.emit(ModeChanged { playing: false });
                }
                let guard = state.inner.lock().unwrap();
                let mut guard = state
                    .condvar
                    .wait_while(guard, |inner| {
                        !inner.wakeup && !state.stop.load(Ordering::Acquire)
                    })
                    .unwrap();
                guard.wakeup = false;
                drop(guard);
                if state.stop.load(Ordering::Acquire) {
                    return;
                }
                if state.play.load(Ordering::Acquire) {
                    if let Some(emitter) = state.emitter {
                        emitter.emit(ModeChanged { playing: true });
                    }
                }
                continue;
            }

            let begin = timing::now();
            let (last_slept, sleep_duration) = {
                let inner = state.inner.lock().unwrap();
                let sleep_duration = inner.last_slept.saturating_sub(inner.compensation);
                (inner.last_slept, sleep_duration)
            };
            timing::nanosleep(sleep_duration);

            let mut inner = state.inner.lock().unwrap();
            inner.compensation = if inner.compensation < last_slept {
                Duration::ZERO
            } else {
                inner.compensation - last_slept
            };

            let mut min_next: Option<Duration> = None;
            let mut index = 0;
            while index < inner.playheads.len() {
                let result = inner.playheads[index].playhead.tick(last_slept);
                match result {
                    Ok(interval) if interval == EOF => {
                        let removed = inner.playheads.remove(index);
                        Self::handle_removal(state, removed);
                    }
                    Ok(interval) => {
                        min_next = Some(min_next.map_or(interval, |m| m.min(interval)));
                        index += 1;
                    }
                    Err(err) => {
                        log::warn!(
                            "playhead {:?}: tick failed, detaching: {err}",
                            inner.playheads[index].playhead.name()
                        );
                        let removed = inner.playheads.remove(index);
                        Self::handle_removal(state, removed);
                    }
                }
            }

            match min_next {
                None => {
                    state.play.store(false, Ordering::Release);
                    if let Some(emitter) = state.emitter {
                        emitter.emit(EndOfSong);
                    }
                    continue;
                }
                Some(interval) => {
                    inner.last_slept = interval.min(state.max_sleep);
                }
            }
            drop(inner);

            let elapsed = timing::now().duration_since(begin).saturating_sub(sleep_duration);
            state.inner.lock().unwrap().compensation += elapsed;
        }
    }

    fn handle_removal(state: &State<'a, I>, removed: Slot<'a, I>) {
        let mut removal_handler = state.removal_handler.lock().unwrap();
        if let Some(handler) = removal_handler.as_mut() {
            handler(removed.id, removed.playhead);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::division::Division;
    use crate::track::OwnedTrack;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn short_track() -> OwnedTrack {
        let mut track = OwnedTrack::new();
        track.push_channel_voice(0, 0x90, &[60, 100]);
        track.push_channel_voice(1, 0x80, &[60, 0]);
        track.push_meta(0, 0x2F, &[]);
        track
    }

    #[test]
    fn group_with_no_playheads_refuses_to_play() {
        let config = Config::default();
        let group: PlayheadGroup<'_, crate::track::OwnedTrackIter<'_>> = PlayheadGroup::new(&config);
        assert!(!group.play());
        assert!(!group.is_playing());
    }

    #[test]
    fn runs_a_single_short_track_to_eof_and_removes_it() {
        let track = short_track();
        let config = Config::default();
        let group: PlayheadGroup<'_, crate::track::OwnedTrackIter<'_>> = PlayheadGroup::new(&config);

        let mut ph: TrackPlayhead<'_, crate::track::OwnedTrackIter<'_>> = TrackPlayhead::new("t", true);
        ph.set_division(Division::ppq(96));
        ph.bind_track(track.iter()).unwrap();
        group.add_playhead(ph, || track.iter(), Duration::ZERO);

        let removed = Arc::new(AtomicUsize::new(0));
        {
            let removed = Arc::clone(&removed);
            group.set_playhead_removal_handler(move |_id, _playhead| {
                removed.fetch_add(1, Ordering::SeqCst);
            });
        }

        thread::scope(|scope| {
            let handle = group.run(scope);
            group.play();
            while group.is_playing() {
                thread::sleep(Duration::from_millis(1));
            }
            group.shutdown();
            handle.join().unwrap();
        });

        assert_eq!(removed.load(Ordering::SeqCst), 1);
        assert!(group.is_empty());
    }

    #[test]
    fn seek_reaches_target_playtime_while_paused() {
        let track = short_track();
        let config = Config::default();
        let group: PlayheadGroup<'_, crate::track::OwnedTrackIter<'_>> = PlayheadGroup::new(&config);

        let mut ph: TrackPlayhead<'_, crate::track::OwnedTrackIter<'_>> = TrackPlayhead::new("t", true);
        ph.set_division(Division::ppq(96));
        ph.bind_track(track.iter()).unwrap();
        group.add_playhead(ph, || track.iter(), Duration::ZERO);

        assert!(group.seek(Duration::from_nanos(1)));
        assert_eq!(group.base_time(), Some(Duration::from_nanos(1)));
        assert!(!group.is_playing());
    }

    #[test]
    fn pause_flag_is_lock_free_and_reports_prior_state() {
        let config = Config::default();
        let group: PlayheadGroup<'_, crate::track::OwnedTrackIter<'_>> = PlayheadGroup::new(&config);
        assert!(!group.pause());

        let track = short_track();
        let mut ph: TrackPlayhead<'_, crate::track::OwnedTrackIter<'_>> = TrackPlayhead::new("t", true);
        ph.set_division(Division::ppq(96));
        ph.bind_track(track.iter()).unwrap();
        group.add_playhead(ph, || track.iter(), Duration::ZERO);

        assert!(group.play());
        assert!(group.pause());
        assert!(!group.is_playing());
    }
}
