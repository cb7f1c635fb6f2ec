//! Event emitter (spec §4.8, §6): a type-indexed multicast registry.
//!
//! Each event is its own small struct implementing the marker trait
//! [`Event`]; `add_handler` is generic over the event type, so a handler's
//! signature IS its subscription — there is no separate "topic" argument to
//! get wrong. Dispatch at `emit` only ever reaches handlers registered for
//! that exact type.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::tempo::Tempo;

/// Marker for a publishable event type.
pub trait Event: Any + Send {}

/// `0x51` tempo meta processed by the status processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempoChanged {
    pub tempo: Tempo,
}
impl Event for TempoChanged {}

/// `0x58` time signature meta processed. `denominator_raw` is the exponent
/// byte as it appears on the wire (not `2^x`), matching spec §6's
/// `time_signature_changed{num, den_raw}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSignatureChanged {
    pub numerator: u8,
    pub denominator_raw: u8,
}
impl Event for TimeSignatureChanged {}

/// `0x59` key signature meta processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySignatureChanged {
    pub sharps_flats: i8,
    pub minor: bool,
}
impl Event for KeySignatureChanged {}

/// Group transitioned between playing and paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeChanged {
    pub playing: bool,
}
impl Event for ModeChanged {}

/// All playheads in a group reached EOF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndOfSong;
impl Event for EndOfSong {}

/// Ambient: a device `send` call failed. The worker logs and continues
/// (spec §7: "one failure does not halt playback").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendFailed {
    pub reason: String,
}
impl Event for SendFailed {}

/// Ambient: a user handler panicked; caught at the scheduler boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerPanicked;
impl Event for HandlerPanicked {}

/// Opaque subscription handle returned by [`EventEmitter::add_handler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(u64);

type HandlerList = Vec<(Token, Box<dyn Fn(&dyn Any) + Send + Sync>)>;

/// Type-indexed multicast registry. Cheap to share: `add_handler`,
/// `remove_handler` and `emit` all take `&self` and lock internally, so one
/// `EventEmitter` can be handed to a playhead's handler and to the group's
/// worker without wrapping it in an external mutex.
pub struct EventEmitter {
    next_token: AtomicU64,
    handlers: Mutex<HashMap<TypeId, HandlerList>>,
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter").finish_non_exhaustive()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        EventEmitter {
            next_token: AtomicU64::new(0),
            handlers: Mutex::new(HashMap::new()),
        }
    }
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handler` to every future `emit::<E>`. Registration order
    /// is preserved as dispatch order (spec §4.8: "no implicit ordering
    /// guarantees between handlers beyond registration order").
    pub fn add_handler<E, F>(&self, handler: F) -> Token
    where
        E: Event,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let token = Token(self.next_token.fetch_add(1, Ordering::Relaxed));
        let boxed: Box<dyn Fn(&dyn Any) + Send + Sync> = Box::new(move |ev: &dyn Any| {
            if let Some(e) = ev.downcast_ref::<E>() {
                handler(e);
            }
        });
        self.handlers
            .lock()
            .unwrap()
            .entry(TypeId::of::<E>())
            .or_default()
            .push((token, boxed));
        token
    }

    /// Unregister a handler previously returned by `add_handler`. No-op if
    /// the token is unknown or already removed.
    pub fn remove_handler(&self, token: Token) {
        let mut handlers = self.handlers.lock().unwrap();
        for list in handlers.values_mut() {
            list.retain(|(t, _)| *t != token);
        }
    }

    /// Dispatch `event` to every handler registered for `E`.
    pub fn emit<E: Event>(&self, event: E) {
        let handlers = self.handlers.lock().unwrap();
        if let Some(list) = handlers.get(&TypeId::of::<E>()) {
            for (_, handler) in list {
                handler(&event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn dispatches_only_to_matching_type() {
        let emitter = EventEmitter::new();
        let tempo_hits = Arc::new(AtomicUsize::new(0));
        let mode_hits = Arc::new(AtomicUsize::new(0));

        {
            let hits = Arc::clone(&tempo_hits);
            emitter.add_handler::<TempoChanged, _>(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }
        {
            let hits = Arc::clone(&mode_hits);
            emitter.add_handler::<ModeChanged, _>(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        emitter.emit(TempoChanged {
            tempo: Tempo::from_bpm(120.0),
        });
        assert_eq!(tempo_hits.load(Ordering::SeqCst), 1);
        assert_eq!(mode_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn remove_handler_stops_future_dispatch() {
        let emitter = EventEmitter::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let token = {
            let hits = Arc::clone(&hits);
            emitter.add_handler::<EndOfSong, _>(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };
        emitter.emit(EndOfSong);
        emitter.remove_handler(token);
        emitter.emit(EndOfSong);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn multiple_handlers_fire_in_registration_order() {
        let emitter = EventEmitter::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            emitter.add_handler::<ModeChanged, _>(move |_| {
                order.lock().unwrap().push(i);
            });
        }
        emitter.emit(ModeChanged { playing: true });
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }
}
