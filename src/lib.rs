//! A real-time Standard MIDI File playback engine.
//!
//! `playtrack` parses an SMF byte-for-byte into zero-copy, lazily-decoded
//! tracks ([`track`]), drives one or more of them against wall-clock time
//! with tempo-aware rescheduling ([`playhead`]), and fans multiple tracks
//! out across a single worker thread ([`group`]). Output goes through the
//! abstract [`device::MidiDevice`] capability; an optional `midir` feature
//! supplies a ready-made backend.
//!
//! A minimal playback loop:
//!
//! ```no_run
//! use playtrack::{config::Config, header, track::SpanTrack};
//!
//! # fn run(bytes: &[u8], device: &dyn playtrack::device::MidiDevice) -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let (header, chunks) = header::parse_smf(bytes, config.strict_header_length())?;
//! let tracks: Vec<_> = chunks.iter().map(|chunk| SpanTrack::new(chunk)).collect();
//! // build a `TrackPlayhead` per track, add each to a `PlayheadGroup`, call
//! // `group.run(scope)` inside a `std::thread::scope` and `group.play()`.
//! # let _ = (header, tracks, device);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod device;
pub mod division;
pub mod emitter;
pub mod error;
pub mod group;
pub mod header;
pub mod message;
pub mod playhead;
pub mod status;
pub mod tempo;
pub mod timed;
pub mod timing;
pub mod track;
pub mod vlq;

pub use config::Config;
pub use device::MidiDevice;
pub use division::Division;
pub use emitter::EventEmitter;
pub use error::{ConfigError, DeviceError, ParseError, SchedulingError};
pub use group::{PlayheadGroup, PlayheadId};
pub use message::{MidiMessage, OwnedMessage};
pub use playhead::{PlayheadHandler, TrackPlayhead};
pub use status::{MidiStatus, StatusProcessor};
pub use tempo::Tempo;
pub use timed::TimedMessage;
pub use track::{OwnedTrack, SpanTrack, Track};
