//! Output device capability (spec §1, §4.6, §6).
//!
//! The core never depends on a concrete synth or port backend — it only
//! ever sees [`MidiDevice`], a single-method capability. The optional
//! `midir` feature adds [`MidirDevice`], a thin adapter so an embedder can
//! get a real output port without writing the adapter themselves.

use crate::error::DeviceError;
use crate::message::CC_ALL_SOUND_OFF;

/// A sink that accepts raw MIDI wire messages. Implementations decide their
/// own buffering and latency; the core makes no assumptions beyond "bytes
/// sent are bytes played". `Sync` is required so a `&dyn MidiDevice` can be
/// handed to a `PlayheadGroup`'s worker thread alongside the controller.
pub trait MidiDevice: Send + Sync {
    fn send(&self, message: &[u8]) -> Result<(), DeviceError>;
}

impl<T: MidiDevice + ?Sized> MidiDevice for &T {
    fn send(&self, message: &[u8]) -> Result<(), DeviceError> {
        (**self).send(message)
    }
}

/// Send an All Sound Off (CC 120) Control Change on every channel, used by
/// the player on pause/track-switch (original `sendAllSoundsOff`, kept by
/// the teacher as `all_sound_off`).
pub fn all_sound_off(device: &dyn MidiDevice) -> Result<(), DeviceError> {
    for channel in 0..16u8 {
        device.send(&[0xB0 | channel, CC_ALL_SOUND_OFF, 0])?;
    }
    Ok(())
}

#[cfg(feature = "midir")]
mod midir_device {
    use std::sync::Mutex;

    use super::MidiDevice;
    use crate::error::DeviceError;

    /// Adapts a `midir::MidiOutputConnection` to [`MidiDevice`]. `send` is
    /// serialized behind a mutex since `PlayheadGroup`'s worker is the only
    /// caller in normal use but the trait itself requires `Send + Sync`
    /// sharing across an `Arc`.
    pub struct MidirDevice {
        connection: Mutex<midir::MidiOutputConnection>,
    }

    impl MidirDevice {
        pub fn new(connection: midir::MidiOutputConnection) -> Self {
            MidirDevice {
                connection: Mutex::new(connection),
            }
        }

        pub fn into_inner(self) -> midir::MidiOutputConnection {
            self.connection.into_inner().unwrap()
        }
    }

    impl MidiDevice for MidirDevice {
        fn send(&self, message: &[u8]) -> Result<(), DeviceError> {
            self.connection
                .lock()
                .unwrap()
                .send(message)
                .map_err(|err| DeviceError::SendFailed {
                    reason: err.to_string(),
                })
        }
    }
}

#[cfg(feature = "midir")]
pub use midir_device::MidirDevice;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingDevice {
        sent: Mutex<Vec<Vec<u8>>>,
    }

    impl MidiDevice for RecordingDevice {
        fn send(&self, message: &[u8]) -> Result<(), DeviceError> {
            self.sent.lock().unwrap().push(message.to_vec());
            Ok(())
        }
    }

    #[test]
    fn all_sound_off_hits_every_channel() {
        let device = RecordingDevice {
            sent: Mutex::new(Vec::new()),
        };
        all_sound_off(&device).unwrap();
        let sent = device.sent.lock().unwrap();
        assert_eq!(sent.len(), 16);
        assert_eq!(sent[0], vec![0xB0, CC_ALL_SOUND_OFF, 0]);
        assert_eq!(sent[15], vec![0xBF, CC_ALL_SOUND_OFF, 0]);
    }

    struct FailingDevice;
    impl MidiDevice for FailingDevice {
        fn send(&self, _message: &[u8]) -> Result<(), DeviceError> {
            Err(DeviceError::SendFailed {
                reason: "port closed".into(),
            })
        }
    }

    #[test]
    fn all_sound_off_stops_at_first_failure() {
        let err = all_sound_off(&FailingDevice).unwrap_err();
        assert!(matches!(err, DeviceError::SendFailed { .. }));
    }
}
