//! SMF division: ticks-per-quarter-note (PPQ) or SMPTE frames (spec §3).

use std::time::Duration;

use crate::tempo::Tempo;

/// The raw `u16` division field from an SMF header, with its two
/// interpretations per spec §3: PPQ when the high bit is clear, SMPTE when
/// it is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Division {
    raw: u16,
}

impl Division {
    /// Wrap a raw division value as read from the header.
    pub const fn from_raw(raw: u16) -> Self {
        Division { raw }
    }

    /// Build a PPQ division (ticks per quarter note, 1..=32767).
    pub const fn ppq(ticks_per_quarter: u16) -> Self {
        Division {
            raw: ticks_per_quarter & 0x7FFF,
        }
    }

    /// Build an SMPTE division. `fps` is the positive frame rate (24, 25,
    /// 29 meaning 29.97, or 30); `ticks_per_frame` is the sub-frame
    /// resolution.
    pub const fn smpte(fps: u8, ticks_per_frame: u8) -> Self {
        let high = (fps as i8).wrapping_neg() as u8;
        Division {
            raw: ((high as u16) << 8) | ticks_per_frame as u16,
        }
    }

    /// The raw on-wire value.
    pub const fn raw(&self) -> u16 {
        self.raw
    }

    pub const fn is_smpte(&self) -> bool {
        self.raw & 0x8000 != 0
    }

    pub const fn is_ppq(&self) -> bool {
        !self.is_smpte()
    }

    /// Ticks per quarter note. Only meaningful when [`Self::is_ppq`].
    pub const fn ticks_per_quarter(&self) -> u16 {
        self.raw & 0x7FFF
    }

    /// `(fps, ticks_per_frame)`. `fps` is the nominal integer rate (29
    /// meaning 29.97). Only meaningful when [`Self::is_smpte`].
    pub const fn smpte_fps_tpf(&self) -> (u8, u8) {
        let high = (self.raw >> 8) as u8;
        let fps = (high as i8).wrapping_neg() as u8;
        let tpf = (self.raw & 0xFF) as u8;
        (fps, tpf)
    }

    /// `false` for a zero division (spec §4.2 step 4: `InvalidDivision`),
    /// or an SMPTE division with a zero fps/ticks-per-frame.
    pub const fn is_valid(&self) -> bool {
        if self.is_ppq() {
            self.ticks_per_quarter() != 0
        } else {
            let (fps, tpf) = self.smpte_fps_tpf();
            fps != 0 && tpf != 0
        }
    }
}

/// Convert a division and tempo into the wall-clock duration of one tick.
///
/// For PPQ, `ns_per_tick = mspq * 1000 / ppq`, truncated toward zero — this
/// integer path matches spec §8 S1 (`96 PPQ`, `500_000` MSPQ →
/// `5_208_333` ns) exactly.
///
/// For SMPTE, fps code 29 is treated as 29.97 (resolved Open Question, spec
/// §9), and the result is likewise truncated toward zero rather than
/// rounded, matching the original `division_to_duration`
/// (`examples/original_source/include/mfmidi/smf/division.hpp`).
pub fn division_to_duration(division: Division, tempo: Tempo) -> Duration {
    if !division.is_valid() || tempo.mspq() == 0 {
        return Duration::ZERO;
    }
    if division.is_ppq() {
        let ppq = division.ticks_per_quarter() as u64;
        let ns = (tempo.mspq() as u64 * 1_000) / ppq;
        return Duration::from_nanos(ns);
    }
    let (fps, tpf) = division.smpte_fps_tpf();
    let real_fps = if fps == 29 { 29.97 } else { fps as f64 };
    let ns = (1.0 / (real_fps * tpf as f64) * 1_000_000_000.0) as u64;
    Duration::from_nanos(ns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ppq_high_bit_clear() {
        let d = Division::from_raw(0x0060);
        assert!(d.is_ppq());
        assert_eq!(d.ticks_per_quarter(), 96);
    }

    #[test]
    fn smpte_round_trips_fps_and_tpf() {
        let d = Division::smpte(25, 40);
        assert!(d.is_smpte());
        assert_eq!(d.smpte_fps_tpf(), (25, 40));
    }

    #[test]
    fn s1_vector_ticks_to_ns() {
        // spec §8 S1
        let div = Division::ppq(96);
        let tempo = Tempo::from_mspq(500_000);
        assert_eq!(
            division_to_duration(div, tempo),
            Duration::from_nanos(5_208_333)
        );
    }

    #[test]
    fn s6_vector_retimed_ticks_to_ns() {
        // spec §8 S6: division=96, tempo=250_000 MSPQ (240 bpm)
        let div = Division::ppq(96);
        let tempo = Tempo::from_mspq(250_000);
        let d = division_to_duration(div, tempo);
        let ns = d.as_nanos() as i64;
        assert!((ns - 2_604_166).abs() <= 1);
    }

    #[test]
    fn zero_division_is_invalid() {
        assert!(!Division::from_raw(0).is_valid());
    }

    #[test]
    fn smpte_29_is_29_97() {
        let div = Division::smpte(29, 80);
        let tempo = Tempo::from_mspq(500_000);
        let ns = division_to_duration(div, tempo).as_nanos();
        // 1 / (29.97 * 80) * 1e9 ~= 417,084
        assert!((ns as i64 - 417_084).abs() <= 2);
    }
}
