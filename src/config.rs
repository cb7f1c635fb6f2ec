//! Engine-wide configuration (spec §6 "Configuration options").

use std::time::Duration;

use crate::tempo::Tempo;

const DEFAULT_MAX_SLEEP: Duration = Duration::from_millis(500);

/// Tunable knobs shared by [`crate::playhead::TrackPlayhead`] and
/// [`crate::group::PlayheadGroup`]. Built with `Config::default()` and
/// `with_*` setters rather than public fields, so adding a knob later
/// doesn't break every call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    max_sleep: Duration,
    cache_interval: Option<Duration>,
    tempo_change_aware: bool,
    default_tempo: Tempo,
    smpte_29_97: bool,
    strict_header_length: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_sleep: DEFAULT_MAX_SLEEP,
            cache_interval: None,
            tempo_change_aware: true,
            default_tempo: Tempo::default(),
            smpte_29_97: true,
            strict_header_length: true,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap on the worker's idle interval between ticks (spec §4.6), so a
    /// newly added playhead or an external seek is noticed within one cap
    /// even while another playhead is scheduled far in the future.
    pub fn with_max_sleep(mut self, max_sleep: Duration) -> Self {
        self.max_sleep = max_sleep;
        self
    }

    pub fn max_sleep(&self) -> Duration {
        self.max_sleep
    }

    /// Snapshot interval for O(1) seeks in long tracks. Accepted here for
    /// forward compatibility with the snapshot-cache extension point spec §9
    /// documents as out of MVP scope; `TrackPlayhead::go_rewind`'s backward
    /// walk is the only seek-backward strategy this crate implements today,
    /// so setting this currently has no effect.
    pub fn with_cache_interval(mut self, interval: Option<Duration>) -> Self {
        self.cache_interval = interval;
        self
    }

    pub fn cache_interval(&self) -> Option<Duration> {
        self.cache_interval
    }

    /// Whether a playhead retimes itself on a `0x51` tempo meta it plays.
    pub fn with_tempo_change_aware(mut self, aware: bool) -> Self {
        self.tempo_change_aware = aware;
        self
    }

    pub fn tempo_change_aware(&self) -> bool {
        self.tempo_change_aware
    }

    /// Tempo assumed before the first tempo meta event is encountered.
    pub fn with_default_tempo(mut self, tempo: Tempo) -> Self {
        self.default_tempo = tempo;
        self
    }

    pub fn default_tempo(&self) -> Tempo {
        self.default_tempo
    }

    /// Whether SMPTE division with an fps byte of 29 is treated as 29.97 Hz
    /// (spec §9 Open Question, resolved: yes by default). Recorded here for
    /// API completeness; `division::division_to_duration` currently always
    /// applies the resolved answer rather than reading this back, since the
    /// spec treats it as settled rather than a live policy choice.
    pub fn with_smpte_29_97(mut self, smpte_29_97: bool) -> Self {
        self.smpte_29_97 = smpte_29_97;
        self
    }

    pub fn smpte_29_97(&self) -> bool {
        self.smpte_29_97
    }

    /// Reject an `MThd` chunk whose declared length isn't exactly 6, rather
    /// than skipping the extra bytes and tolerating it (spec §6 "reject
    /// header length != 6 by default"; set to `false` to relax it for
    /// writers that pad the header chunk).
    pub fn with_strict_header_length(mut self, strict: bool) -> Self {
        self.strict_header_length = strict;
        self
    }

    pub fn strict_header_length(&self) -> bool {
        self.strict_header_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_defaults() {
        let config = Config::default();
        assert_eq!(config.max_sleep(), Duration::from_millis(500));
        assert_eq!(config.cache_interval(), None);
        assert!(config.tempo_change_aware());
        assert_eq!(config.default_tempo().bpm_fp(), 120.0);
        assert!(config.smpte_29_97());
        assert!(config.strict_header_length());
    }

    #[test]
    fn builder_overrides_chain() {
        let config = Config::new()
            .with_max_sleep(Duration::from_millis(250))
            .with_tempo_change_aware(false)
            .with_strict_header_length(false);
        assert_eq!(config.max_sleep(), Duration::from_millis(250));
        assert!(!config.tempo_change_aware());
        assert!(!config.strict_header_length());
    }
}
