//! Lock-free glitch accounting.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Counters {
    underruns: AtomicU64,
    overruns: AtomicU64,
    clips: AtomicU64,
    had_underrun: AtomicBool,
    had_overrun: AtomicBool,
    had_clip: AtomicBool,
}

/// Counts underruns, overruns and clipped blocks.
///
/// Cheap to clone; every clone shares the same counters. The `mark_*`
/// methods are safe to call from the audio thread: they never block,
/// allocate, or log.
#[derive(Clone, Default)]
pub struct GlitchReporter {
    counters: Arc<Counters>,
}

/// Point-in-time glitch totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GlitchSnapshot {
    /// Reads that found fewer frames than requested.
    pub underruns: u64,
    /// Writes that found less space than needed.
    pub overruns: u64,
    /// Rendered blocks silenced because they clipped.
    pub clips: u64,
}

impl GlitchSnapshot {
    /// Glitches that happened after `earlier` was taken.
    pub fn since(&self, earlier: &GlitchSnapshot) -> GlitchSnapshot {
        GlitchSnapshot {
            underruns: self.underruns.saturating_sub(earlier.underruns),
            overruns: self.overruns.saturating_sub(earlier.overruns),
            clips: self.clips.saturating_sub(earlier.clips),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.underruns == 0 && self.overruns == 0 && self.clips == 0
    }
}

impl GlitchReporter {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn mark_underrun(&self) {
        self.counters.underruns.fetch_add(1, Ordering::Relaxed);
        self.counters.had_underrun.store(true, Ordering::Release);
    }

    #[inline]
    pub fn mark_overrun(&self) {
        self.counters.overruns.fetch_add(1, Ordering::Relaxed);
        self.counters.had_overrun.store(true, Ordering::Release);
    }

    #[inline]
    pub fn mark_clip(&self) {
        self.counters.clips.fetch_add(1, Ordering::Relaxed);
        self.counters.had_clip.store(true, Ordering::Release);
    }

    /// Check and clear the underrun flag.
    pub fn check_underrun(&self) -> bool {
        self.counters.had_underrun.swap(false, Ordering::AcqRel)
    }

    /// Check and clear the overrun flag.
    pub fn check_overrun(&self) -> bool {
        self.counters.had_overrun.swap(false, Ordering::AcqRel)
    }

    /// Check and clear the clip flag.
    pub fn check_clip(&self) -> bool {
        self.counters.had_clip.swap(false, Ordering::AcqRel)
    }

    pub fn snapshot(&self) -> GlitchSnapshot {
        GlitchSnapshot {
            underruns: self.counters.underruns.load(Ordering::Relaxed),
            overruns: self.counters.overruns.load(Ordering::Relaxed),
            clips: self.counters.clips.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for GlitchReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("GlitchReporter").field(&self.snapshot()).finish()
    }
}
