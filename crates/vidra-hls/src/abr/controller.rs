use std::collections::HashMap;
use std::time::Duration;

use tracing::trace;

use super::{
    estimator::BitrateEstimator,
    types::{AbrOptions, QualitySelection},
};
use crate::playlist::{Variant, VariantId};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChoiceReason {
    /// The user pinned a quality and a variant matches it.
    Pinned,
    /// The throughput estimate covers this variant with headroom.
    Throughput,
    /// No variant qualified; the lowest bandwidth is the floor.
    LowestFallback,
    /// A better copy of this fragment is already on disk.
    AlreadyLoaded,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VariantChoice {
    pub variant: VariantId,
    pub reason: ChoiceReason,
}

/// Per-fragment variant selection with urgency tiers and a
/// never-downgrade memory of already-materialized fragments.
pub struct AbrController {
    opts: AbrOptions,
    /// Session variants in descending-bandwidth order (master order).
    variants: Vec<Variant>,
    estimator: BitrateEstimator,
    selection: QualitySelection,
    /// fragment index -> best-resolution variant already persisted for it.
    loaded_variants: HashMap<usize, VariantId>,
}

impl AbrController {
    pub fn new(opts: AbrOptions, variants: Vec<Variant>, estimator: BitrateEstimator) -> Self {
        Self {
            opts,
            variants,
            estimator,
            selection: QualitySelection::Auto,
            loaded_variants: HashMap::new(),
        }
    }

    pub fn set_quality(&mut self, selection: QualitySelection) {
        self.selection = selection;
    }

    pub fn quality(&self) -> QualitySelection {
        self.selection
    }

    pub fn estimate_bps(&self) -> f64 {
        self.estimator.estimate_bps()
    }

    fn tier_ratio(&self, buffer_left: f64) -> (f64, bool) {
        let urgent = buffer_left < self.opts.urgent_duration.as_secs_f64();
        let ratio = if urgent {
            self.opts.urgent_ratio
        } else if buffer_left > self.opts.not_urgent_duration.as_secs_f64() {
            self.opts.not_urgent_ratio
        } else {
            self.opts.bitrate_ratio
        };
        (ratio, urgent)
    }

    /// First variant (descending bandwidth) whose cost fits the estimate,
    /// or the lowest-bandwidth variant as the floor.
    fn scan(&self, ratio: f64, playback_rate: f64) -> (usize, ChoiceReason) {
        let estimate = self.estimator.estimate_bps();
        self.variants
            .iter()
            .position(|v| estimate / (v.bandwidth as f64 * ratio * playback_rate) > 1.0)
            .map_or(
                (self.variants.len() - 1, ChoiceReason::LowestFallback),
                |i| (i, ChoiceReason::Throughput),
            )
    }

    /// Pick the variant whose copy of `fragment_index` should be fetched.
    ///
    /// `None` means the buffer is full and the caller must not fetch.
    pub fn choose(
        &self,
        fragment_index: usize,
        player_time: f64,
        loading_progress: f64,
        playback_rate: f64,
    ) -> Option<VariantChoice> {
        if self.variants.is_empty() {
            return None;
        }

        if let QualitySelection::Height(height) = self.selection {
            if let Some(i) = self
                .variants
                .iter()
                .position(|v| v.resolution.height == height)
            {
                return Some(VariantChoice {
                    variant: VariantId(i),
                    reason: ChoiceReason::Pinned,
                });
            }
        }

        let buffer_left = loading_progress - player_time;
        if buffer_left >= self.opts.buffering_duration.as_secs_f64() {
            return None;
        }

        let (ratio, urgent) = self.tier_ratio(buffer_left);
        let (chosen, reason) = self.scan(ratio, playback_rate);

        if let Some(&stored) = self.loaded_variants.get(&fragment_index) {
            let stored_pixels = self.variants[stored.0].resolution.pixels();
            let chosen_pixels = self.variants[chosen].resolution.pixels();
            if stored_pixels > chosen_pixels || urgent {
                return Some(VariantChoice {
                    variant: stored,
                    reason: ChoiceReason::AlreadyLoaded,
                });
            }
        }

        trace!(
            fragment_index,
            buffer_left,
            ratio,
            variant = chosen,
            ?reason,
            "variant chosen"
        );

        Some(VariantChoice {
            variant: VariantId(chosen),
            reason,
        })
    }

    /// Record a completed load of `fragment_index` from `variant`.
    ///
    /// The per-fragment memory only ever moves to an equal or higher
    /// resolution. Cache hits skip the estimate update; they say nothing
    /// about the network.
    pub fn loaded(
        &mut self,
        fragment_index: usize,
        variant: VariantId,
        bytes: u64,
        elapsed: Duration,
        from_cache: bool,
    ) {
        let Some(new) = self.variants.get(variant.0) else {
            return;
        };

        let keep_stored = self
            .loaded_variants
            .get(&fragment_index)
            .and_then(|stored| self.variants.get(stored.0))
            .is_some_and(|stored| stored.resolution.pixels() > new.resolution.pixels());
        if !keep_stored {
            self.loaded_variants.insert(fragment_index, variant);
        }

        if !from_cache {
            self.estimator.push(bytes, elapsed);
            // Sanity bounds: a single absurd measurement must not park the
            // estimate where no variant can ever be reconsidered.
            let lo = self.variants.iter().map(|v| v.bandwidth).min().unwrap_or(1);
            let hi = self.variants.iter().map(|v| v.bandwidth).max().unwrap_or(1);
            self.estimator
                .clamp(lo as f64 / 10.0, hi as f64 * 10.0);
        }
    }

    /// Height the automatic selection would pick right now. Informational
    /// only: no pin, no buffer gate, no already-loaded override.
    pub fn auto_quality(&self, player_time: f64, loading_progress: f64, playback_rate: f64) -> u32 {
        if self.variants.is_empty() {
            return 0;
        }
        let (ratio, _) = self.tier_ratio(loading_progress - player_time);
        let (chosen, _) = self.scan(ratio, playback_rate);
        self.variants[chosen].resolution.height
    }
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;
    use crate::playlist::Resolution;

    fn variant(bandwidth: u64, width: u32, height: u32) -> Variant {
        Variant {
            bandwidth,
            resolution: Resolution::new(width, height),
            url: Url::parse(&format!("http://127.0.0.1/hls_level_{height}.m3u8")).unwrap(),
        }
    }

    fn two_variants() -> Vec<Variant> {
        vec![variant(1_500_000, 1280, 720), variant(400_000, 640, 360)]
    }

    fn controller_with(variants: Vec<Variant>, estimate: f64) -> AbrController {
        let opts = AbrOptions::default();
        let estimator = BitrateEstimator::with_estimate(&opts, estimate);
        AbrController::new(opts, variants, estimator)
    }

    #[test]
    fn estimate_headroom_selects_top_variant() {
        let abr = controller_with(two_variants(), 2_000_000.0);

        // 2e6 / (1.5e6 * 1.3 * 1.0) = 1.026 > 1.
        let choice = abr.choose(0, 0.0, 10.0, 1.0).unwrap();
        assert_eq!(choice.variant, VariantId(0));
        assert_eq!(choice.reason, ChoiceReason::Throughput);
    }

    #[test]
    fn thin_headroom_falls_to_lower_variant() {
        let abr = controller_with(two_variants(), 1_800_000.0);

        // 1.8e6 / (1.5e6 * 1.3) = 0.92 < 1, next variant qualifies.
        let choice = abr.choose(0, 0.0, 10.0, 1.0).unwrap();
        assert_eq!(choice.variant, VariantId(1));
        assert_eq!(choice.reason, ChoiceReason::Throughput);
    }

    #[test]
    fn no_qualifier_returns_lowest() {
        let abr = controller_with(two_variants(), 100_000.0);

        let choice = abr.choose(0, 0.0, 10.0, 1.0).unwrap();
        assert_eq!(choice.variant, VariantId(1));
        assert_eq!(choice.reason, ChoiceReason::LowestFallback);
    }

    #[test]
    fn full_buffer_gates_fetching() {
        let abr = controller_with(two_variants(), 2_000_000.0);

        assert!(abr.choose(0, 10.0, 40.0, 1.0).is_none());
        // One tick of playback later the margin is below the gate again.
        assert!(abr.choose(0, 10.1, 40.0, 1.0).is_some());
    }

    #[test]
    fn urgency_tiers_change_the_required_headroom() {
        // Estimate qualifies the top variant at ratio 1.1 and 1.3 but not 2.0.
        let abr = controller_with(two_variants(), 2_200_000.0);

        // Relaxed tier (buffer > 15 s): 2.2e6 / (1.5e6 * 1.1) > 1.
        assert_eq!(abr.choose(0, 0.0, 20.0, 1.0).unwrap().variant, VariantId(0));
        // Normal tier: 2.2e6 / (1.5e6 * 1.3) > 1.
        assert_eq!(abr.choose(0, 0.0, 10.0, 1.0).unwrap().variant, VariantId(0));
        // Urgent tier (buffer < 5 s): 2.2e6 / (1.5e6 * 2.0) < 1.
        assert_eq!(abr.choose(0, 0.0, 3.0, 1.0).unwrap().variant, VariantId(1));
    }

    #[test]
    fn playback_rate_scales_the_cost() {
        let abr = controller_with(two_variants(), 2_000_000.0);

        // At 2x the top variant effectively needs twice the bandwidth.
        let choice = abr.choose(0, 0.0, 10.0, 2.0).unwrap();
        assert_eq!(choice.variant, VariantId(1));
    }

    #[test]
    fn pinned_quality_ignores_buffer_state() {
        let mut abr = controller_with(two_variants(), 100_000.0);
        abr.set_quality(QualitySelection::Height(720));

        // Even past the buffer gate the pin wins.
        let choice = abr.choose(0, 0.0, 40.0, 1.0).unwrap();
        assert_eq!(choice.variant, VariantId(0));
        assert_eq!(choice.reason, ChoiceReason::Pinned);

        // Back to auto: the gate applies again.
        abr.set_quality(QualitySelection::Auto);
        assert!(abr.choose(0, 0.0, 40.0, 1.0).is_none());
    }

    #[test]
    fn already_loaded_higher_resolution_wins() {
        let variants = vec![
            variant(3_000_000, 1920, 1080),
            variant(1_500_000, 1280, 720),
            variant(700_000, 854, 480),
        ];
        let mut abr = controller_with(variants, 1_000_000.0);

        // Fragment 5 was materialized at 1080p before a downgrade.
        abr.loaded(5, VariantId(0), 0, Duration::ZERO, true);

        // Current conditions favor 480p, but the 1080p copy is on disk.
        let choice = abr.choose(5, 0.0, 10.0, 1.0).unwrap();
        assert_eq!(choice.variant, VariantId(0));
        assert_eq!(choice.reason, ChoiceReason::AlreadyLoaded);

        // A later 480p completion must not overwrite the 1080p memory.
        abr.loaded(5, VariantId(2), 0, Duration::ZERO, true);
        let choice = abr.choose(5, 0.0, 10.0, 1.0).unwrap();
        assert_eq!(choice.variant, VariantId(0));
    }

    #[test]
    fn urgent_buffer_reuses_any_loaded_copy() {
        let mut abr = controller_with(two_variants(), 2_200_000.0);

        // The 360p copy of fragment 2 is on disk; estimate favors 720p in
        // the normal tier but the buffer is nearly dry.
        abr.loaded(2, VariantId(1), 0, Duration::ZERO, true);
        let choice = abr.choose(2, 0.0, 2.0, 1.0).unwrap();
        assert_eq!(choice.variant, VariantId(1));
        assert_eq!(choice.reason, ChoiceReason::AlreadyLoaded);
    }

    #[test]
    fn cached_loads_leave_the_estimate_alone() {
        let mut abr = controller_with(two_variants(), 2_000_000.0);

        abr.loaded(0, VariantId(0), 10_000_000, Duration::from_millis(1), true);
        assert!((abr.estimate_bps() - 2_000_000.0).abs() < 1.0);

        abr.loaded(1, VariantId(0), 1_000_000, Duration::from_secs(1), false);
        assert!((abr.estimate_bps() - 2_600_000.0).abs() < 1.0);
    }

    #[test]
    fn estimate_stays_within_sanity_bounds() {
        let mut abr = controller_with(two_variants(), 1_000_000.0);

        // A burst of absurdly fast loads.
        for i in 0..20 {
            abr.loaded(i, VariantId(0), u64::MAX / 16, Duration::from_millis(1), false);
        }
        assert!(abr.estimate_bps() <= 1_500_000.0 * 10.0);

        // A crawl of absurdly slow ones.
        for i in 0..20 {
            abr.loaded(i, VariantId(0), 1, Duration::from_secs(100), false);
        }
        assert!(abr.estimate_bps() >= 400_000.0 / 10.0);
    }

    #[test]
    fn single_variant_is_always_chosen_unless_gated() {
        let abr = controller_with(vec![variant(1_500_000, 1280, 720)], 10_000.0);

        let choice = abr.choose(0, 0.0, 1.0, 1.0).unwrap();
        assert_eq!(choice.variant, VariantId(0));
        assert!(abr.choose(0, 0.0, 35.0, 1.0).is_none());
    }

    #[test]
    fn auto_quality_reports_the_scan_height() {
        let mut abr = controller_with(two_variants(), 2_000_000.0);
        assert_eq!(abr.auto_quality(0.0, 10.0, 1.0), 720);

        // Pinning does not affect the informational value.
        abr.set_quality(QualitySelection::Height(360));
        assert_eq!(abr.auto_quality(0.0, 10.0, 1.0), 720);
    }
}
