use std::time::Duration;

/// Timescale used for all engine-internal timestamps.
///
/// Fragment grids are built in this resolution; demuxers translate their
/// track timescales into it. 90 kHz divides evenly into the common video
/// frame rates.
pub const MEDIA_TIMESCALE: i32 = 90_000;

/// A rational point in time: `value / timescale` seconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MediaTime {
    value: i64,
    timescale: i32,
}

impl Default for MediaTime {
    fn default() -> Self {
        Self::ZERO
    }
}

impl MediaTime {
    pub const ZERO: Self = Self {
        value: 0,
        timescale: 1,
    };
    pub const POSITIVE_INFINITY: Self = Self {
        value: i64::MAX,
        timescale: 1,
    };

    #[must_use]
    pub fn new(value: i64, timescale: i32) -> Self {
        Self { value, timescale }
    }

    #[must_use]
    #[expect(clippy::cast_possible_truncation)]
    pub fn with_seconds(seconds: f64, timescale: i32) -> Self {
        Self {
            value: (seconds * f64::from(timescale)).round() as i64,
            timescale,
        }
    }

    #[must_use]
    pub fn with_duration(duration: Duration) -> Self {
        Self::with_seconds(duration.as_secs_f64(), MEDIA_TIMESCALE)
    }

    #[must_use]
    pub fn value(&self) -> i64 {
        self.value
    }

    #[must_use]
    pub fn timescale(&self) -> i32 {
        self.timescale
    }

    #[must_use]
    #[expect(clippy::cast_precision_loss)]
    pub fn seconds(&self) -> f64 {
        if self.timescale == 0 {
            return 0.0;
        }
        self.value as f64 / f64::from(self.timescale)
    }

    #[must_use]
    pub fn is_indefinite(&self) -> bool {
        self.value == i64::MAX
    }

    #[must_use]
    pub fn to_duration(&self) -> Option<Duration> {
        if self.timescale <= 0 || self.is_indefinite() || self.value < 0 {
            return None;
        }
        Some(Duration::from_secs_f64(self.seconds()))
    }

    /// Rescale to a different timescale, rounding to the nearest tick.
    #[must_use]
    #[expect(clippy::cast_possible_truncation)]
    pub fn rescaled(&self, timescale: i32) -> Self {
        if self.timescale == timescale {
            return *self;
        }
        let value = (i128::from(self.value) * i128::from(timescale)
            + i128::from(self.timescale / 2))
            / i128::from(self.timescale);
        Self {
            value: value as i64,
            timescale,
        }
    }
}

impl Eq for MediaTime {}

impl std::hash::Hash for MediaTime {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.value.hash(state);
        self.timescale.hash(state);
    }
}

impl From<Duration> for MediaTime {
    fn from(d: Duration) -> Self {
        Self::with_duration(d)
    }
}

impl PartialOrd for MediaTime {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MediaTime {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        let lhs = i128::from(self.value) * i128::from(other.timescale);
        let rhs = i128::from(other.value) * i128::from(self.timescale);
        lhs.cmp(&rhs)
    }
}

impl std::ops::Add for MediaTime {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        if self.timescale == rhs.timescale {
            return Self::new(self.value + rhs.value, self.timescale);
        }
        let ts = self.timescale.max(rhs.timescale);
        Self::new(
            self.rescaled(ts).value + rhs.rescaled(ts).value,
            ts,
        )
    }
}

impl std::ops::Sub for MediaTime {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        if self.timescale == rhs.timescale {
            return Self::new(self.value - rhs.value, self.timescale);
        }
        let ts = self.timescale.max(rhs.timescale);
        Self::new(
            self.rescaled(ts).value - rhs.rescaled(ts).value,
            ts,
        )
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(MediaTime::new(90_000, 90_000), MediaTime::new(1, 1), std::cmp::Ordering::Equal)]
    #[case(MediaTime::new(45_000, 90_000), MediaTime::new(1, 1), std::cmp::Ordering::Less)]
    #[case(MediaTime::new(3, 2), MediaTime::new(1, 1), std::cmp::Ordering::Greater)]
    fn ordering_is_exact_across_timescales(
        #[case] a: MediaTime,
        #[case] b: MediaTime,
        #[case] expected: std::cmp::Ordering,
    ) {
        assert_eq!(a.cmp(&b), expected);
    }

    #[test]
    fn add_and_sub_round_trip() {
        let a = MediaTime::with_seconds(6.0, MEDIA_TIMESCALE);
        let b = MediaTime::with_seconds(12.0, MEDIA_TIMESCALE);
        assert_eq!(a + a, b);
        assert_eq!(b - a, a);
    }

    #[test]
    fn mixed_timescale_arithmetic_uses_finer_scale() {
        let coarse = MediaTime::new(6, 1);
        let fine = MediaTime::new(90_000, 90_000);
        let sum = coarse + fine;
        assert_eq!(sum.timescale(), 90_000);
        assert!((sum.seconds() - 7.0).abs() < 1e-9);
    }

    #[test]
    fn rescale_rounds_to_nearest() {
        let t = MediaTime::new(1, 3);
        let r = t.rescaled(90_000);
        assert_eq!(r.value(), 30_000);
    }
}
