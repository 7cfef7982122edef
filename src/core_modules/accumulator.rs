// THEORY:
// The `accumulator` owns everything a run measures: the time series of
// per-sample occupancies and the two running integrals. The integrals are
// plain Riemann sums where each sample contributes `occupancy / sample_rate`
// ratio-seconds, so at 1 Hz the accumulated value is simply the sum of
// the occupancies seen so far. The elapsed-minutes axis is derived from the
// sample count, not from wall-clock time, which makes replayed file runs
// land on exactly the same axis as live runs.

/// One accepted measurement: elapsed minutes plus both occupancies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub minutes: f64,
    pub left: f64,
    pub right: f64,
}

/// Running totals and the time series for one analysis run.
#[derive(Debug, Clone, Default)]
pub struct OccupancyAccumulator {
    num_points: u64,
    left_accum: f64,
    right_accum: f64,
    series: Vec<Sample>,
}

impl OccupancyAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one sample pair and returns it stamped with its minute
    /// position. The minute axis uses the pre-increment count, so the very
    /// first sample of a run sits at minute zero.
    pub fn record(&mut self, left: f64, right: f64, sample_rate_hz: f64) -> Sample {
        let minutes = self.num_points as f64 / sample_rate_hz / 60.0;
        let sample = Sample {
            minutes,
            left,
            right,
        };
        self.series.push(sample);
        self.num_points += 1;
        self.left_accum += left / sample_rate_hz;
        self.right_accum += right / sample_rate_hz;
        sample
    }

    pub fn num_points(&self) -> u64 {
        self.num_points
    }

    /// Accumulated left-circle occupancy in ratio-seconds.
    pub fn left_total(&self) -> f64 {
        self.left_accum
    }

    /// Accumulated right-circle occupancy in ratio-seconds.
    pub fn right_total(&self) -> f64 {
        self.right_accum
    }

    pub fn series(&self) -> &[Sample] {
        &self.series
    }

    /// Zeroes the count, both totals, and the series.
    pub fn clear(&mut self) {
        self.num_points = 0;
        self.left_accum = 0.0;
        self.right_accum = 0.0;
        self.series.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn riemann_sum_at_one_hertz() {
        let mut accum = OccupancyAccumulator::new();
        for &(left, right) in &[(0.2, 0.1), (0.4, 0.1), (0.6, 0.1)] {
            accum.record(left, right, 1.0);
        }
        assert!((accum.left_total() - 1.2).abs() < 1e-12);
        assert!((accum.right_total() - 0.3).abs() < 1e-12);
        assert_eq!(accum.num_points(), 3);
    }

    #[test]
    fn minute_axis_derives_from_sample_count() {
        let mut accum = OccupancyAccumulator::new();
        let first = accum.record(0.5, 0.5, 2.0);
        assert_eq!(first.minutes, 0.0);
        // At 2 Hz the 121st sample sits at exactly one minute.
        for _ in 0..120 {
            accum.record(0.5, 0.5, 2.0);
        }
        assert!((accum.series().last().unwrap().minutes - 1.0).abs() < 1e-12);
    }

    #[test]
    fn clear_zeroes_everything() {
        let mut accum = OccupancyAccumulator::new();
        accum.record(0.9, 0.8, 1.0);
        accum.clear();
        assert_eq!(accum.num_points(), 0);
        assert_eq!(accum.left_total(), 0.0);
        assert_eq!(accum.right_total(), 0.0);
        assert!(accum.series().is_empty());
    }
}
