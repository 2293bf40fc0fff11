use ndarray::{Array2, ArrayView1, Axis};
use std::time::Duration;

/// Counts of one acquisition, channel × bin. Never modified after construction.
#[derive(Clone, Debug, PartialEq)]
pub struct HistogramResult {
    counts: Array2<u32>,
    integrals: Vec<u64>,
    overflow: bool,
    acquisition_time_ms: u32,
    elapsed: Duration,
    resolution_ps: f64,
}

impl HistogramResult {
    pub fn new(
        counts: Array2<u32>,
        overflow: bool,
        acquisition_time_ms: u32,
        elapsed: Duration,
        resolution_ps: f64,
    ) -> Self {
        let integrals = counts
            .axis_iter(Axis(0))
            .map(|row| row.iter().map(|&c| u64::from(c)).sum())
            .collect();
        Self {
            counts,
            integrals,
            overflow,
            acquisition_time_ms,
            elapsed,
            resolution_ps,
        }
    }

    pub fn counts(&self) -> &Array2<u32> {
        &self.counts
    }

    pub fn channel(&self, channel: usize) -> Option<ArrayView1<'_, u32>> {
        (channel < self.num_channels()).then(|| self.counts.row(channel))
    }

    pub fn num_channels(&self) -> usize {
        self.counts.nrows()
    }

    pub fn histogram_len(&self) -> usize {
        self.counts.ncols()
    }

    /// Sum of all bins, per channel.
    pub fn channel_integrals(&self) -> &[u64] {
        &self.integrals
    }

    pub fn total_counts(&self) -> u64 {
        self.integrals.iter().sum()
    }

    pub fn overflow(&self) -> bool {
        self.overflow
    }

    /// Requested acquisition time.
    pub fn acquisition_time_ms(&self) -> u32 {
        self.acquisition_time_ms
    }

    /// Wall-clock time from start to completion. Usually a little over the request.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn resolution_ps(&self) -> f64 {
        self.resolution_ps
    }

    /// One view per bin across all channels, in bin order.
    pub fn rows(&self) -> impl Iterator<Item = ArrayView1<'_, u32>> {
        self.counts.axis_iter(Axis(1))
    }
}
