//! Timestamp repair
//!
//! Upstream timestamps are not trusted: encoders restart, wrap or simply
//! emit garbage, while the MP4 writer rejects any DTS that does not strictly
//! increase. Each output keeps the last DTS it tried to write and bends
//! offending packets just past it.
//!
//! All values here are in the output time base.

/// Per-output monotonicity state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimestampRepair {
    last_dts: Option<i64>,
}

impl TimestampRepair {
    pub fn new() -> Self {
        Self::default()
    }

    /// DTS of the last write attempt
    pub fn last_dts(&self) -> Option<i64> {
        self.last_dts
    }

    /// Compute the `(pts, dts)` pair to write.
    ///
    /// When the DTS is unset or does not advance past the last one it is
    /// replaced by `last + 1`. A PTS that was not already behind its DTS is
    /// pulled forward to at least the new DTS; an unset PTS takes the new DTS.
    /// Remaining unset values become 0 and the PTS never ends up below the DTS.
    pub fn apply(&self, pts: Option<i64>, dts: Option<i64>) -> (i64, i64) {
        let mut pts = pts;
        let mut dts = dts;

        if let Some(last) = self.last_dts {
            let advances = matches!(dts, Some(d) if d > last);
            if !advances {
                let next = last.saturating_add(1);
                pts = match (pts, dts) {
                    (None, _) => Some(next),
                    (Some(p), Some(d)) if p < d => Some(p),
                    (Some(p), _) => Some(p.max(next)),
                };
                dts = Some(next);
            }
        }

        let dts = dts.unwrap_or(0);
        let pts = pts.unwrap_or(0).max(dts);
        (pts, dts)
    }

    /// Remember the DTS of a write attempt, successful or not
    pub fn record(&mut self, dts: i64) {
        self.last_dts = Some(dts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(input: &[(Option<i64>, Option<i64>)]) -> Vec<(i64, i64)> {
        let mut repair = TimestampRepair::new();
        input
            .iter()
            .map(|&(pts, dts)| {
                let out = repair.apply(pts, dts);
                repair.record(out.1);
                out
            })
            .collect()
    }

    #[test]
    fn test_backwards_dts_bent_forward() {
        let dts: Vec<_> = run(&[
            (Some(100), Some(100)),
            (Some(200), Some(200)),
            (Some(50), Some(50)),
            (Some(300), Some(300)),
        ])
        .into_iter()
        .map(|(_, dts)| dts)
        .collect();
        assert_eq!(dts, vec![100, 200, 201, 300]);
    }

    #[test]
    fn test_repeated_dts() {
        let out = run(&[(Some(10), Some(10)), (Some(10), Some(10)), (Some(10), Some(10))]);
        assert_eq!(out, vec![(10, 10), (11, 11), (12, 12)]);
    }

    #[test]
    fn test_unset_first_packet_becomes_zero() {
        assert_eq!(run(&[(None, None)]), vec![(0, 0)]);
    }

    #[test]
    fn test_unset_after_history() {
        let out = run(&[(Some(40), Some(40)), (None, None)]);
        assert_eq!(out[1], (41, 41));
    }

    #[test]
    fn test_pts_kept_when_ahead() {
        let out = run(&[(Some(100), Some(100)), (Some(500), Some(90))]);
        assert_eq!(out[1], (500, 101));
    }

    #[test]
    fn test_pts_never_below_dts() {
        // PTS behind DTS on a repaired packet is left alone, then clamped
        let out = run(&[(Some(100), Some(100)), (Some(20), Some(50))]);
        assert_eq!(out[1], (101, 101));

        // and a fresh PTS < DTS is clamped too
        assert_eq!(run(&[(Some(5), Some(10))]), vec![(10, 10)]);
    }

    #[test]
    fn test_unset_dts_with_pts() {
        let out = run(&[(Some(100), Some(100)), (Some(150), None)]);
        assert_eq!(out[1], (150, 101));
    }

    #[test]
    fn test_last_dts_tracks_attempts() {
        let mut repair = TimestampRepair::new();
        assert_eq!(repair.last_dts(), None);
        repair.record(7);
        assert_eq!(repair.last_dts(), Some(7));
        assert_eq!(repair.apply(Some(3), Some(3)), (8, 8));
    }

    #[test]
    fn test_saturates_at_max() {
        let mut repair = TimestampRepair::new();
        repair.record(i64::MAX);
        assert_eq!(repair.apply(None, None), (i64::MAX, i64::MAX));
    }
}
