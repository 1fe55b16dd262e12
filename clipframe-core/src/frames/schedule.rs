//! Uniform sampling of frame timestamps across a video's duration.

use crate::error::{MediaError, MediaResult};

use super::types::SampleTimestamp;

/// Distance kept from the end of the stream; decoders fail on an exact
/// end-of-stream seek.
pub const EDGE_EPSILON_SECONDS: f64 = 0.001;

/// Returns exactly `max(requested_count, 1)` strictly increasing timestamps in
/// `[0, duration)`, starting at zero and spaced `duration / count` apart.
///
/// The edge epsilon shrinks to half an interval for very dense requests so
/// that clamping the tail never produces two equal timestamps.
pub fn schedule(duration: f64, requested_count: usize) -> MediaResult<Vec<SampleTimestamp>> {
    if !duration.is_finite() || duration <= 0.0 {
        return Err(MediaError::InvalidDuration(duration));
    }
    let count = requested_count.max(1);
    let interval = duration / count as f64;
    let epsilon = EDGE_EPSILON_SECONDS.min(interval / 2.0);
    let ceiling = duration - epsilon;

    Ok((0..count)
        .map(|ordinal| SampleTimestamp {
            ordinal,
            seconds: (ordinal as f64 * interval).min(ceiling).max(0.0),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seconds(timestamps: &[SampleTimestamp]) -> Vec<f64> {
        timestamps.iter().map(|t| t.seconds).collect()
    }

    fn assert_well_formed(duration: f64, count: usize) {
        let timestamps = schedule(duration, count).unwrap();
        assert_eq!(timestamps.len(), count.max(1), "d={duration} n={count}");
        for (index, timestamp) in timestamps.iter().enumerate() {
            assert_eq!(timestamp.ordinal, index);
            assert!(timestamp.seconds >= 0.0);
            assert!(timestamp.seconds < duration, "d={duration} n={count}");
        }
        for pair in timestamps.windows(2) {
            assert!(pair[1].seconds > pair[0].seconds, "d={duration} n={count}");
        }
    }

    #[test]
    fn ten_seconds_five_frames() {
        let timestamps = schedule(10.0, 5).unwrap();
        assert_eq!(seconds(&timestamps), vec![0.0, 2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn single_frame_is_at_zero() {
        for duration in [0.0005, 1.0, 10.0, 7200.0] {
            assert_eq!(seconds(&schedule(duration, 1).unwrap()), vec![0.0]);
        }
    }

    #[test]
    fn zero_count_is_treated_as_one() {
        assert_eq!(seconds(&schedule(3.0, 0).unwrap()), vec![0.0]);
    }

    #[test]
    fn non_positive_duration_is_rejected() {
        for duration in [0.0, -1.0, -0.0, f64::NAN, f64::INFINITY] {
            let err = schedule(duration, 5).unwrap_err();
            assert!(matches!(err, MediaError::InvalidDuration(_)));
        }
    }

    #[test]
    fn timestamps_stay_strictly_inside_stream() {
        let durations = [0.0015, 0.01, 0.5, 1.0, 3.3, 10.0, 59.94, 3600.0];
        let counts = [1, 2, 3, 7, 30, 120, 1000];
        for duration in durations {
            for count in counts {
                assert_well_formed(duration, count);
            }
        }
    }

    #[test]
    fn dense_request_keeps_last_timestamp_before_end() {
        let timestamps = schedule(1.0, 1000).unwrap();
        let last = timestamps.last().unwrap().seconds;
        assert!(last < 1.0);
        assert!((last - 0.999).abs() < 1e-9);
    }
}
