//! Energy-based audio event detection.
//!
//! Short-time RMS energy drives one two-state machine per event class.
//! A second, coarse RMS pass picks the loudest fixed-length windows.

use serde::{Deserialize, Serialize};
use tracing::debug;

use fclip_models::{merge_adjacent, TimeInterval};

use crate::audio::AudioSignal;

/// Audio event detector parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioEventParams {
    /// RMS frame length in samples
    pub frame_length: usize,
    /// RMS hop length in samples
    pub hop_length: usize,
    /// RMS level that opens a gunshot interval
    pub gunshot_threshold: f32,
    /// RMS level that opens a laughter interval
    pub laughter_threshold: f32,
    /// Intervals of one class closer than this (seconds) are merged
    pub merge_gap: f64,
    /// Loud-peak analysis window in seconds. Each peak anchors one clip,
    /// so callers set this to their clip length.
    #[serde(skip)]
    pub peak_window: f64,
    /// Number of loud peaks to keep
    pub peak_count: usize,
    /// Windows at or below this RMS are treated as silence
    pub silence_floor: f32,
}

impl Default for AudioEventParams {
    fn default() -> Self {
        Self {
            frame_length: 1024,
            hop_length: 512,
            gunshot_threshold: 0.3,
            laughter_threshold: 0.05,
            merge_gap: 0.5,
            peak_window: 8.0,
            peak_count: 30,
            silence_floor: 1e-4,
        }
    }
}

/// Output of one audio analysis run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioEvents {
    pub gunshots: Vec<TimeInterval>,
    pub laughter: Vec<TimeInterval>,
    /// Start times of the loudest windows, ascending
    pub loud_peaks: Vec<f64>,
}

impl AudioEvents {
    pub fn is_empty(&self) -> bool {
        self.gunshots.is_empty() && self.laughter.is_empty() && self.loud_peaks.is_empty()
    }
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|s| (*s as f64) * (*s as f64)).sum();
    (sum_sq / samples.len() as f64).sqrt() as f32
}

/// Short-time RMS energy. Frame `i` covers samples `[i*hop, i*hop + frame_length)`.
///
/// A signal shorter than one frame yields a single frame over what exists.
pub fn rms_energy(samples: &[f32], frame_length: usize, hop_length: usize) -> Vec<f32> {
    if samples.is_empty() || frame_length == 0 || hop_length == 0 {
        return Vec::new();
    }
    if samples.len() < frame_length {
        return vec![rms(samples)];
    }
    let frames = 1 + (samples.len() - frame_length) / hop_length;
    (0..frames)
        .map(|i| {
            let start = i * hop_length;
            rms(&samples[start..start + frame_length])
        })
        .collect()
}

/// Run the quiet/active state machine over an energy series.
///
/// An interval opens on the first frame strictly above `threshold` and
/// closes on the first frame at or below it. An interval still open at the
/// end of the series is closed at `end_time`.
pub fn threshold_intervals(
    energy: &[f32],
    threshold: f32,
    hop_secs: f64,
    end_time: f64,
) -> Vec<TimeInterval> {
    let mut intervals = Vec::new();
    let mut active_since: Option<f64> = None;

    for (i, value) in energy.iter().enumerate() {
        let t = i as f64 * hop_secs;
        match active_since {
            None if *value > threshold => active_since = Some(t),
            Some(start) if *value <= threshold => {
                if let Ok(interval) = TimeInterval::new(start, t) {
                    intervals.push(interval);
                }
                active_since = None;
            }
            _ => {}
        }
    }

    if let Some(start) = active_since {
        if let Ok(interval) = TimeInterval::new(start, end_time) {
            intervals.push(interval);
        }
    }
    intervals
}

/// Start times of the `count` loudest `window_secs` windows, ascending.
///
/// Only full windows are considered. Windows at or below `silence_floor`
/// never qualify, so an all-silent signal yields nothing.
pub fn loud_peaks(signal: &AudioSignal, window_secs: f64, count: usize, silence_floor: f32) -> Vec<f64> {
    let hop = (signal.sample_rate as f64 * window_secs) as usize;
    if hop == 0 || count == 0 {
        return Vec::new();
    }

    let mut windows: Vec<(usize, f32)> = signal
        .samples
        .chunks_exact(hop)
        .map(rms)
        .enumerate()
        .filter(|(_, level)| *level > silence_floor)
        .collect();

    // Stable: equal levels keep chronological order
    windows.sort_by(|a, b| b.1.total_cmp(&a.1));
    windows.truncate(count);

    let mut times: Vec<f64> = windows
        .into_iter()
        .map(|(i, _)| i as f64 * window_secs)
        .collect();
    times.sort_by(f64::total_cmp);
    times
}

/// Detect gunshot and laughter intervals and loud peaks.
pub fn detect_audio_events(signal: &AudioSignal, params: &AudioEventParams) -> AudioEvents {
    if signal.is_empty() {
        return AudioEvents::default();
    }

    let energy = rms_energy(&signal.samples, params.frame_length, params.hop_length);
    let hop_secs = params.hop_length as f64 / signal.sample_rate as f64;
    let end_time = signal.duration();

    let gunshots = merge_adjacent(
        &threshold_intervals(&energy, params.gunshot_threshold, hop_secs, end_time),
        params.merge_gap,
    );
    let laughter = merge_adjacent(
        &threshold_intervals(&energy, params.laughter_threshold, hop_secs, end_time),
        params.merge_gap,
    );
    let loud_peaks = loud_peaks(signal, params.peak_window, params.peak_count, params.silence_floor);

    debug!(
        frames = energy.len(),
        gunshots = gunshots.len(),
        laughter = laughter.len(),
        loud_peaks = loud_peaks.len(),
        "Audio analysis complete"
    );

    AudioEvents {
        gunshots,
        laughter,
        loud_peaks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 1000;

    /// `secs` seconds of constant amplitude.
    fn tone(level: f32, secs: f64) -> Vec<f32> {
        vec![level; (secs * SR as f64) as usize]
    }

    fn params() -> AudioEventParams {
        AudioEventParams {
            frame_length: 100,
            hop_length: 100,
            ..Default::default()
        }
    }

    #[test]
    fn test_rms_energy_frames() {
        let energy = rms_energy(&[0.5; 1000], 100, 50);
        assert_eq!(energy.len(), 19);
        assert!(energy.iter().all(|e| (e - 0.5).abs() < 1e-6));

        assert_eq!(rms_energy(&[0.3; 10], 100, 50).len(), 1);
        assert!(rms_energy(&[], 100, 50).is_empty());
    }

    #[test]
    fn test_threshold_state_machine() {
        let energy = [0.0, 0.4, 0.5, 0.1, 0.0, 0.6, 0.6];
        let intervals = threshold_intervals(&energy, 0.3, 1.0, 7.0);
        assert_eq!(
            intervals,
            vec![
                TimeInterval::new(1.0, 3.0).unwrap(),
                TimeInterval::new(5.0, 7.0).unwrap(),
            ]
        );
    }

    #[test]
    fn test_threshold_is_strict() {
        // Exactly at threshold never opens an interval
        assert!(threshold_intervals(&[0.3, 0.3], 0.3, 1.0, 2.0).is_empty());
    }

    #[test]
    fn test_gunshot_is_also_laughter_level() {
        let mut samples = tone(0.0, 2.0);
        samples.extend(tone(0.5, 1.0));
        samples.extend(tone(0.0, 2.0));
        let events = detect_audio_events(&AudioSignal::new(samples, SR), &params());

        assert_eq!(events.gunshots.len(), 1);
        assert_eq!(events.laughter.len(), 1);
        let shot = events.gunshots[0];
        assert!((shot.start() - 2.0).abs() < 1e-9);
        assert!((shot.end() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_close_intervals_are_merged() {
        let mut samples = tone(0.5, 1.0);
        samples.extend(tone(0.0, 0.2));
        samples.extend(tone(0.5, 1.0));
        samples.extend(tone(0.0, 3.0));
        samples.extend(tone(0.5, 1.0));
        samples.extend(tone(0.0, 1.0));
        let events = detect_audio_events(&AudioSignal::new(samples, SR), &params());

        assert_eq!(events.gunshots.len(), 2);
        for pair in events.gunshots.windows(2) {
            assert!(pair[1].start() - pair[0].end() >= 0.5);
        }
    }

    #[test]
    fn test_loud_peaks_pick_loudest_windows() {
        let mut samples = Vec::new();
        for level in [0.1, 0.9, 0.0, 0.5, 0.2] {
            samples.extend(tone(level, 5.0));
        }
        let signal = AudioSignal::new(samples, SR);
        assert_eq!(loud_peaks(&signal, 5.0, 2, 1e-4), vec![5.0, 15.0]);
        // Silent window never qualifies even when k exceeds the loud ones
        assert_eq!(loud_peaks(&signal, 5.0, 10, 1e-4), vec![0.0, 5.0, 15.0, 20.0]);
    }

    #[test]
    fn test_silence_yields_nothing() {
        let signal = AudioSignal::new(tone(0.0, 30.0), SR);
        let events = detect_audio_events(&signal, &params());
        assert!(events.is_empty());
    }

    #[test]
    fn test_single_burst_gives_one_peak() {
        let mut samples = tone(0.0, 120.0);
        samples.extend(tone(0.03, 2.0));
        samples.extend(tone(0.0, 58.0));
        let events = detect_audio_events(&AudioSignal::new(samples, SR), &params());
        assert_eq!(events.loud_peaks, vec![120.0]);
        assert!(events.gunshots.is_empty());
        assert!(events.laughter.is_empty());
    }
}
