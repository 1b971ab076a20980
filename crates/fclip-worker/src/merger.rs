//! Segment merger: fuses every modality into fixed-length candidates.
//!
//! Anchors are event start times truncated to whole seconds and collected
//! into an ordered set, so events within the same second collapse into one
//! candidate. Candidates from different seconds may overlap; the
//! materializer and ranker resolve that with their start-gap filters.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use fclip_media::AudioEvents;
use fclip_models::{DetectedEvent, Modality, Segment, TimeInterval};

/// Raw outputs of every signal extractor for one source.
#[derive(Debug, Clone, Default)]
pub struct Signals {
    /// Motion count per window index
    pub motion: BTreeMap<u64, u32>,
    pub audio: AudioEvents,
    /// Shot boundary timestamps in seconds
    pub shot_boundaries: Vec<f64>,
    /// Classifier-derived action intervals
    pub actions: Vec<DetectedEvent>,
}

impl Signals {
    pub fn is_empty(&self) -> bool {
        self.motion.is_empty()
            && self.audio.is_empty()
            && self.shot_boundaries.is_empty()
            && self.actions.is_empty()
    }
}

/// Motion events for the `max_windows` busiest windows.
///
/// Windows are ranked by count, ties going to the earlier window; the
/// result is chronological.
pub fn motion_events(
    counts: &BTreeMap<u64, u32>,
    segment_duration: f64,
    max_windows: usize,
) -> Vec<DetectedEvent> {
    let mut windows: Vec<(u64, u32)> = counts
        .iter()
        .filter(|(_, count)| **count > 0)
        .map(|(w, c)| (*w, *c))
        .collect();
    windows.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    windows.truncate(max_windows);
    windows.sort_by_key(|(w, _)| *w);

    windows
        .into_iter()
        .filter_map(|(w, _)| {
            let start = w as f64 * segment_duration;
            TimeInterval::new(start, start + segment_duration).ok()
        })
        .map(|interval| DetectedEvent::new(Modality::Motion, interval))
        .collect()
}

/// Flatten all signals into tagged events, sorted by start time.
pub fn collect_events(
    signals: &Signals,
    motion_segment_duration: f64,
    motion_max_windows: usize,
) -> Vec<DetectedEvent> {
    let mut events = motion_events(&signals.motion, motion_segment_duration, motion_max_windows);

    events.extend(
        signals
            .audio
            .gunshots
            .iter()
            .map(|i| DetectedEvent::new(Modality::Gunshot, *i)),
    );
    events.extend(
        signals
            .audio
            .laughter
            .iter()
            .map(|i| DetectedEvent::new(Modality::Laughter, *i)),
    );
    events.extend(
        signals
            .audio
            .loud_peaks
            .iter()
            .filter_map(|t| DetectedEvent::at(Modality::LoudPeak, *t).ok()),
    );
    events.extend(
        signals
            .shot_boundaries
            .iter()
            .filter_map(|t| DetectedEvent::at(Modality::ShotChange, *t).ok()),
    );
    events.extend(signals.actions.iter().cloned());

    // Stable: equal starts keep modality order
    events.sort_by(|a, b| a.start().total_cmp(&b.start()));
    events
}

fn anchored_segments(starts: impl Iterator<Item = f64>, clip_length: f64) -> Vec<Segment> {
    let anchors: BTreeSet<u64> = starts
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(|s| s.floor() as u64)
        .collect();

    anchors
        .into_iter()
        .filter_map(|anchor| Segment::anchored(anchor, clip_length).ok())
        .collect()
}

/// One segment per distinct whole-second event start, ascending.
///
/// Loud peaks are not anchors here; they are the fallback when every
/// other modality is silent (see [`peak_segments`]).
pub fn segment_clips(events: &[DetectedEvent], clip_length: f64) -> Vec<Segment> {
    let segments = anchored_segments(
        events
            .iter()
            .filter(|e| e.modality != Modality::LoudPeak)
            .map(|e| e.start()),
        clip_length,
    );
    debug!(events = events.len(), segments = segments.len(), "Merged signal anchors");
    segments
}

/// Segments anchored at loud peaks only.
pub fn peak_segments(events: &[DetectedEvent], clip_length: f64) -> Vec<Segment> {
    anchored_segments(
        events
            .iter()
            .filter(|e| e.modality == Modality::LoudPeak)
            .map(|e| e.start()),
        clip_length,
    )
}

/// Whether `event` counts as evidence for `segment`.
///
/// Instantaneous events (loud peaks, shot changes) count when their
/// timestamp lies in `[start, end]`; interval events when they overlap.
pub fn supports(segment: &Segment, event: &DetectedEvent) -> bool {
    match event.modality {
        Modality::LoudPeak | Modality::ShotChange => {
            let t = event.start();
            segment.start() <= t && t <= segment.end()
        }
        _ => segment.interval.overlaps(&event.interval),
    }
}

/// All events supporting `segment`, in event order.
pub fn evidence_for(segment: &Segment, events: &[DetectedEvent]) -> Vec<DetectedEvent> {
    events
        .iter()
        .filter(|e| supports(segment, e))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interval(start: f64, end: f64) -> TimeInterval {
        TimeInterval::new(start, end).unwrap()
    }

    #[test]
    fn test_anchors_collapse_within_a_second() {
        let events = vec![
            DetectedEvent::new(Modality::Gunshot, interval(10.2, 10.5)),
            DetectedEvent::new(Modality::Laughter, interval(10.8, 12.0)),
            DetectedEvent::at(Modality::ShotChange, 11.0).unwrap(),
        ];
        let segments = segment_clips(&events, 8.0);
        let anchors: Vec<u64> = segments.iter().map(|s| s.anchor).collect();
        assert_eq!(anchors, vec![10, 11]);
        assert_eq!(segments[0].start(), 10.0);
        assert_eq!(segments[0].end(), 18.0);
    }

    #[test]
    fn test_overlapping_segments_are_kept() {
        let events = vec![
            DetectedEvent::at(Modality::ShotChange, 3.0).unwrap(),
            DetectedEvent::at(Modality::ShotChange, 5.0).unwrap(),
        ];
        let segments = segment_clips(&events, 8.0);
        assert_eq!(segments.len(), 2);
        assert!(segments[0].interval.overlaps(&segments[1].interval));
    }

    #[test]
    fn test_no_signal_gives_no_segments() {
        let signals = Signals::default();
        assert!(signals.is_empty());
        let events = collect_events(&signals, 60.0, 30);
        assert!(segment_clips(&events, 8.0).is_empty());
    }

    #[test]
    fn test_loud_peaks_are_fallback_only() {
        let signals = Signals {
            audio: AudioEvents {
                loud_peaks: vec![120.0],
                ..Default::default()
            },
            ..Default::default()
        };
        let events = collect_events(&signals, 60.0, 30);
        assert!(segment_clips(&events, 8.0).is_empty());

        let fallback = peak_segments(&events, 8.0);
        assert_eq!(fallback.len(), 1);
        assert_eq!(fallback[0].anchor, 120);
    }

    #[test]
    fn test_motion_keeps_busiest_windows() {
        let counts = BTreeMap::from([(0, 3), (1, 9), (2, 9), (3, 1), (4, 0)]);
        let events = motion_events(&counts, 60.0, 2);
        let starts: Vec<f64> = events.iter().map(|e| e.start()).collect();
        assert_eq!(starts, vec![60.0, 120.0]);
        assert!(events.iter().all(|e| e.modality == Modality::Motion));
        assert_eq!(events[0].interval.end(), 120.0);
    }

    #[test]
    fn test_collect_events_is_sorted() {
        let signals = Signals {
            motion: BTreeMap::from([(1, 4)]),
            audio: AudioEvents {
                gunshots: vec![interval(30.0, 30.5)],
                laughter: vec![interval(5.0, 7.0)],
                loud_peaks: vec![15.0],
            },
            shot_boundaries: vec![42.0],
            actions: vec![DetectedEvent::action(interval(1.0, 1.4), "fight", 0.9)],
        };
        let events = collect_events(&signals, 60.0, 30);
        let starts: Vec<f64> = events.iter().map(|e| e.start()).collect();
        assert_eq!(starts, vec![1.0, 5.0, 15.0, 30.0, 42.0, 60.0]);

        let anchors: Vec<u64> = segment_clips(&events, 8.0).iter().map(|s| s.anchor).collect();
        assert_eq!(anchors, vec![1, 5, 30, 42, 60]);
    }

    #[test]
    fn test_evidence_rules() {
        let segment = Segment::anchored(120, 8.0).unwrap();
        let events = vec![
            DetectedEvent::at(Modality::LoudPeak, 120.0).unwrap(),
            DetectedEvent::at(Modality::LoudPeak, 128.0).unwrap(),
            DetectedEvent::at(Modality::LoudPeak, 128.5).unwrap(),
            DetectedEvent::new(Modality::Gunshot, interval(119.0, 120.5)),
            DetectedEvent::new(Modality::Laughter, interval(128.0, 129.0)),
        ];
        let evidence = evidence_for(&segment, &events);
        assert_eq!(evidence.len(), 3);
        assert!(evidence.iter().all(|e| e.start() != 128.5));
        assert!(evidence.iter().all(|e| e.modality != Modality::Laughter));
    }
}
