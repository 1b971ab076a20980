//! Ranking, top-N selection and ranking artifacts.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use fclip_models::ScoredClip;

use crate::config::RankingConfig;
use crate::error::WorkerResult;

/// Result of the ranking stage.
#[derive(Debug, Clone, Serialize)]
pub struct RankedHighlights {
    /// Every scored clip, best first. Unscored clips stay listed with 0.
    pub ranked: Vec<ScoredClip>,
    /// Selected highlights, best first
    pub top: Vec<ScoredClip>,
    /// Manifest path when one was written
    pub manifest: Option<PathBuf>,
    /// Rank-prefixed copies of the selected clips
    pub exported: Vec<PathBuf>,
}

/// Sort by score descending, then start ascending. Stable, so equal keys
/// keep their incoming order.
pub fn rank_clips(mut clips: Vec<ScoredClip>) -> Vec<ScoredClip> {
    clips.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.start().total_cmp(&b.start()))
    });
    clips
}

/// Greedy top-N over a ranked listing, skipping unscored clips and any
/// clip starting within `min_time_gap` of one already selected.
pub fn select_top(ranked: &[ScoredClip], count: usize, min_time_gap: f64) -> Vec<ScoredClip> {
    let mut selected: Vec<ScoredClip> = Vec::new();
    for clip in ranked {
        if selected.len() >= count {
            break;
        }
        if !clip.is_rankable() {
            continue;
        }
        if selected
            .iter()
            .any(|s| (s.start() - clip.start()).abs() < min_time_gap)
        {
            debug!(clip_index = clip.clip.index, start = clip.start(), "Skipping near-duplicate start");
            continue;
        }
        selected.push(clip.clone());
    }
    selected
}

/// One manifest line per clip: `<rank>. <file> - Virality Score: <score>`.
pub fn manifest_lines(ranked: &[ScoredClip]) -> Vec<String> {
    ranked
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. {} - Virality Score: {:.3}", i + 1, c.clip.file_name(), c.score))
        .collect()
}

/// File name of an exported top clip.
pub fn export_name(rank: usize, clip: &ScoredClip) -> String {
    format!("{:02}_score_{:.3}_{}", rank, clip.score, clip.clip.file_name())
}

pub async fn write_manifest(path: &Path, ranked: &[ScoredClip]) -> WorkerResult<()> {
    let mut body = manifest_lines(ranked).join("\n");
    body.push('\n');
    tokio::fs::write(path, body).await?;
    info!(path = %path.display(), clips = ranked.len(), "Ranking manifest written");
    Ok(())
}

/// Copy `top` into `dir`, each prefixed with its rank in `ranked`.
pub async fn export_top(dir: &Path, top: &[ScoredClip], ranked: &[ScoredClip]) -> WorkerResult<Vec<PathBuf>> {
    tokio::fs::create_dir_all(dir).await?;

    let mut exported = Vec::with_capacity(top.len());
    for clip in top {
        let rank = ranked
            .iter()
            .position(|r| r.clip.index == clip.clip.index)
            .map(|p| p + 1)
            .unwrap_or(exported.len() + 1);
        let target = dir.join(export_name(rank, clip));
        tokio::fs::copy(clip.clip.path(), &target).await?;
        exported.push(target);
    }
    info!(dir = %dir.display(), clips = exported.len(), "Top clips exported");
    Ok(exported)
}

/// Rank scored clips, select the top-N, and write the configured artifacts
/// under `output_dir`.
pub async fn finalize_ranking(
    scored: Vec<ScoredClip>,
    output_dir: &Path,
    config: &RankingConfig,
) -> WorkerResult<RankedHighlights> {
    let ranked = rank_clips(scored);
    let top = select_top(&ranked, config.top_clip_count, config.min_time_gap);

    let manifest = match &config.manifest_name {
        Some(name) => {
            let path = output_dir.join(name);
            write_manifest(&path, &ranked).await?;
            Some(path)
        }
        None => None,
    };

    let exported = match &config.export_top_dir {
        Some(dir) => export_top(dir, &top, &ranked).await?,
        None => Vec::new(),
    };

    info!(ranked = ranked.len(), selected = top.len(), "Ranking complete");
    Ok(RankedHighlights {
        ranked,
        top,
        manifest,
        exported,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fclip_models::{clip_file_name, MaterializedClip, ScoreBreakdown, ScoreStatus, Segment};

    fn clip(index: usize, anchor: u64, score: f64) -> ScoredClip {
        let segment = Segment::anchored(anchor, 8.0).unwrap();
        let materialized = MaterializedClip {
            index,
            segment,
            path: PathBuf::from(clip_file_name(index, &segment, "mp4")),
            evidence: vec![],
        };
        let mut scored = ScoredClip::scored(materialized, ScoreBreakdown::default());
        scored.score = score;
        scored
    }

    fn starts(clips: &[ScoredClip]) -> Vec<f64> {
        clips.iter().map(|c| c.start()).collect()
    }

    #[test]
    fn test_rank_by_score_then_start() {
        let ranked = rank_clips(vec![clip(0, 30, 5.0), clip(1, 20, 9.0), clip(2, 10, 5.0)]);
        assert_eq!(starts(&ranked), vec![20.0, 10.0, 30.0]);
    }

    #[test]
    fn test_equal_scores_earlier_start_first() {
        let ranked = rank_clips(vec![clip(1, 50, 1.0), clip(0, 40, 1.0)]);
        assert_eq!(starts(&ranked), vec![40.0, 50.0]);
    }

    #[test]
    fn test_select_top_skips_near_starts_and_unscored() {
        let a = clip(0, 10, 9.0);
        let mut near = clip(1, 10, 8.0);
        near.clip.segment.interval = near.clip.segment.interval.with_start(10.5).unwrap();
        let unscored = ScoredClip::unscored(clip(2, 40, 0.0).clip, ScoreStatus::InsufficientFrames, "short");
        let far = clip(3, 20, 1.0);

        let ranked = rank_clips(vec![a, near, unscored, far]);
        let top = select_top(&ranked, 20, 1.0);
        assert_eq!(starts(&top), vec![10.0, 20.0]);
        // Unscored clips are still listed
        assert_eq!(ranked.len(), 4);

        assert_eq!(select_top(&ranked, 1, 1.0).len(), 1);
    }

    #[test]
    fn test_manifest_and_export_names() {
        let ranked = rank_clips(vec![clip(0, 120, 71.4), clip(1, 5, 80.12345)]);
        let lines = manifest_lines(&ranked);
        assert_eq!(lines[0], "1. clip_2_5.00_13.00.mp4 - Virality Score: 80.123");
        assert_eq!(lines[1], "2. clip_1_120.00_128.00.mp4 - Virality Score: 71.400");
        assert_eq!(export_name(2, &ranked[1]), "02_score_71.400_clip_1_120.00_128.00.mp4");
    }

    #[tokio::test]
    async fn test_finalize_writes_manifest_and_exports() {
        let dir = tempfile::tempdir().unwrap();
        let mut clips = Vec::new();
        for (i, (anchor, score)) in [(0u64, 3.0), (30, 7.0)].iter().enumerate() {
            let mut c = clip(i, *anchor, *score);
            c.clip.path = dir.path().join(c.clip.file_name());
            tokio::fs::write(&c.clip.path, b"clip").await.unwrap();
            clips.push(c);
        }

        let config = RankingConfig {
            export_top_dir: Some(dir.path().join("top")),
            ..Default::default()
        };
        let result = finalize_ranking(clips, dir.path(), &config).await.unwrap();

        assert_eq!(result.top.len(), 2);
        let manifest = tokio::fs::read_to_string(result.manifest.unwrap()).await.unwrap();
        assert!(manifest.starts_with("1. clip_2_30.00_38.00.mp4 - Virality Score: 7.000\n"));
        assert_eq!(manifest.lines().count(), 2);
        assert!(result.exported[0].ends_with("01_score_7.000_clip_2_30.00_38.00.mp4"));
        assert!(result.exported[1].exists());
    }
}
