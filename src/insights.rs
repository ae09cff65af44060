//! Read-model derived from a completed session.
//!
//! Everything here is recomputed from `(trials, scoring)` on each call. The scoring engine
//! indexes trials within the scored (non-practice) subset; this module maps those indices
//! back onto the original trial array so every `TrialRef` points at the real trial.

use crate::indicators::{
    descriptor, CiCode, FlagKind, IndicatorCategory, IndicatorCode,
    ALL_INDICATORS,
};
use crate::session::SessionResult;
use crate::util::{mean, median, nearest_rank, round2, std_dev};
use itertools::Itertools;
use serde::Serialize;
use std::collections::BTreeMap;

pub const HISTOGRAM_BINS: usize = 10;
pub const TOP_N: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialRef {
    /// Index into the session's full trial list, practice included.
    pub trial_index: usize,
    pub stimulus_word: String,
    pub response: String,
    pub reaction_time_ms: u64,
    pub timed_out: bool,
    pub flags: Vec<FlagKind>,
    pub indicators: Vec<CiCode>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtStats {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub p90: f64,
    pub min: f64,
    pub max: f64,
    pub spikiness: f64,
    pub std_dev: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBin {
    pub start: f64,
    pub end: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Histogram {
    pub bins: Vec<HistogramBin>,
}

impl Histogram {
    pub fn counts(&self) -> Vec<usize> {
        self.bins.iter().map(|b| b.count).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseCluster {
    pub response: String,
    pub size: usize,
    pub trial_indices: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlagCount {
    pub code: IndicatorCode,
    pub label: &'static str,
    pub category: IndicatorCategory,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInsights {
    pub session_id: String,
    pub session_fingerprint: String,
    pub scored_count: usize,
    pub practice_count: usize,
    pub empty_count: usize,
    pub timeout_count: usize,
    pub rt: RtStats,
    pub histogram: Histogram,
    pub top_slow: Vec<TrialRef>,
    pub top_fast: Vec<TrialRef>,
    pub non_empty_response_rate: f64,
    pub response_clusters: Vec<ResponseCluster>,
    pub flag_counts: Vec<FlagCount>,
    pub flagged_other_count: usize,
    pub quality_index: u32,
    pub trial_refs: BTreeMap<usize, TrialRef>,
}

impl SessionInsights {
    pub fn trial(&self, original_index: usize) -> Option<&TrialRef> {
        self.trial_refs.get(&original_index)
    }
}

/// 100 minus penalties for failures and other flags, clamped to `[0, 100]`.
pub fn quality_index(empty_count: usize, timeout_count: usize, flagged_other_count: usize) -> u32 {
    let penalty = (empty_count as u64)
        .saturating_mul(5)
        .saturating_add((timeout_count as u64).saturating_mul(10))
        .saturating_add((flagged_other_count as u64).saturating_mul(2));
    100u64.saturating_sub(penalty) as u32
}

/// Ten equal-width bins over `[min, max]`, last bin closed.
/// A single value, or a sample with no spread, gets one synthetic bin `[v, v + 1)`.
pub fn build_histogram(rts: &[f64]) -> Histogram {
    let Some((min, max)) = rts.iter().copied().minmax_by(|a, b| a.total_cmp(b)).into_option()
    else {
        return Histogram::default();
    };

    if max == min {
        return Histogram {
            bins: vec![HistogramBin {
                start: min,
                end: min + 1.0,
                count: rts.len(),
            }],
        };
    }

    let width = (max - min) / HISTOGRAM_BINS as f64;
    let mut bins: Vec<HistogramBin> = (0..HISTOGRAM_BINS)
        .map(|i| HistogramBin {
            start: min + width * i as f64,
            end: if i + 1 == HISTOGRAM_BINS {
                max
            } else {
                min + width * (i + 1) as f64
            },
            count: 0,
        })
        .collect();

    for rt in rts {
        let idx = (((rt - min) / width).floor() as usize).min(HISTOGRAM_BINS - 1);
        bins[idx].count += 1;
    }
    Histogram { bins }
}

fn rt_stats(rts: &[f64]) -> RtStats {
    if rts.is_empty() {
        return RtStats::default();
    }
    let min = rts.iter().copied().fold(f64::INFINITY, f64::min);
    let max = rts.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    RtStats {
        count: rts.len(),
        mean: round2(mean(rts).unwrap_or(0.0)),
        median: median(rts).unwrap_or(0.0),
        p90: nearest_rank(rts, 0.9).unwrap_or(0.0),
        min,
        max,
        spikiness: max - min,
        std_dev: round2(std_dev(rts).unwrap_or(0.0)),
    }
}

pub fn build_insights(session: &SessionResult) -> SessionInsights {
    let trials = &session.trials;

    // scored position -> original index
    let scored_positions: Vec<usize> = trials
        .iter()
        .enumerate()
        .filter(|(_, t)| !t.is_practice)
        .map(|(i, _)| i)
        .collect();

    let mut flags_by_original: BTreeMap<usize, Vec<FlagKind>> = BTreeMap::new();
    for tf in &session.scoring.trial_flags {
        match scored_positions.get(tf.trial_index) {
            Some(&original) => {
                flags_by_original.insert(original, tf.flags.clone());
            }
            None => tracing::warn!(
                index = tf.trial_index,
                scored = scored_positions.len(),
                "scoring refers to a trial outside the scored subset"
            ),
        }
    }

    let ci_codes = session.ci_codes();
    let trial_refs: BTreeMap<usize, TrialRef> = scored_positions
        .iter()
        .enumerate()
        .map(|(scored_idx, &original)| {
            let t = &trials[original];
            let tref = TrialRef {
                trial_index: original,
                stimulus_word: t.stimulus_word.clone(),
                response: t.response.clone(),
                reaction_time_ms: t.reaction_time_ms,
                timed_out: t.is_timed_out(),
                flags: flags_by_original.get(&original).cloned().unwrap_or_default(),
                indicators: ci_codes.get(scored_idx).cloned().unwrap_or_default(),
            };
            (original, tref)
        })
        .collect();

    let scored_count = scored_positions.len();
    let answered: Vec<&TrialRef> = trial_refs.values().filter(|r| !r.timed_out).collect();
    let rts: Vec<f64> = answered.iter().map(|r| r.reaction_time_ms as f64).collect();

    let top_slow: Vec<TrialRef> = answered
        .iter()
        .sorted_by(|a, b| {
            b.reaction_time_ms
                .cmp(&a.reaction_time_ms)
                .then(a.trial_index.cmp(&b.trial_index))
        })
        .take(TOP_N)
        .map(|r| (*r).clone())
        .collect();
    let top_fast: Vec<TrialRef> = answered
        .iter()
        .sorted_by(|a, b| {
            a.reaction_time_ms
                .cmp(&b.reaction_time_ms)
                .then(a.trial_index.cmp(&b.trial_index))
        })
        .take(TOP_N)
        .map(|r| (*r).clone())
        .collect();

    let non_empty = answered
        .iter()
        .filter(|r| !r.response.trim().is_empty())
        .count();
    let non_empty_response_rate = if scored_count == 0 {
        0.0
    } else {
        non_empty as f64 / scored_count as f64
    };

    let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for r in trial_refs.values() {
        if !r.response.trim().is_empty() {
            groups.entry(r.response.as_str()).or_default().push(r.trial_index);
        }
    }
    let response_clusters: Vec<ResponseCluster> = groups
        .into_iter()
        .filter(|(_, idx)| idx.len() >= 2)
        .map(|(response, trial_indices)| ResponseCluster {
            response: response.to_string(),
            size: trial_indices.len(),
            trial_indices,
        })
        .sorted_by(|a, b| b.size.cmp(&a.size).then_with(|| a.response.cmp(&b.response)))
        .collect();

    let count_code = |code: IndicatorCode| -> usize {
        trial_refs
            .values()
            .filter(|r| match code {
                IndicatorCode::Flag(f) => r.flags.contains(&f),
                IndicatorCode::Ci(c) => r.indicators.contains(&c),
            })
            .count()
    };
    let flag_counts: Vec<FlagCount> = ALL_INDICATORS
        .iter()
        .map(|&code| {
            let d = descriptor(code);
            FlagCount {
                code,
                label: d.label,
                category: d.category,
                count: count_code(code),
            }
        })
        .collect();

    let empty_count = count_code(FlagKind::EmptyResponse.into());
    let timeout_count = count_code(FlagKind::Timeout.into());
    let flagged_other_count = trial_refs
        .values()
        .filter(|r| r.flags.iter().any(|f| !f.is_failure_to_respond()))
        .count();

    SessionInsights {
        session_id: session.id.clone(),
        session_fingerprint: session.session_fingerprint.clone(),
        scored_count,
        practice_count: trials.len() - scored_count,
        empty_count,
        timeout_count,
        rt: rt_stats(&rts),
        histogram: build_histogram(&rts),
        top_slow,
        top_fast,
        non_empty_response_rate,
        response_clusters,
        flag_counts,
        flagged_other_count,
        quality_index: quality_index(empty_count, timeout_count, flagged_other_count),
        trial_refs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::compute_ci_codes;
    use crate::scoring::score_session;
    use crate::session::fixtures::{completed_session, practice, trial};
    use crate::session::Trial;

    fn session_with(trials: Vec<Trial>) -> SessionResult {
        let mut s = completed_session();
        s.scoring = score_session(&trials);
        s.candidate_complexes = compute_ci_codes(&trials);
        s.trials = trials;
        s
    }

    #[test]
    fn remaps_scored_indices_past_practice_trials() {
        let mut edited = trial("green", 1, "grass", 600);
        edited.backspace_count = 5;
        let trials = vec![
            practice("tree", "leaf", 700),
            trial("head", 0, "hat", 500),
            practice("sun", "moon", 700),
            practice("chair", "table", 700),
            edited,
            trial("water", 2, "", 800),
        ];
        let insights = build_insights(&session_with(trials));

        assert_eq!(insights.scored_count, 3);
        assert_eq!(insights.practice_count, 3);
        assert_eq!(
            insights.trial_refs.keys().copied().collect::<Vec<_>>(),
            vec![1, 4, 5]
        );
        // scoring saw "green" at scored index 1; it lives at original index 4
        let green = insights.trial(4).unwrap();
        assert_eq!(green.stimulus_word, "green");
        assert_eq!(green.flags, vec![FlagKind::HighEditing]);
        let water = insights.trial(5).unwrap();
        assert_eq!(water.flags, vec![FlagKind::EmptyResponse]);
        assert_eq!(water.indicators, vec![CiCode::Failure]);
        assert!(insights.trial(0).is_none());
        assert!(insights.trial(1).unwrap().flags.is_empty());
    }

    #[test]
    fn top_lists_use_original_indices() {
        let trials = vec![
            practice("tree", "leaf", 99_000),
            trial("a", 0, "x", 300),
            trial("b", 1, "y", 900),
            practice("sun", "moon", 1),
            trial("c", 2, "z", 600),
        ];
        let insights = build_insights(&session_with(trials));
        let slow: Vec<usize> = insights.top_slow.iter().map(|r| r.trial_index).collect();
        let fast: Vec<usize> = insights.top_fast.iter().map(|r| r.trial_index).collect();
        assert_eq!(slow, vec![2, 4, 1]);
        assert_eq!(fast, vec![1, 4, 2]);
    }

    #[test]
    fn top_lists_cap_at_five_and_skip_timeouts() {
        let mut trials: Vec<Trial> = (0..8)
            .map(|i| trial("w", i, &format!("r{i}"), 400 + i as u64 * 10))
            .collect();
        trials[7].timed_out = Some(true);
        let insights = build_insights(&session_with(trials));
        assert_eq!(insights.top_slow.len(), 5);
        assert_eq!(insights.top_slow[0].trial_index, 6);
        assert!(insights.top_fast.iter().all(|r| !r.timed_out));
    }

    #[test]
    fn percentiles_match_reference_values() {
        let trials: Vec<Trial> = (1..=10)
            .map(|i| trial("w", i, &format!("r{i}"), i as u64 * 100))
            .collect();
        let insights = build_insights(&session_with(trials));
        assert_eq!(insights.rt.p90, 900.0);
        assert_eq!(insights.rt.median, 550.0);
        assert_eq!(insights.rt.spikiness, 900.0);

        let trials = vec![
            trial("a", 0, "x", 420),
            trial("b", 1, "y", 380),
            trial("c", 2, "z", 510),
        ];
        let insights = build_insights(&session_with(trials));
        assert_eq!(insights.rt.median, 420.0);
        assert_eq!(insights.rt.p90, 510.0);
    }

    #[test]
    fn median_excludes_timeouts() {
        let mut t = trial("c", 2, "", 10_000);
        t.timed_out = Some(true);
        let trials = vec![trial("a", 0, "x", 400), trial("b", 1, "y", 600), t];
        let insights = build_insights(&session_with(trials));
        assert_eq!(insights.rt.median, 500.0);
        assert_eq!(insights.rt.count, 2);
        assert_eq!(insights.timeout_count, 1);
    }

    #[test]
    fn histogram_counts_every_rt_once() {
        let rts: Vec<f64> = vec![100., 150., 199., 250., 550., 999., 1000., 1000.];
        let h = build_histogram(&rts);
        assert_eq!(h.bins.len(), HISTOGRAM_BINS);
        assert_eq!(h.counts().iter().sum::<usize>(), rts.len());
        assert_eq!(h.bins[0].start, 100.0);
        assert_eq!(h.bins[9].end, 1000.0);
        // max lands in the last bin
        assert_eq!(h.bins[9].count, 3);
    }

    #[test]
    fn histogram_edge_cases() {
        assert!(build_histogram(&[]).bins.is_empty());
        let single = build_histogram(&[432.0]);
        assert_eq!(
            single.bins,
            vec![HistogramBin {
                start: 432.0,
                end: 433.0,
                count: 1
            }]
        );
        let flat = build_histogram(&[500.0, 500.0, 500.0]);
        assert_eq!(flat.counts(), vec![3]);
    }

    #[test]
    fn histogram_sums_to_non_timeout_scored_trials() {
        let insights = build_insights(&completed_session());
        assert_eq!(
            insights.histogram.counts().iter().sum::<usize>(),
            insights.rt.count
        );
        assert_eq!(insights.rt.count, 4);
    }

    #[test]
    fn redacted_session_keeps_failure_counts() {
        use crate::export::{build_bundle, PrivacyMode};

        let session = completed_session();
        let bundle = build_bundle(&session, None, PrivacyMode::Redacted, "now");
        let failures = |insights: &SessionInsights| {
            insights
                .flag_counts
                .iter()
                .find(|fc| fc.code == IndicatorCode::Ci(CiCode::Failure))
                .map(|fc| fc.count)
        };
        let redacted = build_insights(&bundle.session);
        assert_eq!(failures(&redacted), Some(1));
        assert_eq!(failures(&redacted), failures(&build_insights(&session)));
    }

    #[test]
    fn non_empty_rate() {
        let insights = build_insights(&completed_session());
        assert_eq!(insights.non_empty_response_rate, 0.75);
        let empty = build_insights(&session_with(vec![practice("a", "b", 1)]));
        assert_eq!(empty.non_empty_response_rate, 0.0);
        assert_eq!(empty.quality_index, 100);
        assert!(empty.histogram.bins.is_empty());
    }

    #[test]
    fn clusters_sorted_by_size_then_text() {
        let trials = vec![
            trial("a", 0, "sun", 500),
            trial("b", 1, "moon", 500),
            trial("c", 2, "moon", 500),
            practice("p", "sun", 500),
            trial("d", 3, "sun", 500),
            trial("e", 4, "star", 500),
            trial("f", 5, "Star", 500),
            trial("g", 6, "moon", 500),
            trial("h", 7, "sun", 500),
            trial("i", 8, "", 500),
            trial("j", 9, "", 500),
        ];
        let insights = build_insights(&session_with(trials));
        let summary: Vec<(&str, usize)> = insights
            .response_clusters
            .iter()
            .map(|c| (c.response.as_str(), c.size))
            .collect();
        // "Star"/"star" differ by case; empty responses are not a cluster
        assert_eq!(summary, vec![("moon", 3), ("sun", 3)]);
        assert_eq!(insights.response_clusters[0].trial_indices, vec![1, 2, 7]);
        assert_eq!(insights.response_clusters[1].trial_indices, vec![0, 4, 8]);
    }

    #[test]
    fn flag_table_and_quality() {
        let mut timed = trial("c", 2, "", 9000);
        timed.timed_out = Some(true);
        let mut edited = trial("d", 3, "x", 150);
        edited.backspace_count = 6;
        let trials = vec![
            trial("a", 0, "", 500),
            trial("b", 1, "y", 500),
            timed,
            edited,
        ];
        let insights = build_insights(&session_with(trials));
        assert_eq!(insights.empty_count, 1);
        assert_eq!(insights.timeout_count, 1);
        // fast + high editing on one trial counts once
        assert_eq!(insights.flagged_other_count, 1);
        assert_eq!(insights.quality_index, 100 - 5 - 10 - 2);

        let table: BTreeMap<&str, usize> = insights
            .flag_counts
            .iter()
            .map(|fc| (fc.code.as_str(), fc.count))
            .collect();
        assert_eq!(table.len(), ALL_INDICATORS.len());
        assert_eq!(table["timing_outlier_fast"], 1);
        assert_eq!(table["high_editing"], 1);
        assert_eq!(table["F"], 2);
    }

    #[test]
    fn quality_index_is_clamped_and_monotone() {
        assert_eq!(quality_index(0, 0, 0), 100);
        assert_eq!(quality_index(20, 0, 0), 0);
        assert_eq!(quality_index(usize::MAX, usize::MAX, usize::MAX), 0);
        let mut last = 100;
        for n in 0..60 {
            let q = quality_index(n, n / 2, n / 3);
            assert!(q <= last);
            assert!(q <= 100);
            last = q;
        }
    }
}
