use crate::indicators::FlagKind;
use crate::session::Trial;
use crate::util::{mad, mean, median, round2, std_dev};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const SCORING_VERSION: &str = "scoring_v2_mad_3.5";

/// Modified z-score above which a reaction time is a slow outlier.
pub const SLOW_Z_THRESHOLD: f64 = 3.5;
pub const MODIFIED_Z_CONSTANT: f64 = 0.6745;
/// Reaction times below this are always fast outliers.
pub const FAST_RT_MS: u64 = 200;
/// The slow check needs at least this many valid reaction times.
pub const MIN_SAMPLE_FOR_SLOW: usize = 5;
pub const HIGH_EDITING_BACKSPACES: u32 = 3;

/// Flags for one scored trial. `trial_index` indexes the scored (non-practice) subset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialFlags {
    pub trial_index: usize,
    pub flags: Vec<FlagKind>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringSummary {
    pub total_trials: usize,
    pub mean_rt: f64,
    pub median_rt: f64,
    pub std_dev_rt: f64,
    pub empty_count: usize,
    pub repeated_count: usize,
    pub outlier_count: usize,
    pub high_editing_count: usize,
    pub timeout_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionScoring {
    pub trial_flags: Vec<TrialFlags>,
    pub summary: ScoringSummary,
}

/// Reaction times of trials that produced a usable answer: not timed out, not empty.
pub fn valid_reaction_times(scored: &[&Trial]) -> Vec<f64> {
    scored
        .iter()
        .filter(|t| !t.is_timed_out() && !t.is_empty_response())
        .map(|t| t.reaction_time_ms as f64)
        .collect()
}

fn push_flag(flags: &mut Vec<FlagKind>, flag: FlagKind) {
    if !flags.contains(&flag) {
        flags.push(flag);
    }
}

/// Scores a trial list. Practice trials are dropped first and never reach the output.
pub fn score_session(trials: &[Trial]) -> SessionScoring {
    let scored: Vec<&Trial> = trials.iter().filter(|t| !t.is_practice).collect();
    if scored.is_empty() {
        return SessionScoring::default();
    }

    let valid = valid_reaction_times(&scored);
    let center = median(&valid).unwrap_or(0.0);
    let spread = mad(&valid).unwrap_or(0.0);
    let slow_check = valid.len() >= MIN_SAMPLE_FOR_SLOW && spread > 0.0;

    let mut seen_responses: HashSet<String> = HashSet::new();
    let mut trial_flags = Vec::with_capacity(scored.len());

    for (idx, trial) in scored.iter().enumerate() {
        let mut flags = Vec::new();

        if trial.is_timed_out() {
            push_flag(&mut flags, FlagKind::Timeout);
        } else if trial.is_empty_response() {
            push_flag(&mut flags, FlagKind::EmptyResponse);
        } else {
            let normalized = trial.response.trim().to_lowercase();
            if !seen_responses.insert(normalized) {
                push_flag(&mut flags, FlagKind::RepeatedResponse);
            }

            let rt = trial.reaction_time_ms as f64;
            if slow_check {
                let z = MODIFIED_Z_CONSTANT * (rt - center) / spread;
                if z > SLOW_Z_THRESHOLD {
                    push_flag(&mut flags, FlagKind::TimingOutlierSlow);
                }
            }
            if trial.reaction_time_ms < FAST_RT_MS {
                push_flag(&mut flags, FlagKind::TimingOutlierFast);
            }
        }

        if trial.backspace_count > HIGH_EDITING_BACKSPACES {
            push_flag(&mut flags, FlagKind::HighEditing);
        }

        trial_flags.push(TrialFlags {
            trial_index: idx,
            flags,
        });
    }

    let rts: Vec<f64> = scored.iter().map(|t| t.reaction_time_ms as f64).collect();
    let count = |pred: fn(&FlagKind) -> bool| {
        trial_flags
            .iter()
            .filter(|tf| tf.flags.iter().any(pred))
            .count()
    };

    let summary = ScoringSummary {
        total_trials: scored.len(),
        mean_rt: round2(mean(&rts).unwrap_or(0.0)),
        median_rt: round2(median(&rts).unwrap_or(0.0)),
        std_dev_rt: round2(std_dev(&rts).unwrap_or(0.0)),
        empty_count: count(|f| *f == FlagKind::EmptyResponse),
        repeated_count: count(|f| *f == FlagKind::RepeatedResponse),
        outlier_count: count(|f| {
            matches!(
                f,
                FlagKind::TimingOutlierSlow | FlagKind::TimingOutlierFast
            )
        }),
        high_editing_count: count(|f| *f == FlagKind::HighEditing),
        timeout_count: count(|f| *f == FlagKind::Timeout),
    };

    tracing::debug!(
        total = summary.total_trials,
        median = summary.median_rt,
        mad = spread,
        slow_check,
        "scored session"
    );

    SessionScoring {
        trial_flags,
        summary,
    }
}
