//! Closed indicator vocabulary shared by scoring, insights, CSV and every display surface.
//!
//! `FlagKind` comes out of the scoring engine; `CiCode` is the classic complex-indicator set
//! derived from stimulus and response text. `IndicatorCode` is their union, and
//! [`descriptor`] is the one place a code gets its label, explanation and category.

use crate::scoring::valid_reaction_times;
use crate::session::Trial;
use crate::util::median;
use serde::{Deserialize, Serialize};

/// Multiplier over the median valid reaction time beyond which a response counts as prolonged.
pub const PROLONGED_RT_FACTOR: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
    TimingOutlierSlow,
    TimingOutlierFast,
    EmptyResponse,
    RepeatedResponse,
    HighEditing,
    // older exports spelled this "timed_out"
    #[serde(alias = "timed_out")]
    Timeout,
}

impl FlagKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagKind::TimingOutlierSlow => "timing_outlier_slow",
            FlagKind::TimingOutlierFast => "timing_outlier_fast",
            FlagKind::EmptyResponse => "empty_response",
            FlagKind::RepeatedResponse => "repeated_response",
            FlagKind::HighEditing => "high_editing",
            FlagKind::Timeout => "timeout",
        }
    }

    /// Flags that describe a failure to respond rather than a quality problem.
    pub fn is_failure_to_respond(&self) -> bool {
        matches!(self, FlagKind::EmptyResponse | FlagKind::Timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CiCode {
    #[serde(rename = "F")]
    Failure,
    #[serde(rename = "MSW")]
    MultiWord,
    #[serde(rename = "RSW")]
    RepeatsStimulus,
    #[serde(rename = "PRT")]
    ProlongedRt,
    #[serde(rename = "(P)")]
    Perseveration,
}

impl CiCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CiCode::Failure => "F",
            CiCode::MultiWord => "MSW",
            CiCode::RepeatsStimulus => "RSW",
            CiCode::ProlongedRt => "PRT",
            CiCode::Perseveration => "(P)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndicatorCode {
    Flag(FlagKind),
    Ci(CiCode),
}

impl IndicatorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorCode::Flag(f) => f.as_str(),
            IndicatorCode::Ci(c) => c.as_str(),
        }
    }
}

impl From<FlagKind> for IndicatorCode {
    fn from(f: FlagKind) -> Self {
        IndicatorCode::Flag(f)
    }
}

impl From<CiCode> for IndicatorCode {
    fn from(c: CiCode) -> Self {
        IndicatorCode::Ci(c)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IndicatorCategory {
    Timing,
    Response,
    Editing,
    Complex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndicatorDescriptor {
    pub code: IndicatorCode,
    pub label: &'static str,
    pub explanation: &'static str,
    pub category: IndicatorCategory,
}

/// Every indicator in display order.
pub const ALL_INDICATORS: [IndicatorCode; 11] = [
    IndicatorCode::Flag(FlagKind::TimingOutlierSlow),
    IndicatorCode::Flag(FlagKind::TimingOutlierFast),
    IndicatorCode::Flag(FlagKind::EmptyResponse),
    IndicatorCode::Flag(FlagKind::RepeatedResponse),
    IndicatorCode::Flag(FlagKind::HighEditing),
    IndicatorCode::Flag(FlagKind::Timeout),
    IndicatorCode::Ci(CiCode::Failure),
    IndicatorCode::Ci(CiCode::MultiWord),
    IndicatorCode::Ci(CiCode::RepeatsStimulus),
    IndicatorCode::Ci(CiCode::ProlongedRt),
    IndicatorCode::Ci(CiCode::Perseveration),
];

pub fn descriptor(code: IndicatorCode) -> IndicatorDescriptor {
    use IndicatorCategory::*;
    let (label, explanation, category) = match code {
        IndicatorCode::Flag(FlagKind::TimingOutlierSlow) => (
            "Slow outlier",
            "Reaction time is far above the session median (modified z-score above 3.5).",
            Timing,
        ),
        IndicatorCode::Flag(FlagKind::TimingOutlierFast) => (
            "Fast outlier",
            "Reaction time below 200 ms, faster than a considered response allows.",
            Timing,
        ),
        IndicatorCode::Flag(FlagKind::EmptyResponse) => (
            "Empty response",
            "The response was submitted without any text.",
            Response,
        ),
        IndicatorCode::Flag(FlagKind::RepeatedResponse) => (
            "Repeated response",
            "The same response was already given to an earlier stimulus.",
            Response,
        ),
        IndicatorCode::Flag(FlagKind::HighEditing) => (
            "Heavy editing",
            "More than three backspaces were used while answering.",
            Editing,
        ),
        IndicatorCode::Flag(FlagKind::Timeout) => (
            "Timed out",
            "No response was submitted before the trial time limit.",
            Timing,
        ),
        IndicatorCode::Ci(CiCode::Failure) => (
            "Failure to respond",
            "No usable response: the trial timed out or the answer was empty.",
            Complex,
        ),
        IndicatorCode::Ci(CiCode::MultiWord) => (
            "Multi-word response",
            "The response contains more than one word.",
            Complex,
        ),
        IndicatorCode::Ci(CiCode::RepeatsStimulus) => (
            "Repeats stimulus",
            "The response is the stimulus word itself.",
            Complex,
        ),
        IndicatorCode::Ci(CiCode::ProlongedRt) => (
            "Prolonged reaction time",
            "Reaction time exceeds 1.5 times the session median.",
            Complex,
        ),
        IndicatorCode::Ci(CiCode::Perseveration) => (
            "Perseveration",
            "The response echoes the previous stimulus or response.",
            Complex,
        ),
    };
    IndicatorDescriptor {
        code,
        label,
        explanation,
        category,
    }
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// CI codes for each scored (non-practice) trial, aligned with the scored subset.
pub fn compute_ci_codes(trials: &[Trial]) -> Vec<Vec<CiCode>> {
    let scored: Vec<&Trial> = trials.iter().filter(|t| !t.is_practice).collect();
    let prolonged_threshold =
        median(&valid_reaction_times(&scored)).map(|m| m * PROLONGED_RT_FACTOR);

    let mut out = Vec::with_capacity(scored.len());
    let mut previous: Option<&Trial> = None;

    for trial in scored {
        let mut codes = Vec::new();
        let response = normalize(&trial.response);

        if trial.is_timed_out() || response.is_empty() {
            codes.push(CiCode::Failure);
        } else {
            if response.split_whitespace().count() > 1 {
                codes.push(CiCode::MultiWord);
            }
            if response == normalize(&trial.stimulus_word) {
                codes.push(CiCode::RepeatsStimulus);
            }
            if let Some(threshold) = prolonged_threshold {
                if trial.reaction_time_ms as f64 > threshold {
                    codes.push(CiCode::ProlongedRt);
                }
            }
            if let Some(prev) = previous {
                if response == normalize(&prev.response)
                    || response == normalize(&prev.stimulus_word)
                {
                    codes.push(CiCode::Perseveration);
                }
            }
        }

        out.push(codes);
        previous = Some(trial);
    }
    out
}
