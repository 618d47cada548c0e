//! Release-risk decision aggregation.
//!
//! [`aggregate`] is a pure function from accumulated stage results to a
//! [`Decision`]. Each configured component reads a numeric field from the
//! final payload of its stage. A stage whose final attempt did not succeed
//! counts as missing data, even if an earlier loop iteration succeeded:
//! missing data falls back to the component's default score and marks the
//! decision degraded.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use riskgate_core::{Contribution, Decision, DecisionLabel, StageId, StageResult, DEGRADED_LABEL};

use crate::workflow::read_number;

fn default_field() -> String {
    "score".to_string()
}

fn default_weight() -> f64 {
    1.0
}

fn default_score() -> f64 {
    0.5
}

fn default_approve_threshold() -> f64 {
    0.7
}

fn default_reject_threshold() -> f64 {
    0.4
}

/// One weighted input to the decision score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponent {
    /// Component name, e.g. `policy_compliance`
    pub name: String,
    /// Stage whose payload is read
    pub stage: StageId,
    /// Payload field (dotted path)
    #[serde(default = "default_field")]
    pub field: String,
    /// Relative weight
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Score used when the stage's final attempt failed or the field is missing
    #[serde(default = "default_score")]
    pub default_score: f64,
    /// Use `1 - value`, for fields where higher means riskier
    #[serde(default)]
    pub invert: bool,
}

impl ScoreComponent {
    /// Creates a component reading `stage.score` with weight 1.
    pub fn new(name: impl Into<String>, stage: impl Into<StageId>) -> Self {
        Self {
            name: name.into(),
            stage: stage.into(),
            field: default_field(),
            weight: default_weight(),
            default_score: default_score(),
            invert: false,
        }
    }

    /// Sets the payload field.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }

    /// Sets the weight.
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Sets the default score.
    pub fn with_default_score(mut self, score: f64) -> Self {
        self.default_score = score;
        self
    }

    /// Inverts the read value.
    pub fn inverted(mut self) -> Self {
        self.invert = true;
        self
    }
}

/// Aggregation settings of a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Weighted components, in rationale order
    #[serde(default)]
    pub components: Vec<ScoreComponent>,
    /// Score at or above which the change is approved
    #[serde(default = "default_approve_threshold")]
    pub approve_threshold: f64,
    /// Score below which the change is rejected
    #[serde(default = "default_reject_threshold")]
    pub reject_threshold: f64,
    /// Final stage outcome label -> most favourable decision it allows
    #[serde(default)]
    pub outcome_caps: BTreeMap<String, DecisionLabel>,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            components: Vec::new(),
            approve_threshold: default_approve_threshold(),
            reject_threshold: default_reject_threshold(),
            outcome_caps: BTreeMap::new(),
        }
    }
}

impl AggregationConfig {
    /// Adds a component.
    pub fn with_component(mut self, component: ScoreComponent) -> Self {
        self.components.push(component);
        self
    }

    /// Sets both thresholds.
    pub fn with_thresholds(mut self, approve: f64, reject: f64) -> Self {
        self.approve_threshold = approve;
        self.reject_threshold = reject;
        self
    }

    /// Caps the decision whenever a stage ends with `label`.
    pub fn with_cap(mut self, label: impl Into<String>, cap: DecisionLabel) -> Self {
        self.outcome_caps.insert(label.into(), cap);
        self
    }
}

/// Final outcome label of a stage: its latest label if that attempt
/// succeeded, `degraded` if it never recovered, `None` if it never ran.
pub fn final_outcome_label(results: &[StageResult]) -> Option<&str> {
    results.last().map(|r| {
        if r.is_success() {
            r.outcome_label.as_str()
        } else {
            DEGRADED_LABEL
        }
    })
}

fn clamp_unit(value: f64) -> Option<f64> {
    if value.is_finite() {
        Some(value.clamp(0.0, 1.0))
    } else {
        None
    }
}

/// Computes the decision for a finished workflow.
///
/// Deterministic: the same results and configuration always produce the
/// same decision.
pub fn aggregate(
    stage_results: &BTreeMap<StageId, Vec<StageResult>>,
    config: &AggregationConfig,
) -> Decision {
    let rationale: Vec<Contribution> = config
        .components
        .iter()
        .map(|component| {
            let results = stage_results
                .get(&component.stage)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let read = results
                .last()
                .filter(|r| r.is_success())
                .and_then(|r| read_number(&r.payload, &component.field))
                .and_then(clamp_unit)
                .map(|v| if component.invert { 1.0 - v } else { v });

            Contribution {
                component: component.name.clone(),
                stage_id: component.stage.clone(),
                outcome_label: final_outcome_label(results).map(str::to_string),
                score: read.unwrap_or_else(|| clamp_unit(component.default_score).unwrap_or(0.0)),
                weight: component.weight.max(0.0),
                defaulted: read.is_none(),
            }
        })
        .collect();

    let total_weight: f64 = rationale.iter().map(|c| c.weight).sum();
    let (score, mut label) = if total_weight > 0.0 {
        let score = rationale.iter().map(|c| c.weight * c.score).sum::<f64>() / total_weight;
        let label = if score >= config.approve_threshold {
            DecisionLabel::Approve
        } else if score < config.reject_threshold {
            DecisionLabel::Reject
        } else {
            DecisionLabel::RequiresReview
        };
        (score, label)
    } else {
        // Nothing to weigh: never approve blindly
        (0.0, DecisionLabel::RequiresReview)
    };

    for results in stage_results.values() {
        if let Some(cap) = final_outcome_label(results).and_then(|l| config.outcome_caps.get(l)) {
            label = label.capped_at(*cap);
        }
    }

    Decision {
        label,
        score,
        degraded: rationale.iter().any(|c| c.defaulted),
        rationale,
    }
}
