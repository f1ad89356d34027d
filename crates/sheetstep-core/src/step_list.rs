//! Analysis step list
//!
//! The ordered record of kernel-confirmed steps. Only confirmed responses
//! write to it: a step whose id is already present supersedes the old entry
//! in place, anything else is appended. A successful replay replaces the
//! whole list.

use crate::types::{Step, StepId, StepSummary, StepType};
use parking_lot::RwLock;
use sheetstep_codec::{CodecError, GraphCodec, GraphParamsFrontend, ParamCodec};
use std::sync::Arc;

/// Step list shared between editing sessions
pub type SharedStepList = Arc<RwLock<AnalysisStepList>>;

/// Create an empty shared step list
#[must_use]
pub fn shared_step_list() -> SharedStepList {
    Arc::new(RwLock::new(AnalysisStepList::new()))
}

/// How a confirmed step landed in the list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepChange {
    /// New step at this position
    Appended(usize),
    /// Existing step at this position was superseded
    Superseded(usize),
}

/// Ordered, id-unique list of confirmed steps
#[derive(Debug, Clone, Default)]
pub struct AnalysisStepList {
    steps: Vec<Step>,
    revision: u64,
}

impl AnalysisStepList {
    /// Create empty list
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from steps in order; a repeated id supersedes its first occurrence
    #[must_use]
    pub fn from_steps(steps: impl IntoIterator<Item = Step>) -> Self {
        let mut list = Self::new();
        for step in steps {
            list.apply_confirmed(step);
        }
        list.revision = 0;
        list
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps in order
    #[inline]
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Bumped on every change
    #[inline]
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    #[must_use]
    pub fn get(&self, step_id: &StepId) -> Option<&Step> {
        self.steps.iter().find(|step| &step.step_id == step_id)
    }

    #[must_use]
    pub fn position(&self, step_id: &StepId) -> Option<usize> {
        self.steps.iter().position(|step| &step.step_id == step_id)
    }

    /// Record a step confirmed by the kernel
    pub fn apply_confirmed(&mut self, step: Step) -> StepChange {
        self.revision += 1;
        match self.position(&step.step_id) {
            Some(index) => {
                self.steps[index] = step;
                StepChange::Superseded(index)
            }
            None => {
                self.steps.push(step);
                StepChange::Appended(self.steps.len() - 1)
            }
        }
    }

    /// Discard every step and adopt a replayed list
    pub fn replace_all(&mut self, steps: impl IntoIterator<Item = Step>) {
        let revision = self.revision + 1;
        *self = Self::from_steps(steps);
        self.revision = revision;
    }

    /// Summaries of every step in order
    #[must_use]
    pub fn summaries(&self) -> Vec<StepSummary> {
        self.steps.iter().map(Step::summary).collect()
    }

    /// Latest step of a kind
    #[must_use]
    pub fn most_recent(&self, step_type: StepType) -> Option<&Step> {
        self.most_recent_where(step_type, |_| true)
    }

    /// Latest step of a kind matching `predicate`
    pub fn most_recent_where(
        &self,
        step_type: StepType,
        predicate: impl Fn(&Step) -> bool,
    ) -> Option<&Step> {
        self.steps
            .iter()
            .rev()
            .find(|step| step.step_type == step_type && predicate(step))
    }

    /// Import steps in order
    pub fn import_steps(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter().filter(|step| step.step_type.is_import())
    }
}

/// Decoded params of the latest graph step for `graph_id`
///
/// Used to seed an editor when the user reopens an existing graph.
pub fn find_graph_params(
    step_list: &AnalysisStepList,
    graph_id: &str,
) -> Result<Option<GraphParamsFrontend>, CodecError> {
    let step = step_list.most_recent_where(StepType::Graph, |step| {
        step.params.get("graph_id").and_then(|id| id.as_str()) == Some(graph_id)
    });
    step.map(|step| GraphCodec.from_wire_json(&step.params))
        .transpose()
}
