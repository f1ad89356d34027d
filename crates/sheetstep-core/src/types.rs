//! Core types for the step engine
//!
//! Defines the units the kernel confirms and the requests that create them:
//! - Step identifiers and step kinds
//! - Confirmed steps and their summaries
//! - Edit requests (append vs. overwrite)

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;
use uuid::Uuid;

/// Kernel-facing step params
pub type KernelParams = serde_json::Value;

/// Kernel-assigned step identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(pub String);

impl StepId {
    /// Mint a fresh, sortable step id
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Borrow as str
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StepId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for StepId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Correlation id of one kernel round trip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    /// Generate new message id
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kinds of analysis steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    /// CSV / delimited file import
    SimpleImport,
    /// Spreadsheet file import
    ExcelImport,
    /// Import of dataframes already in memory
    DataframeImport,
    /// Graph configuration
    Graph,
    /// Split a text column on delimiters
    SplitTextToColumns,
    /// One-hot encode a column
    OneHotEncoding,
    /// Unpivot
    Melt,
    /// Join two dataframes
    Merge,
    /// Pivot table
    Pivot,
    /// Generated transformation code
    AiTransformation,
}

impl StepType {
    /// Wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SimpleImport => "simple_import",
            Self::ExcelImport => "excel_import",
            Self::DataframeImport => "dataframe_import",
            Self::Graph => "graph",
            Self::SplitTextToColumns => "split_text_to_columns",
            Self::OneHotEncoding => "one_hot_encoding",
            Self::Melt => "melt",
            Self::Merge => "merge",
            Self::Pivot => "pivot",
            Self::AiTransformation => "ai_transformation",
        }
    }

    /// Whether steps of this kind bring dataframes into the analysis
    #[inline]
    #[must_use]
    pub fn is_import(self) -> bool {
        matches!(
            self,
            Self::SimpleImport | Self::ExcelImport | Self::DataframeImport
        )
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A kernel-confirmed step
///
/// Never mutated in place; a later step with the same id supersedes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub step_id: StepId,
    pub step_type: StepType,
    pub params: KernelParams,
}

impl Step {
    /// Create new step
    #[inline]
    #[must_use]
    pub fn new(step_id: StepId, step_type: StepType, params: KernelParams) -> Self {
        Self {
            step_id,
            step_type,
            params,
        }
    }

    /// Reduced view of this step
    #[must_use]
    pub fn summary(&self) -> StepSummary {
        StepSummary {
            step_id: self.step_id.clone(),
            step_type: self.step_type,
            params: Some(self.params.clone()),
        }
    }
}

/// Reduced view of a step, enough to locate it by kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    pub step_id: StepId,
    pub step_type: StepType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<KernelParams>,
}

/// One edit sent to the kernel
///
/// With `step_id` the kernel overwrites that step; without it a new step is
/// appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditRequest {
    pub step_type: StepType,
    pub params: KernelParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<StepId>,
}

impl EditRequest {
    /// Request that appends a new step
    #[inline]
    #[must_use]
    pub fn append(step_type: StepType, params: KernelParams) -> Self {
        Self {
            step_type,
            params,
            step_id: None,
        }
    }

    /// Request that overwrites `step_id`
    #[inline]
    #[must_use]
    pub fn overwrite(step_type: StepType, params: KernelParams, step_id: StepId) -> Self {
        Self {
            step_type,
            params,
            step_id: Some(step_id),
        }
    }

    /// Whether the kernel should overwrite an existing step
    #[inline]
    #[must_use]
    pub fn is_overwrite(&self) -> bool {
        self.step_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn step_type_wire_names() {
        assert_eq!(
            serde_json::to_value(StepType::SplitTextToColumns).unwrap(),
            json!("split_text_to_columns")
        );
        let parsed: StepType = serde_json::from_value(json!("excel_import")).unwrap();
        assert_eq!(parsed, StepType::ExcelImport);
        assert_eq!(StepType::Graph.to_string(), "graph");
    }

    #[test]
    fn import_kinds() {
        assert!(StepType::SimpleImport.is_import());
        assert!(StepType::DataframeImport.is_import());
        assert!(!StepType::Graph.is_import());
    }

    #[test]
    fn append_request_omits_step_id() {
        let req = EditRequest::append(StepType::Graph, json!({}));
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("step_id").is_none());
        assert!(!req.is_overwrite());

        let req = EditRequest::overwrite(StepType::Graph, json!({}), StepId::from("s1"));
        assert_eq!(serde_json::to_value(&req).unwrap()["step_id"], "s1");
    }

    #[test]
    fn generated_step_ids_are_unique() {
        assert_ne!(StepId::generate(), StepId::generate());
    }
}
