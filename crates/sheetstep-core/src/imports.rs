//! Import recipes
//!
//! An import recipe is the reproducible description of how one dataframe
//! entered the analysis. Recipes are grouped per import step
//! ([`StepImportData`]); errors about them are keyed by *flat index*, the
//! position of a recipe when all steps' recipes are concatenated in order.

use crate::types::{StepId, StepType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const EXCEL_EXTENSIONS: [&str; 3] = ["xlsx", "xlsm", "xls"];

/// Params of a delimited-file import
///
/// Option vectors are per file; `None` leaves the choice to the kernel.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CsvImportParams {
    pub file_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimeters: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encodings: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimals: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skiprows: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_bad_lines: Option<Vec<bool>>,
}

impl CsvImportParams {
    /// Plain import of one file, every option left to the kernel
    #[must_use]
    pub fn for_file(path: impl Into<String>) -> Self {
        Self {
            file_names: vec![path.into()],
            ..Self::default()
        }
    }

    /// Explicit defaults shown on the configuration screen
    #[must_use]
    pub fn config_defaults(path: impl Into<String>) -> Self {
        Self {
            file_names: vec![path.into()],
            delimeters: Some(vec![",".to_string()]),
            encodings: Some(vec!["default".to_string()]),
            decimals: Some(vec![".".to_string()]),
            skiprows: Some(vec![0]),
            error_bad_lines: Some(vec![true]),
        }
    }
}

/// Params of a spreadsheet-file import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcelImportParams {
    pub file_name: String,
    pub sheet_names: Vec<String>,
    pub has_headers: bool,
    pub skiprows: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimal: Option<String>,
}

impl ExcelImportParams {
    /// Defaults shown on the configuration screen
    #[must_use]
    pub fn config_defaults(path: impl Into<String>) -> Self {
        Self {
            file_name: path.into(),
            sheet_names: Vec::new(),
            has_headers: true,
            skiprows: 0,
            decimal: Some(".".to_string()),
        }
    }
}

/// Params of an in-memory dataframe import
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataframeImportParams {
    pub df_names: Vec<String>,
}

/// One import recipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step_type", content = "params", rename_all = "snake_case")]
pub enum DataframeCreationData {
    SimpleImport(CsvImportParams),
    ExcelImport(ExcelImportParams),
    DataframeImport(DataframeImportParams),
}

impl DataframeCreationData {
    /// Step kind that executes this recipe
    #[must_use]
    pub fn step_type(&self) -> StepType {
        match self {
            Self::SimpleImport(_) => StepType::SimpleImport,
            Self::ExcelImport(_) => StepType::ExcelImport,
            Self::DataframeImport(_) => StepType::DataframeImport,
        }
    }

    /// Whether the recipe reads from the file system
    #[inline]
    #[must_use]
    pub fn is_file_based(&self) -> bool {
        match self {
            Self::SimpleImport(_) | Self::ExcelImport(_) => true,
            Self::DataframeImport(_) => false,
        }
    }

    /// Files read by this recipe
    #[must_use]
    pub fn file_paths(&self) -> Vec<&str> {
        match self {
            Self::SimpleImport(params) => params.file_names.iter().map(String::as_str).collect(),
            Self::ExcelImport(params) => vec![params.file_name.as_str()],
            Self::DataframeImport(_) => Vec::new(),
        }
    }
}

/// Import recipes of one import step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepImportData {
    pub step_id: StepId,
    pub imports: Vec<DataframeCreationData>,
}

impl StepImportData {
    /// Create new step import data
    #[inline]
    #[must_use]
    pub fn new(step_id: impl Into<StepId>, imports: Vec<DataframeCreationData>) -> Self {
        Self {
            step_id: step_id.into(),
            imports,
        }
    }
}

/// Flat import index → human readable error
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvalidImportMap(BTreeMap<usize, String>);

impl InvalidImportMap {
    /// Create empty map
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(&index).map(String::as_str)
    }

    pub fn insert(&mut self, index: usize, message: impl Into<String>) {
        self.0.insert(index, message.into());
    }

    pub fn remove(&mut self, index: usize) -> Option<String> {
        self.0.remove(&index)
    }

    /// Entries in index order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.0.iter().map(|(index, message)| (*index, message.as_str()))
    }
}

impl FromIterator<(usize, String)> for InvalidImportMap {
    fn from_iter<I: IntoIterator<Item = (usize, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Number of recipes across all steps
#[must_use]
pub fn import_count(data: &[StepImportData]) -> usize {
    data.iter().map(|step| step.imports.len()).sum()
}

/// Recipe at a flat index
#[must_use]
pub fn import_at(data: &[StepImportData], index: usize) -> Option<&DataframeCreationData> {
    data.iter().flat_map(|step| step.imports.iter()).nth(index)
}

/// Whether a path names a spreadsheet file
#[must_use]
pub fn is_excel_path(path: &str) -> bool {
    std::path::Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            EXCEL_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn two_step_analysis() -> Vec<StepImportData> {
        vec![
            StepImportData::new(
                "s1",
                vec![
                    DataframeCreationData::SimpleImport(CsvImportParams::for_file("a.csv")),
                    DataframeCreationData::SimpleImport(CsvImportParams::for_file("b.csv")),
                ],
            ),
            StepImportData::new(
                "s2",
                vec![DataframeCreationData::DataframeImport(DataframeImportParams {
                    df_names: vec!["df".to_string()],
                })],
            ),
        ]
    }

    #[test]
    fn recipe_wire_shape() {
        let recipe = DataframeCreationData::SimpleImport(CsvImportParams::for_file("a.csv"));
        assert_eq!(
            serde_json::to_value(&recipe).unwrap(),
            json!({"step_type": "simple_import", "params": {"file_names": ["a.csv"]}})
        );

        let parsed: DataframeCreationData = serde_json::from_value(json!({
            "step_type": "excel_import",
            "params": {
                "file_name": "b.xlsx",
                "sheet_names": ["Sheet1"],
                "has_headers": true,
                "skiprows": 0
            }
        }))
        .unwrap();
        assert_eq!(parsed.step_type(), StepType::ExcelImport);
        assert_eq!(parsed.file_paths(), vec!["b.xlsx"]);
    }

    #[test]
    fn flat_indexing_spans_steps() {
        let data = two_step_analysis();
        assert_eq!(import_count(&data), 3);
        assert!(matches!(
            import_at(&data, 2),
            Some(DataframeCreationData::DataframeImport(_))
        ));
        assert!(import_at(&data, 3).is_none());
    }

    #[test]
    fn invalid_map_uses_string_keys_on_the_wire() {
        let map: InvalidImportMap = [(0, "missing".to_string())].into_iter().collect();
        assert_eq!(serde_json::to_value(&map).unwrap(), json!({"0": "missing"}));

        let parsed: InvalidImportMap = serde_json::from_value(json!({"2": "gone"})).unwrap();
        assert_eq!(parsed.get(2), Some("gone"));
    }

    #[test]
    fn excel_paths() {
        assert!(is_excel_path("/data/report.XLSX"));
        assert!(is_excel_path("book.xlsm"));
        assert!(!is_excel_path("data.csv"));
        assert!(!is_excel_path("xlsx"));
    }
}
