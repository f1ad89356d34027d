//! Reconciliation state and snapshots

use crate::error::KernelErrorPayload;
use crate::imports::{
    import_at, CsvImportParams, DataframeCreationData, DataframeImportParams,
    ExcelImportParams, InvalidImportMap, StepImportData,
};
use serde::{Deserialize, Serialize};

/// A replay that failed and sent the user here
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedReplayData {
    pub analysis_name: String,
    pub error: KernelErrorPayload,
}

impl FailedReplayData {
    #[must_use]
    pub fn new(analysis_name: impl Into<String>, error: KernelErrorPayload) -> Self {
        Self {
            analysis_name: analysis_name.into(),
            error,
        }
    }
}

/// Why the reconciler was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    /// A saved analysis failed to replay
    PreReplay,
    /// The user is swapping imports of the live analysis
    PostReplay,
}

/// Where the user is in the replacement of one import
#[derive(Debug, Clone, PartialEq)]
pub enum ImportScreen {
    /// Picking a file
    FileBrowser,
    /// Configuring a delimited file that failed automatic import
    CsvConfig {
        file_name: String,
        file_path: String,
        error: Option<String>,
    },
    /// Configuring a spreadsheet file
    ExcelConfig {
        file_name: String,
        file_path: String,
        error: Option<String>,
    },
    /// Picking in-memory dataframes
    DataframeSelect,
}

impl ImportScreen {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::FileBrowser => "file_browser",
            Self::CsvConfig { .. } => "csv_config",
            Self::ExcelConfig { .. } => "excel_config",
            Self::DataframeSelect => "dataframe_select",
        }
    }
}

/// What kind of source replaces an import
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceTarget {
    File,
    Dataframe,
}

/// Params being edited on a configuration screen
#[derive(Debug, Clone, PartialEq)]
pub enum ReplacementParams {
    Csv(CsvImportParams),
    Excel(ExcelImportParams),
    Dataframe(DataframeImportParams),
}

impl ReplacementParams {
    /// Recipe these params describe
    #[must_use]
    pub fn into_creation_data(self) -> DataframeCreationData {
        match self {
            Self::Csv(params) => DataframeCreationData::SimpleImport(params),
            Self::Excel(params) => DataframeCreationData::ExcelImport(params),
            Self::Dataframe(params) => DataframeCreationData::DataframeImport(params),
        }
    }
}

/// In-progress replacement of one import
#[derive(Debug, Clone, PartialEq)]
pub struct ReplacingDataframeState {
    /// Flat index of the import being replaced
    pub index: usize,
    pub screen: ImportScreen,
    /// `None` until the user touches a configuration
    pub params: Option<ReplacementParams>,
}

/// Reconciliation phase
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcilePhase {
    Loading,
    Ready,
    Replacing(ReplacingDataframeState),
    Committing,
    Done,
}

impl ReconcilePhase {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Replacing(_) => "replacing",
            Self::Committing => "committing",
            Self::Done => "done",
        }
    }
}

/// Immutable view of the reconciler
///
/// Built from persistent collections, so each transition shares structure
/// with the snapshot before it.
#[derive(Debug, Clone)]
pub struct ReconcileSnapshot {
    pub mode: ReconcileMode,
    pub phase: ReconcilePhase,
    /// Imports as loaded from the kernel
    pub original: im::Vector<StepImportData>,
    /// Imports with the user's committed replacements
    pub working: im::Vector<StepImportData>,
    /// Flat index → error for imports known to be invalid
    pub invalid_import_messages: im::OrdMap<usize, String>,
    /// Flat indexes the user replaced
    pub updated_indexes: im::OrdSet<usize>,
    /// Banner shown above the imports
    pub replay_error: Option<String>,
}

impl ReconcileSnapshot {
    pub(crate) fn loading(mode: ReconcileMode) -> Self {
        Self {
            mode,
            phase: ReconcilePhase::Loading,
            original: im::Vector::new(),
            working: im::Vector::new(),
            invalid_import_messages: im::OrdMap::new(),
            updated_indexes: im::OrdSet::new(),
            replay_error: None,
        }
    }

    /// Total imports across all steps
    #[must_use]
    pub fn import_count(&self) -> usize {
        self.working.iter().map(|step| step.imports.len()).sum()
    }

    /// Working imports as a plain vector
    #[must_use]
    pub fn working_imports(&self) -> Vec<StepImportData> {
        self.working.iter().cloned().collect()
    }

    /// Working recipe at a flat index
    #[must_use]
    pub fn import(&self, index: usize) -> Option<DataframeCreationData> {
        import_at(&self.working_imports(), index).cloned()
    }

    /// Error shown for one import
    #[must_use]
    pub fn message_for(&self, index: usize) -> Option<&str> {
        self.invalid_import_messages.get(&index).map(String::as_str)
    }

    #[must_use]
    pub fn is_updated(&self, index: usize) -> bool {
        self.updated_indexes.contains(&index)
    }

    /// Invalid imports as a map
    #[must_use]
    pub fn invalid_imports(&self) -> InvalidImportMap {
        self.invalid_import_messages
            .iter()
            .map(|(index, message)| (*index, message.clone()))
            .collect()
    }

    /// In-progress replacement, if any
    #[must_use]
    pub fn replacing(&self) -> Option<&ReplacingDataframeState> {
        match &self.phase {
            ReconcilePhase::Replacing(state) => Some(state),
            _ => None,
        }
    }
}
