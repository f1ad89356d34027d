//! Import reconciliation
//!
//! Repairs the import steps of an analysis whose files or dataframes changed,
//! then replays the whole analysis with the corrected imports.
//!
//! Phases run `Loading → Ready → (Replacing → Ready)* → Committing → Done`.
//! Each transition publishes a new immutable [`ReconcileSnapshot`]. Kernel
//! validation errors stay attached to the import they concern; replay errors
//! go to a single banner.

mod messages;
mod state;

pub use messages::{still_invalid_message, INVALID_IMPORTS_TEXT, PRE_REPLAY_IMPORT_ERROR_TEXT};
pub use state::{
    FailedReplayData, ImportScreen, ReconcileMode, ReconcilePhase, ReconcileSnapshot,
    ReplaceTarget, ReplacementParams, ReplacingDataframeState,
};

use crate::channel::MessageChannel;
use crate::config::EngineConfig;
use crate::error::{ChannelError, ReconcileError};
use crate::imports::{
    is_excel_path, CsvImportParams, DataframeCreationData, DataframeImportParams,
    ExcelImportParams, InvalidImportMap, StepImportData,
};
use crate::protocol::ReplayRequest;
use crate::step_list::SharedStepList;
use crate::types::StepId;
use std::sync::Arc;
use tokio::sync::watch;

/// Result of picking a file or submitting a configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// The replacement was written and the engine is back to `Ready`
    Committed,
    /// The user has to configure the import
    NeedsConfiguration,
    /// The configured import failed validation; the screen shows this message
    StillInvalid(String),
}

/// Result of [`ImportReconciler::finalize_and_replay`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// The analysis was replayed and the step list replaced
    Replayed { step_count: usize },
    /// Nothing was submitted; these imports need fixing first
    InvalidImports(InvalidImportMap),
}

type SnapshotSender = watch::Sender<Arc<ReconcileSnapshot>>;

/// Import reconciliation engine
pub struct ImportReconciler {
    channel: Arc<dyn MessageChannel>,
    step_list: SharedStepList,
    failed_replay: Option<FailedReplayData>,
    test_step_id: StepId,
    state: Arc<SnapshotSender>,
}

impl ImportReconciler {
    /// Engine for an analysis that failed to replay
    #[must_use]
    pub fn pre_replay(
        channel: Arc<dyn MessageChannel>,
        step_list: SharedStepList,
        failed_replay: FailedReplayData,
        config: &EngineConfig,
    ) -> Self {
        Self::new(channel, step_list, Some(failed_replay), config)
    }

    /// Engine for swapping imports of the live analysis
    #[must_use]
    pub fn post_replay(
        channel: Arc<dyn MessageChannel>,
        step_list: SharedStepList,
        config: &EngineConfig,
    ) -> Self {
        Self::new(channel, step_list, None, config)
    }

    fn new(
        channel: Arc<dyn MessageChannel>,
        step_list: SharedStepList,
        failed_replay: Option<FailedReplayData>,
        config: &EngineConfig,
    ) -> Self {
        let mode = if failed_replay.is_some() {
            ReconcileMode::PreReplay
        } else {
            ReconcileMode::PostReplay
        };
        let (state, _) = watch::channel(Arc::new(ReconcileSnapshot::loading(mode)));
        Self {
            channel,
            step_list,
            failed_replay,
            test_step_id: StepId::from(config.test_import_step_id.as_str()),
            state: Arc::new(state),
        }
    }

    /// Current snapshot
    #[must_use]
    pub fn snapshot(&self) -> Arc<ReconcileSnapshot> {
        self.state.borrow().clone()
    }

    /// Watch snapshots as they change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<ReconcileSnapshot>> {
        self.state.subscribe()
    }

    /// Fetch the imports to reconcile
    ///
    /// Pre-replay, every import is tested and the banner explains the
    /// failure. A failed fetch leaves the engine in `Loading` so it can be
    /// retried.
    pub async fn load_import_data(&mut self) -> Result<(), ReconcileError> {
        self.expect_phase("load_import_data", |phase| {
            matches!(phase, ReconcilePhase::Loading)
        })?;

        let loaded = match &self.failed_replay {
            Some(failed) => self.load_failed_analysis(failed).await,
            None => self
                .channel
                .get_imports_for_current_steps()
                .await
                .map(|imports| (imports, InvalidImportMap::new())),
        };
        let (imports, invalid) = match loaded {
            Ok(loaded) => loaded,
            Err(err) => {
                tracing::warn!(error = %err, "could not load import data");
                self.transition(|state| state.replay_error = Some(err.user_message()));
                return Err(err.into());
            }
        };

        let banner = self.failed_replay.as_ref().map(|failed| {
            if invalid.is_empty() {
                failed.error.user_text()
            } else {
                PRE_REPLAY_IMPORT_ERROR_TEXT.to_string()
            }
        });

        tracing::info!(
            open_due_to_replay_error = self.failed_replay.is_some(),
            num_invalid_imports = invalid.len(),
            num_total_imports = imports.len(),
            "opened import reconciliation"
        );

        self.transition(|state| {
            state.original = imports.iter().cloned().collect();
            state.working = imports.into_iter().collect();
            state.invalid_import_messages = owned_messages(&invalid);
            state.updated_indexes = im::OrdSet::new();
            state.replay_error = banner;
            state.phase = ReconcilePhase::Ready;
        });
        Ok(())
    }

    async fn load_failed_analysis(
        &self,
        failed: &FailedReplayData,
    ) -> Result<(Vec<StepImportData>, InvalidImportMap), ChannelError> {
        let imports = self
            .channel
            .get_imports_for_analysis(&failed.analysis_name)
            .await?;
        let invalid = self.channel.test_imports(&imports).await?;
        Ok((imports, invalid))
    }

    /// Validate a candidate set of imports without changing any state
    pub async fn test_imports(
        &self,
        candidate: &[StepImportData],
    ) -> Result<InvalidImportMap, ReconcileError> {
        Ok(self.channel.test_imports(candidate).await?)
    }

    /// Start replacing one import with a source of the same kind
    pub fn begin_replace(&mut self, index: usize) -> Result<(), ReconcileError> {
        let snapshot = self.snapshot();
        let import = snapshot
            .import(index)
            .ok_or(ReconcileError::ImportIndexOutOfRange {
                index,
                len: snapshot.import_count(),
            })?;
        let target = if import.is_file_based() {
            ReplaceTarget::File
        } else {
            ReplaceTarget::Dataframe
        };
        self.begin_replace_with(index, target)
    }

    /// Start replacing one import with a source of the given kind
    pub fn begin_replace_with(
        &mut self,
        index: usize,
        target: ReplaceTarget,
    ) -> Result<(), ReconcileError> {
        self.expect_phase("begin_replace", |phase| {
            matches!(phase, ReconcilePhase::Ready)
        })?;
        let len = self.snapshot().import_count();
        if index >= len {
            return Err(ReconcileError::ImportIndexOutOfRange { index, len });
        }

        let screen = match target {
            ReplaceTarget::File => ImportScreen::FileBrowser,
            ReplaceTarget::Dataframe => ImportScreen::DataframeSelect,
        };
        tracing::debug!(index, screen = screen.name(), "replacing import");
        self.transition(|state| {
            state.phase = ReconcilePhase::Replacing(ReplacingDataframeState {
                index,
                screen,
                params: None,
            });
        });
        Ok(())
    }

    /// Pick a file in the file browser
    ///
    /// Spreadsheets always go to configuration. A delimited file is first
    /// tried with kernel defaults and committed at once if that works.
    pub async fn select_file(
        &mut self,
        path_parts: &[String],
        file_name: &str,
    ) -> Result<ReplaceOutcome, ReconcileError> {
        let replacing = self.replacing("select_file")?;
        if replacing.screen != ImportScreen::FileBrowser {
            return Err(ReconcileError::InvalidPhase {
                operation: "select_file",
                phase: replacing.screen.name(),
            });
        }
        let index = replacing.index;

        let mut parts = path_parts.to_vec();
        parts.push(file_name.to_string());
        let file_path = self.channel.get_path_joined(&parts).await?;

        if is_excel_path(&file_path) {
            let params = ExcelImportParams::config_defaults(file_path.as_str());
            self.transition(|state| {
                state.phase = ReconcilePhase::Replacing(ReplacingDataframeState {
                    index,
                    screen: ImportScreen::ExcelConfig {
                        file_name: file_name.to_string(),
                        file_path,
                        error: None,
                    },
                    params: Some(ReplacementParams::Excel(params)),
                });
            });
            return Ok(ReplaceOutcome::NeedsConfiguration);
        }

        let candidate =
            DataframeCreationData::SimpleImport(CsvImportParams::for_file(file_path.as_str()));
        let invalid = self.test_single(&candidate).await?;
        match first_error(&invalid) {
            None => {
                self.write_replacement(index, candidate);
                Ok(ReplaceOutcome::Committed)
            }
            Some(error) => {
                tracing::debug!(index, %file_path, "default import failed, configuring");
                self.transition(|state| {
                    state.phase = ReconcilePhase::Replacing(ReplacingDataframeState {
                        index,
                        screen: ImportScreen::CsvConfig {
                            file_name: file_name.to_string(),
                            file_path,
                            error: Some(error),
                        },
                        params: None,
                    });
                });
                Ok(ReplaceOutcome::NeedsConfiguration)
            }
        }
    }

    /// Edit the params on the current configuration screen
    ///
    /// Params start from the screen's defaults. An update that changes the
    /// kind of params is rejected.
    pub fn update_replacement_params(
        &mut self,
        update: impl FnOnce(&mut ReplacementParams),
    ) -> Result<(), ReconcileError> {
        let replacing = self.replacing("update_replacement_params")?;
        let mut params = self.effective_params(&replacing, "update_replacement_params")?;
        update(&mut params);
        if !params_fit_screen(&params, &replacing.screen) {
            return Err(ReconcileError::InvalidPhase {
                operation: "update_replacement_params",
                phase: replacing.screen.name(),
            });
        }

        self.transition(|state| {
            state.phase = ReconcilePhase::Replacing(ReplacingDataframeState {
                params: Some(params),
                ..replacing
            });
        });
        Ok(())
    }

    /// Submit the current configuration
    ///
    /// File imports are re-tested; dataframe imports are committed as is.
    pub async fn submit_replacement(&mut self) -> Result<ReplaceOutcome, ReconcileError> {
        let replacing = self.replacing("submit_replacement")?;
        let params = self.effective_params(&replacing, "submit_replacement")?;
        let index = replacing.index;

        let previous_error = match &replacing.screen {
            ImportScreen::DataframeSelect => {
                self.write_replacement(index, params.into_creation_data());
                return Ok(ReplaceOutcome::Committed);
            }
            ImportScreen::CsvConfig { error, .. } | ImportScreen::ExcelConfig { error, .. } => {
                error.clone()
            }
            ImportScreen::FileBrowser => {
                return Err(ReconcileError::InvalidPhase {
                    operation: "submit_replacement",
                    phase: replacing.screen.name(),
                })
            }
        };

        let candidate = params.clone().into_creation_data();
        let invalid = self.test_single(&candidate).await?;
        let Some(new_error) = first_error(&invalid) else {
            self.write_replacement(index, candidate);
            return Ok(ReplaceOutcome::Committed);
        };

        let message = still_invalid_message(previous_error.as_deref(), &new_error);
        tracing::debug!(index, %message, "replacement still invalid");
        let screen = with_error(replacing.screen, message.clone());
        self.transition(|state| {
            state.phase = ReconcilePhase::Replacing(ReplacingDataframeState {
                index,
                screen,
                params: Some(params),
            });
        });
        Ok(ReplaceOutcome::StillInvalid(message))
    }

    /// Write a replacement import and return to `Ready`
    ///
    /// Only the entry at `index` changes. An out-of-range index aborts any
    /// replacement in progress without writing anything.
    pub fn commit_replace(
        &mut self,
        index: usize,
        data: DataframeCreationData,
    ) -> Result<(), ReconcileError> {
        self.expect_phase("commit_replace", |phase| {
            matches!(phase, ReconcilePhase::Ready | ReconcilePhase::Replacing(_))
        })?;
        let len = self.snapshot().import_count();
        if index >= len {
            tracing::error!(index, len, "replacement index out of range");
            self.transition(|state| state.phase = ReconcilePhase::Ready);
            return Err(ReconcileError::ImportIndexOutOfRange { index, len });
        }
        self.write_replacement(index, data);
        Ok(())
    }

    /// Leave the replacement flow without writing anything
    pub fn cancel_replace(&mut self) -> Result<(), ReconcileError> {
        self.expect_phase("cancel_replace", |phase| {
            matches!(phase, ReconcilePhase::Ready | ReconcilePhase::Replacing(_))
        })?;
        self.transition(|state| state.phase = ReconcilePhase::Ready);
        Ok(())
    }

    /// Validate the working imports and replay the analysis with them
    ///
    /// Invalid imports are reported per index and nothing is submitted. A
    /// failed replay returns to `Ready` with the banner set; the working
    /// imports and the step list are left as they were.
    pub async fn finalize_and_replay(&mut self) -> Result<ReplayOutcome, ReconcileError> {
        self.expect_phase("finalize_and_replay", |phase| {
            matches!(phase, ReconcilePhase::Ready)
        })?;
        let working = self.snapshot().working_imports();

        let invalid = match self.channel.test_imports(&working).await {
            Ok(invalid) => invalid,
            Err(err) => return Err(self.replay_failed(err)),
        };
        if !invalid.is_empty() {
            let banner = match self.failed_replay {
                Some(_) => PRE_REPLAY_IMPORT_ERROR_TEXT,
                None => INVALID_IMPORTS_TEXT,
            };
            tracing::info!(
                num_invalid_imports = invalid.len(),
                "replay blocked by invalid imports"
            );
            self.transition(|state| {
                state.invalid_import_messages = owned_messages(&invalid);
                state.replay_error = Some(banner.to_string());
            });
            return Ok(ReplayOutcome::InvalidImports(invalid));
        }

        self.transition(|state| {
            state.invalid_import_messages = im::OrdMap::new();
            state.phase = ReconcilePhase::Committing;
        });
        let request = ReplayRequest {
            analysis_name: self
                .failed_replay
                .as_ref()
                .map(|failed| failed.analysis_name.clone()),
            step_import_data: working,
        };

        let mut guard = CommitGuard {
            state: self.state.clone(),
            armed: true,
        };
        let result = self.channel.replay_analysis(request).await;
        guard.armed = false;

        match result {
            Ok(steps) => {
                let step_count = steps.len();
                self.step_list.write().replace_all(steps);
                tracing::info!(step_count, "analysis replayed");
                self.transition(|state| {
                    state.replay_error = None;
                    state.phase = ReconcilePhase::Done;
                });
                Ok(ReplayOutcome::Replayed { step_count })
            }
            Err(err) => Err(self.replay_failed(err)),
        }
    }

    fn replay_failed(&mut self, err: ChannelError) -> ReconcileError {
        tracing::warn!(error = %err, "replay failed");
        let message = err.user_message();
        self.transition(|state| {
            state.replay_error = Some(message);
            state.phase = ReconcilePhase::Ready;
        });
        err.into()
    }

    async fn test_single(
        &self,
        candidate: &DataframeCreationData,
    ) -> Result<InvalidImportMap, ReconcileError> {
        let analysis = [StepImportData {
            step_id: self.test_step_id.clone(),
            imports: vec![candidate.clone()],
        }];
        self.test_imports(&analysis).await
    }

    fn write_replacement(&mut self, index: usize, data: DataframeCreationData) {
        tracing::info!(index, step_type = %data.step_type(), "import replaced");
        self.transition(|state| {
            write_import(&mut state.working, index, data);
            state.updated_indexes.insert(index);
            state.invalid_import_messages.remove(&index);
            state.phase = ReconcilePhase::Ready;
        });
    }

    fn effective_params(
        &self,
        replacing: &ReplacingDataframeState,
        operation: &'static str,
    ) -> Result<ReplacementParams, ReconcileError> {
        if let Some(params) = &replacing.params {
            return Ok(params.clone());
        }
        match &replacing.screen {
            ImportScreen::CsvConfig { file_path, .. } => Ok(ReplacementParams::Csv(
                CsvImportParams::config_defaults(file_path.as_str()),
            )),
            ImportScreen::ExcelConfig { file_path, .. } => Ok(ReplacementParams::Excel(
                ExcelImportParams::config_defaults(file_path.as_str()),
            )),
            ImportScreen::DataframeSelect => {
                let current = match self.snapshot().import(replacing.index) {
                    Some(DataframeCreationData::DataframeImport(params)) => params,
                    _ => DataframeImportParams::default(),
                };
                Ok(ReplacementParams::Dataframe(current))
            }
            ImportScreen::FileBrowser => Err(ReconcileError::InvalidPhase {
                operation,
                phase: replacing.screen.name(),
            }),
        }
    }

    fn replacing(
        &self,
        operation: &'static str,
    ) -> Result<ReplacingDataframeState, ReconcileError> {
        let snapshot = self.snapshot();
        match &snapshot.phase {
            ReconcilePhase::Replacing(state) => Ok(state.clone()),
            other => Err(ReconcileError::InvalidPhase {
                operation,
                phase: other.name(),
            }),
        }
    }

    fn expect_phase(
        &self,
        operation: &'static str,
        allowed: impl Fn(&ReconcilePhase) -> bool,
    ) -> Result<(), ReconcileError> {
        let snapshot = self.snapshot();
        if allowed(&snapshot.phase) {
            return Ok(());
        }
        if matches!(snapshot.phase, ReconcilePhase::Loading) {
            return Err(ReconcileError::NotLoaded);
        }
        Err(ReconcileError::InvalidPhase {
            operation,
            phase: snapshot.phase.name(),
        })
    }

    fn transition(&self, apply: impl FnOnce(&mut ReconcileSnapshot)) {
        transition(&self.state, apply);
    }
}

/// Returns an abandoned replay to `Ready`
struct CommitGuard {
    state: Arc<SnapshotSender>,
    armed: bool,
}

impl Drop for CommitGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::warn!("replay abandoned before the kernel answered");
        transition(&self.state, |state| {
            if state.phase == ReconcilePhase::Committing {
                state.phase = ReconcilePhase::Ready;
            }
        });
    }
}

fn transition(sender: &SnapshotSender, apply: impl FnOnce(&mut ReconcileSnapshot)) {
    sender.send_modify(|current| {
        let mut next = ReconcileSnapshot::clone(current);
        apply(&mut next);
        *current = Arc::new(next);
    });
}

fn write_import(
    working: &mut im::Vector<StepImportData>,
    index: usize,
    data: DataframeCreationData,
) {
    let mut offset = index;
    for position in 0..working.len() {
        let Some(step) = working.get_mut(position) else {
            return;
        };
        if offset < step.imports.len() {
            step.imports[offset] = data;
            return;
        }
        offset -= step.imports.len();
    }
}

fn first_error(invalid: &InvalidImportMap) -> Option<String> {
    invalid
        .get(0)
        .or_else(|| invalid.iter().next().map(|(_, message)| message))
        .map(str::to_string)
}

fn owned_messages(invalid: &InvalidImportMap) -> im::OrdMap<usize, String> {
    invalid
        .iter()
        .map(|(index, message)| (index, message.to_string()))
        .collect()
}

fn params_fit_screen(params: &ReplacementParams, screen: &ImportScreen) -> bool {
    matches!(
        (params, screen),
        (ReplacementParams::Csv(_), ImportScreen::CsvConfig { .. })
            | (ReplacementParams::Excel(_), ImportScreen::ExcelConfig { .. })
            | (ReplacementParams::Dataframe(_), ImportScreen::DataframeSelect)
    )
}

fn with_error(screen: ImportScreen, message: String) -> ImportScreen {
    match screen {
        ImportScreen::CsvConfig {
            file_name,
            file_path,
            ..
        } => ImportScreen::CsvConfig {
            file_name,
            file_path,
            error: Some(message),
        },
        ImportScreen::ExcelConfig {
            file_name,
            file_path,
            ..
        } => ImportScreen::ExcelConfig {
            file_name,
            file_path,
            error: Some(message),
        },
        other => other,
    }
}
