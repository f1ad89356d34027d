//! In-process kernel simulator
//!
//! Holds a tiny model of the kernel's world (files on disk, dataframes in
//! memory, saved analyses, the current step list) and answers every
//! [`MessageChannel`] call against it. Failures can be injected per call.

use crate::channel::MessageChannel;
use crate::error::{ChannelError, KernelErrorPayload};
use crate::imports::{DataframeCreationData, InvalidImportMap, StepImportData};
use crate::protocol::{KernelRequest, KernelRequestBody, KernelResponse, ReplayRequest};
use crate::types::{EditRequest, KernelParams, Step, StepId, StepType};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

/// Call counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatorStats {
    pub edits_received: u64,
    pub edits_failed: u64,
    pub import_tests: u64,
    pub replays: u64,
}

#[derive(Debug, Clone, Default)]
struct FileEntry {
    /// Delimiter the file only parses with
    required_delimiter: Option<String>,
}

#[derive(Debug, Default)]
struct KernelState {
    files: BTreeMap<String, FileEntry>,
    dataframes: BTreeSet<String>,
    steps: Vec<Step>,
    analyses: HashMap<String, Vec<Step>>,
    edit_log: Vec<EditRequest>,
    failing_edits: usize,
    replay_error: Option<KernelErrorPayload>,
    stats: SimulatorStats,
}

/// Simulated analysis kernel
#[derive(Debug, Default)]
pub struct SimulatedKernel {
    state: Mutex<KernelState>,
    latency: Duration,
}

impl SimulatedKernel {
    /// Create kernel with no files, dataframes, or steps
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With a delay before every answer
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// With a file that imports with kernel defaults
    #[must_use]
    pub fn with_file(self, path: impl Into<String>) -> Self {
        self.add_file(path);
        self
    }

    /// With a file that only imports with the given delimiter
    #[must_use]
    pub fn with_file_requiring_delimiter(
        self,
        path: impl Into<String>,
        delimiter: impl Into<String>,
    ) -> Self {
        self.state.lock().files.insert(
            path.into(),
            FileEntry {
                required_delimiter: Some(delimiter.into()),
            },
        );
        self
    }

    /// With a dataframe in memory
    #[must_use]
    pub fn with_dataframe(self, name: impl Into<String>) -> Self {
        self.state.lock().dataframes.insert(name.into());
        self
    }

    /// With a saved analysis that can be replayed by name
    #[must_use]
    pub fn with_saved_analysis(self, name: impl Into<String>, steps: Vec<Step>) -> Self {
        self.state.lock().analyses.insert(name.into(), steps);
        self
    }

    pub fn add_file(&self, path: impl Into<String>) {
        self.state
            .lock()
            .files
            .insert(path.into(), FileEntry::default());
    }

    pub fn remove_file(&self, path: &str) {
        self.state.lock().files.remove(path);
    }

    /// Reject the next `count` edits
    pub fn fail_next_edits(&self, count: usize) {
        self.state.lock().failing_edits = count;
    }

    /// Reject the next replay with `error`
    pub fn fail_next_replay(&self, error: KernelErrorPayload) {
        self.state.lock().replay_error = Some(error);
    }

    /// Append a default import of `path` to the current steps
    pub fn import_file_step(&self, path: &str) -> Step {
        let recipe =
            DataframeCreationData::SimpleImport(crate::imports::CsvImportParams::for_file(path));
        let step = Step::new(
            StepId::generate(),
            StepType::SimpleImport,
            recipe_params(&recipe).unwrap_or_default(),
        );
        self.state.lock().steps.push(step.clone());
        step
    }

    /// Edit requests received, in arrival order
    #[must_use]
    pub fn edit_log(&self) -> Vec<EditRequest> {
        self.state.lock().edit_log.clone()
    }

    /// Steps currently applied
    #[must_use]
    pub fn steps(&self) -> Vec<Step> {
        self.state.lock().steps.clone()
    }

    #[must_use]
    pub fn stats(&self) -> SimulatorStats {
        self.state.lock().stats.clone()
    }

    /// Answer a wire request
    pub async fn handle(&self, request: KernelRequest) -> KernelResponse {
        self.delay().await;
        let id = request.id;
        let mut state = self.state.lock();
        let result = match request.body {
            KernelRequestBody::Edit(edit) => state.apply_edit(edit).and_then(|step| to_json(&step)),
            KernelRequestBody::GetImportsForAnalysis { analysis_name } => state
                .imports_for_analysis(&analysis_name)
                .and_then(|imports| to_json(&imports)),
            KernelRequestBody::GetImportsForCurrentSteps => {
                imports_for_steps(&state.steps).and_then(|imports| to_json(&imports))
            }
            KernelRequestBody::TestImports { imports } => to_json(&state.test_imports(&imports)),
            KernelRequestBody::GetPathJoined { path_parts } => to_json(&join_path(&path_parts)),
            KernelRequestBody::ReplayAnalysis(replay) => {
                state.replay(replay).and_then(|steps| to_json(&steps))
            }
        };
        match result {
            Ok(value) => KernelResponse::ok(id, value),
            Err(payload) => KernelResponse::err(id, payload),
        }
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

impl KernelState {
    fn apply_edit(&mut self, request: EditRequest) -> Result<Step, KernelErrorPayload> {
        self.edit_log.push(request.clone());
        self.stats.edits_received += 1;

        if self.failing_edits > 0 {
            self.failing_edits -= 1;
            self.stats.edits_failed += 1;
            return Err(KernelErrorPayload::new(
                "execution_error",
                format!("Error applying {}", request.step_type),
                "The kernel could not apply this edit. Adjust the params and try again.",
            ));
        }

        let step_id = request.step_id.unwrap_or_else(StepId::generate);
        let step = Step::new(step_id, request.step_type, request.params);
        match self.steps.iter().position(|s| s.step_id == step.step_id) {
            Some(index) => self.steps[index] = step.clone(),
            None => self.steps.push(step.clone()),
        }
        Ok(step)
    }

    fn imports_for_analysis(&self, name: &str) -> Result<Vec<StepImportData>, KernelErrorPayload> {
        let steps = self.analyses.get(name).ok_or_else(|| {
            KernelErrorPayload::new(
                "analysis_not_found",
                "Analysis not found",
                format!("There is no saved analysis named {name}."),
            )
        })?;
        imports_for_steps(steps)
    }

    fn test_imports(&mut self, data: &[StepImportData]) -> InvalidImportMap {
        self.stats.import_tests += 1;
        data.iter()
            .flat_map(|step| step.imports.iter())
            .enumerate()
            .filter_map(|(index, import)| self.validate(import).map(|message| (index, message)))
            .collect()
    }

    fn validate(&self, import: &DataframeCreationData) -> Option<String> {
        match import {
            DataframeCreationData::SimpleImport(params) => {
                for (position, path) in params.file_names.iter().enumerate() {
                    let Some(entry) = self.files.get(path) else {
                        return Some(format!("File {path} does not exist."));
                    };
                    if let Some(required) = &entry.required_delimiter {
                        let given = params
                            .delimeters
                            .as_ref()
                            .and_then(|delimeters| delimeters.get(position));
                        if given != Some(required) {
                            return Some(format!(
                                "Could not parse {path} with the given import settings."
                            ));
                        }
                    }
                }
                None
            }
            DataframeCreationData::ExcelImport(params) => (!self
                .files
                .contains_key(&params.file_name))
            .then(|| format!("File {} does not exist.", params.file_name)),
            DataframeCreationData::DataframeImport(params) => params
                .df_names
                .iter()
                .find(|name| !self.dataframes.contains(*name))
                .map(|name| format!("Dataframe {name} is not defined.")),
        }
    }

    fn replay(&mut self, request: ReplayRequest) -> Result<Vec<Step>, KernelErrorPayload> {
        let invalid = self.test_imports(&request.step_import_data);
        if let Some((index, message)) = invalid.iter().next() {
            return Err(KernelErrorPayload::new(
                "import_error",
                "Invalid imports",
                format!("Import {index} is invalid: {message}"),
            ));
        }
        if let Some(error) = self.replay_error.take() {
            return Err(error);
        }

        let base = match &request.analysis_name {
            Some(name) => self.analyses.get(name).cloned().ok_or_else(|| {
                KernelErrorPayload::new(
                    "analysis_not_found",
                    "Analysis not found",
                    format!("There is no saved analysis named {name}."),
                )
            })?,
            None => self.steps.clone(),
        };
        let replacements: HashMap<&StepId, &[DataframeCreationData]> = request
            .step_import_data
            .iter()
            .map(|data| (&data.step_id, data.imports.as_slice()))
            .collect();

        let mut replayed = Vec::with_capacity(base.len());
        for step in base {
            match replacements.get(&step.step_id) {
                Some(imports) if step.step_type.is_import() => {
                    for (position, import) in imports.iter().enumerate() {
                        let step_id = if position == 0 {
                            step.step_id.clone()
                        } else {
                            StepId::generate()
                        };
                        let params = recipe_params(import)?;
                        replayed.push(Step::new(step_id, import.step_type(), params));
                    }
                }
                _ => replayed.push(step),
            }
        }

        self.stats.replays += 1;
        self.steps.clone_from(&replayed);
        Ok(replayed)
    }
}

fn imports_for_steps(steps: &[Step]) -> Result<Vec<StepImportData>, KernelErrorPayload> {
    steps
        .iter()
        .filter(|step| step.step_type.is_import())
        .map(|step| {
            let recipe: DataframeCreationData = serde_json::from_value(serde_json::json!({
                "step_type": step.step_type,
                "params": step.params,
            }))
            .map_err(|err| serialization_error(&err))?;
            Ok(StepImportData::new(step.step_id.clone(), vec![recipe]))
        })
        .collect()
}

fn recipe_params(recipe: &DataframeCreationData) -> Result<KernelParams, KernelErrorPayload> {
    let mut value = serde_json::to_value(recipe).map_err(|err| serialization_error(&err))?;
    Ok(value["params"].take())
}

fn join_path(parts: &[String]) -> String {
    let mut joined = String::new();
    for part in parts.iter().filter(|part| !part.is_empty()) {
        if !joined.is_empty() && !joined.ends_with('/') {
            joined.push('/');
        }
        joined.push_str(part);
    }
    joined
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, KernelErrorPayload> {
    serde_json::to_value(value).map_err(|err| serialization_error(&err))
}

fn serialization_error(err: &serde_json::Error) -> KernelErrorPayload {
    KernelErrorPayload::new("serialization_error", "Malformed step params", err.to_string())
}

#[async_trait]
impl MessageChannel for SimulatedKernel {
    async fn send_edit(&self, request: EditRequest) -> Result<Step, ChannelError> {
        self.delay().await;
        self.state
            .lock()
            .apply_edit(request)
            .map_err(ChannelError::Kernel)
    }

    async fn get_imports_for_analysis(
        &self,
        analysis_name: &str,
    ) -> Result<Vec<StepImportData>, ChannelError> {
        self.delay().await;
        self.state
            .lock()
            .imports_for_analysis(analysis_name)
            .map_err(ChannelError::Kernel)
    }

    async fn get_imports_for_current_steps(&self) -> Result<Vec<StepImportData>, ChannelError> {
        self.delay().await;
        imports_for_steps(&self.state.lock().steps).map_err(ChannelError::Kernel)
    }

    async fn test_imports(
        &self,
        imports: &[StepImportData],
    ) -> Result<InvalidImportMap, ChannelError> {
        self.delay().await;
        Ok(self.state.lock().test_imports(imports))
    }

    async fn get_path_joined(&self, path_parts: &[String]) -> Result<String, ChannelError> {
        self.delay().await;
        Ok(join_path(path_parts))
    }

    async fn replay_analysis(&self, request: ReplayRequest) -> Result<Vec<Step>, ChannelError> {
        self.delay().await;
        self.state
            .lock()
            .replay(request)
            .map_err(ChannelError::Kernel)
    }
}
