//! Testing utilities for the sheetstep workspace
//!
//! Shared fixtures and a gated channel for ordering tests.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use sheetstep_core::imports::{
    CsvImportParams, DataframeCreationData, DataframeImportParams, ExcelImportParams,
    InvalidImportMap, StepImportData,
};
use sheetstep_core::protocol::ReplayRequest;
use sheetstep_core::reconcile::FailedReplayData;
use sheetstep_core::{
    ChannelError, EditRequest, KernelErrorPayload, MessageChannel, Step, StepId, StepType,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

pub fn csv_import(path: &str) -> DataframeCreationData {
    DataframeCreationData::SimpleImport(CsvImportParams::for_file(path))
}

pub fn excel_import(path: &str) -> DataframeCreationData {
    DataframeCreationData::ExcelImport(ExcelImportParams::config_defaults(path))
}

pub fn dataframe_import(names: &[&str]) -> DataframeCreationData {
    DataframeCreationData::DataframeImport(DataframeImportParams {
        df_names: names.iter().map(|name| (*name).to_string()).collect(),
    })
}

/// Kernel step carrying an import recipe
pub fn import_step(step_id: &str, recipe: &DataframeCreationData) -> Step {
    let mut value = serde_json::to_value(recipe).unwrap();
    Step::new(StepId::from(step_id), recipe.step_type(), value["params"].take())
}

/// A saved analysis: one import step per recipe, then a pivot on the first sheet
pub fn analysis_steps(recipes: &[(&str, DataframeCreationData)]) -> Vec<Step> {
    let mut steps: Vec<Step> = recipes
        .iter()
        .map(|(step_id, recipe)| import_step(step_id, recipe))
        .collect();
    steps.push(Step::new(
        StepId::from("pivot-1"),
        StepType::Pivot,
        json!({"sheet_index": 0, "pivot_rows": ["region"]}),
    ));
    steps
}

pub fn failed_replay(analysis_name: &str) -> FailedReplayData {
    FailedReplayData::new(
        analysis_name,
        KernelErrorPayload::new(
            "execution_error",
            "Replay failed",
            "The analysis could not be replayed on the current data.",
        ),
    )
}

/// Let paused-clock tests advance past debounce windows
pub async fn advance(millis: u64) {
    tokio::time::sleep(Duration::from_millis(millis)).await;
}

/// Channel that records edits and holds them until released
///
/// Other calls pass straight through.
pub struct GatedChannel {
    inner: Arc<dyn MessageChannel>,
    gate: Semaphore,
    gated: AtomicBool,
    sent: Mutex<Vec<EditRequest>>,
}

impl GatedChannel {
    /// Gate starts closed
    pub fn closed(inner: Arc<dyn MessageChannel>) -> Self {
        Self {
            inner,
            gate: Semaphore::new(0),
            gated: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Let `count` held edits through
    pub fn release(&self, count: usize) {
        self.gate.add_permits(count);
    }

    /// Stop holding edits, releasing any that wait
    pub fn open(&self) {
        if self.gated.swap(false, Ordering::SeqCst) {
            self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    /// Edits received so far, including held ones
    pub fn sent(&self) -> Vec<EditRequest> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl MessageChannel for GatedChannel {
    async fn send_edit(&self, request: EditRequest) -> Result<Step, ChannelError> {
        self.sent.lock().push(request.clone());
        if self.gated.load(Ordering::SeqCst) {
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| ChannelError::Disconnected)?;
            permit.forget();
        }
        self.inner.send_edit(request).await
    }

    async fn get_imports_for_analysis(
        &self,
        analysis_name: &str,
    ) -> Result<Vec<StepImportData>, ChannelError> {
        self.inner.get_imports_for_analysis(analysis_name).await
    }

    async fn get_imports_for_current_steps(&self) -> Result<Vec<StepImportData>, ChannelError> {
        self.inner.get_imports_for_current_steps().await
    }

    async fn test_imports(
        &self,
        imports: &[StepImportData],
    ) -> Result<InvalidImportMap, ChannelError> {
        self.inner.test_imports(imports).await
    }

    async fn get_path_joined(&self, path_parts: &[String]) -> Result<String, ChannelError> {
        self.inner.get_path_joined(path_parts).await
    }

    async fn replay_analysis(&self, request: ReplayRequest) -> Result<Vec<Step>, ChannelError> {
        self.inner.replay_analysis(request).await
    }
}
