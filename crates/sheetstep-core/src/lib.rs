//! Analysis step edit and replay engine
//!
//! Turns user interactions into an ordered, replayable sequence of steps
//! applied by a remote analysis kernel:
//! - Debounced live editing with one outstanding request per logical step
//! - A record of kernel-confirmed steps
//! - Repair of broken import steps followed by a full replay
//!
//! # Example
//!
//! ```no_run
//! use sheetstep_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), ReconcileError> {
//! let kernel = Arc::new(SimulatedKernel::new().with_file("sales.csv"));
//! let step_list = shared_step_list();
//! let config = EngineConfig::default();
//!
//! let mut reconciler = ImportReconciler::post_replay(kernel, step_list, &config);
//! reconciler.load_import_data().await?;
//! reconciler.begin_replace(0)?;
//! reconciler.select_file(&["/data".to_string()], "sales.csv").await?;
//! reconciler.finalize_and_replay().await?;
//! # Ok(())
//! # }
//! ```

// Core modules
pub mod channel;
pub mod config;
pub mod error;
pub mod imports;
pub mod protocol;
pub mod step_list;
pub mod types;

// Engines
pub mod controller;
pub mod reconcile;

// Test harness
pub mod test_harness;

// Re-exports
pub use channel::{CorrelatedChannel, MessageChannel};
pub use config::EngineConfig;
pub use error::{ChannelError, ConfigError, EditError, KernelErrorPayload, ReconcileError};
pub use imports::{
    CsvImportParams, DataframeCreationData, DataframeImportParams, ExcelImportParams,
    InvalidImportMap, StepImportData,
};
pub use step_list::{find_graph_params, shared_step_list, AnalysisStepList, SharedStepList};
pub use types::{EditRequest, KernelParams, MessageId, Step, StepId, StepSummary, StepType};

/// Commonly used items
pub mod prelude {
    pub use crate::channel::{CorrelatedChannel, MessageChannel};
    pub use crate::config::EngineConfig;
    pub use crate::controller::{EditEvent, EditSnapshot, LiveEditController, OnClickEditor};
    pub use crate::error::{ChannelError, EditError, ReconcileError};
    pub use crate::imports::{DataframeCreationData, InvalidImportMap, StepImportData};
    pub use crate::reconcile::{
        FailedReplayData, ImportReconciler, ImportScreen, ReconcilePhase, ReplaceOutcome,
        ReplayOutcome,
    };
    pub use crate::step_list::{shared_step_list, SharedStepList};
    pub use crate::test_harness::SimulatedKernel;
    pub use crate::types::{Step, StepId, StepType};
    pub use sheetstep_codec::{GraphCodec, GraphParamsFrontend, IdentityCodec, ParamCodec};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
