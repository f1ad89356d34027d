//! Import reconciliation flows against the simulated kernel

use pretty_assertions::assert_eq;
use sheetstep_core::imports::{CsvImportParams, ExcelImportParams};
use sheetstep_core::prelude::*;
use sheetstep_core::reconcile::{
    ReplaceTarget, ReplacementParams, INVALID_IMPORTS_TEXT, PRE_REPLAY_IMPORT_ERROR_TEXT,
};
use sheetstep_core::KernelErrorPayload;
use sheetstep_test_utils::{
    analysis_steps, csv_import, dataframe_import, excel_import, failed_replay,
};
use std::sync::Arc;
use std::time::Duration;

const ANALYSIS: &str = "monthly";

fn data_dir() -> Vec<String> {
    vec!["/data".to_string()]
}

/// Saved analysis with one healthy import and one whose file is gone
fn broken_analysis_kernel() -> SimulatedKernel {
    SimulatedKernel::new()
        .with_file("/data/sales.csv")
        .with_dataframe("df_live")
        .with_saved_analysis(
            ANALYSIS,
            analysis_steps(&[
                ("imp-1", csv_import("/data/sales.csv")),
                ("imp-2", csv_import("/data/missing.csv")),
            ]),
        )
}

async fn loaded(kernel: &Arc<SimulatedKernel>) -> (ImportReconciler, SharedStepList) {
    let step_list = shared_step_list();
    let mut reconciler = ImportReconciler::pre_replay(
        kernel.clone(),
        step_list.clone(),
        failed_replay(ANALYSIS),
        &EngineConfig::default(),
    );
    reconciler.load_import_data().await.unwrap();
    (reconciler, step_list)
}

#[tokio::test]
async fn pre_replay_banner_points_at_invalid_imports() {
    let kernel = Arc::new(broken_analysis_kernel());
    let (reconciler, _) = loaded(&kernel).await;

    let snapshot = reconciler.snapshot();
    assert_eq!(snapshot.phase, ReconcilePhase::Ready);
    assert_eq!(snapshot.import_count(), 2);
    assert_eq!(snapshot.replay_error.as_deref(), Some(PRE_REPLAY_IMPORT_ERROR_TEXT));
    assert_eq!(snapshot.message_for(0), None);
    assert_eq!(snapshot.message_for(1), Some("File /data/missing.csv does not exist."));
    assert!(snapshot.updated_indexes.is_empty());
}

#[tokio::test]
async fn pre_replay_without_bad_imports_shows_replay_error() {
    let kernel = Arc::new(
        SimulatedKernel::new()
            .with_file("/data/sales.csv")
            .with_saved_analysis(
                ANALYSIS,
                analysis_steps(&[("imp-1", csv_import("/data/sales.csv"))]),
            ),
    );
    let (reconciler, _) = loaded(&kernel).await;

    let snapshot = reconciler.snapshot();
    assert_eq!(
        snapshot.replay_error.as_deref(),
        Some("The analysis could not be replayed on the current data.")
    );
    assert!(snapshot.invalid_imports().is_empty());
}

#[tokio::test]
async fn post_replay_loads_current_imports_without_banner() {
    let kernel = Arc::new(SimulatedKernel::new().with_file("/data/sales.csv"));
    kernel.import_file_step("/data/sales.csv");
    let mut reconciler =
        ImportReconciler::post_replay(kernel.clone(), shared_step_list(), &EngineConfig::default());
    reconciler.load_import_data().await.unwrap();

    let snapshot = reconciler.snapshot();
    assert_eq!(snapshot.replay_error, None);
    assert_eq!(snapshot.working_imports(), snapshot.original.iter().cloned().collect::<Vec<_>>());
    assert_eq!(snapshot.import(0), Some(csv_import("/data/sales.csv")));
}

#[tokio::test]
async fn loading_an_unknown_analysis_stays_loading() {
    let kernel = Arc::new(SimulatedKernel::new());
    let mut reconciler = ImportReconciler::pre_replay(
        kernel,
        shared_step_list(),
        failed_replay("nope"),
        &EngineConfig::default(),
    );

    let err = reconciler.load_import_data().await.unwrap_err();
    assert!(matches!(err, ReconcileError::Channel(ChannelError::Kernel(_))));
    let snapshot = reconciler.snapshot();
    assert_eq!(snapshot.phase, ReconcilePhase::Loading);
    assert_eq!(
        snapshot.replay_error.as_deref(),
        Some("There is no saved analysis named nope.")
    );
}

#[tokio::test]
async fn valid_csv_commits_without_configuration() {
    let kernel = Arc::new(broken_analysis_kernel().with_file("/data/sales_v2.csv"));
    let (mut reconciler, _) = loaded(&kernel).await;

    reconciler.begin_replace(1).unwrap();
    assert_eq!(
        reconciler.snapshot().replacing().map(|r| r.screen.clone()),
        Some(ImportScreen::FileBrowser)
    );
    let outcome = reconciler.select_file(&data_dir(), "sales_v2.csv").await.unwrap();

    assert_eq!(outcome, ReplaceOutcome::Committed);
    let snapshot = reconciler.snapshot();
    assert_eq!(snapshot.phase, ReconcilePhase::Ready);
    assert_eq!(snapshot.import(1), Some(csv_import("/data/sales_v2.csv")));
    assert!(snapshot.is_updated(1));
    assert_eq!(snapshot.message_for(1), None);
}

#[tokio::test]
async fn replacing_one_import_leaves_the_others_alone() {
    let kernel = Arc::new(
        SimulatedKernel::new()
            .with_file("/data/a.csv")
            .with_file("/data/b2.csv")
            .with_dataframe("df_live")
            .with_saved_analysis(
                ANALYSIS,
                analysis_steps(&[
                    ("imp-1", csv_import("/data/a.csv")),
                    ("imp-2", csv_import("/data/b.csv")),
                    ("imp-3", dataframe_import(&["df_live"])),
                ]),
            ),
    );
    let (mut reconciler, _) = loaded(&kernel).await;
    let before = reconciler.snapshot();

    reconciler.begin_replace(1).unwrap();
    reconciler.select_file(&data_dir(), "b2.csv").await.unwrap();

    let after = reconciler.snapshot();
    assert_eq!(after.import(0), before.import(0));
    assert_eq!(after.import(2), before.import(2));
    assert_eq!(after.import(1), Some(csv_import("/data/b2.csv")));
    assert_eq!(after.original, before.original);
    assert_eq!(after.updated_indexes.len(), 1);
}

#[tokio::test]
async fn missing_csv_opens_configuration_with_error() {
    let kernel = Arc::new(broken_analysis_kernel());
    let (mut reconciler, _) = loaded(&kernel).await;

    reconciler.begin_replace(1).unwrap();
    let outcome = reconciler.select_file(&data_dir(), "nope.csv").await.unwrap();

    assert_eq!(outcome, ReplaceOutcome::NeedsConfiguration);
    let snapshot = reconciler.snapshot();
    let replacing = snapshot.replacing().unwrap();
    assert_eq!(replacing.index, 1);
    assert_eq!(
        replacing.screen,
        ImportScreen::CsvConfig {
            file_name: "nope.csv".to_string(),
            file_path: "/data/nope.csv".to_string(),
            error: Some("File /data/nope.csv does not exist.".to_string()),
        }
    );
    assert_eq!(snapshot.import(1), Some(csv_import("/data/missing.csv")));
}

#[tokio::test]
async fn repeated_failures_grow_the_breadcrumb_until_fixed() {
    let kernel = Arc::new(
        broken_analysis_kernel().with_file_requiring_delimiter("/data/semi.csv", ";"),
    );
    let (mut reconciler, _) = loaded(&kernel).await;
    let parse_error = "Could not parse /data/semi.csv with the given import settings.";

    reconciler.begin_replace(1).unwrap();
    let outcome = reconciler.select_file(&data_dir(), "semi.csv").await.unwrap();
    assert_eq!(outcome, ReplaceOutcome::NeedsConfiguration);

    let outcome = reconciler.submit_replacement().await.unwrap();
    assert_eq!(outcome, ReplaceOutcome::StillInvalid(format!("{parse_error} Still invalid.")));
    let outcome = reconciler.submit_replacement().await.unwrap();
    assert_eq!(
        outcome,
        ReplaceOutcome::StillInvalid(format!("{parse_error} Still invalid. Still invalid."))
    );

    reconciler
        .update_replacement_params(|params| {
            if let ReplacementParams::Csv(csv) = params {
                csv.delimeters = Some(vec![";".to_string()]);
            }
        })
        .unwrap();
    let outcome = reconciler.submit_replacement().await.unwrap();
    assert_eq!(outcome, ReplaceOutcome::Committed);

    let mut expected = CsvImportParams::config_defaults("/data/semi.csv");
    expected.delimeters = Some(vec![";".to_string()]);
    assert_eq!(
        reconciler.snapshot().import(1),
        Some(DataframeCreationData::SimpleImport(expected))
    );
}

#[tokio::test]
async fn a_different_error_replaces_the_breadcrumb() {
    let kernel = Arc::new(broken_analysis_kernel());
    let (mut reconciler, _) = loaded(&kernel).await;

    reconciler.begin_replace(1).unwrap();
    reconciler.select_file(&data_dir(), "gone.csv").await.unwrap();
    reconciler
        .update_replacement_params(|params| {
            if let ReplacementParams::Csv(csv) = params {
                csv.file_names = vec!["/data/other.csv".to_string()];
            }
        })
        .unwrap();

    let outcome = reconciler.submit_replacement().await.unwrap();
    assert_eq!(
        outcome,
        ReplaceOutcome::StillInvalid("File /data/other.csv does not exist.".to_string())
    );
}

#[tokio::test]
async fn spreadsheets_always_go_to_configuration() {
    let kernel = Arc::new(broken_analysis_kernel());
    let (mut reconciler, _) = loaded(&kernel).await;

    reconciler.begin_replace(1).unwrap();
    let outcome = reconciler.select_file(&data_dir(), "book.xlsx").await.unwrap();
    assert_eq!(outcome, ReplaceOutcome::NeedsConfiguration);
    let snapshot = reconciler.snapshot();
    let replacing = snapshot.replacing().unwrap();
    assert!(matches!(
        &replacing.screen,
        ImportScreen::ExcelConfig { file_path, error: None, .. } if file_path == "/data/book.xlsx"
    ));
    assert_eq!(
        replacing.params,
        Some(ReplacementParams::Excel(ExcelImportParams::config_defaults("/data/book.xlsx")))
    );

    let outcome = reconciler.submit_replacement().await.unwrap();
    assert_eq!(
        outcome,
        ReplaceOutcome::StillInvalid("File /data/book.xlsx does not exist.".to_string())
    );

    kernel.add_file("/data/book.xlsx");
    reconciler
        .update_replacement_params(|params| {
            if let ReplacementParams::Excel(excel) = params {
                excel.sheet_names = vec!["Q1".to_string()];
            }
        })
        .unwrap();
    assert_eq!(reconciler.submit_replacement().await.unwrap(), ReplaceOutcome::Committed);

    let mut expected = ExcelImportParams::config_defaults("/data/book.xlsx");
    expected.sheet_names = vec!["Q1".to_string()];
    assert_eq!(
        reconciler.snapshot().import(1),
        Some(DataframeCreationData::ExcelImport(expected))
    );
}

#[tokio::test]
async fn file_import_can_become_a_dataframe_import() {
    let kernel = Arc::new(broken_analysis_kernel());
    let (mut reconciler, _) = loaded(&kernel).await;

    reconciler.begin_replace_with(1, ReplaceTarget::Dataframe).unwrap();
    reconciler
        .update_replacement_params(|params| {
            if let ReplacementParams::Dataframe(df) = params {
                df.df_names = vec!["df_live".to_string()];
            }
        })
        .unwrap();
    assert_eq!(reconciler.submit_replacement().await.unwrap(), ReplaceOutcome::Committed);
    assert_eq!(reconciler.snapshot().import(1), Some(dataframe_import(&["df_live"])));
}

#[tokio::test]
async fn out_of_range_indexes_are_rejected() {
    let kernel = Arc::new(broken_analysis_kernel());
    let (mut reconciler, _) = loaded(&kernel).await;

    let err = reconciler.begin_replace(5).unwrap_err();
    assert!(matches!(err, ReconcileError::ImportIndexOutOfRange { index: 5, len: 2 }));
    assert_eq!(reconciler.snapshot().phase, ReconcilePhase::Ready);

    reconciler.begin_replace(0).unwrap();
    let before = reconciler.snapshot().working_imports();
    let err = reconciler
        .commit_replace(7, excel_import("/data/book.xlsx"))
        .unwrap_err();
    assert!(err.is_invariant_violation());
    let snapshot = reconciler.snapshot();
    assert_eq!(snapshot.phase, ReconcilePhase::Ready);
    assert_eq!(snapshot.working_imports(), before);
}

#[tokio::test]
async fn finalize_replays_and_replaces_the_step_list() {
    let kernel = Arc::new(broken_analysis_kernel().with_file("/data/sales_v2.csv"));
    let (mut reconciler, step_list) = loaded(&kernel).await;
    step_list
        .write()
        .apply_confirmed(Step::new(StepId::from("stale"), StepType::Pivot, serde_json::json!({})));

    reconciler.begin_replace(1).unwrap();
    reconciler.select_file(&data_dir(), "sales_v2.csv").await.unwrap();
    let outcome = reconciler.finalize_and_replay().await.unwrap();

    assert_eq!(outcome, ReplayOutcome::Replayed { step_count: 3 });
    let snapshot = reconciler.snapshot();
    assert_eq!(snapshot.phase, ReconcilePhase::Done);
    assert_eq!(snapshot.replay_error, None);

    let steps = step_list.read();
    assert_eq!(steps.len(), 3);
    assert!(steps.get(&StepId::from("stale")).is_none());
    assert_eq!(
        steps.steps()[1].params["file_names"],
        serde_json::json!(["/data/sales_v2.csv"])
    );
    assert_eq!(kernel.stats().replays, 1);
}

#[tokio::test]
async fn finalize_with_invalid_imports_submits_nothing() {
    let kernel = Arc::new(broken_analysis_kernel());
    let (mut reconciler, step_list) = loaded(&kernel).await;

    let outcome = reconciler.finalize_and_replay().await.unwrap();

    let ReplayOutcome::InvalidImports(invalid) = outcome else {
        panic!("expected invalid imports");
    };
    assert_eq!(invalid.get(1), Some("File /data/missing.csv does not exist."));
    let snapshot = reconciler.snapshot();
    assert_eq!(snapshot.phase, ReconcilePhase::Ready);
    assert_eq!(snapshot.replay_error.as_deref(), Some(PRE_REPLAY_IMPORT_ERROR_TEXT));
    assert_eq!(kernel.stats().replays, 0);
    assert!(step_list.read().is_empty());
}

#[tokio::test]
async fn post_replay_finalize_with_invalid_imports_uses_generic_banner() {
    let kernel = Arc::new(SimulatedKernel::new().with_file("/data/sales.csv"));
    kernel.import_file_step("/data/sales.csv");
    let mut reconciler =
        ImportReconciler::post_replay(kernel.clone(), shared_step_list(), &EngineConfig::default());
    reconciler.load_import_data().await.unwrap();
    kernel.remove_file("/data/sales.csv");

    let outcome = reconciler.finalize_and_replay().await.unwrap();
    assert!(matches!(outcome, ReplayOutcome::InvalidImports(_)));
    assert_eq!(
        reconciler.snapshot().replay_error.as_deref(),
        Some(INVALID_IMPORTS_TEXT)
    );
}

#[tokio::test]
async fn failed_replay_keeps_step_list_and_working_imports() {
    let kernel = Arc::new(broken_analysis_kernel().with_file("/data/sales_v2.csv"));
    let (mut reconciler, step_list) = loaded(&kernel).await;
    step_list
        .write()
        .apply_confirmed(Step::new(StepId::from("stale"), StepType::Pivot, serde_json::json!({})));
    kernel.fail_next_replay(KernelErrorPayload::new(
        "execution_error",
        "Replay failed",
        "Column region was removed.",
    ));

    reconciler.begin_replace(1).unwrap();
    reconciler.select_file(&data_dir(), "sales_v2.csv").await.unwrap();
    let err = reconciler.finalize_and_replay().await.unwrap_err();

    assert!(matches!(err, ReconcileError::Channel(ChannelError::Kernel(_))));
    let snapshot = reconciler.snapshot();
    assert_eq!(snapshot.phase, ReconcilePhase::Ready);
    assert_eq!(snapshot.replay_error.as_deref(), Some("Column region was removed."));
    assert!(snapshot.is_updated(1));
    assert_eq!(snapshot.import(1), Some(csv_import("/data/sales_v2.csv")));

    let steps = step_list.read();
    assert_eq!(steps.len(), 1);
    assert!(steps.get(&StepId::from("stale")).is_some());
}

#[tokio::test(start_paused = true)]
async fn abandoned_replay_returns_to_ready() {
    let kernel = Arc::new(
        broken_analysis_kernel()
            .with_file("/data/sales_v2.csv")
            .with_latency(Duration::from_millis(50)),
    );
    let (mut reconciler, step_list) = loaded(&kernel).await;
    reconciler.begin_replace(1).unwrap();
    reconciler.select_file(&data_dir(), "sales_v2.csv").await.unwrap();

    // import test finishes at 50ms, the replay would finish at 100ms
    let abandoned =
        tokio::time::timeout(Duration::from_millis(80), reconciler.finalize_and_replay()).await;
    assert!(abandoned.is_err());

    assert_eq!(reconciler.snapshot().phase, ReconcilePhase::Ready);
    assert_eq!(kernel.stats().replays, 0);
    assert!(step_list.read().is_empty());
}

#[tokio::test]
async fn operations_out_of_phase_are_rejected() {
    let kernel = Arc::new(broken_analysis_kernel());
    let (mut reconciler, _) = loaded(&kernel).await;

    let err = reconciler.submit_replacement().await.unwrap_err();
    assert!(matches!(err, ReconcileError::InvalidPhase { .. }));

    reconciler.begin_replace(1).unwrap();
    let err = reconciler.finalize_and_replay().await.unwrap_err();
    assert!(matches!(err, ReconcileError::InvalidPhase { .. }));

    reconciler.cancel_replace().unwrap();
    assert_eq!(reconciler.snapshot().phase, ReconcilePhase::Ready);
}
