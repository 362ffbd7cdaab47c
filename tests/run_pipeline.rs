// tests/run_pipeline.rs
//
// End-to-end runs of the orchestrator against an in-memory filesystem and a
// fake executor that "produces" each task's declared outputs.

mod common;
use crate::common::{launched_ids, prepare, run_fake};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use stagedag::config::{ConfigFile, InputConfig};
use stagedag::fs::mock::MockFileSystem;
use stagedag::report::ReportStatus;
use stagedag::state::{FileFingerprintStore, MemoryFingerprintStore};
use stagedag_test_utils::builders::{
    ConfigFileBuilder, StageConfigBuilder, counted, optional, optional_output, output, path_input,
    resources, select_input, stage_input,
};
use stagedag_test_utils::init_tracing;

/// stage1 (per sample) -> tuning (s1 only) -> stage2 (per sample, shared model)
fn tuning_config() -> ConfigFile {
    ConfigFileBuilder::new()
        .name("tuning")
        .fan_out("samples", &["s1", "s2"])
        .with_stage(
            "stage1",
            StageConfigBuilder::new("search --raw {in:raw} --out {out:report}")
                .over("samples")
                .nesting(&["stage1", "{sample}"])
                .input("raw", counted(path_input("data/{sample}"), "*.raw"))
                .output("report", output("report.tsv"))
                .resources(resources(2, 8192, "10m", "5m"))
                .build(),
        )
        .with_stage(
            "tuning",
            StageConfigBuilder::new("tune --report {in:report} --out {out:model}")
                .nesting(&["tuning"])
                .input("report", select_input("stage1", "report", "s1"))
                .output("model", output("tuned.model"))
                .build(),
        )
        .with_stage(
            "stage2",
            StageConfigBuilder::new("search --raw {in:raw} --model {in:model} --out {out:report}")
                .over("samples")
                .nesting(&["stage2", "{sample}"])
                .input("raw", counted(path_input("data/{sample}"), "*.raw"))
                .input("model", stage_input("tuning", "model"))
                .output("report", output("report.tsv"))
                .build(),
        )
        .build()
}

fn seeded_fs() -> MockFileSystem {
    let fs = MockFileSystem::new();
    fs.add_file("data/s1/a.raw", "a");
    fs.add_file("data/s1/b.raw", "b");
    fs.add_file("data/s2/c.raw", "c");
    fs
}

#[tokio::test]
async fn tuning_output_is_broadcast_to_every_sample() {
    init_tracing();
    let fs = seeded_fs();
    let prepared = prepare(tuning_config(), &fs);

    let (report, launched) =
        run_fake(&prepared, &fs, Box::new(MemoryFingerprintStore::new()), |e| e).await;

    assert!(report.success, "report: {report:?}");
    assert_eq!(report.count(ReportStatus::Succeeded), 5);

    let ids = launched_ids(&launched);
    let pos = |id: &str| ids.iter().position(|x| x == id).unwrap();
    assert!(pos("stage1:s1") < pos("tuning"));
    assert!(pos("tuning") < pos("stage2:s1"));
    assert!(pos("tuning") < pos("stage2:s2"));

    // s2 never fed the tuning step but still gets the tuned model.
    let model = "results/tuning/tuned.model";
    for id in ["stage2:s1", "stage2:s2"] {
        let task = launched.iter().find(|t| t.id == id).unwrap();
        assert!(
            task.command.contains(&format!("--model {model}")),
            "{id}: {}",
            task.command
        );
    }

    let tuning = launched.iter().find(|t| t.id == "tuning").unwrap();
    assert!(tuning.command.contains("--report results/stage1/s1/report.tsv"));
}

#[tokio::test]
async fn estimates_scale_with_counted_inputs() {
    let fs = seeded_fs();
    let prepared = prepare(tuning_config(), &fs);
    let (report, launched) =
        run_fake(&prepared, &fs, Box::new(MemoryFingerprintStore::new()), |e| e).await;

    let s1 = launched.iter().find(|t| t.id == "stage1:s1").unwrap();
    assert_eq!(s1.estimate.cpu, 2);
    assert_eq!(s1.estimate.memory_mb, 8192);
    assert_eq!(s1.estimate.time, Duration::from_secs(20 * 60));

    let s2 = launched.iter().find(|t| t.id == "stage1:s2").unwrap();
    assert_eq!(s2.estimate.time, Duration::from_secs(15 * 60));

    let estimate = report.task("stage1:s1").unwrap().estimate.as_ref().unwrap();
    assert_eq!(estimate.time_minutes, 20);
}

#[tokio::test]
async fn fast_mode_scales_time_estimates() {
    let fs = seeded_fs();
    let mut cfg = tuning_config();
    cfg.pipeline.fast_mode = true;
    let prepared = prepare(cfg, &fs);
    let (_, launched) =
        run_fake(&prepared, &fs, Box::new(MemoryFingerprintStore::new()), |e| e).await;

    let s1 = launched.iter().find(|t| t.id == "stage1:s1").unwrap();
    assert_eq!(s1.estimate.time, Duration::from_secs(10 * 60));
}

#[tokio::test]
async fn second_run_reuses_everything() {
    init_tracing();
    let fs = seeded_fs();
    let prepared = prepare(tuning_config(), &fs);
    let state_dir = Path::new(".stagedag");

    let store = || Box::new(FileFingerprintStore::new(Arc::new(fs.clone()), state_dir));

    let (first, launched) = run_fake(&prepared, &fs, store(), |e| e).await;
    assert!(first.success);
    assert_eq!(launched.len(), 5);

    let (second, launched) = run_fake(&prepared, &fs, store(), |e| e).await;
    assert!(second.success);
    assert!(launched.is_empty(), "relaunched: {:?}", launched_ids(&launched));
    assert!(second.tasks.iter().all(|t| t.reused));
}

#[tokio::test]
async fn changed_input_reruns_only_affected_tasks() {
    let fs = seeded_fs();
    let prepared = prepare(tuning_config(), &fs);
    let state_dir = Path::new(".stagedag");
    let store = || Box::new(FileFingerprintStore::new(Arc::new(fs.clone()), state_dir));

    let (first, _) = run_fake(&prepared, &fs, store(), |e| e).await;
    assert!(first.success);

    fs.add_file("data/s2/c.raw", "c, reacquired");

    let (second, launched) = run_fake(&prepared, &fs, store(), |e| e).await;
    assert!(second.success);
    let mut ids = launched_ids(&launched);
    ids.sort();
    assert_eq!(ids, vec!["stage1:s2", "stage2:s2"]);
}

#[tokio::test]
async fn deleted_output_forces_rerun_despite_matching_fingerprint() {
    let fs = seeded_fs();
    let prepared = prepare(tuning_config(), &fs);
    let state_dir = Path::new(".stagedag");
    let store = || Box::new(FileFingerprintStore::new(Arc::new(fs.clone()), state_dir));

    run_fake(&prepared, &fs, store(), |e| e).await;
    fs.remove_file("results/tuning/tuned.model");

    let (second, launched) = run_fake(&prepared, &fs, store(), |e| e).await;
    assert!(second.success);
    assert_eq!(launched_ids(&launched), vec!["tuning"]);
}

#[tokio::test]
async fn resume_disabled_runs_every_task() {
    let fs = seeded_fs();
    let mut cfg = tuning_config();
    cfg.pipeline.resume = false;
    let prepared = prepare(cfg, &fs);
    let state_dir = Path::new(".stagedag");
    let store = || Box::new(FileFingerprintStore::new(Arc::new(fs.clone()), state_dir));

    run_fake(&prepared, &fs, store(), |e| e).await;
    let (_, launched) = run_fake(&prepared, &fs, store(), |e| e).await;
    assert_eq!(launched.len(), 5);
}

fn contract_config() -> ConfigFile {
    ConfigFileBuilder::new()
        .with_stage(
            "produce",
            StageConfigBuilder::new("produce {out:table} {out:plot}")
                .output("table", output("table.tsv"))
                .output("plot", optional_output("plot.png"))
                .build(),
        )
        .with_stage(
            "consume",
            StageConfigBuilder::new("consume {in:table} {arg:plot}")
                .input("table", stage_input("produce", "table"))
                .input(
                    "plot",
                    InputConfig {
                        flag: Some("--plot".to_string()),
                        ..optional(stage_input("produce", "plot"))
                    },
                )
                .build(),
        )
        .build()
}

#[tokio::test]
async fn missing_optional_output_still_succeeds() {
    init_tracing();
    let fs = MockFileSystem::new();
    let prepared = prepare(contract_config(), &fs);

    let (report, launched) = run_fake(
        &prepared,
        &fs,
        Box::new(MemoryFingerprintStore::new()),
        |e| e.omit_output("produce", "plot"),
    )
    .await;

    assert!(report.success, "report: {report:?}");
    let consume = launched.iter().find(|t| t.id == "consume").unwrap();
    assert_eq!(consume.command.trim_end(), "consume results/table.tsv");
}

#[tokio::test]
async fn optional_output_present_is_passed_with_its_flag() {
    let fs = MockFileSystem::new();
    let prepared = prepare(contract_config(), &fs);

    let (report, launched) =
        run_fake(&prepared, &fs, Box::new(MemoryFingerprintStore::new()), |e| e).await;

    assert!(report.success);
    let consume = launched.iter().find(|t| t.id == "consume").unwrap();
    assert_eq!(
        consume.command,
        "consume results/table.tsv --plot results/plot.png"
    );
}

#[tokio::test]
async fn missing_required_output_is_a_contract_failure() {
    let fs = MockFileSystem::new();
    let prepared = prepare(contract_config(), &fs);

    let (report, launched) = run_fake(
        &prepared,
        &fs,
        Box::new(MemoryFingerprintStore::new()),
        |e| e.omit_output("produce", "table"),
    )
    .await;

    assert!(!report.success);
    let produce = report.task("produce").unwrap();
    assert_eq!(produce.status, ReportStatus::Failed);
    assert_eq!(produce.error_kind.as_deref(), Some("ArtifactContractError"));

    let consume = report.task("consume").unwrap();
    assert_eq!(consume.status, ReportStatus::Skipped);
    assert_eq!(launched_ids(&launched), vec!["produce"]);
}

#[tokio::test]
async fn failing_branch_does_not_block_independent_branch() {
    let cfg = ConfigFileBuilder::new()
        .with_stage("a1", StageConfigBuilder::new("echo a1").build())
        .with_stage("a2", StageConfigBuilder::new("echo a2").after("a1").build())
        .with_stage("a3", StageConfigBuilder::new("echo a3").after("a2").build())
        .with_stage("b1", StageConfigBuilder::new("echo b1").build())
        .with_stage("b2", StageConfigBuilder::new("echo b2").after("b1").build())
        .build();
    let fs = MockFileSystem::new();
    let prepared = prepare(cfg, &fs);

    let (report, _) = run_fake(
        &prepared,
        &fs,
        Box::new(MemoryFingerprintStore::new()),
        |e| e.fail("a1"),
    )
    .await;

    assert!(!report.success);
    let status = |id: &str| report.task(id).unwrap().status;
    assert_eq!(status("a1"), ReportStatus::Failed);
    assert_eq!(status("a2"), ReportStatus::Skipped);
    assert_eq!(status("a3"), ReportStatus::Skipped);
    assert_eq!(status("b1"), ReportStatus::Succeeded);
    assert_eq!(status("b2"), ReportStatus::Succeeded);

    let a1 = report.task("a1").unwrap();
    assert_eq!(a1.error_kind.as_deref(), Some("ExecutionError"));
    assert_eq!(
        a1.log_path.as_deref(),
        Some(Path::new(".stagedag/logs/a1/a1.log"))
    );
    assert_eq!(
        report.task("a3").unwrap().detail.as_deref(),
        Some("upstream task 'a1' failed")
    );
}

#[tokio::test]
async fn empty_input_directory_fails_estimation_without_launching() {
    let fs = MockFileSystem::new();
    fs.add_dir("data/empty");

    let cfg = ConfigFileBuilder::new()
        .with_stage(
            "search",
            StageConfigBuilder::new("search {in:raw} > {out:report}")
                .input("raw", counted(path_input("data/empty"), "*.raw"))
                .output("report", output("report.tsv"))
                .build(),
        )
        .with_stage(
            "after",
            StageConfigBuilder::new("echo done").after("search").build(),
        )
        .build();
    let prepared = prepare(cfg, &fs);

    let (report, launched) =
        run_fake(&prepared, &fs, Box::new(MemoryFingerprintStore::new()), |e| e).await;

    assert!(launched.is_empty());
    let search = report.task("search").unwrap();
    assert_eq!(search.status, ReportStatus::Failed);
    assert_eq!(search.error_kind.as_deref(), Some("EstimationError"));
    assert!(search.estimate.is_none());
    assert_eq!(search.log_path, None);
    assert_eq!(report.task("after").unwrap().status, ReportStatus::Skipped);

    let mut summary = Vec::new();
    report.write_summary(&mut summary).unwrap();
    let summary = String::from_utf8(summary).unwrap();
    assert!(summary.contains("log: none (not launched)"));
    assert!(!summary.contains("search.log"));
}

#[tokio::test]
async fn missing_required_input_path_fails_the_task() {
    let fs = MockFileSystem::new();
    let cfg = ConfigFileBuilder::new()
        .with_stage(
            "search",
            StageConfigBuilder::new("search {in:raw}")
                .input("raw", path_input("data/nowhere.raw"))
                .build(),
        )
        .build();
    let prepared = prepare(cfg, &fs);

    let (report, launched) =
        run_fake(&prepared, &fs, Box::new(MemoryFingerprintStore::new()), |e| e).await;

    assert!(launched.is_empty());
    assert_eq!(
        report.task("search").unwrap().error_kind.as_deref(),
        Some("InputError")
    );
}

#[tokio::test]
async fn cluster_launcher_wraps_the_command() {
    let fs = seeded_fs();
    let mut cfg = tuning_config();
    let wrapped = ConfigFileBuilder::new()
        .cluster_launcher("srun --cpus-per-task={cpu} --mem={memory_mb}M --time={time_minutes}")
        .with_stage("x", StageConfigBuilder::new("true").build())
        .build();
    cfg.executor = wrapped.executor;
    let prepared = prepare(cfg, &fs);

    let (_, launched) =
        run_fake(&prepared, &fs, Box::new(MemoryFingerprintStore::new()), |e| e).await;

    let s1 = launched.iter().find(|t| t.id == "stage1:s1").unwrap();
    assert!(
        s1.command
            .starts_with("srun --cpus-per-task=2 --mem=8192M --time=20 sh -c 'search --raw data/s1"),
        "{}",
        s1.command
    );
}

#[tokio::test]
async fn small_worker_limit_still_runs_every_task() {
    let mut builder = ConfigFileBuilder::new().max_workers(2);
    for i in 0..6 {
        builder = builder.with_stage(
            &format!("t{i}"),
            StageConfigBuilder::new(&format!("echo {i}")).build(),
        );
    }
    let fs = MockFileSystem::new();
    let prepared = prepare(builder.build(), &fs);

    let (report, launched) =
        run_fake(&prepared, &fs, Box::new(MemoryFingerprintStore::new()), |e| e).await;
    assert!(report.success);
    assert_eq!(launched.len(), 6);
}
