// tests/build_graph.rs

use std::path::PathBuf;

use stagedag::PreparedPipeline;
use stagedag::artifact::{ArtifactRef, ConsumptionMode};
use stagedag::config::ConfigFile;
use stagedag::errors::{BuildError, StagedagError};
use stagedag::fs::mock::MockFileSystem;
use stagedag::task::InputBinding;
use stagedag_test_utils::builders::{
    ConfigFileBuilder, StageConfigBuilder, gather_input, output, path_input, select_input,
    single_use_output, stage_input,
};
use stagedag_test_utils::init_tracing;

/// library -> quant (per sample) -> summary (gathers every sample)
fn fan_out_config() -> ConfigFile {
    ConfigFileBuilder::new()
        .fan_out("samples", &["s1", "s2", "s3"])
        .with_stage(
            "library",
            StageConfigBuilder::new("predict --out {out:lib}")
                .output("lib", output("lib.speclib"))
                .build(),
        )
        .with_stage(
            "quant",
            StageConfigBuilder::new("quant --lib {in:lib} --raw {in:raw} --out {out:report}")
                .over("samples")
                .nesting(&["quant", "{sample}"])
                .input("lib", stage_input("library", "lib"))
                .input("raw", path_input("data/{sample}.raw"))
                .output("report", output("report.tsv"))
                .build(),
        )
        .with_stage(
            "summary",
            StageConfigBuilder::new("summarise {in:reports} > {out:table}")
                .input("reports", gather_input("quant", "report"))
                .output("table", output("summary.tsv"))
                .build(),
        )
        .build()
}

fn build_err(cfg: ConfigFile) -> BuildError {
    let fs = MockFileSystem::new();
    match PreparedPipeline::from_config(cfg, &fs) {
        Err(StagedagError::Build(err)) => err,
        Err(other) => panic!("expected build error, got {other:?}"),
        Ok(_) => panic!("expected build error, got a graph"),
    }
}

#[test]
fn fan_out_expands_one_task_per_key() {
    init_tracing();
    let fs = MockFileSystem::new();
    let prepared = PreparedPipeline::from_config(fan_out_config(), &fs).unwrap();
    let graph = &prepared.graph;

    let ids: Vec<&str> = graph.task_ids().map(|s| s.as_str()).collect();
    assert_eq!(
        ids,
        vec!["library", "quant:s1", "quant:s2", "quant:s3", "summary"]
    );
    assert_eq!(graph.roots(), vec!["library".to_string()]);
    assert_eq!(
        graph.dependencies_of("summary"),
        &["quant:s1".to_string(), "quant:s2".to_string(), "quant:s3".to_string()]
    );

    let quant = graph.get("quant:s2").unwrap();
    assert_eq!(quant.key.as_deref(), Some("s2"));
    assert_eq!(
        quant.output("report").unwrap().path,
        PathBuf::from("results/quant/s2/report.tsv")
    );
    assert_eq!(
        quant.input("raw").unwrap().binding,
        InputBinding::Path(PathBuf::from("data/s2.raw"))
    );
}

#[test]
fn build_is_deterministic() {
    let fs = MockFileSystem::new();
    let a = PreparedPipeline::from_config(fan_out_config(), &fs).unwrap();
    let b = PreparedPipeline::from_config(fan_out_config(), &fs).unwrap();

    let ids_a: Vec<_> = a.graph.task_ids().cloned().collect();
    let ids_b: Vec<_> = b.graph.task_ids().cloned().collect();
    assert_eq!(ids_a, ids_b);
    assert_eq!(a.graph.edges(), b.graph.edges());
    assert_eq!(
        a.graph.artifact_specs().keys().collect::<Vec<_>>(),
        b.graph.artifact_specs().keys().collect::<Vec<_>>()
    );
}

#[test]
fn independent_stages_are_ordered_by_name_not_by_insertion() {
    let cfg = ConfigFileBuilder::new()
        .with_stage("zeta", StageConfigBuilder::new("echo z").build())
        .with_stage("mid", StageConfigBuilder::new("echo m").after("zeta").build())
        .with_stage("alpha", StageConfigBuilder::new("echo a").build())
        .build();
    let fs = MockFileSystem::new();
    let prepared = PreparedPipeline::from_config(cfg, &fs).unwrap();

    let ids: Vec<_> = prepared.graph.task_ids().cloned().collect();
    assert_eq!(ids, vec!["alpha", "zeta", "mid"]);
}

#[test]
fn shared_upstream_output_is_broadcast() {
    let fs = MockFileSystem::new();
    let prepared = PreparedPipeline::from_config(fan_out_config(), &fs).unwrap();

    let spec = prepared
        .graph
        .artifact(&ArtifactRef::new("library", "lib"))
        .expect("library output is tracked");
    assert_eq!(spec.mode, ConsumptionMode::Broadcast);
    assert_eq!(
        spec.consumers,
        vec!["quant:s1", "quant:s2", "quant:s3"]
    );

    let per_sample = prepared
        .graph
        .artifact(&ArtifactRef::new("quant:s1", "report"))
        .unwrap();
    assert_eq!(per_sample.mode, ConsumptionMode::SingleUse);
    assert_eq!(per_sample.consumers, vec!["summary"]);
}

#[test]
fn single_use_output_with_several_consumers_is_rejected() {
    let cfg = ConfigFileBuilder::new()
        .fan_out("samples", &["s1", "s2"])
        .with_stage(
            "tune",
            StageConfigBuilder::new("tune {out:model}")
                .output("model", single_use_output("model.bin"))
                .build(),
        )
        .with_stage(
            "apply",
            StageConfigBuilder::new("apply {in:model}")
                .over("samples")
                .nesting(&["{sample}"])
                .input("model", stage_input("tune", "model"))
                .build(),
        )
        .build();

    match build_err(cfg) {
        BuildError::BroadcastViolation {
            producer,
            output,
            consumers,
        } => {
            assert_eq!(producer, "tune");
            assert_eq!(output, "model");
            assert_eq!(consumers.len(), 2);
        }
        other => panic!("expected BroadcastViolation, got {other:?}"),
    }
}

#[test]
fn cycle_between_stages_is_rejected() {
    let cfg = ConfigFileBuilder::new()
        .with_stage("a", StageConfigBuilder::new("echo a").after("b").build())
        .with_stage("b", StageConfigBuilder::new("echo b").after("a").build())
        .build();

    match build_err(cfg) {
        BuildError::Cycle(stage) => assert!(stage == "a" || stage == "b"),
        other => panic!("expected Cycle, got {other:?}"),
    }
}

#[test]
fn self_dependency_is_a_cycle() {
    let cfg = ConfigFileBuilder::new()
        .with_stage("a", StageConfigBuilder::new("echo a").after("a").build())
        .build();
    assert_eq!(build_err(cfg), BuildError::Cycle("a".to_string()));
}

#[test]
fn unknown_stage_and_output_are_rejected() {
    let cfg = ConfigFileBuilder::new()
        .with_stage("a", StageConfigBuilder::new("echo a").after("ghost").build())
        .build();
    assert_eq!(
        build_err(cfg),
        BuildError::UnknownStage {
            stage: "a".to_string(),
            target: "ghost".to_string()
        }
    );

    let cfg = ConfigFileBuilder::new()
        .with_stage(
            "a",
            StageConfigBuilder::new("echo {out:x}")
                .output("x", output("x.txt"))
                .build(),
        )
        .with_stage(
            "b",
            StageConfigBuilder::new("cat {in:y}")
                .input("y", stage_input("a", "y"))
                .build(),
        )
        .build();
    assert!(matches!(
        build_err(cfg),
        BuildError::UnknownOutput { ref output, .. } if output == "y"
    ));
}

#[test]
fn selecting_a_key_outside_the_set_is_rejected() {
    let cfg = ConfigFileBuilder::new()
        .fan_out("samples", &["s1", "s2"])
        .with_stage(
            "first",
            StageConfigBuilder::new("run {out:report}")
                .over("samples")
                .nesting(&["{sample}"])
                .output("report", output("report.tsv"))
                .build(),
        )
        .with_stage(
            "tune",
            StageConfigBuilder::new("tune {in:report}")
                .input("report", select_input("first", "report", "s9"))
                .build(),
        )
        .build();

    assert!(matches!(
        build_err(cfg),
        BuildError::UnknownFanOutKey { ref key, .. } if key == "s9"
    ));
}

#[test]
fn consuming_a_fan_out_without_select_or_gather_is_rejected() {
    let cfg = ConfigFileBuilder::new()
        .fan_out("samples", &["s1", "s2"])
        .with_stage(
            "first",
            StageConfigBuilder::new("run {out:report}")
                .over("samples")
                .nesting(&["{sample}"])
                .output("report", output("report.tsv"))
                .build(),
        )
        .with_stage(
            "single",
            StageConfigBuilder::new("cat {in:report}")
                .input("report", stage_input("first", "report"))
                .build(),
        )
        .build();
    assert!(matches!(
        build_err(cfg),
        BuildError::MisalignedFanOut { ref stage, .. } if stage == "single"
    ));
}

#[test]
fn edges_may_not_point_back_to_an_earlier_round() {
    let cfg = ConfigFileBuilder::new()
        .with_stage(
            "late",
            StageConfigBuilder::new("echo late").round(2).build(),
        )
        .with_stage(
            "early",
            StageConfigBuilder::new("echo early").round(1).after("late").build(),
        )
        .build();

    assert_eq!(
        build_err(cfg),
        BuildError::RoundOrder {
            stage: "early".to_string(),
            round: 1,
            upstream: "late".to_string(),
            upstream_round: 2,
        }
    );
}

#[test]
fn fan_out_outputs_without_a_sample_segment_collide() {
    let cfg = ConfigFileBuilder::new()
        .fan_out("samples", &["s1", "s2"])
        .with_stage(
            "quant",
            StageConfigBuilder::new("quant {out:report}")
                .over("samples")
                .output("report", output("report.tsv"))
                .build(),
        )
        .build();

    match build_err(cfg) {
        BuildError::OutputCollision { path, first, second } => {
            assert_eq!(path, PathBuf::from("results/report.tsv"));
            assert_eq!((first.as_str(), second.as_str()), ("quant:s1", "quant:s2"));
        }
        other => panic!("expected OutputCollision, got {other:?}"),
    }
}

#[test]
fn undeclared_template_placeholders_are_rejected() {
    let cfg = ConfigFileBuilder::new()
        .with_stage("a", StageConfigBuilder::new("run {in:missing}").build())
        .build();
    assert!(matches!(build_err(cfg), BuildError::MalformedStage { .. }));

    let cfg = ConfigFileBuilder::new()
        .with_stage("a", StageConfigBuilder::new("run {param:threads}").build())
        .build();
    assert!(matches!(build_err(cfg), BuildError::MalformedStage { .. }));

    let cfg = ConfigFileBuilder::new()
        .param("threads", "8")
        .with_stage("a", StageConfigBuilder::new("run -t {param:threads}").build())
        .build();
    let fs = MockFileSystem::new();
    assert!(PreparedPipeline::from_config(cfg, &fs).is_ok());
}

#[test]
fn empty_fan_out_set_is_rejected() {
    let cfg = ConfigFileBuilder::new()
        .discovered_fan_out("samples", "data/raw", "*.raw")
        .with_stage(
            "quant",
            StageConfigBuilder::new("quant {sample}")
                .over("samples")
                .build(),
        )
        .build();
    assert!(matches!(build_err(cfg), BuildError::EmptyFanOut { .. }));
}

#[test]
fn fan_out_keys_can_be_discovered_from_files() {
    let fs = MockFileSystem::new();
    fs.add_file("data/raw/b.raw", "");
    fs.add_file("data/raw/a.raw", "");
    fs.add_file("data/raw/notes.txt", "");

    let cfg = ConfigFileBuilder::new()
        .discovered_fan_out("samples", "data/raw", "*.raw")
        .with_stage(
            "quant",
            StageConfigBuilder::new("quant {in:raw}")
                .over("samples")
                .input("raw", path_input("data/raw/{sample}.raw"))
                .build(),
        )
        .build();

    let prepared = PreparedPipeline::from_config(cfg, &fs).unwrap();
    assert_eq!(
        prepared.definition.fan_out_sets["samples"],
        vec!["a".to_string(), "b".to_string()]
    );
    let ids: Vec<_> = prepared.graph.task_ids().cloned().collect();
    assert_eq!(ids, vec!["quant:a", "quant:b"]);
}
