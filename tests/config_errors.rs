// tests/config_errors.rs

use std::io::Write;

use tempfile::NamedTempFile;

use stagedag::config::{ConfigFile, load_and_validate, parse_str};
use stagedag::errors::StagedagError;
use stagedag_test_utils::builders::{
    ConfigFileBuilder, StageConfigBuilder, output, path_input, resources,
};

fn config_error(toml: &str) -> String {
    let raw = parse_str(toml).expect("toml should parse");
    match ConfigFile::try_from(raw) {
        Err(StagedagError::ConfigError(msg)) => msg,
        Err(e) => panic!("Expected ConfigError, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn full_config_file_loads() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[pipeline]
name = "diann-tuning"
output_root = "out"
max_workers = 3

[executor]
kind = "cluster"
launcher = "srun --cpus-per-task={{cpu}}"

[resources]
cpu = 4
base_time = "30m"

[fan_out]
samples = ["s1", "s2"]
runs = {{ dir = "data/raw", pattern = "*.raw" }}

[params]
threads = "8"

[stage.library]
command = "diann --threads {{param:threads}} --out-lib {{out:lib}}"
outputs.lib = {{ path = "lib.speclib" }}
resources = {{ memory_mb = 16000 }}

[stage.quant]
command = "diann --lib {{in:lib}} --dir {{in:raw}}"
over = "samples"
nesting = ["quant", "{{sample}}"]
round = 1
inputs.lib = {{ stage = "library", output = "lib" }}
inputs.raw = {{ path = "data/raw/{{sample}}", pattern = "*.raw" }}
"#
    )
    .unwrap();

    let cfg = load_and_validate(file.path()).unwrap();
    assert_eq!(cfg.pipeline.name, "diann-tuning");
    assert_eq!(cfg.pipeline.max_workers, 3);
    assert!(cfg.pipeline.resume);
    assert_eq!(cfg.stage.len(), 2);
    assert_eq!(cfg.stage["quant"].over.as_deref(), Some("samples"));
    assert_eq!(cfg.stage["quant"].round, Some(1));
    assert_eq!(cfg.stage["library"].resources.memory_mb, Some(16000));
    assert_eq!(cfg.params["threads"], "8");
}

#[test]
fn config_without_stages_is_rejected() {
    let msg = config_error("[pipeline]\nname = \"empty\"\n");
    assert!(msg.contains("at least one"));
}

#[test]
fn zero_workers_is_rejected() {
    let msg = config_error(
        r#"
[pipeline]
max_workers = 0

[stage.a]
command = "true"
"#,
    );
    assert!(msg.contains("max_workers"));
}

#[test]
fn fast_mode_factor_must_shorten_estimates() {
    for factor in ["0.0", "1.5", "1e30", "-0.5"] {
        let msg = config_error(&format!(
            "[resources]\nfast_mode_factor = {factor}\n\n[stage.a]\ncommand = \"true\"\n"
        ));
        assert!(msg.contains("fast_mode_factor"), "factor {factor}: {msg}");
    }

    let raw = parse_str(
        "[resources]\nfast_mode_factor = 1.0\n\n[stage.a]\ncommand = \"true\"\n",
    )
    .unwrap();
    assert!(ConfigFile::try_from(raw).is_ok());
}

#[test]
fn cluster_without_launcher_is_rejected() {
    let msg = config_error(
        r#"
[executor]
kind = "cluster"

[stage.a]
command = "true"
"#,
    );
    assert!(msg.contains("launcher"));
}

#[test]
fn input_must_have_exactly_one_source() {
    let msg = config_error(
        r#"
[stage.a]
command = "cat {in:x}"
inputs.x = { path = "x.txt", value = "y" }
"#,
    );
    assert!(msg.contains("exactly one"));

    let msg = config_error(
        r#"
[stage.a]
command = "cat {in:x}"
inputs.x = { stage = "b" }
"#,
    );
    assert!(msg.contains("no `output`"));
}

#[test]
fn select_and_gather_are_exclusive() {
    let msg = config_error(
        r#"
[stage.a]
command = "cat {in:x}"
inputs.x = { stage = "b", output = "o", select = "s1", gather = true }
"#,
    );
    assert!(msg.contains("both"));
}

#[test]
fn bad_durations_and_globs_are_rejected() {
    let err = ConfigFileBuilder::new()
        .with_stage(
            "a",
            StageConfigBuilder::new("true")
                .resources(resources(1, 100, "ten minutes", "1m"))
                .build(),
        )
        .try_build()
        .unwrap_err();
    assert!(matches!(err, StagedagError::ConfigError(ref m) if m.contains("base_time")));

    let err = ConfigFileBuilder::new()
        .discovered_fan_out("samples", "data", "[")
        .with_stage("a", StageConfigBuilder::new("true").build())
        .try_build()
        .unwrap_err();
    assert!(matches!(err, StagedagError::ConfigError(ref m) if m.contains("invalid pattern")));

    let err = ConfigFileBuilder::new()
        .grace_period("soon")
        .with_stage("a", StageConfigBuilder::new("true").build())
        .try_build()
        .unwrap_err();
    assert!(matches!(err, StagedagError::ConfigError(ref m) if m.contains("grace_period")));
}

#[test]
fn unknown_stage_fields_fail_to_parse() {
    let result = parse_str(
        r#"
[stage.a]
command = "true"
cmd = "typo"
"#,
    );
    assert!(matches!(result, Err(StagedagError::TomlError(_))));
}

#[test]
fn empty_output_path_is_rejected() {
    let err = ConfigFileBuilder::new()
        .with_stage(
            "a",
            StageConfigBuilder::new("true")
                .input("x", path_input("x"))
                .output("o", output("  "))
                .build(),
        )
        .try_build()
        .unwrap_err();
    assert!(matches!(err, StagedagError::ConfigError(ref m) if m.contains("empty path")));
}
