// tests/templates_and_estimates.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use stagedag::errors::EstimationError;
use stagedag::estimate::{CountedInput, ResourcePolicy, UnitCount, count_units, estimate};
use stagedag::fs::mock::MockFileSystem;
use stagedag::output::OutputOrganizer;
use stagedag::task::template::shell_quote;
use stagedag::task::{
    CommandTemplate, InputBinding, Placeholder, RenderContext, ResolvedInput, ResolvedInputs,
    TaskDescriptor, TaskInput, TaskOutput,
};

fn descriptor(template: &str) -> TaskDescriptor {
    TaskDescriptor {
        id: "quant:s1".to_string(),
        stage: "quant".to_string(),
        key: Some("s1".to_string()),
        command: Arc::new(CommandTemplate::parse(template).unwrap()),
        inputs: vec![
            TaskInput {
                name: "lib".to_string(),
                binding: InputBinding::Path(PathBuf::from("lib.speclib")),
                optional: false,
                flag: Some("--lib".to_string()),
                pattern: None,
            },
            TaskInput {
                name: "model".to_string(),
                binding: InputBinding::Path(PathBuf::from("model.bin")),
                optional: true,
                flag: Some("--model".to_string()),
                pattern: None,
            },
        ],
        outputs: vec![TaskOutput {
            name: "report".to_string(),
            path: PathBuf::from("results/quant/s1/report.tsv"),
            required: true,
        }],
        resources: ResourcePolicy::default(),
        output_dir: PathBuf::from("results/quant/s1"),
        log_path: PathBuf::from(".stagedag/logs/quant/s1.log"),
        params: BTreeMap::from([("mode".to_string(), "fast scan".to_string())]),
    }
}

fn inputs(model: ResolvedInput) -> ResolvedInputs {
    BTreeMap::from([
        (
            "lib".to_string(),
            ResolvedInput::Paths(vec![PathBuf::from("lib.speclib")]),
        ),
        ("model".to_string(), model),
    ])
}

#[test]
fn template_lists_its_placeholders() {
    let t = CommandTemplate::parse("run {in:lib} {{literal}} {out:report} -t {cpu}").unwrap();
    let found: Vec<&Placeholder> = t.placeholders().collect();
    assert_eq!(
        found,
        vec![
            &Placeholder::Input("lib".to_string()),
            &Placeholder::Output("report".to_string()),
            &Placeholder::Cpu,
        ]
    );
    assert!(Placeholder::Cpu.needs_estimate());
}

#[test]
fn malformed_templates_are_rejected() {
    assert!(CommandTemplate::parse("run {bogus}").is_err());
    assert!(CommandTemplate::parse("run {in:}").is_err());
    assert!(CommandTemplate::parse("run {sample:x}").is_err());
    assert!(CommandTemplate::parse("run {in:lib").is_err());
}

#[test]
fn renders_paths_flags_params_and_estimates() {
    let task = descriptor(
        "quant {arg:lib} {arg:model} --sample {sample} --mode {param:mode} -t {cpu} --out {out:report}",
    );
    let inputs = inputs(ResolvedInput::Absent);
    let estimate = stagedag::estimate::ResourceEstimate {
        cpu: 8,
        memory_mb: 1024,
        time: Duration::from_secs(90),
    };
    let ctx = RenderContext {
        task: &task,
        inputs: &inputs,
        estimate: Some(&estimate),
    };

    assert_eq!(
        task.command.render(&ctx).unwrap(),
        "quant --lib lib.speclib  --sample s1 --mode 'fast scan' -t 8 --out results/quant/s1/report.tsv"
    );
}

#[test]
fn estimate_placeholders_need_an_estimate() {
    let task = descriptor("run -t {cpu}");
    let inputs = inputs(ResolvedInput::Absent);
    let ctx = RenderContext {
        task: &task,
        inputs: &inputs,
        estimate: None,
    };
    assert!(task.command.render(&ctx).is_err());
}

#[test]
fn shell_quote_leaves_safe_words_alone() {
    assert_eq!(shell_quote("data/s1.raw"), "data/s1.raw");
    assert_eq!(shell_quote("two words"), "'two words'");
    assert_eq!(shell_quote("it's"), r"'it'\''s'");
    assert_eq!(shell_quote(""), "''");
}

#[test]
fn organizer_composes_nesting_under_root() {
    let org = OutputOrganizer::new("results", ".stagedag");
    let nesting = vec!["{stage}".to_string(), "{sample}".to_string()];

    assert_eq!(
        org.path_for("quant", Some("s2"), "{sample}.tsv", &nesting),
        PathBuf::from("results/quant/s2/s2.tsv")
    );
    // Single-instance stages drop the empty sample segment.
    assert_eq!(
        org.task_dir("library", None, &nesting),
        PathBuf::from("results/library")
    );
    assert_eq!(org.task_dir("library", None, &[]), PathBuf::from("results"));
    assert_eq!(
        org.log_path_for("quant", Some("s2")),
        PathBuf::from(".stagedag/logs/quant/s2.log")
    );
}

fn policy() -> ResourcePolicy {
    ResourcePolicy {
        cpu: 4,
        memory_mb: 16_000,
        base_time: Duration::from_secs(10 * 60),
        per_unit_time: Duration::from_secs(5 * 60),
        fast_mode_factor: 0.5,
    }
}

#[test]
fn estimate_is_linear_in_units_and_scaled_in_fast_mode() {
    let e = estimate("t", &policy(), UnitCount::Counted(3), &[], false).unwrap();
    assert_eq!(e.cpu, 4);
    assert_eq!(e.memory_mb, 16_000);
    assert_eq!(e.time, Duration::from_secs(25 * 60));
    assert_eq!(e.time_minutes(), 25);

    let fast = estimate("t", &policy(), UnitCount::Counted(3), &[], true).unwrap();
    assert_eq!(fast.time, Duration::from_secs(750));
    assert_eq!(fast.time_minutes(), 13);

    let uncounted = estimate("t", &policy(), UnitCount::NotCounted, &[], false).unwrap();
    assert_eq!(uncounted.time, Duration::from_secs(10 * 60));
}

#[test]
fn fast_mode_never_lengthens_or_overflows_the_estimate() {
    let mut huge = policy();
    huge.base_time = Duration::MAX;
    huge.fast_mode_factor = 1.0;
    let e = estimate("t", &huge, UnitCount::Counted(usize::MAX), &[], true).unwrap();
    assert_eq!(e.time, Duration::MAX);

    let mut out_of_range = policy();
    out_of_range.fast_mode_factor = 1e30;
    let err = estimate("quant:s1", &out_of_range, UnitCount::NotCounted, &[], true).unwrap_err();
    assert_eq!(
        err,
        EstimationError::TimeOutOfRange {
            task: "quant:s1".to_string()
        }
    );
}

#[test]
fn zero_counted_units_is_an_error_not_a_guess() {
    let err = estimate(
        "quant:s1",
        &policy(),
        UnitCount::Counted(0),
        &["data/s1/*.raw".to_string()],
        false,
    )
    .unwrap_err();
    assert_eq!(
        err,
        EstimationError::NoInputsFound {
            task: "quant:s1".to_string(),
            patterns: vec!["data/s1/*.raw".to_string()],
        }
    );
}

#[test]
fn units_are_counted_per_pattern() {
    let fs = MockFileSystem::new();
    fs.add_file("data/s1/a.raw", "");
    fs.add_file("data/s1/b.raw", "");
    fs.add_file("data/s1/readme.md", "");

    let counted = |pattern: &str| CountedInput {
        dir: Path::new("data/s1").to_path_buf(),
        pattern: pattern.to_string(),
    };
    assert_eq!(
        count_units(&fs, &[counted("*.raw")]).unwrap(),
        UnitCount::Counted(2)
    );
    assert_eq!(
        count_units(&fs, &[counted("*.raw"), counted("*.md")]).unwrap(),
        UnitCount::Counted(3)
    );
    assert_eq!(count_units(&fs, &[]).unwrap(), UnitCount::NotCounted);
}
