// tests/input_hashing.rs
//
// Input fingerprinting reads whole files; the runtime must keep launching
// and finishing other tasks while that happens.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use stagedag::PreparedPipeline;
use stagedag::dag::ScheduledTask;
use stagedag::engine::RuntimeEvent;
use stagedag::fs::FileSystem;
use stagedag::fs::mock::MockFileSystem;
use stagedag::report::ReportStatus;
use stagedag::state::MemoryFingerprintStore;
use stagedag_test_utils::builders::{ConfigFileBuilder, StageConfigBuilder, output, path_input};
use stagedag_test_utils::fake_executor::FakeExecutor;
use stagedag_test_utils::{init_tracing, with_timeout};

/// Mock filesystem whose reads of one file block until a given task has
/// been launched (or a deadline passes).
#[derive(Debug)]
struct SlowReadFs {
    inner: MockFileSystem,
    slow_path: PathBuf,
    wait_for: String,
    launched: Arc<Mutex<Vec<ScheduledTask>>>,
    saw_launch: Arc<AtomicBool>,
}

impl SlowReadFs {
    fn block_until_launched(&self) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            let launched = self
                .launched
                .lock()
                .unwrap()
                .iter()
                .any(|t| t.id == self.wait_for);
            if launched {
                self.saw_launch.store(true, Ordering::SeqCst);
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

impl FileSystem for SlowReadFs {
    fn read_to_string(&self, path: &Path) -> anyhow::Result<String> {
        self.inner.read_to_string(path)
    }
    fn open_read(&self, path: &Path) -> anyhow::Result<Box<dyn Read + Send>> {
        if path == self.slow_path {
            self.block_until_launched();
        }
        self.inner.open_read(path)
    }
    fn write(&self, path: &Path, contents: &[u8]) -> anyhow::Result<()> {
        self.inner.write(path, contents)
    }
    fn create_dir_all(&self, path: &Path) -> anyhow::Result<()> {
        self.inner.create_dir_all(path)
    }
    fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path)
    }
    fn is_file(&self, path: &Path) -> bool {
        self.inner.is_file(path)
    }
    fn is_dir(&self, path: &Path) -> bool {
        self.inner.is_dir(path)
    }
    fn read_dir(&self, path: &Path) -> anyhow::Result<Vec<PathBuf>> {
        self.inner.read_dir(path)
    }
}

#[tokio::test]
async fn other_tasks_launch_while_large_inputs_are_hashed() {
    init_tracing();
    let mock = MockFileSystem::new();
    mock.add_file("data/big.raw", "spectra");

    // "a_big" is dispatched first; its input read only returns once
    // "b_quick" has been launched.
    let cfg = ConfigFileBuilder::new()
        .max_workers(2)
        .with_stage(
            "a_big",
            StageConfigBuilder::new("search {in:raw} > {out:report}")
                .input("raw", path_input("data/big.raw"))
                .output("report", output("big.tsv"))
                .build(),
        )
        .with_stage(
            "b_quick",
            StageConfigBuilder::new("echo quick > {out:note}")
                .output("note", output("quick.txt"))
                .build(),
        )
        .build();
    let prepared = PreparedPipeline::from_config(cfg, &mock).unwrap();

    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);
    let executor = FakeExecutor::new(rt_tx.clone(), Arc::clone(&prepared.graph), mock.clone());
    let launched = executor.invocations();
    let saw_launch = Arc::new(AtomicBool::new(false));

    let fs = Arc::new(SlowReadFs {
        inner: mock.clone(),
        slow_path: PathBuf::from("data/big.raw"),
        wait_for: "b_quick".to_string(),
        launched: Arc::clone(&launched),
        saw_launch: Arc::clone(&saw_launch),
    });

    let report = with_timeout(stagedag::execute(
        &prepared,
        fs,
        Box::new(MemoryFingerprintStore::new()),
        executor,
        rt_rx,
    ))
    .await
    .unwrap();

    assert!(
        saw_launch.load(Ordering::SeqCst),
        "b_quick was not launched while a_big's inputs were being hashed"
    );
    assert!(report.success);
    assert_eq!(report.task("a_big").unwrap().status, ReportStatus::Succeeded);
    assert_eq!(report.task("b_quick").unwrap().status, ReportStatus::Succeeded);
}
