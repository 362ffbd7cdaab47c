#![allow(dead_code)]

use std::sync::Arc;

use tokio::sync::mpsc;

use stagedag::PreparedPipeline;
use stagedag::config::ConfigFile;
use stagedag::dag::ScheduledTask;
use stagedag::engine::RuntimeEvent;
use stagedag::fs::mock::MockFileSystem;
use stagedag::report::RunReport;
use stagedag::state::FingerprintStore;
use stagedag_test_utils::fake_executor::FakeExecutor;
use stagedag_test_utils::with_timeout;

/// Build the task graph for `cfg` against the mock filesystem.
pub fn prepare(cfg: ConfigFile, fs: &MockFileSystem) -> PreparedPipeline {
    PreparedPipeline::from_config(cfg, fs).expect("pipeline should build")
}

/// Run a prepared pipeline on a `FakeExecutor`, returning the report and
/// every task the executor was asked to launch.
pub async fn run_fake(
    prepared: &PreparedPipeline,
    fs: &MockFileSystem,
    fingerprints: Box<dyn FingerprintStore>,
    configure: impl FnOnce(FakeExecutor) -> FakeExecutor,
) -> (RunReport, Vec<ScheduledTask>) {
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(256);
    let executor = configure(FakeExecutor::new(
        rt_tx.clone(),
        Arc::clone(&prepared.graph),
        fs.clone(),
    ));
    let invocations = executor.invocations();

    let report = with_timeout(stagedag::execute(
        prepared,
        Arc::new(fs.clone()),
        fingerprints,
        executor,
        rt_rx,
    ))
    .await
    .expect("run should not error");

    let launched = invocations.lock().unwrap().clone();
    (report, launched)
}

pub fn launched_ids(launched: &[ScheduledTask]) -> Vec<String> {
    launched.iter().map(|t| t.id.clone()).collect()
}
