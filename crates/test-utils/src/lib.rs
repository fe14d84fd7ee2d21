pub mod builders;
pub mod fake_executor;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use betterci::dag::{Scheduler, SchedulerOptions};
use betterci::engine::{CoreRuntime, Runtime, RuntimeEvent};
use betterci::logging::LOG_ENV;
use betterci::model::Job;
use betterci::report::RunReport;
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, fmt};

use crate::fake_executor::{ExecutionLog, FakeExecutor};

static INIT: Once = Once::new();

/// Install a test-writer subscriber once per test binary.
///
/// Reads the same `BETTERCI_LOG` variable as the binary, falling back to
/// `warn` so passing tests stay quiet. Output only shows for failing tests
/// unless `--nocapture` is given.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = std::env::var(LOG_ENV)
            .ok()
            .and_then(|value| EnvFilter::try_new(value.trim()).ok())
            .unwrap_or_else(|| EnvFilter::new("warn"));

        let _ = fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(false)
            .try_init();
    });
}

/// Await `f`, panicking if it takes longer than five seconds.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(5), f)
        .await
        .expect("test timed out after 5 seconds")
}

/// Drive `jobs` through the real scheduler and runtime with a
/// [`FakeExecutor`] configured by `script`.
pub async fn run_with_fake_executor(
    jobs: Vec<Job>,
    options: SchedulerOptions,
    script: impl FnOnce(FakeExecutor) -> FakeExecutor,
) -> (RunReport, ExecutionLog) {
    let scheduler = Scheduler::new(jobs, options).expect("fixture graph must be valid");
    let (tx, rx) = mpsc::channel::<RuntimeEvent>(64);
    let executor = script(FakeExecutor::new(tx));
    let log = executor.log();

    let runtime = Runtime::new(CoreRuntime::new(scheduler), rx, executor);
    let report = with_timeout(runtime.run()).await.expect("runtime failed");
    (report, log)
}
