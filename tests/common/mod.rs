#![allow(dead_code, unused_imports)]

pub use betterci_test_utils::builders;
pub use betterci_test_utils::fake_executor::{ExecutionLog, FakeExecutor};
pub use betterci_test_utils::{init_tracing, run_with_fake_executor, with_timeout};

use std::path::Path;
use std::sync::Arc;

use betterci::cache::CacheStore;
use betterci::exec::{JobRunner, ShellProcessRunner, StaticToolProbe, ToolProbe};

/// Runner with real `sh` processes, a cache under `cache_root` and a tool
/// probe that knows no tools.
pub fn shell_runner(cache_root: &Path) -> Arc<JobRunner> {
    let tools: Arc<dyn ToolProbe> = Arc::new(StaticToolProbe::default());
    let cache = Arc::new(CacheStore::new(cache_root, Arc::clone(&tools)));
    Arc::new(JobRunner::new(cache, tools, Arc::new(ShellProcessRunner)))
}
