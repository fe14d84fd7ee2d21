// src/main.rs

use betterci::{cli, logging, run};

/// Exit code for errors that stop a run before any job result exists
/// (bad workflow, invalid graph, unreachable API).
const EXIT_ERROR: i32 = 2;

#[tokio::main]
async fn main() {
    let code = match run_main().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("betterci error: {err:?}");
            EXIT_ERROR
        }
    };
    std::process::exit(code);
}

async fn run_main() -> anyhow::Result<i32> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    run(args).await
}
