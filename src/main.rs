use std::process::ExitCode;

use peakflops::config::BenchConfig;
use peakflops::orchestrator::Orchestrator;
use peakflops::simd::NativeKernel;
use peakflops::Result;

fn run() -> Result<()> {
    let config = BenchConfig::from_env()?;
    let kernel = NativeKernel::default();
    let mut orchestrator = Orchestrator::new(config, &kernel)?;
    let summary = orchestrator.run()?;

    if !summary.failed_threads.is_empty() {
        eprintln!(
            "{} of {} threads could not be pinned; their cores were not measured",
            summary.failed_threads.len(),
            orchestrator.config().threads
        );
    }
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("peakflops: {e}");
            ExitCode::FAILURE
        }
    }
}
