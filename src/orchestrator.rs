//! The run state machine: provision, launch, join, release.
//!
//! ```text
//! Idle -> Provisioned -> Running -> Joined -> Released
//! ```
//!
//! Workers are scoped threads, so each one borrows only its own disjoint `A`/`B`
//! sub-slices and every borrow ends before the arenas are released. Handles live in a
//! local table owned by the run and are joined in index order.

use std::any::Any;
use std::fmt;
use std::io::{self, Write};
use std::sync::Mutex;
use std::thread;

use crate::affinity::{Affinity, OsAffinity};
use crate::clock::{Clock, HardwareClock};
use crate::config::BenchConfig;
use crate::error::{join_error, spawn_error, BenchError, Result};
use crate::kernel::{Kernel, ThreadBuffers};
use crate::memory::{provision_shared, provision_thread, SharedArenas, ThreadArena};
use crate::pagemap;
use crate::workload::{BenchmarkResult, CacheTierWorkload};

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Provisioned,
    Running,
    Joined,
    Released,
}

/// What a worker thread is handed at launch.
///
/// Shared strategies arrive with their buffers already carved out of the arenas.
/// Per-thread strategies arrive empty and map their own region.
#[derive(Debug)]
pub struct ThreadContext<'a> {
    pub index: usize,
    pub buffers: Option<ThreadBuffers<'a>>,
}

/// Outcome of a run that reached `Released`.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// One result per measured thread, in index order.
    pub results: Vec<BenchmarkResult>,
    /// Threads that could not be pinned, with the reason.
    pub failed_threads: Vec<(usize, BenchError)>,
    /// Bytes returned to the system at teardown.
    pub released_bytes: usize,
}

/// Drives one benchmark run across `config.threads` pinned workers.
pub struct Orchestrator<'k, K, C = HardwareClock, A = OsAffinity> {
    config: BenchConfig,
    kernel: &'k K,
    clock: C,
    affinity: A,
    phase: RunPhase,
}

impl<'k, K: Kernel> Orchestrator<'k, K> {
    /// Validates `config` against the kernel's tile and prepares an idle run.
    pub fn new(config: BenchConfig, kernel: &'k K) -> Result<Self> {
        config.validate(kernel.tile())?;
        Ok(Orchestrator {
            config,
            kernel,
            clock: HardwareClock,
            affinity: OsAffinity,
            phase: RunPhase::Idle,
        })
    }
}

impl<'k, K: Kernel, C: Clock, A: Affinity> Orchestrator<'k, K, C, A> {
    pub fn with_clock<C2: Clock>(self, clock: C2) -> Orchestrator<'k, K, C2, A> {
        Orchestrator {
            config: self.config,
            kernel: self.kernel,
            clock,
            affinity: self.affinity,
            phase: self.phase,
        }
    }

    pub fn with_affinity<A2: Affinity>(self, affinity: A2) -> Orchestrator<'k, K, C, A2> {
        Orchestrator {
            config: self.config,
            kernel: self.kernel,
            clock: self.clock,
            affinity,
            phase: self.phase,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    /// Runs the benchmark, printing to standard output.
    pub fn run(&mut self) -> Result<RunSummary> {
        let mut stdout = io::stdout();
        self.run_to(&mut stdout)
    }

    /// Runs the benchmark, writing every report line to `out`.
    ///
    /// Every launched worker is joined before returning, and each failure is reported.
    /// Returns the first run-fatal error. On that path the phase is left where the run
    /// stopped and no teardown footer is printed, though every arena is still unmapped
    /// or freed when it goes out of scope. A report line that cannot be written is
    /// announced once on standard error and the run carries on.
    pub fn run_to<W: Write + Send>(&mut self, out: &mut W) -> Result<RunSummary> {
        let sink = Mutex::new(ReportSink::new(out));
        let config = &self.config;
        let tier = config.tier_config();

        report(
            &sink,
            format_args!(
                "peakflops {}: {} threads, {} cache, {} memory, peak {:.2} GFlops",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                config.threads,
                tier.label,
                config.strategy,
                config.peak_gflops
            ),
        );

        // Idle -> Provisioned
        self.phase = RunPhase::Idle;
        let mut shared = if config.strategy.is_shared() {
            match provision_shared(config) {
                Ok(arenas) => Some(arenas),
                Err(e) => {
                    report(&sink, format_args!("Error in {}: {}", e.operation(), e));
                    return Err(e);
                }
            }
        } else {
            None
        };
        let contexts = match build_contexts(shared.as_mut(), config.threads) {
            Ok(contexts) => contexts,
            Err(e) => {
                report(&sink, format_args!("Error in {}: {}", e.operation(), e));
                return Err(e);
            }
        };
        self.phase = RunPhase::Provisioned;

        // Provisioned -> Running -> Joined
        let workload = CacheTierWorkload::new(
            tier,
            config.peak_gflops,
            self.kernel,
            &self.clock,
            &self.affinity,
        );
        let phase = &mut self.phase;
        let (results, failed_threads, worker_released) = thread::scope(|s| {
            let mut fatal = None;
            let mut handles = Vec::with_capacity(contexts.len());
            for context in contexts {
                let index = context.index;
                let workload = &workload;
                let sink = &sink;
                let spawned = thread::Builder::new()
                    .name(format!("peakflops-{}", index))
                    .spawn_scoped(s, move || run_worker(context, workload, config, sink));
                match spawned {
                    Ok(handle) => {
                        handles.push((index, handle));
                        *phase = RunPhase::Running;
                    }
                    Err(e) => {
                        let err = spawn_error(index, e.to_string());
                        report(sink, format_args!("Error in {}: {}", err.operation(), err));
                        fatal = Some(err);
                        break;
                    }
                }
            }

            // every launched thread is joined, even after a run-fatal failure
            let mut results = Vec::with_capacity(handles.len());
            let mut failed = Vec::new();
            let mut released = 0;
            for (index, handle) in handles {
                let outcome = match handle.join() {
                    Ok(worker) => {
                        released += worker.released;
                        worker.outcome
                    }
                    Err(payload) => Err(join_error(index, panic_message(payload.as_ref()))),
                };
                match outcome {
                    Ok(result) => results.push(result),
                    Err(e) => {
                        report(
                            &sink,
                            format_args!("Error in {} for thread {}: {}", e.operation(), index, e),
                        );
                        if !e.is_fatal_to_run() {
                            failed.push((index, e));
                        } else if fatal.is_none() {
                            fatal = Some(e);
                        }
                    }
                }
            }

            match fatal {
                Some(e) => Err(e),
                None => Ok((results, failed, released)),
            }
        })?;
        self.phase = RunPhase::Joined;

        // Joined -> Released
        let released_bytes = worker_released
            + match shared.take() {
                Some(arenas) => {
                    let bytes = arenas.bytes();
                    drop(arenas);
                    bytes
                }
                None => 0,
            };
        self.phase = RunPhase::Released;
        report(
            &sink,
            format_args!("Released {} bytes ({})", released_bytes, config.strategy),
        );

        Ok(RunSummary {
            results,
            failed_threads,
            released_bytes,
        })
    }
}

fn build_contexts(shared: Option<&mut SharedArenas>, threads: usize) -> Result<Vec<ThreadContext<'_>>> {
    match shared {
        Some(arenas) => Ok(arenas
            .thread_buffers()?
            .into_iter()
            .enumerate()
            .map(|(index, (a, b))| ThreadContext {
                index,
                buffers: Some(ThreadBuffers::new(index, a, b)),
            })
            .collect()),
        None => Ok((0..threads)
            .map(|index| ThreadContext {
                index,
                buffers: None,
            })
            .collect()),
    }
}

/// What a worker hands back at join.
struct WorkerReport {
    outcome: Result<BenchmarkResult>,
    /// Bytes of the private mapping the worker released before exiting.
    released: usize,
}

fn run_worker<K, C, A, W>(
    context: ThreadContext<'_>,
    workload: &CacheTierWorkload<'_, K, C, A>,
    config: &BenchConfig,
    sink: &Mutex<ReportSink<W>>,
) -> WorkerReport
where
    K: Kernel,
    C: Clock,
    A: Affinity,
    W: Write,
{
    let (outcome, released) = match context.buffers {
        Some(mut buffers) => (workload.run(&mut buffers), 0),
        None => match provision_thread(config) {
            Ok(mut arena) => {
                arena.touch_sentinels();
                if config.report_physical {
                    report_physical(sink, context.index, &mut arena);
                }
                let released = arena.len();
                let (a, b) = arena.buffers();
                (workload.run(&mut ThreadBuffers::new(context.index, a, b)), released)
            }
            Err(e) => (Err(e), 0),
        },
    };
    if let Ok(result) = &outcome {
        report(sink, result);
    }
    WorkerReport { outcome, released }
}

/// Prints where `A` and `B` landed in physical memory, if the pagemap is readable.
fn report_physical<W: Write>(sink: &Mutex<ReportSink<W>>, index: usize, arena: &mut ThreadArena) {
    let (a, b) = arena.buffers();
    for (name, virt) in [("A", a.as_ptr() as usize), ("B", b.as_ptr() as usize)] {
        if let Ok(phys) = pagemap::virt_to_phys_self(virt) {
            report(
                sink,
                format_args!("thread NUM {} {}: virt {:#x} -> phys {:#x}", index, name, virt, phys),
            );
        }
    }
}

/// Report output shared by all workers.
struct ReportSink<W> {
    out: W,
    /// Set once a write failed; later failures stay quiet.
    broken: bool,
}

impl<W: Write> ReportSink<W> {
    fn new(out: W) -> Self {
        ReportSink { out, broken: false }
    }
}

fn report<W: Write>(sink: &Mutex<ReportSink<W>>, line: impl fmt::Display) {
    // a poisoned sink still holds whole lines
    let mut sink = sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Err(e) = writeln!(sink.out, "{}", line) {
        if !sink.broken {
            sink.broken = true;
            eprintln!("peakflops: report output failed, results are being lost: {}", e);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}
