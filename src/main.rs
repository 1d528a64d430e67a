use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use fcaccel::accel::{BlockLimits, CommandLog, SimulatedAccelerator};
use fcaccel::config::ProblemConfig;
use fcaccel::verify::{sweep, SweepParams};
use fcaccel::ExecutionPath;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum PathKind {
    Reference,
    Offload,
    /// Run both and fail if they disagree
    Both,
}

#[derive(Parser, Debug)]
#[command(name = "fcaccel", version, about = "Quantized fully-connected layers on the reference or accelerator path")]
struct Args {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run a JSON problem and print the quantized output
    Run {
        /// Problem description (JSON)
        #[arg(long)]
        config: PathBuf,
        #[arg(long, value_enum, default_value_t = PathKind::Both)]
        path: PathKind,
    },
    /// Print the accelerator command stream for a JSON problem
    Trace {
        #[arg(long)]
        config: PathBuf,
    },
    /// Compare both paths over random problems
    Verify {
        #[arg(long, default_value_t = 1000)]
        cases: usize,
        #[arg(long, default_value_t = 1)]
        seed: u64,
        /// Worker threads
        #[arg(long, default_value_t = 1)]
        threads: usize,
        #[arg(long, default_value_t = 4)]
        max_batches: usize,
        /// Simulated device block limits
        #[arg(long, default_value_t = 64)]
        max_channels: usize,
        #[arg(long, default_value_t = 64)]
        max_depth: usize,
        /// Percent of cases with packed int4 weights
        #[arg(long, default_value_t = 20)]
        int4_percent: u8,
        /// Write the JSON report here
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

fn run(config: &Path, path: PathKind) -> Result<()> {
    let problem = ProblemConfig::load(config)?;
    let reference = if path != PathKind::Offload { Some(problem.run(ExecutionPath::Reference)?) } else { None };
    let offloaded = if path != PathKind::Reference {
        let mut dev = SimulatedAccelerator::new(problem.limits);
        let out = problem.run(ExecutionPath::Offloaded(&mut dev))?;
        info!("offload used {} device transactions", dev.transactions());
        Some(out)
    } else { None };
    let payload = serde_json::json!({ "reference": reference, "offloaded": offloaded });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    if let (Some(r), Some(o)) = (&reference, &offloaded) {
        if r != o { bail!("reference and offloaded outputs differ"); }
    }
    Ok(())
}

fn trace(config: &Path) -> Result<()> {
    let problem = ProblemConfig::load(config)?;
    let mut log = CommandLog::new(SimulatedAccelerator::new(problem.limits));
    let out = problem.run(ExecutionPath::Offloaded(&mut log))?;
    for (i, c) in log.entries().iter().enumerate() {
        println!("{:>6} {:<11} payload={:#010x} aux={:<11} -> {:#010x}", i, format!("{:?}", c.opcode), c.payload, c.aux as i32, c.response);
    }
    println!("commands={} output={:?}", log.entries().len(), out);
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    match args.cmd {
        Cmd::Run { config, path } => run(&config, path),
        Cmd::Trace { config } => trace(&config),
        Cmd::Verify { cases, seed, threads, max_batches, max_channels, max_depth, int4_percent, report } => {
            let params = SweepParams { cases, seed, limits: BlockLimits { max_channels, max_depth }, max_batches, int4_percent: int4_percent.min(100) };
            let pb = ProgressBar::new(cases as u64);
            pb.set_style(ProgressStyle::with_template("{elapsed_precise} [{bar:40}] {pos}/{len} cases")?);
            let pool = rayon::ThreadPoolBuilder::new().num_threads(threads.max(1)).build().context("build thread pool")?;
            let t0 = Instant::now();
            let res = pool.install(|| sweep(&params, Some(&pb)))?;
            pb.finish_and_clear();
            println!("cases={} commands={} weight_words={} mismatches={} elapsed={:.3}s", res.cases, res.commands, res.weight_words, res.mismatches.len(), t0.elapsed().as_secs_f64());
            if let Some(path) = report {
                std::fs::write(&path, serde_json::to_string_pretty(&res)?).with_context(|| format!("write report: {}", path.display()))?;
            }
            if !res.mismatches.is_empty() { bail!("{} cases disagree", res.mismatches.len()); }
            Ok(())
        }
    }
}
