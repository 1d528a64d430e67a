//! Randomized equivalence sweep between the reference and offloaded paths.

use anyhow::{anyhow, Result};
use indicatif::ProgressBar;
use log::{info, warn};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::Serialize;

use crate::accel::{BlockLimits, CommandLog, Opcode, SimulatedAccelerator};
use crate::config::{FilterData, ProblemConfig};
use crate::kernel::ExecutionPath;
use crate::params::FullyConnectedParams;
use crate::shape::RuntimeShape;
use crate::unpack::pack_int4_weights;

#[derive(Debug, Clone)]
pub struct SweepParams {
    pub cases: usize,
    pub seed: u64,
    pub limits: BlockLimits,
    pub max_batches: usize,
    /// Share of cases generated with packed int4 weights, 0..=100
    pub int4_percent: u8,
}

impl Default for SweepParams {
    fn default() -> Self {
        Self { cases: 1000, seed: 1, limits: BlockLimits::default(), max_batches: 4, int4_percent: 20 }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Mismatch {
    pub case: usize,
    pub problem: ProblemConfig,
    pub reference: Vec<i8>,
    pub offloaded: Vec<i8>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub cases: usize,
    pub commands: usize,
    pub weight_words: usize,
    pub mismatches: Vec<Mismatch>,
}

/// Outcome of one problem run on both paths.
#[derive(Debug, Clone)]
pub struct CaseOutcome {
    pub reference: Vec<i8>,
    pub offloaded: Vec<i8>,
    pub commands: usize,
    pub weight_words: usize,
}

impl CaseOutcome {
    pub fn agrees(&self) -> bool { self.reference == self.offloaded }
}

/// A random problem that fits one block of `limits`.
pub fn random_problem(rng: &mut SmallRng, limits: BlockLimits, max_batches: usize, int4: bool) -> Result<ProblemConfig> {
    let batches = rng.gen_range(1..=max_batches.max(1));
    let out_depth = rng.gen_range(1..=limits.max_channels.max(1));
    let depth = rng.gen_range(1..=limits.max_depth.max(1));
    let (lo, hi) = if int4 { (-8.0, 7.0) } else { (-127.0, 127.0) };
    let spread: f64 = if int4 { 3.0 } else { rng.gen_range(8.0..64.0) };
    let normal = Normal::new(0.0, spread).map_err(|e| anyhow!("weight distribution: {}", e))?;
    let weights: Vec<i8> = (0..out_depth * depth).map(|_| normal.sample(rng).round().clamp(lo, hi) as i8).collect();
    let input: Vec<i8> = (0..batches * depth).map(|_| rng.gen::<i8>()).collect();
    let bias = if rng.gen_bool(0.8) { Some((0..out_depth).map(|_| rng.gen_range(-20_000..=20_000)).collect()) } else { None };
    let a = rng.gen_range(-128..=127);
    let b = rng.gen_range(-128..=127);
    let params = FullyConnectedParams {
        input_offset: rng.gen_range(-127..=128),
        weights_offset: 0,
        output_offset: rng.gen_range(-128..=127),
        output_multiplier: rng.gen_range((1 << 30)..i32::MAX),
        output_shift: rng.gen_range(-12..=1),
        quantized_activation_min: a.min(b),
        quantized_activation_max: a.max(b),
    };
    let filter = if int4 { FilterData::Int4(pack_int4_weights(&weights)) } else { FilterData::Int8(weights) };
    Ok(ProblemConfig {
        input_shape: RuntimeShape::new(&[batches, depth]),
        filter_shape: RuntimeShape::new(&[out_depth, depth]),
        output_shape: RuntimeShape::new(&[batches, out_depth]),
        params,
        input,
        filter,
        bias,
        limits,
    })
}

/// Run one problem through the reference kernel and a fresh simulated device.
pub fn check_problem(problem: &ProblemConfig) -> Result<CaseOutcome> {
    let reference = problem.run(ExecutionPath::Reference)?;
    let mut log = CommandLog::new(SimulatedAccelerator::new(problem.limits));
    let offloaded = problem.run(ExecutionPath::Offloaded(&mut log))?;
    Ok(CaseOutcome { reference, offloaded, commands: log.entries().len(), weight_words: log.count(Opcode::LoadWeight) })
}

/// Check `params.cases` random problems on the current rayon pool.
///
/// Case `i` is generated from `seed + i`, so any mismatch can be replayed alone.
pub fn sweep(params: &SweepParams, progress: Option<&ProgressBar>) -> Result<SweepReport> {
    let outcomes: Vec<(usize, ProblemConfig, CaseOutcome)> = (0..params.cases)
        .into_par_iter()
        .map(|i| -> Result<(usize, ProblemConfig, CaseOutcome)> {
            let mut rng = SmallRng::seed_from_u64(params.seed.wrapping_add(i as u64));
            let int4 = rng.gen_range(0..100u8) < params.int4_percent;
            let problem = random_problem(&mut rng, params.limits, params.max_batches, int4)?;
            let outcome = check_problem(&problem)?;
            if let Some(pb) = progress { pb.inc(1); }
            Ok((i, problem, outcome))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut report = SweepReport { cases: params.cases, ..Default::default() };
    for (case, problem, outcome) in outcomes {
        report.commands += outcome.commands;
        report.weight_words += outcome.weight_words;
        if !outcome.agrees() {
            warn!("case {} (seed {}) mismatched", case, params.seed.wrapping_add(case as u64));
            report.mismatches.push(Mismatch { case, problem, reference: outcome.reference, offloaded: outcome.offloaded });
        }
    }
    info!("sweep: {} cases, {} commands, {} mismatches", report.cases, report.commands, report.mismatches.len());
    Ok(report)
}
