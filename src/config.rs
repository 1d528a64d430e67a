//! JSON problem descriptions for the command-line driver.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::accel::BlockLimits;
use crate::kernel::{fully_connected_packed_int4, offload, reference, ExecutionPath};
use crate::params::FullyConnectedParams;
use crate::shape::RuntimeShape;

/// Filter weights, either one byte per weight or dense int4.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", content = "data", rename_all = "lowercase")]
pub enum FilterData {
    Int8(Vec<i8>),
    Int4(Vec<i8>),
}

/// One fully-connected problem:
///
/// ```json
/// {
///   "input_shape": [1, 4], "filter_shape": [1, 4], "output_shape": [1, 1],
///   "params": { "output_multiplier": 1073741824, "output_shift": 1 },
///   "input": [1, 2, 3, 4],
///   "filter": { "format": "int8", "data": [1, 1, 1, 1] },
///   "bias": [0]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemConfig {
    pub input_shape: RuntimeShape,
    pub filter_shape: RuntimeShape,
    pub output_shape: RuntimeShape,
    pub params: FullyConnectedParams,
    pub input: Vec<i8>,
    pub filter: FilterData,
    #[serde(default)]
    pub bias: Option<Vec<i32>>,
    /// Block limits of the simulated accelerator used for offloaded runs.
    #[serde(default)]
    pub limits: BlockLimits,
}

impl ProblemConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = File::open(&path).with_context(|| format!("open problem config: {}", path.as_ref().display()))?;
        let cfg: Self = serde_json::from_reader(BufReader::new(f)).with_context(|| format!("parse problem config: {}", path.as_ref().display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json(s: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(s).context("parse problem config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Cheap structural checks before any kernel runs.
    pub fn validate(&self) -> Result<()> {
        let weights = self.filter_shape.flat_size();
        match &self.filter {
            FilterData::Int8(d) if d.len() != weights => bail!("filter has {} weights, shape {:?} needs {}", d.len(), self.filter_shape.as_slice(), weights),
            FilterData::Int4(d) if d.len() != weights.div_ceil(2) => bail!("packed int4 filter has {} bytes, shape {:?} needs {}", d.len(), self.filter_shape.as_slice(), weights.div_ceil(2)),
            _ => {}
        }
        if self.input.len() != self.input_shape.flat_size() {
            bail!("input has {} values, shape {:?} needs {}", self.input.len(), self.input_shape.as_slice(), self.input_shape.flat_size());
        }
        Ok(())
    }

    /// Run the problem on `path` and return the quantized output.
    pub fn run(&self, path: ExecutionPath<'_>) -> Result<Vec<i8>> {
        let mut out = vec![0i8; self.output_shape.flat_size()];
        let bias = self.bias.as_deref();
        let res = match &self.filter {
            FilterData::Int8(filter) => match path {
                ExecutionPath::Reference => reference::fully_connected_i8(&self.params, &self.input_shape, &self.input, &self.filter_shape, filter, bias, &self.output_shape, &mut out),
                ExecutionPath::Offloaded(ch) => offload::fully_connected_offloaded(&self.params, ch, &self.input_shape, &self.input, &self.filter_shape, filter, bias, &self.output_shape, &mut out),
            },
            FilterData::Int4(packed) => {
                let mut scratch = vec![0i8; self.filter_shape.flat_size()];
                fully_connected_packed_int4(&self.params, &self.input_shape, &self.input, &self.filter_shape, packed, &mut scratch, bias, &self.output_shape, &mut out, path)
            }
        };
        res.context("fully-connected kernel failed")?;
        Ok(out)
    }
}
