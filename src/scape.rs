//! Contracts between the population monitor and its external collaborators:
//! the scape (fitness environment), the cortex runtime built from a genome,
//! the morphology registry, and the cancellation token threaded through
//! evaluation and tuning.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::errors::{EvoError, EvoResult};
use crate::genome::Genome;

/// Scoring semantics for an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OpMode {
    /// Evolutionary training.
    #[default]
    Gt,
    Validation,
    Test,
}

impl OpMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpMode::Gt => "gt",
            OpMode::Validation => "validation",
            OpMode::Test => "test",
        }
    }
}

impl FromStr for OpMode {
    type Err = EvoError;

    fn from_str(s: &str) -> EvoResult<Self> {
        match s {
            "gt" => Ok(OpMode::Gt),
            "validation" => Ok(OpMode::Validation),
            "test" => Ok(OpMode::Test),
            other => Err(EvoError::Config(format!("unknown op mode {other:?}"))),
        }
    }
}

impl fmt::Display for OpMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque per-evaluation diagnostics returned by a scape.
///
/// Well-known keys consumed by the trace window: `"cycles"` (number) and
/// `"time"` (seconds, number). Everything else passes through untouched.
pub type Trace = BTreeMap<String, serde_json::Value>;

/// Fitness plus diagnostics for one evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub fitness: f64,
    pub trace: Trace,
}

impl Evaluation {
    pub fn new(fitness: f64) -> Self {
        Self {
            fitness,
            trace: Trace::new(),
        }
    }
}

/// Runtime agent built from a genome, able to run input -> output steps.
///
/// The forward pass itself lives outside this crate; the monitor only drives
/// `step` through the scape and hands the agent to runtime-capable tuners.
pub trait Cortex: Send {
    fn step(&mut self, input: &Array1<f64>) -> anyhow::Result<Array1<f64>>;

    /// The genome this cortex was built from, if the runtime can recover it
    /// (runtime tuners use this to read tuned weights back).
    fn genome(&self) -> Option<&Genome> {
        None
    }
}

/// Turns a genome into a runnable cortex.
pub trait CortexBuilder: Send + Sync {
    fn build(&self, genome: &Genome) -> anyhow::Result<Box<dyn Cortex>>;
}

/// Fitness environment. Implementations drive the cortex however they like
/// and return a fitness plus an opaque trace.
pub trait Scape: Send + Sync {
    fn name(&self) -> &str;

    fn evaluate(&self, cortex: &mut dyn Cortex, mode: OpMode) -> anyhow::Result<Evaluation>;
}

/// Sensor/actuator registry plus IO-compatibility predicate, resolved per
/// scape. Consumed by the monitor (offspring gating) and the port mutation
/// operators.
pub trait Morphology: Send + Sync {
    /// True when the genome's IO surface is usable against the scape.
    fn ensure_io_compatibility(&self, scape_name: &str, genome: &Genome) -> bool;

    /// Sensor ids available under the scape.
    fn resolve_sensors(&self, scape_name: &str) -> Vec<String>;

    /// Actuator ids available under the scape.
    fn resolve_actuators(&self, scape_name: &str) -> Vec<String>;
}

/// Accepts every genome and offers no extra ports. Useful for scapes whose
/// IO surface is fixed by the seed genomes.
#[derive(Debug, Default, Clone)]
pub struct PermissiveMorphology;

impl Morphology for PermissiveMorphology {
    fn ensure_io_compatibility(&self, _scape_name: &str, _genome: &Genome) -> bool {
        true
    }

    fn resolve_sensors(&self, _scape_name: &str) -> Vec<String> {
        Vec::new()
    }

    fn resolve_actuators(&self, _scape_name: &str) -> Vec<String> {
        Vec::new()
    }
}

/// Cooperative cancellation token shared between the caller, the monitor
/// main loop, and the evaluation workers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// The ctx error, if cancellation was requested.
    pub fn err(&self) -> Option<EvoError> {
        if self.is_cancelled() {
            Some(EvoError::Cancelled)
        } else {
            None
        }
    }

    pub fn check(&self) -> EvoResult<()> {
        match self.err() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_mode_wire_names_round_trip() {
        for mode in [OpMode::Gt, OpMode::Validation, OpMode::Test] {
            assert_eq!(mode.as_str().parse::<OpMode>().unwrap(), mode);
        }
        assert!("training".parse::<OpMode>().is_err());
    }

    #[test]
    fn cancel_token_reports_error_once_cancelled() {
        let token = CancelToken::new();
        assert!(token.err().is_none());
        token.cancel();
        assert!(matches!(token.err(), Some(EvoError::Cancelled)));
        assert!(token.clone().check().is_err());
    }
}
