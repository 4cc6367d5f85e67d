//! Operator selection policy and the topological-mutation count policy.

use rand::rngs::StdRng;
use rand::Rng;

use crate::errors::{EvoError, EvoResult};
use crate::genome::Genome;
use crate::mutation::{MutationContext, MutationOp};

/// One weighted entry of a mutation policy.
#[derive(Debug, Clone)]
pub struct MutationPolicyEntry {
    pub op: MutationOp,
    pub weight: f64,
}

/// Weighted operator pool. Draws are proportional to weight; zero-weight
/// entries stay in the pool as fallbacks but are never drawn directly.
#[derive(Debug, Clone)]
pub struct MutationPolicy {
    entries: Vec<MutationPolicyEntry>,
}

impl MutationPolicy {
    pub fn new(entries: Vec<MutationPolicyEntry>) -> EvoResult<Self> {
        if entries.is_empty() {
            return Err(EvoError::Config("mutation policy must not be empty".to_string()));
        }
        if entries.iter().any(|e| e.weight < 0.0 || !e.weight.is_finite()) {
            return Err(EvoError::Config(
                "mutation policy weights must be finite and >= 0".to_string(),
            ));
        }
        if !entries.iter().any(|e| e.weight > 0.0) {
            return Err(EvoError::Config(
                "mutation policy needs at least one positive weight".to_string(),
            ));
        }
        Ok(Self { entries })
    }

    /// Builds a policy by wire name with uniform weights.
    pub fn uniform(names: &[&str]) -> EvoResult<Self> {
        let entries = names
            .iter()
            .map(|name| {
                MutationOp::parse(name)
                    .map(|op| MutationPolicyEntry { op, weight: 1.0 })
                    .ok_or_else(|| EvoError::Config(format!("unknown operator {name:?}")))
            })
            .collect::<EvoResult<Vec<_>>>()?;
        Self::new(entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The last entry; the monitor's last-resort operator when nothing in
    /// the pool is applicable.
    pub fn last(&self) -> &MutationOp {
        &self.entries.last().expect("policy is never empty").op
    }

    /// Weighted draw over the whole pool.
    pub fn choose(&self, rng: &mut StdRng) -> &MutationOp {
        let total: f64 = self.entries.iter().map(|e| e.weight).sum();
        let mut pick = rng.gen_range(0.0..total);
        for entry in &self.entries {
            if entry.weight <= 0.0 {
                continue;
            }
            if pick < entry.weight {
                return &entry.op;
            }
            pick -= entry.weight;
        }
        // Floating point underflow on the last positive entry.
        &self
            .entries
            .iter()
            .rev()
            .find(|e| e.weight > 0.0)
            .expect("policy has a positive weight")
            .op
    }

    /// Weighted draw restricted to operators applicable to the genome.
    /// Returns `None` when nothing in the pool applies.
    pub fn choose_applicable(
        &self,
        rng: &mut StdRng,
        genome: &Genome,
        ctx: &MutationContext<'_>,
    ) -> Option<&MutationOp> {
        let applicable: Vec<&MutationPolicyEntry> = self
            .entries
            .iter()
            .filter(|e| e.weight > 0.0 && e.op.applicable(genome, ctx))
            .collect();
        if applicable.is_empty() {
            return None;
        }
        let total: f64 = applicable.iter().map(|e| e.weight).sum();
        let mut pick = rng.gen_range(0.0..total);
        for entry in &applicable {
            if pick < entry.weight {
                return Some(&entry.op);
            }
            pick -= entry.weight;
        }
        applicable.last().map(|e| &e.op)
    }
}

/// How many structural mutations to chain per offspring.
#[derive(Debug, Clone, PartialEq)]
pub enum TopologicalMutations {
    /// A fixed count (floored at 1).
    Const(usize),
    /// Uniform draw from `1..=max(1, round(param * N))`, N = neuron count.
    NcountLinear(f64),
    /// Uniform draw from `1..=max(1, round(N^param))`.
    NcountExponential(f64),
}

impl Default for TopologicalMutations {
    fn default() -> Self {
        TopologicalMutations::Const(1)
    }
}

impl TopologicalMutations {
    /// Resolves a strategy-field mode name.
    pub fn parse(mode: &str, param: f64) -> EvoResult<Self> {
        match mode {
            "const" => Ok(TopologicalMutations::Const((param.round() as usize).max(1))),
            "ncount_linear" => Ok(TopologicalMutations::NcountLinear(param)),
            "ncount_exponential" => Ok(TopologicalMutations::NcountExponential(param)),
            other => Err(EvoError::Config(format!("unknown topological mode {other:?}"))),
        }
    }

    pub fn mutation_count(&self, genome: &Genome, _generation: u64, rng: &mut StdRng) -> usize {
        let n = genome.neurons.len() as f64;
        match self {
            TopologicalMutations::Const(count) => (*count).max(1),
            TopologicalMutations::NcountLinear(param) => {
                let upper = ((param * n).round() as usize).max(1);
                rng.gen_range(1..=upper)
            }
            TopologicalMutations::NcountExponential(param) => {
                let upper = (n.powf(*param).round() as usize).max(1);
                rng.gen_range(1..=upper)
            }
        }
    }
}
