use thiserror::Error;

/// Errors produced by mutation operators.
///
/// The soft variants (`NoSynapses`, `NoNeurons`, `NoMutationChoice`) mean
/// "this operator cannot act on this genome right now" and drive retries in
/// the monitor; the remaining variants are hard errors from targeted edits.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    #[error("genome has no synapses")]
    NoSynapses,
    #[error("genome has no neurons")]
    NoNeurons,
    #[error("no valid mutation choice for this genome")]
    NoMutationChoice,
    #[error("synapse {0} already exists")]
    SynapseExists(String),
    #[error("synapse {0} not found")]
    SynapseNotFound(String),
    #[error("neuron {0} already exists")]
    NeuronExists(String),
    #[error("neuron {0} not found")]
    NeuronNotFound(String),
    #[error("invalid synapse endpoint {0}")]
    InvalidEndpoint(String),
}

impl MutationError {
    /// Soft errors are retried by the monitor; everything else propagates.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            MutationError::NoSynapses | MutationError::NoNeurons | MutationError::NoMutationChoice
        )
    }
}

#[derive(Error, Debug)]
pub enum EvoError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("run cancelled")]
    Cancelled,
    #[error("evaluation failed for genome {genome_id}: {source}")]
    Evaluation {
        genome_id: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("tuner failed for genome {genome_id}: {source}")]
    Tuner {
        genome_id: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("mutation failed: {0}")]
    Mutation(#[from] MutationError),
    #[error("failed to apply {wanted} mutations in {attempts} attempts")]
    MutationBudgetExhausted { wanted: usize, attempts: usize },
    #[error("invalid selection: {0}")]
    Selection(String),
}

pub type EvoResult<T> = Result<T, EvoError>;
pub type MutationResult<T> = Result<T, MutationError>;
