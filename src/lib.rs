pub mod errors;
pub mod genome;
pub mod lineage;
pub mod monitor;
pub mod mutation;
pub mod postprocess;
pub mod scape;
pub mod selection;
pub mod species;
pub mod tuning;

pub use errors::{EvoError, EvoResult, MutationError};
pub use genome::Genome;
pub use monitor::{ControlCommand, MonitorConfig, PopulationMonitor, RunResult, ScoredGenome};
pub use scape::{CancelToken, Cortex, CortexBuilder, Evaluation, OpMode, Scape, Trace};
