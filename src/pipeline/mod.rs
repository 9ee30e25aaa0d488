//! Wave-scheduled hierarchical reduction and its orchestration.

pub mod activity;
pub mod journal;
pub mod metrics;
mod node;
pub mod orchestrator;
mod progress;
pub mod reduce;
pub mod scheduler;


pub use journal::{Journal, Step};
pub use metrics::{LevelRollup, Rollup, RollupReport, UsageMetric, UsageTotals};
pub use node::{NodeKey, Position, SummaryNode};
pub use orchestrator::{DocumentPlan, OrchestrationInput, OrchestrationOutput, Orchestrator};
pub use progress::{Progress, ProgressReporter, ProgressSnapshot};
pub use reduce::{NodeRequest, NodeSummarizer, Phase, ReduceEngine, ReduceOutcome, ReduceSettings, ReduceState, TreeShape};
pub use scheduler::{plan_waves, run_waves, WaveScheduler};
