// Use cases layer: replicated store, convergence rules, scheduling and the session workflow.

pub mod channels;
pub mod level;
pub mod mirror;
pub mod rules;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod types;
pub mod world;

#[cfg(test)]
pub(crate) mod test_support;

pub use level::{LayoutError, LevelLayout};
pub use mirror::{Mirror, ObserverReplica};
pub use rules::{ConvergenceRule, Evaluation, RuleView, RulesEngine};
pub use scheduler::{Scheduler, TickInfo, Timers};
pub use session::{SessionHandle, SessionRuntime, SessionSettings};
pub use store::{ProposalOutcome, ReplicatedStore, SubscriptionId};
pub use types::{Outbound, SessionEvent};
pub use world::{DoorBank, SessionWorld};
