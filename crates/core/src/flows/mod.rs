pub mod engine;
pub mod states;

pub use engine::{WorkflowEngine, WorkflowPolicy};
pub use states::{
    JobCommand, JobEffect, NewJob, Operation, RejectMode, StartTrigger, TransitionContext,
    TransitionOutcome,
};
