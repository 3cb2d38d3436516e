pub mod graph;
pub mod jobs;
pub mod router;

pub use graph::{AgentGraph, AgentSpec, FrameContext};
pub use jobs::{JobManager, JobRecord, JobSnapshot};
pub use router::DelegationRouter;
