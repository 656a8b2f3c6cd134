pub mod dispatcher;
pub mod job;
pub mod queue;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use job::{Job, JobMethod, JobStatus};
pub use queue::PendingQueue;
