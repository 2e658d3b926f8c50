//! Request dispatch pipeline: queue, workers and the proxy stage.

pub mod proxy;
pub mod queue;
pub mod worker;

pub use proxy::{normalize, ProxyError, ProxyStage, UpstreamCall, UpstreamReply};
pub use queue::{EnqueueError, JobQueue};
pub use worker::{Dispatcher, WorkerPool};
