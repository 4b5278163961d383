//! Async delivery runtime for notifisync.
//!
//! [`pipeline::CapturePipeline`] queues captured notifications and drains them
//! through [`dispatcher::Dispatcher`] in a background tokio task;
//! [`supervisor::LifecycleSupervisor`] restarts it when the notification source
//! disconnects.

pub mod dispatcher;
pub mod pipeline;
pub mod supervisor;
