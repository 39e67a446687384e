//! Actor-based agents, built on [`acton_reactive`].
//!
//! Long-lived concurrent components (the scheduler, the health tracker)
//! spawn work through [`BackgroundWorker`] instead of bare `tokio::spawn`,
//! so every background task is named, cancellable, and awaited during
//! shutdown.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use hybridns_core::agents::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut runtime = ActonApp::launch();
//!     let worker = BackgroundWorker::spawn(&mut runtime).await?;
//!     worker.submit("probe-sweep", || async { Ok(()) }).await;
//!     runtime.shutdown_all().await?;
//!     Ok(())
//! }
//! ```

mod background_worker;
mod messages;

pub mod prelude {
    //! Convenient re-exports for agent-based components.
    pub use acton_reactive::prelude::*;

    pub use super::background_worker::{BackgroundWorker, BackgroundWorkerState, TaskStatus};
    pub use super::messages::{CancelTask, GetAllTaskStatuses, GetTaskStatus, TaskStatusResponse};
}

pub use background_worker::{BackgroundWorker, BackgroundWorkerState, TaskStatus};
pub use messages::{CancelTask, GetAllTaskStatuses, GetTaskStatus, TaskStatusResponse};
