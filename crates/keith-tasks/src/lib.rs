//! Asynchronous task bridge: submitters create `pending` records and poll,
//! workers claim them with a conditional update and write one terminal state.

pub mod bridge;
pub mod error;
pub mod store;
pub mod worker;

pub use bridge::{TaskBridge, TaskOutcome, WaitPolicy};
pub use error::TaskError;
pub use store::{SqliteTaskStore, TaskStore};
pub use worker::{TaskHandler, TaskWorker, WorkerConfig, HANDLER_PANICKED};
