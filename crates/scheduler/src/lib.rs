//! Document viewer scheduler library
//!
//! Background execution for the tile decode pipeline: a single-worker
//! decode executor with per-node single flight and cooperative cancellation,
//! and a coalescing draw loop for redraw requests.
//!
//! # Example
//!
//! ```
//! use docview_scheduler::{DecodeExecutor, DecodeRunner, DecodeTask, TaskContext};
//!
//! struct Noop;
//!
//! impl DecodeRunner<u32, u32> for Noop {
//!     fn run(&mut self, task: &DecodeTask<u32, u32>, ctx: &TaskContext<'_, u32, u32>) {
//!         ctx.complete(task);
//!     }
//! }
//!
//! let executor = DecodeExecutor::new(Noop).unwrap();
//! let first = executor.submit(0, 1).task_id().unwrap();
//!
//! // A different request for the same node supersedes the first one
//! executor.submit(0, 2);
//! assert!(executor.is_dead(first));
//! ```

mod cancel;
pub mod draw;
pub mod executor;

pub use cancel::CancellationToken;
pub use draw::{DrawLoop, DrawRequester, DRAW_POLL_TIMEOUT, DRAW_QUEUE_CAPACITY};
pub use executor::{
    DecodeExecutor, DecodeRunner, DecodeTask, ExecutorStats, SubmitOutcome, TaskContext, TaskId,
};
