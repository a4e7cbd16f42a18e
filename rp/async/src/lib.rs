//! # Async context
//!
//! A single logical thread of execution for drivers and protocol stacks
//! that are not reentrant. Workers registered with a context only ever run
//! one at a time, on the core the context belongs to, under the context's
//! lock.
//!
//! Three backends implement [`AsyncContext`]:
//!
//! | backend | dispatch runs | lock |
//! |---------|---------------|------|
//! | [`PollContext`] | when the application calls `poll` | bookkeeping only, single core |
//! | [`BackgroundContext`] | in a low-priority user interrupt | recursive mutex on a hardware spin lock |
//! | [`TaskContext`] | on a dedicated task | blocking recursive mutex |
//!
//! ## Example
//!
//! ```ignore
//! static LED_WORKER: PendingWorker = PendingWorker::new(&|_ctx, _worker| toggle_led());
//!
//! let platform = Platform::with_defaults();
//! let _core0 = platform.bind_core(CoreId::Core0);
//! let context = BackgroundContext::init(platform, BackgroundConfig::default())?;
//! context.add_pending_worker(&LED_WORKER);
//!
//! // from an interrupt handler:
//! Notifier::new(context).set_work_pending(&LED_WORKER);
//! ```

pub mod background;
pub mod context;
pub mod error;
pub mod poll;
pub mod sync_call;
pub mod task;
pub mod worker;

pub use background::{BackgroundConfig, BackgroundContext};
pub use context::{AsyncContext, AsyncContextExt, ContextCore, ContextFlags, Notifier};
pub use error::{ContextError, ContextResult};
pub use poll::PollContext;
pub use sync_call::SyncFn;
pub use task::{TaskConfig, TaskContext};
pub use worker::{PendingWorkFn, PendingWorker, TimedWorkFn, TimedWorker};

#[cfg(test)]
mod tests;
