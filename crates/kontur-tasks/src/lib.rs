//! kontur-tasks: Serialized, asynchronous access to the contour detector.
//!
//! - [`executor`]: a one-at-a-time FIFO queue of async invocations.
//! - [`readiness`]: bounded backoff polling until the backend is usable.
//! - [`session`]: a detector, heap and executor composed together.
//!
//! Built on Tokio. The detector itself is synchronous and runs on the
//! blocking pool, so the executor's drain loop stays responsive while
//! image operations are in progress.

pub mod executor;
pub mod readiness;
pub mod session;

pub use executor::{Completion, ExecutorConfig, TaskError, TaskExecutor};
pub use readiness::{ReadinessPolicy, wait_until_ready};
pub use session::{Session, SessionConfig, SessionError};
