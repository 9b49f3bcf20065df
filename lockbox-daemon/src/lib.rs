//! LockBox worker runtime: scheduler, main loop, cycle log rotation.

pub mod clock;
mod error;
pub mod log_rotation;
pub mod paths;
mod runtime;
pub mod scheduler;

pub use clock::{Clock, MonotonicClock, SystemClock};
pub use error::DaemonError;
pub use runtime::{init_tracing, run_once_blocking, start_blocking, LogFormat, LoopState, MainLoop};
pub use scheduler::{delay_until_next, next_trigger_delay, SchedulerFault};
