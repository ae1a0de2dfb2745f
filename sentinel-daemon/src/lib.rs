//! Controller runtime: scheduler, control socket, configuration.

pub mod config;
mod error;
pub mod inflight;
pub mod paths;
pub mod protocol;
mod runtime;
pub mod scheduler;
pub mod stats;

pub use config::ControllerConfig;
pub use error::DaemonError;
pub use inflight::{InFlightGuard, InFlightSet};
pub use protocol::{
    parse_request, request_status, request_stop, send_request, ControlReply, ControlRequest,
};
pub use runtime::{init_tracing, run, run_with_store, start_blocking, LogFormat};
pub use scheduler::{ReconcileTask, Scheduler, SchedulerSettings};
pub use stats::{ControllerStats, CycleStats, StatsSnapshot};
