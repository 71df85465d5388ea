//! dnsvisor daemon: control socket, configuration service and signal handling.

mod error;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{
    request, request_status, request_stop, send_request, DaemonRequest, DaemonResponse,
};
pub use runtime::{run, serve, start_blocking, StatusSummary};
