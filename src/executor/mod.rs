mod models;
mod printer;
mod runner;
mod transport;

pub use models::{
    ExecuteOptions, ResponseOutcome, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT, SYNTHETIC_ERROR_STATUS,
};
pub(crate) use printer::status_color;
pub use printer::print_response;
pub use runner::{ExecuteError, QueryExecutor};
pub use transport::{OutgoingRequest, RawResponse, ReqwestTransport, Transport, TransportError};
