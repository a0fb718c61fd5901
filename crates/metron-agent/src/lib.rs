//! metron agent: polls host metrics into a local store and reports them in
//! batches to the collector.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod poller;
pub mod reporter;
pub mod transport;

pub use config::AgentConfig;
pub use error::{AgentError, Result};
pub use pipeline::{Agent, AgentState, Schedule};
pub use poller::Poller;
pub use reporter::{Delivery, ReportJob, Reporter};
pub use transport::{HttpTransport, Transport};
