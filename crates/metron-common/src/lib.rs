//! Shared building blocks for the metron agent and server: the metric
//! record model, its wire shape, and the payload codec applied to report
//! batches.

pub mod codec;
pub mod crypt;
pub mod error;
pub mod sign;
pub mod types;

pub use codec::{DecodedPayload, EncodedBatch, PayloadDecoder, PayloadEncoder, HASH_HEADER};
pub use error::{PayloadError, WireError};
pub use types::{MetricKind, MetricRecord, MetricValue, MetricWire, POLL_COUNT};
