//! Domain model (ids, records, batches, errors).

pub mod batch;
pub mod errors;
pub mod ids;
pub mod record;

pub use self::batch::{Batch, BatchResult, Report};
pub use self::errors::{DeliveryError, DigestError, ErrorKind, RenderError, StoreError};
pub use self::ids::FeedbackId;
pub use self::record::{DEFAULT_WEATHER, FeedbackRecord, NewFeedback};
