//! The `Content` layer (spec.md §4.6-§4.8): zero-copy chunks plus the
//! pull (`Source`) and push (`Sink`) streams built over them.

mod blocking;
mod copy;
mod sink;
mod source;

pub use blocking::{BlockingSink, BlockingSource};
pub use copy::copy;
pub use sink::{EndpointSink, Sink};
pub use source::{DemandCallback, QueueSource, Source};
