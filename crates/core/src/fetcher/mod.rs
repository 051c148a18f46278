//! Rate-limited retrieval of accepted releases.

mod http;
mod queue;
mod throttle;
mod types;

pub use http::cookie_header;
pub use queue::{FetchHandle, FetchPoolStatus, FetchQueue};
pub use throttle::{HostThrottle, TokenBucket};
pub use types::{FetchError, FetchQueueConfig, FetchRequest, FetchedFile};
