//! # latch-rate
//!
//! Shared-budget rate limiting.
//!
//! A [`LimitManager`] holds a fleet of named token-bucket [`Limiter`]s and
//! an aggregate rate budget. Limiters declare a nominal rate; while a
//! limiter is actively used the manager scales it to a proportional share
//! of the budget, and while idle it keeps its nominal rate. Activation is
//! reference-counted, so several concurrent consumers of one limiter count
//! as one for rebalancing.
//!
//! Adapter types throttle bulk I/O: [`RateLimitedReader`] for streaming
//! reads and [`RateLimitedWriter`] for chunked, flushed writes (the shape
//! of a streaming HTTP response body). Both reserve tokens for the
//! *requested* size before touching the underlying stream, over-billing
//! short transfers slightly, in exchange for making the limiter impossible
//! to game with small reads or writes.

pub mod bucket;
pub mod limiter;
pub mod manager;
pub mod reader;
pub mod writer;

pub use bucket::TokenBucket;
pub use limiter::Limiter;
pub use manager::LimitManager;
pub use reader::RateLimitedReader;
pub use writer::RateLimitedWriter;
