//! Window buffers and tick sources
//!
//! Source operators that read records straight from a store:
//!
//! - [`WindowBuffer`]: every `(timestamp, value)` pair within `(now - winsize, now]`.
//!   Each update reports exactly what entered and what was evicted as a [`Delta`].
//! - [`Tick`]: the single most recent sample.
//! - [`RecordBuffer`]: the last `n` record ids, independent of time.
//!
//! ```text
//! winsize = 10
//! t:        0    5    10   12
//! entries: [0]  [0 5] [5 10] [5 10 12]   (0 evicted at t = 10)
//! ```

pub mod buffer;
pub mod record_buffer;
pub mod tick;
pub mod types;

pub use buffer::WindowBuffer;
pub use record_buffer::RecordBuffer;
pub use tick::Tick;
pub use types::{Delta, ScalarDelta, WindowEntry};
