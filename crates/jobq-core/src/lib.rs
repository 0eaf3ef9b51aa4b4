//! # Jobq Core
//!
//! Leaf types shared by every jobq crate: record identifiers that encode
//! their due time, the weekly partition scheme derived from them, and the
//! stable status codes persisted in the `jobs` table.
//!
//! ```text
//! process_at ──► IdGenerator ──► ULID (48-bit ms + 80-bit random)
//!      │                              │
//!      └──► PartitionPolicy ◄─────────┘ record_id_to_time
//!                 │
//!                 ▼
//!               part (end of ISO week, local time)
//! ```

pub mod error;
pub mod id;
pub mod partition;
pub mod status;

pub use error::*;
pub use id::*;
pub use partition::*;
pub use status::*;
