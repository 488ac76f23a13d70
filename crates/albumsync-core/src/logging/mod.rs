//! Per-session JSONL logging.
//!
//! Every process that runs the album core can write its tracing events to
//! its own append-only JSONL file, one object per line:
//!
//! ```text
//! logs/
//! └── raw/
//!     ├── 2026-10-19_demo.jsonl
//!     └── 2026-10-19_u1.jsonl
//! ```
//!
//! `album_id` and `user` fields recorded on an event are lifted to top-level
//! keys so one album's history can be pulled out of several files:
//!
//! ```bash
//! jq 'select(.album_id == "album_01J...")' logs/raw/*.jsonl
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use albumsync_core::logging::LoggingBuilder;
//!
//! LoggingBuilder::new("demo")
//!     .with_logs_dir("./logs")
//!     .with_filter("albumsync_core=debug")
//!     .init()?;
//! ```

pub mod entry;
pub mod layer;
pub mod writer;

pub use entry::{EntryFilter, LogEntry};
pub use layer::{JsonlLayer, LoggingBuilder, LoggingError};
pub use writer::{read_entries, SessionLogWriter};
