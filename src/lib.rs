//! syncwatch
//!
//! A file-monitoring helper that bridges a file-synchronization driver to
//! the operating system's native change-notification facilities. The driver
//! speaks a line-oriented text protocol over this process's standard
//! input/output and expects it to install recursive watches over replica
//! roots, collapse bursts of filesystem events into a minimal set of paths
//! to re-scan, and deliver change notifications either immediately or when
//! the driver explicitly waits for them.
//!
//! ## Flow Overview
//!
//! ```text
//! Driver stdin line ──┐
//!                     ├──> Engine (single decision loop)
//! Filesystem event ───┘        │
//!                              ├── replica registry (real → logical dirs)
//!                              ├── PathTrie (minimal recursive cover)
//!                              └── replies on stdout
//! ```
//!
//! The engine handles one input at a time, so replica state needs no
//! locking. Watches are recursive; a burst of events below one directory
//! collapses to that directory before delivery.
//!
//! ## Module Structure
//!
//! - [`monitor`]: passive data structures and the watch facade
//!   - [`monitor::pathtrie`]: minimal-antichain change storage
//!   - [`monitor::replica`]: per-replica bookkeeping
//!   - [`monitor::watcher`]: the facade over the native notifier
//! - [`proto`]: the driver protocol
//!   - [`proto::wire`]: percent-escaped line codec
//!   - [`proto::engine`]: command interpreter and select loop

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod monitor;
pub mod proto;

/// Re-exports for convenience.
pub mod prelude {
    pub use crate::monitor::{
        FsEvent, FsEventKind, FsWatcher, PathTrie, Replica, WatchControl, WatcherError,
    };
    pub use crate::proto::{DebugCallback, Engine, EngineError, ProtocolError};
}
