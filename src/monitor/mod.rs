//! Passive data structures and the filesystem watch facade.
//!
//! This module provides:
//! - `pathtrie`: minimal-antichain storage for pending changes
//! - `replica`: per-replica watch and change bookkeeping
//! - `watcher`: the watch facade over the native notification service

pub mod pathtrie;
pub mod replica;
pub mod watcher;

pub use pathtrie::PathTrie;
pub use replica::Replica;
pub use watcher::{FsEvent, FsEventKind, FsWatcher, WatchControl, WatcherError};
