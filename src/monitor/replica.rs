//! Per-replica bookkeeping: watched directories, pending changes, wait state.

use crate::monitor::pathtrie::PathTrie;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// One replica root registered by the driver.
///
/// `dirs` maps every watched *real* directory to the *logical* prefix it
/// represents inside the replica. The base path always maps to the empty
/// prefix; following a symlink adds an entry for the link's real target so
/// events reported against that subtree can be rewritten back into the
/// replica's namespace.
#[derive(Debug)]
pub struct Replica {
    /// Opaque identifier chosen by the driver.
    pub hash: String,
    /// Absolute root of the replica on disk.
    pub base_path: PathBuf,
    /// Real watched directory to logical prefix.
    pub dirs: HashMap<PathBuf, PathBuf>,
    /// Logical paths pending delivery.
    pub changes: PathTrie,
    /// Set when the driver issued WAIT and nothing was pending.
    pub waiting: bool,
}

impl Replica {
    /// Creates a replica anchored at `base_path`, with the base mapped to
    /// the empty logical prefix.
    pub fn new(hash: &str, base_path: PathBuf) -> Self {
        let mut dirs = HashMap::new();
        dirs.insert(base_path.clone(), PathBuf::new());
        Self {
            hash: hash.to_string(),
            base_path,
            dirs,
            changes: PathTrie::new(),
            waiting: false,
        }
    }

    /// Records a followed symlink: events under the real `target` rewrite
    /// to the `logical` prefix.
    pub fn record_link(&mut self, target: PathBuf, logical: PathBuf) {
        self.dirs.insert(target, logical);
    }

    /// Attributes one filesystem event to this replica.
    ///
    /// Every `dirs` entry whose real path is a component-wise prefix of
    /// `path` contributes a logical change. Returns whether any entry
    /// matched. A single event can match through several entries when
    /// symlinks alias parts of the tree.
    pub fn note_event(&mut self, path: &Path) -> bool {
        let mut matched = false;
        for (real, logical) in &self.dirs {
            if let Ok(rel) = path.strip_prefix(real) {
                let change = logical.join(rel);
                tracing::trace!(
                    replica = %self.hash,
                    change = %change.display(),
                    "recording change"
                );
                self.changes.insert(&change);
                matched = true;
            }
        }
        matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(replica: &Replica) -> Vec<String> {
        let mut paths = Vec::new();
        replica
            .changes
            .walk(|p| paths.push(p.to_string_lossy().into_owned()));
        paths.sort();
        paths
    }

    #[test]
    fn test_base_path_is_always_mapped() {
        let replica = Replica::new("h1", PathBuf::from("/repo"));
        assert_eq!(replica.dirs.get(Path::new("/repo")), Some(&PathBuf::new()));
    }

    #[test]
    fn test_event_under_base_becomes_relative() {
        let mut replica = Replica::new("h1", PathBuf::from("/repo"));
        assert!(replica.note_event(Path::new("/repo/sub/x")));
        assert_eq!(pending(&replica), vec!["sub/x".to_string()]);
    }

    #[test]
    fn test_match_honors_component_boundaries() {
        let mut replica = Replica::new("h1", PathBuf::from("/repo"));
        assert!(!replica.note_event(Path::new("/repo-backup/x")));
        assert!(pending(&replica).is_empty());
    }

    #[test]
    fn test_event_on_base_itself_requests_full_rescan() {
        let mut replica = Replica::new("h1", PathBuf::from("/repo"));
        assert!(replica.note_event(Path::new("/repo")));
        assert_eq!(pending(&replica), vec![String::new()]);
    }

    #[test]
    fn test_link_target_rewrites_to_logical_prefix() {
        let mut replica = Replica::new("h1", PathBuf::from("/repo"));
        replica.record_link(PathBuf::from("/other/dir"), PathBuf::from("link"));

        assert!(replica.note_event(Path::new("/other/dir/f")));
        assert_eq!(pending(&replica), vec!["link/f".to_string()]);
    }

    #[test]
    fn test_aliased_event_matches_every_mapping() {
        let mut replica = Replica::new("h1", PathBuf::from("/repo"));
        replica.record_link(PathBuf::from("/repo/data"), PathBuf::from("mirror"));

        assert!(replica.note_event(Path::new("/repo/data/f")));
        assert_eq!(
            pending(&replica),
            vec!["data/f".to_string(), "mirror/f".to_string()]
        );
    }
}
