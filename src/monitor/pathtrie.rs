//! Pending-change storage for watched replicas.
//!
//! The driver re-scans every reported path recursively, so reporting `a`
//! after both `a/x` and `a/y` changed is strictly better than reporting all
//! three. [`PathTrie`] enforces that minimization structurally: it only ever
//! stores an antichain of paths under the ancestor-or-equal relation.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Components, Path, PathBuf};

/// A set of changed paths collapsed to its minimal recursive cover.
///
/// Inserting a path that is an ancestor of stored paths removes those paths;
/// inserting a descendant of a stored path is a no-op. The empty path is a
/// valid entry and covers everything.
///
/// Invariants: a node with `present` set has no children, and every
/// materialized chain ends at a `present` node.
#[derive(Debug, Default)]
pub struct PathTrie {
    present: bool,
    children: HashMap<OsString, PathTrie>,
}

impl PathTrie {
    /// Creates an empty trie.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `path` has changed.
    ///
    /// The empty path splits into zero segments and marks the root, which
    /// drops every stored path in favor of a full rescan.
    pub fn insert(&mut self, path: &Path) {
        self.insert_segments(&mut path.components());
    }

    fn insert_segments(&mut self, segments: &mut Components<'_>) {
        if self.present {
            // An ancestor is already stored; this path is covered.
            return;
        }
        match segments.next() {
            None => {
                self.present = true;
                self.children.clear();
            }
            Some(segment) => self
                .children
                .entry(segment.as_os_str().to_os_string())
                .or_default()
                .insert_segments(segments),
        }
    }

    /// Visits every stored path in arbitrary order.
    pub fn walk<F: FnMut(&Path)>(&self, mut f: F) {
        let mut prefix = PathBuf::new();
        self.walk_node(&mut prefix, &mut f);
    }

    fn walk_node<F: FnMut(&Path)>(&self, prefix: &mut PathBuf, f: &mut F) {
        if self.present {
            f(prefix);
            return;
        }
        for (segment, child) in &self.children {
            prefix.push(segment);
            child.walk_node(prefix, f);
            prefix.pop();
        }
    }

    /// Removes all stored paths.
    pub fn clear(&mut self) {
        self.present = false;
        self.children.clear();
    }

    /// Reports whether no path is stored.
    pub fn is_empty(&self) -> bool {
        !self.present && self.children.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(trie: &PathTrie) -> Vec<String> {
        let mut paths = Vec::new();
        trie.walk(|p| paths.push(p.to_string_lossy().into_owned()));
        paths.sort();
        paths
    }

    #[test]
    fn test_minimal_cover() {
        let cases: &[(&[&str], &[&str])] = &[
            (&[], &[]),
            (&["a", "b", "c"], &["a", "b", "c"]),
            (&["a/b/c", "a/b/d", "a/b/e"], &["a/b/c", "a/b/d", "a/b/e"]),
            (&["a", "a/a", "a/a/a"], &["a"]),
            (&["a/a/a", "a/a", "a"], &["a"]),
            (&["a/a", "b", "a"], &["a", "b"]),
            (&[""], &[""]),
            (&["", "a"], &[""]),
        ];

        for (input, expected) in cases {
            let mut trie = PathTrie::new();
            for path in *input {
                trie.insert(Path::new(path));
            }
            let mut expected: Vec<String> = expected.iter().map(|p| p.to_string()).collect();
            expected.sort();
            assert_eq!(collect(&trie), expected, "input: {input:?}");
        }
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut trie = PathTrie::new();
        trie.insert(Path::new("a/b"));
        trie.insert(Path::new("a/b"));
        assert_eq!(collect(&trie), vec!["a/b".to_string()]);
    }

    #[test]
    fn test_ancestor_replaces_siblings() {
        let mut trie = PathTrie::new();
        trie.insert(Path::new("a/x"));
        trie.insert(Path::new("a/y"));
        trie.insert(Path::new("a"));
        assert_eq!(collect(&trie), vec!["a".to_string()]);
    }

    #[test]
    fn test_empty_path_covers_everything() {
        let mut trie = PathTrie::new();
        trie.insert(Path::new("a/b"));
        trie.insert(Path::new("c"));
        trie.insert(Path::new(""));
        assert_eq!(collect(&trie), vec![String::new()]);
    }

    #[test]
    fn test_clear_and_is_empty() {
        let mut trie = PathTrie::new();
        assert!(trie.is_empty());

        trie.insert(Path::new("a"));
        assert!(!trie.is_empty());

        trie.clear();
        assert!(trie.is_empty());
        assert!(collect(&trie).is_empty());
    }
}
