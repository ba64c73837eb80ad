use std::collections::BTreeMap;

/// Which parts of the snapshot a batch touched.
///
/// Mirrors the shape of the written paths. A node with `is_dirty` set was
/// itself added, removed or replaced, which implies everything below it
/// changed; otherwise only the listed children changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtyPaths {
    is_dirty: bool,
    children: BTreeMap<String, DirtyPaths>,
}

static WHOLE: DirtyPaths = DirtyPaths {
    is_dirty: true,
    children: BTreeMap::new(),
};

impl DirtyPaths {
    pub fn new() -> Self {
        Self::default()
    }

    /// The tree for a node that changed as a whole.
    pub fn whole() -> &'static DirtyPaths {
        &WHOLE
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    pub fn is_empty(&self) -> bool {
        !self.is_dirty && self.children.is_empty()
    }

    /// Record a write at `path`.
    pub fn mark<S: AsRef<str>>(&mut self, path: &[S]) {
        let mut node = self;
        for segment in path {
            if node.is_dirty {
                return;
            }
            node = node
                .children
                .entry(segment.as_ref().to_string())
                .or_default();
        }
        node.is_dirty = true;
        node.children.clear();
    }

    pub fn merge(&mut self, other: DirtyPaths) {
        if self.is_dirty {
            return;
        }
        if other.is_dirty {
            self.is_dirty = true;
            self.children.clear();
            return;
        }
        for (key, child) in other.children {
            self.children.entry(key).or_default().merge(child);
        }
    }

    /// The dirty tree under `key`, if anything there changed.
    ///
    /// Below a whole-dirty node every child counts as whole-dirty.
    pub fn child(&self, key: &str) -> Option<&DirtyPaths> {
        if self.is_dirty {
            Some(&WHOLE)
        } else {
            self.children.get(key)
        }
    }

    pub fn get<S: AsRef<str>>(&self, path: &[S]) -> Option<&DirtyPaths> {
        let mut node = self;
        for segment in path {
            node = node.child(segment.as_ref())?;
        }
        Some(node)
    }

    /// Explicitly listed children. Empty for a whole-dirty node.
    pub fn children(&self) -> impl Iterator<Item = (&str, &DirtyPaths)> {
        self.children.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// `true` when any direct child was added, removed or replaced.
    pub fn has_dirty_child(&self) -> bool {
        self.is_dirty || self.children.values().any(DirtyPaths::is_dirty)
    }

    pub(crate) fn top_level_keys(&self) -> Vec<&str> {
        self.children.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_and_lookup() {
        let mut dirty = DirtyPaths::new();
        assert!(dirty.is_empty());
        dirty.mark(&["tablesById", "tbl1", "name"]);
        assert!(!dirty.is_empty());
        assert!(!dirty.is_dirty());

        let table = dirty.get(&["tablesById", "tbl1"]).unwrap();
        assert!(!table.is_dirty());
        assert!(table.child("name").unwrap().is_dirty());
        assert!(table.child("description").is_none());
    }

    #[test]
    fn test_whole_dirty_covers_descendants() {
        let mut dirty = DirtyPaths::new();
        dirty.mark(&["tablesById", "tbl1"]);
        dirty.mark(&["tablesById", "tbl1", "name"]);
        let table = dirty.get(&["tablesById", "tbl1"]).unwrap();
        assert!(table.is_dirty());
        assert_eq!(table.children().count(), 0);
        assert!(table.get(&["fieldsById", "fld1", "type"]).unwrap().is_dirty());
    }

    #[test]
    fn test_marking_parent_clears_children() {
        let mut dirty = DirtyPaths::new();
        dirty.mark(&["a", "b"]);
        dirty.mark(&["a"]);
        assert_eq!(dirty.get(&["a"]), Some(DirtyPaths::whole()));
    }

    #[test]
    fn test_merge() {
        let mut left = DirtyPaths::new();
        left.mark(&["a", "x"]);
        let mut right = DirtyPaths::new();
        right.mark(&["a", "y"]);
        right.mark(&["b"]);
        left.merge(right);
        assert!(left.get(&["a", "x"]).is_some());
        assert!(left.get(&["a", "y"]).is_some());
        assert!(left.get(&["b"]).unwrap().is_dirty());
        assert_eq!(left.top_level_keys(), vec!["a", "b"]);

        let mut whole = DirtyPaths::new();
        whole.mark::<&str>(&[]);
        left.merge(whole);
        assert!(left.is_dirty());
    }

    #[test]
    fn test_has_dirty_child() {
        let mut dirty = DirtyPaths::new();
        dirty.mark(&["fld1", "name"]);
        assert!(!dirty.has_dirty_child());
        dirty.mark(&["fld2"]);
        assert!(dirty.has_dirty_child());
    }
}
