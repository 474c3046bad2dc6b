use chrono::{DateTime, Utc};

use super::commits::CommitId;
use super::revision::Revision;
use super::MAIN;
use crate::FHashMap;

/// Stable identity of a file in the catalog.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct FileId(pub(crate) u32);

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum AddSymbolError {
    TagOnBranchRevision { name: String, rev: Revision },
    BranchNotMarker { name: String, rev: Revision },
}

impl std::fmt::Display for AddSymbolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TagOnBranchRevision { name, rev } => {
                write!(f, "tag \"{name}\" bound to branch revision {rev}")
            }
            Self::BranchNotMarker { name, rev } => {
                write!(f, "branch \"{name}\" bound to non-branch revision {rev}")
            }
        }
    }
}

/// Per-file symbol tables and commit back-references.
pub(crate) struct FileInfo {
    name: String,
    binary: bool,
    head_only: bool,
    tags: FHashMap<String, Revision>,
    tags_by_rev: FHashMap<Revision, Vec<String>>,
    branches: FHashMap<String, Revision>,
    branch_by_stem: FHashMap<Revision, String>,
    rev_commits: FHashMap<Revision, CommitId>,
    branch_added_on: Option<String>,
}

impl FileInfo {
    fn new(name: String, binary: bool) -> Self {
        Self {
            name,
            binary,
            head_only: false,
            tags: FHashMap::default(),
            tags_by_rev: FHashMap::default(),
            branches: FHashMap::default(),
            branch_by_stem: FHashMap::default(),
            rev_commits: FHashMap::default(),
            branch_added_on: None,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn is_binary(&self) -> bool {
        self.binary
    }

    pub(crate) fn set_head_only(&mut self) {
        self.head_only = true;
    }

    /// Excluded from history; only the latest content appears, in the
    /// synthetic branch-tip commits.
    pub(crate) fn is_head_only(&self) -> bool {
        self.head_only
    }

    pub(crate) fn add_tag(&mut self, name: &str, rev: Revision) -> Result<(), AddSymbolError> {
        if rev.is_branch() {
            return Err(AddSymbolError::TagOnBranchRevision {
                name: name.into(),
                rev,
            });
        }
        // a re-bound tag must not leave a stale reverse entry behind
        if let Some(old_rev) = self.tags.insert(name.into(), rev.clone()) {
            if let Some(names) = self.tags_by_rev.get_mut(&old_rev) {
                names.retain(|existing| existing != name);
            }
        }
        self.tags_by_rev.entry(rev).or_default().push(name.into());
        Ok(())
    }

    pub(crate) fn add_branch(&mut self, name: &str, marker: Revision) -> Result<(), AddSymbolError> {
        if !marker.is_branch() {
            return Err(AddSymbolError::BranchNotMarker {
                name: name.into(),
                rev: marker,
            });
        }
        self.branch_by_stem
            .insert(marker.branch_stem(), name.into());
        self.branches.insert(name.into(), marker);
        Ok(())
    }

    /// The branch a file revision lives on, `MAIN` for the trunk. `None`
    /// for a revision on a branch with no symbolic name.
    pub(crate) fn branch_of(&self, rev: &Revision) -> Option<&str> {
        if rev.is_trunk() {
            Some(MAIN)
        } else {
            self.branch_by_stem.get(&rev.branch_stem()).map(String::as_str)
        }
    }

    pub(crate) fn tag_revision(&self, tag: &str) -> Option<&Revision> {
        self.tags.get(tag)
    }

    pub(crate) fn tags_at(&self, rev: &Revision) -> &[String] {
        self.tags_by_rev.get(rev).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn branch_marker(&self, branch: &str) -> Option<&Revision> {
        self.branches.get(branch)
    }

    /// The parent-line revision branch `branch` departs from on this file.
    pub(crate) fn branchpoint_of(&self, branch: &str) -> Option<Revision> {
        self.branches.get(branch).map(Revision::branchpoint)
    }

    pub(crate) fn all_branches(&self) -> impl Iterator<Item = (&str, &Revision)> {
        self.branches.iter().map(|(name, marker)| (name.as_str(), marker))
    }

    pub(crate) fn set_commit(&mut self, rev: Revision, commit: CommitId) {
        self.rev_commits.insert(rev, commit);
    }

    pub(crate) fn commit_of(&self, rev: &Revision) -> Option<CommitId> {
        self.rev_commits.get(rev).copied()
    }

    pub(crate) fn set_branch_added_on(&mut self, branch: String) {
        self.branch_added_on = Some(branch);
    }

    pub(crate) fn branch_added_on(&self) -> &str {
        self.branch_added_on.as_deref().unwrap_or(MAIN)
    }
}

/// Owns every `FileInfo`; files are addressed by `FileId` everywhere else.
pub(crate) struct FileCatalog {
    files: Vec<FileInfo>,
    by_name: FHashMap<String, FileId>,
}

impl FileCatalog {
    pub(crate) fn new() -> Self {
        Self {
            files: Vec::new(),
            by_name: FHashMap::default(),
        }
    }

    pub(crate) fn add(&mut self, name: &str, binary: bool) -> FileId {
        if let Some(id) = self.lookup(name) {
            return id;
        }
        let id = FileId(self.files.len() as u32);
        self.files.push(FileInfo::new(name.into(), binary));
        self.by_name.insert(name.into(), id);
        id
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<FileId> {
        self.by_name.get(name).copied()
    }

    pub(crate) fn get(&self, id: FileId) -> &FileInfo {
        &self.files[id.0 as usize]
    }

    pub(crate) fn get_mut(&mut self, id: FileId) -> &mut FileInfo {
        &mut self.files[id.0 as usize]
    }

    pub(crate) fn len(&self) -> usize {
        self.files.len()
    }

    pub(crate) fn ids(&self) -> impl Iterator<Item = FileId> {
        (0..self.files.len() as u32).map(FileId)
    }
}

/// One parsed revision event of one file.
#[derive(Clone)]
pub(crate) struct FileRevision {
    pub(crate) file: FileId,
    pub(crate) rev: Revision,
    pub(crate) time: DateTime<Utc>,
    pub(crate) author: String,
    pub(crate) commit_id: Option<String>,
    pub(crate) mergepoint: Option<Revision>,
    pub(crate) dead: bool,
    pub(crate) message: String,
}

impl FileRevision {
    pub(crate) fn branch<'a>(&self, catalog: &'a FileCatalog) -> Option<&'a str> {
        catalog.get(self.file).branch_of(&self.rev)
    }
}

#[cfg(test)]
mod tests {
    use super::super::revision::RevisionPool;
    use super::super::MAIN;
    use super::{AddSymbolError, FileCatalog};

    #[test]
    fn test_catalog_identity() {
        let mut catalog = FileCatalog::new();
        let a = catalog.add("src/a.c", false);
        let b = catalog.add("src/b.c", true);
        assert_ne!(a, b);
        assert_eq!(catalog.add("src/a.c", false), a);
        assert_eq!(catalog.lookup("src/b.c"), Some(b));
        assert_eq!(catalog.lookup("src/c.c"), None);
        assert!(catalog.get(b).is_binary());
        assert!(!catalog.get(a).is_binary());
    }

    #[test]
    fn test_symbols() {
        let mut pool = RevisionPool::new();
        let mut catalog = FileCatalog::new();
        let id = catalog.add("a.c", false);
        let file = catalog.get_mut(id);

        file.add_tag("REL_1", pool.parse("1.2").unwrap()).unwrap();
        file.add_branch("devel", pool.parse("1.2.0.4").unwrap()).unwrap();

        assert_eq!(
            file.add_tag("bad", pool.parse("1.2.0.6").unwrap()),
            Err(AddSymbolError::TagOnBranchRevision {
                name: "bad".into(),
                rev: pool.parse("1.2.0.6").unwrap(),
            }),
        );
        assert_eq!(
            file.add_branch("bad", pool.parse("1.3").unwrap()),
            Err(AddSymbolError::BranchNotMarker {
                name: "bad".into(),
                rev: pool.parse("1.3").unwrap(),
            }),
        );

        let file = catalog.get(id);
        assert_eq!(file.tag_revision("REL_1"), Some(&pool.parse("1.2").unwrap()));
        assert_eq!(file.tags_at(&pool.parse("1.2").unwrap()), ["REL_1".to_string()]);
        assert_eq!(
            file.branchpoint_of("devel"),
            Some(pool.parse("1.2").unwrap()),
        );

        assert_eq!(file.branch_of(&pool.parse("1.3").unwrap()), Some(MAIN));
        assert_eq!(file.branch_of(&pool.parse("1.2.4.1").unwrap()), Some("devel"));
        assert_eq!(file.branch_of(&pool.parse("1.2.6.1").unwrap()), None);
    }
}
