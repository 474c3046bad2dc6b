use chrono::{DateTime, Utc};

use super::files::{FileCatalog, FileId, FileRevision};

/// Stable slot of a commit in the store. Stays valid across reordering
/// and splitting; only the store hands these out.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct CommitId(pub(crate) u32);

/// An ordered bag of file revisions sharing one change identity, plus
/// the linkage fields the branch-stream collection manages.
pub(crate) struct Commit {
    id: String,
    revs: Vec<FileRevision>,
    pub(super) index: u32,
    pub(super) pred: Option<CommitId>,
    pub(super) succ: Option<CommitId>,
    pub(super) merge_from: Option<CommitId>,
    pub(super) branch_roots: Vec<CommitId>,
    pub(super) errors: Vec<String>,
}

impl Commit {
    pub(crate) fn new(id: String, revs: Vec<FileRevision>) -> Self {
        Self {
            id,
            revs,
            index: 0,
            pred: None,
            succ: None,
            merge_from: None,
            branch_roots: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn revs(&self) -> &[FileRevision] {
        &self.revs
    }

    pub(crate) fn revs_mut(&mut self) -> &mut Vec<FileRevision> {
        &mut self.revs
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.revs.is_empty()
    }

    pub(crate) fn rev_of_file(&self, file: FileId) -> Option<&FileRevision> {
        self.revs.iter().find(|fr| fr.file == file)
    }

    /// Earliest member time.
    pub(crate) fn time(&self) -> DateTime<Utc> {
        self.revs
            .iter()
            .map(|fr| fr.time)
            .min()
            .expect("commit with no file revisions")
    }

    pub(crate) fn author(&self) -> &str {
        &self.revs[0].author
    }

    /// Unique member messages, joined in first-appearance order.
    pub(crate) fn message(&self) -> String {
        let mut seen = Vec::<&str>::new();
        for fr in &self.revs {
            if !fr.message.is_empty() && !seen.contains(&fr.message.as_str()) {
                seen.push(&fr.message);
            }
        }
        seen.join("\n\n")
    }

    /// The branch of the first member. After multi-branch splitting every
    /// member lives on this branch; verification flags violations.
    pub(crate) fn branch<'a>(&self, catalog: &'a FileCatalog) -> Option<&'a str> {
        self.revs[0].branch(catalog)
    }

    pub(crate) fn index(&self) -> u32 {
        self.index
    }

    pub(crate) fn pred(&self) -> Option<CommitId> {
        self.pred
    }

    pub(crate) fn succ(&self) -> Option<CommitId> {
        self.succ
    }

    pub(crate) fn merge_from(&self) -> Option<CommitId> {
        self.merge_from
    }

    pub(crate) fn branch_roots(&self) -> &[CommitId] {
        &self.branch_roots
    }

    pub(crate) fn add_error(&mut self, error: String) {
        self.errors.push(error);
    }

    pub(crate) fn errors(&self) -> &[String] {
        &self.errors
    }
}

/// Vector arena owning every commit. Reordering happens in id lists and
/// in the branch streams; slots themselves never move.
pub(crate) struct CommitStore {
    commits: Vec<Commit>,
}

impl CommitStore {
    pub(crate) fn new() -> Self {
        Self { commits: Vec::new() }
    }

    pub(crate) fn add(&mut self, commit: Commit) -> CommitId {
        let id = CommitId(self.commits.len() as u32);
        self.commits.push(commit);
        id
    }

    pub(crate) fn get(&self, id: CommitId) -> &Commit {
        &self.commits[id.0 as usize]
    }

    pub(crate) fn get_mut(&mut self, id: CommitId) -> &mut Commit {
        &mut self.commits[id.0 as usize]
    }

    pub(crate) fn len(&self) -> usize {
        self.commits.len()
    }
}
