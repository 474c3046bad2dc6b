use super::commits::Commit;
use super::files::{FileCatalog, FileId, FileRevision};
use super::revision::Revision;
use crate::FHashMap;

#[derive(Debug)]
pub(crate) enum StateError {
    RevisionGap {
        file: String,
        branch: String,
        prev: Revision,
        next: Revision,
    },
}

impl std::fmt::Display for StateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RevisionGap {
                file,
                branch,
                prev,
                next,
            } => write!(
                f,
                "{file} on {branch}: revision {next} does not directly follow {prev}",
            ),
        }
    }
}

struct Entry {
    rev: Revision,
    live: bool,
}

/// The replayed file→revision map of one branch. Dead entries are kept
/// so strict apply can check continuity across deletes and the head-only
/// overlay can emit deletions.
pub(crate) struct BranchState {
    files: FHashMap<FileId, Entry>,
}

impl BranchState {
    fn new() -> Self {
        Self {
            files: FHashMap::default(),
        }
    }

    pub(crate) fn live_revision_of(&self, file: FileId) -> Option<&Revision> {
        self.files
            .get(&file)
            .filter(|entry| entry.live)
            .map(|entry| &entry.rev)
    }

    pub(crate) fn live_files(&self) -> impl Iterator<Item = (FileId, &Revision)> {
        self.files
            .iter()
            .filter(|(_, entry)| entry.live)
            .map(|(&file, entry)| (file, &entry.rev))
    }

    pub(crate) fn tracked_files(&self) -> impl Iterator<Item = (FileId, &Revision, bool)> {
        self.files
            .iter()
            .map(|(&file, entry)| (file, &entry.rev, entry.live))
    }
}

/// Per-branch live-file maps rebuilt by replaying commits in order.
///
/// The full flavor seeds child branches as branchpoint revisions are
/// applied, so a child's state inherits everything the parent had at the
/// point of departure. The changes-only flavor carries only what happens
/// on the branch itself.
pub(crate) struct RepositoryState {
    branches: FHashMap<String, BranchState>,
    full: bool,
    strict: bool,
}

impl RepositoryState {
    pub(crate) fn full() -> Self {
        Self {
            branches: FHashMap::default(),
            full: true,
            strict: false,
        }
    }

    pub(crate) fn changes_only() -> Self {
        Self {
            branches: FHashMap::default(),
            full: false,
            strict: false,
        }
    }

    pub(crate) fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    pub(crate) fn branch(&self, name: &str) -> Option<&BranchState> {
        self.branches.get(name)
    }

    pub(crate) fn branch_names(&self) -> impl Iterator<Item = &str> {
        self.branches.keys().map(String::as_str)
    }

    pub(crate) fn apply(&mut self, catalog: &FileCatalog, commit: &Commit) -> Result<(), StateError> {
        for fr in commit.revs() {
            self.apply_file_rev(catalog, fr)?;
        }
        Ok(())
    }

    /// Revisions on branches without a symbolic name are ignored; the
    /// filter stage has already dropped their commits.
    pub(crate) fn apply_file_rev(
        &mut self,
        catalog: &FileCatalog,
        fr: &FileRevision,
    ) -> Result<(), StateError> {
        let Some(branch) = fr.branch(catalog) else {
            return Ok(());
        };
        let branch = branch.to_owned();

        let state = self
            .branches
            .entry(branch.clone())
            .or_insert_with(BranchState::new);

        if self.strict {
            let prev = state
                .files
                .get(&fr.file)
                .map(|entry| entry.rev.clone())
                .unwrap_or_else(Revision::empty);
            if !prev.directly_precedes(&fr.rev) {
                return Err(StateError::RevisionGap {
                    file: catalog.get(fr.file).name().into(),
                    branch,
                    prev,
                    next: fr.rev.clone(),
                });
            }
        }

        state.files.insert(
            fr.file,
            Entry {
                rev: fr.rev.clone(),
                live: !fr.dead,
            },
        );

        if self.full && !fr.dead {
            // seed every branch departing from this exact revision
            let children: Vec<String> = catalog
                .get(fr.file)
                .all_branches()
                .filter(|(_, marker)| marker.branchpoint() == fr.rev)
                .map(|(name, _)| name.to_owned())
                .collect();
            for child in children {
                self.branches
                    .entry(child)
                    .or_insert_with(BranchState::new)
                    .files
                    .insert(
                        fr.file,
                        Entry {
                            rev: fr.rev.clone(),
                            live: true,
                        },
                    );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;

    use super::super::files::{FileCatalog, FileId, FileRevision};
    use super::super::revision::{Revision, RevisionPool};
    use super::super::MAIN;
    use super::{RepositoryState, StateError};

    fn file_rev(pool: &mut RevisionPool, file: FileId, rev: &str, dead: bool) -> FileRevision {
        FileRevision {
            file,
            rev: pool.parse(rev).unwrap(),
            time: chrono::Utc.with_ymd_and_hms(2004, 7, 1, 10, 0, 0).unwrap(),
            author: "anna".into(),
            commit_id: None,
            mergepoint: None,
            dead,
            message: String::new(),
        }
    }

    #[test]
    fn test_apply_and_delete() {
        let mut pool = RevisionPool::new();
        let mut catalog = FileCatalog::new();
        let f1 = catalog.add("a.c", false);

        let mut state = RepositoryState::full();
        state
            .apply_file_rev(&catalog, &file_rev(&mut pool, f1, "1.1", false))
            .unwrap();
        state
            .apply_file_rev(&catalog, &file_rev(&mut pool, f1, "1.2", false))
            .unwrap();

        let main = state.branch(MAIN).unwrap();
        assert_eq!(main.live_revision_of(f1), Some(&pool.parse("1.2").unwrap()));
        assert_eq!(main.live_files().count(), 1);

        state
            .apply_file_rev(&catalog, &file_rev(&mut pool, f1, "1.3", true))
            .unwrap();
        let main = state.branch(MAIN).unwrap();
        assert_eq!(main.live_revision_of(f1), None);
        assert_eq!(main.live_files().count(), 0);
        assert_eq!(main.tracked_files().count(), 1);
    }

    #[test]
    fn test_branchpoint_seeding() {
        let mut pool = RevisionPool::new();
        let mut catalog = FileCatalog::new();
        let f1 = catalog.add("a.c", false);
        catalog
            .get_mut(f1)
            .add_branch("devel", pool.parse("1.2.0.4").unwrap())
            .unwrap();

        let mut state = RepositoryState::full();
        state
            .apply_file_rev(&catalog, &file_rev(&mut pool, f1, "1.1", false))
            .unwrap();
        assert!(state.branch("devel").is_none());

        state
            .apply_file_rev(&catalog, &file_rev(&mut pool, f1, "1.2", false))
            .unwrap();
        let devel = state.branch("devel").unwrap();
        assert_eq!(devel.live_revision_of(f1), Some(&pool.parse("1.2").unwrap()));

        // changes-only states do not inherit
        let mut state = RepositoryState::changes_only();
        state
            .apply_file_rev(&catalog, &file_rev(&mut pool, f1, "1.2", false))
            .unwrap();
        assert!(state.branch("devel").is_none());
    }

    #[test]
    fn test_strict_gap() {
        let mut pool = RevisionPool::new();
        let mut catalog = FileCatalog::new();
        let f1 = catalog.add("a.c", false);

        let mut state = RepositoryState::full().strict();
        state
            .apply_file_rev(&catalog, &file_rev(&mut pool, f1, "1.1", false))
            .unwrap();
        let err = state
            .apply_file_rev(&catalog, &file_rev(&mut pool, f1, "1.3", false))
            .unwrap_err();
        assert!(matches!(err, StateError::RevisionGap { .. }));

        // a delete still advances the revision, so a re-add continues it
        let mut state = RepositoryState::full().strict();
        for (rev, dead) in [("1.1", false), ("1.2", true), ("1.3", false)] {
            state
                .apply_file_rev(&catalog, &file_rev(&mut pool, f1, rev, dead))
                .unwrap();
        }
        assert_eq!(
            state.branch(MAIN).unwrap().live_revision_of(f1),
            Some(&pool.parse("1.3").unwrap()),
        );
    }

    #[test]
    fn test_unnamed_branch_ignored() {
        let mut pool = RevisionPool::new();
        let mut catalog = FileCatalog::new();
        let f1 = catalog.add("a.c", false);

        let mut state = RepositoryState::full().strict();
        state
            .apply_file_rev(&catalog, &file_rev(&mut pool, f1, "1.2.6.1", false))
            .unwrap();
        assert_eq!(state.branch_names().count(), 0);
    }

    #[test]
    fn test_empty_revision_helper() {
        assert!(Revision::empty().is_empty());
    }
}
