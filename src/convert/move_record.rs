use super::commits::{Commit, CommitId, CommitStore};
use super::files::{FileCatalog, FileId};
use crate::FHashSet;

/// The displacements one label resolution needs: for each recorded
/// commit, the set of files whose revisions must end up after the final
/// (resolved) commit. Applying walks in reverse order, whole-moving a
/// commit when all of its files are implicated and splitting it
/// otherwise.
pub(crate) struct CommitMoveRecord {
    final_commit: CommitId,
    moves: Vec<(CommitId, FHashSet<FileId>)>,
}

impl CommitMoveRecord {
    pub(crate) fn new(final_commit: CommitId) -> Self {
        Self {
            final_commit,
            moves: Vec::new(),
        }
    }

    pub(crate) fn final_commit(&self) -> CommitId {
        self.final_commit
    }

    pub(crate) fn set_final(&mut self, commit: CommitId) {
        self.final_commit = commit;
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.moves.len()
    }

    pub(crate) fn record(&mut self, commit: CommitId, files: impl IntoIterator<Item = FileId>) {
        match self.moves.iter_mut().find(|(cid, _)| *cid == commit) {
            Some((_, set)) => set.extend(files),
            None => {
                let set: FHashSet<FileId> = files.into_iter().collect();
                if !set.is_empty() {
                    self.moves.push((commit, set));
                }
            }
        }
    }

    pub(crate) fn contains(&self, commit: CommitId, file: FileId) -> bool {
        self.moves
            .iter()
            .any(|(cid, set)| *cid == commit && set.contains(&file))
    }

    /// Applies the record to the flat commit list: every implicated
    /// revision ends up immediately after the final commit, relative
    /// order preserved. Splits produce `<id>-1` (staying) and `<id>-2`
    /// (displaced) and rewrite the file→commit back-references. Returns
    /// the resolved commit, which is the kept half when the final commit
    /// itself splits.
    pub(crate) fn apply(
        mut self,
        store: &mut CommitStore,
        catalog: &mut FileCatalog,
        ordering: &mut Vec<CommitId>,
    ) -> CommitId {
        // reverse position order so every insertion right after the
        // final commit preserves the displaced commits' relative order
        let position = |ordering: &[CommitId], cid: CommitId| {
            ordering
                .iter()
                .position(|&x| x == cid)
                .expect("move record references commit outside the list")
        };
        self.moves
            .sort_by_key(|&(cid, _)| std::cmp::Reverse(position(ordering, cid)));

        let mut final_commit = self.final_commit;

        for (cid, files) in self.moves {
            let pos = position(ordering, cid);
            let whole = store
                .get(cid)
                .revs()
                .iter()
                .all(|fr| files.contains(&fr.file));

            if whole {
                debug_assert!(cid != final_commit);
                ordering.remove(pos);
                let dest = position(ordering, final_commit) + 1;
                ordering.insert(dest, cid);
                continue;
            }

            let base_id = store.get(cid).id().to_owned();
            let revs = std::mem::take(store.get_mut(cid).revs_mut());
            let (displaced, kept): (Vec<_>, Vec<_>) =
                revs.into_iter().partition(|fr| files.contains(&fr.file));

            let kept_id = store.add(Commit::new(format!("{base_id}-1"), kept));
            let displaced_id = store.add(Commit::new(format!("{base_id}-2"), displaced));
            for half in [kept_id, displaced_id] {
                let links: Vec<_> = store
                    .get(half)
                    .revs()
                    .iter()
                    .map(|fr| (fr.file, fr.rev.clone()))
                    .collect();
                for (file, rev) in links {
                    catalog.get_mut(file).set_commit(rev, half);
                }
            }

            ordering[pos] = kept_id;
            if cid == final_commit {
                final_commit = kept_id;
            }
            let dest = position(ordering, final_commit) + 1;
            ordering.insert(dest, displaced_id);
        }

        final_commit
    }
}
