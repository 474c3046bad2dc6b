use super::commits::{CommitId, CommitStore};
use super::files::FileCatalog;
use super::MAIN;
use crate::FHashMap;

#[derive(Debug)]
pub(crate) enum StreamError {
    CommitWithoutBranch {
        commit: String,
    },
    MoveAcrossBranches {
        commit: String,
        dest: String,
    },
    MoveBackwards {
        commit: String,
        dest: String,
    },
    BrokenLinkage {
        detail: String,
    },
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CommitWithoutBranch { commit } => {
                write!(f, "commit {commit} has no resolvable branch")
            }
            Self::MoveAcrossBranches { commit, dest } => {
                write!(f, "cannot move {commit} after {dest} on another branch")
            }
            Self::MoveBackwards { commit, dest } => {
                write!(f, "cannot move {commit} after earlier commit {dest}")
            }
            Self::BrokenLinkage { detail } => write!(f, "broken stream linkage: {detail}"),
        }
    }
}

/// Per-branch doubly-linked commit chains threaded through the commit
/// store. This collection is the only code that writes the `index`,
/// `pred`, `succ` and `branch_roots` fields; indices stay dense and
/// strictly increasing along every chain across all mutations.
pub(crate) struct BranchStreams {
    order: Vec<String>,
    roots: FHashMap<String, CommitId>,
    heads: FHashMap<String, CommitId>,
    next_index: u32,
}

impl BranchStreams {
    /// Links `ordering` into per-branch chains. Non-MAIN roots are
    /// attached to their branchpoint commit from `branchpoints`; branches
    /// missing there stay parentless (excluded or unresolved branches).
    pub(crate) fn build(
        store: &mut CommitStore,
        catalog: &FileCatalog,
        ordering: &[CommitId],
        branchpoints: &FHashMap<String, CommitId>,
    ) -> Result<Self, StreamError> {
        let mut streams = Self {
            order: Vec::new(),
            roots: FHashMap::default(),
            heads: FHashMap::default(),
            next_index: 0,
        };

        for &cid in ordering {
            let commit = store.get_mut(cid);
            commit.index = 0;
            commit.pred = None;
            commit.succ = None;
            commit.branch_roots.clear();
        }

        for &cid in ordering {
            let branch = store
                .get(cid)
                .branch(catalog)
                .ok_or_else(|| StreamError::CommitWithoutBranch {
                    commit: store.get(cid).id().into(),
                })?
                .to_owned();

            let index = streams.next_index;
            streams.next_index += 1;

            if let Some(&head) = streams.heads.get(&branch) {
                store.get_mut(head).succ = Some(cid);
                let commit = store.get_mut(cid);
                commit.index = index;
                commit.pred = Some(head);
            } else {
                streams.order.push(branch.clone());
                streams.roots.insert(branch.clone(), cid);
                let bp = if branch == MAIN {
                    None
                } else {
                    branchpoints.get(&branch).copied()
                };
                let commit = store.get_mut(cid);
                commit.index = index;
                commit.pred = bp;
                if let Some(bp) = bp {
                    store.get_mut(bp).branch_roots.push(cid);
                }
            }
            streams.heads.insert(branch, cid);
        }

        debug_assert!(streams.validate(store, catalog).is_ok());
        Ok(streams)
    }

    pub(crate) fn branches(&self) -> &[String] {
        &self.order
    }

    pub(crate) fn root(&self, branch: &str) -> Option<CommitId> {
        self.roots.get(branch).copied()
    }

    pub(crate) fn head(&self, branch: &str) -> Option<CommitId> {
        self.heads.get(branch).copied()
    }

    /// Commit ids along a branch, root to head.
    pub(crate) fn chain(&self, store: &CommitStore, branch: &str) -> Vec<CommitId> {
        let mut out = Vec::new();
        let mut cur = self.root(branch);
        while let Some(cid) = cur {
            out.push(cid);
            cur = store.get(cid).succ();
        }
        out
    }

    /// Shifts `commit` forward on its branch to sit immediately after
    /// `dest`, rotating indices over the traversed span so every chain
    /// stays strictly increasing and the index set is untouched.
    pub(crate) fn move_commit(
        &mut self,
        store: &mut CommitStore,
        catalog: &FileCatalog,
        commit: CommitId,
        dest: CommitId,
    ) -> Result<(), StreamError> {
        if commit == dest {
            return Ok(());
        }

        let branch = store
            .get(commit)
            .branch(catalog)
            .ok_or_else(|| StreamError::CommitWithoutBranch {
                commit: store.get(commit).id().into(),
            })?
            .to_owned();
        if store.get(dest).branch(catalog) != Some(branch.as_str()) {
            return Err(StreamError::MoveAcrossBranches {
                commit: store.get(commit).id().into(),
                dest: store.get(dest).id().into(),
            });
        }

        // collect the span (commit, commit.succ, ..., dest)
        let mut span = vec![commit];
        let mut cur = store.get(commit).succ();
        loop {
            match cur {
                Some(cid) => {
                    span.push(cid);
                    if cid == dest {
                        break;
                    }
                    cur = store.get(cid).succ();
                }
                None => {
                    return Err(StreamError::MoveBackwards {
                        commit: store.get(commit).id().into(),
                        dest: store.get(dest).id().into(),
                    });
                }
            }
        }

        // rotate indices: successors shift down one slot, the moved
        // commit takes the destination's index
        let indices: Vec<u32> = span.iter().map(|&cid| store.get(cid).index()).collect();
        for (slot, &cid) in span[1..].iter().enumerate() {
            store.get_mut(cid).index = indices[slot];
        }
        store.get_mut(commit).index = *indices.last().unwrap();

        // unlink the moved commit
        let old_pred = store.get(commit).pred();
        let after = span[1];
        if self.roots.get(&branch) == Some(&commit) {
            self.roots.insert(branch.clone(), after);
            store.get_mut(after).pred = old_pred;
            if let Some(bp) = old_pred {
                // the displaced root hands its branchpoint to the new root
                let bp_commit = store.get_mut(bp);
                for root in bp_commit.branch_roots.iter_mut() {
                    if *root == commit {
                        *root = after;
                    }
                }
            }
        } else {
            store.get_mut(after).pred = old_pred;
            if let Some(pred) = old_pred {
                store.get_mut(pred).succ = Some(after);
            }
        }

        // relink after the destination
        let dest_succ = store.get(dest).succ();
        store.get_mut(dest).succ = Some(commit);
        let moved = store.get_mut(commit);
        moved.pred = Some(dest);
        moved.succ = dest_succ;
        match dest_succ {
            Some(next) => store.get_mut(next).pred = Some(commit),
            None => {
                self.heads.insert(branch, commit);
            }
        }

        debug_assert!(self.validate(store, catalog).is_ok());
        Ok(())
    }

    /// Appends a commit at its branch head, assigning the next free
    /// index. A branch unseen so far becomes a new parentless stream.
    pub(crate) fn append(
        &mut self,
        store: &mut CommitStore,
        catalog: &FileCatalog,
        commit: CommitId,
    ) -> Result<(), StreamError> {
        let branch = store
            .get(commit)
            .branch(catalog)
            .ok_or_else(|| StreamError::CommitWithoutBranch {
                commit: store.get(commit).id().into(),
            })?
            .to_owned();

        let index = self.next_index;
        self.next_index += 1;

        if let Some(&head) = self.heads.get(&branch) {
            store.get_mut(head).succ = Some(commit);
            let c = store.get_mut(commit);
            c.index = index;
            c.pred = Some(head);
            c.succ = None;
        } else {
            self.order.push(branch.clone());
            self.roots.insert(branch.clone(), commit);
            let c = store.get_mut(commit);
            c.index = index;
            c.pred = None;
            c.succ = None;
        }
        self.heads.insert(branch, commit);

        debug_assert!(self.validate(store, catalog).is_ok());
        Ok(())
    }

    /// Records a resolved merge edge. Kept here so every cross-link in
    /// the DAG is written by the collection.
    pub(crate) fn set_merge_from(
        &mut self,
        store: &mut CommitStore,
        dest: CommitId,
        source: CommitId,
    ) {
        store.get_mut(dest).merge_from = Some(source);
    }

    /// Checks index density, strict increase along chains and linkage
    /// symmetry. Used by tests and debug assertions after mutations.
    pub(crate) fn validate(
        &self,
        store: &CommitStore,
        catalog: &FileCatalog,
    ) -> Result<(), StreamError> {
        let mut seen_indices = Vec::new();

        for branch in &self.order {
            let root = self.roots[branch];
            let head = self.heads[branch];

            if branch != MAIN {
                if let Some(bp) = store.get(root).pred() {
                    if !store.get(bp).branch_roots().contains(&root) {
                        return Err(StreamError::BrokenLinkage {
                            detail: format!(
                                "root of {branch} missing from branchpoint's branches set",
                            ),
                        });
                    }
                }
            }

            let mut cur = root;
            let mut prev_index = None;
            loop {
                let commit = store.get(cur);
                if commit.branch(catalog) != Some(branch.as_str()) {
                    return Err(StreamError::BrokenLinkage {
                        detail: format!("commit {} off its branch {branch}", commit.id()),
                    });
                }
                if let Some(prev_index) = prev_index {
                    if commit.index() <= prev_index {
                        return Err(StreamError::BrokenLinkage {
                            detail: format!("index not increasing at {}", commit.id()),
                        });
                    }
                }
                prev_index = Some(commit.index());
                seen_indices.push(commit.index());

                match commit.succ() {
                    Some(next) => {
                        if store.get(next).pred() != Some(cur) {
                            return Err(StreamError::BrokenLinkage {
                                detail: format!("asymmetric link at {}", commit.id()),
                            });
                        }
                        cur = next;
                    }
                    None => break,
                }
            }
            if cur != head {
                return Err(StreamError::BrokenLinkage {
                    detail: format!("chain of {branch} does not end at its head"),
                });
            }
        }

        seen_indices.sort_unstable();
        seen_indices.dedup();
        if seen_indices.len() != self.next_index as usize
            || seen_indices
                .iter()
                .enumerate()
                .any(|(i, &index)| i as u32 != index)
        {
            return Err(StreamError::BrokenLinkage {
                detail: "indices not dense".into(),
            });
        }

        Ok(())
    }
}
