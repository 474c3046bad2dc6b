use super::commits::{CommitId, CommitStore};
use super::files::FileCatalog;
use super::streams::{BranchStreams, StreamError};
use super::MAIN;
use crate::{FHashMap, FHashSet};

/// Produces the emission order: MAIN's root first, then repeatedly the
/// eligible branch head with the earliest commit time, fast-forwarding
/// merge-source branches so that every commit is preceded by its
/// predecessor, its branchpoint and its merge source.
pub(crate) fn playback_order(
    store: &mut CommitStore,
    catalog: &FileCatalog,
    streams: &BranchStreams,
) -> Result<Vec<CommitId>, StreamError> {
    let branches: Vec<String> = streams.branches().to_vec();
    let mut heads: FHashMap<String, Option<CommitId>> = branches
        .iter()
        .map(|branch| (branch.clone(), streams.root(branch)))
        .collect();
    let total: usize = branches
        .iter()
        .map(|branch| streams.chain(store, branch).len())
        .sum();

    let mut emitted: FHashSet<CommitId> = FHashSet::default();
    let mut out = Vec::with_capacity(total);

    if let Some(root) = heads.get(MAIN).copied().flatten() {
        let mut visiting = FHashSet::default();
        emit_through(
            store, catalog, &mut heads, &mut emitted, &mut out, MAIN, root, &mut visiting,
        )?;
    }

    while out.len() < total {
        // earliest eligible head; ties go to the older branch
        let mut picked: Option<(&str, CommitId)> = None;
        for branch in &branches {
            let Some(head) = heads[branch.as_str()] else {
                continue;
            };
            match store.get(head).pred() {
                Some(pred) if !emitted.contains(&pred) => continue,
                _ => {}
            }
            let better = match picked {
                None => true,
                Some((_, best)) => store.get(head).time() < store.get(best).time(),
            };
            if better {
                picked = Some((branch.as_str(), head));
            }
        }

        let Some((branch, head)) = picked else {
            return Err(StreamError::BrokenLinkage {
                detail: "playback stuck: no branch head is eligible".into(),
            });
        };
        let branch = branch.to_owned();

        let mut visiting = FHashSet::default();
        emit_through(
            store, catalog, &mut heads, &mut emitted, &mut out, &branch, head, &mut visiting,
        )?;
    }

    Ok(out)
}

/// Emits commits from `branch`'s current head up to and including
/// `upto`, recursively pulling in merge sources first. A merge cycle
/// between branches cannot be serialized; the later edge is dropped
/// with a warning.
#[allow(clippy::too_many_arguments)]
fn emit_through(
    store: &mut CommitStore,
    catalog: &FileCatalog,
    heads: &mut FHashMap<String, Option<CommitId>>,
    emitted: &mut FHashSet<CommitId>,
    out: &mut Vec<CommitId>,
    branch: &str,
    upto: CommitId,
    visiting: &mut FHashSet<String>,
) -> Result<(), StreamError> {
    visiting.insert(branch.to_owned());

    loop {
        let Some(head) = heads.get(branch).copied().flatten() else {
            return Err(StreamError::BrokenLinkage {
                detail: format!("fast-forward of {branch} ran past its head"),
            });
        };

        if let Some(source) = store.get(head).merge_from() {
            if !emitted.contains(&source) {
                let source_branch = store
                    .get(source)
                    .branch(catalog)
                    .map(str::to_owned)
                    .ok_or_else(|| StreamError::CommitWithoutBranch {
                        commit: store.get(source).id().into(),
                    })?;
                if visiting.contains(&source_branch) {
                    tracing::warn!(
                        "merge cycle between {branch} and {source_branch}: \
                         dropping merge edge into {}",
                        store.get(head).id(),
                    );
                    store.get_mut(head).merge_from = None;
                } else {
                    emit_through(
                        store,
                        catalog,
                        heads,
                        emitted,
                        out,
                        &source_branch,
                        source,
                        visiting,
                    )?;
                }
            }
        }

        emitted.insert(head);
        out.push(head);
        heads.insert(branch.to_owned(), store.get(head).succ());

        if head == upto {
            break;
        }
    }

    visiting.remove(branch);
    Ok(())
}

/// When a commit is yielded, its predecessor, its branchpoint and its
/// merge source have been yielded already.
#[cfg(test)]
pub(crate) fn check_prefix_closure(store: &CommitStore, order: &[CommitId]) -> bool {
    let mut emitted = FHashSet::default();
    for &cid in order {
        let commit = store.get(cid);
        if let Some(pred) = commit.pred() {
            if !emitted.contains(&pred) {
                return false;
            }
        }
        if let Some(source) = commit.merge_from() {
            if !emitted.contains(&source) {
                return false;
            }
        }
        emitted.insert(cid);
    }
    true
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;

    use super::super::commits::{Commit, CommitId, CommitStore};
    use super::super::files::{FileCatalog, FileId, FileRevision};
    use super::super::filter::verify_commits;
    use super::super::merge::resolve_merges;
    use super::super::revision::RevisionPool;
    use super::super::streams::BranchStreams;
    use super::{check_prefix_closure, playback_order};
    use crate::FHashMap;

    struct Fixture {
        pool: RevisionPool,
        catalog: FileCatalog,
        store: CommitStore,
        ordering: Vec<CommitId>,
        f1: FileId,
        seq: u32,
    }

    impl Fixture {
        fn new() -> Self {
            let mut catalog = FileCatalog::new();
            let f1 = catalog.add("a.c", false);
            Self {
                pool: RevisionPool::new(),
                catalog,
                store: CommitStore::new(),
                ordering: Vec::new(),
                f1,
                seq: 0,
            }
        }

        fn commit_at(
            &mut self,
            id: &str,
            rev: &str,
            minute: u32,
            mergepoint: Option<&str>,
        ) -> CommitId {
            self.seq += 1;
            let cid = self.store.add(Commit::new(
                id.into(),
                vec![FileRevision {
                    file: self.f1,
                    rev: self.pool.parse(rev).unwrap(),
                    time: chrono::Utc
                        .with_ymd_and_hms(2004, 7, 1, 10, minute, 0)
                        .unwrap(),
                    author: "anna".into(),
                    commit_id: None,
                    mergepoint: mergepoint.map(|mp| self.pool.parse(mp).unwrap()),
                    dead: false,
                    message: String::new(),
                }],
            ));
            self.ordering.push(cid);
            cid
        }

        fn link(&mut self) {
            let ordering = self.ordering.clone();
            verify_commits(&mut self.store, &mut self.catalog, &ordering, false);
        }
    }

    #[test]
    fn test_branchpoint_gates_branch_emission() {
        let mut fx = Fixture::new();
        fx.catalog
            .get_mut(fx.f1)
            .add_branch("devel", fx.pool.parse("1.2.0.4").unwrap())
            .unwrap();

        // the branch commit's clock runs ahead of its branchpoint
        let c0 = fx.commit_at("c0", "1.1", 10, None);
        let c1 = fx.commit_at("c1", "1.2", 20, None);
        let b1 = fx.commit_at("b1", "1.2.4.1", 15, None);
        fx.link();

        let mut branchpoints = FHashMap::default();
        branchpoints.insert("devel".to_string(), c1);
        let ordering = vec![c0, c1, b1];
        let streams =
            BranchStreams::build(&mut fx.store, &fx.catalog, &ordering, &branchpoints).unwrap();

        let order = playback_order(&mut fx.store, &fx.catalog, &streams).unwrap();
        assert_eq!(order, [c0, c1, b1]);
        assert!(check_prefix_closure(&fx.store, &order));
    }

    #[test]
    fn test_merge_source_fast_forward() {
        let mut fx = Fixture::new();
        fx.catalog
            .get_mut(fx.f1)
            .add_branch("devel", fx.pool.parse("1.1.0.2").unwrap())
            .unwrap();

        let c0 = fx.commit_at("c0", "1.1", 0, None);
        let b1 = fx.commit_at("b1", "1.1.2.1", 30, None);
        let b2 = fx.commit_at("b2", "1.1.2.2", 40, None);
        let m1 = fx.commit_at("m1", "1.2", 10, Some("1.1.2.2"));
        fx.link();

        let mut branchpoints = FHashMap::default();
        branchpoints.insert("devel".to_string(), c0);
        let ordering = vec![c0, b1, b2, m1];
        let mut streams =
            BranchStreams::build(&mut fx.store, &fx.catalog, &ordering, &branchpoints).unwrap();
        resolve_merges(&mut fx.store, &fx.catalog, &mut streams).unwrap();

        // m1 is earliest after c0 but needs b1 and b2 emitted first
        let order = playback_order(&mut fx.store, &fx.catalog, &streams).unwrap();
        assert_eq!(order, [c0, b1, b2, m1]);
        assert!(check_prefix_closure(&fx.store, &order));
    }

    #[test]
    fn test_time_interleaving() {
        let mut fx = Fixture::new();
        fx.catalog
            .get_mut(fx.f1)
            .add_branch("devel", fx.pool.parse("1.1.0.2").unwrap())
            .unwrap();

        let c0 = fx.commit_at("c0", "1.1", 0, None);
        let b1 = fx.commit_at("b1", "1.1.2.1", 5, None);
        let c1 = fx.commit_at("c1", "1.2", 10, None);
        let b2 = fx.commit_at("b2", "1.1.2.2", 15, None);
        let c2 = fx.commit_at("c2", "1.3", 20, None);
        fx.link();

        let mut branchpoints = FHashMap::default();
        branchpoints.insert("devel".to_string(), c0);
        let ordering = vec![c0, b1, c1, b2, c2];
        let streams =
            BranchStreams::build(&mut fx.store, &fx.catalog, &ordering, &branchpoints).unwrap();

        let order = playback_order(&mut fx.store, &fx.catalog, &streams).unwrap();
        assert_eq!(order, [c0, b1, c1, b2, c2]);
        assert!(check_prefix_closure(&fx.store, &order));
    }
}
