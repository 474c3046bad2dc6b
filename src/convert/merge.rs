use super::commits::{CommitId, CommitStore};
use super::files::FileCatalog;
use super::streams::{BranchStreams, StreamError};
use crate::FHashMap;

/// Elects one merge source commit per destination commit from the
/// per-file mergepoint markers, fixing crossed merges by reordering the
/// source branch. Merges from branches that were excluded or never
/// attached to a branchpoint are silently ignored.
pub(crate) fn resolve_merges(
    store: &mut CommitStore,
    catalog: &FileCatalog,
    streams: &mut BranchStreams,
) -> Result<(), StreamError> {
    let branches: Vec<String> = streams.branches().to_vec();

    for branch in branches {
        let mut last_merge_from: FHashMap<String, CommitId> = FHashMap::default();

        for cid in streams.chain(store, &branch) {
            let commit = store.get(cid);

            // the source is the mergepoint-owning commit with the
            // greatest index
            let mut source: Option<CommitId> = None;
            for fr in commit.revs() {
                let Some(ref mergepoint) = fr.mergepoint else {
                    continue;
                };
                let Some(src) = catalog.get(fr.file).commit_of(mergepoint) else {
                    tracing::debug!(
                        "commit {}: mergepoint {mergepoint} of {} has no commit, ignoring",
                        commit.id(),
                        catalog.get(fr.file).name(),
                    );
                    continue;
                };
                if source.is_none_or(|cur| store.get(src).index() > store.get(cur).index()) {
                    source = Some(src);
                }
            }
            let Some(source) = source else {
                continue;
            };

            // merges must come from a branch rooted on this one;
            // anything else is a merge from a parent or an excluded
            // branch and carries no edge
            let Some(source_branch) = store.get(source).branch(catalog) else {
                continue;
            };
            if source_branch == branch {
                continue;
            }
            let source_branch = source_branch.to_owned();
            let Some(source_root) = streams.root(&source_branch) else {
                continue;
            };
            let Some(root_pred) = store.get(source_root).pred() else {
                continue;
            };
            if store.get(root_pred).branch(catalog) != Some(branch.as_str()) {
                continue;
            }

            if let Some(&last) = last_merge_from.get(&source_branch) {
                if store.get(source).index() < store.get(last).index() {
                    let blocked = !store.get(source).branch_roots().is_empty()
                        || !store.get(last).branch_roots().is_empty();
                    if blocked {
                        tracing::warn!(
                            "crossed merge into {} from {} left in place: \
                             a branchpoint blocks reordering",
                            store.get(cid).id(),
                            store.get(source).id(),
                        );
                    } else {
                        tracing::info!(
                            "crossed merge: moving {} after {} on {source_branch}",
                            store.get(source).id(),
                            store.get(last).id(),
                        );
                        streams.move_commit(store, catalog, source, last)?;
                    }
                }
            }

            streams.set_merge_from(store, cid, source);
            last_merge_from.insert(source_branch, source);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;

    use super::super::commits::{Commit, CommitId, CommitStore};
    use super::super::files::{FileCatalog, FileId, FileRevision};
    use super::super::filter::verify_commits;
    use super::super::revision::RevisionPool;
    use super::super::streams::BranchStreams;
    use super::super::MAIN;
    use super::resolve_merges;
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

        fn commit(&mut self, id: &str, rev: &str, mergepoint: Option<&str>) -> CommitId {
            self.seq += 1;
            let cid = self.store.add(Commit::new(
                id.into(),
                vec![FileRevision {
                    file: self.f1,
                    rev: self.pool.parse(rev).unwrap(),
                    time: chrono::Utc.with_ymd_and_hms(2004, 7, 1, 10, 0, 0).unwrap()
                        + chrono::TimeDelta::seconds((self.seq * 60).into()),
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
    fn test_crossed_merges_reorder_source() {
        let mut fx = Fixture::new();
        fx.catalog
            .get_mut(fx.f1)
            .add_branch("devel", fx.pool.parse("1.1.0.2").unwrap())
            .unwrap();

        let c0 = fx.commit("c0", "1.1", None);
        let b1 = fx.commit("b1", "1.1.2.1", None);
        let b2 = fx.commit("b2", "1.1.2.2", None);
        let m1 = fx.commit("m1", "1.2", Some("1.1.2.2"));
        let m2 = fx.commit("m2", "1.3", Some("1.1.2.1"));
        fx.link();

        let mut branchpoints = FHashMap::default();
        branchpoints.insert("devel".to_string(), c0);
        let ordering = fx.ordering.clone();
        let mut streams =
            BranchStreams::build(&mut fx.store, &fx.catalog, &ordering, &branchpoints).unwrap();

        resolve_merges(&mut fx.store, &fx.catalog, &mut streams).unwrap();

        assert_eq!(fx.store.get(m1).merge_from(), Some(b2));
        assert_eq!(fx.store.get(m2).merge_from(), Some(b1));
        assert_eq!(streams.chain(&fx.store, "devel"), [b2, b1]);
        streams.validate(&fx.store, &fx.catalog).unwrap();
    }

    #[test]
    fn test_merge_from_unattached_branch_is_ignored() {
        let mut fx = Fixture::new();
        fx.catalog
            .get_mut(fx.f1)
            .add_branch("devel", fx.pool.parse("1.1.0.2").unwrap())
            .unwrap();

        let _c0 = fx.commit("c0", "1.1", None);
        let b1 = fx.commit("b1", "1.1.2.1", None);
        let _b2 = fx.commit("b2", "1.1.2.2", None);
        let m1 = fx.commit("m1", "1.2", Some("1.1.2.2"));
        let m2 = fx.commit("m2", "1.3", Some("1.1.2.1"));
        fx.link();

        // no branchpoint for devel: its root stays parentless
        let ordering = fx.ordering.clone();
        let mut streams = BranchStreams::build(
            &mut fx.store,
            &fx.catalog,
            &ordering,
            &FHashMap::default(),
        )
        .unwrap();

        resolve_merges(&mut fx.store, &fx.catalog, &mut streams).unwrap();

        assert_eq!(fx.store.get(m1).merge_from(), None);
        assert_eq!(fx.store.get(m2).merge_from(), None);
        assert_eq!(streams.chain(&fx.store, "devel"), [b1, _b2]);
    }

    #[test]
    fn test_branchpoint_blocks_reorder() {
        let mut fx = Fixture::new();
        fx.catalog
            .get_mut(fx.f1)
            .add_branch("devel", fx.pool.parse("1.1.0.2").unwrap())
            .unwrap();
        fx.catalog
            .get_mut(fx.f1)
            .add_branch("nested", fx.pool.parse("1.1.2.1.0.2").unwrap())
            .unwrap();

        let c0 = fx.commit("c0", "1.1", None);
        let b1 = fx.commit("b1", "1.1.2.1", None);
        let b2 = fx.commit("b2", "1.1.2.2", None);
        let n1 = fx.commit("n1", "1.1.2.1.2.1", None);
        let m1 = fx.commit("m1", "1.2", Some("1.1.2.2"));
        let m2 = fx.commit("m2", "1.3", Some("1.1.2.1"));
        fx.link();

        let mut branchpoints = FHashMap::default();
        branchpoints.insert("devel".to_string(), c0);
        branchpoints.insert("nested".to_string(), b1);
        let ordering = fx.ordering.clone();
        let mut streams =
            BranchStreams::build(&mut fx.store, &fx.catalog, &ordering, &branchpoints).unwrap();

        resolve_merges(&mut fx.store, &fx.catalog, &mut streams).unwrap();

        // b1 is the branchpoint of "nested": the crossed merge stays
        assert_eq!(streams.chain(&fx.store, "devel"), [b1, b2]);
        assert_eq!(fx.store.get(m1).merge_from(), Some(b2));
        assert_eq!(fx.store.get(m2).merge_from(), Some(b1));
        assert_eq!(fx.store.get(n1).pred(), Some(b1));
    }
}
