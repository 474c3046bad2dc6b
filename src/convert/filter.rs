use super::commits::{CommitId, CommitStore};
use super::files::FileCatalog;
use super::state::{RepositoryState, StateError};
use crate::FHashSet;

/// The fussy time-span check flags commits whose members spread wider
/// than this.
const FUSSY_SPAN_SECS: i64 = 60;

pub(crate) struct FilterOutcome {
    pub(crate) ordering: Vec<CommitId>,
    /// Changes-only replay of the head-only slices, consumed by the
    /// overlay synthesis at the end of the pipeline.
    pub(crate) head_only_state: RepositoryState,
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum Class {
    Keep,
    HeadOnly,
    Drop,
}

/// Drops revisions on excluded (or unnamed) branches, peels head-only
/// files off into the shadow state and drops commits left empty.
pub(crate) fn filter_commits(
    store: &mut CommitStore,
    catalog: &FileCatalog,
    ordering: Vec<CommitId>,
    excluded_branches: &FHashSet<String>,
) -> Result<FilterOutcome, StateError> {
    let mut head_only_state = RepositoryState::changes_only();
    let mut out = Vec::with_capacity(ordering.len());

    for cid in ordering {
        let commit = store.get(cid);

        let classes: Vec<Class> = commit
            .revs()
            .iter()
            .map(|fr| match fr.branch(catalog) {
                None => Class::Drop,
                Some(branch) if excluded_branches.contains(branch) => Class::Drop,
                Some(_) if catalog.get(fr.file).is_head_only() => Class::HeadOnly,
                Some(_) => Class::Keep,
            })
            .collect();

        if classes.iter().all(|&class| class == Class::Keep) {
            out.push(cid);
            continue;
        }

        let revs = std::mem::take(store.get_mut(cid).revs_mut());
        for (fr, class) in revs.into_iter().zip(classes) {
            match class {
                Class::Keep => store.get_mut(cid).revs_mut().push(fr),
                Class::HeadOnly => head_only_state.apply_file_rev(catalog, &fr)?,
                Class::Drop => {}
            }
        }

        if store.get(cid).is_empty() {
            tracing::debug!("commit {} dropped by branch/file filters", store.get(cid).id());
        } else {
            out.push(cid);
        }
    }

    Ok(FilterOutcome {
        ordering: out,
        head_only_state,
    })
}

/// Records non-fatal diagnostics on each commit and writes the
/// file→commit back-references the resolvers navigate by.
pub(crate) fn verify_commits(
    store: &mut CommitStore,
    catalog: &mut FileCatalog,
    ordering: &[CommitId],
    fussy: bool,
) {
    for &cid in ordering {
        let commit = store.get(cid);
        let mut errors = Vec::new();

        let mut authors: Vec<&str> = Vec::new();
        for fr in commit.revs() {
            if !authors.contains(&fr.author.as_str()) {
                authors.push(&fr.author);
            }
        }
        if authors.len() > 1 {
            errors.push(format!("multiple authors: {}", authors.join(", ")));
        }

        if fussy {
            let first = commit.revs().iter().map(|fr| fr.time).min().unwrap();
            let last = commit.revs().iter().map(|fr| fr.time).max().unwrap();
            if (last - first).num_seconds() > FUSSY_SPAN_SECS {
                errors.push(format!(
                    "member times span {} seconds",
                    (last - first).num_seconds(),
                ));
            }
        }

        let mut branches: Vec<&str> = Vec::new();
        for fr in commit.revs() {
            if let Some(branch) = fr.branch(catalog) {
                if !branches.contains(&branch) {
                    branches.push(branch);
                }
            }
        }
        if branches.len() > 1 {
            errors.push(format!("multiple branches: {}", branches.join(", ")));
        }

        let mut merge_sources: Vec<&str> = Vec::new();
        for fr in commit.revs() {
            let Some(ref mergepoint) = fr.mergepoint else {
                continue;
            };
            if let Some(branch) = catalog.get(fr.file).branch_of(mergepoint) {
                if !merge_sources.contains(&branch) {
                    merge_sources.push(branch);
                }
            }
        }
        if merge_sources.len() > 1 {
            errors.push(format!(
                "multiple branches merged from: {}",
                merge_sources.join(", "),
            ));
        }

        for error in errors {
            store.get_mut(cid).add_error(error);
        }

        let rev_links: Vec<_> = store
            .get(cid)
            .revs()
            .iter()
            .map(|fr| (fr.file, fr.rev.clone()))
            .collect();
        for (file, rev) in rev_links {
            catalog.get_mut(file).set_commit(rev, cid);
        }
    }
}

/// Logs every recorded diagnostic once, after verification.
pub(crate) fn report_verification(store: &CommitStore, ordering: &[CommitId]) {
    let mut total = 0_usize;
    for &cid in ordering {
        let commit = store.get(cid);
        for error in commit.errors() {
            tracing::warn!("commit {}: {error}", commit.id());
            total += 1;
        }
    }
    if total != 0 {
        tracing::info!("{total} verification finding(s)");
    }
}

/// Post-split sanity: every member of every commit lies on the commit's
/// branch. Used by tests and the pipeline's debug checks.
pub(crate) fn check_branch_purity(
    store: &CommitStore,
    catalog: &FileCatalog,
    ordering: &[CommitId],
) -> bool {
    ordering.iter().all(|&cid| {
        let commit = store.get(cid);
        let branch = commit.branch(catalog);
        commit.revs().iter().all(|fr| fr.branch(catalog) == branch)
    })
}
