use chrono::{DateTime, Utc};

use super::commits::{Commit, CommitId, CommitStore};
use super::files::{FileCatalog, FileRevision};
use super::state::RepositoryState;
use super::streams::{BranchStreams, StreamError};
use super::MAIN;
use crate::FHashMap;

const HEAD_ONLY_AUTHOR: &str = "cvs2git";
const HEAD_ONLY_MESSAGE: &str = "Add head-only files";

/// Appends one synthetic `headonly-<branch>` commit per branch carrying
/// head-only files: live revisions for the branch's tracked files, dead
/// revisions for files it deleted and for files its parent overlay has
/// that the branch does not. Child overlays merge from their parent's.
///
/// Timestamps are the branch head's commit time (nudged past the parent
/// overlay where needed) so repeated conversions emit identical output.
pub(crate) fn synthesize_head_only(
    store: &mut CommitStore,
    catalog: &FileCatalog,
    streams: &mut BranchStreams,
    head_only_state: &RepositoryState,
) -> Result<Vec<(String, CommitId)>, StreamError> {
    let mut branches: Vec<String> = head_only_state
        .branch_names()
        .map(str::to_owned)
        .collect();
    branches.sort_by_key(|branch| (branch_depth(catalog, branch), branch.clone()));

    let global_latest = streams
        .branches()
        .iter()
        .filter_map(|branch| streams.head(branch))
        .map(|cid| store.get(cid).time())
        .max();

    let mut overlays: FHashMap<String, CommitId> = FHashMap::default();
    let mut out = Vec::new();

    for branch in branches {
        let state = head_only_state
            .branch(&branch)
            .expect("branch vanished from head-only state");

        let parent_overlay = parent_branch(catalog, &branch)
            .and_then(|parent| overlays.get(&parent).copied());

        let head_time = streams.head(&branch).map(|cid| store.get(cid).time());
        let parent_time = parent_overlay.map(|cid| store.get(cid).time());
        let time = pick_time(head_time, parent_time, global_latest);

        let mut tracked: Vec<_> = state.tracked_files().collect();
        tracked.sort_by_key(|&(file, _, live)| (!live, catalog.get(file).name().to_owned()));

        let mut revs: Vec<FileRevision> = tracked
            .iter()
            .map(|&(file, rev, live)| FileRevision {
                file,
                rev: rev.clone(),
                time,
                author: HEAD_ONLY_AUTHOR.into(),
                commit_id: None,
                mergepoint: None,
                dead: !live,
                message: HEAD_ONLY_MESSAGE.into(),
            })
            .collect();

        // the parent overlay brings along files this branch never saw;
        // they must be deleted out of the merge
        if let Some(parent_overlay) = parent_overlay {
            let missing: Vec<FileRevision> = store
                .get(parent_overlay)
                .revs()
                .iter()
                .filter(|fr| !fr.dead)
                .filter(|fr| !tracked.iter().any(|&(file, _, _)| file == fr.file))
                .map(|fr| FileRevision {
                    file: fr.file,
                    rev: fr.rev.clone(),
                    time,
                    author: HEAD_ONLY_AUTHOR.into(),
                    commit_id: None,
                    mergepoint: None,
                    dead: true,
                    message: HEAD_ONLY_MESSAGE.into(),
                })
                .collect();
            revs.extend(missing);
        }

        if revs.is_empty() {
            continue;
        }

        let cid = store.add(Commit::new(format!("headonly-{branch}"), revs));
        streams.append(store, catalog, cid)?;
        if let Some(parent_overlay) = parent_overlay {
            streams.set_merge_from(store, cid, parent_overlay);
        }

        tracing::info!(
            "synthesized {} with {} file(s) on {branch}",
            store.get(cid).id(),
            store.get(cid).revs().len(),
        );
        overlays.insert(branch.clone(), cid);
        out.push((branch, cid));
    }

    Ok(out)
}

fn pick_time(
    head: Option<DateTime<Utc>>,
    parent: Option<DateTime<Utc>>,
    global_latest: Option<DateTime<Utc>>,
) -> DateTime<Utc> {
    let base = head
        .or(parent)
        .or(global_latest)
        .unwrap_or(DateTime::UNIX_EPOCH);
    match parent {
        Some(parent) if parent >= base => parent + chrono::TimeDelta::seconds(1),
        _ => base,
    }
}

fn parent_branch(catalog: &FileCatalog, branch: &str) -> Option<String> {
    if branch == MAIN {
        return None;
    }
    for file in catalog.ids() {
        let info = catalog.get(file);
        if let Some(marker) = info.branch_marker(branch) {
            return info.branch_of(&marker.branchpoint()).map(str::to_owned);
        }
    }
    None
}

fn branch_depth(catalog: &FileCatalog, branch: &str) -> usize {
    let mut depth = 0;
    let mut cur = branch.to_owned();
    while let Some(parent) = parent_branch(catalog, &cur) {
        depth += 1;
        cur = parent;
        if depth > 64 {
            break;
        }
    }
    depth
}
