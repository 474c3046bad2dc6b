use super::commits::{CommitId, CommitStore};
use super::files::{FileCatalog, FileId, FileInfo};
use super::move_record::CommitMoveRecord;
use super::revision::Revision;
use super::state::{RepositoryState, StateError};
use super::MAIN;
use crate::name_rules::RenameRules;
use crate::{FHashMap, FHashSet};

/// Extra reconciliation rounds allowed beyond one per working-list
/// commit; each round displaces revisions or advances the candidate.
const RECONCILE_ROUNDS_SLACK: usize = 64;

/// What distinguishes resolving a tag from resolving a branch to its
/// branchpoint: whether a revision carries the label (candidate
/// detection), the revision the label wants per file (comparison), and
/// which absent files are legitimate.
pub(crate) struct LabelQuery {
    pub(crate) noun: &'static str,
    pub(crate) carries: fn(&FileInfo, &Revision, &str) -> bool,
    pub(crate) revision_for: fn(&FileInfo, &str) -> Option<Revision>,
    pub(crate) missing_exempt: fn(&FileInfo, &str) -> bool,
}

pub(crate) fn tag_query() -> LabelQuery {
    LabelQuery {
        noun: "tag",
        carries: |info, rev, label| info.tags_at(rev).iter().any(|tag| tag == label),
        revision_for: |info, label| info.tag_revision(label).cloned(),
        missing_exempt: |_, _| false,
    }
}

/// A branch's "label revision" is the revision it departs from; files
/// born on the branch itself legitimately do not exist there.
pub(crate) fn branch_query() -> LabelQuery {
    LabelQuery {
        noun: "branch",
        carries: |info, rev, label| info.branchpoint_of(label).as_ref() == Some(rev),
        revision_for: |info, label| info.branchpoint_of(label),
        missing_exempt: |info, label| info.branch_added_on() == label,
    }
}

pub(crate) struct ResolveOptions {
    pub(crate) partial_threshold: usize,
    pub(crate) continue_on_error: bool,
    pub(crate) no_reorder: bool,
}

#[derive(Debug)]
pub(crate) enum ResolveError {
    NoCandidate,
    InconsistentBranchPath { branch: String },
    MissingFile { file: String },
    ExtraFile { file: String },
    PartialLabel { extras: usize },
    Inexact { file: String },
    ReorderDisabled,
    NoConvergence,
    Replay(StateError),
}

impl From<StateError> for ResolveError {
    fn from(e: StateError) -> Self {
        Self::Replay(e)
    }
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoCandidate => write!(f, "no commit carries the label"),
            Self::InconsistentBranchPath { branch } => {
                write!(f, "branch {branch} is entered twice along the label's commits")
            }
            Self::MissingFile { file } => {
                write!(f, "{file} is labelled but neither added nor deleted nearby")
            }
            Self::ExtraFile { file } => {
                write!(f, "{file} is unlabelled and cannot be displaced")
            }
            Self::PartialLabel { extras } => {
                write!(f, "{extras} unlabelled file(s) exceed the partial threshold")
            }
            Self::Inexact { file } => write!(f, "{file} cannot be brought to its labelled revision"),
            Self::ReorderDisabled => write!(f, "resolution needs reordering, which is disabled"),
            Self::NoConvergence => write!(f, "reconciliation did not converge"),
            Self::Replay(e) => write!(f, "replay failed: {e}"),
        }
    }
}

#[derive(Debug)]
pub(crate) struct ResolveFailure {
    pub(crate) label: String,
    pub(crate) error: ResolveError,
}

impl std::fmt::Display for ResolveFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to resolve \"{}\": {}", self.label, self.error)
    }
}

#[derive(Debug)]
pub(crate) struct Resolution {
    pub(crate) resolved: FHashMap<String, CommitId>,
    pub(crate) partial: FHashSet<String>,
    pub(crate) failed: Vec<ResolveFailure>,
}

impl Resolution {
    pub(crate) fn new() -> Self {
        Self {
            resolved: FHashMap::default(),
            partial: FHashSet::default(),
            failed: Vec::new(),
        }
    }
}

/// Resolves every label to exactly one commit, reordering and splitting
/// commits as needed. Failures abort unless `continue_on_error`, which
/// downgrades them to reported skips.
pub(crate) fn resolve_labels(
    store: &mut CommitStore,
    catalog: &mut FileCatalog,
    ordering: &mut Vec<CommitId>,
    labels: &[String],
    query: &LabelQuery,
    opts: &ResolveOptions,
) -> Result<Resolution, ResolveFailure> {
    let mut resolution = Resolution::new();

    for label in labels {
        match resolve_one(store, catalog, ordering, label, query, opts) {
            Ok((commit, partial)) => {
                tracing::debug!(
                    "{} \"{label}\" resolved to commit {}",
                    query.noun,
                    store.get(commit).id(),
                );
                resolution.resolved.insert(label.clone(), commit);
                if partial {
                    resolution.partial.insert(label.clone());
                }
            }
            Err(error) => {
                let failure = ResolveFailure {
                    label: label.clone(),
                    error,
                };
                if opts.continue_on_error {
                    tracing::warn!("{failure}; skipping {}", query.noun);
                    resolution.failed.push(failure);
                } else {
                    return Err(failure);
                }
            }
        }
    }

    Ok(resolution)
}

fn resolve_one(
    store: &mut CommitStore,
    catalog: &mut FileCatalog,
    ordering: &mut Vec<CommitId>,
    label: &str,
    query: &LabelQuery,
    opts: &ResolveOptions,
) -> Result<(CommitId, bool), ResolveError> {
    let contributes = |store: &CommitStore, catalog: &FileCatalog, cid: CommitId| {
        store
            .get(cid)
            .revs()
            .iter()
            .any(|fr| (query.carries)(catalog.get(fr.file), &fr.rev, label))
    };

    let candidates: Vec<CommitId> = ordering
        .iter()
        .copied()
        .filter(|&cid| contributes(store, catalog, cid))
        .collect();
    if candidates.is_empty() {
        return Err(ResolveError::NoCandidate);
    }

    // ordered branch path of the candidates; re-entering a branch means
    // the label cannot denote one tree state
    let mut path: Vec<String> = Vec::new();
    for &cid in &candidates {
        let Some(branch) = store.get(cid).branch(catalog) else {
            continue;
        };
        if path.last().map(String::as_str) != Some(branch) {
            if path.iter().any(|b| b == branch) {
                return Err(ResolveError::InconsistentBranchPath {
                    branch: branch.into(),
                });
            }
            path.push(branch.to_owned());
        }
    }
    let Some(final_branch) = path.last().cloned() else {
        return Err(ResolveError::NoCandidate);
    };

    // only commits on the final branch or its ancestor line matter
    let line = branch_line(catalog, &final_branch);
    let working: Vec<CommitId> = ordering
        .iter()
        .copied()
        .filter(|&cid| {
            store
                .get(cid)
                .branch(catalog)
                .is_some_and(|branch| line.contains(branch))
        })
        .collect();
    let wpos: FHashMap<CommitId, usize> = working
        .iter()
        .enumerate()
        .map(|(pos, &cid)| (cid, pos))
        .collect();

    let last_candidate_pos = candidates
        .iter()
        .filter_map(|cid| wpos.get(cid).copied())
        .max()
        .ok_or(ResolveError::NoCandidate)?;

    // walk, tracking the candidate and recording revisions that ran
    // ahead of the label
    let mut record = CommitMoveRecord::new(working[last_candidate_pos]);
    let mut candidate_pos = None;
    let mut state = RepositoryState::full();
    for (pos, &cid) in working.iter().enumerate() {
        state.apply(catalog, store.get(cid))?;

        if contributes(store, catalog, cid) {
            candidate_pos = Some(pos);
        }

        let commit = store.get(cid);
        let Some(branch) = commit.branch(catalog) else {
            continue;
        };
        let branch_state = state.branch(branch);

        let mut ahead: Vec<FileId> = Vec::new();
        for fr in commit.revs().iter().filter(|fr| !fr.dead) {
            let Some(label_rev) = (query.revision_for)(catalog.get(fr.file), label) else {
                continue;
            };
            let curr = branch_state.and_then(|bs| bs.live_revision_of(fr.file));
            match curr {
                Some(curr) if *curr == label_rev => {}
                Some(curr) if curr.precedes(&label_rev) => {}
                Some(curr) if label_rev.precedes(curr) => ahead.push(fr.file),
                Some(_) => ahead.push(fr.file),
                None => {}
            }
        }

        if !ahead.is_empty() {
            record.record(cid, ahead);
        } else if candidate_pos == Some(pos)
            && exact_match(store, catalog, branch_state, label, query)
        {
            break;
        }

        if pos == last_candidate_pos {
            break;
        }
    }

    let mut fpos = candidate_pos.ok_or(ResolveError::NoCandidate)?;
    record.set_final(working[fpos]);

    // reconcile: replay without the displaced revisions, then fix what
    // still differs, until the candidate state matches the label
    let mut partial = false;
    let mut extras_checked = false;
    let mut converged = false;
    for _ in 0..working.len() + RECONCILE_ROUNDS_SLACK {
        let state = replay_excluding(store, catalog, &working[..=fpos], &record)?;
        let commit_branch = store
            .get(working[fpos])
            .branch(catalog)
            .unwrap_or(MAIN)
            .to_owned();
        let branch_state = state.branch(&commit_branch);

        let mut progressed = false;

        // labelled files first
        for file in catalog.ids() {
            let info = catalog.get(file);
            let Some(label_rev) = (query.revision_for)(info, label) else {
                continue;
            };
            let curr = branch_state.and_then(|bs| bs.live_revision_of(file));

            match curr {
                Some(curr) if *curr == label_rev => {}
                Some(curr) if label_rev.precedes(curr) => {
                    if !expel_beyond(store, &working[..=fpos], &mut record, file, &label_rev) {
                        return Err(ResolveError::Inexact {
                            file: info.name().into(),
                        });
                    }
                    progressed = true;
                }
                Some(curr) if curr.precedes(&label_rev) => {
                    let pos = find_forward_add(store, &working, fpos, file, &label_rev)
                        .ok_or_else(|| ResolveError::MissingFile {
                            file: info.name().into(),
                        })?;
                    fpos = pos;
                    record.set_final(working[fpos]);
                    progressed = true;
                }
                Some(_) => {
                    return Err(ResolveError::Inexact {
                        file: info.name().into(),
                    });
                }
                None => {
                    if (query.missing_exempt)(info, label) {
                        continue;
                    }
                    if labelled_revision_is_dead(store, info, &label_rev) {
                        continue;
                    }
                    if label_passed(store, &working[..=fpos], file, &label_rev)
                        && expel_beyond(store, &working[..=fpos], &mut record, file, &label_rev)
                    {
                        // a later delete hid it; the delete and anything
                        // after it go past the label
                        progressed = true;
                    } else if let Some(pos) =
                        find_forward_add(store, &working, fpos, file, &label_rev)
                    {
                        fpos = pos;
                        record.set_final(working[fpos]);
                        progressed = true;
                    } else {
                        return Err(ResolveError::MissingFile {
                            file: info.name().into(),
                        });
                    }
                }
            }
            if progressed {
                break;
            }
        }
        if progressed {
            continue;
        }

        // then unlabelled files that are live at the candidate
        let mut extras: Vec<FileId> = branch_state
            .map(|bs| {
                bs.live_files()
                    .map(|(file, _)| file)
                    .filter(|&file| (query.revision_for)(catalog.get(file), label).is_none())
                    .collect()
            })
            .unwrap_or_default();
        extras.sort();

        if !extras_checked {
            extras_checked = true;
            if extras.len() > opts.partial_threshold {
                partial = true;
                if !opts.continue_on_error {
                    return Err(ResolveError::PartialLabel {
                        extras: extras.len(),
                    });
                }
                tracing::warn!(
                    "{} \"{label}\" is partial: {} unlabelled file(s)",
                    query.noun,
                    extras.len(),
                );
            }
        }

        for file in extras {
            let backward_add = find_lifetime_start(store, &working[..=fpos], &record, file);
            let forward_delete = find_forward_delete(store, &working, fpos, file);

            match (backward_add, forward_delete) {
                // ties favour the forward delete: the candidate advances
                (Some(add), Some(del)) if del - fpos <= fpos - add => {
                    fpos = del;
                    record.set_final(working[fpos]);
                    progressed = true;
                    // positions shifted under the remaining extras
                    break;
                }
                (None, Some(del)) => {
                    fpos = del;
                    record.set_final(working[fpos]);
                    progressed = true;
                    break;
                }
                (Some(add), _) => {
                    for &cid in &working[add..=fpos] {
                        if store.get(cid).rev_of_file(file).is_some()
                            && !record.contains(cid, file)
                        {
                            record.record(cid, [file]);
                            progressed = true;
                        }
                    }
                }
                (None, None) => {
                    return Err(ResolveError::ExtraFile {
                        file: catalog.get(file).name().into(),
                    });
                }
            }
        }

        if !progressed {
            converged = true;
            break;
        }
    }
    if !converged {
        return Err(ResolveError::NoConvergence);
    }

    if opts.no_reorder && !record.is_empty() {
        return Err(ResolveError::ReorderDisabled);
    }

    let resolved = if record.is_empty() {
        working[fpos]
    } else {
        tracing::debug!(
            "{} \"{label}\": displacing revisions from {} commit(s)",
            query.noun,
            record.len(),
        );
        record.apply(store, catalog, ordering)
    };

    debug_assert!(check_resolution(store, catalog, ordering, label, query, resolved)
        .is_none());
    Ok((resolved, partial))
}

/// The branch names from `branch` up to MAIN, derived from the branch
/// tables of the first file carrying the branch.
fn branch_line(catalog: &FileCatalog, branch: &str) -> FHashSet<String> {
    let mut line = FHashSet::default();
    line.insert(branch.to_owned());
    line.insert(MAIN.to_owned());
    if branch == MAIN {
        return line;
    }

    for file in catalog.ids() {
        let info = catalog.get(file);
        let Some(marker) = info.branch_marker(branch) else {
            continue;
        };
        let mut rev = marker.branchpoint();
        while !rev.is_trunk() {
            match info.branch_of(&rev) {
                Some(parent) => line.insert(parent.to_owned()),
                None => break,
            };
            rev = rev.branchpoint();
        }
        break;
    }
    line
}

fn exact_match(
    store: &CommitStore,
    catalog: &FileCatalog,
    branch_state: Option<&super::state::BranchState>,
    label: &str,
    query: &LabelQuery,
) -> bool {
    catalog.ids().all(|file| {
        let info = catalog.get(file);
        match (query.revision_for)(info, label) {
            Some(label_rev) => match branch_state.and_then(|bs| bs.live_revision_of(file)) {
                Some(curr) => *curr == label_rev,
                None => {
                    (query.missing_exempt)(info, label)
                        || labelled_revision_is_dead(store, info, &label_rev)
                }
            },
            None => true,
        }
    })
}

/// Replays `slice` into a fresh full state, skipping every revision the
/// record displaces; the result is the tree as it will look at the
/// candidate once the record is applied.
fn replay_excluding(
    store: &CommitStore,
    catalog: &FileCatalog,
    slice: &[CommitId],
    record: &CommitMoveRecord,
) -> Result<RepositoryState, StateError> {
    let mut state = RepositoryState::full();
    for &cid in slice {
        for fr in store.get(cid).revs() {
            if !record.contains(cid, fr.file) {
                state.apply_file_rev(catalog, fr)?;
            }
        }
    }
    Ok(state)
}

/// Displace every revision of `file` that lies beyond its labelled
/// revision, deletes included. Returns whether anything new was
/// recorded.
fn expel_beyond(
    store: &CommitStore,
    slice: &[CommitId],
    record: &mut CommitMoveRecord,
    file: FileId,
    label_rev: &Revision,
) -> bool {
    let mut recorded = false;
    for &cid in slice {
        if let Some(fr) = store.get(cid).rev_of_file(file) {
            if label_rev.precedes(&fr.rev) && !record.contains(cid, file) {
                record.record(cid, [file]);
                recorded = true;
            }
        }
    }
    recorded
}

fn labelled_revision_is_dead(store: &CommitStore, info: &FileInfo, label_rev: &Revision) -> bool {
    match info.commit_of(label_rev) {
        Some(cid) => store
            .get(cid)
            .revs()
            .iter()
            .any(|fr| fr.rev == *label_rev && fr.dead),
        // the labelled revision never became a commit (filtered out);
        // absence is the best available answer
        None => true,
    }
}

fn label_passed(
    store: &CommitStore,
    slice: &[CommitId],
    file: FileId,
    label_rev: &Revision,
) -> bool {
    slice.iter().any(|&cid| {
        store
            .get(cid)
            .rev_of_file(file)
            .is_some_and(|fr| fr.rev == *label_rev && !fr.dead)
    })
}

fn find_forward_add(
    store: &CommitStore,
    working: &[CommitId],
    fpos: usize,
    file: FileId,
    label_rev: &Revision,
) -> Option<usize> {
    working[fpos + 1..].iter().position(|&cid| {
        store
            .get(cid)
            .rev_of_file(file)
            .is_some_and(|fr| fr.rev == *label_rev && !fr.dead)
    })
    .map(|offset| fpos + 1 + offset)
}

fn find_forward_delete(
    store: &CommitStore,
    working: &[CommitId],
    fpos: usize,
    file: FileId,
) -> Option<usize> {
    working[fpos + 1..].iter().position(|&cid| {
        store
            .get(cid)
            .rev_of_file(file)
            .is_some_and(|fr| fr.dead)
    })
    .map(|offset| fpos + 1 + offset)
}

/// Position of the add opening the file's current live stretch, ignoring
/// revisions the record already displaces.
fn find_lifetime_start(
    store: &CommitStore,
    slice: &[CommitId],
    record: &CommitMoveRecord,
    file: FileId,
) -> Option<usize> {
    let mut start = None;
    for (pos, &cid) in slice.iter().enumerate() {
        if record.contains(cid, file) {
            continue;
        }
        if let Some(fr) = store.get(cid).rev_of_file(file) {
            if fr.dead {
                start = None;
            } else if start.is_none() {
                start = Some(pos);
            }
        }
    }
    start
}

/// Replays the final list and checks the resolution-correctness
/// property at the resolved commit. Returns the offending file name, or
/// `None` when the label is exact.
pub(crate) fn check_resolution(
    store: &CommitStore,
    catalog: &FileCatalog,
    ordering: &[CommitId],
    label: &str,
    query: &LabelQuery,
    resolved: CommitId,
) -> Option<String> {
    let mut state = RepositoryState::full();
    for &cid in ordering {
        if state.apply(catalog, store.get(cid)).is_err() {
            return Some("<replay failed>".into());
        }
        if cid == resolved {
            break;
        }
    }

    let Some(branch) = store.get(resolved).branch(catalog) else {
        return Some("<commit without branch>".into());
    };
    let branch_state = state.branch(branch);
    for file in catalog.ids() {
        let info = catalog.get(file);
        if let Some(label_rev) = (query.revision_for)(info, label) {
            let live = branch_state.and_then(|bs| bs.live_revision_of(file));
            let intended_dead = labelled_revision_is_dead(store, info, &label_rev);
            let ok = match live {
                Some(curr) => *curr == label_rev,
                None => intended_dead || (query.missing_exempt)(info, label),
            };
            if !ok {
                return Some(info.name().into());
            }
        }
    }
    None
}

/// Branches whose name maps through a branchpoint rule onto an already
/// resolved tag adopt that tag's commit as their branchpoint; commits
/// already sitting on the branch ahead of it are moved behind it.
pub(crate) fn manual_branchpoints(
    store: &CommitStore,
    catalog: &FileCatalog,
    ordering: &mut Vec<CommitId>,
    branch_names: &[String],
    rules: &RenameRules,
    tags: &Resolution,
    branches: &mut Resolution,
) {
    for branch in branch_names {
        let Some(tag_name) = rules.rename(branch) else {
            continue;
        };
        let Some(&commit) = tags.resolved.get(&tag_name) else {
            tracing::warn!(
                "branchpoint rule maps branch \"{branch}\" to unresolved tag \"{tag_name}\"",
            );
            continue;
        };

        tracing::info!(
            "branch \"{branch}\" takes its branchpoint from tag \"{tag_name}\"",
        );
        branches.failed.retain(|failure| failure.label != *branch);
        branches.resolved.insert(branch.clone(), commit);

        let Some(kpos) = ordering.iter().position(|&cid| cid == commit) else {
            continue;
        };
        let strays: Vec<CommitId> = ordering[..kpos]
            .iter()
            .copied()
            .filter(|&cid| store.get(cid).branch(catalog) == Some(branch.as_str()))
            .collect();
        if strays.is_empty() {
            continue;
        }

        ordering.retain(|cid| !strays.contains(cid));
        let mut insert_at = ordering
            .iter()
            .position(|&cid| cid == commit)
            .expect("branchpoint commit vanished from the list")
            + 1;
        for stray in strays {
            ordering.insert(insert_at, stray);
            insert_at += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;

    use super::super::commits::{Commit, CommitId, CommitStore};
    use super::super::files::{FileCatalog, FileId, FileRevision};
    use super::super::filter::verify_commits;
    use super::super::revision::RevisionPool;
    use super::{
        branch_query, check_resolution, manual_branchpoints, resolve_labels, tag_query,
        Resolution, ResolveError, ResolveOptions,
    };
    use crate::name_rules::RenameRules;

    struct Fixture {
        pool: RevisionPool,
        catalog: FileCatalog,
        store: CommitStore,
        ordering: Vec<CommitId>,
        seq: u32,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                pool: RevisionPool::new(),
                catalog: FileCatalog::new(),
                store: CommitStore::new(),
                ordering: Vec::new(),
                seq: 0,
            }
        }

        fn file(&mut self, name: &str) -> FileId {
            self.catalog.add(name, false)
        }

        fn tag(&mut self, file: FileId, tag: &str, rev: &str) {
            let rev = self.pool.parse(rev).unwrap();
            self.catalog.get_mut(file).add_tag(tag, rev).unwrap();
        }

        fn branch(&mut self, file: FileId, branch: &str, marker: &str) {
            let marker = self.pool.parse(marker).unwrap();
            self.catalog.get_mut(file).add_branch(branch, marker).unwrap();
        }

        /// revs: (file, revision, dead)
        fn commit(&mut self, id: &str, revs: &[(FileId, &str, bool)]) -> CommitId {
            self.seq += 1;
            let time = chrono::Utc.with_ymd_and_hms(2004, 7, 1, 10, 0, 0).unwrap()
                + chrono::TimeDelta::seconds((self.seq * 60).into());
            let revs = revs
                .iter()
                .map(|&(file, rev, dead)| FileRevision {
                    file,
                    rev: self.pool.parse(rev).unwrap(),
                    time,
                    author: "anna".into(),
                    commit_id: None,
                    mergepoint: None,
                    dead,
                    message: String::new(),
                })
                .collect();
            let cid = self.store.add(Commit::new(id.into(), revs));
            self.ordering.push(cid);
            cid
        }

        fn link(&mut self) {
            let ordering = self.ordering.clone();
            verify_commits(&mut self.store, &mut self.catalog, &ordering, false);
        }

        fn ids(&self) -> Vec<String> {
            self.ordering
                .iter()
                .map(|&cid| self.store.get(cid).id().to_owned())
                .collect()
        }
    }

    fn opts() -> ResolveOptions {
        ResolveOptions {
            partial_threshold: 10,
            continue_on_error: false,
            no_reorder: false,
        }
    }

    #[test]
    fn test_split_across_commits() {
        let mut fx = Fixture::new();
        let f1 = fx.file("f1");
        let f2 = fx.file("f2");
        fx.tag(f1, "t", "1.2");
        fx.tag(f2, "t", "1.2");

        fx.commit("c0", &[(f1, "1.1", false), (f2, "1.1", false)]);
        fx.commit("c1", &[(f1, "1.2", false)]);
        fx.commit("c2", &[(f1, "1.3", false), (f2, "1.2", false)]);
        fx.link();

        let resolution = resolve_labels(
            &mut fx.store,
            &mut fx.catalog,
            &mut fx.ordering,
            &["t".to_string()],
            &tag_query(),
            &opts(),
        )
        .unwrap();

        assert_eq!(fx.ids(), ["c0", "c1", "c2-1", "c2-2"]);
        let resolved = resolution.resolved["t"];
        assert_eq!(fx.store.get(resolved).id(), "c2-1");
        assert_eq!(fx.store.get(resolved).revs()[0].file, f2);
        assert!(check_resolution(
            &fx.store,
            &fx.catalog,
            &fx.ordering,
            "t",
            &tag_query(),
            resolved,
        )
        .is_none());
    }

    #[test]
    fn test_reorder_with_add_in_middle() {
        let mut fx = Fixture::new();
        let f1 = fx.file("f1");
        let f2 = fx.file("f2");
        let f3 = fx.file("f3");
        fx.tag(f1, "t", "1.1");
        fx.tag(f2, "t", "1.2");

        fx.commit("c0", &[(f1, "1.1", false), (f2, "1.1", false)]);
        fx.commit("c1", &[(f3, "1.1", false)]);
        fx.commit("c2", &[(f2, "1.2", false)]);
        fx.link();

        let resolution = resolve_labels(
            &mut fx.store,
            &mut fx.catalog,
            &mut fx.ordering,
            &["t".to_string()],
            &tag_query(),
            &opts(),
        )
        .unwrap();

        assert_eq!(fx.ids(), ["c0", "c2", "c1"]);
        assert_eq!(fx.store.get(resolution.resolved["t"]).id(), "c2");
    }

    #[test]
    fn test_file_deleted_before_tag() {
        let mut fx = Fixture::new();
        let f1 = fx.file("f1");
        let f2 = fx.file("f2");
        fx.tag(f1, "t", "1.2");

        fx.commit("c0", &[(f1, "1.1", false), (f2, "1.1", false)]);
        fx.commit("c1", &[(f2, "1.2", true)]);
        fx.commit("c2", &[(f1, "1.2", false)]);
        fx.link();

        let resolution = resolve_labels(
            &mut fx.store,
            &mut fx.catalog,
            &mut fx.ordering,
            &["t".to_string()],
            &tag_query(),
            &opts(),
        )
        .unwrap();

        assert_eq!(fx.ids(), ["c0", "c1", "c2"]);
        assert_eq!(fx.store.get(resolution.resolved["t"]).id(), "c2");
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let mut fx = Fixture::new();
        let f1 = fx.file("f1");
        let f2 = fx.file("f2");
        fx.tag(f1, "t", "1.2");
        fx.tag(f2, "t", "1.2");

        fx.commit("c0", &[(f1, "1.1", false), (f2, "1.1", false)]);
        fx.commit("c1", &[(f1, "1.2", false)]);
        fx.commit("c2", &[(f1, "1.3", false), (f2, "1.2", false)]);
        fx.link();

        let first = resolve_labels(
            &mut fx.store,
            &mut fx.catalog,
            &mut fx.ordering,
            &["t".to_string()],
            &tag_query(),
            &opts(),
        )
        .unwrap();
        let order_after_first = fx.ids();

        let second = resolve_labels(
            &mut fx.store,
            &mut fx.catalog,
            &mut fx.ordering,
            &["t".to_string()],
            &tag_query(),
            &opts(),
        )
        .unwrap();

        assert_eq!(fx.ids(), order_after_first);
        assert_eq!(first.resolved["t"], second.resolved["t"]);
    }

    #[test]
    fn test_branch_resolution_with_added_on_branch() {
        let mut fx = Fixture::new();
        let f1 = fx.file("f1");
        let f2 = fx.file("f2");
        fx.branch(f1, "devel", "1.2.0.4");
        fx.branch(f2, "devel", "1.1.0.2");
        fx.catalog.get_mut(f2).set_branch_added_on("devel".into());

        fx.commit("c0", &[(f1, "1.1", false)]);
        fx.commit("c1", &[(f1, "1.2", false)]);
        fx.commit("b1", &[(f2, "1.1.2.1", false)]);
        fx.commit("b2", &[(f1, "1.2.4.1", false)]);
        fx.link();

        let resolution = resolve_labels(
            &mut fx.store,
            &mut fx.catalog,
            &mut fx.ordering,
            &["devel".to_string()],
            &branch_query(),
            &opts(),
        )
        .unwrap();

        // the branchpoint is the trunk commit the branch departs from;
        // f2 is exempt, it was born on the branch
        assert_eq!(fx.store.get(resolution.resolved["devel"]).id(), "c1");
        assert_eq!(fx.ids(), ["c0", "c1", "b1", "b2"]);
    }

    #[test]
    fn test_no_candidate() {
        let mut fx = Fixture::new();
        let f1 = fx.file("f1");
        fx.tag(f1, "t", "1.5");
        fx.commit("c0", &[(f1, "1.1", false)]);
        fx.link();

        let err = resolve_labels(
            &mut fx.store,
            &mut fx.catalog,
            &mut fx.ordering,
            &["t".to_string()],
            &tag_query(),
            &opts(),
        )
        .unwrap_err();
        assert!(matches!(err.error, ResolveError::NoCandidate));

        // with continue_on_error the label is reported and skipped
        let mut continue_opts = opts();
        continue_opts.continue_on_error = true;
        let resolution = resolve_labels(
            &mut fx.store,
            &mut fx.catalog,
            &mut fx.ordering,
            &["t".to_string()],
            &tag_query(),
            &continue_opts,
        )
        .unwrap();
        assert!(resolution.resolved.is_empty());
        assert_eq!(resolution.failed.len(), 1);
    }

    #[test]
    fn test_no_reorder_mode() {
        let mut fx = Fixture::new();
        let f1 = fx.file("f1");
        let f2 = fx.file("f2");
        let f3 = fx.file("f3");
        fx.tag(f1, "t", "1.1");
        fx.tag(f2, "t", "1.2");

        fx.commit("c0", &[(f1, "1.1", false), (f2, "1.1", false)]);
        fx.commit("c1", &[(f3, "1.1", false)]);
        fx.commit("c2", &[(f2, "1.2", false)]);
        fx.link();

        let mut no_reorder_opts = opts();
        no_reorder_opts.no_reorder = true;
        let err = resolve_labels(
            &mut fx.store,
            &mut fx.catalog,
            &mut fx.ordering,
            &["t".to_string()],
            &tag_query(),
            &no_reorder_opts,
        )
        .unwrap_err();
        assert!(matches!(err.error, ResolveError::ReorderDisabled));
        assert_eq!(fx.ids(), ["c0", "c1", "c2"]);
    }

    #[test]
    fn test_partial_threshold() {
        let mut fx = Fixture::new();
        let f1 = fx.file("f1");
        let f2 = fx.file("f2");
        let f3 = fx.file("f3");
        fx.tag(f1, "t", "1.1");

        fx.commit("c0", &[(f2, "1.1", false), (f3, "1.1", false)]);
        fx.commit("c1", &[(f1, "1.1", false)]);
        fx.link();

        let mut strict_opts = opts();
        strict_opts.partial_threshold = 1;
        let err = resolve_labels(
            &mut fx.store,
            &mut fx.catalog,
            &mut fx.ordering,
            &["t".to_string()],
            &tag_query(),
            &strict_opts,
        )
        .unwrap_err();
        assert!(matches!(err.error, ResolveError::PartialLabel { extras: 2 }));
    }

    #[test]
    fn test_manual_branchpoints() {
        let mut fx = Fixture::new();
        let f1 = fx.file("f1");
        fx.tag(f1, "RT_1", "1.2");
        fx.branch(f1, "RB_1", "1.2.0.4");

        fx.commit("c0", &[(f1, "1.1", false)]);
        let stray = fx.commit("b1", &[(f1, "1.2.4.1", false)]);
        let k = fx.commit("c1", &[(f1, "1.2", false)]);
        fx.link();

        let mut tags = Resolution::new();
        tags.resolved.insert("RT_1".to_string(), k);
        let mut branches = Resolution::new();

        let rules = RenameRules::new(&[("^RB_".to_string(), "RT_".to_string())]).unwrap();
        manual_branchpoints(
            &fx.store,
            &fx.catalog,
            &mut fx.ordering,
            &["RB_1".to_string()],
            &rules,
            &tags,
            &mut branches,
        );

        assert_eq!(branches.resolved["RB_1"], k);
        assert_eq!(fx.ids(), ["c0", "c1", "b1"]);
        assert_eq!(fx.ordering[2], stray);
    }
}
