use std::sync::atomic::{AtomicBool, Ordering};

use crate::cvs::log::{LogRecord, ParseError};
use crate::term_out::ProgressPrint;
use crate::{FHashMap, FHashSet};

mod aggregate;
mod commits;
mod files;
mod filter;
mod head_only;
mod merge;
mod move_record;
mod options;
mod playback;
mod resolve;
mod revision;
mod state;
mod streams;

pub(crate) use options::Options;

/// Internal name of the trunk. Renamed to `Options::git_head_name` at
/// emission.
pub(crate) const MAIN: &str = "MAIN";

pub(crate) struct ConvertError;

/// Checked between pipeline stages; a stage that has started runs to
/// completion.
pub(crate) struct CancelToken {
    flag: AtomicBool,
}

impl CancelToken {
    pub(crate) fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
        }
    }

    /// Requests a stop at the next stage boundary. Nothing in the CLI
    /// binary raises this yet; embedders and the tests do.
    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

pub(crate) struct Signature {
    pub(crate) name: String,
    pub(crate) email: String,
}

/// Resolves CVS author names into git signatures and renders tag
/// messages.
pub(crate) trait MetaMaker {
    fn author_signature(&self, cvs_author: &str) -> Result<Signature, String>;
    fn tag_message(&self, git_name: &str, cvs_name: &str) -> Result<String, String>;
}

pub(crate) struct ContentRequest {
    pub(crate) path: String,
    pub(crate) rev: String,
    pub(crate) binary: bool,
}

pub(crate) struct FileContent {
    pub(crate) data: Vec<u8>,
    pub(crate) binary: bool,
}

/// Fetches file bytes per (path, revision); one call per commit, the
/// results come back in request order.
pub(crate) trait ContentFetcher {
    fn fetch_commit(
        &mut self,
        requests: &[ContentRequest],
    ) -> Result<Vec<FileContent>, crate::cvs::content::FetchError>;
}

pub(crate) enum FileOp {
    Modify {
        mode: u32,
        path: String,
        content: Vec<u8>,
    },
    Delete {
        path: String,
    },
}

/// Streams the finished DAG to the target tool.
pub(crate) trait Emitter {
    #[allow(clippy::too_many_arguments)]
    fn commit(
        &mut self,
        branch: &str,
        mark: u32,
        author: &Signature,
        time: i64,
        message: &str,
        from: Option<u32>,
        merge: Option<u32>,
        ops: &[FileOp],
    ) -> Result<(), std::io::Error>;

    fn tag(
        &mut self,
        name: &str,
        commit_mark: u32,
        tagger: &Signature,
        time: i64,
        message: &str,
    ) -> Result<(), std::io::Error>;

    fn finish(&mut self) -> Result<(), std::io::Error>;
}

struct Ingested {
    catalog: files::FileCatalog,
    revs: Vec<files::FileRevision>,
    excluded_branches: FHashSet<String>,
    tag_names: Vec<String>,
    branch_names: Vec<String>,
}

/// Runs the whole pipeline: ingest, aggregate, split, filter, verify,
/// resolve branches and tags, build streams, resolve merges, synthesize
/// head-only overlays, and emit in playback order.
pub(crate) fn convert(
    progress: &ProgressPrint,
    options: &Options,
    records: impl Iterator<Item = Result<LogRecord, ParseError>>,
    meta: &dyn MetaMaker,
    fetcher: &mut dyn ContentFetcher,
    emitter: &mut dyn Emitter,
    cancel: &CancelToken,
) -> Result<(), ConvertError> {
    let check_cancel = || {
        if cancel.is_cancelled() {
            tracing::error!("conversion cancelled");
            Err(ConvertError)
        } else {
            Ok(())
        }
    };

    progress.set_progress("reading cvs log".into());
    let Ingested {
        mut catalog,
        revs,
        excluded_branches,
        tag_names,
        branch_names,
    } = ingest(options, records)?;
    tracing::info!(
        "{} file(s), {} revision(s), {} tag(s), {} branch(es), {} excluded branch(es)",
        catalog.len(),
        revs.len(),
        tag_names.len(),
        branch_names.len(),
        excluded_branches.len(),
    );
    check_cancel()?;

    progress.set_progress("grouping commits".into());
    let mut store = commits::CommitStore::new();
    let ordering = aggregate::aggregate(&mut store, &mut catalog, revs, options.strip_advertising);
    let ordering = aggregate::split_multi_branch(&mut store, &catalog, ordering);
    tracing::info!("{} commit(s) after aggregation", ordering.len());
    check_cancel()?;

    progress.set_progress("filtering commits".into());
    let filter::FilterOutcome {
        mut ordering,
        head_only_state,
    } = filter::filter_commits(&mut store, &catalog, ordering, &excluded_branches).map_err(
        |e| {
            tracing::error!("head-only replay failed: {e}");
            ConvertError
        },
    )?;
    filter::verify_commits(&mut store, &mut catalog, &ordering, options.fussy_verify);
    filter::report_verification(&store, &ordering);
    check_cancel()?;

    let resolve_opts = resolve::ResolveOptions {
        partial_threshold: options.partial_tag_threshold,
        continue_on_error: options.continue_on_error,
        no_reorder: options.no_reorder,
    };

    progress.set_progress("resolving branches".into());
    let mut branch_resolution = resolve::resolve_labels(
        &mut store,
        &mut catalog,
        &mut ordering,
        &branch_names,
        &resolve::branch_query(),
        &resolve_opts,
    )
    .map_err(|failure| {
        tracing::error!("{failure}");
        ConvertError
    })?;
    check_cancel()?;

    progress.set_progress("resolving tags".into());
    let tag_resolution = resolve::resolve_labels(
        &mut store,
        &mut catalog,
        &mut ordering,
        &tag_names,
        &resolve::tag_query(),
        &resolve_opts,
    )
    .map_err(|failure| {
        tracing::error!("{failure}");
        ConvertError
    })?;
    if !options.branchpoint_rules.is_empty() {
        resolve::manual_branchpoints(
            &store,
            &catalog,
            &mut ordering,
            &branch_names,
            &options.branchpoint_rules,
            &tag_resolution,
            &mut branch_resolution,
        );
    }
    tracing::info!(
        "{} tag(s) and {} branch(es) resolved, {} partial, {} failed",
        tag_resolution.resolved.len(),
        branch_resolution.resolved.len(),
        tag_resolution.partial.len() + branch_resolution.partial.len(),
        tag_resolution.failed.len() + branch_resolution.failed.len(),
    );
    check_cancel()?;

    // the resolved history must replay without revision gaps
    let mut replay = state::RepositoryState::full().strict();
    for &cid in &ordering {
        if let Err(e) = replay.apply(&catalog, store.get(cid)) {
            tracing::error!("post-resolution replay failed: {e}");
            return Err(ConvertError);
        }
    }

    progress.set_progress("building branch streams".into());
    let mut streams =
        streams::BranchStreams::build(&mut store, &catalog, &ordering, &branch_resolution.resolved)
            .map_err(|e| {
                tracing::error!("{e}");
                ConvertError
            })?;
    debug_assert!(filter::check_branch_purity(&store, &catalog, &ordering));

    if options.enable_merges {
        progress.set_progress("resolving merges".into());
        merge::resolve_merges(&mut store, &catalog, &mut streams).map_err(|e| {
            tracing::error!("{e}");
            ConvertError
        })?;
    }
    check_cancel()?;

    progress.set_progress("synthesizing head-only commits".into());
    let overlays =
        head_only::synthesize_head_only(&mut store, &catalog, &mut streams, &head_only_state)
            .map_err(|e| {
                tracing::error!("{e}");
                ConvertError
            })?;
    if !overlays.is_empty() {
        tracing::info!("{} head-only commit(s) synthesized", overlays.len());
    }
    check_cancel()?;

    progress.set_progress("ordering commits for import".into());
    let playback = playback::playback_order(&mut store, &catalog, &streams).map_err(|e| {
        tracing::error!("{e}");
        ConvertError
    })?;
    check_cancel()?;

    emit(
        progress,
        options,
        &store,
        &catalog,
        &playback,
        &tag_resolution,
        meta,
        fetcher,
        emitter,
    )
}

fn ingest(
    options: &Options,
    records: impl Iterator<Item = Result<LogRecord, ParseError>>,
) -> Result<Ingested, ConvertError> {
    let mut pool = revision::RevisionPool::new();
    let mut catalog = files::FileCatalog::new();
    let mut revs = Vec::new();
    let mut excluded_branches = FHashSet::default();
    let mut tag_names = FHashSet::default();
    let mut branch_names = FHashSet::default();

    // `None` while the current file is excluded from the conversion
    let mut current: Option<files::FileId> = None;

    for record in records {
        let record = record.map_err(|e| {
            tracing::error!("cvs log parse error: {e}");
            ConvertError
        })?;

        match record {
            LogRecord::FileHeader { path, binary } => {
                if !options.file_rules.matches(&path) {
                    tracing::debug!("file {path} excluded");
                    current = None;
                    continue;
                }
                let id = catalog.add(&path, binary);
                if options.head_only_rules.matches(&path) {
                    catalog.get_mut(id).set_head_only();
                }
                current = Some(id);
            }
            LogRecord::Symbol {
                name,
                rev,
                is_branch,
            } => {
                let Some(file) = current else {
                    continue;
                };
                let rev = pool.parse(&rev).map_err(|e| {
                    tracing::error!(
                        "{}: symbol \"{name}\": {e}",
                        catalog.get(file).name(),
                    );
                    ConvertError
                })?;
                if is_branch {
                    if !options.branch_rules.matches(&name) {
                        excluded_branches.insert(name);
                        continue;
                    }
                    branch_names.insert(name.clone());
                    if let Err(e) = catalog.get_mut(file).add_branch(&name, rev) {
                        tracing::warn!("{}: {e}", catalog.get(file).name());
                    }
                } else {
                    // tags are kept on file and filtered when resolving
                    if options.tag_rules.matches(&name) {
                        tag_names.insert(name.clone());
                    }
                    if let Err(e) = catalog.get_mut(file).add_tag(&name, rev) {
                        tracing::warn!("{}: {e}", catalog.get(file).name());
                    }
                }
            }
            LogRecord::Revision {
                rev,
                time,
                author,
                commit_id,
                mergepoint,
                dead,
                message,
            } => {
                let Some(file) = current else {
                    continue;
                };
                let rev = pool.parse(&rev).map_err(|e| {
                    tracing::error!("{}: revision \"{rev}\": {e}", catalog.get(file).name());
                    ConvertError
                })?;
                let mergepoint = match mergepoint {
                    Some(raw) => Some(pool.parse(&raw).map_err(|e| {
                        tracing::error!(
                            "{}: mergepoint \"{raw}\": {e}",
                            catalog.get(file).name(),
                        );
                        ConvertError
                    })?),
                    None => None,
                };
                revs.push(files::FileRevision {
                    file,
                    rev,
                    time,
                    author,
                    commit_id,
                    mergepoint,
                    dead,
                    message,
                });
            }
        }
    }

    let mut tag_names: Vec<String> = tag_names.into_iter().collect();
    tag_names.sort();
    let mut branch_names: Vec<String> = branch_names.into_iter().collect();
    branch_names.sort();

    Ok(Ingested {
        catalog,
        revs,
        excluded_branches,
        tag_names,
        branch_names,
    })
}

#[allow(clippy::too_many_arguments)]
fn emit(
    progress: &ProgressPrint,
    options: &Options,
    store: &commits::CommitStore,
    catalog: &files::FileCatalog,
    playback: &[commits::CommitId],
    tags: &resolve::Resolution,
    meta: &dyn MetaMaker,
    fetcher: &mut dyn ContentFetcher,
    emitter: &mut dyn Emitter,
) -> Result<(), ConvertError> {
    let git_branch_name = |branch: &str| {
        let renamed = if branch == MAIN {
            options.git_head_name.clone()
        } else {
            options.rename_branches.rename_or_keep(branch)
        };
        crate::git::legalize_ref_name(&renamed)
    };

    let mut marks: FHashMap<commits::CommitId, u32> = FHashMap::default();

    for (n, &cid) in playback.iter().enumerate() {
        let commit = store.get(cid);
        progress.set_progress(format!(
            "importing commits - {} / {}",
            n + 1,
            playback.len(),
        ));

        let Some(branch) = commit.branch(catalog) else {
            tracing::error!("commit {} has no branch at emission", commit.id());
            return Err(ConvertError);
        };
        let mark = n as u32 + 1;
        marks.insert(cid, mark);

        let author = meta.author_signature(commit.author()).map_err(|e| {
            tracing::error!("commit {}: {e}", commit.id());
            ConvertError
        })?;

        let requests: Vec<ContentRequest> = commit
            .revs()
            .iter()
            .filter(|fr| !fr.dead)
            .map(|fr| ContentRequest {
                path: catalog.get(fr.file).name().to_owned(),
                rev: fr.rev.to_string(),
                binary: catalog.get(fr.file).is_binary(),
            })
            .collect();
        let contents = fetcher.fetch_commit(&requests).map_err(|e| {
            tracing::error!("commit {}: {e}", commit.id());
            ConvertError
        })?;
        if contents.len() != requests.len() {
            tracing::error!(
                "commit {}: fetched {} of {} file(s)",
                commit.id(),
                contents.len(),
                requests.len(),
            );
            return Err(ConvertError);
        }

        let mut ops = Vec::with_capacity(commit.revs().len());
        let mut content_iter = contents.into_iter();
        for fr in commit.revs() {
            let path = catalog.get(fr.file).name().to_owned();
            if fr.dead {
                ops.push(FileOp::Delete { path });
            } else {
                let content = content_iter.next().expect("content count checked above");
                debug_assert_eq!(content.binary, catalog.get(fr.file).is_binary());
                ops.push(FileOp::Modify {
                    mode: 0o100644,
                    path,
                    content: content.data,
                });
            }
        }

        let from = commit.pred().and_then(|pred| marks.get(&pred).copied());
        let merge = commit
            .merge_from()
            .and_then(|source| marks.get(&source).copied());

        emitter
            .commit(
                &git_branch_name(branch),
                mark,
                &author,
                commit.time().timestamp(),
                &commit.message(),
                from,
                merge,
                &ops,
            )
            .map_err(|e| {
                tracing::error!("emitting commit {}: {e}", commit.id());
                ConvertError
            })?;
    }

    progress.set_progress("emitting tags".into());
    let mut resolved_tags: Vec<(&String, &commits::CommitId)> = tags.resolved.iter().collect();
    resolved_tags.sort();
    for (name, cid) in resolved_tags {
        let Some(&mark) = marks.get(cid) else {
            tracing::warn!("tag \"{name}\" points at an unemitted commit, skipped");
            continue;
        };
        let commit = store.get(*cid);
        let git_name = crate::git::legalize_ref_name(&options.rename_tags.rename_or_keep(name));
        let tagger = meta.author_signature(commit.author()).map_err(|e| {
            tracing::error!("tag \"{name}\": {e}");
            ConvertError
        })?;
        let message = meta.tag_message(&git_name, name).map_err(|e| {
            tracing::error!("tag \"{name}\": {e}");
            ConvertError
        })?;
        emitter
            .tag(&git_name, mark, &tagger, commit.time().timestamp(), &message)
            .map_err(|e| {
                tracing::error!("emitting tag \"{name}\": {e}");
                ConvertError
            })?;
    }

    emitter.finish().map_err(|e| {
        tracing::error!("finishing import: {e}");
        ConvertError
    })?;

    tracing::info!(
        "imported {} commit(s) and {} tag(s)",
        playback.len(),
        tags.resolved.len(),
    );
    Ok(())
}
