use super::commits::{Commit, CommitId, CommitStore};
use super::files::{FileCatalog, FileRevision};
use crate::FHashMap;

/// Two file revisions with the same message belong to the same change
/// only if they were committed within this window of each other.
const GROUP_GAP_SECS: i64 = 10;

fn strip_advertising_lines(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    for line in message.lines() {
        if line.contains("March Hare Software")
            || line.trim_start().starts_with("Upgrade to CVS Suite")
        {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line);
    }
    while out.ends_with('\n') {
        out.pop();
    }
    out
}

/// Groups parsed file revisions into commits: by CVSNT commitid when
/// present, otherwise by message with the temporal-gap heuristic.
/// "initially added on branch" placeholder revisions produce no commit;
/// they only annotate the file's origin branch.
pub(crate) fn aggregate(
    store: &mut CommitStore,
    catalog: &mut FileCatalog,
    revs: Vec<FileRevision>,
    strip_advertising: bool,
) -> Vec<CommitId> {
    let added_on_branch = regex::Regex::new(
        r"^file .+ was initially added on branch (\S+?)\.?$",
    )
    .unwrap();

    let mut by_commitid: FHashMap<String, Vec<FileRevision>> = FHashMap::default();
    let mut by_message: FHashMap<String, Vec<FileRevision>> = FHashMap::default();

    for mut fr in revs {
        if strip_advertising {
            fr.message = strip_advertising_lines(&fr.message);
        }

        if fr.dead && fr.rev.parts() == [1, 1] {
            if let Some(captures) = added_on_branch.captures(fr.message.trim()) {
                let branch = captures.get(1).unwrap().as_str();
                tracing::debug!(
                    "{}: initially added on branch {branch}",
                    catalog.get(fr.file).name(),
                );
                catalog.get_mut(fr.file).set_branch_added_on(branch.into());
                continue;
            }
        }

        match &fr.commit_id {
            Some(id) => by_commitid.entry(id.clone()).or_default().push(fr),
            None => by_message.entry(fr.message.clone()).or_default().push(fr),
        }
    }

    let mut commits = Vec::new();

    for (id, mut group) in by_commitid {
        group.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.rev.cmp(&b.rev)));
        commits.push((Some(id), group));
    }

    for (_, mut group) in by_message {
        group.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.rev.cmp(&b.rev)));
        let mut current: Vec<FileRevision> = Vec::new();
        for fr in group {
            if let Some(last) = current.last() {
                if (fr.time - last.time).num_seconds() > GROUP_GAP_SECS {
                    commits.push((None, std::mem::take(&mut current)));
                }
            }
            current.push(fr);
        }
        if !current.is_empty() {
            commits.push((None, current));
        }
    }

    commits.sort_by(|(id_a, a), (id_b, b)| {
        let key_a = (a[0].time, &a[0].author, id_a, &a[0].message);
        let key_b = (b[0].time, &b[0].author, id_b, &b[0].message);
        key_a.cmp(&key_b)
    });

    let mut seq_counters: FHashMap<String, u32> = FHashMap::default();
    let mut out = Vec::with_capacity(commits.len());
    for (id, group) in commits {
        let id = id.unwrap_or_else(|| {
            let prefix = format!(
                "{}-{}",
                group[0].time.format("%y%m%d"),
                group[0].author,
            );
            let seq = seq_counters.entry(prefix.clone()).or_insert(0);
            *seq += 1;
            format!("{prefix}-{seq}")
        });
        out.push(store.add(Commit::new(id, group)));
    }

    out
}

/// Replaces each commit spanning several branches with one commit per
/// branch, `<id>-<branch>`, in order of the branches' first appearance.
/// Legacy exports produce these for simultaneous commits.
pub(crate) fn split_multi_branch(
    store: &mut CommitStore,
    catalog: &FileCatalog,
    ordering: Vec<CommitId>,
) -> Vec<CommitId> {
    let mut out = Vec::with_capacity(ordering.len());

    for cid in ordering {
        let commit = store.get(cid);

        let mut branches: Vec<Option<String>> = Vec::new();
        let mut slots = Vec::with_capacity(commit.revs().len());
        for fr in commit.revs() {
            let branch = fr.branch(catalog).map(str::to_owned);
            let slot = match branches.iter().position(|b| *b == branch) {
                Some(slot) => slot,
                None => {
                    branches.push(branch);
                    branches.len() - 1
                }
            };
            slots.push(slot);
        }

        if branches.len() <= 1 {
            out.push(cid);
            continue;
        }

        tracing::warn!(
            "commit {} spans {} branches, splitting",
            commit.id(),
            branches.len(),
        );

        let base_id = commit.id().to_owned();
        let revs = std::mem::take(store.get_mut(cid).revs_mut());
        let mut parts: Vec<Vec<FileRevision>> = branches.iter().map(|_| Vec::new()).collect();
        for (fr, slot) in revs.into_iter().zip(slots) {
            parts[slot].push(fr);
        }

        for (branch, part) in branches.into_iter().zip(parts) {
            let label = branch.as_deref().unwrap_or("unnamed");
            out.push(store.add(Commit::new(format!("{base_id}-{label}"), part)));
        }
    }

    out
}
