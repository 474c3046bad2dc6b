use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};

use crate::convert::{ContentFetcher, ContentRequest, FileContent};

#[derive(Debug)]
pub(crate) enum FetchError {
    Spawn {
        error: std::io::Error,
    },
    Process {
        path: String,
        rev: String,
        detail: String,
    },
    Cache {
        path: PathBuf,
        error: std::io::Error,
    },
    WorkersGone,
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spawn { error } => write!(f, "failed to spawn cvs: {error}"),
            Self::Process { path, rev, detail } => {
                write!(f, "cvs checkout of {path} r{rev} failed: {detail}")
            }
            Self::Cache { path, error } => {
                write!(f, "content cache access to {path:?} failed: {error}")
            }
            Self::WorkersGone => write!(f, "content worker threads are gone"),
        }
    }
}

pub(crate) fn normalize_line_endings(data: Vec<u8>) -> Vec<u8> {
    if !data.contains(&b'\r') {
        return data;
    }
    let mut out = Vec::with_capacity(data.len());
    let mut iter = data.iter().peekable();
    while let Some(&byte) = iter.next() {
        if byte == b'\r' && iter.peek() == Some(&&b'\n') {
            continue;
        }
        out.push(byte);
    }
    out
}

/// Per-(file, revision) blob store under a cache root. Writes go to a
/// temp file first and land with an atomic rename.
pub(crate) struct ContentCache {
    root: PathBuf,
}

impl ContentCache {
    pub(crate) fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn blob_path(&self, path: &str, rev: &str) -> PathBuf {
        self.root.join(path).join(rev)
    }

    pub(crate) fn load(&self, path: &str, rev: &str) -> Result<Option<Vec<u8>>, FetchError> {
        let blob_path = self.blob_path(path, rev);
        match std::fs::read(&blob_path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FetchError::Cache {
                path: blob_path,
                error: e,
            }),
        }
    }

    pub(crate) fn store(&self, path: &str, rev: &str, data: &[u8]) -> Result<(), FetchError> {
        let blob_path = self.blob_path(path, rev);
        let dir = blob_path.parent().expect("blob path has a parent");
        let to_cache_err = |path: &Path, error: std::io::Error| FetchError::Cache {
            path: path.to_path_buf(),
            error,
        };

        std::fs::create_dir_all(dir).map_err(|e| to_cache_err(dir, e))?;

        let tmp_path = blob_path.with_extension("tmp");
        let mut tmp = std::fs::File::create(&tmp_path).map_err(|e| to_cache_err(&tmp_path, e))?;
        tmp.write_all(data).map_err(|e| to_cache_err(&tmp_path, e))?;
        drop(tmp);
        std::fs::rename(&tmp_path, &blob_path).map_err(|e| to_cache_err(&blob_path, e))
    }
}

struct Job {
    seq: usize,
    request: ContentRequest,
    reply: mpsc::Sender<(usize, Result<Vec<u8>, FetchError>)>,
}

/// Fetches file contents by running `cvs checkout -p`, fanned out over
/// a bounded pool of worker threads with an on-disk blob cache shared
/// between runs.
pub(crate) struct CvsContentFetcher {
    job_tx: Option<mpsc::Sender<Job>>,
    workers: Vec<std::thread::JoinHandle<()>>,
    normalize: bool,
}

impl CvsContentFetcher {
    pub(crate) fn new(
        cvs_root: String,
        module: String,
        cache_root: PathBuf,
        processes: usize,
        normalize: bool,
    ) -> Self {
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let job_rx = Arc::new(Mutex::new(job_rx));

        let mut workers = Vec::with_capacity(processes);
        for n in 0..processes.max(1) {
            let job_rx = Arc::clone(&job_rx);
            let cvs_root = cvs_root.clone();
            let module = module.clone();
            let cache = ContentCache::new(cache_root.clone());
            let worker = std::thread::Builder::new()
                .name(format!("cvs fetch {n}"))
                .spawn(move || loop {
                    let job = match job_rx.lock().expect("job queue poisoned").recv() {
                        Ok(job) => job,
                        Err(_) => break,
                    };
                    let result = fetch_one(&cvs_root, &module, &cache, &job.request);
                    if job.reply.send((job.seq, result)).is_err() {
                        // the requesting side bailed out
                        break;
                    }
                })
                .expect("failed to spawn thread");
            workers.push(worker);
        }

        Self {
            job_tx: Some(job_tx),
            workers,
            normalize,
        }
    }
}

fn fetch_one(
    cvs_root: &str,
    module: &str,
    cache: &ContentCache,
    request: &ContentRequest,
) -> Result<Vec<u8>, FetchError> {
    if let Some(data) = cache.load(&request.path, &request.rev)? {
        return Ok(data);
    }

    let module_path = if module.is_empty() {
        request.path.clone()
    } else {
        format!("{module}/{}", request.path)
    };
    let output = std::process::Command::new("cvs")
        .arg("-d")
        .arg(cvs_root)
        .arg("-q")
        .arg("checkout")
        .arg("-p")
        .arg("-r")
        .arg(&request.rev)
        .arg(&module_path)
        .stdin(std::process::Stdio::null())
        .output()
        .map_err(|e| FetchError::Spawn { error: e })?;

    if !output.status.success() {
        return Err(FetchError::Process {
            path: request.path.clone(),
            rev: request.rev.clone(),
            detail: format!(
                "{} ({})",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim(),
            ),
        });
    }

    cache.store(&request.path, &request.rev, &output.stdout)?;
    Ok(output.stdout)
}

impl ContentFetcher for CvsContentFetcher {
    fn fetch_commit(
        &mut self,
        requests: &[ContentRequest],
    ) -> Result<Vec<FileContent>, FetchError> {
        let job_tx = self.job_tx.as_ref().ok_or(FetchError::WorkersGone)?;
        let (reply_tx, reply_rx) = mpsc::channel();

        for (seq, request) in requests.iter().enumerate() {
            job_tx
                .send(Job {
                    seq,
                    request: ContentRequest {
                        path: request.path.clone(),
                        rev: request.rev.clone(),
                        binary: request.binary,
                    },
                    reply: reply_tx.clone(),
                })
                .map_err(|_| FetchError::WorkersGone)?;
        }
        drop(reply_tx);

        let mut slots: Vec<Option<FileContent>> = Vec::new();
        slots.resize_with(requests.len(), || None);
        for _ in 0..requests.len() {
            let (seq, result) = reply_rx.recv().map_err(|_| FetchError::WorkersGone)?;
            let mut data = result?;
            let binary = requests[seq].binary;
            if self.normalize && !binary {
                data = normalize_line_endings(data);
            }
            slots[seq] = Some(FileContent { data, binary });
        }

        Ok(slots
            .into_iter()
            .map(|slot| slot.expect("every request slot was filled"))
            .collect())
    }
}

impl Drop for CvsContentFetcher {
    fn drop(&mut self) {
        self.job_tx = None;
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{normalize_line_endings, ContentCache};

    #[test]
    fn test_normalize_line_endings() {
        assert_eq!(
            normalize_line_endings(b"a\r\nb\r\nc".to_vec()),
            b"a\nb\nc".to_vec(),
        );
        assert_eq!(normalize_line_endings(b"a\nb".to_vec()), b"a\nb".to_vec());
        // a lone carriage return is content, not a line ending
        assert_eq!(normalize_line_endings(b"a\rb".to_vec()), b"a\rb".to_vec());
    }

    #[test]
    fn test_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ContentCache::new(dir.path().to_path_buf());

        assert_eq!(cache.load("src/a.c", "1.2").unwrap(), None);
        cache.store("src/a.c", "1.2", b"int main;\n").unwrap();
        assert_eq!(
            cache.load("src/a.c", "1.2").unwrap(),
            Some(b"int main;\n".to_vec()),
        );
        assert_eq!(cache.load("src/a.c", "1.3").unwrap(), None);

        // no stray temp files after a store
        let entries: Vec<_> = std::fs::read_dir(dir.path().join("src/a.c"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(entries, ["1.2"]);
    }
}
