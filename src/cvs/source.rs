use std::ffi::OsString;
use std::io::{Read as _, Seek as _};
use std::path::PathBuf;

use crate::pipe;

#[derive(Debug)]
pub(crate) enum OpenError {
    MetadataFetchError {
        path: PathBuf,
        error: std::io::Error,
    },
    FileOpenError {
        path: PathBuf,
        error: std::io::Error,
    },
    FileReadError {
        path: PathBuf,
        error: std::io::Error,
    },
    FileSeekError {
        path: PathBuf,
        error: std::io::Error,
    },
    SpawnProcessError {
        arg0: OsString,
        error: std::io::Error,
    },
}

impl std::fmt::Display for OpenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MetadataFetchError { path, error } => {
                write!(f, "failed to fetch metadata for {path:?}: {error}")
            }
            Self::FileOpenError { path, error } => {
                write!(f, "failed to open file {path:?}: {error}")
            }
            Self::FileReadError { path, error } => {
                write!(f, "failed to read file {path:?}: {error}")
            }
            Self::FileSeekError { path, error } => {
                write!(f, "failed to seek file {path:?}: {error}")
            }
            Self::SpawnProcessError { arg0, error } => {
                write!(f, "failed to spawn process {arg0:?}: {error}")
            }
        }
    }
}

/// Where the rlog text comes from: a capture file (possibly
/// gzip/zstd-compressed, fed through a decompression thread) or a
/// `cvs log` process run inside a sandbox directory.
pub(crate) enum LogSource {
    ThreadPipe(
        std::thread::JoinHandle<Result<(), std::io::Error>>,
        std::io::BufReader<pipe::PipeReader>,
    ),
    Command(
        std::process::Child,
        std::io::BufReader<std::process::ChildStdout>,
    ),
}

impl LogSource {
    pub(crate) fn open(path: &std::path::Path) -> Result<Self, OpenError> {
        let path_meta = std::fs::metadata(path).map_err(|e| OpenError::MetadataFetchError {
            path: path.to_path_buf(),
            error: e,
        })?;
        if path_meta.file_type().is_dir() {
            let mut child = std::process::Command::new("cvs")
                .arg("log")
                .current_dir(path)
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::inherit())
                .spawn()
                .map_err(|e| OpenError::SpawnProcessError {
                    arg0: "cvs".into(),
                    error: e,
                })?;
            let stdout = child.stdout.take().unwrap();
            Ok(Self::Command(child, std::io::BufReader::new(stdout)))
        } else {
            let mut file = std::fs::OpenOptions::new()
                .read(true)
                .open(path)
                .map_err(|e| OpenError::FileOpenError {
                    path: path.to_path_buf(),
                    error: e,
                })?;

            const ZSTD_MAGIC: &[u8] = &[0x28, 0xB5, 0x2F, 0xFD];
            const GZIP_MAGIC: &[u8] = &[0x1F, 0x8B];

            const HEADER_SIZE: usize = 4;

            let mut header = Vec::<u8>::with_capacity(HEADER_SIZE);
            while header.len() < HEADER_SIZE {
                let mut buf = [0; HEADER_SIZE];
                match file.read(&mut buf[..(HEADER_SIZE - header.len())]) {
                    Ok(0) => break,
                    Ok(n) => header.extend(&buf[..n]),
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(e) => {
                        return Err(OpenError::FileReadError {
                            path: path.to_path_buf(),
                            error: e,
                        });
                    }
                }
            }

            file.seek(std::io::SeekFrom::Start(0))
                .map_err(|e| OpenError::FileSeekError {
                    path: path.to_path_buf(),
                    error: e,
                })?;

            let (pipe_read, mut pipe_write) = pipe::create();

            let joiner = std::thread::Builder::new()
                .name("cvs log source".into())
                .spawn(move || {
                    if header.starts_with(ZSTD_MAGIC) {
                        zstd::stream::copy_decode(&file, &mut pipe_write)?;
                    } else if header.starts_with(GZIP_MAGIC) {
                        let mut decoder = flate2::read::GzDecoder::new(&file);
                        std::io::copy(&mut decoder, &mut pipe_write)?;
                    } else {
                        let mut file = file;
                        std::io::copy(&mut file, &mut pipe_write)?;
                    }
                    Ok(())
                })
                .expect("failed to spawn thread");

            Ok(Self::ThreadPipe(joiner, std::io::BufReader::new(pipe_read)))
        }
    }

    pub(crate) fn close(self) -> Result<(), std::io::Error> {
        match self {
            Self::ThreadPipe(joiner, stream) => {
                drop(stream);
                match joiner.join() {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e),
                    Err(e) => std::panic::resume_unwind(e),
                }
            }
            Self::Command(mut child, _) => {
                let exit_code = child.wait()?;
                if exit_code.success() {
                    Ok(())
                } else {
                    Err(std::io::Error::other(format!(
                        "cvs log exited with {exit_code}"
                    )))
                }
            }
        }
    }

    pub(crate) fn stream(&mut self) -> &mut dyn std::io::BufRead {
        match self {
            Self::ThreadPipe(_, stream) => stream,
            Self::Command(_, stdout) => stdout,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead as _, Read as _, Write as _};

    use super::LogSource;

    #[test]
    fn test_plain_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cvs.log");
        std::fs::write(&path, b"line one\nline two\n").unwrap();

        let mut source = LogSource::open(&path).unwrap();
        let mut text = String::new();
        source.stream().read_to_string(&mut text).unwrap();
        assert_eq!(text, "line one\nline two\n");
        source.close().unwrap();
    }

    #[test]
    fn test_gzip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cvs.log.gz");
        let file = std::fs::File::create(&path).unwrap();
        let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        encoder.write_all(b"compressed content\n").unwrap();
        encoder.finish().unwrap();

        let mut source = LogSource::open(&path).unwrap();
        let mut line = String::new();
        source.stream().read_line(&mut line).unwrap();
        assert_eq!(line, "compressed content\n");
        source.close().unwrap();
    }

    #[test]
    fn test_zstd_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cvs.log.zst");
        let data = zstd::stream::encode_all(&b"zstd content\n"[..], 0).unwrap();
        std::fs::write(&path, data).unwrap();

        let mut source = LogSource::open(&path).unwrap();
        let mut line = String::new();
        source.stream().read_line(&mut line).unwrap();
        assert_eq!(line, "zstd content\n");
        source.close().unwrap();
    }
}
