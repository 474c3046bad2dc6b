use std::io::Write;
use std::path::Path;

use crate::convert::{Emitter, FileOp, Signature};

// Speaks the git fast-import stream language; reference:
// https://git-scm.com/docs/git-fast-import

/// Writes the import stream either into a spawned `git fast-import`
/// process or into any supplied sink (tests, captures).
pub(crate) struct FastImport {
    sink: Box<dyn Write>,
    child: Option<std::process::Child>,
    finished: bool,
}

impl FastImport {
    /// Creates a bare repository at `dest` and attaches a fast-import
    /// process to it.
    pub(crate) fn spawn(dest: &Path) -> Result<Self, std::io::Error> {
        let init_status = std::process::Command::new("git")
            .arg("init")
            .arg("--bare")
            .arg("--quiet")
            .arg(dest)
            .stdin(std::process::Stdio::null())
            .status()?;
        if !init_status.success() {
            return Err(std::io::Error::other(format!(
                "git init exited with {init_status}"
            )));
        }

        let mut child = std::process::Command::new("git")
            .arg("-C")
            .arg(dest)
            .arg("fast-import")
            .arg("--done")
            .arg("--quiet")
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::inherit())
            .stderr(std::process::Stdio::inherit())
            .spawn()?;
        let stdin = child.stdin.take().expect("fast-import stdin was piped");

        Ok(Self {
            sink: Box::new(std::io::BufWriter::new(stdin)),
            child: Some(child),
            finished: false,
        })
    }

    pub(crate) fn to_writer(sink: Box<dyn Write>) -> Self {
        Self {
            sink,
            child: None,
            finished: false,
        }
    }

    fn write_data(&mut self, data: &[u8]) -> Result<(), std::io::Error> {
        writeln!(self.sink, "data {}", data.len())?;
        self.sink.write_all(data)?;
        writeln!(self.sink)
    }
}

/// Paths with bytes the stream grammar reserves are C-style quoted.
fn quote_path(path: &str) -> String {
    if !path.bytes().any(|b| matches!(b, b'"' | b'\\' | b'\n')) && !path.starts_with('"') {
        return path.to_owned();
    }
    let mut quoted = String::with_capacity(path.len() + 2);
    quoted.push('"');
    for chr in path.chars() {
        match chr {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            _ => quoted.push(chr),
        }
    }
    quoted.push('"');
    quoted
}

impl Emitter for FastImport {
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
    ) -> Result<(), std::io::Error> {
        writeln!(self.sink, "commit refs/heads/{branch}")?;
        writeln!(self.sink, "mark :{mark}")?;
        writeln!(
            self.sink,
            "author {} <{}> {time} +0000",
            author.name, author.email,
        )?;
        writeln!(
            self.sink,
            "committer {} <{}> {time} +0000",
            author.name, author.email,
        )?;
        self.write_data(message.as_bytes())?;
        if let Some(from) = from {
            writeln!(self.sink, "from :{from}")?;
        }
        if let Some(merge) = merge {
            writeln!(self.sink, "merge :{merge}")?;
        }
        for op in ops {
            match op {
                FileOp::Modify {
                    mode,
                    path,
                    content,
                } => {
                    writeln!(self.sink, "M {mode:o} inline {}", quote_path(path))?;
                    self.write_data(content)?;
                }
                FileOp::Delete { path } => {
                    writeln!(self.sink, "D {}", quote_path(path))?;
                }
            }
        }
        Ok(())
    }

    fn tag(
        &mut self,
        name: &str,
        commit_mark: u32,
        tagger: &Signature,
        time: i64,
        message: &str,
    ) -> Result<(), std::io::Error> {
        writeln!(self.sink, "tag {name}")?;
        writeln!(self.sink, "from :{commit_mark}")?;
        writeln!(
            self.sink,
            "tagger {} <{}> {time} +0000",
            tagger.name, tagger.email,
        )?;
        self.write_data(message.as_bytes())
    }

    fn finish(&mut self) -> Result<(), std::io::Error> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        writeln!(self.sink, "done")?;
        self.sink.flush()?;

        if let Some(mut child) = self.child.take() {
            // closing stdin lets fast-import run to completion
            self.sink = Box::new(std::io::sink());
            let status = child.wait()?;
            if !status.success() {
                return Err(std::io::Error::other(format!(
                    "git fast-import exited with {status}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use crate::convert::{Emitter as _, FileOp, Signature};
    use super::{quote_path, FastImport};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_stream_shape() {
        let buf = SharedBuf::default();
        let mut import = FastImport::to_writer(Box::new(buf.clone()));

        let anna = Signature {
            name: "Anna".into(),
            email: "anna@example.org".into(),
        };
        import
            .commit(
                "master",
                1,
                &anna,
                1088676300,
                "add feature",
                None,
                None,
                &[FileOp::Modify {
                    mode: 0o100644,
                    path: "src/a.c".into(),
                    content: b"int x;\n".to_vec(),
                }],
            )
            .unwrap();
        import
            .commit(
                "devel",
                2,
                &anna,
                1088676400,
                "remove",
                Some(1),
                None,
                &[FileOp::Delete {
                    path: "src/a.c".into(),
                }],
            )
            .unwrap();
        import
            .tag("REL_1", 1, &anna, 1088676300, "release one")
            .unwrap();
        import.finish().unwrap();

        let raw = buf.0.lock().unwrap().clone();
        let text = String::from_utf8(raw).unwrap();
        let expected = "\
commit refs/heads/master
mark :1
author Anna <anna@example.org> 1088676300 +0000
committer Anna <anna@example.org> 1088676300 +0000
data 11
add feature
M 100644 inline src/a.c
data 7
int x;

commit refs/heads/devel
mark :2
author Anna <anna@example.org> 1088676400 +0000
committer Anna <anna@example.org> 1088676400 +0000
data 6
remove
from :1
D src/a.c
tag REL_1
from :1
tagger Anna <anna@example.org> 1088676300 +0000
data 11
release one
done
";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_quote_path() {
        assert_eq!(quote_path("src/a.c"), "src/a.c");
        assert_eq!(quote_path("a\"b"), "\"a\\\"b\"");
        assert_eq!(quote_path("a\\b"), "\"a\\\\b\"");
    }
}
