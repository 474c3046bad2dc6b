use std::collections::VecDeque;
use std::io::BufRead;

use chrono::{DateTime, Utc};

// Parses the output of "cvs rlog" / "rlog". One file section looks like:
//
//   RCS file: /cvsroot/proj/src/a.c,v
//   head: 1.2
//   ...
//   symbolic names:
//           REL_1: 1.2
//           devel: 1.2.0.2
//   keyword substitution: kv
//   total revisions: 2;     selected revisions: 2
//   description:
//   ----------------------------
//   revision 1.2
//   date: 2004/07/01 10:05:00;  author: anna;  state: Exp;  lines: +1 -0
//   <message lines>
//   ----------------------------
//   revision 1.1
//   date: ...;  author: ...;  state: dead;  commitid: abc;  mergepoint: 1.1.2.2;
//   <message lines>
//   =============================================================================

const REV_SEPARATOR: &str = "----------------------------";
const FILE_TERMINATOR: &str =
    "=============================================================================";

pub(crate) enum LogRecord {
    FileHeader {
        path: String,
        binary: bool,
    },
    Symbol {
        name: String,
        rev: String,
        is_branch: bool,
    },
    Revision {
        rev: String,
        time: DateTime<Utc>,
        author: String,
        commit_id: Option<String>,
        mergepoint: Option<String>,
        dead: bool,
        message: String,
    },
}

#[derive(Debug)]
pub(crate) enum ParseError {
    Io(std::io::Error),
    BadSymbol { line: usize, text: String },
    MissingRevisionNumber { line: usize },
    BadDateLine { line: usize, text: String },
    BadDate { line: usize, text: String },
    UnexpectedEof { line: usize },
}

impl From<std::io::Error> for ParseError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read log: {e}"),
            Self::BadSymbol { line, text } => {
                write!(f, "line {line}: malformed symbolic name \"{text}\"")
            }
            Self::MissingRevisionNumber { line } => {
                write!(f, "line {line}: revision header without a number")
            }
            Self::BadDateLine { line, text } => {
                write!(f, "line {line}: malformed revision fields \"{text}\"")
            }
            Self::BadDate { line, text } => write!(f, "line {line}: unparsable date \"{text}\""),
            Self::UnexpectedEof { line } => write!(f, "line {line}: unexpected end of log"),
        }
    }
}

/// Incremental rlog reader. Symbol records follow their file's header;
/// revision records stream as encountered.
pub(crate) struct LogParser<R> {
    src: R,
    strip_prefix: String,
    line_no: usize,
    queue: VecDeque<LogRecord>,
    in_revisions: bool,
    done: bool,
}

impl<R: BufRead> LogParser<R> {
    /// `strip_prefix` is the repository root removed from RCS paths
    /// (e.g. "/cvsroot/proj/").
    pub(crate) fn new(src: R, strip_prefix: &str) -> Self {
        Self {
            src,
            strip_prefix: strip_prefix.to_owned(),
            line_no: 0,
            queue: VecDeque::new(),
            in_revisions: false,
            done: false,
        }
    }

    fn read_line(&mut self) -> Result<Option<String>, ParseError> {
        let mut raw = Vec::new();
        let n = self.src.read_until(b'\n', &mut raw)?;
        if n == 0 {
            return Ok(None);
        }
        self.line_no += 1;
        while raw.last() == Some(&b'\n') || raw.last() == Some(&b'\r') {
            raw.pop();
        }
        Ok(Some(String::from_utf8_lossy(&raw).into_owned()))
    }

    fn clean_path(&self, raw: &str) -> String {
        let mut path = raw.strip_suffix(",v").unwrap_or(raw);
        path = path.strip_prefix(self.strip_prefix.as_str()).unwrap_or(path);
        match path.rsplit_once('/') {
            Some(("Attic", name)) => name.to_owned(),
            Some((dir, name)) => {
                let dir = dir.strip_suffix("/Attic").unwrap_or(dir);
                format!("{dir}/{name}")
            }
            None => path.to_owned(),
        }
    }

    /// Reads one file header (through "description:"), queueing the
    /// header and its symbols.
    fn parse_file_header(&mut self, rcs_path: &str) -> Result<(), ParseError> {
        enum HeaderEnd {
            Description,
            Separator,
            Terminator,
        }

        let path = self.clean_path(rcs_path);
        let mut binary = false;
        let mut symbols: Vec<LogRecord> = Vec::new();
        let mut in_symbols = false;

        let end = loop {
            let line = self.read_line()?.ok_or(ParseError::UnexpectedEof {
                line: self.line_no,
            })?;

            if in_symbols {
                if line.starts_with('\t') || line.starts_with("    ") {
                    let text = line.trim();
                    let Some((name, rev)) = text.split_once(':') else {
                        return Err(ParseError::BadSymbol {
                            line: self.line_no,
                            text: text.into(),
                        });
                    };
                    let rev = rev.trim().to_owned();
                    symbols.push(LogRecord::Symbol {
                        name: name.trim().to_owned(),
                        is_branch: revision_names_branch(&rev),
                        rev,
                    });
                    continue;
                }
                in_symbols = false;
            }

            if line.starts_with("symbolic names:") {
                in_symbols = true;
            } else if let Some(value) = line.strip_prefix("keyword substitution: ") {
                binary = value.trim() == "b";
            } else if line.starts_with("description:") {
                break HeaderEnd::Description;
            } else if line.starts_with(REV_SEPARATOR) {
                // tolerated: some rlog variants omit the description
                break HeaderEnd::Separator;
            } else if line.starts_with(FILE_TERMINATOR) {
                break HeaderEnd::Terminator;
            }
        };

        self.queue.push_back(LogRecord::FileHeader { path, binary });
        self.queue.extend(symbols);

        match end {
            HeaderEnd::Separator => self.in_revisions = true,
            HeaderEnd::Terminator => self.in_revisions = false,
            HeaderEnd::Description => {
                // description lines run until the first separator
                loop {
                    let line = self.read_line()?.ok_or(ParseError::UnexpectedEof {
                        line: self.line_no,
                    })?;
                    if line.starts_with(FILE_TERMINATOR) {
                        self.in_revisions = false;
                        break;
                    }
                    if line.starts_with(REV_SEPARATOR) {
                        self.in_revisions = true;
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Parses one revision block; the leading separator has been
    /// consumed. Returns false when the file section ended instead.
    fn parse_revision(&mut self) -> Result<bool, ParseError> {
        let header = self.read_line()?.ok_or(ParseError::UnexpectedEof {
            line: self.line_no,
        })?;
        let Some(rev) = header
            .strip_prefix("revision ")
            .map(|rest| rest.split_whitespace().next().unwrap_or("").to_owned())
            .filter(|rev| !rev.is_empty())
        else {
            return Err(ParseError::MissingRevisionNumber { line: self.line_no });
        };

        let fields_line = self.read_line()?.ok_or(ParseError::UnexpectedEof {
            line: self.line_no,
        })?;
        let (time, author, dead, commit_id, mergepoint) = self.parse_fields(&fields_line)?;

        let mut message = String::new();
        let ended_file = loop {
            let line = self.read_line()?.ok_or(ParseError::UnexpectedEof {
                line: self.line_no,
            })?;
            if line.starts_with(FILE_TERMINATOR) {
                break true;
            }
            if line.starts_with(REV_SEPARATOR) {
                break false;
            }
            if message.is_empty() && line.starts_with("branches:") {
                continue;
            }
            if !message.is_empty() {
                message.push('\n');
            }
            message.push_str(&line);
        };

        self.queue.push_back(LogRecord::Revision {
            rev,
            time,
            author,
            commit_id,
            mergepoint,
            dead,
            message,
        });
        if ended_file {
            self.in_revisions = false;
        }
        Ok(!ended_file)
    }

    #[allow(clippy::type_complexity)]
    fn parse_fields(
        &self,
        line: &str,
    ) -> Result<(DateTime<Utc>, String, bool, Option<String>, Option<String>), ParseError> {
        let mut date = None;
        let mut author = None;
        let mut dead = false;
        let mut commit_id = None;
        let mut mergepoint = None;

        for field in line.split(';') {
            let field = field.trim();
            if field.is_empty() {
                continue;
            }
            let Some((key, value)) = field.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "date" => date = Some(parse_date(value).ok_or(ParseError::BadDate {
                    line: self.line_no,
                    text: value.into(),
                })?),
                "author" => author = Some(value.to_owned()),
                "state" => dead = value == "dead",
                "commitid" => commit_id = Some(value.to_owned()),
                "mergepoint" => mergepoint = Some(value.to_owned()),
                _ => {}
            }
        }

        match (date, author) {
            (Some(date), Some(author)) => Ok((date, author, dead, commit_id, mergepoint)),
            _ => Err(ParseError::BadDateLine {
                line: self.line_no,
                text: line.into(),
            }),
        }
    }

    fn fill_queue(&mut self) -> Result<(), ParseError> {
        while self.queue.is_empty() && !self.done {
            if self.in_revisions {
                self.parse_revision()?;
                continue;
            }
            match self.read_line()? {
                None => self.done = true,
                Some(line) => {
                    if let Some(raw_path) = line.strip_prefix("RCS file: ") {
                        self.parse_file_header(raw_path.trim())?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl<R: BufRead> Iterator for LogParser<R> {
    type Item = Result<LogRecord, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.queue.is_empty() {
            if let Err(e) = self.fill_queue() {
                self.done = true;
                return Some(Err(e));
            }
        }
        self.queue.pop_front().map(Ok)
    }
}

/// Branch symbols are odd-length revisions or carry the magic zero at
/// the penultimate position; the "date" field keys the real revisions.
fn revision_names_branch(rev: &str) -> bool {
    let parts: Vec<&str> = rev.split('.').collect();
    parts.len() % 2 == 1 || (parts.len() >= 4 && parts[parts.len() - 2] == "0")
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S %z") {
        return Some(date.with_timezone(&Utc));
    }
    if let Ok(date) = chrono::NaiveDateTime::parse_from_str(raw, "%Y/%m/%d %H:%M:%S") {
        return Some(date.and_utc());
    }
    if let Ok(date) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(date.and_utc());
    }
    None
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;

    use super::{parse_date, revision_names_branch, LogParser, LogRecord, ParseError};

    const SAMPLE: &str = "\
cvs rlog: Logging proj

RCS file: /cvsroot/proj/src/a.c,v
head: 1.2
branch:
locks: strict
access list:
symbolic names:
\tREL_1: 1.2
\tdevel: 1.2.0.2
keyword substitution: kv
total revisions: 2;\tselected revisions: 2
description:
----------------------------
revision 1.2
date: 2004/07/01 10:05:00;  author: anna;  state: Exp;  lines: +1 -0
add feature

second line
----------------------------
revision 1.1
date: 2004-07-01 10:00:00 +0000;  author: bert;  state: dead;  commitid: ab12;  mergepoint: 1.1.2.2;
branches:  1.1.2;
initial import
=============================================================================

RCS file: /cvsroot/proj/Attic/old.c,v
head: 1.1
branch:
locks: strict
access list:
symbolic names:
keyword substitution: b
total revisions: 1;\tselected revisions: 1
description:
----------------------------
revision 1.1
date: 2004/07/01 09:00:00;  author: anna;  state: Exp;
old file
=============================================================================
";

    #[test]
    fn test_parse_sample() {
        let parser = LogParser::new(SAMPLE.as_bytes(), "/cvsroot/proj/");
        let records: Vec<LogRecord> = parser.map(Result::unwrap).collect();

        assert_eq!(records.len(), 7);

        match &records[0] {
            LogRecord::FileHeader { path, binary } => {
                assert_eq!(path, "src/a.c");
                assert!(!binary);
            }
            _ => panic!("expected file header"),
        }
        match &records[1] {
            LogRecord::Symbol {
                name,
                rev,
                is_branch,
            } => {
                assert_eq!(name, "REL_1");
                assert_eq!(rev, "1.2");
                assert!(!is_branch);
            }
            _ => panic!("expected symbol"),
        }
        match &records[2] {
            LogRecord::Symbol {
                name,
                rev,
                is_branch,
            } => {
                assert_eq!(name, "devel");
                assert_eq!(rev, "1.2.0.2");
                assert!(is_branch);
            }
            _ => panic!("expected symbol"),
        }
        match &records[3] {
            LogRecord::Revision {
                rev,
                time,
                author,
                commit_id,
                mergepoint,
                dead,
                message,
            } => {
                assert_eq!(rev, "1.2");
                assert_eq!(
                    *time,
                    chrono::Utc.with_ymd_and_hms(2004, 7, 1, 10, 5, 0).unwrap(),
                );
                assert_eq!(author, "anna");
                assert_eq!(*commit_id, None);
                assert_eq!(*mergepoint, None);
                assert!(!dead);
                assert_eq!(message, "add feature\n\nsecond line");
            }
            _ => panic!("expected revision"),
        }
        match &records[4] {
            LogRecord::Revision {
                rev,
                author,
                commit_id,
                mergepoint,
                dead,
                message,
                ..
            } => {
                assert_eq!(rev, "1.1");
                assert_eq!(author, "bert");
                assert_eq!(commit_id.as_deref(), Some("ab12"));
                assert_eq!(mergepoint.as_deref(), Some("1.1.2.2"));
                assert!(dead);
                assert_eq!(message, "initial import");
            }
            _ => panic!("expected revision"),
        }
        match &records[5] {
            LogRecord::FileHeader { path, binary } => {
                assert_eq!(path, "old.c");
                assert!(binary);
            }
            _ => panic!("expected file header"),
        }
        match &records[6] {
            LogRecord::Revision { rev, .. } => assert_eq!(rev, "1.1"),
            _ => panic!("expected revision"),
        }
    }

    #[test]
    fn test_attic_path_stripping() {
        let parser = LogParser::new(&b""[..], "/cvsroot/proj/");
        assert_eq!(parser.clean_path("/cvsroot/proj/src/Attic/a.c,v"), "src/a.c");
        assert_eq!(parser.clean_path("/cvsroot/proj/Attic/a.c,v"), "a.c");
        assert_eq!(parser.clean_path("/cvsroot/proj/src/a.c,v"), "src/a.c");
        assert_eq!(parser.clean_path("/elsewhere/a.c,v"), "/elsewhere/a.c");
    }

    #[test]
    fn test_branch_shape() {
        assert!(!revision_names_branch("1.2"));
        assert!(!revision_names_branch("1.2.4.3"));
        assert!(revision_names_branch("1.2.4"));
        assert!(revision_names_branch("1.2.0.4"));
        assert!(revision_names_branch("1.1.1"));
    }

    #[test]
    fn test_dates() {
        assert_eq!(
            parse_date("2004/07/01 10:05:00"),
            Some(chrono::Utc.with_ymd_and_hms(2004, 7, 1, 10, 5, 0).unwrap()),
        );
        assert_eq!(
            parse_date("2004-07-01 12:05:00 +0200"),
            Some(chrono::Utc.with_ymd_and_hms(2004, 7, 1, 10, 5, 0).unwrap()),
        );
        assert_eq!(parse_date("yesterday"), None);
    }

    #[test]
    fn test_bad_date_is_fatal() {
        let sample = "\
RCS file: /r/a.c,v
symbolic names:
keyword substitution: kv
description:
----------------------------
revision 1.1
date: whenever;  author: anna;  state: Exp;
m
=============================================================================
";
        let mut parser = LogParser::new(sample.as_bytes(), "/r/");
        let mut saw_error = false;
        for record in &mut parser {
            if let Err(e) = record {
                assert!(matches!(e, ParseError::BadDate { .. }));
                saw_error = true;
                break;
            }
        }
        assert!(saw_error);
    }
}
