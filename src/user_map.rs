use crate::FHashMap;

/// Maps CVS user names onto git author identities. One binding per
/// line: `cvsuser = Full Name <email>`.
pub(crate) struct UserMap {
    map: FHashMap<String, UserMapEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct UserMapEntry {
    name: String,
    email: String,
}

#[derive(Debug)]
pub(crate) enum UserMapParseError {
    Io(std::io::Error),
    BadLine(usize, String),
}

impl From<std::io::Error> for UserMapParseError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error)
    }
}

impl std::fmt::Display for UserMapParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Io(ref e) => e.fmt(f),
            Self::BadLine(line, ref line_data) => {
                write!(f, "bad line {}: \"{line_data}\"", line + 1)
            }
        }
    }
}

impl UserMap {
    pub(crate) fn new() -> Self {
        Self {
            map: FHashMap::default(),
        }
    }

    pub(crate) fn parse(src: &mut dyn std::io::BufRead) -> Result<Self, UserMapParseError> {
        let mut map = FHashMap::default();

        let mut line_i = 0;
        let mut line = Vec::new();
        loop {
            line.clear();
            src.read_until(b'\n', &mut line)?;

            match parse_line(&line) {
                Some(Some((user, entry))) => {
                    map.insert(user, entry);
                }
                Some(None) => {}
                None => {
                    return Err(UserMapParseError::BadLine(
                        line_i,
                        String::from_utf8_lossy(&line).into_owned(),
                    ));
                }
            }

            if !line.ends_with(b"\n") {
                break;
            }

            line_i += 1;
        }

        Ok(Self { map })
    }

    pub(crate) fn get(&self, user: &str) -> Option<(&str, &str)> {
        self.map
            .get(user)
            .map(|entry| (entry.name.as_str(), entry.email.as_str()))
    }
}

fn parse_line(line: &[u8]) -> Option<Option<(String, UserMapEntry)>> {
    let mut rem = line;
    rem = rem.strip_suffix(b"\n").unwrap_or(rem);
    rem = rem.strip_suffix(b"\r").unwrap_or(rem);
    skip_spaces(&mut rem);

    if rem.is_empty() || rem.starts_with(b"#") {
        return Some(None);
    }

    let user_len = rem
        .iter()
        .position(|&b| matches!(b, b' ' | b'\t' | b'='))
        .filter(|&l| l != 0)?;

    let user = String::from(std::str::from_utf8(&rem[..user_len]).ok()?);
    rem = &rem[user_len..];

    skip_spaces(&mut rem);

    rem = rem.strip_prefix(b"=")?;

    let name_len = rem.iter().position(|&b| b == b'<')?;
    let name = String::from(std::str::from_utf8(&rem[..name_len]).ok()?.trim());
    rem = &rem[name_len..];

    rem = rem.strip_prefix(b"<").unwrap();
    let email_len = rem.iter().position(|&b| b == b'>')?;
    let email = String::from(std::str::from_utf8(&rem[..email_len]).ok()?);
    rem = &rem[email_len..];

    rem = rem.strip_prefix(b">").unwrap();
    if !rem.iter().all(|&b| matches!(b, b' ' | b'\t')) {
        return None;
    }

    Some(Some((user, UserMapEntry { name, email })))
}

fn skip_spaces(slice: &mut &[u8]) {
    loop {
        if let Some(rem) = slice.strip_prefix(b" ") {
            *slice = rem;
        } else if let Some(rem) = slice.strip_prefix(b"\t") {
            *slice = rem;
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod test {
    use super::{parse_line, UserMap, UserMapEntry};

    #[test]
    fn test_parse_line() {
        assert_eq!(
            parse_line(b" anna = Anna Smith <anna@example.org> "),
            Some(Some((
                "anna".into(),
                UserMapEntry {
                    name: "Anna Smith".into(),
                    email: "anna@example.org".into(),
                }
            ))),
        );
        assert_eq!(
            parse_line(b"anna=Anna Smith<anna@example.org>"),
            Some(Some((
                "anna".into(),
                UserMapEntry {
                    name: "Anna Smith".into(),
                    email: "anna@example.org".into(),
                }
            ))),
        );

        assert_eq!(parse_line(b""), Some(None));
        assert_eq!(parse_line(b"  \n"), Some(None));
        assert_eq!(parse_line(b"# comment"), Some(None));

        assert_eq!(parse_line(b"anna"), None);
        assert_eq!(parse_line(b"anna = no email"), None);
        assert_eq!(parse_line(b"= Anna <anna@example.org>"), None);
    }

    #[test]
    fn test_lookup() {
        let text = b"anna = Anna Smith <anna@example.org>\nbert = Bert <bert@example.org>\n";
        let map = UserMap::parse(&mut &text[..]).unwrap();

        assert_eq!(map.get("anna"), Some(("Anna Smith", "anna@example.org")));
        assert_eq!(map.get("bert"), Some(("Bert", "bert@example.org")));
        assert_eq!(map.get("carol"), None);
    }
}
