use std::hash::BuildHasher as _;
use std::sync::Arc;

/// A dotted RCS revision number (`1.2`, `1.2.4.3`), a branch stem
/// (`1.2.4`), a magic branch marker (`1.2.0.4`) or the empty sentinel.
///
/// Cheap to clone; equality takes the pointer fast path for interned
/// values and falls back to comparing parts.
#[derive(Clone)]
pub(crate) struct Revision {
    parts: Arc<[u32]>,
}

impl PartialEq for Revision {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.parts, &other.parts) || self.parts == other.parts
    }
}

impl Eq for Revision {}

impl PartialOrd for Revision {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Revision {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.parts.as_ref().cmp(other.parts.as_ref())
    }
}

impl std::hash::Hash for Revision {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.parts.as_ref().hash(state);
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.parts.is_empty() {
            return f.write_str("<none>");
        }
        for (i, part) in self.parts.iter().enumerate() {
            if i != 0 {
                f.write_str(".")?;
            }
            write!(f, "{part}")?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Revision({self})")
    }
}

impl Revision {
    /// The empty sentinel. Pool-interned parses never produce it.
    pub(crate) fn empty() -> Revision {
        Revision { parts: Arc::from([]) }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub(crate) fn parts(&self) -> &[u32] {
        &self.parts
    }

    fn last(&self) -> Option<u32> {
        self.parts.last().copied()
    }

    /// A revision on the trunk line (`x.y`).
    pub(crate) fn is_trunk(&self) -> bool {
        self.parts.len() == 2
    }

    /// Names a branch rather than a file revision: an odd-length stem or
    /// a magic marker with a zero at the penultimate position.
    pub(crate) fn is_branch(&self) -> bool {
        self.parts.len() % 2 == 1 || self.is_magic()
    }

    fn is_magic(&self) -> bool {
        self.parts.len() >= 4
            && self.parts.len() % 2 == 0
            && self.parts[self.parts.len() - 2] == 0
    }

    /// The odd-length stem naming the branch a non-trunk revision lives
    /// on: `1.2.4.3` -> `1.2.4`, `1.2.0.4` -> `1.2.4`, stems map to
    /// themselves.
    pub(crate) fn branch_stem(&self) -> Revision {
        debug_assert!(!self.is_empty() && !self.is_trunk());
        if self.is_magic() {
            let mut parts = self.parts[..self.parts.len() - 2].to_vec();
            parts.push(self.parts[self.parts.len() - 1]);
            Revision { parts: parts.into() }
        } else if self.parts.len() % 2 == 1 {
            self.clone()
        } else {
            Revision {
                parts: self.parts[..self.parts.len() - 1].into(),
            }
        }
    }

    /// The ancestor revision on the parent line from which this branch
    /// departs: `1.2.4.3` -> `1.2`, `1.2.0.4` -> `1.2`, `1.2.4` -> `1.2`.
    pub(crate) fn branchpoint(&self) -> Revision {
        debug_assert!(!self.is_empty() && !self.is_trunk());
        let cut = if self.parts.len() % 2 == 1 {
            self.parts.len() - 1
        } else {
            self.parts.len() - 2
        };
        Revision {
            parts: self.parts[..cut].into(),
        }
    }

    fn same_line(&self, other: &Revision) -> bool {
        self.parts.len() == other.parts.len()
            && self.parts[..self.parts.len() - 1] == other.parts[..other.parts.len() - 1]
    }

    /// `other` is the immediate next revision: the successor on the same
    /// line, or the first revision of a branch departing from `self`.
    /// The empty revision directly precedes any `*.1` first revision.
    pub(crate) fn directly_precedes(&self, other: &Revision) -> bool {
        if other.is_empty() || other.is_branch() {
            return false;
        }
        if self.is_empty() {
            return other.last() == Some(1);
        }
        if self.same_line(other) {
            return self.last().unwrap() + 1 == other.last().unwrap();
        }
        other.parts.len() > 2 && other.last() == Some(1) && *self == other.branchpoint()
    }

    /// Strict ancestry: `self` lies on the path from the start of history
    /// to `other`, looking through branchpoints.
    pub(crate) fn precedes(&self, other: &Revision) -> bool {
        if other.is_empty() {
            return false;
        }
        if self.is_empty() {
            return true;
        }
        let mut cur = other.clone();
        loop {
            if self.same_line(&cur) {
                return self.last().unwrap() < cur.last().unwrap();
            }
            if cur.parts.len() <= 2 {
                return false;
            }
            let bp = cur.branchpoint();
            if *self == bp {
                return true;
            }
            cur = bp;
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ParseRevisionError {
    Empty,
    BadPart,
    ZeroPart,
    OddBranchNumber,
}

impl std::fmt::Display for ParseRevisionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty revision number"),
            Self::BadPart => write!(f, "revision part is not a number"),
            Self::ZeroPart => write!(f, "zero part outside a branch marker"),
            Self::OddBranchNumber => write!(f, "odd branch number"),
        }
    }
}

fn validate(parts: &[u32]) -> Result<(), ParseRevisionError> {
    if parts.is_empty() {
        return Err(ParseRevisionError::Empty);
    }

    for (i, &part) in parts.iter().enumerate() {
        if part == 0 && (parts.len() < 4 || parts.len() % 2 != 0 || i != parts.len() - 2) {
            return Err(ParseRevisionError::ZeroPart);
        }
    }

    // Branch numbers sit at even offsets past the trunk pair, except in
    // the magic form where the marker shifts the number one slot right.
    // Vendor branches (1.1.1 and its revisions) carry the odd number 1.
    let is_vendor = parts.len() >= 3 && parts[0] == 1 && parts[1] == 1 && parts[2] == 1;
    let magic = parts.len() >= 4 && parts.len() % 2 == 0 && parts[parts.len() - 2] == 0;
    for i in (2..parts.len()).step_by(2) {
        let branch_no = if magic && i == parts.len() - 2 {
            parts[i + 1]
        } else {
            parts[i]
        };
        if branch_no % 2 != 0 && !(is_vendor && i == 2) {
            return Err(ParseRevisionError::OddBranchNumber);
        }
    }

    Ok(())
}

/// Interns revisions so the parsed history shares one allocation per
/// distinct number. Written during parse, read-only afterwards.
pub(crate) struct RevisionPool {
    table: hashbrown::HashTable<Revision>,
    hasher: foldhash::fast::RandomState,
}

impl RevisionPool {
    pub(crate) fn new() -> Self {
        Self {
            table: hashbrown::HashTable::new(),
            hasher: foldhash::fast::RandomState::default(),
        }
    }

    pub(crate) fn intern(&mut self, parts: &[u32]) -> Revision {
        if parts.is_empty() {
            return Revision::empty();
        }
        let hash = self.hasher.hash_one(parts);
        let entry = self.table.entry(
            hash,
            |rev| rev.parts.as_ref() == parts,
            |rev| self.hasher.hash_one(rev.parts.as_ref()),
        );
        match entry {
            hashbrown::hash_table::Entry::Occupied(entry) => entry.get().clone(),
            hashbrown::hash_table::Entry::Vacant(entry) => {
                let rev = Revision { parts: parts.into() };
                entry.insert(rev.clone());
                rev
            }
        }
    }

    pub(crate) fn parse(&mut self, s: &str) -> Result<Revision, ParseRevisionError> {
        let mut parts = Vec::new();
        for raw_part in s.split('.') {
            let part = raw_part.parse().map_err(|_| ParseRevisionError::BadPart)?;
            parts.push(part);
        }
        validate(&parts)?;
        Ok(self.intern(&parts))
    }
}
