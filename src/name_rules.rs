/// An ordered list of regex rewrite rules; the first matching rule wins
/// and unmatched names pass through unchanged.
pub(crate) struct RenameRules {
    rules: Vec<(regex::Regex, String)>,
}

impl RenameRules {
    pub(crate) fn new(rules: &[(String, String)]) -> Result<Self, regex::Error> {
        let rules = rules
            .iter()
            .map(|(pattern, replacement)| {
                Ok((regex::Regex::new(pattern)?, replacement.clone()))
            })
            .collect::<Result<_, regex::Error>>()?;
        Ok(Self { rules })
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The rewritten name, or `None` when no rule matched.
    pub(crate) fn rename(&self, name: &str) -> Option<String> {
        for (regex, replacement) in &self.rules {
            if regex.is_match(name) {
                return Some(regex.replace(name, replacement.as_str()).into_owned());
            }
        }
        None
    }

    pub(crate) fn rename_or_keep(&self, name: &str) -> String {
        self.rename(name).unwrap_or_else(|| name.to_owned())
    }
}

/// Ordered include/exclude flips over an initial default; the last
/// matching rule decides. A leading `!` marks an exclude pattern.
pub(crate) struct InclusionRules {
    default: bool,
    rules: Vec<(regex::Regex, bool)>,
}

impl InclusionRules {
    pub(crate) fn new(default: bool, patterns: &[String]) -> Result<Self, regex::Error> {
        let mut rules = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let (pattern, include) = match pattern.strip_prefix('!') {
                Some(rest) => (rest, false),
                None => (pattern.as_str(), true),
            };
            rules.push((regex::Regex::new(pattern)?, include));
        }
        Ok(Self { default, rules })
    }

    pub(crate) fn include_all(default: bool) -> Self {
        Self {
            default,
            rules: Vec::new(),
        }
    }

    pub(crate) fn matches(&self, name: &str) -> bool {
        let mut value = self.default;
        for (regex, include) in &self.rules {
            if regex.is_match(name) {
                value = *include;
            }
        }
        value
    }
}
