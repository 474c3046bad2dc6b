use std::path::PathBuf;

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ConvParams {
    /// CVS root for content fetching; read from the sandbox when absent.
    #[serde(rename = "cvs-root")]
    pub(crate) cvs_root: Option<String>,
    /// Module path inside the repository; read from the sandbox when
    /// absent.
    pub(crate) module: Option<String>,
    #[serde(rename = "head-branch", default = "default_head")]
    pub(crate) head_branch: String,
    /// Ordered tag include/exclude patterns; `!` prefixes an exclude.
    #[serde(default = "Vec::new")]
    pub(crate) tags: Vec<String>,
    #[serde(default = "Vec::new")]
    pub(crate) branches: Vec<String>,
    #[serde(default = "Vec::new")]
    pub(crate) files: Vec<String>,
    #[serde(rename = "head-only", default = "Vec::new")]
    pub(crate) head_only: Vec<String>,
    #[serde(rename = "rename-tags", default = "Vec::new")]
    pub(crate) rename_tags: Vec<(String, String)>,
    #[serde(rename = "rename-branches", default = "Vec::new")]
    pub(crate) rename_branches: Vec<(String, String)>,
    /// Maps branch names onto the tags marking their branchpoints.
    #[serde(rename = "branchpoint-rules", default = "Vec::new")]
    pub(crate) branchpoint_rules: Vec<(String, String)>,
    #[serde(rename = "partial-tag-threshold", default = "default_partial_threshold")]
    pub(crate) partial_tag_threshold: usize,
    #[serde(rename = "fussy-verify", default = "false_")]
    pub(crate) fussy_verify: bool,
    #[serde(rename = "enable-merges", default = "true_")]
    pub(crate) enable_merges: bool,
    #[serde(rename = "strip-advertising", default = "true_")]
    pub(crate) strip_advertising: bool,
    #[serde(rename = "normalize-line-endings", default = "false_")]
    pub(crate) normalize_line_endings: bool,
    #[serde(rename = "user-map-file")]
    pub(crate) user_map_file: Option<PathBuf>,
    #[serde(rename = "user-fallback-template")]
    pub(crate) user_fallback_template: Option<String>,
    #[serde(rename = "tag-msg-template")]
    pub(crate) tag_msg_template: Option<String>,
    #[serde(rename = "cache-dir")]
    pub(crate) cache_dir: Option<PathBuf>,
}

#[inline(always)]
fn false_() -> bool {
    false
}

#[inline(always)]
fn true_() -> bool {
    true
}

fn default_head() -> String {
    "master".into()
}

fn default_partial_threshold() -> usize {
    30
}

#[cfg(test)]
mod tests {
    use super::ConvParams;

    #[test]
    fn test_parse_full() {
        let text = r#"
            cvs-root = ":local:/cvsroot"
            module = "proj"
            head-branch = "main"
            tags = ["REL_.*", "!REL_BROKEN.*"]
            branches = ["devel.*"]
            head-only = ["docs/.*"]
            rename-tags = [["^REL_", "release/"]]
            branchpoint-rules = [["^RB_", "RT_"]]
            partial-tag-threshold = 10
            enable-merges = false
            normalize-line-endings = true
        "#;
        let params: ConvParams = toml::from_str(text).unwrap();
        assert_eq!(params.cvs_root.as_deref(), Some(":local:/cvsroot"));
        assert_eq!(params.head_branch, "main");
        assert_eq!(params.tags.len(), 2);
        assert_eq!(params.rename_tags, [("^REL_".to_string(), "release/".to_string())]);
        assert_eq!(params.partial_tag_threshold, 10);
        assert!(!params.enable_merges);
        assert!(params.strip_advertising);
        assert!(params.normalize_line_endings);
    }

    #[test]
    fn test_defaults() {
        let params: ConvParams = toml::from_str("").unwrap();
        assert_eq!(params.head_branch, "master");
        assert_eq!(params.partial_tag_threshold, 30);
        assert!(params.enable_merges);
        assert!(params.tags.is_empty());
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(toml::from_str::<ConvParams>("frobnicate = true").is_err());
    }
}
