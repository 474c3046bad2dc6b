use super::ConvertError;
use crate::name_rules::{InclusionRules, RenameRules};

/// Everything the conversion core needs to know, assembled by `main`
/// from the CLI and the parameters file.
pub(crate) struct Options {
    /// Git branch name the trunk maps to.
    pub(crate) git_head_name: String,
    pub(crate) fussy_verify: bool,
    pub(crate) partial_tag_threshold: usize,
    pub(crate) continue_on_error: bool,
    pub(crate) no_reorder: bool,
    pub(crate) enable_merges: bool,
    pub(crate) strip_advertising: bool,
    pub(crate) normalize_line_endings: bool,
    pub(crate) tag_rules: InclusionRules,
    pub(crate) branch_rules: InclusionRules,
    pub(crate) file_rules: InclusionRules,
    pub(crate) head_only_rules: InclusionRules,
    pub(crate) rename_tags: RenameRules,
    pub(crate) rename_branches: RenameRules,
    /// Maps a branch name onto the tag marking its branchpoint.
    pub(crate) branchpoint_rules: RenameRules,
    pub(crate) cvs_processes: usize,
}

impl Options {
    pub(crate) fn validate(&self) -> Result<(), ConvertError> {
        if self.git_head_name.is_empty() {
            tracing::error!("the git head branch name is empty");
            return Err(ConvertError);
        }
        if self.cvs_processes == 0 {
            tracing::error!("at least one cvs process is required");
            return Err(ConvertError);
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_options() -> Options {
    Options {
        git_head_name: "master".into(),
        fussy_verify: false,
        partial_tag_threshold: 30,
        continue_on_error: false,
        no_reorder: false,
        enable_merges: true,
        strip_advertising: true,
        normalize_line_endings: false,
        tag_rules: InclusionRules::include_all(true),
        branch_rules: InclusionRules::include_all(true),
        file_rules: InclusionRules::include_all(true),
        head_only_rules: InclusionRules::include_all(false),
        rename_tags: RenameRules::new(&[]).unwrap(),
        rename_branches: RenameRules::new(&[]).unwrap(),
        branchpoint_rules: RenameRules::new(&[]).unwrap(),
        cvs_processes: 1,
    }
}
