#![warn(
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unused_qualifications
)]
#![allow(clippy::enum_variant_names, clippy::type_complexity)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

mod cli;
mod convert;
mod cvs;
mod git;
mod meta;
mod name_rules;
mod params_file;
mod pipe;
mod term_out;
mod user_map;

use term_out::ProgressPrint;

pub(crate) type FHashMap<K, V> = std::collections::HashMap<K, V, foldhash::fast::RandomState>;
pub(crate) type FHashSet<T> = std::collections::HashSet<T, foldhash::fast::RandomState>;

enum RunError {
    Generic,
    Usage,
}

fn main() -> ExitCode {
    match main_inner() {
        Ok(()) => ExitCode::SUCCESS,
        Err(RunError::Generic) => ExitCode::from(1),
        Err(RunError::Usage) => ExitCode::from(2),
    }
}

fn main_inner() -> Result<(), RunError> {
    let start = std::time::Instant::now();

    let args = match <cli::Cli as clap::Parser>::try_parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            return Err(RunError::Usage);
        }
    };

    let term_out = term_out::init(start, !args.no_progress);
    let progress_print = term_out.get_progress_print();

    let stderr_log_level = args
        .stderr_log_level
        .unwrap_or(cli::LogLevel::Warn)
        .to_log_level_filter();
    let file_log_level = args.file_log_level.map(cli::LogLevel::to_log_level_filter);

    if let Err(e) = init_logger(
        Some(stderr_log_level),
        args.log_file.as_deref(),
        file_log_level,
        progress_print.clone(),
    ) {
        eprintln!("failed to initialize logging: {e}");
        return Err(RunError::Generic);
    }

    let params_raw = match std::fs::read_to_string(&args.conv_params) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("failed to read {:?}: {e}", args.conv_params);
            return Err(RunError::Generic);
        }
    };
    let params: params_file::ConvParams = match toml::from_str(&params_raw) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("failed to parse {:?}: {e}", args.conv_params);
            return Err(RunError::Generic);
        }
    };

    let inclusion = |default: bool, patterns: &[String], what: &str| {
        name_rules::InclusionRules::new(default, patterns).map_err(|e| {
            tracing::error!("invalid {what} pattern: {e}");
            RunError::Generic
        })
    };
    let renames = |rules: &[(String, String)], what: &str| {
        name_rules::RenameRules::new(rules).map_err(|e| {
            tracing::error!("invalid {what} rule: {e}");
            RunError::Generic
        })
    };

    let options = convert::Options {
        git_head_name: params.head_branch.clone(),
        fussy_verify: params.fussy_verify,
        partial_tag_threshold: params.partial_tag_threshold,
        continue_on_error: args.continue_on_error,
        no_reorder: args.no_reorder,
        enable_merges: params.enable_merges,
        strip_advertising: params.strip_advertising,
        normalize_line_endings: params.normalize_line_endings,
        tag_rules: inclusion(true, &params.tags, "tag")?,
        branch_rules: inclusion(true, &params.branches, "branch")?,
        file_rules: inclusion(true, &params.files, "file")?,
        head_only_rules: inclusion(false, &params.head_only, "head-only")?,
        rename_tags: renames(&params.rename_tags, "tag rename")?,
        rename_branches: renames(&params.rename_branches, "branch rename")?,
        branchpoint_rules: renames(&params.branchpoint_rules, "branchpoint")?,
        cvs_processes: args.cvs_processes,
    };
    options.validate().map_err(|_| RunError::Generic)?;

    let user_map = match params.user_map_file {
        None => user_map::UserMap::new(),
        Some(ref user_map_path) => {
            let user_map_path = if user_map_path.is_relative() {
                let conv_params_parent = args.conv_params.parent().ok_or_else(|| {
                    tracing::error!("invalid parameters file path: {:?}", args.conv_params);
                    RunError::Generic
                })?;
                conv_params_parent.join(user_map_path)
            } else {
                user_map_path.clone()
            };

            let user_map_file = std::fs::OpenOptions::new()
                .read(true)
                .open(&user_map_path)
                .map_err(|e| {
                    tracing::error!("failed to open user map {user_map_path:?}: {e}");
                    RunError::Generic
                })?;

            user_map::UserMap::parse(&mut std::io::BufReader::new(user_map_file)).map_err(
                |e| {
                    tracing::error!("failed to read user map {user_map_path:?}: {e}");
                    RunError::Generic
                },
            )?
        }
    };

    let user_fallback_template = params
        .user_fallback_template
        .as_deref()
        .unwrap_or(r#"{{ cvs_author or "nobody" }} <{{ cvs_author or "nobody" }}@cvs.invalid>"#);
    let tag_msg_template = params.tag_msg_template.as_deref().unwrap_or(indoc::indoc! {r#"
        {{ tag }}
        [[CVS tag: {{ cvs_tag }}]]
    "#});

    let meta_maker = meta::CvsMetaMaker::new(&user_map, user_fallback_template, tag_msg_template)
        .map_err(|e| {
            tracing::error!("{e}");
            RunError::Generic
        })?;

    // figure out where the log and the file contents come from
    let (log_input, repo) = match (&args.cvs_log, &args.sandbox) {
        (Some(log_path), sandbox) => {
            let repo = match (params.cvs_root.clone(), params.module.clone()) {
                (Some(root), Some(module)) => RepoLocation::new(root, module),
                _ => match sandbox {
                    Some(sandbox) => read_sandbox_location(sandbox)?,
                    None => {
                        tracing::error!(
                            "with --cvs-log alone, \"cvs-root\" and \"module\" must be set \
                             in the parameters file",
                        );
                        return Err(RunError::Generic);
                    }
                },
            };
            (log_path.clone(), repo)
        }
        (None, Some(sandbox)) => {
            let repo = match (params.cvs_root.clone(), params.module.clone()) {
                (Some(root), Some(module)) => RepoLocation::new(root, module),
                _ => read_sandbox_location(sandbox)?,
            };
            (sandbox.clone(), repo)
        }
        (None, None) => {
            tracing::error!("either --cvs-log or --sandbox is required");
            return Err(RunError::Usage);
        }
    };

    let cache_dir = params.cache_dir.clone().unwrap_or_else(|| {
        let mut name = args.dest.as_os_str().to_owned();
        name.push("-cvs-cache");
        PathBuf::from(name)
    });

    let mut log_source = cvs::source::LogSource::open(&log_input).map_err(|e| {
        tracing::error!("failed to open cvs log source: {e}");
        RunError::Generic
    })?;

    let mut fetcher = cvs::content::CvsContentFetcher::new(
        repo.cvs_root.clone(),
        repo.module.clone(),
        cache_dir,
        args.cvs_processes,
        params.normalize_line_endings,
    );

    let mut emitter = git::fast_import::FastImport::spawn(&args.dest).map_err(|e| {
        tracing::error!("failed to start git fast-import at {:?}: {e}", args.dest);
        RunError::Generic
    })?;

    let cancel = convert::CancelToken::new();
    let parser = cvs::log::LogParser::new(log_source.stream(), &repo.strip_prefix);

    let result = convert::convert(
        &progress_print,
        &options,
        parser,
        &meta_maker,
        &mut fetcher,
        &mut emitter,
        &cancel,
    );

    if let Err(e) = log_source.close() {
        tracing::warn!("cvs log source: {e}");
    }

    term_out.finish();

    result.map_err(|_| RunError::Generic)
}

struct RepoLocation {
    cvs_root: String,
    module: String,
    strip_prefix: String,
}

impl RepoLocation {
    fn new(cvs_root: String, module: String) -> Self {
        let root_path = cvs_root_path(&cvs_root);
        let strip_prefix = if module.starts_with('/') {
            format!("{module}/")
        } else {
            format!("{root_path}/{module}/")
        };
        Self {
            cvs_root,
            module,
            strip_prefix,
        }
    }
}

/// The connection string ends with the on-disk repository path
/// (":local:/cvsroot", ":pserver:user@host:/cvsroot", "/cvsroot").
fn cvs_root_path(cvs_root: &str) -> &str {
    match cvs_root.rfind(':') {
        Some(i) => &cvs_root[i + 1..],
        None => cvs_root,
    }
}

fn read_sandbox_location(sandbox: &Path) -> Result<RepoLocation, RunError> {
    let read_meta = |name: &str| {
        let path = sandbox.join("CVS").join(name);
        std::fs::read_to_string(&path)
            .map(|raw| raw.trim().to_owned())
            .map_err(|e| {
                tracing::error!("failed to read {path:?}: {e}");
                RunError::Generic
            })
    };

    let cvs_root = read_meta("Root")?;
    let repository = read_meta("Repository")?;

    let root_path = cvs_root_path(&cvs_root).to_owned();
    let module = match repository.strip_prefix(&format!("{root_path}/")) {
        Some(relative) => relative.to_owned(),
        None => repository.trim_start_matches('/').to_owned(),
    };

    Ok(RepoLocation::new(cvs_root, module))
}

fn init_logger(
    stderr_level: Option<tracing::Level>,
    file_path: Option<&Path>,
    file_level: Option<tracing::Level>,
    progress_print: ProgressPrint,
) -> Result<(), std::io::Error> {
    use tracing_subscriber::layer::{Layer as _, SubscriberExt as _};
    use tracing_subscriber::util::SubscriberInitExt as _;

    let stderr_sub = if let Some(stderr_level) = stderr_level {
        let filter = tracing_subscriber::filter::LevelFilter::from_level(stderr_level);
        Some(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(MakeLogPrinter::new(progress_print))
                .with_filter(filter),
        )
    } else {
        None
    };

    let file_sub = if let Some(file_path) = file_path {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;

        let filter = tracing_subscriber::filter::LevelFilter::from_level(
            file_level.unwrap_or(tracing::Level::DEBUG),
        );
        Some(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file)
                .with_filter(filter),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(stderr_sub)
        .with(file_sub)
        .init();

    Ok(())
}

struct MakeLogPrinter {
    progress_print: ProgressPrint,
}

impl MakeLogPrinter {
    fn new(progress_print: ProgressPrint) -> Self {
        Self { progress_print }
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for MakeLogPrinter {
    type Writer = LogPrinter<'a>;

    fn make_writer(&'a self) -> LogPrinter<'a> {
        LogPrinter {
            progress_print: &self.progress_print,
            buf: Vec::new(),
        }
    }
}

struct LogPrinter<'a> {
    progress_print: &'a ProgressPrint,
    buf: Vec<u8>,
}

impl Drop for LogPrinter<'_> {
    fn drop(&mut self) {
        self.progress_print.print_raw_line(self.buf.clone());
    }
}

impl std::io::Write for LogPrinter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.extend(buf);
        Ok(buf.len())
    }

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.buf.extend(buf);
        Ok(())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::cvs_root_path;

    #[test]
    fn test_cvs_root_path() {
        assert_eq!(cvs_root_path("/cvsroot"), "/cvsroot");
        assert_eq!(cvs_root_path(":local:/cvsroot"), "/cvsroot");
        assert_eq!(
            cvs_root_path(":pserver:anna@cvs.example.org:/var/cvs"),
            "/var/cvs",
        );
    }
}
