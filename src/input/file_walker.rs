//! Input discovery with gitignore support
//!
//! Inputs are given as files or directories. Files are taken as is;
//! directories are walked and filtered by the file-name patterns of the
//! input kind and the configured exclude globs.

use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{Level, debug};

/// Errors that can occur during file walking
#[derive(Debug, Error)]
pub enum FileWalkerError {
    #[error("Invalid glob pattern '{pattern}': {source}")]
    InvalidGlob {
        pattern: String,
        source: globset::Error,
    },

    #[error("Input path {} does not exist", .0.display())]
    Missing(PathBuf),

    #[error("Walk error: {0}")]
    Walk(#[from] ignore::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// What an input file holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputKind {
    /// Compiled CIL policy
    Cil,
    /// Expanded m4 macro definitions
    Macros,
    /// Policy source (`.te`)
    Source,
    /// Source `genfs_contexts`
    GenfsContexts,
    /// `file_contexts`, `property_contexts` and the other entry-per-line context files
    Contexts,
}

impl InputKind {
    /// File-name patterns selecting this kind inside a directory
    pub fn patterns(self) -> &'static [&'static str] {
        match self {
            InputKind::Cil => &["**/*.cil"],
            InputKind::Macros => &["**/*_macros", "**/ioctl_defines"],
            InputKind::Source => &["**/*.te"],
            InputKind::GenfsContexts => &["**/genfs_contexts"],
            InputKind::Contexts => &[
                "**/file_contexts",
                "**/*_file_contexts",
                "**/property_contexts",
                "**/*_property_contexts",
                "**/service_contexts",
                "**/*_service_contexts",
                "**/hwservice_contexts",
                "**/*_hwservice_contexts",
                "**/vndservice_contexts",
                "**/*_vndservice_contexts",
                "**/seapp_contexts",
                "**/*_seapp_contexts",
            ],
        }
    }
}

/// Reason why a file was skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// File matched an exclude pattern
    ExcludedByPattern,
    /// File name does not fit the input kind
    OtherKind,
    /// Not a regular file (e.g., directory, symlink)
    NotAFile,
}

/// Result of file walking - either an input file or a skipped file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkResult {
    File(PathBuf),
    Skipped { path: PathBuf, reason: SkipReason },
}

/// Iterator over input files below one directory
pub struct FileWalker {
    walker: ignore::Walk,
    include_set: GlobSet,
    exclude_set: GlobSet,
    verbose: bool,
}

impl FileWalker {
    /// Walk `root` for files of `kind`, skipping `exclude` matches
    pub fn new(root: &Path, kind: InputKind, exclude: &[String]) -> Result<Self, FileWalkerError> {
        Self::with_verbose(root, kind, exclude, false)
    }

    /// Like [`FileWalker::new`], also reporting skipped files
    pub fn with_verbose(
        root: &Path,
        kind: InputKind,
        exclude: &[String],
        verbose: bool,
    ) -> Result<Self, FileWalkerError> {
        let walker = WalkBuilder::new(root)
            .hidden(false)
            .git_ignore(true)
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();

        let include_set = Self::build_globset(kind.patterns().iter().copied())?;

        let mut exclude_patterns: Vec<&str> = exclude.iter().map(String::as_str).collect();
        exclude_patterns.push("**/.git/**");
        let exclude_set = Self::build_globset(exclude_patterns)?;

        Ok(Self {
            walker,
            include_set,
            exclude_set,
            verbose,
        })
    }

    fn build_globset<'a, I>(patterns: I) -> Result<GlobSet, FileWalkerError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern).map_err(|e| FileWalkerError::InvalidGlob {
                pattern: pattern.to_string(),
                source: e,
            })?;
            builder.add(glob);
        }
        builder.build().map_err(|e| FileWalkerError::InvalidGlob {
            pattern: "<globset>".to_string(),
            source: e,
        })
    }

    /// Matching files in file-name order
    pub fn walk(self) -> impl Iterator<Item = Result<PathBuf, FileWalkerError>> {
        self.walk_with_skip_info().filter_map(|result| match result {
            Ok(WalkResult::File(path)) => Some(Ok(path)),
            Ok(WalkResult::Skipped { .. }) => None,
            Err(e) => Some(Err(e)),
        })
    }

    /// Walks the directory tree and returns an iterator with skip information
    pub fn walk_with_skip_info(self) -> impl Iterator<Item = Result<WalkResult, FileWalkerError>> {
        let include_set = self.include_set;
        let exclude_set = self.exclude_set;
        let verbose = self.verbose;

        self.walker.filter_map(move |result| {
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => return Some(Err(FileWalkerError::Walk(e))),
            };
            let path = entry.path();

            let reason = if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                Some(SkipReason::NotAFile)
            } else if exclude_set.is_match(path) {
                Some(SkipReason::ExcludedByPattern)
            } else if !include_set.is_match(path) {
                Some(SkipReason::OtherKind)
            } else {
                None
            };

            match reason {
                None => Some(Ok(WalkResult::File(path.to_path_buf()))),
                Some(reason) if verbose => Some(Ok(WalkResult::Skipped {
                    path: path.to_path_buf(),
                    reason,
                })),
                Some(_) => None,
            }
        })
    }
}

/// Expand input paths into the files of `kind` they name
///
/// Files are kept in the given order, directory contents in file-name order.
pub fn resolve_inputs(
    paths: &[PathBuf],
    kind: InputKind,
    exclude: &[String],
) -> Result<Vec<PathBuf>, FileWalkerError> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_file() {
            files.push(path.clone());
        } else if path.is_dir() {
            let verbose = tracing::enabled!(Level::DEBUG);
            for result in FileWalker::with_verbose(path, kind, exclude, verbose)?.walk_with_skip_info() {
                match result? {
                    WalkResult::File(file) => files.push(file),
                    WalkResult::Skipped { path, reason } => {
                        debug!("Skipping {}: {:?}", path.display(), reason)
                    }
                }
            }
        } else {
            return Err(FileWalkerError::Missing(path.clone()));
        }
    }
    Ok(files)
}
