use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::{Error, Result};

/// A source file admitted for chunking.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Path relative to the scanned root.
    pub relative_path: PathBuf,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
}

impl DiscoveredFile {
    /// Relative path with `/` separators, as stored in chunk metadata.
    pub fn display_name(&self) -> String {
        self.relative_path
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Extensions admitted when `include_all_files` is off.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "py", "java", "js", "jsx", "ts", "tsx", "html", "css", "c", "h", "cpp",
    "hpp", "cc", "cs", "md", "sh", "kt", "kts", "ktm", "rs", "go", "rb",
    "php", "swift", "scala", "sql", "json", "yaml", "yml", "toml", "xml",
];

/// Which files a walk admits.
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    include_all_files: bool,
    exclude: Option<GlobSet>,
}

impl FileFilter {
    /// # Errors
    ///
    /// Returns [`Error::Config`] if an exclude pattern is not a valid glob.
    pub fn new(include_all_files: bool, exclude: &[String]) -> Result<Self> {
        let exclude = if exclude.is_empty() {
            None
        } else {
            let mut builder = GlobSetBuilder::new();
            for pattern in exclude {
                let glob = Glob::new(pattern).map_err(|e| {
                    Error::Config(format!("invalid exclude glob {pattern}: {e}"))
                })?;
                builder.add(glob);
            }
            Some(builder.build().map_err(|e| {
                Error::Config(format!("invalid exclude globs: {e}"))
            })?)
        };

        Ok(Self {
            include_all_files,
            exclude,
        })
    }

    fn admits(&self, relative: &Path) -> bool {
        if self.exclude.as_ref().is_some_and(|set| set.is_match(relative)) {
            return false;
        }
        self.include_all_files || has_supported_extension(relative)
    }
}

fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(ext))
        })
}

/// Recursively walk `root` and return the admitted files, sorted by
/// relative path.
///
/// Hidden files and directories (names starting with `.`) are skipped.
/// Symlinks to files are followed; symlinks to directories are not.
pub fn discover_files(
    root: &Path,
    filter: &FileFilter,
) -> Result<Vec<DiscoveredFile>> {
    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, filter, &mut results)?;
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    filter: &FileFilter,
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let file_name = entry.file_name();
        if file_name.to_string_lossy().starts_with('.') {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            walk_dir(root, &path, filter, results)?;
        } else if file_type.is_symlink() {
            let Ok(resolved) = path.canonicalize() else {
                tracing::debug!(path = %path.display(), "skipping broken symlink");
                continue;
            };
            if resolved.is_file() && filter.admits(&relative) {
                results.push(DiscoveredFile {
                    relative_path: relative,
                    absolute_path: resolved,
                });
            }
        } else if file_type.is_file() && filter.admits(&relative) {
            results.push(DiscoveredFile {
                relative_path: relative,
                absolute_path: path,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(files: &[DiscoveredFile]) -> Vec<String> {
        files.iter().map(DiscoveredFile::display_name).collect()
    }

    #[test]
    fn admits_source_extensions_only() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("main.py"), "print()").unwrap();
        std::fs::write(tmp.path().join("App.KT"), "fun main()").unwrap();
        std::fs::write(tmp.path().join("image.png"), "binary").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "text").unwrap();

        let files = discover_files(tmp.path(), &FileFilter::default()).unwrap();
        assert_eq!(names(&files), vec!["App.KT", "main.py"]);
    }

    #[test]
    fn include_all_files_admits_everything() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("image.png"), "binary").unwrap();
        std::fs::write(tmp.path().join("Makefile"), "all:").unwrap();

        let filter = FileFilter::new(true, &[]).unwrap();
        let files = discover_files(tmp.path(), &filter).unwrap();
        assert_eq!(names(&files), vec!["Makefile", "image.png"]);
    }

    #[test]
    fn skips_hidden_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let git = tmp.path().join(".git");
        std::fs::create_dir(&git).unwrap();
        std::fs::write(git.join("hook.sh"), "#!/bin/sh").unwrap();
        std::fs::write(tmp.path().join(".env.sh"), "X=1").unwrap();
        std::fs::write(tmp.path().join("run.sh"), "echo").unwrap();

        let files = discover_files(tmp.path(), &FileFilter::default()).unwrap();
        assert_eq!(names(&files), vec!["run.sh"]);
    }

    #[test]
    fn nested_paths_use_forward_slashes() {
        let tmp = tempfile::tempdir().unwrap();
        let sub = tmp.path().join("src").join("core");
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(sub.join("lib.rs"), "").unwrap();
        std::fs::write(tmp.path().join("a.md"), "").unwrap();

        let files = discover_files(tmp.path(), &FileFilter::default()).unwrap();
        assert_eq!(names(&files), vec!["a.md", "src/core/lib.rs"]);
    }

    #[test]
    fn exclude_globs_remove_matches() {
        let tmp = tempfile::tempdir().unwrap();
        let vendor = tmp.path().join("vendor");
        std::fs::create_dir(&vendor).unwrap();
        std::fs::write(vendor.join("dep.js"), "").unwrap();
        std::fs::write(tmp.path().join("app.js"), "").unwrap();
        std::fs::write(tmp.path().join("app.test.js"), "").unwrap();

        let filter = FileFilter::new(
            false,
            &["vendor/**".to_string(), "*.test.js".to_string()],
        )
        .unwrap();
        let files = discover_files(tmp.path(), &filter).unwrap();
        assert_eq!(names(&files), vec!["app.js"]);
    }

    #[test]
    fn invalid_glob_is_config_error() {
        let result = FileFilter::new(false, &["a[".to_string()]);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[cfg(unix)]
    #[test]
    fn follows_file_symlinks_but_not_directory_symlinks() {
        let tmp = tempfile::tempdir().unwrap();
        let real = tmp.path().join("real");
        std::fs::create_dir(&real).unwrap();
        std::fs::write(real.join("x.rs"), "").unwrap();
        std::os::unix::fs::symlink(real.join("x.rs"), tmp.path().join("y.rs"))
            .unwrap();
        std::os::unix::fs::symlink(&real, tmp.path().join("loop")).unwrap();

        let files = discover_files(tmp.path(), &FileFilter::default()).unwrap();
        assert_eq!(names(&files), vec!["real/x.rs", "y.rs"]);
    }

    #[test]
    fn empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let files = discover_files(tmp.path(), &FileFilter::default()).unwrap();
        assert!(files.is_empty());
    }
}
