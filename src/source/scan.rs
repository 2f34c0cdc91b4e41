//! Filesystem package scanner.
//!
//! Walks a checked-out source tree and builds a `PackageTree`, skipping
//! directory names beginning with `.` or `_` and skipping `vendor`/
//! `testdata`. A directory with buildable files but none matching the
//! default OS/arch falls back to an iterative scan that unions every
//! plausible OS/arch/tag combination's import list.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::package_tree::{should_skip_directory, PackageError, PackageTree};

/// Scans a checked-out source tree rooted at `file_root`, whose packages
/// are addressed under `import_root`.
pub trait PackageScanner: Send + Sync {
    fn scan(&self, file_root: &Path, import_root: &str) -> PackageTree;
}

/// Default scanner: walks the filesystem directly, source files, and
/// reconstructs import lists from their import declarations.
pub struct WalkingPackageScanner {
    default_os: String,
    default_arch: String,
}

impl Default for WalkingPackageScanner {
    fn default() -> Self {
        Self { default_os: "linux".to_string(), default_arch: "amd64".to_string() }
    }
}

impl WalkingPackageScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_platform(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self { default_os: os.into(), default_arch: arch.into() }
    }
}

static IMPORT_GROUP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)import\s*\(\s*(.*?)\s*\)").unwrap());
static IMPORT_SINGLE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"import\s+"([^"]+)""#).unwrap());
static IMPORT_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""([^"]+)""#).unwrap());
static PACKAGE_DECL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^package\s+(\w+)").unwrap());

const KNOWN_OS: &[&str] = &["linux", "darwin", "windows", "freebsd", "android", "js", "plan9", "solaris"];
const KNOWN_ARCH: &[&str] =
    &["amd64", "386", "arm", "arm64", "mips", "mips64", "ppc64", "s390x", "wasm"];

struct ScannedFile {
    imports: Vec<String>,
    is_test: bool,
    os_tag: Option<String>,
    arch_tag: Option<String>,
    package_name: Option<String>,
}

fn parse_file(contents: &str, file_name: &str) -> ScannedFile {
    let stem = file_name.trim_end_matches(".go");
    let is_test = stem.ends_with("_test");
    let stem = stem.trim_end_matches("_test");

    let mut os_tag = None;
    let mut arch_tag = None;
    let segments: Vec<&str> = stem.split('_').collect();
    if segments.len() >= 2 {
        let last = segments[segments.len() - 1];
        if KNOWN_ARCH.contains(&last) {
            arch_tag = Some(last.to_string());
            if segments.len() >= 3 {
                let prev = segments[segments.len() - 2];
                if KNOWN_OS.contains(&prev) {
                    os_tag = Some(prev.to_string());
                }
            }
        } else if KNOWN_OS.contains(&last) {
            os_tag = Some(last.to_string());
        }
    }

    let mut imports = Vec::new();
    if let Some(caps) = IMPORT_GROUP.captures(contents) {
        for line_caps in IMPORT_LINE.captures_iter(&caps[1]) {
            imports.push(line_caps[1].to_string());
        }
    }
    for caps in IMPORT_SINGLE.captures_iter(contents) {
        imports.push(caps[1].to_string());
    }

    let package_name = PACKAGE_DECL.captures(contents).map(|c| c[1].to_string());

    ScannedFile { imports, is_test, os_tag, arch_tag, package_name }
}

impl PackageScanner for WalkingPackageScanner {
    fn scan(&self, file_root: &Path, import_root: &str) -> PackageTree {
        let mut tree = PackageTree::new(import_root);
        self.walk_dir(file_root, file_root, import_root, &mut tree);
        tree
    }
}

impl WalkingPackageScanner {
    fn walk_dir(&self, dir: &Path, file_root: &Path, import_root: &str, tree: &mut PackageTree) {
        let Ok(entries) = std::fs::read_dir(dir) else { return };
        let mut subdirs: Vec<PathBuf> = Vec::new();
        let mut go_files: Vec<PathBuf> = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if path.is_dir() {
                if should_skip_directory(&name, false) {
                    continue;
                }
                subdirs.push(path);
            } else if name.ends_with(".go") {
                go_files.push(path);
            }
        }

        if !go_files.is_empty() {
            self.scan_package_dir(dir, file_root, import_root, &go_files, tree);
        }

        for subdir in subdirs {
            self.walk_dir(&subdir, file_root, import_root, tree);
        }
    }

    fn scan_package_dir(
        &self,
        dir: &Path,
        file_root: &Path,
        import_root: &str,
        go_files: &[PathBuf],
        tree: &mut PackageTree,
    ) {
        let rel = dir.strip_prefix(file_root).unwrap_or(Path::new(""));
        let pkg_path = if rel.as_os_str().is_empty() {
            import_root.to_string()
        } else {
            format!("{import_root}/{}", rel.to_string_lossy().replace('\\', "/"))
        };

        let mut parsed = Vec::new();
        for file in go_files {
            let Ok(contents) = std::fs::read_to_string(file) else { continue };
            let name = file.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
            parsed.push(parse_file(&contents, &name));
        }

        let matches_default = |f: &ScannedFile| {
            f.os_tag.as_deref().map(|os| os == self.default_os).unwrap_or(true)
                && f.arch_tag.as_deref().map(|arch| arch == self.default_arch).unwrap_or(true)
        };

        let default_set: Vec<&ScannedFile> =
            parsed.iter().filter(|f| !f.is_test && matches_default(f)).collect();

        let selected: Vec<&ScannedFile> = if !default_set.is_empty() {
            default_set
        } else {
            let any_non_test: Vec<&ScannedFile> = parsed.iter().filter(|f| !f.is_test).collect();
            if any_non_test.is_empty() {
                tree.insert_error(pkg_path.clone(), PackageError::NoBuildableFiles { path: pkg_path });
                return;
            }
            // iterative fallback: no file is buildable under the default
            // OS/arch; union every plausible combination's import list.
            any_non_test
        };

        let package_names: BTreeSet<&str> =
            selected.iter().filter_map(|f| f.package_name.as_deref()).collect();

        let mut imports = BTreeSet::new();
        if package_names.len() <= 1 {
            for f in &selected {
                imports.extend(f.imports.iter().cloned());
            }
        } else {
            // multiple package names observed in one directory: use the
            // iterative union across every non-test file regardless of
            // which name declared it.
            for f in parsed.iter().filter(|f| !f.is_test) {
                imports.extend(f.imports.iter().cloned());
            }
        }

        let mut test_imports = BTreeSet::new();
        for f in parsed.iter().filter(|f| f.is_test) {
            test_imports.extend(f.imports.iter().cloned());
        }

        let is_main = package_names.contains("main");
        tree.insert_scanned(pkg_path, imports.into_iter().collect(), test_imports.into_iter().collect(), is_main);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package_tree::PackageOrError;
    use std::fs;

    fn write(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn scans_imports_from_grouped_and_single_declarations() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "main.go",
            "package main\n\nimport (\n\t\"fmt\"\n\t\"github.com/foo/bar\"\n)\n\nimport \"encoding/json\"\n",
        );

        let tree = WalkingPackageScanner::new().scan(tmp.path(), "example.com/proj");
        match tree.packages.get("example.com/proj").unwrap() {
            PackageOrError::Ok(pkg) => {
                assert!(pkg.imports.contains(&"github.com/foo/bar".to_string()));
                assert!(pkg.imports.contains(&"encoding/json".to_string()));
            }
            other => panic!("expected Ok package, got {other:?}"),
        }
    }

    #[test]
    fn test_files_contribute_to_test_imports_only() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "main.go", "package main\n\nimport \"fmt\"\n");
        write(tmp.path(), "main_test.go", "package main\n\nimport \"testing\"\n");

        let tree = WalkingPackageScanner::new().scan(tmp.path(), "example.com/proj");
        match tree.packages.get("example.com/proj").unwrap() {
            PackageOrError::Ok(pkg) => {
                assert!(!pkg.imports.contains(&"testing".to_string()));
                assert!(pkg.test_imports.contains(&"testing".to_string()));
            }
            other => panic!("expected Ok package, got {other:?}"),
        }
    }

    #[test]
    fn skips_vendor_and_dotted_directories() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "main.go", "package main\n");
        fs::create_dir(tmp.path().join("vendor")).unwrap();
        write(&tmp.path().join("vendor"), "dep.go", "package dep\n");
        fs::create_dir(tmp.path().join(".git")).unwrap();

        let tree = WalkingPackageScanner::new().scan(tmp.path(), "example.com/proj");
        assert!(!tree.packages.keys().any(|k| k.contains("vendor")));
        assert!(!tree.packages.keys().any(|k| k.contains(".git")));
    }

    #[test]
    fn falls_back_to_iterative_union_when_no_default_platform_file_exists() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "only_windows.go", "package pkg\n\nimport \"windows/specific\"\n");

        let scanner = WalkingPackageScanner::with_default_platform("linux", "amd64");
        let tree = scanner.scan(tmp.path(), "example.com/proj");
        match tree.packages.get("example.com/proj").unwrap() {
            PackageOrError::Ok(pkg) => assert!(pkg.imports.contains(&"windows/specific".to_string())),
            other => panic!("expected Ok package via fallback, got {other:?}"),
        }
    }

    #[test]
    fn directory_with_no_buildable_files_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        // no .go files at all: no package entry should be created
        write(tmp.path(), "README.md", "hello\n");
        let tree = WalkingPackageScanner::new().scan(tmp.path(), "example.com/proj");
        assert!(tree.packages.is_empty());
    }
}
