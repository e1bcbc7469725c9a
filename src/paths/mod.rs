// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Path Resolver - turns a rule folder plus a filename into a destination.
//!
//! The browser only accepts paths relative to its download root at
//! interception time. Relative folders are sanitized and joined with the
//! filename. Absolute folders are split: the browser saves the bare filename
//! under its root and the file is moved to the absolute folder after
//! completion.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Folder name that means "the browser's download root".
pub const DOWNLOAD_ROOT_ALIAS: &str = "Downloads";

/// Filename used when sanitizing leaves nothing behind.
pub const FALLBACK_FILENAME: &str = "download";

/// JUSTIFICATION for .expect(): static patterns, validated by the unit tests below.
static ABSOLUTE_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(/|[A-Za-z]:[\\/])").expect("absolute path regex is valid"));

static FORBIDDEN_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"|?*\\]"#).expect("forbidden chars regex is valid"));

static DOT_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.{2,}").expect("dot run regex is valid"));

/// Where a download should end up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Destination {
    /// Path handed to the browser, relative to its download root
    pub relative_path: String,
    /// Final folder outside the browser sandbox, if any
    pub absolute_folder: Option<PathBuf>,
}

impl Destination {
    pub fn needs_post_move(&self) -> bool {
        self.absolute_folder.is_some()
    }
}

/// True for `/...`, `C:\...` and `C:/...`.
pub fn is_absolute(folder: &str) -> bool {
    ABSOLUTE_PATH.is_match(folder.trim())
}

/// Clean one path segment. Returns `None` if nothing usable is left.
pub fn sanitize_segment(segment: &str) -> Option<String> {
    let cleaned = FORBIDDEN_CHARS.replace_all(segment, "");
    let cleaned = DOT_RUNS.replace_all(&cleaned, ".");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Sanitize a relative folder into `/`-joined safe segments.
///
/// `..//My<Files>` becomes `MyFiles`.
pub fn sanitize(folder: &str) -> String {
    folder
        .replace('\\', "/")
        .split('/')
        .filter_map(sanitize_segment)
        .collect::<Vec<_>>()
        .join("/")
}

/// Sanitize a filename so it can never introduce a directory.
pub fn sanitize_filename(filename: &str) -> String {
    let flat = filename.replace(['/', '\\'], "_");
    sanitize_segment(&flat).unwrap_or_else(|| FALLBACK_FILENAME.to_string())
}

/// Join a relative folder with a filename, collapsing the download root.
pub fn build_path(folder: &str, filename: &str) -> String {
    let dir = sanitize(folder);
    let filename = sanitize_filename(filename);
    if dir.is_empty() || dir.eq_ignore_ascii_case(DOWNLOAD_ROOT_ALIAS) {
        filename
    } else {
        format!("{}/{}", dir, filename)
    }
}

/// Strip trailing separators from an absolute folder, keeping bare roots intact.
fn trim_absolute(folder: &str) -> String {
    let folder = folder.trim();
    let trimmed = folder.trim_end_matches(['/', '\\']);
    if trimmed.is_empty() {
        // "/" itself
        folder[..1].to_string()
    } else if trimmed.len() == 2 && trimmed.ends_with(':') {
        // "C:\" keeps its separator
        folder[..3].to_string()
    } else {
        trimmed.to_string()
    }
}

/// Resolve a rule folder and filename into a destination.
pub fn resolve_destination(folder: &str, filename: &str) -> Destination {
    if is_absolute(folder) {
        Destination {
            relative_path: sanitize_filename(filename),
            absolute_folder: Some(PathBuf::from(trim_absolute(folder))),
        }
    } else {
        Destination {
            relative_path: build_path(folder, filename),
            absolute_folder: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_absolute() {
        assert!(is_absolute("/home/u/Models"));
        assert!(is_absolute("C:\\Users\\u"));
        assert!(is_absolute("d:/data"));
        assert!(!is_absolute("Code/rust"));
        assert!(!is_absolute("C:relative"));
    }

    #[test]
    fn test_sanitize_strips_traversal_and_forbidden_chars() {
        assert_eq!(sanitize("..//My<Files>"), "MyFiles");
        assert_eq!(sanitize("/a/../b/"), "a/b");
        assert_eq!(sanitize("Work\\Reports\\2024"), "Work/Reports/2024");
        assert_eq!(sanitize("x..y"), "x.y");
        assert_eq!(sanitize("...///.."), "");
    }

    #[test]
    fn test_build_path_root_collapse() {
        assert_eq!(build_path("Downloads", "a.txt"), "a.txt");
        assert_eq!(build_path("downloads/", "a.txt"), "a.txt");
        assert_eq!(build_path("", "a.txt"), "a.txt");
        assert_eq!(build_path("Code", "a.png"), "Code/a.png");
        assert_eq!(build_path("//Code//Rust//", "a.rs"), "Code/Rust/a.rs");
    }

    #[test]
    fn test_filename_cannot_escape() {
        assert_eq!(build_path("Code", "../../etc/passwd"), "Code/._._etc_passwd");
        assert_eq!(sanitize_filename("<>"), FALLBACK_FILENAME);
    }

    #[test]
    fn test_absolute_destination_needs_post_move() {
        let dest = resolve_destination("/home/u/Models/", "llama.gguf");
        assert_eq!(dest.relative_path, "llama.gguf");
        assert_eq!(dest.absolute_folder, Some(PathBuf::from("/home/u/Models")));
        assert!(dest.needs_post_move());
    }

    #[test]
    fn test_absolute_roots_are_kept() {
        assert_eq!(trim_absolute("/"), "/");
        assert_eq!(trim_absolute("C:\\"), "C:\\");
        assert_eq!(trim_absolute("C:\\Data\\"), "C:\\Data");
    }

    #[test]
    fn test_relative_destination() {
        let dest = resolve_destination("Code", "a.png");
        assert_eq!(dest.relative_path, "Code/a.png");
        assert!(!dest.needs_post_move());
    }
}
