//! Root URI resolution and best-effort path canonicalization
//!
//! Nothing in this module fails: anything that cannot be resolved is kept
//! in its literal or lexically normalized form, so a guard built from it
//! degrades to string comparison instead of erroring.

use percent_encoding::percent_decode_str;
use std::path::{Component, Path, PathBuf};
use tracing::trace;
use url::Url;

const FILE_SCHEME: &str = "file";

/// Whether `uri` uses the `file` scheme
pub fn is_file_uri(uri: &str) -> bool {
    Url::parse(uri)
        .map(|url| url.scheme() == FILE_SCHEME)
        .unwrap_or(false)
}

/// Resolve a root URI to the path a guard compares against
///
/// `file` URIs become absolute, best-effort canonical paths. Every other
/// scheme, and anything that does not parse as a URL, is kept as an opaque
/// path with only `.` and `..` folded.
pub fn root_uri_to_path(uri: &str) -> PathBuf {
    match Url::parse(uri) {
        Ok(url) if url.scheme() == FILE_SCHEME => {
            let resolved = canonicalize_best_effort(&file_url_to_path(&url));
            trace!(uri, path = %resolved.display(), "Resolved file root");
            resolved
        }
        _ => normalize_lexically(Path::new(uri)),
    }
}

/// Resolve a guard candidate to its comparable form
///
/// A candidate spelled as a URI (`scheme://...`) goes through
/// [`root_uri_to_path`], so opaque roots can be matched and `file` URIs
/// are accepted in place of paths. Anything else is a filesystem path and
/// is canonicalized as far as possible.
pub fn resolve_candidate(candidate: &Path) -> PathBuf {
    match candidate.to_str() {
        Some(text) if text.contains("://") && Url::parse(text).is_ok() => root_uri_to_path(text),
        _ => canonicalize_best_effort(candidate),
    }
}

/// Convert a parsed `file` URL to a filesystem path without touching the disk
fn file_url_to_path(url: &Url) -> PathBuf {
    let decoded = percent_decode_str(url.path()).decode_utf8_lossy();
    let host = url
        .host_str()
        .filter(|host| !host.is_empty() && !host.eq_ignore_ascii_case("localhost"));

    match host {
        // file://~/projects
        Some("~") => home_relative(decoded.trim_start_matches('/')),
        Some(host) if cfg!(windows) => {
            PathBuf::from(format!(r"\\{}{}", host, decoded.replace('/', "\\")))
        }
        Some(host) => PathBuf::from(format!("//{}{}", host, decoded)),
        None => local_path(&decoded),
    }
}

fn local_path(decoded: &str) -> PathBuf {
    // file:///~/projects
    if decoded == "/~" || decoded.starts_with("/~/") {
        return home_relative(decoded[2..].trim_start_matches('/'));
    }

    // file:///C:/Users -> C:/Users
    if cfg!(windows) {
        let bytes = decoded.as_bytes();
        if bytes.len() >= 3 && bytes[0] == b'/' && bytes[1].is_ascii_alphabetic() && bytes[2] == b':'
        {
            return PathBuf::from(&decoded[1..]);
        }
    }

    PathBuf::from(decoded)
}

fn home_relative(rest: &str) -> PathBuf {
    match dirs::home_dir() {
        Some(home) if rest.is_empty() => home,
        Some(home) => home.join(rest),
        None => PathBuf::from("~").join(rest),
    }
}

/// Expand a leading `~` component to the user's home directory
fn expand_home(path: &Path) -> PathBuf {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(first)) if first == "~" => match dirs::home_dir() {
            Some(home) => home.join(components.as_path()),
            None => path.to_path_buf(),
        },
        _ => path.to_path_buf(),
    }
}

/// Canonicalize `path` as far as the filesystem allows
///
/// Relative paths are anchored at the current directory. Existing paths are
/// fully canonicalized (symlinks resolved). For paths that do not exist
/// yet, the deepest existing ancestor is canonicalized and the remaining
/// components are appended after lexical normalization.
pub fn canonicalize_best_effort(path: &Path) -> PathBuf {
    let expanded = expand_home(path);
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(expanded),
            Err(_) => expanded,
        }
    };

    if let Ok(canonical) = absolute.canonicalize() {
        return canonical;
    }

    let normalized = normalize_lexically(&absolute);
    let mut existing = normalized.as_path();
    let mut missing = Vec::new();
    loop {
        if let Ok(base) = existing.canonicalize() {
            return missing
                .iter()
                .rev()
                .fold(base, |acc: PathBuf, name| acc.join(name));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name);
                existing = parent;
            }
            _ => return normalized.clone(),
        }
    }
}

/// Resolve `.` and `..` without consulting the filesystem
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let last = out.components().next_back();
                let at_name = matches!(last, Some(Component::Normal(_)));
                let at_root = matches!(last, Some(Component::RootDir | Component::Prefix(_)));
                if at_name {
                    out.pop();
                } else if !at_root {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_non_file_uris_are_opaque() {
        assert_eq!(
            root_uri_to_path("https://example.com/repo"),
            PathBuf::from("https://example.com/repo")
        );
        assert_eq!(root_uri_to_path("not a uri"), PathBuf::from("not a uri"));
        assert_eq!(
            root_uri_to_path("memory://workspace/./a/../b"),
            PathBuf::from("memory://workspace/b")
        );
        assert!(!is_file_uri("https://example.com"));
        assert!(is_file_uri("file:///tmp"));
    }

    #[cfg(unix)]
    #[test]
    fn test_candidates_spelled_as_uris() {
        assert_eq!(
            resolve_candidate(Path::new("memory://workspace/notes")),
            PathBuf::from("memory://workspace/notes")
        );
        assert_eq!(
            resolve_candidate(Path::new("file:///nonexistent-root/a")),
            PathBuf::from("/nonexistent-root/a")
        );
        // Not a URI: anchored at the current directory
        let relative = resolve_candidate(Path::new("memory/workspace"));
        assert!(relative.is_absolute());
    }

    #[cfg(unix)]
    #[test]
    fn test_percent_decoding() {
        let path = root_uri_to_path("file:///nonexistent%20dir/sub%2Bdir");
        assert_eq!(path, PathBuf::from("/nonexistent dir/sub+dir"));
    }

    #[cfg(unix)]
    #[test]
    fn test_localhost_is_local() {
        assert_eq!(
            root_uri_to_path("file://localhost/nonexistent/a"),
            PathBuf::from("/nonexistent/a")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_remote_host_prefix() {
        let path = file_url_to_path(&Url::parse("file://fileserver/share/docs").unwrap());
        assert_eq!(path, PathBuf::from("//fileserver/share/docs"));
    }

    #[test]
    fn test_home_expansion() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        assert_eq!(
            file_url_to_path(&Url::parse("file:///~/projects").unwrap()),
            home.join("projects")
        );
        assert_eq!(expand_home(Path::new("~/notes")), home.join("notes"));
    }

    #[test]
    fn test_lexical_normalization() {
        assert_eq!(
            normalize_lexically(Path::new("/a/./b/../c")),
            PathBuf::from("/a/c")
        );
        assert_eq!(normalize_lexically(Path::new("/../a")), PathBuf::from("/a"));
        assert_eq!(normalize_lexically(Path::new("../a")), PathBuf::from("../a"));
    }

    #[test]
    fn test_missing_tail_is_appended_to_canonical_ancestor() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("does_not_exist").join("file.txt");

        let canonical = canonicalize_best_effort(&missing);
        assert!(canonical.starts_with(temp_dir.path().canonicalize().unwrap()));
        assert!(canonical.ends_with("does_not_exist/file.txt"));
    }

    #[test]
    fn test_dot_dot_cannot_escape_through_missing_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let sneaky = temp_dir.path().join("missing").join("..").join("..").join("x");

        let canonical = canonicalize_best_effort(&sneaky);
        let parent = temp_dir.path().canonicalize().unwrap();
        assert!(!canonical.starts_with(&parent));
        assert!(canonical.ends_with("x"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_resolved() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("target");
        std::fs::create_dir(&target).unwrap();
        let link = temp_dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        assert_eq!(
            canonicalize_best_effort(&link.join("new.txt")),
            target.canonicalize().unwrap().join("new.txt")
        );
    }
}
