//! Virtual path utilities.
//!
//! Virtual paths are `/`-separated strings rooted at `/`, independent of the
//! host platform's path rules.

/// Joins a parent path and a child name.
pub fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        return normalize(name);
    }
    normalize(&format!("{parent}/{name}"))
}

/// Returns the parent directory of a path. The parent of `/` is `/`.
pub fn parent_of(path: &str) -> String {
    let path = normalize(path);
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(index) => path[..index].to_string(),
    }
}

/// Cleans a path: leading `/`, no empty or `.` segments, `..` resolved
/// lexically, no trailing `/` except for the root.
pub fn normalize(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        return "/".to_string();
    }
    let mut out = String::with_capacity(path.len() + 1);
    for segment in segments {
        out.push('/');
        out.push_str(segment);
    }
    out
}

/// Checks if a path should be ignored.
///
/// The rule is a plain string prefix, so `/foo/bar` also covers
/// `/foo/barista`.
pub fn path_is_ignored<S: AsRef<str>>(ignore_paths: &[S], candidate: &str) -> bool {
    ignore_paths.iter().any(|ignored| {
        let ignored = ignored.as_ref();
        !ignored.is_empty() && candidate.starts_with(ignored)
    })
}

/// True when `candidate` is `base` or lies below it (component-wise).
pub fn is_sub_path(base: &str, candidate: &str) -> bool {
    let base = normalize(base);
    let candidate = normalize(candidate);
    if base == "/" {
        return true;
    }
    candidate == base
        || (candidate.starts_with(&base) && candidate.as_bytes().get(base.len()) == Some(&b'/'))
}

/// Number of directory levels `path` lies below `root`. `None` if it is not
/// under `root` at all.
pub fn depth_below(root: &str, path: &str) -> Option<usize> {
    if !is_sub_path(root, path) {
        return None;
    }
    let count = |p: &str| normalize(p).split('/').filter(|s| !s.is_empty()).count();
    Some(count(path) - count(root))
}

/// Lowercased extension of a file name, without the dot.
pub fn extension(name: &str) -> Option<String> {
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Platform metadata files that never carry user content.
pub fn is_system_file(name: &str) -> bool {
    matches!(name, ".DS_Store" | "desktop.ini" | "Thumbs.db") || name.starts_with("._")
}
