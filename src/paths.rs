//! Path normalization for the mounted tree.
//!
//! Every path crossing the [`MountSource`](crate::source::MountSource)
//! boundary is absolute, `/`-separated, and free of `.`/`..` components and
//! empty segments; the root is `"/"`. Container members arrive in all sorts
//! of shapes (`./foo`, `foo/`, `foo//bar`) and are funneled through
//! [`normalize`] exactly once, at indexing time.

use crate::{Error, Result};

/// Maximum accepted path length in bytes.
///
/// Well above any real filesystem limit; bounds memory use on hostile input.
const MAX_PATH_LENGTH: usize = 32768;

/// Normalizes a container member path to canonical absolute form.
///
/// Leading `./` runs and trailing slashes are stripped, consecutive slashes
/// collapse, lone `.` components disappear. `..` components, NUL bytes, and
/// oversized paths are rejected with [`Error::InvalidPath`].
///
/// ```
/// use arcmount::paths::normalize;
///
/// assert_eq!(normalize("./foo//bar/").unwrap(), "/foo/bar");
/// assert_eq!(normalize("/").unwrap(), "/");
/// assert!(normalize("../escape").is_err());
/// ```
pub fn normalize(path: &str) -> Result<String> {
    if path.contains('\0') {
        return Err(Error::invalid_path("contains NUL byte"));
    }
    if path.len() > MAX_PATH_LENGTH {
        return Err(Error::invalid_path(format!(
            "path exceeds maximum length of {MAX_PATH_LENGTH} bytes"
        )));
    }
    let mut out = String::with_capacity(path.len() + 1);
    for component in path.split('/') {
        match component {
            "" | "." => continue,
            ".." => return Err(Error::invalid_path(format!("'..' component in '{path}'"))),
            component => {
                out.push('/');
                out.push_str(component);
            }
        }
    }
    if out.is_empty() {
        out.push('/');
    }
    Ok(out)
}

/// Splits a normalized path into `(parent, name)`.
///
/// The root splits into `("", "")`; top-level entries have parent `"/"`.
pub fn split(path: &str) -> (&str, &str) {
    if path == "/" {
        return ("", "");
    }
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(i) => (&path[..i], &path[i + 1..]),
        None => ("/", path),
    }
}

/// Joins a normalized parent and a name.
pub fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Iterates the ancestor directories of a normalized path, nearest first,
/// excluding the path itself and the root.
///
/// `/a/b/c` yields `/a/b`, then `/a`.
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    let mut rest = path;
    std::iter::from_fn(move || match rest.rfind('/') {
        Some(i) if i > 0 => {
            rest = &rest[..i];
            Some(rest)
        }
        _ => None,
    })
}

/// Returns the components of a normalized path, root excluded.
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty())
}

/// Strips `prefix` (a normalized directory path) from `path`, returning the
/// remainder as a normalized absolute path, or `None` if `path` is not under
/// `prefix`.
pub fn strip_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix == "/" {
        return Some(path);
    }
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some("/")
    } else if rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}
