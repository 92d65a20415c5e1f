//! Helpers to split and compose znode paths.
//!
//! The client never validates paths: they are forwarded to the ensemble as given.
//! These helpers only exist to walk the hierarchy when ancestors need creating.

/// Return the path to the container of the given path.
///
/// The root and relative names have no container.
///
/// # Example
/// ```
/// use replicante_util_zookeeper::path::parent;
/// assert_eq!(parent("/a/b/c"), Some("/a/b"));
/// assert_eq!(parent("/a"), Some("/"));
/// assert_eq!(parent("/"), None);
/// ```
pub fn parent(path: &str) -> Option<&str> {
    match path.rfind('/') {
        None => None,
        Some(0) if path.len() == 1 => None,
        Some(0) => Some("/"),
        Some(index) => Some(&path[..index]),
    }
}

/// Return the last component of a path.
pub fn basename(path: &str) -> &str {
    match path.rfind('/') {
        None => path,
        Some(index) => &path[index + 1..],
    }
}

/// List all proper ancestors of a path, excluding the root, outermost first.
pub fn ancestors(path: &str) -> Vec<&str> {
    let mut ancestors = Vec::new();
    let mut current = parent(path);
    while let Some(ancestor) = current {
        if ancestor == "/" {
            break;
        }
        ancestors.push(ancestor);
        current = parent(ancestor);
    }
    ancestors.reverse();
    ancestors
}

#[cfg(test)]
mod tests {
    use super::ancestors;
    use super::basename;
    use super::parent;

    #[test]
    fn parent_of_nested_paths() {
        assert_eq!(parent("/a/b/c"), Some("/a/b"));
        assert_eq!(parent("/a"), Some("/"));
        assert_eq!(parent("/"), None);
        assert_eq!(parent("relative"), None);
    }

    #[test]
    fn basename_is_last_component() {
        assert_eq!(basename("/q/item-0000000001"), "item-0000000001");
        assert_eq!(basename("/"), "");
        assert_eq!(basename("name"), "name");
    }

    #[test]
    fn ancestors_outermost_first() {
        assert_eq!(ancestors("/a/b/c"), vec!["/a", "/a/b"]);
        assert!(ancestors("/a").is_empty());
        assert!(ancestors("/").is_empty());
    }
}
