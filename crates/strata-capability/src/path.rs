use std::path::{Component, Path, PathBuf};

/// Resolve `.` and `..` without touching the filesystem.
///
/// Relative paths are joined to `root` first. `..` never climbs above the
/// filesystem root.
pub fn normalize(root: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// True when `path` lies at or under `prefix`, comparing whole components.
pub fn is_within(path: &Path, prefix: &Path) -> bool {
    path.starts_with(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_segments_are_resolved() {
        let root = Path::new("/srv/tree");
        assert_eq!(
            normalize(root, Path::new("a/./b/../c")),
            PathBuf::from("/srv/tree/a/c")
        );
        assert_eq!(
            normalize(root, Path::new("../../etc/passwd")),
            PathBuf::from("/etc/passwd")
        );
    }

    #[test]
    fn parent_never_escapes_filesystem_root() {
        assert_eq!(
            normalize(Path::new("/"), Path::new("/../../x")),
            PathBuf::from("/x")
        );
    }

    #[test]
    fn prefix_match_is_per_component() {
        assert!(is_within(Path::new("/srv/core/a"), Path::new("/srv/core")));
        assert!(!is_within(Path::new("/srv/core2/a"), Path::new("/srv/core")));
    }
}
