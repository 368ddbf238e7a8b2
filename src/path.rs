//! Confines client-supplied names to the served root.

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Resolve `requested` beneath `root`.
///
/// `root` must already be canonical. The join is normalized lexically first,
/// so `..`, absolute paths and drive prefixes are rejected as
/// `PathTraversal` before the filesystem is touched; whether the target
/// exists never changes that answer. If the target does exist it is
/// canonicalized and checked again, which catches symlinks pointing out of
/// the root. A target that cannot be canonicalized (missing, a file used as
/// a directory, an over-long or otherwise unusable name) resolves to its
/// lexical path and is left for the caller to report as not found.
pub fn resolve(root: &Path, requested: &str) -> Result<PathBuf> {
    let traversal = || Error::PathTraversal {
        requested: requested.to_string(),
    };

    let mut resolved = root.to_path_buf();
    let mut depth = 0usize;
    for component in Path::new(requested).components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(traversal());
                }
                resolved.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return Err(traversal()),
        }
    }

    match resolved.canonicalize() {
        Ok(canonical) if canonical.starts_with(root) => Ok(canonical),
        Ok(_) => Err(traversal()),
        Err(_) => Ok(resolved),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let canonical = dir.path().canonicalize().unwrap();
        (dir, canonical)
    }

    #[test]
    fn resolves_file_in_root() {
        let (_dir, root) = root();
        std::fs::write(root.join("a.txt"), b"x").unwrap();
        assert_eq!(resolve(&root, "a.txt").unwrap(), root.join("a.txt"));
    }

    #[test]
    fn resolves_nested_and_dotted_names() {
        let (_dir, root) = root();
        std::fs::create_dir(root.join("sub")).unwrap();
        std::fs::write(root.join("sub/b.txt"), b"x").unwrap();
        assert_eq!(resolve(&root, "sub/b.txt").unwrap(), root.join("sub/b.txt"));
        assert_eq!(resolve(&root, "./sub/../sub/b.txt").unwrap(), root.join("sub/b.txt"));
    }

    #[test]
    fn empty_name_is_the_root() {
        let (_dir, root) = root();
        assert_eq!(resolve(&root, "").unwrap(), root);
    }

    #[test]
    fn rejects_parent_escape() {
        let (_dir, root) = root();
        assert!(matches!(
            resolve(&root, "../../etc/passwd"),
            Err(Error::PathTraversal { .. })
        ));
        assert!(matches!(
            resolve(&root, "sub/../../x"),
            Err(Error::PathTraversal { .. })
        ));
    }

    #[test]
    fn rejects_missing_escape_the_same_way() {
        let (_dir, root) = root();
        assert!(matches!(
            resolve(&root, "../definitely-not-here-7f3a"),
            Err(Error::PathTraversal { .. })
        ));
    }

    #[test]
    fn rejects_absolute_path() {
        let (_dir, root) = root();
        assert!(matches!(
            resolve(&root, "/etc/passwd"),
            Err(Error::PathTraversal { .. })
        ));
    }

    #[test]
    fn missing_file_resolves_lexically() {
        let (_dir, root) = root();
        assert_eq!(resolve(&root, "nope.bin").unwrap(), root.join("nope.bin"));
    }

    #[test]
    fn unresolvable_names_stay_lexical() {
        let (_dir, root) = root();
        std::fs::write(root.join("a.txt"), b"x").unwrap();
        assert_eq!(resolve(&root, "a.txt/x").unwrap(), root.join("a.txt/x"));

        let long = "x".repeat(300);
        assert_eq!(resolve(&root, &long).unwrap(), root.join(&long));
        assert_eq!(resolve(&root, "a\0b").unwrap(), root.join("a\0b"));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_out_of_root() {
        let (_dir, root) = root();
        let (_outside_dir, outside) = self::root();
        std::fs::write(outside.join("secret"), b"s").unwrap();
        std::os::unix::fs::symlink(outside.join("secret"), root.join("link")).unwrap();
        assert!(matches!(
            resolve(&root, "link"),
            Err(Error::PathTraversal { .. })
        ));
    }
}
