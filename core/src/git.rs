//! Minimal git context resolution: repo root and branch, read straight from
//! the filesystem. No subprocess, no libgit — suggestion scoping only needs
//! the root path and the HEAD ref name.

use std::path::Path;
use std::path::PathBuf;

/// Walk up from `cwd` to the nearest directory containing `.git`.
pub fn resolve_repo_root(cwd: &Path) -> Option<PathBuf> {
    let mut dir = Some(cwd);
    while let Some(current) = dir {
        if current.join(".git").exists() {
            return Some(current.to_path_buf());
        }
        dir = current.parent();
    }
    None
}

/// Current branch from `.git/HEAD`; `None` for a detached head.
pub fn read_branch(repo_root: &Path) -> Option<String> {
    let contents = std::fs::read_to_string(repo_root.join(".git/HEAD")).ok()?;
    let rest = contents.trim().strip_prefix("ref: ")?;
    rest.trim().rsplit('/').next().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn finds_root_and_branch_from_a_subdirectory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        std::fs::create_dir_all(root.join(".git")).expect("git dir");
        std::fs::write(root.join(".git/HEAD"), "ref: refs/heads/main\n").expect("head");
        std::fs::create_dir_all(root.join("src/deep")).expect("subdir");

        let found = resolve_repo_root(&root.join("src/deep")).expect("root");
        assert_eq!(found, root);
        assert_eq!(read_branch(&found).as_deref(), Some("main"));
    }

    #[test]
    fn no_repo_means_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(resolve_repo_root(dir.path()).is_none());
    }
}
