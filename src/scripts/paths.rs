//! Script Path Resolution
//!
//! Maps an allow-listed script name to its interpreter and to a file under
//! the scripts directory:
//!
//! ```text
//! <scripts_dir>/python/<name>.py
//! <scripts_dir>/bash/<name>.sh
//! <scripts_dir>/zsh/<name>.zsh
//! ```
//!
//! Containment is proven on canonical paths: both the candidate and the root
//! are resolved with symlinks followed, then compared component-wise. A
//! symlink inside the scripts directory that points outside of it is
//! therefore rejected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Kind of script, derived from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptType {
    Python,
    Bash,
    Zsh,
}

impl ScriptType {
    /// Detect the script type from its name.
    ///
    /// Unknown extensions fall back to Python.
    pub fn detect(name: &str) -> Self {
        if name.ends_with(".py") {
            ScriptType::Python
        } else if name.ends_with(".sh") {
            ScriptType::Bash
        } else if name.ends_with(".zsh") {
            ScriptType::Zsh
        } else {
            ScriptType::Python
        }
    }

    /// Default interpreter command
    pub fn interpreter(self) -> &'static str {
        match self {
            ScriptType::Python => "python",
            ScriptType::Bash => "bash",
            ScriptType::Zsh => "zsh",
        }
    }

    /// Subdirectory of the scripts root holding scripts of this type
    pub fn subdir(self) -> &'static str {
        self.interpreter()
    }

    /// Interpreter arguments preceding the user id and extra arguments
    pub fn leading_args(self, script_path: &Path) -> Vec<String> {
        let path = script_path.to_string_lossy().into_owned();
        match self {
            ScriptType::Python => vec!["-u".to_string(), path],
            ScriptType::Bash | ScriptType::Zsh => vec![path],
        }
    }
}

impl fmt::Display for ScriptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.subdir())
    }
}

/// Path of a script: `scripts_dir / <type subdir> / name`
pub fn script_path(name: &str, script_type: ScriptType, scripts_dir: &Path) -> PathBuf {
    scripts_dir.join(script_type.subdir()).join(name)
}

/// Whether `path` is an existing regular file inside `scripts_dir`
pub fn is_path_safe(path: &Path, scripts_dir: &Path) -> bool {
    resolve_contained(path, scripts_dir).is_some()
}

/// Canonical form of `path` if it is a regular file inside `scripts_dir`
///
/// Returns `None` if either path cannot be resolved, the file escapes the
/// root, or it is not a regular file.
pub fn resolve_contained(path: &Path, scripts_dir: &Path) -> Option<PathBuf> {
    let root = scripts_dir.canonicalize().ok()?;
    let candidate = path.canonicalize().ok()?;

    if !candidate.starts_with(&root) {
        return None;
    }

    let metadata = std::fs::metadata(&candidate).ok()?;
    if !metadata.is_file() {
        return None;
    }

    Some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scripts_root() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for sub in ["python", "bash", "zsh"] {
            fs::create_dir_all(dir.path().join(sub)).unwrap();
        }
        dir
    }

    #[test]
    fn test_detect_script_type() {
        assert_eq!(ScriptType::detect("test.py"), ScriptType::Python);
        assert_eq!(ScriptType::detect("test.sh"), ScriptType::Bash);
        assert_eq!(ScriptType::detect("test.zsh"), ScriptType::Zsh);
        assert_eq!(ScriptType::detect("test"), ScriptType::Python);
        assert_eq!(ScriptType::detect("test.backup.py"), ScriptType::Python);
        assert_eq!(ScriptType::detect("test.rb"), ScriptType::Python);
    }

    #[test]
    fn test_interpreter_for_type() {
        assert_eq!(ScriptType::Python.interpreter(), "python");
        assert_eq!(ScriptType::Bash.interpreter(), "bash");
        assert_eq!(ScriptType::Zsh.interpreter(), "zsh");
    }

    #[test]
    fn test_script_path() {
        let root = Path::new("/test/scripts");
        assert_eq!(
            script_path("test.py", ScriptType::Python, root),
            root.join("python").join("test.py")
        );
        assert_eq!(
            script_path("test.sh", ScriptType::Bash, root),
            root.join("bash").join("test.sh")
        );
        assert_eq!(
            script_path("test.zsh", ScriptType::Zsh, root),
            root.join("zsh").join("test.zsh")
        );
    }

    #[test]
    fn test_leading_args() {
        let path = Path::new("/test/path/script.py");
        assert_eq!(
            ScriptType::Python.leading_args(path),
            vec!["-u".to_string(), "/test/path/script.py".to_string()]
        );
        assert_eq!(
            ScriptType::Bash.leading_args(path),
            vec!["/test/path/script.py".to_string()]
        );
        assert_eq!(
            ScriptType::Zsh.leading_args(path),
            vec!["/test/path/script.py".to_string()]
        );
    }

    #[test]
    fn test_existing_script_is_safe() {
        let root = scripts_root();
        fs::write(root.path().join("bash/ok.sh"), "echo ok\n").unwrap();

        let path = script_path("ok.sh", ScriptType::Bash, root.path());
        assert!(is_path_safe(&path, root.path()));
    }

    #[test]
    fn test_missing_script_is_unsafe() {
        let root = scripts_root();
        let path = script_path("missing.py", ScriptType::Python, root.path());
        assert!(!is_path_safe(&path, root.path()));
    }

    #[test]
    fn test_directory_is_unsafe() {
        let root = scripts_root();
        fs::create_dir_all(root.path().join("python/dir.py")).unwrap();
        let path = script_path("dir.py", ScriptType::Python, root.path());
        assert!(!is_path_safe(&path, root.path()));
    }

    #[test]
    fn test_trailing_separator_on_root() {
        let root = scripts_root();
        fs::write(root.path().join("python/ok.py"), "print('ok')\n").unwrap();

        let with_slash = PathBuf::from(format!("{}/", root.path().display()));
        let path = script_path("ok.py", ScriptType::Python, root.path());
        assert!(is_path_safe(&path, &with_slash));
    }

    #[test]
    fn test_traversal_outside_root_is_unsafe() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("scripts");
        fs::create_dir_all(root.join("python")).unwrap();
        fs::write(outer.path().join("secret.py"), "print('x')\n").unwrap();

        let escaping = root.join("python").join("..").join("..").join("secret.py");
        assert!(!is_path_safe(&escaping, &root));
    }

    #[test]
    fn test_sibling_with_common_prefix_is_unsafe() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("scripts");
        let sibling = outer.path().join("scripts-evil");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&sibling).unwrap();
        fs::write(sibling.join("x.py"), "print('x')\n").unwrap();

        assert!(!is_path_safe(&sibling.join("x.py"), &root));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escaping_root_is_unsafe() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("scripts");
        fs::create_dir_all(root.join("bash")).unwrap();
        let target = outer.path().join("outside.sh");
        fs::write(&target, "echo pwned\n").unwrap();
        std::os::unix::fs::symlink(&target, root.join("bash/link.sh")).unwrap();

        let path = script_path("link.sh", ScriptType::Bash, &root);
        assert!(!is_path_safe(&path, &root));
    }

    #[test]
    fn test_resolve_contained_is_absolute() {
        let root = scripts_root();
        fs::write(root.path().join("zsh/ok.zsh"), "echo ok\n").unwrap();
        let path = script_path("ok.zsh", ScriptType::Zsh, root.path());
        let resolved = resolve_contained(&path, root.path()).unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("zsh/ok.zsh"));
    }

    #[test]
    fn test_display() {
        assert_eq!(ScriptType::Python.to_string(), "python");
        assert_eq!(ScriptType::Zsh.to_string(), "zsh");
    }
}
