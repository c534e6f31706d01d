//! Repository queries and single-file commits through the `git` CLI.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, WstError};
use crate::platform::command::{self, CommandOutput};

const LAST_COMMIT_FORMAT: &str = "%d.%B %Y %I:%M:%S";

/// Identity and state of the repository containing a request path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitInfo {
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub repo_root: Option<PathBuf>,
    pub active_branch: Option<String>,
    pub last_commit: Option<String>,
    pub request_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct GitCli {
    binary: PathBuf,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("git")
    }
}

impl GitCli {
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn git(&self, repo: Option<&Path>, args: &[&str]) -> Result<CommandOutput> {
        let mut full: Vec<&str> = Vec::with_capacity(args.len() + 2);
        if let Some(dir) = repo.and_then(Path::to_str) {
            full.extend(["-C", dir]);
        }
        full.extend_from_slice(args);
        command::run(&self.binary, full, None)
    }

    fn query(&self, repo: Option<&Path>, args: &[&str]) -> Option<String> {
        let output = self.git(repo, args).ok()?;
        let value = output.into_stdout("git").ok()?.trim().to_string();
        (!value.is_empty()).then_some(value)
    }

    /// Top level of the repository containing `path` (a file or directory).
    #[must_use]
    pub fn repo_root(&self, path: &Path) -> Option<PathBuf> {
        let dir = if path.is_dir() { path } else { path.parent()? };
        self.query(Some(dir), &["rev-parse", "--show-toplevel"])
            .map(PathBuf::from)
    }

    /// Repository config value (all levels), or global config without a repo.
    #[must_use]
    pub fn config_value(&self, key: &str, repo: Option<&Path>) -> Option<String> {
        match repo {
            Some(root) => self.query(Some(root), &["config", key]),
            None => self.query(None, &["config", "--global", key]),
        }
    }

    /// Write `key` to the repository config, or the global config without a repo.
    pub fn set_config(&self, key: &str, value: &str, repo: Option<&Path>) -> Result<()> {
        let output = match repo {
            Some(root) => self.git(Some(root), &["config", key, value])?,
            None => self.git(None, &["config", "--global", key, value])?,
        };
        output.into_stdout("git config").map(drop)
    }

    /// Set `user.name` and `user.email` for the repository containing `path`,
    /// or globally when there is none.
    pub fn set_identity(&self, path: Option<&Path>, name: &str, email: &str) -> Result<()> {
        let repo = path.and_then(|p| self.repo_root(p));
        self.set_config("user.email", email, repo.as_deref())?;
        self.set_config("user.name", name, repo.as_deref())
    }

    /// `None` on a detached HEAD.
    #[must_use]
    pub fn active_branch(&self, repo: &Path) -> Option<String> {
        self.query(Some(repo), &["symbolic-ref", "--short", "-q", "HEAD"])
    }

    /// Committer date of HEAD in local time.
    #[must_use]
    pub fn last_commit(&self, repo: &Path) -> Option<String> {
        let seconds = self
            .query(Some(repo), &["log", "-1", "--format=%ct"])?
            .parse::<i64>()
            .ok()?;
        let committed = Local.timestamp_opt(seconds, 0).single()?;
        Some(committed.format(LAST_COMMIT_FORMAT).to_string())
    }

    /// Info for the repository containing `path`; only the global identity
    /// without a path.
    #[must_use]
    pub fn info(&self, path: Option<&Path>) -> GitInfo {
        let repo = path.and_then(|p| self.repo_root(p));
        let root = repo.as_deref();
        GitInfo {
            user_name: self.config_value("user.name", root),
            user_email: self.config_value("user.email", root),
            active_branch: root.and_then(|r| self.active_branch(r)),
            last_commit: root.and_then(|r| self.last_commit(r)),
            repo_root: repo.clone(),
            request_path: path.map(Path::to_path_buf),
        }
    }

    /// Stage and commit one file, fast-forwarding first and pushing after.
    ///
    /// The default message is `Updated <path relative to the repo root>`.
    pub fn commit_file(&self, file: &Path, message: Option<&str>, push: bool) -> Result<()> {
        if !file.is_file() {
            return Err(WstError::invalid_input(format!(
                "File does not exist: {}",
                file.display()
            )));
        }
        let repo = self.repo_root(file).ok_or_else(|| {
            WstError::invalid_input(format!("No git repo was found for file: {}", file.display()))
        })?;
        let file_arg = file.to_string_lossy();

        self.git(Some(&repo), &["add", "--", &file_arg])?
            .into_stdout("git add")?;

        if self.config_value("user.name", Some(&repo)).is_none() {
            return Err(git_error(
                "Cannot push to remote. Please specify a name with: git config --global user.name \"YOUR NAME\"",
            ));
        }
        if self.config_value("user.email", Some(&repo)).is_none() {
            return Err(git_error(
                "Cannot push to remote. Please specify an email with: git config --global user.email \"YOUR EMAIL\"",
            ));
        }

        let message = match message.map(str::trim).filter(|m| !m.is_empty()) {
            Some(message) => message.to_string(),
            None => format!("Updated {}", relative_to(file, &repo).display()),
        };

        let pulled = self.git(Some(&repo), &["pull", "--ff-only"])?;
        if !pulled.success {
            return Err(git_error("The repo is not up-to-date or cannot be updated."));
        }

        let committed = self.git(Some(&repo), &["commit", "-m", &message, "--", &file_arg])?;
        if !committed.success {
            if is_unchanged(&committed.stdout) {
                return Err(git_error(format!(
                    "File has not been changed: {}",
                    file.display()
                )));
            }
            committed.into_stdout("git commit")?;
        }

        if push {
            let pushed = self.git(Some(&repo), &["push", "origin", "HEAD"])?;
            if !pushed.success {
                if pushed.stderr.contains("could not read Username") {
                    return Err(git_error(
                        "User is not authenticated. Please use Ungit to login via HTTPS or use SSH authentication.",
                    ));
                }
                pushed.into_stdout("git push")?;
            }
        }
        Ok(())
    }
}

fn git_error(details: impl Into<String>) -> WstError {
    WstError::Git {
        details: details.into(),
    }
}

fn is_unchanged(stdout: &str) -> bool {
    ["up-to-date with", "up to date with", "nothing to commit"]
        .iter()
        .any(|needle| stdout.contains(needle))
}

/// `file` relative to `repo`, comparing canonical paths so symlinked
/// temp directories still match.
fn relative_to(file: &Path, repo: &Path) -> PathBuf {
    let file = file.canonicalize().unwrap_or_else(|_| file.to_path_buf());
    let repo = repo.canonicalize().unwrap_or_else(|_| repo.to_path_buf());
    file.strip_prefix(&repo)
        .map_or_else(|_| file.clone(), Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn git_available() -> bool {
        command::run("git", ["--version"], None).is_ok_and(|output| output.success)
    }

    fn git(dir: &Path, args: &[&str]) -> CommandOutput {
        let output = command::run("git", args, Some(dir)).unwrap();
        assert!(output.success, "git {args:?} failed: {}", output.combined());
        output
    }

    /// A clone of a bare remote with one pushed commit and a local identity.
    fn cloned_repo() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let remote = dir.path().join("remote.git");
        let work = dir.path().join("work");
        fs::create_dir(&remote).unwrap();
        git(&remote, &["init", "--bare", "-q"]);
        git(
            dir.path(),
            &["clone", "-q", remote.to_str().unwrap(), work.to_str().unwrap()],
        );
        git(&work, &["config", "user.name", "Ada"]);
        git(&work, &["config", "user.email", "ada@example.com"]);
        git(&work, &["config", "commit.gpgsign", "false"]);
        fs::write(work.join("notes.md"), "v1\n").unwrap();
        git(&work, &["add", "notes.md"]);
        git(&work, &["commit", "-q", "-m", "init"]);
        git(&work, &["push", "-q", "-u", "origin", "HEAD"]);
        (dir, work)
    }

    #[test]
    fn unchanged_output_detection() {
        assert!(is_unchanged("Your branch is up to date with 'origin/main'."));
        assert!(is_unchanged("nothing to commit, working tree clean"));
        assert!(!is_unchanged("error: pathspec did not match"));
    }

    #[test]
    fn info_outside_repo_has_no_repo_fields() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let info = GitCli::default().info(Some(dir.path()));
        assert_eq!(info.repo_root, None);
        assert_eq!(info.active_branch, None);
        assert_eq!(info.last_commit, None);
        assert_eq!(info.request_path.as_deref(), Some(dir.path()));
    }

    #[test]
    fn info_inside_repo() {
        if !git_available() {
            return;
        }
        let (_dir, work) = cloned_repo();
        let cli = GitCli::default();
        let info = cli.info(Some(&work.join("notes.md")));
        assert_eq!(info.user_name.as_deref(), Some("Ada"));
        assert_eq!(info.user_email.as_deref(), Some("ada@example.com"));
        assert_eq!(
            info.repo_root.map(|p| p.canonicalize().unwrap()),
            Some(work.canonicalize().unwrap())
        );
        assert!(info.active_branch.is_some());
        let last = info.last_commit.unwrap();
        assert!(last.contains('.') && last.matches(':').count() == 2, "{last}");
    }

    #[test]
    fn identity_is_set_on_the_repository() {
        if !git_available() {
            return;
        }
        let (_dir, work) = cloned_repo();
        let cli = GitCli::default();
        cli.set_identity(Some(&work), "Grace", "grace@example.com").unwrap();
        let root = cli.repo_root(&work).unwrap();
        assert_eq!(cli.config_value("user.name", Some(&root)).as_deref(), Some("Grace"));
        assert_eq!(
            cli.config_value("user.email", Some(&root)).as_deref(),
            Some("grace@example.com")
        );
    }

    #[test]
    fn commit_and_push_single_file() {
        if !git_available() {
            return;
        }
        let (dir, work) = cloned_repo();
        fs::write(work.join("notes.md"), "v2\n").unwrap();

        GitCli::default()
            .commit_file(&work.join("notes.md"), None, true)
            .unwrap();

        let log = git(&dir.path().join("remote.git"), &["log", "-1", "--format=%s"]);
        assert_eq!(log.stdout.trim(), "Updated notes.md");
    }

    #[test]
    fn unchanged_file_is_reported() {
        if !git_available() {
            return;
        }
        let (_dir, work) = cloned_repo();
        let err = GitCli::default()
            .commit_file(&work.join("notes.md"), Some("noop"), false)
            .unwrap_err();
        assert!(err.to_string().contains("File has not been changed"), "{err}");
    }

    #[test]
    fn missing_file_and_missing_repo_are_input_errors() {
        let dir = tempfile::tempdir().unwrap();
        let cli = GitCli::default();
        let err = cli
            .commit_file(&dir.path().join("absent.txt"), None, false)
            .unwrap_err();
        assert!(err.to_string().contains("File does not exist"));

        if !git_available() {
            return;
        }
        fs::write(dir.path().join("loose.txt"), "x").unwrap();
        let err = cli
            .commit_file(&dir.path().join("loose.txt"), None, false)
            .unwrap_err();
        assert!(err.to_string().contains("No git repo was found"));
    }
}
