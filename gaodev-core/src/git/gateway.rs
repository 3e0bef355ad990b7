//! Working-tree wrapper, generalized from the teacher's `harness::
//! git_manager::GitManager` (subprocess `git`, retry-with-backoff for
//! transient failures) into the full §4.2 contract: staging, atomic
//! commits with co-authors, tags, branches, and status.

use crate::error::{GaoError, GaoResult};
use std::path::{Path, PathBuf};
use std::process::Command;

const DEFAULT_MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 100;

/// One line of `git status --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStatus {
    pub path: String,
    pub index_status: char,
    pub worktree_status: char,
}

/// Conventional-commit types allowed by §6's commit message grammar.
pub const COMMIT_TYPES: &[&str] = &["feat", "fix", "docs", "refactor", "test", "chore", "perf"];

pub struct GitGateway {
    working_dir: PathBuf,
    max_retries: u32,
}

impl GitGateway {
    pub fn new(working_dir: impl AsRef<Path>) -> GaoResult<Self> {
        let working_dir = working_dir.as_ref().to_path_buf();
        let gw = Self {
            working_dir,
            max_retries: DEFAULT_MAX_RETRIES,
        };
        gw.refuse_source_tree()?;
        Ok(gw)
    }

    /// §4.2 safety: refuse to operate against GAO-Dev's own source tree.
    fn refuse_source_tree(&self) -> GaoResult<()> {
        let marker = self.working_dir.join(".gaodev-source");
        if marker.exists() {
            return Err(GaoError::SourceTreeDetected {
                path: self.working_dir.clone(),
            });
        }
        Ok(())
    }

    fn run_git(&self, args: &[&str]) -> GaoResult<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.working_dir)
            .output()
            .map_err(|e| GaoError::git(args.join(" "), e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GaoError::git(args.join(" "), stderr.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Retries transient-looking failures (lock contention) with
    /// exponential backoff: 100ms, 200ms, 400ms, ...
    fn run_git_with_retry(&self, args: &[&str]) -> GaoResult<String> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            match self.run_git(args) {
                Ok(out) => return Ok(out),
                Err(e) => {
                    let retryable = matches!(&e, GaoError::Git { message, .. } if message.contains("index.lock"));
                    if retryable && attempt < self.max_retries {
                        let delay = RETRY_BASE_DELAY_MS * (1 << attempt);
                        std::thread::sleep(std::time::Duration::from_millis(delay));
                        last_error = Some(e);
                    } else {
                        return Err(e);
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| GaoError::git("retry", "max retries exceeded")))
    }

    pub fn stage(&self, paths: &[&str]) -> GaoResult<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut args = vec!["add", "--"];
        args.extend(paths);
        self.run_git_with_retry(&args)?;
        Ok(())
    }

    pub fn stage_all(&self) -> GaoResult<()> {
        self.run_git_with_retry(&["add", "-A"])?;
        Ok(())
    }

    /// Create an atomic commit. `co_authors` are rendered as trailer lines
    /// per §6's grammar (`Co-Authored-By: Name <email>`).
    pub fn commit(
        &self,
        message: &str,
        author_identity: Option<(&str, &str)>,
        co_authors: &[(&str, &str)],
    ) -> GaoResult<String> {
        validate_commit_message(message)?;

        if !self.has_uncommitted_changes()? {
            return Err(GaoError::git("commit", "nothing to commit"));
        }

        let mut full_message = message.to_string();
        if !co_authors.is_empty() {
            full_message.push_str("\n\n");
            for (name, email) in co_authors {
                full_message.push_str(&format!("Co-Authored-By: {name} <{email}>\n"));
            }
        }

        let mut args = vec!["commit", "-m", full_message.as_str()];
        if let Some((name, email)) = author_identity {
            let author_flag = format!("{name} <{email}>");
            args.extend(["--author", author_flag.as_str()]);
        }
        self.run_git_with_retry(&args)?;

        self.current_commit_full()
    }

    pub fn tag(&self, name: &str, sha: &str) -> GaoResult<()> {
        self.run_git_with_retry(&["tag", "-f", name, sha])?;
        Ok(())
    }

    pub fn delete_tag(&self, name: &str) -> GaoResult<()> {
        self.run_git_with_retry(&["tag", "-d", name])?;
        Ok(())
    }

    pub fn current_branch(&self) -> GaoResult<String> {
        self.run_git(&["rev-parse", "--abbrev-ref", "HEAD"])
    }

    pub fn create_branch(&self, name: &str) -> GaoResult<()> {
        self.run_git_with_retry(&["branch", name])?;
        Ok(())
    }

    pub fn checkout(&self, reference: &str) -> GaoResult<()> {
        self.run_git_with_retry(&["checkout", reference])?;
        Ok(())
    }

    pub fn current_commit_full(&self) -> GaoResult<String> {
        self.run_git(&["rev-parse", "HEAD"])
    }

    pub fn is_clean(&self) -> GaoResult<bool> {
        Ok(!self.has_uncommitted_changes()?)
    }

    pub fn has_uncommitted_changes(&self) -> GaoResult<bool> {
        let status = self.run_git(&["status", "--porcelain"])?;
        Ok(!status.is_empty())
    }

    pub fn status(&self) -> GaoResult<Vec<FileStatus>> {
        let raw = self.run_git(&["status", "--porcelain"])?;
        Ok(raw
            .lines()
            .filter(|l| l.len() > 3)
            .map(|line| {
                let mut chars = line.chars();
                let index_status = chars.next().unwrap_or(' ');
                let worktree_status = chars.next().unwrap_or(' ');
                let path = line[3..].to_string();
                FileStatus {
                    path,
                    index_status,
                    worktree_status,
                }
            })
            .collect())
    }

    /// Hard reset to a given ref — used by crash-recovery (§8 S6) to undo a
    /// commit whose paired SQL write never landed.
    pub fn reset_hard(&self, reference: &str) -> GaoResult<()> {
        self.run_git_with_retry(&["reset", "--hard", reference])?;
        Ok(())
    }
}

/// §6 commit message grammar: `^(feat|fix|docs|refactor|test|chore|perf)\(([^)]+)\): (.+)$`.
pub fn validate_commit_message(message: &str) -> GaoResult<()> {
    let first_line = message.lines().next().unwrap_or("");
    let Some(paren_open) = first_line.find('(') else {
        return Err(GaoError::git("commit", format!("invalid commit message: {first_line}")));
    };
    let commit_type = &first_line[..paren_open];
    if !COMMIT_TYPES.contains(&commit_type) {
        return Err(GaoError::git(
            "commit",
            format!("invalid commit type '{commit_type}'"),
        ));
    }
    let Some(paren_close) = first_line.find(')') else {
        return Err(GaoError::git("commit", format!("invalid commit message: {first_line}")));
    };
    if paren_close < paren_open {
        return Err(GaoError::git("commit", format!("invalid commit message: {first_line}")));
    }
    let rest = &first_line[paren_close + 1..];
    if !rest.starts_with(": ") || rest.len() <= 2 {
        return Err(GaoError::git("commit", format!("invalid commit message: {first_line}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn setup_repo() -> (tempfile::TempDir, GitGateway) {
        let dir = tempdir().unwrap();
        for args in [
            vec!["init"],
            vec!["config", "user.email", "test@test.com"],
            vec!["config", "user.name", "Test"],
        ] {
            Command::new("git").args(&args).current_dir(dir.path()).output().unwrap();
        }
        std::fs::write(dir.path().join("README.md"), "# Test").unwrap();
        Command::new("git").args(["add", "."]).current_dir(dir.path()).output().unwrap();
        Command::new("git")
            .args(["commit", "-m", "chore(init): seed repo"])
            .current_dir(dir.path())
            .output()
            .unwrap();

        let gw = GitGateway::new(dir.path()).unwrap();
        (dir, gw)
    }

    #[test]
    fn commit_message_grammar() {
        assert!(validate_commit_message("feat(core): add widget").is_ok());
        assert!(validate_commit_message("oops: no type").is_err());
        assert!(validate_commit_message("feat core missing paren").is_err());
    }

    #[test]
    fn refuses_source_tree() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(".gaodev-source"), "").unwrap();
        let err = GitGateway::new(dir.path()).unwrap_err();
        assert!(matches!(err, GaoError::SourceTreeDetected { .. }));
    }

    #[test]
    fn commit_roundtrips_and_stages() {
        let (dir, gw) = setup_repo();
        std::fs::write(dir.path().join("feature.txt"), "content").unwrap();
        gw.stage_all().unwrap();
        let sha = gw
            .commit(
                "feat(epic-1): story 1.1 - widget",
                None,
                &[("Agent Bot", "agent@example.com")],
            )
            .unwrap();
        assert!(!sha.is_empty());
        assert!(gw.is_clean().unwrap());
    }

    #[test]
    fn commit_with_no_changes_fails() {
        let (_dir, gw) = setup_repo();
        let err = gw.commit("chore(x): nothing", None, &[]).unwrap_err();
        assert!(matches!(err, GaoError::Git { .. }));
    }

    #[test]
    fn tag_and_delete_tag() {
        let (_dir, gw) = setup_repo();
        let sha = gw.current_commit_full().unwrap();
        gw.tag("checkpoint-1", &sha).unwrap();
        gw.delete_tag("checkpoint-1").unwrap();
    }
}
