//! Pluggable VCS driver contract plus one concrete, git-backed
//! implementation built on async `tokio::process::Command`, with an
//! inactivity watchdog distinct from outright cancellation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::identifier::SourceUrl;
use crate::version::Revision;

/// The raw ref data a driver's `list_refs` returns before the bridge/source
/// manager turn it into `PairedVersion`s.
#[derive(Clone, Debug)]
pub struct RawRef {
    pub name: String,
    pub revision: Revision,
    pub is_default_branch: bool,
    pub is_tag: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VcsKind {
    Git,
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("protocol mismatch: driver handles {expected:?}, url scheme implies otherwise")]
    ProtocolMismatch { expected: VcsKind },
    #[error("local driver error: {0}")]
    Local(String),
    #[error("remote driver error: {0}")]
    Remote(String),
    #[error("operation timed out after {0:?} of inactivity")]
    InactivityTimeout(Duration),
    #[error("operation was cancelled")]
    Cancelled,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A pluggable driver that can clone, fetch, list refs, and export a
/// revision. The source gateway programs against this trait; it never
/// invokes a VCS binary directly.
#[async_trait::async_trait]
pub trait VcsDriver: Send + Sync {
    async fn list_refs(&self, url: &SourceUrl) -> Result<Vec<RawRef>, DriverError>;
    async fn ensure_cached(&self, url: &SourceUrl, cache_dir: &Path) -> Result<(), DriverError>;
    async fn export_revision(
        &self,
        cache_dir: &Path,
        rev: &Revision,
        dest: &Path,
    ) -> Result<(), DriverError>;
    async fn revision_exists(&self, cache_dir: &Path, rev: &Revision) -> Result<bool, DriverError>;
    fn scheme(&self) -> VcsKind;
}

/// Shells out to `git`. The only VCS this crate ships a driver for; `hg`/
/// `bzr` are left as documented extension points via `VcsKind`.
pub struct ProcessVcsDriver {
    git_command: String,
    inactivity_timeout: Duration,
    // Serializes side-effecting ops per cache directory, matching "only
    // one op with side effects executes at a time" per source.
    locks: Mutex<std::collections::HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl ProcessVcsDriver {
    pub fn new(git_command: Option<String>, inactivity_timeout: Duration) -> Self {
        Self {
            git_command: git_command.unwrap_or_else(|| "git".to_string()),
            inactivity_timeout,
            locks: Mutex::new(std::collections::HashMap::new()),
        }
    }

    async fn lock_for(&self, dir: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(dir.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Runs a git subprocess under the inactivity watchdog: if no output
    /// appears on stdout or stderr for `inactivity_timeout`, the process is
    /// killed and a distinct timeout error is returned rather than a
    /// generic non-zero exit.
    async fn run_watched(&self, args: &[&str], cwd: Option<&Path>) -> Result<String, DriverError> {
        let mut command = Command::new(&self.git_command);
        command.args(args);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }
        command.stdout(std::process::Stdio::piped());
        command.stderr(std::process::Stdio::piped());

        debug!("running git {}", args.join(" "));

        let mut child = command.spawn()?;
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let last_activity = Arc::new(Mutex::new(Instant::now()));
        let mut out_lines = BufReader::new(stdout).lines();
        let mut err_lines = BufReader::new(stderr).lines();
        let mut collected = String::new();
        let mut collected_err = String::new();

        loop {
            let activity = last_activity.clone();
            let timeout = self.inactivity_timeout;
            tokio::select! {
                line = out_lines.next_line() => {
                    match line {
                        Ok(Some(l)) => {
                            collected.push_str(&l);
                            collected.push('\n');
                            *activity.lock().await = Instant::now();
                        }
                        Ok(None) => {}
                        Err(e) => return Err(DriverError::Io(e)),
                    }
                }
                line = err_lines.next_line() => {
                    match line {
                        Ok(Some(l)) => {
                            collected_err.push_str(&l);
                            collected_err.push('\n');
                            *activity.lock().await = Instant::now();
                        }
                        Ok(None) => {}
                        Err(e) => return Err(DriverError::Io(e)),
                    }
                }
                status = child.wait() => {
                    let status = status?;
                    if !status.success() {
                        warn!("git {} failed: {}", args.join(" "), collected_err.trim());
                        return Err(DriverError::Local(collected_err));
                    }
                    return Ok(collected);
                }
                _ = tokio::time::sleep(timeout) => {
                    let idle_for = Instant::now().duration_since(*activity.lock().await);
                    if idle_for >= timeout {
                        let _ = child.start_kill();
                        return Err(DriverError::InactivityTimeout(timeout));
                    }
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl VcsDriver for ProcessVcsDriver {
    async fn list_refs(&self, url: &SourceUrl) -> Result<Vec<RawRef>, DriverError> {
        let url_str = url.0.as_str();
        let output = self.run_watched(&["ls-remote", url_str], None).await?;
        Ok(parse_ls_remote(&output))
    }

    async fn ensure_cached(&self, url: &SourceUrl, cache_dir: &Path) -> Result<(), DriverError> {
        let lock = self.lock_for(cache_dir).await;
        let _guard = lock.lock().await;

        if cache_dir.join("HEAD").exists() {
            self.run_watched(&["fetch", "--all", "--tags"], Some(cache_dir)).await?;
        } else {
            tokio::fs::create_dir_all(cache_dir).await?;
            self.run_watched(
                &["clone", "--mirror", url.0.as_str(), "."],
                Some(cache_dir),
            )
            .await?;
        }
        Ok(())
    }

    async fn export_revision(
        &self,
        cache_dir: &Path,
        rev: &Revision,
        dest: &Path,
    ) -> Result<(), DriverError> {
        let lock = self.lock_for(cache_dir).await;
        let _guard = lock.lock().await;

        tokio::fs::create_dir_all(dest).await?;
        self.run_watched(
            &["--work-tree", &dest.to_string_lossy(), "checkout", &rev.0, "--", "."],
            Some(cache_dir),
        )
        .await?;
        Ok(())
    }

    async fn revision_exists(&self, cache_dir: &Path, rev: &Revision) -> Result<bool, DriverError> {
        match self
            .run_watched(&["cat-file", "-e", &rev.0], Some(cache_dir))
            .await
        {
            Ok(_) => Ok(true),
            Err(DriverError::Local(_)) => Ok(false),
            Err(other) => Err(other),
        }
    }

    fn scheme(&self) -> VcsKind {
        VcsKind::Git
    }
}

fn parse_ls_remote(output: &str) -> Vec<RawRef> {
    let mut refs = Vec::new();
    let mut head_sha: Option<&str> = None;
    for line in output.lines() {
        let mut parts = line.split_whitespace();
        let (Some(sha), Some(name)) = (parts.next(), parts.next()) else {
            continue;
        };
        if name == "HEAD" {
            head_sha = Some(sha);
            continue;
        }
        let is_tag = name.starts_with("refs/tags/");
        let short_name = name
            .strip_prefix("refs/heads/")
            .or_else(|| name.strip_prefix("refs/tags/"))
            .unwrap_or(name)
            .trim_end_matches("^{}")
            .to_string();
        refs.push(RawRef {
            name: short_name,
            revision: Revision(sha.to_string()),
            is_default_branch: false,
            is_tag,
        });
    }
    // `HEAD` carries the same SHA as the remote's default branch; a branch
    // ref (not a tag) whose SHA matches it is that default branch.
    if let Some(head) = head_sha {
        if let Some(default_ref) = refs.iter_mut().find(|r| !r.is_tag && r.revision.0 == head) {
            default_ref.is_default_branch = true;
        }
    }
    refs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ls_remote_output() {
        let out = "abc123\trefs/heads/main\ndef456\trefs/tags/v1.0.0\n";
        let refs = parse_ls_remote(out);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].name, "main");
        assert!(!refs[0].is_tag);
        assert_eq!(refs[1].name, "v1.0.0");
        assert!(refs[1].is_tag);
    }

    #[test]
    fn skips_head_pseudo_ref() {
        let out = "abc123\tHEAD\nabc123\trefs/heads/main\n";
        let refs = parse_ls_remote(out);
        assert_eq!(refs.len(), 1);
    }

    #[test]
    fn marks_branch_matching_head_sha_as_default() {
        let out = "abc123\tHEAD\nabc123\trefs/heads/main\ndef456\trefs/heads/dev\nghi789\trefs/tags/v1.0.0\n";
        let refs = parse_ls_remote(out);
        let main = refs.iter().find(|r| r.name == "main").unwrap();
        let dev = refs.iter().find(|r| r.name == "dev").unwrap();
        assert!(main.is_default_branch);
        assert!(!dev.is_default_branch);
    }

    #[test]
    fn no_default_branch_marked_when_head_absent() {
        let out = "abc123\trefs/heads/main\n";
        let refs = parse_ls_remote(out);
        assert!(!refs[0].is_default_branch);
    }
}
