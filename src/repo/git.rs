//! Working-copy synchronization via libgit2.
//!
//! These functions block; callers run them through `spawn_blocking`.

use std::path::Path;

use anyhow::{Context as _, Result};
use git2::{build::CheckoutBuilder, Cred, FetchOptions, RemoteCallbacks, Repository};

/// What `sync_working_copy` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    Cloned,
    Updated,
}

/// Clone the repository when the working copy is absent, otherwise fetch
/// `origin` and fast-forward the current branch.
///
/// `token` authenticates https transports the way forges expect OAuth
/// tokens: username `oauth2`, token as password. `None` = anonymous.
pub fn sync_working_copy(
    workdir: &Path,
    clone_url: &str,
    token: Option<&str>,
) -> Result<SyncKind> {
    if workdir.join(".git").is_dir() {
        let repo = Repository::open(workdir)
            .with_context(|| format!("cannot open working copy at {}", workdir.display()))?;
        fast_forward_pull(&repo, token)
            .with_context(|| format!("cannot update working copy at {}", workdir.display()))?;
        Ok(SyncKind::Updated)
    } else {
        if let Some(parent) = workdir.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut builder = git2::build::RepoBuilder::new();
        builder.fetch_options(fetch_options(token));
        builder
            .clone(clone_url, workdir)
            .with_context(|| format!("cannot clone {clone_url}"))?;
        Ok(SyncKind::Cloned)
    }
}

fn fetch_options(token: Option<&str>) -> FetchOptions<'_> {
    let mut callbacks = RemoteCallbacks::new();
    if let Some(token) = token {
        let token = token.to_string();
        callbacks.credentials(move |_url, _username, _allowed| {
            Cred::userpass_plaintext("oauth2", &token)
        });
    }
    let mut options = FetchOptions::new();
    options.remote_callbacks(callbacks);
    options
}

fn fast_forward_pull(repo: &Repository, token: Option<&str>) -> Result<()> {
    let mut remote = repo
        .find_remote("origin")
        .context("working copy has no origin remote")?;
    // Empty refspec list = the remote's configured refspecs.
    remote.fetch(&[] as &[&str], Some(&mut fetch_options(token)), None)?;

    let fetch_head = repo.find_reference("FETCH_HEAD")?;
    let fetch_commit = repo.reference_to_annotated_commit(&fetch_head)?;
    let (analysis, _) = repo.merge_analysis(&[&fetch_commit])?;

    if analysis.is_up_to_date() {
        return Ok(());
    }
    if !analysis.is_fast_forward() {
        // Local commits in a managed working copy mean someone edited it by
        // hand; refuse rather than merge.
        anyhow::bail!("working copy has diverged from origin — not fast-forwardable");
    }

    let head_name = repo
        .head()?
        .name()
        .map(str::to_string)
        .context("HEAD has no name")?;
    let mut reference = repo.find_reference(&head_name)?;
    reference.set_target(fetch_commit.id(), "fast-forward")?;
    repo.set_head(&head_name)?;
    repo.checkout_head(Some(CheckoutBuilder::default().force()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Signature;

    /// Init a local repository with one commit so it can serve as a clone
    /// source over the file transport.
    fn seed_origin(dir: &Path) -> Repository {
        let repo = Repository::init(dir).unwrap();
        std::fs::write(dir.join("README.md"), "# spoon\n").unwrap();
        commit_all(&repo, "initial");
        repo
    }

    fn commit_all(repo: &Repository, message: &str) {
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = Signature::now("test", "test@example.com").unwrap();
        let parent = repo
            .head()
            .ok()
            .and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<_> = parent.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap();
    }

    #[test]
    fn clones_when_absent_then_updates_in_place() {
        let origin_dir = tempfile::tempdir().unwrap();
        let origin = seed_origin(origin_dir.path());

        let work_dir = tempfile::tempdir().unwrap();
        let workdir = work_dir.path().join("repo");
        let url = origin_dir.path().to_str().unwrap().to_string();

        let first = sync_working_copy(&workdir, &url, None).unwrap();
        assert_eq!(first, SyncKind::Cloned);
        assert!(workdir.join("README.md").is_file());

        // New commit upstream, then a second sync must fast-forward.
        std::fs::write(origin_dir.path().join("LICENSE"), "MIT\n").unwrap();
        commit_all(&origin, "add license");

        let second = sync_working_copy(&workdir, &url, None).unwrap();
        assert_eq!(second, SyncKind::Updated);
        assert!(workdir.join("LICENSE").is_file());
    }

    #[test]
    fn update_is_a_no_op_when_already_current() {
        let origin_dir = tempfile::tempdir().unwrap();
        seed_origin(origin_dir.path());

        let work_dir = tempfile::tempdir().unwrap();
        let workdir = work_dir.path().join("repo");
        let url = origin_dir.path().to_str().unwrap().to_string();

        sync_working_copy(&workdir, &url, None).unwrap();
        let again = sync_working_copy(&workdir, &url, None).unwrap();
        assert_eq!(again, SyncKind::Updated);
    }
}
