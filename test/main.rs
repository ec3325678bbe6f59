// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT


use anyhow::Result;
use git2::{IndexEntry, IndexTime, Repository, RepositoryInitOptions};
use multi_git_sync::{
    auth::Credentials,
    mirror::{sparse::SubPath, Depth, RepoDescriptor},
};
use ssh_key::{rand_core::OsRng, Algorithm, LineEnding, PrivateKey};
use std::{
    fs::write,
    path::{Path, PathBuf},
};
use tempfile::TempDir;

/// Local repository acting as the remote of a mirror.
pub(crate) struct RemoteFixture {
    dir: TempDir,
    repo: Repository,
    key: PathBuf,
}

impl RemoteFixture {
    /// Remote on branch `main` holding `README.md`, `foo/readme.md`, and
    /// `bar/readme.md`.
    pub(crate) fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;

        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        let repo = Repository::init_opts(dir.path().join("remote"), &opts)?;

        // INVARIANT: Always provide valid name and email.
        //   - Git will complain if this is not set in CI/CD environments.
        let mut config = repo.config()?;
        config.set_str("user.name", "John Doe")?;
        config.set_str("user.email", "john@doe.com")?;

        // File remotes go through key authentication, which never gets used,
        // but must load.
        let key = dir.path().join("id_ed25519");
        let private_key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519)?;
        write(&key, private_key.to_openssh(LineEnding::LF)?.as_bytes())?;

        let fixture = Self { dir, repo, key };
        fixture.stage_and_commit("README.md", "top level readme\n")?;
        fixture.stage_and_commit("foo/readme.md", "foo readme\n")?;
        fixture.stage_and_commit("bar/readme.md", "bar readme\n")?;

        Ok(fixture)
    }

    pub(crate) fn url(&self) -> String {
        format!("file://{}", self.dir.path().join("remote").display())
    }

    /// Fresh destination path inside fixture directory.
    pub(crate) fn dest(&self, name: &str) -> PathBuf {
        self.dir.path().join("mirrors").join(name)
    }

    pub(crate) fn head(&self) -> Result<String> {
        Ok(self.repo.head()?.peel_to_commit()?.id().to_string())
    }

    pub(crate) fn descriptor(
        &self,
        dest: impl AsRef<Path>,
        depth: u32,
        sub_path: &str,
    ) -> Result<RepoDescriptor> {
        Ok(RepoDescriptor {
            url: self.url(),
            branch: "main".into(),
            depth: Depth::new(depth),
            sub_path: SubPath::new(sub_path)?,
            dest_dir: dest.as_ref().to_path_buf(),
            credentials: Credentials {
                user: "git".into(),
                private_key_file: Some(self.key.clone()),
                ..Default::default()
            },
            schedule: "* * * * * *".parse()?,
        })
    }

    pub(crate) fn stage_and_commit(
        &self,
        filename: impl AsRef<Path>,
        contents: impl AsRef<str>,
    ) -> Result<()> {
        let entry = IndexEntry {
            ctime: IndexTime::new(0, 0),
            mtime: IndexTime::new(0, 0),
            dev: 0,
            ino: 0,
            mode: 0o100644,
            uid: 0,
            gid: 0,
            file_size: contents.as_ref().len() as u32,
            id: self.repo.blob(contents.as_ref().as_bytes())?,
            flags: 0,
            flags_extended: 0,
            path: filename
                .as_ref()
                .to_string_lossy()
                .into_owned()
                .into_bytes(),
        };

        // INVARIANT: Always use new tree produced by index after staging new entry.
        let mut index = self.repo.index()?;
        index.add_frombuffer(&entry, contents.as_ref().as_bytes())?;
        index.write()?;

        self.commit(format!("chore: update {:?}", filename.as_ref()))
    }

    pub(crate) fn remove_and_commit(&self, filename: impl AsRef<Path>) -> Result<()> {
        let mut index = self.repo.index()?;
        index.remove_path(filename.as_ref())?;
        index.write()?;

        self.commit(format!("chore: remove {:?}", filename.as_ref()))
    }

    fn commit(&self, message: impl AsRef<str>) -> Result<()> {
        let mut index = self.repo.index()?;
        let tree_oid = index.write_tree()?;
        let tree = self.repo.find_tree(tree_oid)?;

        // INVARIANT: Always determine latest parent commits to append to.
        let signature = self.repo.signature()?;
        let mut parents = Vec::new();
        if let Ok(head) = self.repo.head() {
            parents.push(head.peel_to_commit()?);
        }
        let parents = parents.iter().collect::<Vec<_>>();

        // INVARIANT: Commit to HEAD by appending to obtained parent commits.
        self.repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            message.as_ref(),
            &tree,
            &parents,
        )?;

        Ok(())
    }
}
