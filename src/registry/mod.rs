//! Registry client (C10): login/token lifetime, pull/push sync protocol
//! against a remote dataset (§4.6).

pub mod types;

use std::path::Path;
use std::time::Duration;

use reqwest::multipart;
use reqwest::StatusCode;
use tracing::{debug, info, warn};

use crate::delta::{get_delta, Conflict, MergeStrategy};
use crate::error::{RegistryError, Result};
use crate::index::stamp::Stamp;
use crate::index::IndexDatabase;
use crate::meta::MetaItem;
use crate::profile::UserProfile;

pub use types::*;

const MAX_RETRIES: u32 = 10;

/// `(token, expires_at)` plus the credentials used to mint it, so a client
/// can silently re-login when the token lapses (§4.6.2).
#[derive(Debug, Clone)]
struct Session {
    token: String,
    expires_at: i64,
}

/// One logical connection to a registry + org/dataset tag.
pub struct RegistryClient {
    http: reqwest::Client,
    base_url: String,
    org: String,
    dataset: String,
    profile: UserProfile,
    session: std::sync::Mutex<Option<Session>>,
}

impl RegistryClient {
    pub fn new(base_url: &str, org: &str, dataset: &str, profile: UserProfile) -> RegistryClient {
        RegistryClient {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            org: org.to_string(),
            dataset: dataset.to_string(),
            profile,
            session: std::sync::Mutex::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `POST /users/authenticate` (§4.6.1): logs in and stores the bearer
    /// token, independent of the stored-credential path below.
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        let resp = self
            .http
            .post(self.url("/users/authenticate"))
            .json(&serde_json::json!({ "username": username, "password": password }))
            .send()
            .await
            .map_err(RegistryError::Network)?;

        if resp.status() == StatusCode::UNAUTHORIZED {
            return Err(RegistryError::BadCredentials.into());
        }
        let body: AuthResponse = resp.json().await.map_err(RegistryError::Network)?;
        *self.session.lock().unwrap() = Some(Session { token: body.token, expires_at: body.expires });
        self.profile.set_credentials(&self.base_url, username, password)?;
        Ok(())
    }

    /// Ensures a valid bearer token is present, re-logging in from stored
    /// credentials when expired or absent (§4.6.2).
    async fn ensure_token(&self) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        {
            let guard = self.session.lock().unwrap();
            if let Some(session) = guard.as_ref() {
                if session.expires_at > now {
                    return Ok(session.token.clone());
                }
            }
        }
        let (user, pass) = self
            .profile
            .credentials(&self.base_url)?
            .ok_or_else(|| RegistryError::NoCredentials(self.base_url.clone()))?;
        self.login(&user, &pass).await?;
        let guard = self.session.lock().unwrap();
        Ok(guard.as_ref().expect("login just populated session").token.clone())
    }

    /// Runs `op` with a valid bearer token, retrying once on a 401 after a
    /// forced re-login (§4.6.2).
    async fn authorized<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(String) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let token = self.ensure_token().await?;
        match op(token).await {
            Err(crate::error::DdbError::Registry(RegistryError::Unauthorized)) => {
                *self.session.lock().unwrap() = None;
                let token = self.ensure_token().await?;
                op(token).await
            }
            other => other,
        }
    }

    /// `GET /orgs/<o>/ds/<d>` (§4.6.1): the endpoint returns an array of
    /// matching datasets; the contract is to take the first.
    pub async fn dataset_info(&self) -> Result<DatasetInfo> {
        let url = self.url(&format!("/orgs/{}/ds/{}", self.org, self.dataset));
        self.authorized(|token| {
            let url = url.clone();
            async move {
                let resp = self.http.get(&url).bearer_auth(token).send().await.map_err(RegistryError::Network)?;
                check_status(&resp)?;
                let mut infos: Vec<DatasetInfo> = resp.json().await.map_err(RegistryError::Network)?;
                if infos.is_empty() {
                    return Err(RegistryError::Server("dataset not found".into()).into());
                }
                Ok(infos.remove(0))
            }
        })
        .await
    }

    /// `GET /orgs/<o>/ds/<d>/ddb` (§4.6.1): a ZIP of the dataset's `.ddb/`
    /// folder, the bootstrap payload for `clone`.
    async fn download_ddb_zip(&self) -> Result<Vec<u8>> {
        let url = self.url(&format!("/orgs/{}/ds/{}/ddb", self.org, self.dataset));
        self.authorized(|token| {
            let url = url.clone();
            async move {
                let resp = self.http.get(&url).bearer_auth(token).send().await.map_err(RegistryError::Network)?;
                check_status(&resp)?;
                Ok(resp.bytes().await.map_err(RegistryError::Network)?.to_vec())
            }
        })
        .await
    }

    /// `clone(dest_dir)` (§6.2 `clone`): fetches dataset info and the
    /// `.ddb/` ZIP, extracts it under `dest_dir/.ddb`, and tags the new
    /// working copy so a later `pull` knows which remote it came from. Does
    /// not download dataset files themselves — those are fetched lazily by
    /// the first `pull`, matching the original's clone-then-pull idiom.
    pub async fn clone_dataset(&self, dest_dir: &Path) -> Result<()> {
        let _info = self.dataset_info().await?;
        let zip_bytes = self.download_ddb_zip().await?;

        let ddb_dir = dest_dir.join(crate::pathutils::DDB_FOLDER);
        std::fs::create_dir_all(&ddb_dir)?;
        extract_zip(&zip_bytes, &ddb_dir)?;

        let tag = Tag {
            registry_url: self.base_url.clone(),
            org: self.org.clone(),
            dataset: self.dataset.clone(),
        };
        crate::tags::write_tag(dest_dir, &tag)?;
        info!(dest = %dest_dir.display(), "cloned dataset");
        Ok(())
    }

    /// `GET /orgs/<o>/ds/<d>/download?path=<p>` for a single file, or
    /// `POST .../download` with a joined `path` for several, which returns a
    /// ZIP (§4.6.1). `pull`'s per-file loop uses the single-file form;
    /// this multi-file form is exposed for bulk callers (e.g. a `get`
    /// command spanning several paths).
    pub async fn download_files(&self, paths: &[String], dest_dir: &Path) -> Result<()> {
        if paths.len() == 1 {
            let dest = dest_dir.join(&paths[0]);
            return self.download_file(&paths[0], &dest).await;
        }
        let url = self.url(&format!("/orgs/{}/ds/{}/download", self.org, self.dataset));
        let joined = paths.join(",");
        let zip_bytes: Vec<u8> = self
            .with_retries(|| {
                let url = url.clone();
                let joined = joined.clone();
                async move {
                    let token = self.ensure_token().await?;
                    let resp = self
                        .http
                        .post(&url)
                        .bearer_auth(token)
                        .form(&[("path", joined.as_str())])
                        .send()
                        .await
                        .map_err(RegistryError::Network)?;
                    check_status(&resp)?;
                    Ok(resp.bytes().await.map_err(RegistryError::Network)?.to_vec())
                }
            })
            .await?;
        extract_zip(&zip_bytes, dest_dir)
    }

    /// `GET /orgs/<o>/ds/<d>/stamp` (§4.6.1).
    pub async fn remote_stamp(&self) -> Result<Stamp> {
        let url = self.url(&format!("/orgs/{}/ds/{}/stamp", self.org, self.dataset));
        self.authorized(|token| {
            let url = url.clone();
            async move {
                let resp = self.http.get(&url).bearer_auth(token).send().await.map_err(RegistryError::Network)?;
                check_status(&resp)?;
                Ok(resp.json::<Stamp>().await.map_err(RegistryError::Network)?)
            }
        })
        .await
    }

    /// `POST /orgs/<o>/ds/<d>/meta/dump` (§4.6.1).
    pub async fn meta_dump(&self, ids: &[uuid::Uuid]) -> Result<Vec<MetaItem>> {
        let url = self.url(&format!("/orgs/{}/ds/{}/meta/dump", self.org, self.dataset));
        let body = serde_json::json!({ "ids": ids });
        self.authorized(|token| {
            let url = url.clone();
            let body = body.clone();
            async move {
                let resp = self
                    .http
                    .post(&url)
                    .bearer_auth(token)
                    .json(&body)
                    .send()
                    .await
                    .map_err(RegistryError::Network)?;
                check_status(&resp)?;
                Ok(resp.json::<Vec<MetaItem>>().await.map_err(RegistryError::Network)?)
            }
        })
        .await
    }

    /// `GET /orgs/<o>/ds/<d>/download?path=<p>` for a single file (§4.6.1).
    pub async fn download_file(&self, path: &str, dest: &Path) -> Result<()> {
        let url = self.url(&format!(
            "/orgs/{}/ds/{}/download?path={}",
            self.org,
            self.dataset,
            urlencode(path)
        ));
        self.with_retries(|| {
            let url = url.clone();
            let dest = dest.to_path_buf();
            async move {
                let token = self.ensure_token().await?;
                let resp = self.http.get(&url).bearer_auth(token).send().await.map_err(RegistryError::Network)?;
                check_status(&resp)?;
                let bytes = resp.bytes().await.map_err(RegistryError::Network)?;
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&dest, &bytes)?;
                Ok(())
            }
        })
        .await
    }

    /// Retries `op` up to `MAX_RETRIES` times on transport errors, sleeping
    /// `1000 * attempt` ms between attempts (§4.6.5).
    async fn with_retries<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(crate::error::DdbError::Registry(RegistryError::Network(e))) if attempt < MAX_RETRIES => {
                    attempt += 1;
                    warn!(attempt, error = %e, "registry transport error, retrying");
                    tokio::time::sleep(Duration::from_millis(1000 * attempt as u64)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Push protocol (§4.6.4): `push/init` → upload needed meta/files →
    /// `push/commit`.
    pub async fn push(
        &self,
        db: &IndexDatabase,
        last_known_remote: &Stamp,
        our_stamp: &Stamp,
    ) -> Result<()> {
        let init_url = self.url(&format!("/orgs/{}/ds/{}/push/init", self.org, self.dataset));
        let body = serde_json::json!({ "checksum": last_known_remote.checksum, "stamp": our_stamp });

        let init: PushInitResponse = self
            .authorized(|token| {
                let url = init_url.clone();
                let body = body.clone();
                async move {
                    let resp = self
                        .http
                        .post(&url)
                        .bearer_auth(token)
                        .json(&body)
                        .send()
                        .await
                        .map_err(RegistryError::Network)?;
                    check_status(&resp)?;
                    Ok(resp.json::<PushInitResponse>().await.map_err(RegistryError::Network)?)
                }
            })
            .await?;

        if init.pull_required.unwrap_or(false) {
            return Err(RegistryError::PullRequired.into());
        }

        if !init.needed_meta.is_empty() {
            let meta_manager = crate::meta::MetaManager::new(db.db());
            let dump = meta_manager.dump(&init.needed_meta).await?;
            let meta_url = self.url(&format!("/orgs/{}/ds/{}/push/meta", self.org, self.dataset));
            let body = serde_json::json!({ "meta": dump, "token": init.token });
            self.authorized(|token| {
                let url = meta_url.clone();
                let body = body.clone();
                async move {
                    let resp = self
                        .http
                        .post(&url)
                        .bearer_auth(token)
                        .json(&body)
                        .send()
                        .await
                        .map_err(RegistryError::Network)?;
                    check_status(&resp)?;
                    Ok(())
                }
            })
            .await?;
        }

        // Uploads are sequentialized within a push to bound memory and
        // simplify retry state (§5).
        for rel_path in &init.needed_files {
            let abs = db.root().join(rel_path);
            self.upload_file(&abs, rel_path, &init.token).await?;
        }

        let commit_url = self.url(&format!("/orgs/{}/ds/{}/push/commit", self.org, self.dataset));
        let body = serde_json::json!({ "token": init.token });
        self.authorized(|token| {
            let url = commit_url.clone();
            let body = body.clone();
            async move {
                let resp = self
                    .http
                    .post(&url)
                    .bearer_auth(token)
                    .json(&body)
                    .send()
                    .await
                    .map_err(RegistryError::Network)?;
                check_status(&resp)?;
                Ok(())
            }
        })
        .await?;

        info!(files = init.needed_files.len(), "push committed");
        Ok(())
    }

    async fn upload_file(&self, abs: &Path, rel_path: &str, push_token: &str) -> Result<()> {
        let url = self.url(&format!("/orgs/{}/ds/{}/push/upload", self.org, self.dataset));
        self.with_retries(|| {
            let url = url.clone();
            let rel_path = rel_path.to_string();
            let push_token = push_token.to_string();
            async move {
                let token = self.ensure_token().await?;
                let bytes = std::fs::read(abs)?;
                let part = multipart::Part::bytes(bytes).file_name(rel_path.clone());
                let form = multipart::Form::new()
                    .part("file", part)
                    .text("path", rel_path)
                    .text("token", push_token);
                let resp = self
                    .http
                    .post(&url)
                    .bearer_auth(token)
                    .multipart(form)
                    .send()
                    .await
                    .map_err(RegistryError::Network)?;
                check_status(&resp)?;
                Ok(())
            }
        })
        .await
    }

    /// Pull protocol (§4.6.3): diff remote stamp against the last-known
    /// remote stamp, fetch needed meta/files, apply the delta.
    pub async fn pull(
        &self,
        db: &IndexDatabase,
        last_known_remote: &Stamp,
        strategy: MergeStrategy,
    ) -> Result<PullOutcome> {
        let remote_stamp = self.remote_stamp().await?;
        let delta = get_delta(&remote_stamp, last_known_remote);

        if delta.adds.is_empty() && delta.removes.is_empty() && delta.meta_adds.is_empty() && delta.meta_removes.is_empty() {
            debug!("pull: already up to date");
            return Ok(PullOutcome { up_to_date: true, conflicts: Vec::new(), new_stamp: remote_stamp });
        }

        let meta_dump = self.meta_dump(&delta.meta_adds).await?;

        let tmp_dir = db.root().join(".ddb").join("tmp").join("pull");
        std::fs::create_dir_all(&tmp_dir)?;
        for add in &delta.adds {
            if add.is_directory {
                continue;
            }
            let local_reuse = find_local_reuse_by_hash(db, &add.hash).await?;
            if local_reuse.is_none() {
                let dest = tmp_dir.join(&add.path);
                self.download_file(&add.path, &dest).await?;
            }
        }

        let conflicts: Vec<Conflict> =
            crate::delta::apply_delta(&delta, &tmp_dir, db, strategy, &meta_dump).await?;

        Ok(PullOutcome { up_to_date: false, conflicts, new_stamp: remote_stamp })
    }

    /// Full `pull` surface (§4.6.3 steps 1, 8): reads `sync.json` for the
    /// last-known bookmark, pulls, and on a conflict-free result persists
    /// the new remote stamp as the bookmark — the steps `pull` alone
    /// doesn't do, since it's handed `last_known_remote` directly.
    pub async fn pull_dataset(&self, db: &IndexDatabase, strategy: MergeStrategy) -> Result<PullOutcome> {
        let last_known = crate::tags::last_known_stamp(db.root(), &self.base_url)?;
        let outcome = self.pull(db, &last_known, strategy).await?;
        if outcome.conflicts.is_empty() {
            crate::tags::set_last_known_stamp(db.root(), &self.base_url, &outcome.new_stamp)?;
        }
        Ok(outcome)
    }

    /// Full `push` surface (§4.6.4 steps 1, 6): reads `sync.json` for the
    /// last-known bookmark, pushes our current stamp, and on success
    /// persists it as the new bookmark.
    pub async fn push_dataset(&self, db: &IndexDatabase) -> Result<()> {
        let last_known = crate::tags::last_known_stamp(db.root(), &self.base_url)?;
        let our_stamp = db.stamp().await?;
        self.push(db, &last_known, &our_stamp).await?;
        crate::tags::set_last_known_stamp(db.root(), &self.base_url, &our_stamp)?;
        Ok(())
    }
}

/// Extracts a ZIP archive's bytes into `dest_dir`, creating parent
/// directories as needed (§6.4 "downloads are ... a ZIP (multi-file)").
fn extract_zip(bytes: &[u8], dest_dir: &Path) -> Result<()> {
    let cursor = std::io::Cursor::new(bytes);
    let mut archive =
        zip::ZipArchive::new(cursor).map_err(|e| RegistryError::Server(format!("corrupt zip: {e}")))?;
    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| RegistryError::Server(format!("corrupt zip entry: {e}")))?;
        let Some(relative) = file.enclosed_name() else {
            continue;
        };
        let out_path = dest_dir.join(relative);
        if file.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out_file = std::fs::File::create(&out_path)?;
        std::io::copy(&mut file, &mut out_file)?;
    }
    Ok(())
}

async fn find_local_reuse_by_hash(db: &IndexDatabase, hash: &str) -> Result<Option<std::path::PathBuf>> {
    if hash.is_empty() {
        return Ok(None);
    }
    let matches = db.list(&["*".to_string()], None).await?;
    Ok(matches
        .into_iter()
        .find(|e| e.hash == hash)
        .map(|e| db.root().join(e.path)))
}

fn check_status(resp: &reqwest::Response) -> Result<()> {
    match resp.status() {
        StatusCode::UNAUTHORIZED => Err(RegistryError::Unauthorized.into()),
        s if s.is_success() => Ok(()),
        s => Err(RegistryError::Server(format!("HTTP {s}")).into()),
    }
}

fn urlencode(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            c if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~' | '/') => c.to_string(),
            c => format!("%{:02X}", c as u32),
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct PullOutcome {
    pub up_to_date: bool,
    pub conflicts: Vec<Conflict>,
    pub new_stamp: Stamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlencode_escapes_spaces_and_keeps_slashes() {
        assert_eq!(urlencode("a b/c.jpg"), "a%20b/c.jpg");
    }
}
