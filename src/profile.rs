//! User profile (C11): per-user directories for tile/thumb caches, the
//! empty-database template, credential store, sync bookmarks and tags
//! (§6.1). Follows an `AppConfig::load_or_create` / `ensure_directories`
//! style config loader, retargeted at the `$HOME/.ddb/` layout.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{FsError, Result};

/// One stored credential pair for a registry host (`auth.json`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthEntry {
    /// `base64("user:pass")`, matching the on-disk format in §6.1.
    pub auth: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthFile {
    pub auths: HashMap<String, AuthEntry>,
}

/// Resolves and manages `$HOME/.ddb/`: `auth.json`, `thumbs/<size>/`,
/// `tiles/<crc64>/`, `templates/`.
#[derive(Debug, Clone)]
pub struct UserProfile {
    root: PathBuf,
}

const EMPTY_DB_TEMPLATE_VERSION: u32 = 1;

impl UserProfile {
    /// Resolves the profile root via the `dirs` crate's home-directory
    /// lookup.
    pub fn resolve() -> Result<UserProfile> {
        let home = dirs::home_dir()
            .ok_or_else(|| FsError::NotFound(PathBuf::from("$HOME")))?;
        Ok(UserProfile::at(home.join(".ddb")))
    }

    /// Builds a profile rooted at an explicit directory (used by tests).
    pub fn at(root: PathBuf) -> UserProfile {
        UserProfile { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn auth_path(&self) -> PathBuf {
        self.root.join("auth.json")
    }

    pub fn thumbs_dir(&self, size: u32) -> PathBuf {
        self.root.join("thumbs").join(size.to_string())
    }

    pub fn tiles_dir(&self, cache_key: &str) -> PathBuf {
        self.root.join("tiles").join(cache_key)
    }

    pub fn remote_download_path(&self, cache_key: &str, ext: &str) -> PathBuf {
        self.root.join("tiles").join(format!("{cache_key}.{ext}"))
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.root.join("templates")
    }

    pub fn empty_dbase_template_path(&self) -> PathBuf {
        self.templates_dir()
            .join(format!("empty-dbase-{EMPTY_DB_TEMPLATE_VERSION}.sqlite"))
    }

    /// Ensures `thumbs/`, `tiles/`, `templates/` exist under the profile
    /// root, creating any that are missing.
    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(FsError::Io)?;
        fs::create_dir_all(self.root.join("thumbs")).map_err(FsError::Io)?;
        fs::create_dir_all(self.root.join("tiles")).map_err(FsError::Io)?;
        fs::create_dir_all(self.templates_dir()).map_err(FsError::Io)?;
        Ok(())
    }

    /// Loads `auth.json`, returning an empty store if it doesn't exist yet.
    pub fn load_auth(&self) -> Result<AuthFile> {
        let path = self.auth_path();
        if !path.exists() {
            return Ok(AuthFile::default());
        }
        let json = fs::read_to_string(&path).map_err(FsError::Io)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn save_auth(&self, auth: &AuthFile) -> Result<()> {
        self.ensure_directories()?;
        let json = serde_json::to_string_pretty(auth)?;
        fs::write(self.auth_path(), json).map_err(FsError::Io)?;
        info!(path = %self.auth_path().display(), "saved credential store");
        Ok(())
    }

    /// Stores `user:pass` for `registry_url`, base64-encoded per §6.1.
    pub fn set_credentials(&self, registry_url: &str, username: &str, password: &str) -> Result<()> {
        let mut auth = self.load_auth()?;
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(format!("{username}:{password}"));
        auth.auths.insert(registry_url.to_string(), AuthEntry { auth: encoded });
        self.save_auth(&auth)
    }

    pub fn credentials(&self, registry_url: &str) -> Result<Option<(String, String)>> {
        let auth = self.load_auth()?;
        let Some(entry) = auth.auths.get(registry_url) else {
            return Ok(None);
        };
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&entry.auth)
            .map_err(|e| crate::error::DdbError::Other(format!("corrupt auth entry: {e}")))?;
        let decoded = String::from_utf8(decoded)
            .map_err(|e| crate::error::DdbError::Other(format!("corrupt auth entry: {e}")))?;
        match decoded.split_once(':') {
            Some((user, pass)) => Ok(Some((user.to_string(), pass.to_string()))),
            None => {
                warn!(registry_url, "malformed auth entry, ignoring");
                Ok(None)
            }
        }
    }

    pub fn clear_credentials(&self, registry_url: &str) -> Result<()> {
        let mut auth = self.load_auth()?;
        auth.auths.remove(registry_url);
        self.save_auth(&auth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let profile = UserProfile::at(dir.path().to_path_buf());
        profile
            .set_credentials("https://hub.example.com", "alice", "hunter2")
            .unwrap();
        let (user, pass) = profile
            .credentials("https://hub.example.com")
            .unwrap()
            .unwrap();
        assert_eq!(user, "alice");
        assert_eq!(pass, "hunter2");
    }

    #[test]
    fn tiles_dir_is_scoped_by_cache_key() {
        let profile = UserProfile::at(PathBuf::from("/home/u/.ddb"));
        assert_eq!(
            profile.tiles_dir("abc123"),
            PathBuf::from("/home/u/.ddb/tiles/abc123")
        );
    }
}
