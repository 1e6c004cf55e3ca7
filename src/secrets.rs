//! Secret and credential distribution.
//!
//! A pool owns one SSH keypair, generated once and mirrored into the
//! SSH-key container, and any number of time-boxed access tokens scoped to
//! the data container. Both are persisted locally and published through
//! the secrets container so other operators can bootstrap the same pool.

use crate::cloud::Provisioner;
use crate::config::PoolSettings;
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

/// Local paths of a pool keypair.
#[derive(Debug, Clone)]
pub struct Keypair {
    pub private_key: PathBuf,
    pub public_key: PathBuf,
}

/// A SAS-equivalent access token. Expiry is advisory: enforcement happens
/// on the cloud side, and older tokens stay valid until they lapse.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires: DateTime<Utc>,
    pub path: PathBuf,
}

pub struct SecretStore {
    provisioner: Arc<Provisioner>,
    settings: Arc<PoolSettings>,
    pool: String,
}

impl SecretStore {
    pub fn new(
        provisioner: Arc<Provisioner>,
        settings: Arc<PoolSettings>,
        pool: impl Into<String>,
    ) -> Self {
        Self {
            provisioner,
            settings,
            pool: pool.into(),
        }
    }

    pub fn private_key_path(&self) -> PathBuf {
        self.settings
            .ssh_key_dir
            .join(self.settings.private_key_filename(&self.pool))
    }

    pub fn public_key_path(&self) -> PathBuf {
        self.settings
            .ssh_key_dir
            .join(self.settings.public_key_filename(&self.pool))
    }

    pub fn token_path(&self, container: &str) -> PathBuf {
        self.settings
            .secrets_dir
            .join(self.settings.token_filename(&self.pool, container))
    }

    fn keypair(&self) -> Keypair {
        Keypair {
            private_key: self.private_key_path(),
            public_key: self.public_key_path(),
        }
    }

    /// Generate the pool keypair. An existing private key is never
    /// overwritten; re-running pool creation keeps the original keys.
    pub fn generate_keypair(&self) -> Result<Keypair> {
        std::fs::create_dir_all(&self.settings.ssh_key_dir)?;
        let keypair = self.keypair();

        if keypair.private_key.exists() {
            tracing::info!(
                key = %keypair.private_key.display(),
                "keypair already exists, skipping generation"
            );
            return Ok(keypair);
        }

        let comment = format!("{}@{}.az-vm-pool", self.settings.vm_user, self.pool);
        let status = Command::new("ssh-keygen")
            .args(["-t", "rsa", "-q", "-N", ""])
            .arg("-f")
            .arg(&keypair.private_key)
            .arg("-C")
            .arg(&comment)
            .status()
            .map_err(|e| Error::Secrets(format!("failed to spawn ssh-keygen: {}", e)))?;
        if !status.success() {
            return Err(Error::Secrets(format!(
                "could not generate keypair for pool '{}'",
                self.pool
            )));
        }
        Ok(keypair)
    }

    /// Upload both key files to the SSH-key container.
    pub fn publish_keypair(&self) -> Result<()> {
        let keypair = self.keypair();
        let container = &self.settings.ssh_key_container;

        let private_name = self.settings.private_key_filename(&self.pool);
        self.provisioner
            .upload_blob(container, &keypair.private_key, &private_name)?;
        tracing::info!(blob = %private_name, container = %container, "private key uploaded");

        let public_name = self.settings.public_key_filename(&self.pool);
        self.provisioner
            .upload_blob(container, &keypair.public_key, &public_name)?;
        tracing::info!(blob = %public_name, container = %container, "public key uploaded");
        Ok(())
    }

    /// Download both key files and restore their file modes: owner-only for
    /// the private key, world-readable for the public key.
    pub fn fetch_keypair(&self) -> Result<Keypair> {
        let keypair = self.keypair();
        let container = &self.settings.ssh_key_container;

        self.provisioner.download_blob(
            container,
            &keypair.private_key,
            &self.settings.private_key_filename(&self.pool),
        )?;
        set_mode(&keypair.private_key, 0o600)?;
        tracing::info!(key = %keypair.private_key.display(), "private key downloaded");

        self.provisioner.download_blob(
            container,
            &keypair.public_key,
            &self.settings.public_key_filename(&self.pool),
        )?;
        set_mode(&keypair.public_key, 0o644)?;
        tracing::info!(key = %keypair.public_key.display(), "public key downloaded");
        Ok(keypair)
    }

    /// Issue a new access token for the data container and publish it into
    /// the secrets container. Previously issued tokens are not revoked.
    pub fn issue_access_token(&self) -> Result<AccessToken> {
        let container = &self.settings.data_container;
        let expires = token_expiry(Utc::now(), self.settings.sas_expiry_days);
        let token = self
            .provisioner
            .generate_container_sas(container, &format_expiry(expires))?;

        std::fs::create_dir_all(&self.settings.secrets_dir)?;
        let path = self.token_path(container);
        std::fs::write(&path, &token)?;
        tracing::info!(
            container = %container,
            path = %path.display(),
            expires = %format_expiry(expires),
            "new access token written"
        );

        let blob_name = self.settings.token_filename(&self.pool, container);
        self.provisioner.upload_blob(
            &self.settings.secrets_container,
            &path,
            &blob_name,
        )?;
        tracing::info!(blob = %blob_name, "access token uploaded to secrets container");

        Ok(AccessToken {
            token,
            expires,
            path,
        })
    }

    /// Mirror every blob in the secrets container into the local secrets
    /// directory, keeping blob names as filenames.
    pub fn fetch_all(&self) -> Result<Vec<PathBuf>> {
        let container = &self.settings.secrets_container;
        let blobs = self.provisioner.list_blobs(container)?;
        std::fs::create_dir_all(&self.settings.secrets_dir)?;

        let mut fetched = Vec::with_capacity(blobs.len());
        for name in blobs {
            let path = self.settings.secrets_dir.join(&name);
            self.provisioner.download_blob(container, &path, &name)?;
            fetched.push(path);
        }
        Ok(fetched)
    }
}

/// Expiry of a token issued now with the given TTL, truncated to minute
/// precision to match the timestamp format the control plane accepts.
pub fn token_expiry(now: DateTime<Utc>, ttl_days: i64) -> DateTime<Utc> {
    let expiry = now + Duration::days(ttl_days);
    let secs = expiry.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(60), 0).unwrap_or(expiry)
}

pub fn format_expiry(expiry: DateTime<Utc>) -> String {
    expiry.format("%Y-%m-%dT%H:%MZ").to_string()
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::cli::MockCommandRunner;
    use chrono::TimeZone;

    #[test]
    fn test_token_expiry_truncates_to_minute() {
        let now = Utc.with_ymd_and_hms(2026, 8, 5, 10, 30, 45).unwrap();
        let expiry = token_expiry(now, 14);

        assert_eq!(format_expiry(expiry), "2026-08-19T10:30Z");
        assert_eq!(expiry.timestamp() % 60, 0);
    }

    #[test]
    fn test_token_expiry_zero_ttl_expires_immediately() {
        let now = Utc.with_ymd_and_hms(2026, 8, 5, 10, 30, 45).unwrap();
        let expiry = token_expiry(now, 0);

        assert!(expiry <= now);
        assert_eq!(format_expiry(expiry), "2026-08-05T10:30Z");
    }

    fn store_with_dirs(ssh_dir: &Path, secrets_dir: &Path) -> SecretStore {
        let settings = Arc::new(
            PoolSettings::builder()
                .ssh_key_dir(ssh_dir)
                .secrets_dir(secrets_dir)
                .build(),
        );
        let provisioner = Arc::new(Provisioner::new(
            Arc::new(MockCommandRunner::new()),
            "demo",
            settings.clone(),
        ));
        SecretStore::new(provisioner, settings, "demo")
    }

    #[test]
    fn test_generate_keypair_skips_existing_key() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = store_with_dirs(temp.path(), temp.path());

        std::fs::write(store.private_key_path(), "existing key material").unwrap();
        let keypair = store.generate_keypair().unwrap();

        assert_eq!(
            std::fs::read_to_string(&keypair.private_key).unwrap(),
            "existing key material"
        );
    }

    #[test]
    fn test_secret_paths() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = store_with_dirs(temp.path(), temp.path());

        assert!(store
            .private_key_path()
            .ends_with("azure_vm_pool_demo"));
        assert!(store
            .public_key_path()
            .ends_with("azure_vm_pool_demo.pub"));
        assert!(store
            .token_path("data")
            .ends_with("azure_vm_pool_demo_sas_storage_container_data.txt"));
    }
}
