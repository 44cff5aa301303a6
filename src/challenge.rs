//! Ephemeral challenge files for the same-user handshake.
//!
//! The server writes a random secret into a file only its own OS user can read and
//! tells the client where it is. Reading it back proves the client runs as that user.

use crate::error::{LinkError, Result};
use crate::protocol::auth;
use rand::distr::Alphanumeric;
use rand::Rng;
use std::fs::{self, OpenOptions};
use subtle::ConstantTimeEq;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Where challenge files are created.
#[derive(Debug, Clone)]
pub struct ChallengeStore {
    dir: PathBuf,
}

impl ChallengeStore {
    /// Use `dir`, or `<cwd>/tmp` when none is given. Relative paths are anchored at the
    /// current directory because the client needs an absolute path.
    pub fn new(dir: Option<&Path>) -> Result<Self> {
        owner_only_supported()?;
        let cwd = std::env::current_dir().map_err(|e| {
            LinkError::resource(format!("cannot determine the current working directory: {}", e))
        })?;
        let dir = match dir {
            Some(d) if d.is_absolute() => d.to_path_buf(),
            Some(d) => cwd.join(d),
            None => cwd.join("tmp"),
        };
        if !dir.is_dir() {
            create_private_dir(&dir)?;
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create a fresh challenge file readable and writable by the owner only.
    pub fn issue(&self) -> Result<Challenge> {
        let mut rng = rand::rng();
        let name = format!(
            "{}{}",
            auth::FILE_PREFIX,
            random_alphanumeric(&mut rng, auth::NAME_LEN_MIN, auth::NAME_LEN_MAX)
        );
        let secret = random_alphanumeric(&mut rng, auth::SECRET_LEN_MIN, auth::SECRET_LEN_MAX);
        let path = self.dir.join(name);

        let mut opts = OpenOptions::new();
        opts.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o600);
        }
        let mut file = opts.open(&path).map_err(|e| {
            LinkError::resource(format!("cannot create challenge file {}: {}", path.display(), e))
        })?;
        // From here on the guard owns the file and removes it on any early return.
        let challenge = Challenge { path, secret };
        writeln!(file, "{}", challenge.secret).map_err(|e| {
            LinkError::resource(format!("cannot write challenge file: {}", e))
        })?;
        restrict_to_owner(&challenge.path)?;
        Ok(challenge)
    }
}

/// A live (path, secret) pair. Dropping it deletes the file.
#[derive(Debug)]
pub struct Challenge {
    path: PathBuf,
    secret: String,
}

impl Challenge {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn matches(&self, candidate: &str) -> bool {
        // Length is not secret.
        let a = self.secret.as_bytes();
        let b = candidate.as_bytes();
        a.len() == b.len() && a.ct_eq(b).unwrap_u8() == 1
    }
}

impl Drop for Challenge {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn random_alphanumeric(rng: &mut impl Rng, min: usize, max: usize) -> String {
    let len = rng.random_range(min..=max);
    rng.sample_iter(&Alphanumeric).take(len).map(char::from).collect()
}

#[cfg(unix)]
fn owner_only_supported() -> Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn owner_only_supported() -> Result<()> {
    Err(LinkError::resource(
        "owner-only file permissions are not available on this platform",
    ))
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o750)
        .create(dir)
        .map_err(|e| LinkError::resource(format!("cannot create {}: {}", dir.display(), e)))
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .map_err(|e| LinkError::resource(format!("cannot create {}: {}", dir.display(), e)))
}

/// Set mode 0600 and read it back; group or other access fails the challenge.
#[cfg(unix)]
fn restrict_to_owner(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| {
        LinkError::resource(format!("cannot set user-specific access on {}: {}", path.display(), e))
    })?;
    let mode = fs::metadata(path)
        .map_err(|e| LinkError::resource(format!("cannot stat {}: {}", path.display(), e)))?
        .permissions()
        .mode();
    if mode & 0o077 != 0 {
        return Err(LinkError::resource(format!(
            "challenge file {} is accessible beyond its owner (mode {:o})",
            path.display(),
            mode & 0o777
        )));
    }
    Ok(())
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &Path) -> Result<()> {
    owner_only_supported()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[test]
    fn issued_file_holds_secret_with_owner_mode() {
        let tmp = TempDir::new().unwrap();
        let store = ChallengeStore::new(Some(tmp.path())).unwrap();
        let challenge = store.issue().unwrap();

        let name = challenge.path().file_name().unwrap().to_string_lossy().to_string();
        let random_part = name.strip_prefix(auth::FILE_PREFIX).unwrap();
        assert!((auth::NAME_LEN_MIN..=auth::NAME_LEN_MAX).contains(&random_part.len()));
        assert!(random_part.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!((auth::SECRET_LEN_MIN..=auth::SECRET_LEN_MAX).contains(&challenge.secret().len()));

        let on_disk = fs::read_to_string(challenge.path()).unwrap();
        assert_eq!(on_disk.trim_end(), challenge.secret());
        let mode = fs::metadata(challenge.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn drop_removes_file() {
        let tmp = TempDir::new().unwrap();
        let store = ChallengeStore::new(Some(tmp.path())).unwrap();
        let challenge = store.issue().unwrap();
        let path = challenge.path().to_path_buf();
        assert!(path.exists());
        drop(challenge);
        assert!(!path.exists());
    }

    #[test]
    fn secret_matching_is_exact() {
        let tmp = TempDir::new().unwrap();
        let store = ChallengeStore::new(Some(tmp.path())).unwrap();
        let challenge = store.issue().unwrap();
        let secret = challenge.secret().to_string();
        assert!(challenge.matches(&secret));
        assert!(!challenge.matches("wrong"));
        assert!(!challenge.matches(&secret[1..]));
        let mut flipped = secret.clone().into_bytes();
        let last = flipped.len() - 1;
        flipped[last] = if flipped[last] == b'a' { b'b' } else { b'a' };
        assert!(!challenge.matches(&String::from_utf8(flipped).unwrap()));
        assert!(!challenge.matches(""));
    }

    #[test]
    fn missing_dir_is_created_and_absolute() {
        let tmp = TempDir::new().unwrap();
        let nested = tmp.path().join("a/b");
        let store = ChallengeStore::new(Some(&nested)).unwrap();
        assert!(store.dir().is_dir());
        assert!(store.dir().is_absolute());
    }
}
