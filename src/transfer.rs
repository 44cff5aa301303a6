//! File movement between a connector and its peer host.
//!
//! Same host: plain buffered copy, bounded only by filesystem permissions.
//! Other host: `scp` as a child process; the user must already be able to reach the peer.

use crate::error::{LinkError, Result};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;
use std::process::Command;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileTransfer {
    Local,
    SecureCopy { host: String },
}

impl FileTransfer {
    pub fn for_peer(host: &str, same_host: bool) -> Self {
        if same_host {
            FileTransfer::Local
        } else {
            FileTransfer::SecureCopy {
                host: host.to_string(),
            }
        }
    }

    /// Copy `files` (names relative to `local_dir`) into `remote_dir` on the peer.
    pub fn send<S: AsRef<str>>(&self, files: &[S], local_dir: &Path, remote_dir: &Path) -> Result<()> {
        if files.is_empty() {
            return Err(LinkError::Transfer("no files requested".to_string()));
        }
        match self {
            FileTransfer::Local => copy_all(files, local_dir, remote_dir),
            FileTransfer::SecureCopy { host } => run_scp(&send_args(host, files, local_dir, remote_dir)),
        }
    }

    /// Copy `files` (names relative to `remote_dir` on the peer) into `local_dir`.
    pub fn retrieve<S: AsRef<str>>(&self, files: &[S], remote_dir: &Path, local_dir: &Path) -> Result<()> {
        if files.is_empty() {
            return Err(LinkError::Transfer("no files requested".to_string()));
        }
        match self {
            FileTransfer::Local => copy_all(files, remote_dir, local_dir),
            FileTransfer::SecureCopy { host } => {
                run_scp(&retrieve_args(host, files, remote_dir, local_dir))
            }
        }
    }
}

fn copy_all<S: AsRef<str>>(files: &[S], from: &Path, to: &Path) -> Result<()> {
    for f in files {
        copy_file(&from.join(f.as_ref()), &to.join(f.as_ref()))?;
    }
    Ok(())
}

/// Buffered single-file copy; returns bytes written.
pub fn copy_file(src: &Path, dst: &Path) -> Result<u64> {
    let fail = |e: io::Error| {
        LinkError::Transfer(format!("copy {} -> {}: {}", src.display(), dst.display(), e))
    };
    let mut reader = BufReader::new(File::open(src).map_err(fail)?);
    let mut writer = BufWriter::new(File::create(dst).map_err(fail)?);
    let bytes = io::copy(&mut reader, &mut writer).map_err(fail)?;
    writer.flush().map_err(fail)?;
    Ok(bytes)
}

/// `dir/name` for one file, `dir/{a,b}` for several; the remote shell expands the braces.
pub fn brace_list<S: AsRef<str>>(dir: &Path, files: &[S]) -> String {
    let mut dir = dir.display().to_string();
    if !dir.ends_with('/') {
        dir.push('/');
    }
    let names: Vec<&str> = files.iter().map(|f| f.as_ref()).collect();
    if names.len() > 1 {
        format!("{}{{{}}}", dir, names.join(","))
    } else {
        format!("{}{}", dir, names.join(""))
    }
}

fn send_args<S: AsRef<str>>(host: &str, files: &[S], local_dir: &Path, remote_dir: &Path) -> Vec<String> {
    // Local paths are passed one per argument; no shell sees them.
    let mut args = vec!["-q".to_string()];
    args.extend(files.iter().map(|f| local_dir.join(f.as_ref()).display().to_string()));
    args.push(format!("{}:{}", host, remote_dir.display()));
    args
}

fn retrieve_args<S: AsRef<str>>(host: &str, files: &[S], remote_dir: &Path, local_dir: &Path) -> Vec<String> {
    vec![
        "-q".to_string(),
        format!("{}:{}", host, brace_list(remote_dir, files)),
        local_dir.display().to_string(),
    ]
}

fn run_scp(args: &[String]) -> Result<()> {
    let status = Command::new("scp")
        .args(args)
        .status()
        .map_err(|e| LinkError::Transfer(format!("cannot run scp: {}", e)))?;
    if !status.success() {
        return Err(LinkError::Transfer(match status.code() {
            Some(code) => format!("scp error code: {}", code),
            None => "scp terminated by a signal".to_string(),
        }));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn brace_list_single_and_many() {
        let dir = PathBuf::from("/data/out");
        assert_eq!(brace_list(&dir, &["a.txt"]), "/data/out/a.txt");
        assert_eq!(brace_list(&dir, &["a.txt", "b.txt"]), "/data/out/{a.txt,b.txt}");
    }

    #[test]
    fn scp_argument_shapes() {
        let args = retrieve_args("box", &["x", "y"], Path::new("/srv"), Path::new("/tmp/in"));
        assert_eq!(args, vec!["-q", "box:/srv/{x,y}", "/tmp/in"]);
        let args = send_args("box", &["x", "y"], Path::new("/home/me"), Path::new("/srv"));
        assert_eq!(args, vec!["-q", "/home/me/x", "/home/me/y", "box:/srv"]);
    }

    #[test]
    fn local_send_and_retrieve() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        fs::write(a.path().join("one.txt"), "1").unwrap();
        fs::write(a.path().join("two.txt"), "22").unwrap();

        let t = FileTransfer::for_peer("localhost", true);
        t.send(&["one.txt", "two.txt"], a.path(), b.path()).unwrap();
        assert_eq!(fs::read_to_string(b.path().join("two.txt")).unwrap(), "22");

        fs::remove_file(a.path().join("one.txt")).unwrap();
        t.retrieve(&["one.txt"], b.path(), a.path()).unwrap();
        assert_eq!(fs::read_to_string(a.path().join("one.txt")).unwrap(), "1");
    }

    #[test]
    fn missing_source_is_transfer_error() {
        let a = TempDir::new().unwrap();
        let t = FileTransfer::Local;
        let err = t.retrieve(&["absent"], a.path(), a.path()).unwrap_err();
        assert!(matches!(err, LinkError::Transfer(_)));
        let none: [&str; 0] = [];
        assert!(t.send(&none, a.path(), a.path()).is_err());
    }
}
