//! Client side of the link: connect, prove we are the server's user, then talk.

use crate::config::ClientOptions;
use crate::error::{LinkError, Result};
use crate::logger::local_host_name;
use crate::protocol::auth;
use crate::protocol_core::{
    check_remote_error, encode_request, parse_response, parse_single_value, parse_value_vector,
    trim_line_end, FrameConfig,
};
use crate::transfer::FileTransfer;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::{IpAddr, Shutdown, TcpStream};
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub struct Connector {
    frame: FrameConfig,
    stream: Option<TcpStream>,
    reader: Option<BufReader<TcpStream>>,
    host: String,
    port: u16,
    local: bool,
    connected: bool,
}

impl Connector {
    pub fn new(options: ClientOptions) -> Self {
        Self {
            frame: options.frame,
            stream: None,
            reader: None,
            host: String::new(),
            port: 0,
            local: false,
            connected: false,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn argument_separator(&self) -> &str {
        &self.frame.argument_separator
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Whether the peer runs on this machine (files are copied directly).
    pub fn is_local(&self) -> bool {
        self.local
    }

    /// Open the connection and run the handshake. Any failure leaves us disconnected.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        self.disconnect();
        let result = self.open(host, port).and_then(|()| self.authenticate());
        match result {
            Ok(()) => {
                self.connected = true;
                Ok(())
            }
            Err(e) => {
                self.disconnect();
                Err(e)
            }
        }
    }

    fn open(&mut self, host: &str, port: u16) -> Result<()> {
        let stream = TcpStream::connect((host, port))?;
        let _ = stream.set_nodelay(true);
        let peer_is_loopback = stream.peer_addr().map(|a| a.ip().is_loopback()).unwrap_or(false);
        self.reader = Some(BufReader::new(stream.try_clone()?));
        self.stream = Some(stream);
        self.host = host.to_string();
        self.port = port;
        self.local = peer_is_loopback || is_local_host(host);
        Ok(())
    }

    fn authenticate(&mut self) -> Result<()> {
        let remote = PathBuf::from(self.retrieve_string(auth::STEP1, auth::STEP1_REQUEST, None)?);
        let (dir, name) = match (remote.parent(), remote.file_name()) {
            (Some(dir), Some(name)) if !dir.as_os_str().is_empty() => {
                (dir.to_path_buf(), name.to_string_lossy().into_owned())
            }
            _ => {
                return Err(LinkError::protocol(format!(
                    "bad authorization path retrieved from server: \"{}\"",
                    remote.display()
                )))
            }
        };
        let scratch = tempfile::tempdir()
            .map_err(|e| LinkError::resource(format!("cannot create scratch directory: {}", e)))?;
        self.retrieve_files(&[name.as_str()], &dir, scratch.path())?;
        let local_copy = scratch.path().join(&name);
        let contents = fs::read_to_string(&local_copy)
            .map_err(|e| LinkError::protocol(format!("could not authorize connection: {}", e)))?;
        let _ = fs::remove_file(&local_copy);
        let secret = contents
            .split_whitespace()
            .next()
            .ok_or_else(|| LinkError::protocol("could not authorize connection: empty challenge"))?;
        self.retrieve_string(auth::STEP2, secret, Some(auth::STEP2_ACCEPTED))?;
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.reader = None;
        self.connected = false;
    }

    /// Write one request line; no reply is read.
    pub fn send_command_and_string(&mut self, command: &str, argument: &str) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(LinkError::NotConnected)?;
        stream.write_all(encode_request(&self.frame, command, argument).as_bytes())?;
        stream.flush()?;
        Ok(())
    }

    /// Read one line. A line carrying the error marker comes back as `LinkError::Remote`.
    pub fn receive_line(&mut self) -> Result<String> {
        let reader = self.reader.as_mut().ok_or(LinkError::NotConnected)?;
        let mut buf = Vec::new();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Err(LinkError::Transport(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed by server",
            )));
        }
        let line = String::from_utf8_lossy(&buf);
        let line = trim_line_end(&line);
        check_remote_error(line)?;
        Ok(line.to_string())
    }

    /// Read one line and return its payload, requiring the given tag.
    pub fn receive_tagged(&mut self, tag: &str) -> Result<String> {
        let line = self.receive_line()?;
        parse_response(&self.frame, &line, tag).map(str::to_string)
    }

    /// Request/response round trip. With `expected`, the payload must equal it exactly.
    pub fn retrieve_string(&mut self, command: &str, argument: &str, expected: Option<&str>) -> Result<String> {
        self.send_command_and_string(command, argument)?;
        let response = self.receive_tagged(command)?;
        if let Some(expected) = expected {
            if response != expected {
                return Err(LinkError::UnexpectedResponse {
                    request: format!("{} {}", command, argument),
                    response,
                });
            }
        }
        Ok(response)
    }

    /// e.g. `retrieve_single_value::<f32>("Mean", "")`
    pub fn retrieve_single_value<T: FromStr>(&mut self, command: &str, argument: &str) -> Result<T> {
        let payload = self.retrieve_string(command, argument, None)?;
        parse_single_value(&payload)
    }

    /// Whitespace-separated values; `expected_count` 0 accepts any count.
    pub fn retrieve_value_vector<T: FromStr>(
        &mut self,
        command: &str,
        argument: &str,
        expected_count: usize,
    ) -> Result<Vec<T>> {
        let payload = self.retrieve_string(command, argument, None)?;
        parse_value_vector(&payload, expected_count)
    }

    fn transfer(&self) -> Result<FileTransfer> {
        if self.stream.is_none() {
            return Err(LinkError::NotConnected);
        }
        Ok(FileTransfer::for_peer(&self.host, self.local))
    }

    /// Needs read access to the local files and write access to the remote folder.
    pub fn send_files<S: AsRef<str>>(&self, files: &[S], local_dir: &Path, remote_dir: &Path) -> Result<()> {
        self.transfer()?.send(files, local_dir, remote_dir)
    }

    /// Needs read access to the remote files and write access to the local folder.
    pub fn retrieve_files<S: AsRef<str>>(&self, files: &[S], remote_dir: &Path, local_dir: &Path) -> Result<()> {
        self.transfer()?.retrieve(files, remote_dir, local_dir)
    }
}

impl Default for Connector {
    fn default() -> Self {
        Self::new(ClientOptions::default())
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// `localhost`, a loopback/unspecified address, or this machine's own name.
pub fn is_local_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    if let Ok(ip) = IpAddr::from_str(host) {
        return ip.is_loopback() || ip.is_unspecified();
    }
    host.eq_ignore_ascii_case(&local_host_name())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_host_detection() {
        assert!(is_local_host("localhost"));
        assert!(is_local_host("127.0.0.1"));
        assert!(is_local_host("::1"));
        assert!(is_local_host(&local_host_name()));
        assert!(!is_local_host("192.0.2.7"));
    }

    #[test]
    fn unconnected_calls_fail() {
        let mut c = Connector::default();
        assert!(!c.is_connected());
        assert!(matches!(c.send_command_and_string("Ping", "x"), Err(LinkError::NotConnected)));
        assert!(matches!(c.receive_line(), Err(LinkError::NotConnected)));
        assert!(matches!(
            c.retrieve_files(&["a"], Path::new("/"), Path::new("/")),
            Err(LinkError::NotConnected)
        ));
    }
}
