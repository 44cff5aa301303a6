//! Per-connection actor: handshake first, then one reply per request line.

use crate::challenge::{Challenge, ChallengeStore};
use crate::error::{Flow, LinkError, SessionError};
use crate::logger::Logger;
use crate::protocol::{auth, web as webproto};
use crate::protocol_core::{encode_response, parse_request, terminate_line, Command, FrameConfig, RequestLine};
use crate::registry::Handlers;
use crate::web::{parse_form, HtmlPages, WebForm};
use std::io::{self, BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Everything a session needs from its listener; shared read-only.
pub(crate) struct SessionContext {
    pub frame: FrameConfig,
    pub handlers: Handlers,
    /// `None` when web requests are not accepted
    pub pages: Option<HtmlPages>,
    pub challenges: ChallengeStore,
    pub logger: Arc<dyn Logger>,
    pub listening: Arc<AtomicBool>,
}

/// Handshake progress. Only moves forward; `AuthStep1` restarts it.
#[derive(Debug)]
pub enum AuthState {
    Unauthenticated,
    ChallengeIssued(Challenge),
    Authenticated,
}

pub(crate) struct Session {
    ctx: Arc<SessionContext>,
    stream: Arc<TcpStream>,
    peer: SocketAddr,
    state: AuthState,
}

impl Session {
    pub(crate) fn new(ctx: Arc<SessionContext>, stream: Arc<TcpStream>, peer: SocketAddr) -> Self {
        Self {
            ctx,
            stream,
            peer,
            state: AuthState::Unauthenticated,
        }
    }

    /// Serve lines until the peer leaves, a fatal error, a POST, or listener stop.
    pub(crate) fn run(mut self) {
        let stream = Arc::clone(&self.stream);
        let mut reader = BufReader::new(&*stream);
        while self.ctx.listening.load(Ordering::SeqCst) {
            let line = match read_line(&mut reader) {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    self.ctx
                        .logger
                        .error(&format!("session with {}: read failed: {}", self.peer, e));
                    break;
                }
            };
            match self.exchange(&line, &mut reader) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Close) => break,
                Err(e) => {
                    let fatal = e.is_fatal();
                    if self.report(&e).is_err() || fatal {
                        break;
                    }
                }
            }
        }
        if let AuthState::ChallengeIssued(ref c) = self.state {
            self.ctx.logger.debug(&format!(
                "session with {} ended mid-handshake; removing {}",
                self.peer,
                c.path().display()
            ));
        }
        self.ctx
            .logger
            .info(&format!("session with {} closed", self.peer));
        // Dropping self releases the socket and any outstanding challenge file.
    }

    fn exchange<R: BufRead>(&mut self, line: &str, reader: &mut R) -> Result<Flow, SessionError> {
        match parse_request(&self.ctx.frame, line) {
            RequestLine::Structured(command) => self.structured(command),
            RequestLine::WebPost => Ok(self.web_post(reader)),
            RequestLine::Unrecognized(text) => {
                let e = LinkError::protocol(format!(
                    "neither the field separator \"{}\", nor \"{}\", were found within: \"{}\"",
                    self.ctx.frame.command_separator,
                    webproto::POST_MARKER,
                    text
                ));
                // Before the handshake completes, any malformed line ends the session.
                match self.state {
                    AuthState::Authenticated => Err(SessionError::recoverable(None, e)),
                    _ => Err(SessionError::fatal(None, e)),
                }
            }
        }
    }

    fn structured(&mut self, command: Command) -> Result<Flow, SessionError> {
        let name = command.name.as_str();
        if name == auth::STEP1 {
            // Client is starting over on the same connection.
            self.state = AuthState::Unauthenticated;
        }
        match std::mem::replace(&mut self.state, AuthState::Unauthenticated) {
            AuthState::Unauthenticated => {
                if name != auth::STEP1 {
                    return Err(SessionError::fatal(
                        Some(name),
                        LinkError::protocol(format!("client at {} did not authenticate", self.peer)),
                    ));
                }
                let challenge = self
                    .ctx
                    .challenges
                    .issue()
                    .map_err(|e| SessionError::fatal(Some(name), e))?;
                let location = challenge.path().display().to_string();
                self.state = AuthState::ChallengeIssued(challenge);
                self.ctx.logger.debug(&format!("issued challenge {} to {}", location, self.peer));
                self.reply(name, &location)
            }
            AuthState::ChallengeIssued(challenge) => {
                let accepted = name == auth::STEP2 && challenge.matches(&command.argument);
                drop(challenge);
                if !accepted {
                    return Err(SessionError::fatal(
                        Some(name),
                        LinkError::protocol(format!(
                            "client at {} did not send the secret string",
                            self.peer
                        )),
                    ));
                }
                self.state = AuthState::Authenticated;
                self.ctx
                    .logger
                    .info(&format!("client at {} authenticated", self.peer));
                self.reply(name, auth::STEP2_ACCEPTED)
            }
            AuthState::Authenticated => {
                self.state = AuthState::Authenticated;
                let commands = &self.ctx.handlers.commands;
                let argument = command.argument.as_str();
                let payload = catch_unwind(AssertUnwindSafe(|| commands.dispatch(name, argument)))
                    .unwrap_or_else(|_| {
                        Err(LinkError::Dispatch(format!(
                            "unknown error, with command \"{}\"",
                            name
                        )))
                    })
                    .map_err(|e| SessionError::recoverable(Some(name), e))?;
                self.reply(name, &payload)
            }
        }
    }

    /// One form, one page, then the connection is done whatever happens.
    fn web_post<R: BufRead>(&mut self, reader: &mut R) -> Flow {
        let pages = self.ctx.pages.clone().unwrap_or(HtmlPages::Minimal);
        let page = match self.serve_form(reader) {
            Ok(Some((title, body))) => pages.render(&body, &title),
            Ok(None) => return Flow::Close,
            Err(e) => {
                let msg = format!("session with {}: {}", self.peer, e);
                self.ctx.logger.error(&msg);
                pages.render(&msg, webproto::ERROR_TITLE)
            }
        };
        if let Err(e) = self.send(terminate_line(page)) {
            self.ctx
                .logger
                .warning(&format!("could not send page to {}: {}", self.peer, e));
        }
        Flow::Close
    }

    /// Returns (title, body) for the page, or `None` if the peer left before the form ended.
    fn serve_form<R: BufRead>(&self, reader: &mut R) -> Result<Option<(String, String)>, LinkError> {
        // Drain the form even when refusing it, so the peer sees the page and not a reset.
        let text = match read_until_marker(reader, webproto::END_OF_FORM)? {
            Some(text) => text,
            None => return Ok(None),
        };
        if self.ctx.pages.is_none() {
            return Err(LinkError::protocol(
                "this listener was not configured to accept web requests",
            ));
        }
        let body = text
            .lines()
            .find(|l| l.contains(webproto::END_OF_FORM))
            .map(|l| l.trim_end_matches('\r'))
            .ok_or_else(|| LinkError::protocol("error parsing POST query string"))?;
        let form = WebForm::from_fields(parse_form(body), &self.ctx.frame.web_command_field)?;
        let web = &self.ctx.handlers.web;
        let body = catch_unwind(AssertUnwindSafe(|| web.dispatch(&form.command, &form)))
            .unwrap_or_else(|_| {
                Err(LinkError::Dispatch(format!(
                    "unknown error, with web command \"{}\"",
                    form.command
                )))
            })?;
        Ok(Some((form.command, body)))
    }

    fn reply(&self, tag: &str, payload: &str) -> Result<Flow, SessionError> {
        self.send(encode_response(&self.ctx.frame, tag, payload))
            .map_err(|e| SessionError::fatal(Some(tag), LinkError::Transport(e)))?;
        Ok(Flow::Continue)
    }

    /// Log the failure and tell the peer, when we know which command to tag.
    fn report(&self, e: &SessionError) -> io::Result<()> {
        let msg = format!("session with {}: {}", self.peer, e);
        self.ctx.logger.error(&msg);
        match e.command() {
            Some(command) => self.send(encode_response(
                &self.ctx.frame,
                command,
                &format!("Error: {}", msg),
            )),
            None => Ok(()),
        }
    }

    fn send(&self, text: String) -> io::Result<()> {
        let mut s: &TcpStream = &self.stream;
        s.write_all(text.as_bytes())?;
        s.flush()
    }
}

/// One `\n`-terminated line, lossily decoded. `None` on clean end-of-stream.
fn read_line<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    let mut buf = Vec::new();
    if reader.read_until(b'\n', &mut buf)? == 0 {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

/// Read until `marker` has been seen, which need not be followed by a newline.
fn read_until_marker<R: BufRead>(reader: &mut R, marker: &str) -> io::Result<Option<String>> {
    let marker = marker.as_bytes();
    let mut collected: Vec<u8> = Vec::new();
    loop {
        let available = reader.fill_buf()?;
        if available.is_empty() {
            return Ok(None);
        }
        let n = available.len();
        let search_from = collected.len().saturating_sub(marker.len());
        collected.extend_from_slice(available);
        reader.consume(n);
        if collected[search_from..].windows(marker.len()).any(|w| w == marker) {
            return Ok(Some(String::from_utf8_lossy(&collected).into_owned()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn read_line_reports_eof() {
        let mut r = Cursor::new(b"one\ntwo".to_vec());
        assert_eq!(read_line(&mut r).unwrap().as_deref(), Some("one\n"));
        assert_eq!(read_line(&mut r).unwrap().as_deref(), Some("two"));
        assert_eq!(read_line(&mut r).unwrap(), None);
    }

    #[test]
    fn marker_without_trailing_newline() {
        let body = b"Host: x\r\n\r\nWebCommand=Echo&go=Submit+This+Form".to_vec();
        let mut r = BufReader::with_capacity(4, Cursor::new(body));
        let text = read_until_marker(&mut r, "Submit+This+Form").unwrap().unwrap();
        assert!(text.ends_with("Submit+This+Form"));
    }

    #[test]
    fn marker_missing_is_eof() {
        let mut r = Cursor::new(b"Host: x\r\n\r\nWebCommand=Echo".to_vec());
        assert!(read_until_marker(&mut r, "Submit+This+Form").unwrap().is_none());
    }
}
