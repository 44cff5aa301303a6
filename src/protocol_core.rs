//! Line framing shared by the listener and the connector
//!
//! Requests are `command SEP_CMD argument\n`, responses are `tag SEP_OUT payload\n`.
//! Everything here is pure: no sockets, no state.

use crate::error::{LinkError, Result};
use crate::protocol::{self, web::POST_MARKER, ERROR_MARKER};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Separator set and web field name; both ends must agree on the separators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    pub command_separator: String,
    pub output_separator: String,
    pub argument_separator: String,
    pub web_command_field: String,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            command_separator: protocol::COMMAND_SEPARATOR.to_string(),
            output_separator: protocol::OUTPUT_SEPARATOR.to_string(),
            argument_separator: protocol::ARGUMENT_SEPARATOR.to_string(),
            web_command_field: protocol::WEB_COMMAND_FIELD.to_string(),
        }
    }
}

/// One parsed `command SEP argument` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub argument: String,
}

/// Shape of a single inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestLine {
    Structured(Command),
    WebPost,
    Unrecognized(String),
}

/// Drop the line terminator (`\n` or `\r\n`).
pub fn trim_line_end(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

/// Ensure exactly one trailing newline without doubling an existing one.
pub fn terminate_line(mut s: String) -> String {
    if !s.ends_with('\n') {
        s.push('\n');
    }
    s
}

pub fn encode_request(frame: &FrameConfig, command: &str, argument: &str) -> String {
    format!("{}{}{}\n", command, frame.command_separator, argument)
}

pub fn encode_response(frame: &FrameConfig, tag: &str, payload: &str) -> String {
    terminate_line(format!("{}{}{}", tag, frame.output_separator, payload))
}

/// Classify an inbound line. The separator wins over the POST marker,
/// so a structured argument mentioning "POST /" is still structured.
pub fn parse_request(frame: &FrameConfig, line: &str) -> RequestLine {
    let line = trim_line_end(line);
    if let Some((name, argument)) = line.split_once(frame.command_separator.as_str()) {
        return RequestLine::Structured(Command {
            name: name.to_string(),
            argument: argument.to_string(),
        });
    }
    if line.contains(POST_MARKER) {
        return RequestLine::WebPost;
    }
    RequestLine::Unrecognized(line.to_string())
}

/// Reject any line carrying the in-band error marker, verbatim.
pub fn check_remote_error(line: &str) -> Result<&str> {
    if line.contains(ERROR_MARKER) {
        return Err(LinkError::Remote(line.to_string()));
    }
    Ok(line)
}

/// Split a response line and require its tag to match.
pub fn parse_response<'a>(frame: &FrameConfig, line: &'a str, expected_tag: &str) -> Result<&'a str> {
    match line.split_once(frame.output_separator.as_str()) {
        Some((tag, payload)) if tag == expected_tag => Ok(payload),
        _ => Err(LinkError::protocol(format!(
            "response to {} was \"{}\"",
            expected_tag, line
        ))),
    }
}

/// Exactly one whitespace-delimited token that parses as `T`.
pub fn parse_single_value<T: FromStr>(payload: &str) -> Result<T> {
    let mut tokens = payload.split_whitespace();
    let value = tokens
        .next()
        .and_then(|t| t.parse::<T>().ok())
        .ok_or_else(|| LinkError::protocol(format!("could not retrieve a value from \"{}\"", payload)))?;
    if tokens.next().is_some() {
        return Err(LinkError::protocol(format!(
            "additional data returned in \"{}\"",
            payload
        )));
    }
    Ok(value)
}

/// Whitespace-delimited values, stopping at the first token that does not parse as a whole.
/// A nonzero `expected_count` must match the number of values parsed.
pub fn parse_value_vector<T: FromStr>(payload: &str, expected_count: usize) -> Result<Vec<T>> {
    let values: Vec<T> = payload
        .split_whitespace()
        .map_while(|t| t.parse::<T>().ok())
        .collect();
    if expected_count > 0 && values.len() != expected_count {
        return Err(LinkError::CountMismatch {
            expected: expected_count,
            actual: values.len(),
        });
    }
    Ok(values)
}

/// Join several values into one payload with the argument separator.
pub fn join_arguments<I, S>(frame: &FrameConfig, parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    parts
        .into_iter()
        .map(|p| p.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(&frame.argument_separator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_line_splits_on_first_separator() {
        let frame = FrameConfig::default();
        let parsed = parse_request(&frame, "Ping__+__a__+__b\n");
        assert_eq!(
            parsed,
            RequestLine::Structured(Command {
                name: "Ping".into(),
                argument: "a__+__b".into(),
            })
        );
    }

    #[test]
    fn post_and_garbage_lines() {
        let frame = FrameConfig::default();
        assert_eq!(parse_request(&frame, "POST /form HTTP/1.1\r\n"), RequestLine::WebPost);
        assert_eq!(
            parse_request(&frame, "hello there\n"),
            RequestLine::Unrecognized("hello there".into())
        );
    }

    #[test]
    fn empty_argument_is_allowed() {
        let frame = FrameConfig::default();
        match parse_request(&frame, "Hostname__+__") {
            RequestLine::Structured(c) => {
                assert_eq!(c.name, "Hostname");
                assert!(c.argument.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn response_encoding_adds_single_newline() {
        let frame = FrameConfig::default();
        assert_eq!(encode_response(&frame, "Ping", "hello"), "Ping__$__hello\n");
        assert_eq!(encode_response(&frame, "Ping", "hello\n"), "Ping__$__hello\n");
        assert_eq!(encode_request(&frame, "Ping", "hello"), "Ping__+__hello\n");
    }

    #[test]
    fn response_tag_must_match() {
        let frame = FrameConfig::default();
        assert_eq!(parse_response(&frame, "Ping__$__hi", "Ping").unwrap(), "hi");
        assert!(parse_response(&frame, "Pong__$__hi", "Ping").is_err());
        assert!(parse_response(&frame, "no separator", "Ping").is_err());
    }

    #[test]
    fn error_marker_is_rejected_verbatim() {
        let line = "Ping__$__Error: handler exploded";
        match check_remote_error(line) {
            Err(LinkError::Remote(msg)) => assert_eq!(msg, line),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(check_remote_error("Ping__$__fine").unwrap(), "Ping__$__fine");
    }

    #[test]
    fn single_value_rejects_residual() {
        assert_eq!(parse_single_value::<f64>(" 2.5 ").unwrap(), 2.5);
        assert!(parse_single_value::<i32>("1 2").is_err());
        assert!(parse_single_value::<i32>("x").is_err());
        assert!(parse_single_value::<i32>("").is_err());
    }

    #[test]
    fn value_vector_counts() {
        assert_eq!(parse_value_vector::<i32>("1 2 3", 3).unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_value_vector::<i32>("1 2 x 4", 0).unwrap(), vec![1, 2]);
        // A token is taken whole or not at all; "1.5" is not read as 1.
        assert_eq!(parse_value_vector::<i32>("1 1.5 2", 0).unwrap(), vec![1]);
        match parse_value_vector::<i32>("1 2", 3) {
            Err(LinkError::CountMismatch { expected, actual }) => {
                assert_eq!((expected, actual), (3, 2));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn join_uses_argument_separator() {
        let frame = FrameConfig::default();
        assert_eq!(join_arguments(&frame, ["a", "b", "c"]), "a__*__b__*__c");
    }
}
