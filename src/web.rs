//! Minimal web-form shim: URL-encoded form bodies in, one HTML page out.
//!
//! Only what a browser `<form method="post">` submits is understood; there is no
//! HTTP status line, header, or keep-alive handling.

use crate::error::{LinkError, Result};
use crate::protocol::web::HEADER_FOOTER_SEPARATOR;
use percent_encoding::percent_decode_str;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Decoded form fields, unique keys in sorted order.
pub type FormFields = BTreeMap<String, String>;

/// A submitted form: the selected web command plus every decoded field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebForm {
    pub command: String,
    pub fields: FormFields,
}

impl WebForm {
    /// Pick out the command field; a form without it cannot be dispatched.
    pub fn from_fields(fields: FormFields, command_field: &str) -> Result<Self> {
        let command = fields.get(command_field).cloned().ok_or_else(|| {
            LinkError::Dispatch(format!(
                "the key \"{}\" was not found within the submitted form",
                command_field
            ))
        })?;
        Ok(Self { command, fields })
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

/// `+` becomes a space, `%XX` becomes the byte it encodes.
pub fn decode_url(s: &str) -> String {
    let spaced = s.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

/// Parse an `a=1&b=2` body; pairs without `=` are skipped, a repeated key keeps its last value.
pub fn parse_form(body: &str) -> FormFields {
    let mut fields = FormFields::new();
    for pair in body.trim().split('&') {
        if let Some((name, value)) = pair.split_once('=') {
            fields.insert(decode_url(name), decode_url(value));
        }
    }
    fields
}

/// Page chrome wrapped around every web reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HtmlPages {
    Minimal,
    Template { header: String, footer: String },
}

impl HtmlPages {
    /// Load an operator template once; header and footer are split on `__HFSEPARATOR__`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            LinkError::resource(format!("cannot read HTML template {}: {}", path.display(), e))
        })?;
        Self::from_template(&text).ok_or_else(|| {
            LinkError::resource(format!(
                "bad format in the HTML header/footer file {}",
                path.display()
            ))
        })
    }

    pub fn from_template(text: &str) -> Option<Self> {
        let (header, footer) = text.split_once(HEADER_FOOTER_SEPARATOR)?;
        Some(HtmlPages::Template {
            header: header.to_string(),
            footer: footer.to_string(),
        })
    }

    pub fn render(&self, body: &str, title: &str) -> String {
        match self {
            HtmlPages::Template { header, footer } => format!("{}{}{}", header, body, footer),
            HtmlPages::Minimal => format!(
                "<!DOCTYPE html>\n<html lang=\"en\">\n<meta charset=\"utf-8\">\n<title>{}</title>\n<body>\n{}</body>\n</html>\n",
                title, body
            ),
        }
    }
}
