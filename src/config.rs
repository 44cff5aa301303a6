//! Listener/connector options and the daemon's optional TOML file.

use crate::protocol_core::FrameConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

/// How POSTed web forms are answered.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum WebSupport {
    /// POST requests get an error page
    #[default]
    Disabled,
    /// Built-in bare HTML5 page
    Minimal,
    /// Operator header/footer file split on `__HFSEPARATOR__`
    Template(PathBuf),
}

#[derive(Clone, Debug)]
pub struct ServerOptions {
    pub bind: Ipv4Addr,
    pub frame: FrameConfig,
    pub web: WebSupport,
    /// Defaults to `<cwd>/tmp`
    pub challenge_dir: Option<PathBuf>,
    /// Only affects the advertised URL
    pub https: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            bind: Ipv4Addr::UNSPECIFIED,
            frame: FrameConfig::default(),
            web: WebSupport::Disabled,
            challenge_dir: None,
            https: false,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ClientOptions {
    pub frame: FrameConfig,
}

/// On-disk daemon settings; command-line flags override them.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub port: Option<u16>,
    pub bind: Option<Ipv4Addr>,
    /// "disabled" | "minimal"; ignored when html_template is set
    pub web: Option<String>,
    pub html_template: Option<PathBuf>,
    pub challenge_dir: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub log_level: Option<String>,
    pub https: bool,
    pub frame: FrameConfig,
}

impl DaemonConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let cfg: DaemonConfig =
            toml::from_str(&data).with_context(|| format!("parse config {}", path.display()))?;
        Ok(cfg)
    }

    pub fn web_support(&self) -> Result<WebSupport> {
        if let Some(ref t) = self.html_template {
            return Ok(WebSupport::Template(t.clone()));
        }
        match self.web.as_deref() {
            None | Some("disabled") => Ok(WebSupport::Disabled),
            Some("minimal") => Ok(WebSupport::Minimal),
            Some(other) => anyhow::bail!("unknown web mode \"{}\"", other),
        }
    }

    pub fn server_options(&self) -> Result<ServerOptions> {
        Ok(ServerOptions {
            bind: self.bind.unwrap_or(Ipv4Addr::UNSPECIFIED),
            frame: self.frame.clone(),
            web: self.web_support()?,
            challenge_dir: self.challenge_dir.clone(),
            https: self.https,
        })
    }
}
