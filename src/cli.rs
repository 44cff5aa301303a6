//! Shared CLI fragments for cmdlink and cmdlinkd

use crate::protocol::DEFAULT_PORT;
use clap::{Parser, Subcommand};
use std::net::Ipv4Addr;
use std::path::PathBuf;

/// Daemon options; anything given here overrides the config file.
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "cmdlinkd - remote command listener")]
pub struct DaemonOpts {
    /// Port to listen on [default: 1997]
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address to bind [default: 0.0.0.0]
    #[arg(long)]
    pub bind: Option<Ipv4Addr>,

    /// TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Header/footer file for web pages, split on __HFSEPARATOR__ (implies --web)
    #[arg(long)]
    pub html_template: Option<PathBuf>,

    /// Answer POSTed web forms with the built-in page
    #[arg(long)]
    pub web: bool,

    /// Where challenge files are written [default: ./tmp]
    #[arg(long)]
    pub challenge_dir: Option<PathBuf>,

    /// Log file [default: cmdlinkd.log]
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// debug, info, warn or error [default: info]
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "cmdlink - talk to a cmdlinkd listener")]
pub struct ClientOpts {
    /// Listener host
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// Listener port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    #[command(subcommand)]
    pub action: ClientAction,
}

#[derive(Clone, Debug, Subcommand)]
pub enum ClientAction {
    /// Send one command and print the reply payload
    Send {
        command: String,
        #[arg(default_value = "")]
        argument: String,
        /// Fail unless the reply equals this
        #[arg(long)]
        expect: Option<String>,
    },
    /// Send one command and print the reply as numbers
    Values {
        command: String,
        #[arg(default_value = "")]
        argument: String,
        /// Required number of values (0 = any)
        #[arg(long, default_value_t = 0)]
        count: usize,
    },
    /// Copy local files to a folder on the listener's host
    Push {
        #[arg(long)]
        local_dir: PathBuf,
        #[arg(long)]
        remote_dir: PathBuf,
        #[arg(required = true)]
        files: Vec<String>,
    },
    /// Copy files from the listener's host to a local folder
    Pull {
        #[arg(long)]
        remote_dir: PathBuf,
        #[arg(long)]
        local_dir: PathBuf,
        #[arg(required = true)]
        files: Vec<String>,
    },
}
