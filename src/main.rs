//! cmdlink - command-line client for a cmdlinkd listener
//!
//! Connects, authenticates, runs one action, disconnects.

use anyhow::{Context, Result};
use clap::Parser;

use cmdlink::cli::{ClientAction, ClientOpts};
use cmdlink::Connector;

fn main() -> Result<()> {
    let opts = ClientOpts::parse();

    let mut link = Connector::default();
    link.connect(&opts.host, opts.port)
        .with_context(|| format!("connect to {}:{}", opts.host, opts.port))?;

    match opts.action {
        ClientAction::Send {
            command,
            argument,
            expect,
        } => {
            let reply = link.retrieve_string(&command, &argument, expect.as_deref())?;
            println!("{}", reply);
        }
        ClientAction::Values {
            command,
            argument,
            count,
        } => {
            let values: Vec<f64> = link.retrieve_value_vector(&command, &argument, count)?;
            for v in values {
                println!("{}", v);
            }
        }
        ClientAction::Push {
            local_dir,
            remote_dir,
            files,
        } => {
            link.send_files(files.as_slice(), &local_dir, &remote_dir)
                .with_context(|| format!("push to {}:{}", link.host(), remote_dir.display()))?;
            println!("Sent {} file(s)", files.len());
        }
        ClientAction::Pull {
            remote_dir,
            local_dir,
            files,
        } => {
            link.retrieve_files(files.as_slice(), &remote_dir, &local_dir)
                .with_context(|| format!("pull from {}:{}", link.host(), remote_dir.display()))?;
            println!("Retrieved {} file(s)", files.len());
        }
    }

    link.disconnect();
    Ok(())
}
