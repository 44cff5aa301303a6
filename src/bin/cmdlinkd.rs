use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;

use cmdlink::cli::DaemonOpts;
use cmdlink::config::{DaemonConfig, WebSupport};
use cmdlink::logger::{LogLevel, Logger, TextLogger};
use cmdlink::protocol::DEFAULT_PORT;
use cmdlink::registry::{CommandRegistry, Handlers, WebRegistry};
use cmdlink::web::WebForm;
use cmdlink::Listener;

fn main() {
    let opts = DaemonOpts::parse();
    if let Err(e) = run(opts) {
        eprintln!("cmdlinkd: {:#}", e);
        std::process::exit(1);
    }
}

fn run(opts: DaemonOpts) -> Result<()> {
    let mut cfg = match opts.config {
        Some(ref path) => DaemonConfig::load(path)?,
        None => DaemonConfig::default(),
    };
    // Flags win over the file.
    if opts.port.is_some() {
        cfg.port = opts.port;
    }
    if opts.bind.is_some() {
        cfg.bind = opts.bind;
    }
    if opts.html_template.is_some() {
        cfg.html_template = opts.html_template.clone();
    }
    if opts.web {
        cfg.web = Some("minimal".to_string());
    }
    if opts.challenge_dir.is_some() {
        cfg.challenge_dir = opts.challenge_dir.clone();
    }
    if opts.log_file.is_some() {
        cfg.log_file = opts.log_file.clone();
    }
    if opts.log_level.is_some() {
        cfg.log_level = opts.log_level.clone();
    }

    let level: LogLevel = cfg.log_level.as_deref().unwrap_or("info").parse()?;
    let log_path = cfg
        .log_file
        .clone()
        .unwrap_or_else(|| PathBuf::from("cmdlinkd.log"));
    let logger = Arc::new(
        TextLogger::new(&log_path, "cmdlinkd", "")
            .with_context(|| format!("open log {}", log_path.display()))?
            .with_level(level),
    );

    let options = cfg.server_options()?;
    let port = cfg.port.unwrap_or(DEFAULT_PORT);
    let handlers = builtin_handlers(options.frame.argument_separator.clone());

    println!("Starting cmdlinkd:");
    println!("  Port: {}", port);
    println!("  Bind: {}", options.bind);
    println!("  Log:  {}", logger.log_name());
    match options.web {
        WebSupport::Disabled => println!("  Web:  disabled"),
        WebSupport::Minimal => println!("  Web:  minimal pages"),
        WebSupport::Template(ref p) => println!("  Web:  template {}", p.display()),
    }

    let mut listener = match Listener::start(port, options, handlers, logger.clone()) {
        Ok(l) => l,
        Err(e) => {
            logger.error(&format!("cannot start listener: {}", e));
            logger.end_log(1);
            return Err(e.into());
        }
    };
    println!("Listening at {}:{}", listener.url(), listener.port());

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("install Ctrl-C handler")?;
    let _ = rx.recv();

    logger.info("interrupt received; shutting down");
    listener.shutdown();
    let code = if logger.errors_logged() > 0 || logger.warnings_logged() > 0 {
        1
    } else {
        0
    };
    logger.end_log(code);
    Ok(())
}

/// Handlers every daemon answers to.
fn builtin_handlers(argument_separator: String) -> Handlers {
    let commands = CommandRegistry::new();
    commands.register("Ping", |arg: &str| Ok(arg.to_string()));
    commands.register("Hostname", |_: &str| Ok(cmdlink::logger::local_host_name()));
    commands.register("Time", |_: &str| Ok(chrono::Local::now().to_rfc3339()));
    commands.register("Sum", |arg: &str| {
        let mut total = 0.0f64;
        for token in arg.split_whitespace() {
            total += token
                .parse::<f64>()
                .with_context(|| format!("not a number: \"{}\"", token))?;
        }
        Ok(total.to_string())
    });
    commands.register("Split", move |arg: &str| {
        Ok(arg.split(argument_separator.as_str()).collect::<Vec<_>>().join(" "))
    });

    let web = WebRegistry::new();
    web.register("Echo", |form: &WebForm| {
        let mut body = String::from("<dl>\n");
        for (k, v) in &form.fields {
            body.push_str(&format!("<dt>{}</dt><dd>{}</dd>\n", escape_html(k), escape_html(v)));
        }
        body.push_str("</dl>");
        Ok(body)
    });

    Handlers::new(Arc::new(commands), Arc::new(web))
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
