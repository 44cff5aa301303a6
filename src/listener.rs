//! Accepting side: one accept-loop thread per listener, one thread per connection.

use crate::challenge::ChallengeStore;
use crate::config::{ServerOptions, WebSupport};
use crate::connections::ConnectionTable;
use crate::error::{LinkError, Result};
use crate::logger::Logger;
use crate::protocol_core::FrameConfig;
use crate::registry::Handlers;
use crate::session::{Session, SessionContext};
use crate::web::HtmlPages;
use parking_lot::{const_mutex, Mutex};
use std::collections::BTreeSet;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

// Ports bound by listeners in this process. Other processes are not checked.
static USED_PORTS: Mutex<BTreeSet<u16>> = const_mutex(BTreeSet::new());

/// Holds a port in `USED_PORTS` until dropped.
#[derive(Debug)]
struct PortRegistration(u16);

impl PortRegistration {
    fn claim(port: u16) -> Result<Self> {
        if !USED_PORTS.lock().insert(port) {
            return Err(LinkError::PortInUse(port));
        }
        Ok(PortRegistration(port))
    }
}

impl Drop for PortRegistration {
    fn drop(&mut self) {
        USED_PORTS.lock().remove(&self.0);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Listening,
    Stopped,
}

pub struct Listener {
    port: u16,
    local_addr: SocketAddr,
    url: String,
    ctx: Arc<SessionContext>,
    logger: Arc<dyn Logger>,
    listening: Arc<AtomicBool>,
    // Held by the accept loop for as long as it runs.
    running: Arc<Mutex<()>>,
    connections: Arc<Mutex<ConnectionTable>>,
    registration: Option<PortRegistration>,
}

impl Listener {
    /// Bind `port` and start accepting on a background thread.
    /// Port 0 asks the OS for a free port; see [`Listener::port`].
    pub fn start(
        port: u16,
        options: ServerOptions,
        handlers: Handlers,
        logger: Arc<dyn Logger>,
    ) -> Result<Self> {
        let early = if port != 0 {
            Some(PortRegistration::claim(port)?)
        } else {
            None
        };
        logger.info(&format!("listener instantiated with port {}", port));

        let pages = match options.web {
            WebSupport::Disabled => {
                logger.info("listener has not been configured to accept web requests");
                None
            }
            WebSupport::Minimal => Some(HtmlPages::Minimal),
            WebSupport::Template(ref path) => {
                let pages = HtmlPages::load(path)?;
                logger.info(&format!(
                    "listener has extracted HTML header/footer information from {}",
                    path.display()
                ));
                Some(pages)
            }
        };
        let challenges = ChallengeStore::new(options.challenge_dir.as_deref())?;

        let socket = TcpListener::bind((options.bind, port))
            .map_err(|e| LinkError::resource(format!("cannot bind {}:{}: {}", options.bind, port, e)))?;
        let local_addr = socket.local_addr()?;
        let registration = match early {
            Some(r) => r,
            None => PortRegistration::claim(local_addr.port())?,
        };
        let port = local_addr.port();

        let listening = Arc::new(AtomicBool::new(true));
        let ctx = Arc::new(SessionContext {
            frame: options.frame,
            handlers,
            pages,
            challenges,
            logger: Arc::clone(&logger),
            listening: Arc::clone(&listening),
        });
        let running = Arc::new(Mutex::new(()));
        let connections = Arc::new(Mutex::new(ConnectionTable::new()));

        let (ready_tx, ready_rx) = mpsc::channel();
        {
            let ctx = Arc::clone(&ctx);
            let running = Arc::clone(&running);
            let connections = Arc::clone(&connections);
            thread::Builder::new()
                .name(format!("accept-{}", port))
                .spawn(move || {
                    let _running = running.lock();
                    let _ = ready_tx.send(());
                    accept_loop(socket.incoming(), port, ctx, connections);
                })?;
        }
        // The loop must own the running lock before stop() can wait on it.
        ready_rx
            .recv()
            .map_err(|_| LinkError::resource("accept loop exited before it started"))?;
        logger.info(&format!("listener is listening on port {}", port));

        let scheme = if options.https { "https://" } else { "http://" };
        Ok(Self {
            port,
            local_addr,
            url: format!("{}{}", scheme, logger.host_name()),
            ctx,
            logger,
            listening,
            running,
            connections,
            registration: Some(registration),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `http://<host>` or `https://<host>`; the host name must resolve for clients.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn frame(&self) -> &FrameConfig {
        &self.ctx.frame
    }

    pub fn state(&self) -> ListenerState {
        if self.listening.load(Ordering::SeqCst) {
            ListenerState::Listening
        } else {
            ListenerState::Stopped
        }
    }

    pub fn is_listening(&self) -> bool {
        self.state() == ListenerState::Listening
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Block until the accept loop has exited.
    pub fn wait(&self) {
        drop(self.running.lock());
    }

    /// Stop accepting: flip the flag, dial ourselves to wake `accept`, then wait
    /// for the loop to exit. Sessions already running are left alone.
    pub fn stop(&self) {
        if self.listening.swap(false, Ordering::SeqCst) {
            let ip = match self.local_addr.ip() {
                IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
                ip => ip,
            };
            if let Err(e) = TcpStream::connect(SocketAddr::new(ip, self.port)) {
                self.logger
                    .warning(&format!("listener could not wake its accept loop: {}", e));
            }
        }
        self.wait();
    }

    /// Stop, close every connection still tracked, and release the port.
    /// Failures are logged, never returned.
    pub fn shutdown(&mut self) {
        if self.registration.is_none() {
            return;
        }
        self.stop();
        for (peer, e) in self.connections.lock().close_all() {
            self.logger
                .warning(&format!("listener could not close connection from {}: {}", peer, e));
        }
        self.registration = None;
        self.logger
            .info(&format!("listener on port {} shut down", self.port));
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Accept errors the loop survives; anything else (EMFILE, ENOBUFS, ...) ends it.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset
    )
}

fn accept_loop<I>(
    incoming: I,
    port: u16,
    ctx: Arc<SessionContext>,
    connections: Arc<Mutex<ConnectionTable>>,
) where
    I: IntoIterator<Item = io::Result<TcpStream>>,
{
    for conn in incoming {
        if !ctx.listening.load(Ordering::SeqCst) {
            break;
        }
        match conn {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                let peer = match stream.peer_addr() {
                    Ok(p) => p,
                    Err(e) => {
                        ctx.logger
                            .warning(&format!("dropping connection with no peer address: {}", e));
                        continue;
                    }
                };
                ctx.logger.info(&format!(
                    "listener accepted a connection from {} on port {}",
                    peer.ip(),
                    port
                ));
                let stream = Arc::new(stream);
                {
                    let mut table = connections.lock();
                    table.prune();
                    table.insert(&stream, peer);
                }
                let session = Session::new(Arc::clone(&ctx), stream, peer);
                if let Err(e) = thread::Builder::new()
                    .name(format!("session-{}", peer))
                    .spawn(move || session.run())
                {
                    ctx.logger
                        .error(&format!("cannot spawn session for {}: {}", peer, e));
                }
            }
            Err(e) if is_transient(&e) => {
                ctx.logger
                    .warning(&format!("accept on port {} interrupted: {}", port, e));
            }
            Err(e) => {
                ctx.logger.error(&format!(
                    "accept error on port {}: {}; no longer accepting connections",
                    port, e
                ));
                break;
            }
        }
    }
    ctx.listening.store(false, Ordering::SeqCst);
    ctx.logger
        .info(&format!("listener is no longer listening on port {}", port));
}
