use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, error, info, warn};

use crate::network::Connection;
use crate::protocol::CommandExecutor;
use crate::{config::Config, error::Error, error::Result};

const LISTENER: Token = Token(0);

/// Single-threaded reactor around the keyspace.
///
/// One thread owns the listener, every connection, and the store; there is
/// no locking because there is no parallel mutation. The poll wait is the
/// only suspension point, bounded by a timeout so the loop observes the
/// shutdown flag between bursts of traffic.
pub struct Server {
    config: Config,
    listener: TcpListener,
    shutdown: Arc<AtomicBool>,
}

impl Server {
    /// Validate the configuration and bind the listening socket.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let addr: SocketAddr = format!("{}:{}", config.bind_addr, config.port)
            .parse()
            .map_err(|e| Error::Config(format!("invalid bind address: {e}")))?;
        let listener = TcpListener::bind(addr)?;

        Ok(Self {
            config,
            listener,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Address the listener actually bound, useful with port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle for signal handlers: setting the flag stops the event loop
    /// at its next tick.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Run the event loop until the shutdown flag is set.
    pub fn run(mut self) -> Result<()> {
        let mut poll = Poll::new()?;
        let mut events = Events::with_capacity(1024);
        poll.registry()
            .register(&mut self.listener, LISTENER, Interest::READABLE)?;

        let mut executor = CommandExecutor::new();
        let mut connections: HashMap<Token, (TcpStream, Connection)> = HashMap::new();
        let mut next_token = 1usize;
        let timeout = Duration::from_millis(self.config.poll_timeout_ms);

        info!("listening on {}", self.local_addr()?);

        while !self.shutdown.load(Ordering::Acquire) {
            if let Err(e) = poll.poll(&mut events, Some(timeout)) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER => {
                        self.accept_pending(&poll, &mut connections, &mut next_token);
                    }
                    token => {
                        let mut closed = false;
                        if let Some((stream, conn)) = connections.get_mut(&token) {
                            let was_writing = conn.wants_write();
                            conn.drive(stream, &mut executor);
                            if conn.is_closing() {
                                closed = true;
                            } else if conn.wants_write() != was_writing {
                                // Poll interest follows the connection
                                // state: read readiness while parsing,
                                // write readiness while flushing.
                                let interest = if conn.wants_write() {
                                    Interest::WRITABLE
                                } else {
                                    Interest::READABLE
                                };
                                if let Err(e) = poll.registry().reregister(stream, token, interest)
                                {
                                    error!("reregister failed: {e}");
                                    closed = true;
                                }
                            }
                        }
                        if closed {
                            if let Some((mut stream, _)) = connections.remove(&token) {
                                let _ = poll.registry().deregister(&mut stream);
                            }
                        }
                    }
                }
            }
        }

        for (_, (mut stream, _)) in connections.drain() {
            let _ = poll.registry().deregister(&mut stream);
        }
        info!("server stopped");
        Ok(())
    }

    /// Drain the accept queue; the listener is non-blocking so a burst of
    /// connections is absorbed in one readiness notification.
    fn accept_pending(
        &self,
        poll: &Poll,
        connections: &mut HashMap<Token, (TcpStream, Connection)>,
        next_token: &mut usize,
    ) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, addr)) => {
                    if connections.len() >= self.config.max_connections {
                        warn!("connection limit reached, refusing {addr}");
                        continue;
                    }
                    debug!("accepted {addr}");
                    if let Err(e) = stream.set_nodelay(self.config.tcp_nodelay) {
                        debug!("set_nodelay failed for {addr}: {e}");
                    }

                    let token = Token(*next_token);
                    *next_token += 1;
                    if let Err(e) = poll.registry().register(&mut stream, token, Interest::READABLE)
                    {
                        error!("register failed for {addr}: {e}");
                        continue;
                    }
                    let conn = Connection::new(self.config.connection_buffer_size);
                    connections.insert(token, (stream, conn));
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!("accept failed: {e}");
                    break;
                }
            }
        }
    }
}
