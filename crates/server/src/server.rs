//! TCP front end.
//!
//! One thread accepts connections; every connection gets its own thread.
//! Connection threads use a short read timeout so they can interleave
//! reading requests with delivering queued outbound messages.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cellsync_config::LimitsConfig;
use cellsync_engine::ClientId;
use cellsync_protocol::{
    client_id_line, decode_request, encode_message, handshake_field, spreadsheet_list,
    ServerMessage,
};

use crate::controller::Controller;
use crate::registry::OutboundLine;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const READ_POLL_INTERVAL: Duration = Duration::from_millis(100);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
const DISCARD_LIMIT: Duration = Duration::from_secs(1);

/// Operational counters.
#[derive(Clone, Default)]
pub struct ServerMetrics {
    /// Connections closed due to parse failure limit.
    pub connections_closed_parse_failures: Arc<AtomicU64>,
    /// Connections closed due to oversized message.
    pub connections_closed_oversize: Arc<AtomicU64>,
    /// Connections refused due to connection limit.
    pub connections_refused_limit: Arc<AtomicU64>,
}

/// Cloneable trigger for stopping a running [`Server`] from another thread.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Server {
    listener_handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    bound_addr: SocketAddr,
    controller: Arc<Controller>,
    metrics: ServerMetrics,
}

impl Server {
    /// Bind `addr` and start accepting connections in the background.
    pub fn start(addr: &str, limits: LimitsConfig, controller: Arc<Controller>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let bound_addr = listener.local_addr()?;
        // Non-blocking so the accept loop can observe the shutdown flag
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let metrics = ServerMetrics::default();

        let listener_handle = {
            let shutdown = Arc::clone(&shutdown);
            let controller = Arc::clone(&controller);
            let metrics = metrics.clone();
            thread::Builder::new()
                .name("cellsync-accept".into())
                .spawn(move || run_listener(listener, shutdown, limits, controller, metrics))?
        };

        log::info!("Spreadsheet server listening on {}", bound_addr);

        Ok(Self {
            listener_handle: Some(listener_handle),
            shutdown,
            bound_addr,
            controller,
            metrics,
        })
    }

    pub fn bound_addr(&self) -> SocketAddr {
        self.bound_addr
    }

    pub fn is_running(&self) -> bool {
        self.listener_handle.is_some() && !self.shutdown.load(Ordering::SeqCst)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(Arc::clone(&self.shutdown))
    }

    pub fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    pub fn metrics(&self) -> &ServerMetrics {
        &self.metrics
    }

    /// Stop accepting, save open spreadsheets and notify clients.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.join_listener();
    }

    /// Block until the accept loop ends (shutdown triggered or listener failed).
    pub fn wait(mut self) {
        self.join_listener();
    }

    fn join_listener(&mut self) {
        if let Some(handle) = self.listener_handle.take() {
            if handle.join().is_err() {
                log::error!("Accept thread panicked");
            }
            log::info!("Spreadsheet server stopped");
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_listener(
    listener: TcpListener,
    shutdown: Arc<AtomicBool>,
    limits: LimitsConfig,
    controller: Arc<Controller>,
    metrics: ServerMetrics,
) {
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, addr)) => {
                let registry = controller.registry();
                if registry.connection_count() >= limits.max_connections {
                    log::warn!(
                        "Connection refused from {}: limit of {} reached",
                        addr,
                        limits.max_connections
                    );
                    metrics.connections_refused_limit.fetch_add(1, Ordering::Relaxed);
                    refuse(stream);
                    continue;
                }

                let (client, outbound) = registry.register();
                log::debug!("Accepted connection from {} as client {}", addr, client);

                let controller = Arc::clone(&controller);
                let shutdown = Arc::clone(&shutdown);
                let metrics = metrics.clone();
                let spawned = thread::Builder::new()
                    .name(format!("cellsync-client-{client}"))
                    .spawn(move || {
                        let mut session = Session {
                            client,
                            controller: &controller,
                            limits,
                            metrics: &metrics,
                            shutdown: &shutdown,
                        };
                        if let Err(e) = session.run(stream, outbound) {
                            log::warn!("Connection error from {}: {}", addr, e);
                        }
                        controller.disconnect(client);
                        controller.registry().unregister(client);
                        log::debug!("Client {} from {} closed", client, addr);
                    });
                if let Err(e) = spawned {
                    log::error!("Failed to spawn connection thread: {}", e);
                    registry.unregister(client);
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                log::error!("Accept error: {}", e);
                break;
            }
        }
    }

    controller.shutdown();
}

fn refuse(mut stream: TcpStream) {
    if stream.set_nonblocking(false).is_ok() {
        let _ = stream.set_write_timeout(Some(Duration::from_secs(1)));
        if let Ok(line) = encode_message(&ServerMessage::server_error("Server full")) {
            let _ = stream.write_all(line.as_bytes());
        }
    }
}

/// What one poll of the socket produced.
enum ReadEvent {
    Line(String),
    Idle,
    Closed,
    TooLong,
}

/// Newline framing that survives read timeouts and bounds line length.
struct LineReader {
    reader: BufReader<TcpStream>,
    buf: Vec<u8>,
    max_len: usize,
}

impl LineReader {
    fn new(stream: TcpStream, max_len: usize) -> Self {
        Self {
            reader: BufReader::new(stream),
            buf: Vec::new(),
            max_len,
        }
    }

    fn poll(&mut self) -> io::Result<ReadEvent> {
        // Room for max_len bytes plus the newline; one more byte means too long
        let budget = (self.max_len + 2).saturating_sub(self.buf.len()) as u64;
        match Read::take(&mut self.reader, budget).read_until(b'\n', &mut self.buf) {
            Ok(0) => Ok(ReadEvent::Closed),
            Ok(_) => {
                if self.buf.last() == Some(&b'\n') {
                    self.buf.pop();
                    if self.buf.last() == Some(&b'\r') {
                        self.buf.pop();
                    }
                    if self.buf.len() > self.max_len {
                        return Ok(ReadEvent::TooLong);
                    }
                    let line = String::from_utf8_lossy(&self.buf).into_owned();
                    self.buf.clear();
                    Ok(ReadEvent::Line(line))
                } else if self.buf.len() > self.max_len {
                    Ok(ReadEvent::TooLong)
                } else {
                    Ok(ReadEvent::Idle)
                }
            }
            Err(ref e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(ReadEvent::Idle)
            }
            Err(e) => Err(e),
        }
    }
}

/// One client connection from handshake to close.
struct Session<'a> {
    client: ClientId,
    controller: &'a Controller,
    limits: LimitsConfig,
    metrics: &'a ServerMetrics,
    shutdown: &'a AtomicBool,
}

impl Session<'_> {
    fn run(&mut self, mut stream: TcpStream, outbound: Receiver<OutboundLine>) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(READ_POLL_INTERVAL))?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
        let mut reader = LineReader::new(stream.try_clone()?, self.limits.max_message_size);

        // Handshake: username, listing, sheet name, initial cells, id
        let Some(username) = self.read_handshake_line(&mut reader, &mut stream)? else {
            return Ok(());
        };
        let names = self.controller.spreadsheet_names();
        stream.write_all(spreadsheet_list(&names).as_bytes())?;

        let Some(sheet_name) = self.read_handshake_line(&mut reader, &mut stream)? else {
            return Ok(());
        };
        let joined = match self.controller.connect(self.client, &username, &sheet_name) {
            Ok(joined) => joined,
            Err(e) => {
                log::warn!("Client {} could not open {:?}: {}", self.client, sheet_name, e);
                send_direct(&mut stream, &ServerMessage::server_error(e.to_string()))?;
                return Ok(());
            }
        };

        for cell in joined.cells.into_iter().filter(|c| !c.content.is_empty()) {
            let message = ServerMessage::CellUpdated {
                cell_name: cell.name,
                contents: cell.content,
            };
            send_direct(&mut stream, &message)?;
        }
        stream.write_all(client_id_line(self.client).as_bytes())?;
        stream.flush()?;

        self.serve(&mut reader, &mut stream, &outbound)
    }

    /// Request loop after a completed handshake.
    fn serve(
        &mut self,
        reader: &mut LineReader,
        stream: &mut TcpStream,
        outbound: &Receiver<OutboundLine>,
    ) -> io::Result<()> {
        let mut parse_failures: u32 = 0;

        loop {
            if !deliver(stream, outbound)? {
                return Ok(());
            }

            let line = match reader.poll()? {
                ReadEvent::Line(line) => line,
                ReadEvent::Idle => continue,
                ReadEvent::Closed => return Ok(()),
                ReadEvent::TooLong => {
                    self.reject_oversize(stream)?;
                    return Ok(());
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            match decode_request(&line) {
                Ok(request) => {
                    parse_failures = 0;
                    self.controller.handle(self.client, request);
                }
                Err(e) => {
                    parse_failures += 1;
                    log::debug!(
                        "Malformed request from client {} ({}/{}): {}",
                        self.client,
                        parse_failures,
                        self.limits.max_parse_failures,
                        e
                    );
                    self.controller.registry().send_to(
                        self.client,
                        &ServerMessage::malformed_request(format!("Malformed request: {e}")),
                    );
                    if parse_failures >= self.limits.max_parse_failures {
                        log::warn!(
                            "Client {} exceeded parse failure limit, disconnecting",
                            self.client
                        );
                        self.metrics
                            .connections_closed_parse_failures
                            .fetch_add(1, Ordering::Relaxed);
                        deliver(stream, outbound)?;
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Next non-empty handshake line, or `None` if the peer left or the
    /// server is stopping.
    fn read_handshake_line(
        &mut self,
        reader: &mut LineReader,
        stream: &mut TcpStream,
    ) -> io::Result<Option<String>> {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return Ok(None);
            }
            match reader.poll()? {
                ReadEvent::Line(line) => {
                    if let Some(field) = handshake_field(&line) {
                        return Ok(Some(field.to_string()));
                    }
                }
                ReadEvent::Idle => {}
                ReadEvent::Closed => return Ok(None),
                ReadEvent::TooLong => {
                    self.reject_oversize(stream)?;
                    return Ok(None);
                }
            }
        }
    }

    fn reject_oversize(&self, stream: &mut TcpStream) -> io::Result<()> {
        log::warn!(
            "Client {} sent a line over {} bytes, disconnecting",
            self.client,
            self.limits.max_message_size
        );
        self.metrics
            .connections_closed_oversize
            .fetch_add(1, Ordering::Relaxed);
        send_direct(
            stream,
            &ServerMessage::malformed_request(format!(
                "Message exceeds {} bytes",
                self.limits.max_message_size
            )),
        )?;
        discard_input(stream);
        Ok(())
    }
}

/// Half-close and swallow unread input. Closing a socket with unread data
/// resets the connection, which can destroy the last message in flight.
fn discard_input(stream: &mut TcpStream) {
    let _ = stream.shutdown(Shutdown::Write);
    let deadline = Instant::now() + DISCARD_LIMIT;
    let mut scratch = [0u8; 4096];
    while Instant::now() < deadline {
        match stream.read(&mut scratch) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
    }
}

/// Flush queued outbound lines. Returns `false` once the queue is closed.
fn deliver(stream: &mut TcpStream, outbound: &Receiver<OutboundLine>) -> io::Result<bool> {
    let mut wrote = false;
    let open = loop {
        match outbound.try_recv() {
            Ok(line) => {
                stream.write_all(line.as_bytes())?;
                wrote = true;
            }
            Err(TryRecvError::Empty) => break true,
            Err(TryRecvError::Disconnected) => break false,
        }
    };
    if wrote {
        stream.flush()?;
    }
    Ok(open)
}

fn send_direct(stream: &mut TcpStream, message: &ServerMessage) -> io::Result<()> {
    let line =
        encode_message(message).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    stream.write_all(line.as_bytes())?;
    stream.flush()
}
