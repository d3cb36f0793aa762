//! Server topology: the main dispatcher, per-transfer sub-servers on
//! ephemeral ports, and the supervisor that reaps them.
//!
//! Only the initial RRQ of a transaction arrives on the well-known
//! port. The protocol identifies a transfer by its pair of UDP ports
//! (the TID), and mandates that the server answer from a fresh one; so
//! every accepted request binds a new ephemeral socket whose thread
//! then owns the whole transfer: lockstep DATA/ACK, re-transmission,
//! and teardown.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::transfer::{Transfer, TransferError, TransferSource};
use crate::wire::{ErrorCode, Mode, Packet, WireError};

/// How often a (sub-)server wakes to check timers and shutdown flags.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long a sub-server thread is given to wind down when reaped.
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// How many timeouts without hearing from the client before a transfer
/// is abandoned.
const GIVE_UP_FACTOR: u32 = 5;

/// Resolution failures a [`Handler`] may report; the server translates
/// them into wire error packets.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("{0}")]
    Other(String),
}

impl HandlerError {
    fn code(&self) -> ErrorCode {
        match self {
            HandlerError::NotFound(_) => ErrorCode::NotFound,
            HandlerError::PermissionDenied(_) => ErrorCode::NotAuth,
            HandlerError::Other(_) => ErrorCode::Undefined,
        }
    }
}

/// Resolves a requested filename to the byte stream to serve.
pub trait Handler: Send + Sync + 'static {
    fn resolve(&self, filename: &str, client: SocketAddr)
        -> Result<TransferSource, HandlerError>;
}

/// The TFTP server: binds the well-known port, dispatches RRQs, and
/// supervises one sub-server per active transfer.
pub struct TftpServer<H> {
    socket: UdpSocket,
    handler: Arc<H>,
    subs: SubServers,
    done: Arc<AtomicBool>,
}

impl<H: Handler> TftpServer<H> {
    pub fn bind(addr: impl ToSocketAddrs, handler: H) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        Ok(Self {
            socket,
            handler: Arc::new(handler),
            subs: SubServers::new(),
            done: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Serves requests until [`shutdown`](Self::shutdown) is called
    /// from another thread.
    pub fn serve_forever(&self) -> io::Result<()> {
        let mut buf = vec![0u8; 65536];
        while !self.done.load(Ordering::SeqCst) {
            let (len, client) = match self.socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    continue;
                }
                Err(err) => return Err(err),
            };
            self.handle_packet(&buf[..len], client);
        }
        Ok(())
    }

    /// Stops the receive loop and reaps every running transfer.
    pub fn shutdown(&self) {
        self.done.store(true, Ordering::SeqCst);
        self.subs.close();
    }

    fn handle_packet(&self, buf: &[u8], client: SocketAddr) {
        match Packet::parse(buf) {
            Ok(Packet::Rrq {
                filename,
                mode,
                options,
            }) => {
                info!("{client} - RRQ ({}) {filename}", mode.as_str());
                self.handle_rrq(client, &filename, mode, &options);
            }
            // A stray ERROR on the main port means a transfer we were
            // not going to start anyway; drop it
            Ok(Packet::Error { .. }) => {}
            Ok(packet) => {
                warn!("{client} - ERROR - unsupported operation; {packet:?}");
                self.send_main(
                    client,
                    &Packet::error_with(ErrorCode::Undefined, "Unsupported operation"),
                );
            }
            Err(WireError::Unsupported(op)) => {
                warn!("{client} - ERROR - unsupported operation; {op}");
                self.send_main(
                    client,
                    &Packet::error_with(ErrorCode::Undefined, format!("Unsupported operation, {op}")),
                );
            }
            Err(err) => {
                warn!("{client} - ERROR - invalid request; {err}");
                self.send_main(
                    client,
                    &Packet::error_with(ErrorCode::Undefined, format!("Invalid request, {err}")),
                );
            }
        }
    }

    fn handle_rrq(&self, client: SocketAddr, filename: &str, mode: Mode, options: &[(String, String)]) {
        let source = match self.handler.resolve(filename, client) {
            Ok(source) => source,
            Err(err) => {
                info!("{client} - ERROR - {err}");
                self.send_main(client, &Packet::error(err.code()));
                return;
            }
        };
        let mut transfer = Transfer::new(client, source, mode);
        let accepted = match transfer.negotiate(options) {
            Ok(accepted) => accepted,
            Err(TransferError::BadOptions(msg)) => {
                info!("{client} - ERROR - bad options; {msg}");
                self.send_main(client, &Packet::error_with(ErrorCode::InvalidOpt, msg));
                return;
            }
            Err(err) => {
                info!("{client} - ERROR - {err}");
                self.send_main(
                    client,
                    &Packet::error_with(ErrorCode::Undefined, err.to_string()),
                );
                return;
            }
        };
        let reply = if accepted.is_empty() {
            // No options to acknowledge: answer with the first DATA
            match transfer.get_block(1) {
                Ok(data) => Packet::Data { block: 1, data },
                Err(err) => {
                    info!("{client} - ERROR - {err}");
                    self.send_main(
                        client,
                        &Packet::error_with(ErrorCode::Undefined, err.to_string()),
                    );
                    return;
                }
            }
        } else {
            Packet::Oack { options: accepted }
        };

        // The reply must originate from the transfer's own ephemeral
        // port (its TID), not the well-known port
        match SubServer::spawn(&self.socket, transfer, reply, self.done.clone()) {
            Ok(handle) => self.subs.add(handle),
            Err(err) => {
                error!("{client} - failed to start sub-server; {err}");
                self.send_main(
                    client,
                    &Packet::error_with(ErrorCode::Undefined, "Server error"),
                );
            }
        }
    }

    fn send_main(&self, client: SocketAddr, packet: &Packet) {
        if let Err(err) = self.socket.send_to(&packet.to_bytes(), client) {
            warn!("{client} - send failed; {err}");
        }
    }
}

impl<H> Drop for TftpServer<H> {
    fn drop(&mut self) {
        self.done.store(true, Ordering::SeqCst);
        self.subs.close();
    }
}

/// A running transfer: the ephemeral socket, its thread, and the flag
/// the supervisor watches.
struct SubHandle {
    done: Arc<AtomicBool>,
    thread: JoinHandle<()>,
    client: SocketAddr,
    local: SocketAddr,
}

struct SubServer {
    socket: UdpSocket,
    transfer: Transfer,
    done: Arc<AtomicBool>,
    server_done: Arc<AtomicBool>,
}

impl SubServer {
    /// Binds an ephemeral socket on the main socket's address, sends
    /// the opening *reply* from it, and starts the transfer thread.
    fn spawn(
        main: &UdpSocket,
        mut transfer: Transfer,
        reply: Packet,
        server_done: Arc<AtomicBool>,
    ) -> io::Result<SubHandle> {
        let mut addr = main.local_addr()?;
        addr.set_port(0);
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        let local = socket.local_addr()?;
        let client = transfer.address;
        debug!("{client} - starting sub-server on {local}");

        socket.send_to(&reply.to_bytes(), client)?;
        transfer.last_send = Some(Instant::now());

        let done = Arc::new(AtomicBool::new(false));
        let sub = SubServer {
            socket,
            transfer,
            done: done.clone(),
            server_done,
        };
        let thread = thread::Builder::new()
            .name(format!("tftp-{client}"))
            .spawn(move || sub.run())?;
        Ok(SubHandle {
            done,
            thread,
            client,
            local,
        })
    }

    fn run(mut self) {
        let mut buf = vec![0u8; 65536 + 4];
        while !self.done.load(Ordering::SeqCst) && !self.server_done.load(Ordering::SeqCst) {
            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) => {
                    // Anything from a foreign TID is not ours to answer
                    if from != self.transfer.address {
                        warn!(
                            "{from} - IGNORE - bad client for {}",
                            self.transfer.address
                        );
                        continue;
                    }
                    self.transfer.last_recv = Instant::now();
                    let response = self.handle(&buf[..len]);
                    if let Some(packet) = response {
                        self.send(&packet);
                    }
                }
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) => {}
                Err(err) => {
                    error!("{} - socket error; {err}", self.transfer.address);
                    break;
                }
            }
            self.service_tick();
        }
        self.done.store(true, Ordering::SeqCst);
    }

    fn handle(&mut self, buf: &[u8]) -> Option<Packet> {
        match Packet::parse(buf) {
            Ok(Packet::Ack { block }) => self.handle_ack(block),
            Ok(Packet::Error { code, message }) => {
                // The peer aborted; terminate per RFC 1350
                debug!(
                    "{} - peer error {code:?}: {message}",
                    self.transfer.address
                );
                self.done.store(true, Ordering::SeqCst);
                None
            }
            Ok(packet) => {
                warn!(
                    "{} - ERROR - unsupported operation; {packet:?}",
                    self.transfer.address
                );
                Some(Packet::error_with(
                    ErrorCode::Undefined,
                    "Unsupported operation",
                ))
            }
            Err(err) => {
                warn!("{} - ERROR - invalid request; {err}", self.transfer.address);
                Some(Packet::error_with(
                    ErrorCode::Undefined,
                    format!("Invalid request, {err}"),
                ))
            }
        }
    }

    fn handle_ack(&mut self, wire_block: u16) -> Option<Packet> {
        let client = self.transfer.address;
        let block = self.transfer.widen_block(wire_block);
        self.transfer.ack(block);
        match self.transfer.get_block(block + 1) {
            Ok(data) => Some(Packet::Data {
                block: (block + 1) as u16,
                data,
            }),
            Err(TransferError::AlreadyAcknowledged) => None,
            Err(TransferError::Done) => {
                self.done.store(true, Ordering::SeqCst);
                let duration = self.transfer.started.elapsed().as_secs_f64();
                let bytes = self.transfer.transferred();
                info!(
                    "{client} - DONE - {duration:.1} secs, {bytes} bytes, ~{:.1} Kb/s",
                    bytes as f64 / duration.max(f64::EPSILON) / 1024.0
                );
                None
            }
            Err(err) => {
                self.done.store(true, Ordering::SeqCst);
                Some(Packet::error_with(ErrorCode::Undefined, err.to_string()))
            }
        }
    }

    /// The re-transmission timer: when nothing has been heard for a
    /// timeout, re-send whatever is unacknowledged; when the silence
    /// stretches past [`GIVE_UP_FACTOR`] timeouts, abandon the
    /// transfer.
    fn service_tick(&mut self) {
        let now = Instant::now();
        let timeout = self.transfer.timeout;
        if now.saturating_duration_since(self.transfer.last_recv) <= timeout {
            return;
        }
        match self.transfer.last_send {
            None => {
                error!("internal error; timeout without send");
                self.done.store(true, Ordering::SeqCst);
            }
            Some(last_send)
                if last_send.saturating_duration_since(self.transfer.last_recv)
                    > timeout * GIVE_UP_FACTOR =>
            {
                warn!(
                    "{} - timed out to {}",
                    self.transfer.address,
                    self.socket
                        .local_addr()
                        .map(|a| a.to_string())
                        .unwrap_or_else(|_| "?".into()),
                );
                self.done.store(true, Ordering::SeqCst);
            }
            Some(last_send) if now.saturating_duration_since(last_send) > timeout => {
                let packets: Vec<Packet> = self
                    .transfer
                    .unacknowledged()
                    .map(|(block, data)| Packet::Data {
                        block: block as u16,
                        data: data.to_vec(),
                    })
                    .collect();
                for packet in &packets {
                    self.send(packet);
                }
                // Stamped even with an empty cache so a silent client
                // still runs into the give-up limit
                self.transfer.last_send = Some(Instant::now());
            }
            Some(_) => {}
        }
    }

    fn send(&mut self, packet: &Packet) {
        match self.socket.send_to(&packet.to_bytes(), self.transfer.address) {
            Ok(_) => self.transfer.last_send = Some(Instant::now()),
            Err(err) => warn!("{} - send failed; {err}", self.transfer.address),
        }
    }
}

/// Supervisor for the sub-server threads. Completed transfers (the
/// `done` flag) are reaped with a bounded join; failure to join in time
/// is a fatal server error.
struct SubServers {
    shared: Arc<SubsShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

struct SubsShared {
    done: AtomicBool,
    alive: Mutex<Vec<SubHandle>>,
}

impl SubServers {
    fn new() -> Self {
        let shared = Arc::new(SubsShared {
            done: AtomicBool::new(false),
            alive: Mutex::new(Vec::new()),
        });
        let worker = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("tftp-supervisor".into())
            .spawn(move || worker.run())
            .expect("spawning the supervisor thread");
        Self {
            shared,
            thread: Mutex::new(Some(thread)),
        }
    }

    fn add(&self, handle: SubHandle) {
        self.shared
            .alive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    fn close(&self) {
        self.shared.done.store(true, Ordering::SeqCst);
        if let Some(thread) = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = thread.join();
        }
    }
}

impl SubsShared {
    fn run(&self) {
        while !self.done.load(Ordering::SeqCst) {
            thread::sleep(POLL_INTERVAL);
            self.reap(false);
        }
        // Shutdown: flag every remaining transfer and reap the lot
        self.reap(true);
    }

    fn reap(&self, all: bool) {
        let mut alive = self.alive.lock().unwrap_or_else(PoisonError::into_inner);
        let mut remaining = Vec::new();
        for handle in alive.drain(..) {
            if all {
                handle.done.store(true, Ordering::SeqCst);
            }
            if all || handle.done.load(Ordering::SeqCst) {
                debug!(
                    "{} - shutting down server on {}",
                    handle.client, handle.local
                );
                let deadline = Instant::now() + JOIN_TIMEOUT;
                while !handle.thread.is_finished() {
                    if Instant::now() >= deadline {
                        panic!("failed to shutdown thread for {}", handle.local);
                    }
                    thread::sleep(Duration::from_millis(1));
                }
                let _ = handle.thread.join();
            } else {
                remaining.push(handle);
            }
        }
        *alive = remaining;
    }
}
