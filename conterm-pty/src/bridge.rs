//! Transport adapter between blocking pipes and a pollable socket
//!
//! Some pseudoterminal implementations (ConPTY) only expose blocking anonymous
//! pipes. The consumer wants a single non-blocking channel it can poll from
//! its frame loop, so the pipes are bridged onto one end of a connected
//! loopback socket pair with one thread per direction:
//!
//! - outbound: pty output pipe -> socket
//! - inbound: socket -> pty input pipe
//!
//! Each thread moves bytes in order with nothing lost, retries partial and
//! would-block writes, and watches a shared stop flag. When either thread ends
//! it shuts the socket down so the consumer observes end-of-stream.

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Size of each chunk moved between pipe and socket
pub const BUFFER_SIZE: usize = 4096;

/// How long the inbound thread blocks on the socket before rechecking the
/// stop flag
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Pause before retrying a write that made no progress
const WRITE_BACKOFF: Duration = Duration::from_millis(1);

/// How long dropping a bridge waits for its threads to return
pub const DROP_GRACE: Duration = Duration::from_millis(500);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a bridge thread ended
#[derive(Debug)]
pub enum BridgeExit {
    /// The stop flag was raised
    Stopped,
    /// The pty side closed (child exited or pseudoconsole torn down)
    EndOfStream,
    /// The consumer closed or reset its end of the socket
    PeerClosed,
    /// Any other I/O failure
    Failed(io::Error),
}

impl BridgeExit {
    /// Whether the thread ended because of an error nobody asked for
    pub fn is_failure(&self) -> bool {
        matches!(self, BridgeExit::Failed(_))
    }
}

#[derive(Clone, Copy)]
enum Side {
    Pty,
    Peer,
}

fn classify(side: Side, err: io::Error, stop: &AtomicBool) -> BridgeExit {
    if stop.load(Ordering::Acquire) {
        return BridgeExit::Stopped;
    }
    match (side, err.kind()) {
        (Side::Pty, io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof) => {
            BridgeExit::EndOfStream
        }
        (
            Side::Peer,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::NotConnected,
        ) => BridgeExit::PeerClosed,
        _ => BridgeExit::Failed(err),
    }
}

/// Write all of `data`, retrying partial writes and transient errors until
/// done or until `stop` is raised.
pub fn write_fully<W: Write + ?Sized>(
    sink: &mut W,
    mut data: &[u8],
    stop: &AtomicBool,
) -> io::Result<()> {
    while !data.is_empty() {
        if stop.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::Interrupted, "bridge stopped"));
        }
        match sink.write(data) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                thread::sleep(WRITE_BACKOFF)
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Copy pty output to the consumer socket until one side closes or `stop`
/// is raised.
pub fn pump_outbound<R, W>(source: &mut R, sink: &mut W, stop: &AtomicBool) -> BridgeExit
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut buf = [0u8; BUFFER_SIZE];
    loop {
        if stop.load(Ordering::Acquire) {
            return BridgeExit::Stopped;
        }
        let n = match source.read(&mut buf) {
            Ok(0) => return BridgeExit::EndOfStream,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return classify(Side::Pty, e, stop),
        };
        if let Err(e) = write_fully(sink, &buf[..n], stop) {
            return classify(Side::Peer, e, stop);
        }
    }
}

/// Copy consumer input from the socket to the pty until one side closes or
/// `stop` is raised.
///
/// The source is expected to time out periodically (see [`POLL_INTERVAL`]);
/// a timeout just means no input arrived.
pub fn pump_inbound<R, W>(source: &mut R, sink: &mut W, stop: &AtomicBool) -> BridgeExit
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut buf = [0u8; BUFFER_SIZE];
    loop {
        if stop.load(Ordering::Acquire) {
            return BridgeExit::Stopped;
        }
        let n = match source.read(&mut buf) {
            Ok(0) if stop.load(Ordering::Acquire) => return BridgeExit::Stopped,
            Ok(0) => return BridgeExit::PeerClosed,
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                continue
            }
            Err(e) => return classify(Side::Peer, e, stop),
        };
        if let Err(e) = write_fully(sink, &buf[..n], stop) {
            return classify(Side::Pty, e, stop);
        }
        if let Err(e) = sink.flush() {
            return classify(Side::Pty, e, stop);
        }
    }
}

/// Create a connected loopback socket pair.
///
/// Returns `(consumer, bridge_side)`. The connect is issued non-blocking and
/// polled for completion (`connect_timeout`), so a listener that never
/// accepts cannot hang the caller. The consumer end is non-blocking; the
/// bridge end stays blocking for the pump threads. The accepted connection
/// must come from the socket we just connected, otherwise another local
/// process raced us to the listener and the pair is rejected.
pub fn socket_pair() -> io::Result<(TcpStream, TcpStream)> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    let addr = listener.local_addr()?;

    let consumer = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
    let (bridge_side, peer) = listener.accept()?;
    if peer != consumer.local_addr()? {
        return Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!("unexpected loopback peer {}", peer),
        ));
    }

    consumer.set_nodelay(true)?;
    bridge_side.set_nodelay(true)?;
    consumer.set_nonblocking(true)?;
    Ok((consumer, bridge_side))
}

/// A running pair of pump threads
pub struct Bridge {
    stop: Arc<AtomicBool>,
    eos: Arc<AtomicBool>,
    socket: TcpStream,
    outbound: Option<JoinHandle<BridgeExit>>,
    inbound: Option<JoinHandle<BridgeExit>>,
}

impl Bridge {
    /// Start pumping `source` (pty output) into `socket` and `socket` into
    /// `sink` (pty input).
    pub fn start<R, W>(source: R, sink: W, socket: TcpStream) -> io::Result<Self>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let eos = Arc::new(AtomicBool::new(false));

        let outbound_socket = socket.try_clone()?;
        let inbound_socket = socket.try_clone()?;
        inbound_socket.set_read_timeout(Some(POLL_INTERVAL))?;

        let outbound = spawn_pump(
            "conterm-outbound",
            Arc::clone(&stop),
            Arc::clone(&eos),
            outbound_socket.try_clone()?,
            move |stop| {
                let mut source = source;
                let mut sink = outbound_socket;
                pump_outbound(&mut source, &mut sink, stop)
            },
        )?;

        let inbound = match spawn_pump(
            "conterm-inbound",
            Arc::clone(&stop),
            Arc::clone(&eos),
            inbound_socket.try_clone()?,
            move |stop| {
                let mut source = inbound_socket;
                let mut sink = sink;
                pump_inbound(&mut source, &mut sink, stop)
            },
        ) {
            Ok(handle) => handle,
            Err(e) => {
                stop.store(true, Ordering::Release);
                let _ = socket.shutdown(Shutdown::Both);
                let _ = outbound.join();
                return Err(e);
            }
        };

        Ok(Self {
            stop,
            eos,
            socket,
            outbound: Some(outbound),
            inbound: Some(inbound),
        })
    }

    /// Ask both threads to stop and shut the socket down. Threads blocked in
    /// a pipe read only notice once that read returns.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        let _ = self.socket.shutdown(Shutdown::Both);
    }

    /// Whether either thread has ended
    pub fn end_of_stream(&self) -> bool {
        self.eos.load(Ordering::Acquire)
    }

    /// Handle of the outbound thread, which may be parked in a blocking pipe
    /// read
    pub fn outbound_thread(&self) -> Option<&JoinHandle<BridgeExit>> {
        self.outbound.as_ref()
    }

    /// Whether both threads have returned
    pub fn is_finished(&self) -> bool {
        [&self.outbound, &self.inbound]
            .into_iter()
            .flatten()
            .all(|handle| handle.is_finished())
    }

    /// Join whichever threads have already returned, without blocking
    pub fn join_finished(&mut self) {
        for slot in [&mut self.outbound, &mut self.inbound] {
            if slot.as_ref().is_some_and(|h| h.is_finished()) {
                if let Some(handle) = slot.take() {
                    log_exit(handle);
                }
            }
        }
    }

    /// Wait up to `grace` for both threads to return and join them. Returns
    /// `false` if a thread is still running once `grace` has passed.
    pub fn join_within(&mut self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        while !self.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        self.join_finished();
        self.outbound.is_none() && self.inbound.is_none()
    }

    /// Wait for both threads. Returns how the outbound thread ended, or
    /// `None` if it was already joined.
    pub fn join(&mut self) -> Option<BridgeExit> {
        let outbound = self.outbound.take().map(log_exit);
        if let Some(inbound) = self.inbound.take() {
            log_exit(inbound);
        }
        outbound
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.request_stop();
        // Owners that can unblock the pipe read (closing the pseudo console)
        // do so and call `join` before dropping
        if !self.join_within(DROP_GRACE) {
            log::debug!("outbound bridge thread still blocked in a pipe read, detaching");
        }
    }
}

fn spawn_pump<F>(
    name: &str,
    stop: Arc<AtomicBool>,
    eos: Arc<AtomicBool>,
    socket: TcpStream,
    pump: F,
) -> io::Result<JoinHandle<BridgeExit>>
where
    F: FnOnce(&AtomicBool) -> BridgeExit + Send + 'static,
{
    thread::Builder::new().name(name.to_string()).spawn(move || {
        let exit = pump(&stop);
        eos.store(true, Ordering::Release);
        let _ = socket.shutdown(Shutdown::Both);
        exit
    })
}

fn log_exit(handle: JoinHandle<BridgeExit>) -> BridgeExit {
    let name = handle.thread().name().unwrap_or("bridge").to_string();
    let exit = handle.join().unwrap_or_else(|_| {
        BridgeExit::Failed(io::Error::new(io::ErrorKind::Other, "bridge thread panicked"))
    });
    match &exit {
        BridgeExit::Failed(e) => log::warn!("{} ended with error: {}", name, e),
        other => log::debug!("{} ended: {:?}", name, other),
    }
    exit
}
