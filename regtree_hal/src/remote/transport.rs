//! Message transports.
//!
//! Frames on the TCP channel are a big-endian `u32` length followed by the
//! payload. One request is outstanding per connection; the channel mutex
//! serializes callers. The line endpoint used by the control adapter is a
//! plain newline-delimited text protocol.

use crate::remote::RemoteError;
use parking_lot::Mutex;
use regtree_common::consts::MAX_FRAME_BYTES;
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

const ACCEPT_POLL: Duration = Duration::from_millis(20);

/// Client side of a request/reply exchange.
pub trait RequestChannel: Send + Sync {
    /// Send one request and wait for its reply.
    fn request(&self, payload: &[u8]) -> Result<Vec<u8>, RemoteError>;

    /// Peer description for logs.
    fn peer(&self) -> String;
}

/// Server side of a request/reply exchange.
pub trait RequestHandler: Send + Sync {
    /// Answer one request. Never fails; errors are encoded in the reply.
    fn handle(&self, request: &[u8]) -> Vec<u8>;
}

/// Server side of the line protocol.
pub trait LineHandler: Send + Sync {
    /// Answer one line (without its terminator).
    fn handle_line(&self, line: &str) -> String;
}

/// Length-prefixed frames over TCP. Reconnects lazily after a failure.
pub struct TcpChannel {
    addr: String,
    io_timeout: Option<Duration>,
    stream: Mutex<Option<TcpStream>>,
}

impl TcpChannel {
    /// Channel to `addr`; nothing is connected until the first request.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            io_timeout: None,
            stream: Mutex::new(None),
        }
    }

    /// Bound every read and write.
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = Some(timeout);
        self
    }

    fn connect(&self) -> Result<TcpStream, RemoteError> {
        let stream = TcpStream::connect(&self.addr)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(self.io_timeout)?;
        stream.set_write_timeout(self.io_timeout)?;
        debug!(addr = %self.addr, "connected");
        Ok(stream)
    }
}

impl RequestChannel for TcpChannel {
    fn request(&self, payload: &[u8]) -> Result<Vec<u8>, RemoteError> {
        let mut guard = self.stream.lock();
        let mut stream = match guard.take() {
            Some(stream) => stream,
            None => self.connect()?,
        };
        let reply = write_frame(&mut stream, payload).and_then(|()| read_frame(&mut stream))?;
        *guard = Some(stream);
        Ok(reply)
    }

    fn peer(&self) -> String {
        self.addr.clone()
    }
}

/// In-process channel calling a handler directly.
pub struct LocalChannel {
    handler: Arc<dyn RequestHandler>,
}

impl LocalChannel {
    /// Channel to `handler`.
    pub fn new(handler: Arc<dyn RequestHandler>) -> Self {
        Self { handler }
    }
}

impl RequestChannel for LocalChannel {
    fn request(&self, payload: &[u8]) -> Result<Vec<u8>, RemoteError> {
        Ok(self.handler.handle(payload))
    }

    fn peer(&self) -> String {
        "local".to_string()
    }
}

/// Write one frame.
pub fn write_frame(stream: &mut impl Write, payload: &[u8]) -> Result<(), RemoteError> {
    if payload.len() > MAX_FRAME_BYTES {
        return Err(RemoteError::FrameTooLarge(payload.len()));
    }
    let len = u32::try_from(payload.len()).map_err(|_| RemoteError::FrameTooLarge(payload.len()))?;
    stream.write_all(&len.to_be_bytes())?;
    stream.write_all(payload)?;
    stream.flush()?;
    Ok(())
}

/// Read one frame. A clean EOF before the header is `RemoteError::Closed`.
pub fn read_frame(stream: &mut impl Read) -> Result<Vec<u8>, RemoteError> {
    let mut header = [0u8; 4];
    match stream.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Err(RemoteError::Closed),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(RemoteError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload)?;
    Ok(payload)
}

/// Running listener.
pub struct ServerHandle {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Bound address (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and join the accept thread. Open connections end
    /// when their peers disconnect.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
            info!(addr = %self.local_addr, "listener stopped");
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Serve framed requests on `addr`, one thread per connection.
pub fn serve_tcp(
    addr: impl ToSocketAddrs,
    handler: Arc<dyn RequestHandler>,
) -> Result<ServerHandle, RemoteError> {
    spawn_listener(addr, "frames", move |mut stream| {
        loop {
            let request = match read_frame(&mut stream) {
                Ok(request) => request,
                Err(RemoteError::Closed) => break,
                Err(e) => {
                    warn!("frame read failed: {e}");
                    break;
                }
            };
            let reply = handler.handle(&request);
            if let Err(e) = write_frame(&mut stream, &reply) {
                warn!("frame write failed: {e}");
                break;
            }
        }
    })
}

/// Serve newline-delimited text on `addr`, one thread per connection.
pub fn serve_lines(
    addr: impl ToSocketAddrs,
    handler: Arc<dyn LineHandler>,
) -> Result<ServerHandle, RemoteError> {
    spawn_listener(addr, "lines", move |stream| {
        let mut writer = match stream.try_clone() {
            Ok(writer) => writer,
            Err(e) => {
                warn!("cannot clone line stream: {e}");
                return;
            }
        };
        for line in BufReader::new(stream).lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    debug!("line read ended: {e}");
                    break;
                }
            };
            let mut answer = handler.handle_line(line.trim_end_matches('\r'));
            answer.push('\n');
            if let Err(e) = writer.write_all(answer.as_bytes()) {
                warn!("line write failed: {e}");
                break;
            }
        }
    })
}

fn spawn_listener<F>(
    addr: impl ToSocketAddrs,
    label: &'static str,
    serve: F,
) -> Result<ServerHandle, RemoteError>
where
    F: Fn(TcpStream) + Send + Sync + 'static,
{
    let listener = TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    let local_addr = listener.local_addr()?;
    let running = Arc::new(AtomicBool::new(true));
    let serve = Arc::new(serve);

    let flag = Arc::clone(&running);
    let thread = thread::Builder::new()
        .name(format!("regtree-{label}"))
        .spawn(move || {
            while flag.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, peer)) => {
                        debug!(%peer, label, "accepted");
                        if let Err(e) = stream.set_nonblocking(false) {
                            warn!(%peer, "cannot switch to blocking mode: {e}");
                            continue;
                        }
                        let _ = stream.set_nodelay(true);
                        let serve = Arc::clone(&serve);
                        thread::spawn(move || serve(stream));
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                    Err(e) => {
                        warn!(label, "accept failed: {e}");
                        thread::sleep(ACCEPT_POLL);
                    }
                }
            }
        })?;
    info!(addr = %local_addr, label, "listening");

    Ok(ServerHandle {
        local_addr,
        running,
        thread: Some(thread),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct Echo;

    impl RequestHandler for Echo {
        fn handle(&self, request: &[u8]) -> Vec<u8> {
            request.iter().rev().copied().collect()
        }
    }

    #[test]
    fn test_frame_layout() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"abc").unwrap();
        assert_eq!(buf, vec![0, 0, 0, 3, b'a', b'b', b'c']);
        assert_eq!(read_frame(&mut Cursor::new(buf)).unwrap(), b"abc");
    }

    #[test]
    fn test_eof_is_closed() {
        assert!(matches!(
            read_frame(&mut Cursor::new(Vec::new())),
            Err(RemoteError::Closed)
        ));
    }

    #[test]
    fn test_oversized_header_rejected() {
        let header = u32::MAX.to_be_bytes().to_vec();
        assert!(matches!(
            read_frame(&mut Cursor::new(header)),
            Err(RemoteError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_tcp_round_trip() {
        let mut server = serve_tcp("127.0.0.1:0", Arc::new(Echo)).unwrap();
        let channel = TcpChannel::new(server.local_addr().to_string())
            .with_io_timeout(Duration::from_secs(5));
        assert_eq!(channel.request(b"123").unwrap(), b"321");
        assert_eq!(channel.request(b"ab").unwrap(), b"ba");
        server.shutdown();
    }

    #[test]
    fn test_local_channel() {
        let channel = LocalChannel::new(Arc::new(Echo));
        assert_eq!(channel.request(b"xy").unwrap(), b"yx");
        assert_eq!(channel.peer(), "local");
    }
}
