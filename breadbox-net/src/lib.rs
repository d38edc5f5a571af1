//! TCP frontend: accepts connections, frames and parses requests, and
//! routes them into the filesystem engine. Every failure looks the same to
//! the client: no reply and a closed socket.

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;

use breadbox_core::{Filesystem, BLOCK_SIZE, MAX_PATHNAME, MAX_USERNAME};
use breadbox_traits::BlockAccess;

mod request;

pub use request::{parse_request, Request};

/// Longest header the grammar can produce: the longest verb, three spaces,
/// a maximal username, a maximal path, and the widest block number below
/// `MAX_FILE_BLOCKS`.
pub const HEADER_LIMIT: usize =
    "FS_WRITEBLOCK".len() + 1 + MAX_USERNAME + 1 + MAX_PATHNAME + 1 + 3;

pub struct Server<D> {
    fs: Filesystem<D>,
    listener: TcpListener,
    port: u16,
}

impl<D: BlockAccess<BLOCK_SIZE> + Send + Sync + 'static> Server<D> {
    /// Bind the listening socket. Port 0 asks the OS for a free one; the
    /// caller can learn the result from `port`.
    pub fn bind(fs: Filesystem<D>, port: u16) -> io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        let port = listener.local_addr()?.port();

        Ok(Server { fs, listener, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Accept loop: every connection gets its own detached worker. Only a
    /// listener failure makes this return.
    pub fn serve(&self) -> io::Error {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    log::debug!("connection from {peer}");
                    let fs = self.fs.clone();
                    thread::spawn(move || handle_connection(fs, stream));
                }
                Err(e) => return e,
            }
        }
    }

    /// Serve until a termination signal arrives. A listener failure is
    /// fatal for the whole process.
    pub fn run(self) -> anyhow::Result<()> {
        let mut signals = Signals::new([SIGHUP, SIGTERM, SIGINT, SIGQUIT])?;

        thread::spawn(move || {
            let e = self.serve();
            log::error!("listener failed: {e}");
            std::process::exit(1);
        });

        signals.wait();
        log::info!("shutting down");

        Ok(())
    }
}

fn handle_connection<D: BlockAccess<BLOCK_SIZE>>(fs: Filesystem<D>, mut stream: TcpStream) {
    let Some(header) = receive_header(&mut stream) else {
        return;
    };
    let Some(request) = parse_request(&header) else {
        log::debug!("malformed request {header:?}");
        return;
    };

    if let Err(e) = dispatch(&fs, request, &header, &mut stream) {
        log::debug!("request {header:?} dropped: {e}");
    }
    // The socket closes on drop, reply or not.
}

/// Read the header a byte at a time until the null terminator. Anything
/// over the grammar's length bound, a disconnect, or non-UTF-8 text gives
/// up on the connection.
fn receive_header(stream: &mut TcpStream) -> Option<String> {
    let mut header = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        match stream.read(&mut byte) {
            Ok(1) => {}
            _ => return None,
        }
        if byte[0] == 0 {
            break;
        }
        header.push(byte[0]);
        if header.len() > HEADER_LIMIT {
            return None;
        }
    }

    String::from_utf8(header).ok()
}

fn dispatch<D: BlockAccess<BLOCK_SIZE>>(
    fs: &Filesystem<D>,
    request: Request,
    header: &str,
    stream: &mut TcpStream,
) -> anyhow::Result<()> {
    match request {
        Request::ReadBlock { user, path, block } => {
            let data = fs.read_block(&user, &path, block)?;
            send_header(stream, header)?;
            stream.write_all(&data)?;
        }
        Request::WriteBlock { user, path, block } => {
            // The payload follows the terminator, all or nothing.
            let mut payload = [0u8; BLOCK_SIZE];
            stream.read_exact(&mut payload)?;
            fs.write_block(&user, &path, block, &payload)?;
            send_header(stream, header)?;
        }
        Request::Create { user, path, kind } => {
            fs.create(&user, &path, kind)?;
            send_header(stream, header)?;
        }
        Request::Delete { user, path } => {
            fs.delete(&user, &path)?;
            send_header(stream, header)?;
        }
    }

    Ok(())
}

/// A successful operation echoes the original header back, terminator
/// included.
fn send_header(stream: &mut TcpStream, header: &str) -> io::Result<()> {
    stream.write_all(header.as_bytes())?;
    stream.write_all(&[0])
}
