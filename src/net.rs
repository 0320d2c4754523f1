/* This file is part of ringwatch
 *
 * Copyright (C) 2020-2026 Dyne.org foundation
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use std::{io, net::SocketAddr, time::Duration};

use futures::{
    io::{BufReader, ReadHalf, WriteHalf},
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt,
};
use log::{debug, trace};
use smol::net::{TcpListener, TcpStream};
use socket2::{Domain, Socket, Type};
use url::Url;

use crate::{system::io_timeout, Error, Result};

/// Longest accepted protocol line, excluding the terminator
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Consecutive empty lines tolerated before the connection is dropped
pub const MAX_EMPTY_LINES: usize = 5;

/// Resolve a `tcp://host:port` URL into a socket address.
pub fn socket_addr(url: &Url) -> Result<SocketAddr> {
    if url.scheme() != "tcp" {
        return Err(Error::UnsupportedTransport(url.scheme().to_string()))
    }

    match url.socket_addrs(|| None)?.first() {
        Some(addr) => Ok(*addr),
        None => Err(Error::BindFailed(url.to_string())),
    }
}

fn create_socket(socket_addr: SocketAddr) -> io::Result<Socket> {
    let domain = if socket_addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::STREAM, Some(socket2::Protocol::TCP))?;

    if socket_addr.is_ipv6() {
        socket.set_only_v6(true)?;
    }

    // Reloads and restarts rebind the same port while old sockets linger
    socket.set_reuse_address(true)?;

    Ok(socket)
}

/// Bind a non-blocking TCP listener on the given `tcp://` URL.
pub fn listen(url: &Url) -> Result<TcpListener> {
    let addr = socket_addr(url)?;
    debug!(target: "ringwatch::net::listen()", "Listening on {}", addr);

    let bind = || -> io::Result<TcpListener> {
        let socket = create_socket(addr)?;
        socket.bind(&addr.into())?;
        socket.listen(1024)?;
        socket.set_nonblocking(true)?;
        TcpListener::try_from(std::net::TcpListener::from(socket))
    };

    bind().map_err(|e| {
        debug!(target: "ringwatch::net::listen()", "Bind to {} failed: {}", addr, e);
        Error::BindFailed(url.to_string())
    })
}

/// Dial `host:port`, resolving names, bounded by `timeout`.
pub async fn dial(address: &str, timeout: Duration) -> Result<TcpStream> {
    debug!(target: "ringwatch::net::dial()", "Dialing {}", address);
    match io_timeout(timeout, TcpStream::connect(address)).await {
        Ok(stream) => Ok(stream),
        Err(e) if e.kind() == io::ErrorKind::TimedOut => Err(Error::ConnectTimeout),
        Err(e) => Err(e.into()),
    }
}

/// Newline-framed text stream over any async byte stream.
///
/// Both ends of the protocol read through this type, so both enforce the
/// line length limit and the empty-line defence.
pub struct LineStream<C: AsyncRead + AsyncWrite + Send + Unpin> {
    reader: BufReader<ReadHalf<C>>,
    writer: WriteHalf<C>,
    peer: String,
    empty_lines: usize,
}

impl<C: AsyncRead + AsyncWrite + Send + Unpin> LineStream<C> {
    pub fn new(stream: C, peer: &str) -> Self {
        let (reader, writer) = stream.split();
        Self { reader: BufReader::new(reader), writer, peer: peer.to_string(), empty_lines: 0 }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    async fn read_raw(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        (&mut self.reader).take(MAX_LINE_LEN as u64 + 2).read_until(b'\n', &mut buf).await?;
        Ok(buf)
    }

    fn frame(&mut self, mut buf: Vec<u8>) -> Result<String> {
        if buf.is_empty() {
            return Err(Error::ConnectionClosed)
        }

        if buf.last() == Some(&b'\n') {
            buf.pop();
        }
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }

        if buf.len() > MAX_LINE_LEN {
            return Err(Error::LineTooLong)
        }

        let line = String::from_utf8(buf)?;
        trace!(target: "ringwatch::net::LineStream", "[{}] <- {}", self.peer, line);

        if line.trim().is_empty() {
            self.empty_lines += 1;
            if self.empty_lines > MAX_EMPTY_LINES {
                return Err(Error::TooManyEmptyLines)
            }
        } else {
            self.empty_lines = 0;
        }

        Ok(line)
    }

    /// Read one line with its terminator stripped. Blank lines are
    /// returned as empty strings and counted.
    pub async fn read_line(&mut self) -> Result<String> {
        let buf = self.read_raw().await?;
        self.frame(buf)
    }

    /// Read the next non-blank line, waiting at most `timeout` per line.
    pub async fn read_reply(&mut self, timeout: Duration) -> Result<String> {
        loop {
            let buf = match io_timeout(timeout, self.read_raw()).await {
                Ok(buf) => buf,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => return Err(Error::ReplyTimeout),
                Err(e) => return Err(e.into()),
            };

            let line = self.frame(buf)?;
            if !line.trim().is_empty() {
                return Ok(line)
            }
        }
    }

    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        trace!(target: "ringwatch::net::LineStream", "[{}] -> {}", self.peer, line);
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn close(mut self) -> Result<()> {
        self.writer.close().await?;
        Ok(())
    }
}
