//! Transport helpers shared by both peers: address parsing, connect/bind,
//! and socket tuning.

use std::net::{TcpListener, TcpStream};

use anyhow::{bail, Context, Result};

/// Port both peers agree on when none is given on the command line.
pub const DEFAULT_PORT: u16 = 0xF150;

/// Splits `host[:port]`, defaulting the port. Bare IPv6 literals keep all
/// their colons; bracketed form (`[::1]:7000`) carries an explicit port.
pub fn parse_address(address: &str) -> Result<(String, u16)> {
    if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .with_context(|| format!("unclosed `[` in address `{address}`"))?;
        let port = match tail.strip_prefix(':') {
            Some(port_text) => parse_port(port_text)?,
            None if tail.is_empty() => DEFAULT_PORT,
            None => bail!("malformed address `{address}`"),
        };
        return Ok((host.to_string(), port));
    }

    match address.matches(':').count() {
        0 => Ok((address.to_string(), DEFAULT_PORT)),
        1 => {
            let (host, port_text) = address.split_once(':').expect("one colon");
            Ok((host.to_string(), parse_port(port_text)?))
        }
        // Two or more colons: an unbracketed IPv6 literal.
        _ => Ok((address.to_string(), DEFAULT_PORT)),
    }
}

fn parse_port(text: &str) -> Result<u16> {
    text.parse()
        .with_context(|| format!("invalid port `{text}`"))
}

pub fn connect(host: &str, port: u16) -> Result<TcpStream> {
    let stream = TcpStream::connect((host, port))
        .with_context(|| format!("failed to connect to `{host}:{port}`"))?;
    tune_socket(&stream);
    Ok(stream)
}

/// Binds the listener on the wildcard address, preferring dual-stack IPv6.
pub fn bind_listener(port: u16) -> Result<TcpListener> {
    TcpListener::bind(("::", port))
        .or_else(|_| TcpListener::bind(("0.0.0.0", port)))
        .with_context(|| format!("failed to bind port {port}"))
}

/// Socket tuning: disable Nagle, enable keepalive, and size the kernel
/// buffers to hold a full frame.
pub fn tune_socket(stream: &TcpStream) {
    let _ = stream.set_nodelay(true);

    #[cfg(unix)]
    {
        use std::os::fd::AsRawFd;

        let fd = stream.as_raw_fd();
        let keepalive: libc::c_int = 1;
        let buffer_size: libc::c_int = crate::framing::MAX_FRAME_SIZE as libc::c_int;
        unsafe {
            let _ = libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_KEEPALIVE,
                &keepalive as *const _ as *const libc::c_void,
                std::mem::size_of_val(&keepalive) as libc::socklen_t,
            );
            for option in [libc::SO_SNDBUF, libc::SO_RCVBUF] {
                let _ = libc::setsockopt(
                    fd,
                    libc::SOL_SOCKET,
                    option,
                    &buffer_size as *const _ as *const libc::c_void,
                    std::mem::size_of_val(&buffer_size) as libc::socklen_t,
                );
            }
        }
    }
}
