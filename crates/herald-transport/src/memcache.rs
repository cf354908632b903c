//! Memcache text-protocol listener.
//!
//! Lets backends publish with any memcache client: a `set` whose key is a
//! site name and whose value is a post request publishes that request, and
//! `get token` mints a fresh token. What storing and fetching mean is up to
//! the [`CacheBackend`].
//!
//! Supported commands:
//!
//! ```text
//! set|add|replace <key> <flags> <exptime> <bytes> [noreply]   -> STORED | CLIENT_ERROR <reason>
//! append|prepend  <key> <flags> <exptime> <bytes> [noreply]   -> STORED (value ignored)
//! get <key>*                                                  -> VALUE ... END
//! version                                                     -> VERSION 1.0.0
//! quit
//! ```

use crate::traits::{CacheBackend, ConnectionId, TransportError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::{debug, info, trace, warn};

/// Version reported by the `version` command.
pub const VERSION: &str = "1.0.0";

/// Longest accepted command line, including the line terminator.
pub const MAX_LINE_LENGTH: usize = 2048;

/// Largest accepted data block.
pub const MAX_VALUE_SIZE: usize = herald_protocol::codec::MAX_FRAME_SIZE;

/// A bound memcache listener.
pub struct MemcacheListener {
    listener: TcpListener,
}

impl MemcacheListener {
    /// Bind to `addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    /// The address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever, serving each on its own task.
    pub async fn serve<B: CacheBackend>(self, backend: Arc<B>) {
        if let Ok(addr) = self.listener.local_addr() {
            info!("Memcache listener accepting on {}", addr);
        }
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let backend = Arc::clone(&backend);
                    let id = ConnectionId::generate();
                    tokio::spawn(async move {
                        debug!(connection = %id, %peer, "Memcache client connected");
                        if let Err(e) = serve_connection(stream, backend.as_ref()).await {
                            debug!(connection = %id, error = %e, "Memcache connection error");
                        }
                        debug!(connection = %id, "Memcache client disconnected");
                    });
                }
                Err(e) => warn!(error = %e, "Memcache accept failed"),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Set,
    Add,
    Replace,
    Append,
    Prepend,
}

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Store {
        verb: Verb,
        key: &'a str,
        size: usize,
        noreply: bool,
    },
    Get(Vec<&'a str>),
    Version,
    Quit,
    Unknown(&'a str),
}

fn parse(line: &str) -> Result<Command<'_>, &'static str> {
    let mut words = line.split_ascii_whitespace();
    let name = words.next().unwrap_or_default();
    let verb = match name {
        "set" => Verb::Set,
        "add" => Verb::Add,
        "replace" => Verb::Replace,
        "append" => Verb::Append,
        "prepend" => Verb::Prepend,
        "get" | "gets" => {
            let keys: Vec<_> = words.collect();
            if keys.is_empty() {
                return Err("key required");
            }
            return Ok(Command::Get(keys));
        }
        "version" => return Ok(Command::Version),
        "quit" => return Ok(Command::Quit),
        other => return Ok(Command::Unknown(other)),
    };

    let args: Vec<_> = words.collect();
    if args.len() < 4 {
        return Err("invalid argument count");
    }
    let size = match args[3].parse::<usize>() {
        Ok(size) if size > 0 => size,
        _ => return Err("invalid data size"),
    };
    Ok(Command::Store {
        verb,
        key: args[0],
        size,
        noreply: args.get(4) == Some(&"noreply"),
    })
}

fn client_error(reason: impl std::fmt::Display) -> Vec<u8> {
    format!("CLIENT_ERROR {reason}\r\n").into_bytes()
}

/// Serve one memcache client until it quits or disconnects.
///
/// # Errors
///
/// Returns an error if reading from or writing to the stream fails.
pub async fn serve_connection<S, B>(stream: S, backend: &B) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    B: CacheBackend + ?Sized,
{
    let mut stream = BufReader::new(stream);
    let mut line = String::new();

    loop {
        line.clear();
        let read = (&mut stream)
            .take(MAX_LINE_LENGTH as u64)
            .read_line(&mut line)
            .await?;
        if read == 0 {
            return Ok(());
        }
        if !line.ends_with('\n') {
            stream.write_all(&client_error("line too long")).await?;
            stream.flush().await?;
            return Ok(());
        }
        trace!(command = line.trim_end(), "Memcache command");

        let reply = match parse(line.trim_end()) {
            Ok(Command::Store {
                verb,
                key,
                size,
                noreply,
            }) => {
                if size > MAX_VALUE_SIZE {
                    stream.write_all(&client_error("value too large")).await?;
                    stream.flush().await?;
                    return Ok(());
                }
                let mut data = vec![0u8; size + 2];
                stream.read_exact(&mut data).await?;
                if !data.ends_with(b"\r\n") {
                    stream.write_all(&client_error("bad data chunk")).await?;
                    stream.flush().await?;
                    return Ok(());
                }
                data.truncate(size);

                let reply = match verb {
                    Verb::Append | Verb::Prepend => b"STORED\r\n".to_vec(),
                    Verb::Set | Verb::Add | Verb::Replace => match backend.store(key, &data) {
                        Ok(()) => b"STORED\r\n".to_vec(),
                        Err(e) => {
                            debug!(key, error = %e, "Memcache store rejected");
                            client_error(e)
                        }
                    },
                };
                if noreply {
                    continue;
                }
                reply
            }
            Ok(Command::Get(keys)) => {
                let mut reply = Vec::new();
                for key in keys {
                    if let Some(value) = backend.get(key) {
                        let header = format!("VALUE {key} 0 {}\r\n", value.len());
                        reply.extend_from_slice(header.as_bytes());
                        reply.extend_from_slice(&value);
                        reply.extend_from_slice(b"\r\n");
                    }
                }
                reply.extend_from_slice(b"END\r\n");
                reply
            }
            Ok(Command::Version) => format!("VERSION {VERSION}\r\n").into_bytes(),
            Ok(Command::Quit) => return Ok(()),
            Ok(Command::Unknown(name)) => {
                debug!(command = name, "Unknown memcache command");
                b"ERROR\r\n".to_vec()
            }
            Err(reason) => client_error(reason),
        };

        stream.write_all(&reply).await?;
        stream.flush().await?;
    }
}
