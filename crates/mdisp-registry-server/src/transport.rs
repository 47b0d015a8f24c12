// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Rendezvous socket transport with bounded reconnection.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::ServerConfig;

/// A connection to the master's rendezvous socket.
///
/// The pump asks for [`reconnect`](mdisp::registry::Transport::reconnect)
/// after a reset; this wrapper retries a bounded number of times with a
/// fixed delay before giving up.
pub struct RendezvousTransport {
    stream: UnixStream,
    path: PathBuf,
    attempts: u32,
    delay: Duration,
}

impl RendezvousTransport {
    pub fn connect(config: &ServerConfig) -> anyhow::Result<Self> {
        let stream = UnixStream::connect(&config.socket_path)?;
        info!("connected to rendezvous socket {:?}", config.socket_path);
        Ok(RendezvousTransport {
            stream,
            path: config.socket_path.clone(),
            attempts: config.reconnect_attempts,
            delay: Duration::from_millis(config.reconnect_delay_ms),
        })
    }
}

impl Read for RendezvousTransport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for RendezvousTransport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.stream.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.stream.flush()
    }
}

impl mdisp::registry::Transport for RendezvousTransport {
    fn reconnect(&mut self) -> mdisp::Result<()> {
        let mut last = None;
        for attempt in 1..=self.attempts {
            match UnixStream::connect(&self.path) {
                Ok(stream) => {
                    info!("reconnected to {:?} on attempt {}", self.path, attempt);
                    self.stream = stream;
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "reconnect attempt {}/{} to {:?} failed: {}",
                        attempt, self.attempts, self.path, e
                    );
                    last = Some(e);
                    std::thread::sleep(self.delay);
                }
            }
        }
        Err(match last {
            Some(e) => mdisp::Error::Io(e),
            None => mdisp::Error::ConnectionReset,
        })
    }
}
