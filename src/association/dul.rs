//! DICOM upper layer session provider.
//!
//! The [`DulProvider`] owns the TCP stream of one association.
//! It drains the socket into a read buffer without blocking,
//! decodes complete PDUs into an inbound queue,
//! and tracks liveness and the idle timer.
//! All blocking done on its behalf is bounded
//! by the polling loops of its callers.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use snafu::{ResultExt, Snafu};
use tracing::{debug, warn};

use crate::dimse::MessageAssembler;
use crate::pdu::reader::read_pdu;
use crate::pdu::writer::write_pdu;
use crate::pdu::{Pdu, LARGE_PDU_SIZE, PDU_HEADER_SIZE};

/// The pause between polls when waiting on the wire.
pub(crate) const POLL_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// failed to set up the TCP stream
    Configure { source: std::io::Error },

    /// failed to encode outgoing PDU
    Encode { source: crate::pdu::writer::Error },

    /// failed to send PDU on the wire
    WireSend { source: std::io::Error },

    /// the upper layer session is no longer alive
    NotAlive,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The upper layer session over one TCP connection.
#[derive(Debug)]
pub struct DulProvider {
    /// the TCP stream to the peer node, in non-blocking mode
    socket: TcpStream,
    /// incoming bytes not yet decoded into a full PDU
    read_buffer: BytesMut,
    /// reusable buffer for encoding outbound PDUs
    write_buffer: Vec<u8>,
    /// complete PDUs received and not yet consumed
    inbound: VecDeque<Pdu>,
    /// DIMSE messages under reassembly,
    /// owned here so that every consumer view shares the same state
    pub(crate) assembler: MessageAssembler,
    /// the maximum PDU length admitted on receive
    max_pdu_length: u32,
    /// the maximum PDU length admitted by the peer, 0 meaning unlimited
    peer_max_pdu_length: u32,
    /// whether to refuse PDUs above the local maximum
    strict: bool,
    /// maximum quiescent period before a courteous teardown
    idle_timeout: Option<Duration>,
    last_activity: Instant,
    alive: bool,
    stopped: bool,
}

impl DulProvider {
    /// Install the upper layer session over an established TCP stream.
    pub fn new(
        socket: TcpStream,
        max_pdu_length: u32,
        strict: bool,
        idle_timeout: Option<Duration>,
    ) -> Result<Self> {
        socket.set_nonblocking(true).context(ConfigureSnafu)?;
        Ok(DulProvider {
            socket,
            read_buffer: BytesMut::with_capacity(
                (max_pdu_length.min(LARGE_PDU_SIZE) + PDU_HEADER_SIZE) as usize,
            ),
            write_buffer: Vec::with_capacity(
                (max_pdu_length.min(LARGE_PDU_SIZE) + PDU_HEADER_SIZE) as usize,
            ),
            inbound: VecDeque::new(),
            assembler: MessageAssembler::new(),
            max_pdu_length,
            peer_max_pdu_length: 0,
            strict,
            idle_timeout,
            last_activity: Instant::now(),
            alive: true,
            stopped: false,
        })
    }

    /// Record the maximum PDU length advertised by the peer.
    pub fn set_peer_max_pdu_length(&mut self, value: u32) {
        self.peer_max_pdu_length = value;
    }

    /// The maximum PDU length advertised by the peer,
    /// with 0 interpreted as unlimited.
    pub fn peer_max_pdu_length(&self) -> u32 {
        if self.peer_max_pdu_length == 0 {
            u32::MAX
        } else {
            self.peer_max_pdu_length
        }
    }

    /// Drain the socket and decode any complete PDUs
    /// into the inbound queue. Never blocks.
    pub fn poll(&mut self) {
        if !self.alive || self.stopped {
            return;
        }

        let mut chunk = [0; 8192];
        loop {
            match self.socket.read(&mut chunk) {
                Ok(0) => {
                    debug!("Peer closed the connection");
                    self.alive = false;
                    break;
                }
                Ok(n) => {
                    self.read_buffer.extend_from_slice(&chunk[..n]);
                    self.last_activity = Instant::now();
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Transport failure on receive: {}", e);
                    self.alive = false;
                    break;
                }
            }
        }

        loop {
            match read_pdu(&mut self.read_buffer, self.max_pdu_length, self.strict) {
                Ok(Some(pdu)) => {
                    debug!("{} <- peer", pdu.short_description());
                    self.inbound.push_back(pdu);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Could not decode incoming PDU: {}", e);
                    self.alive = false;
                    break;
                }
            }
        }
    }

    /// Send a PDU to the peer, blocking until fully written.
    pub fn send(&mut self, pdu: &Pdu) -> Result<()> {
        snafu::ensure!(self.alive && !self.stopped, NotAliveSnafu);

        self.write_buffer.clear();
        write_pdu(&mut self.write_buffer, pdu).context(EncodeSnafu)?;
        debug!("{} -> peer", pdu.short_description());

        let mut written = 0;
        while written < self.write_buffer.len() {
            match self.socket.write(&self.write_buffer[written..]) {
                Ok(0) => {
                    self.alive = false;
                    return Err(std::io::Error::from(std::io::ErrorKind::WriteZero))
                        .context(WireSendSnafu);
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(POLL_PERIOD);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.alive = false;
                    return Err(e).context(WireSendSnafu);
                }
            }
        }
        self.last_activity = Instant::now();
        Ok(())
    }

    /// Take the next inbound PDU, if one has fully arrived.
    pub fn receive(&mut self) -> Option<Pdu> {
        self.poll();
        self.inbound.pop_front()
    }

    /// Take the first inbound PDU matching the predicate,
    /// leaving all others queued.
    pub fn take_matching(&mut self, pred: impl Fn(&Pdu) -> bool) -> Option<Pdu> {
        self.poll();
        let position = self.inbound.iter().position(pred)?;
        self.inbound.remove(position)
    }

    /// Whether the session can still exchange PDUs.
    pub fn is_alive(&self) -> bool {
        self.alive && !self.stopped
    }

    /// Whether the association has been quiescent
    /// for longer than the configured idle timeout.
    pub fn idle_timer_expired(&self) -> bool {
        match self.idle_timeout {
            Some(timeout) => self.last_activity.elapsed() >= timeout,
            None => false,
        }
    }

    /// Request a graceful shutdown of the session.
    ///
    /// Idempotent; returns true once the session has stopped.
    pub fn stop(&mut self) -> bool {
        if !self.stopped {
            let _ = self.socket.shutdown(std::net::Shutdown::Both);
            self.stopped = true;
            self.alive = false;
        }
        true
    }
}
