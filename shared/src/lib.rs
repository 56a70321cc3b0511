//! Wire protocol shared between the parlor server and its clients.
//!
//! Every message on a connection is one framed packet: a fixed 12-byte
//! header followed by an optional payload whose length the header declares.
//! All multi-byte header fields travel in network byte order. Payload
//! schemas belong to the dispatch layer; this crate only moves bytes.

use std::io;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the fixed packet header on the wire.
pub const HEADER_LEN: usize = 12;

/// Errors surfaced by framed send/receive.
///
/// A worker treats any of these as fatal for its own connection only.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The peer closed the connection (EOF on read, zero-length write).
    #[error("peer closed the connection")]
    PeerClosed,
    /// A hard transport failure, reported distinctly from peer closure.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    /// The header carried a packet-type tag this build does not know.
    #[error("unknown packet kind tag {0}")]
    UnknownKind(u8),
    /// The header carried a role byte outside the defined range.
    #[error("unknown role tag {0}")]
    UnknownRole(u8),
}

/// Application-level packet types carried in the header's `kind` byte.
///
/// Requests flow client to server, notifications server to client. The
/// framing layer does not care which is which.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    None = 0,
    Login = 1,
    Users = 2,
    Invite = 3,
    Revoke = 4,
    Accept = 5,
    Decline = 6,
    Move = 7,
    Resign = 8,
    Ack = 9,
    Nack = 10,
    Invited = 11,
    Revoked = 12,
    Declined = 13,
    Moved = 14,
    Resigned = 15,
    Ended = 16,
    Accepted = 17,
}

impl PacketKind {
    pub fn from_tag(tag: u8) -> Result<Self, ProtocolError> {
        Ok(match tag {
            0 => PacketKind::None,
            1 => PacketKind::Login,
            2 => PacketKind::Users,
            3 => PacketKind::Invite,
            4 => PacketKind::Revoke,
            5 => PacketKind::Accept,
            6 => PacketKind::Decline,
            7 => PacketKind::Move,
            8 => PacketKind::Resign,
            9 => PacketKind::Ack,
            10 => PacketKind::Nack,
            11 => PacketKind::Invited,
            12 => PacketKind::Revoked,
            13 => PacketKind::Declined,
            14 => PacketKind::Moved,
            15 => PacketKind::Resigned,
            16 => PacketKind::Ended,
            17 => PacketKind::Accepted,
            other => return Err(ProtocolError::UnknownKind(other)),
        })
    }
}

/// A participant's designation within a match.
///
/// `First` moves first, `Second` moves second, `None` marks the absence of
/// a role (e.g. a close with no resignation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Role {
    None = 0,
    First = 1,
    Second = 2,
}

impl Role {
    pub fn from_tag(tag: u8) -> Result<Self, ProtocolError> {
        Ok(match tag {
            0 => Role::None,
            1 => Role::First,
            2 => Role::Second,
            other => return Err(ProtocolError::UnknownRole(other)),
        })
    }

    /// The role on the other side of the board. `None` has no opponent.
    pub fn opponent(self) -> Role {
        match self {
            Role::None => Role::None,
            Role::First => Role::Second,
            Role::Second => Role::First,
        }
    }
}

/// The fixed-size packet header.
///
/// `aux` is a single auxiliary byte whose meaning depends on `kind`: a
/// [`Role`] tag for invitations, a per-connection invitation ID elsewhere.
/// `payload_len` and the timestamp pair are marshalled big-endian. The
/// timestamp records send time and is stamped by [`PacketHeader::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub kind: PacketKind,
    pub aux: u8,
    pub payload_len: u16,
    pub timestamp_sec: u32,
    pub timestamp_nsec: u32,
}

impl PacketHeader {
    /// Builds a header stamped with the current wall-clock time.
    pub fn new(kind: PacketKind, aux: u8, payload_len: u16) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            kind,
            aux,
            payload_len,
            timestamp_sec: now.as_secs() as u32,
            timestamp_nsec: now.subsec_nanos(),
        }
    }

    /// Marshals the header into its exact wire representation.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = self.kind as u8;
        buf[1] = self.aux;
        buf[2..4].copy_from_slice(&self.payload_len.to_be_bytes());
        buf[4..8].copy_from_slice(&self.timestamp_sec.to_be_bytes());
        buf[8..12].copy_from_slice(&self.timestamp_nsec.to_be_bytes());
        buf
    }

    /// Unmarshals a header from its wire representation, converting
    /// multi-byte fields to host order.
    pub fn decode(buf: &[u8; HEADER_LEN]) -> Result<Self, ProtocolError> {
        Ok(Self {
            kind: PacketKind::from_tag(buf[0])?,
            aux: buf[1],
            payload_len: u16::from_be_bytes([buf[2], buf[3]]),
            timestamp_sec: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            timestamp_nsec: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }
}

/// Sends one framed packet: header, then payload iff the header declares one.
///
/// Short writes are retried until the packet is fully on the wire. The
/// `payload` slice must match the length declared in `hdr`.
pub async fn send_packet<W>(
    writer: &mut W,
    hdr: &PacketHeader,
    payload: &[u8],
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    debug_assert_eq!(hdr.payload_len as usize, payload.len());

    writer
        .write_all(&hdr.encode())
        .await
        .map_err(map_write_err)?;
    if hdr.payload_len > 0 {
        writer.write_all(payload).await.map_err(map_write_err)?;
    }
    writer.flush().await.map_err(map_write_err)?;
    Ok(())
}

/// Receives one framed packet, blocking until a complete one is available.
///
/// Reads exactly one header (retrying short reads), converts its length
/// field to host order, then reads exactly the declared payload. Returns the
/// payload as `Some` iff the declared length is nonzero. EOF at any point
/// reports [`ProtocolError::PeerClosed`]; no partial packet is ever surfaced.
pub async fn recv_packet<R>(
    reader: &mut R,
) -> Result<(PacketHeader, Option<Vec<u8>>), ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut hdr_buf = [0u8; HEADER_LEN];
    reader
        .read_exact(&mut hdr_buf)
        .await
        .map_err(map_read_err)?;
    let hdr = PacketHeader::decode(&hdr_buf)?;

    if hdr.payload_len == 0 {
        return Ok((hdr, None));
    }

    let mut payload = vec![0u8; hdr.payload_len as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(map_read_err)?;
    Ok((hdr, Some(payload)))
}

fn map_read_err(err: io::Error) -> ProtocolError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof => ProtocolError::PeerClosed,
        _ => ProtocolError::Io(err),
    }
}

fn map_write_err(err: io::Error) -> ProtocolError {
    match err.kind() {
        io::ErrorKind::WriteZero | io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset => {
            ProtocolError::PeerClosed
        }
        _ => ProtocolError::Io(err),
    }
}
