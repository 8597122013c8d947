//! Codec for encoding and decoding handshakes.
//!
//! This has to be a separate codec as the handshake has a different
//! structure than the rest of the messages. Handshakes are only sent once at
//! the beginning of a connection, after that the stream is switched to
//! [`CoreCodec`](super::CoreCodec), keeping the read and write buffers.
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use super::PSTR;
use crate::{error::Error, peer::PeerId, torrent::InfoHash};

#[derive(Debug, Clone, Copy, Default)]
pub struct HandshakeCodec;

impl Encoder<Handshake> for HandshakeCodec {
    type Error = Error;

    fn encode(&mut self, handshake: Handshake, buf: &mut BytesMut) -> Result<(), Error> {
        buf.extend_from_slice(&handshake.serialize());
        Ok(())
    }
}

impl Decoder for HandshakeCodec {
    type Item = Handshake;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Handshake>, Error> {
        if buf.is_empty() {
            return Ok(None);
        }

        // peek, the whole handshake may not be here yet
        let pstr_len = buf[0];
        if pstr_len as usize != PSTR.len() {
            return Err(Error::HandshakePstrLength(pstr_len));
        }

        if buf.len() < Handshake::LEN {
            return Ok(None);
        }

        let frame = buf.split_to(Handshake::LEN);
        Handshake::parse(&frame).map(Some)
    }
}

/// pstrlen = 19
/// pstr = "BitTorrent protocol"
/// This is the very first message exchanged. If the peer's protocol string
/// (`BitTorrent protocol`) or the info hash differs from ours, the connection
/// is severed. The reserved field is 8 zero bytes, we don't support any
/// extension. The peer id is usually the client name and version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Handshake {
    pub pstr_len: u8,
    pub pstr: [u8; 19],
    pub reserved: [u8; 8],
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
}

impl Handshake {
    /// 49 bytes plus the protocol string.
    pub const LEN: usize = 49 + PSTR.len();

    pub fn new(info_hash: InfoHash, peer_id: PeerId) -> Self {
        Self {
            pstr_len: PSTR.len() as u8,
            pstr: PSTR,
            reserved: [0u8; 8],
            info_hash,
            peer_id,
        }
    }

    pub fn serialize(&self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        let mut cursor = &mut buf[..];

        cursor.put_u8(self.pstr_len);
        cursor.put_slice(&self.pstr);
        cursor.put_slice(&self.reserved);
        cursor.put_slice(&self.info_hash.0);
        cursor.put_slice(&self.peer_id.0);

        buf
    }

    /// Parse a handshake, the reserved bytes are kept but never looked at.
    pub fn parse(mut buf: &[u8]) -> Result<Self, Error> {
        if buf.len() != Self::LEN {
            return Err(Error::HandshakeLength(buf.len()));
        }

        let pstr_len = buf.get_u8();
        if pstr_len as usize != PSTR.len() {
            return Err(Error::HandshakePstrLength(pstr_len));
        }

        let mut pstr = [0u8; 19];
        buf.copy_to_slice(&mut pstr);
        if pstr != PSTR {
            return Err(Error::HandshakePstr);
        }

        let mut reserved = [0u8; 8];
        buf.copy_to_slice(&mut reserved);

        let mut info_hash = [0u8; 20];
        buf.copy_to_slice(&mut info_hash);

        let mut peer_id = [0u8; 20];
        buf.copy_to_slice(&mut peer_id);

        Ok(Self {
            pstr_len,
            pstr,
            reserved,
            info_hash: InfoHash(info_hash),
            peer_id: PeerId(peer_id),
        })
    }

    /// Validate the handshake of a remote peer against the torrent we expect,
    /// and against its peer id, if the tracker gave us one.
    pub fn validate(
        &self,
        info_hash: &InfoHash,
        peer_id: Option<&PeerId>,
    ) -> Result<(), Error> {
        if &self.info_hash != info_hash {
            warn!("! info_hash from receiving handshake does not match ours");
            return Err(Error::HandshakeInfoHash);
        }
        if let Some(peer_id) = peer_id {
            if &self.peer_id != peer_id {
                warn!("! peer_id {} is not the one announced", self.peer_id);
                return Err(Error::HandshakePeerId);
            }
        }
        Ok(())
    }
}
