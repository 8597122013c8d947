//! Peer wire protocol: the handshake, the 9 core messages, and the blocks
//! they carry.
pub mod codec;
pub mod handshake;

pub use codec::{Core, CoreCodec, CoreId};
pub use handshake::{Handshake, HandshakeCodec};

use bytes::{BufMut, BytesMut};

/// Size of the blocks we request, the last block of a piece may be
/// shorter.
pub const BLOCK_LEN: u32 = 16384;

/// Requests for more than this are dropped.
pub const MAX_BLOCK_LEN: u32 = 131072;

/// Largest frame accepted from a peer, a piece message of `MAX_BLOCK_LEN`
/// or a bitfield of 16 million pieces both fit.
pub const MAX_MESSAGE_LEN: u32 = 2 * 1024 * 1024 + 13;

/// Protocol name sent in every handshake.
pub const PSTR: [u8; 19] = *b"BitTorrent protocol";

/// Payload of a `Piece` message: bytes of a piece starting at `begin`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Block {
    pub index: usize,
    /// Offset inside of the piece.
    pub begin: u32,
    pub block: Vec<u8>,
}

impl Block {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.index as u32);
        buf.put_u32(self.begin);
        buf.put_slice(&self.block);
    }

    /// If this block answers `info`.
    pub fn answers(&self, info: &BlockInfo) -> bool {
        self.index == info.index as usize
            && self.begin == info.begin
            && self.block.len() == info.len as usize
    }
}

/// Position and size of a [`Block`], payload of `Request` and `Cancel`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockInfo {
    pub index: u32,
    pub begin: u32,
    pub len: u32,
}

/// A full sized block at the start of piece 0.
impl Default for BlockInfo {
    fn default() -> Self {
        Self {
            index: 0,
            begin: 0,
            len: BLOCK_LEN,
        }
    }
}

impl From<&Block> for BlockInfo {
    fn from(block: &Block) -> Self {
        Self {
            index: block.index as u32,
            begin: block.begin,
            len: block.block.len() as u32,
        }
    }
}

impl BlockInfo {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn index(mut self, index: u32) -> Self {
        self.index = index;
        self
    }
    pub fn begin(mut self, begin: u32) -> Self {
        self.begin = begin;
        self
    }
    pub fn len(mut self, len: u32) -> Self {
        self.len = len;
        self
    }
    /// Write index, begin and length, big endian.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.index);
        buf.put_u32(self.begin);
        buf.put_u32(self.len);
    }

    /// Split a piece of `piece_len` bytes into requests of [`BLOCK_LEN`].
    pub fn split_piece(index: u32, piece_len: u32) -> Vec<BlockInfo> {
        (0..piece_len)
            .step_by(BLOCK_LEN as usize)
            .map(|begin| BlockInfo {
                index,
                begin,
                len: BLOCK_LEN.min(piece_len - begin),
            })
            .collect()
    }
}
