use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use super::{Block, BlockInfo, MAX_MESSAGE_LEN};
use crate::{bitfield::Bitfield, error::Error};

/// Core messages exchanged after a successful handshake.
/// These are from the vanilla protocol, with no extensions.
#[derive(Debug, Clone, PartialEq)]
pub enum Core {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(usize),
    Bitfield(Bitfield),
    Request(BlockInfo),
    Piece(Block),
    Cancel(BlockInfo),
}

/// The IDs of the [`Core`] messages.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum CoreId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl TryFrom<u8> for CoreId {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use CoreId::*;
        Ok(match value {
            0 => Choke,
            1 => Unchoke,
            2 => Interested,
            3 => NotInterested,
            4 => Have,
            5 => Bitfield,
            6 => Request,
            7 => Piece,
            8 => Cancel,
            v => return Err(v),
        })
    }
}

impl Core {
    /// Parse one complete frame, length prefix included.
    ///
    /// Returns `None` when the frame is truncated, its length prefix does not
    /// match the buffer, or the payload has the wrong size for its type.
    pub fn parse(buf: &[u8]) -> Option<Core> {
        if buf.len() < 4 {
            return None;
        }

        let (mut size, mut payload) = buf.split_at(4);
        let size = size.get_u32() as usize;

        if payload.len() != size {
            return None;
        }

        if size == 0 {
            return Some(Core::KeepAlive);
        }

        let id = CoreId::try_from(payload.get_u8()).ok()?;

        // `payload` is now past the msg_id
        let msg = match id {
            // <len=0001><id=0>
            CoreId::Choke if size == 1 => Core::Choke,

            // <len=0001><id=1>
            CoreId::Unchoke if size == 1 => Core::Unchoke,

            // <len=0001><id=2>
            CoreId::Interested if size == 1 => Core::Interested,

            // <len=0001><id=3>
            CoreId::NotInterested if size == 1 => Core::NotInterested,

            // <len=0005><id=4><piece index>
            CoreId::Have if size == 5 => Core::Have(payload.get_u32() as usize),

            // <len=0001+X><id=5><bitfield>
            CoreId::Bitfield => Core::Bitfield(Bitfield::from_slice(payload)),

            // <len=0013><id=6><index><begin><length>
            CoreId::Request if size == 13 => {
                Core::Request(Self::block_info(&mut payload))
            }

            // <len=0009+X><id=7><index><begin><block>
            CoreId::Piece if size >= 9 => {
                let index = payload.get_u32() as usize;
                let begin = payload.get_u32();
                Core::Piece(Block { index, begin, block: payload.to_vec() })
            }

            // <len=0013><id=8><index><begin><length>
            CoreId::Cancel if size == 13 => {
                Core::Cancel(Self::block_info(&mut payload))
            }

            _ => return None,
        };

        Some(msg)
    }

    /// Serialize into a frame ready to be written on the socket.
    pub fn serialize(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.len());
        self.encode(&mut buf);
        buf
    }

    /// Size of the serialized frame, length prefix included.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        use Core::*;
        match self {
            KeepAlive => 4,
            Choke | Unchoke | Interested | NotInterested => 4 + 1,
            Have(_) => 4 + 1 + 4,
            Bitfield(b) => 4 + 1 + b.as_raw_slice().len(),
            Request(_) | Cancel(_) => 4 + 1 + 4 + 4 + 4,
            Piece(b) => 4 + 1 + 4 + 4 + b.block.len(),
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        use crate::bitfield::BitfieldExt;

        match self {
            Core::KeepAlive => buf.put_u32(0),
            Core::Choke => Self::put_header(buf, 1, CoreId::Choke),
            Core::Unchoke => Self::put_header(buf, 1, CoreId::Unchoke),
            Core::Interested => Self::put_header(buf, 1, CoreId::Interested),
            Core::NotInterested => {
                Self::put_header(buf, 1, CoreId::NotInterested)
            }
            Core::Have(index) => {
                Self::put_header(buf, 1 + 4, CoreId::Have);
                buf.put_u32(*index as u32);
            }
            Core::Bitfield(bitfield) => {
                let bytes = bitfield.to_wire();
                Self::put_header(buf, 1 + bytes.len() as u32, CoreId::Bitfield);
                buf.extend_from_slice(&bytes);
            }
            Core::Request(info) => {
                Self::put_header(buf, 1 + 4 + 4 + 4, CoreId::Request);
                info.encode(buf);
            }
            Core::Piece(block) => {
                let len = 1 + 4 + 4 + block.block.len() as u32;
                Self::put_header(buf, len, CoreId::Piece);
                block.encode(buf);
            }
            Core::Cancel(info) => {
                Self::put_header(buf, 1 + 4 + 4 + 4, CoreId::Cancel);
                info.encode(buf);
            }
        }
    }

    fn put_header(buf: &mut BytesMut, len: u32, id: CoreId) {
        buf.put_u32(len);
        buf.put_u8(id as u8);
    }

    fn block_info(payload: &mut &[u8]) -> BlockInfo {
        let index = payload.get_u32();
        let begin = payload.get_u32();
        let len = payload.get_u32();
        BlockInfo { index, begin, len }
    }
}

/// Frames a peer stream into [`Core`] messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoreCodec;

impl Encoder<Core> for CoreCodec {
    type Error = Error;

    fn encode(&mut self, item: Core, buf: &mut BytesMut) -> Result<(), Error> {
        buf.reserve(item.len());
        item.encode(buf);
        Ok(())
    }
}

impl Decoder for CoreCodec {
    type Item = Core;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Core>, Error> {
        loop {
            // the message length header must be present at the minimum,
            // otherwise we can't determine the message type
            if buf.len() < 4 {
                return Ok(None);
            }

            // peek at length prefix without consuming
            let size = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);

            if size > MAX_MESSAGE_LEN {
                return Err(Error::MessageTooLarge(size));
            }

            let frame_len = 4 + size as usize;

            // incomplete message, wait for the rest of it
            if buf.len() < frame_len {
                buf.reserve(frame_len - buf.len());
                return Ok(None);
            }

            let frame = buf.split_to(frame_len);

            match Core::parse(&frame) {
                Some(msg) => return Ok(Some(msg)),
                None => {
                    // skip the segment and try the next one
                    warn!("dropping malformed message of {size} bytes");
                }
            }
        }
    }
}


// Bitfield: <len=0001+X><id=5><bitfield>
//
// The bitfield message may only be sent immediately after the handshaking
// sequence is completed, and before any other messages are sent. It is
// optional, and need not be sent if a client has no pieces.
//
// The high bit in the first byte corresponds to piece index 0. Bits that are
// cleared indicated a missing piece, and set bits indicate a valid and
// available piece. Spare bits at the end are set to zero.
//
// Request: <len=0013><id=6><index><begin><length>
//
// The request message is used to request a block. Requests for more than
// 128 KiB are dropped, most clients ask for 16 KiB.
//
// Cancel: <len=0013><id=8><index><begin><length>
//
// The cancel message is used to cancel block requests. It is typically used
// during "End Game".
