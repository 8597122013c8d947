use std::{fmt::Display, ops::Deref};

use bytes::BytesMut;
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot},
};

use crate::{
    bitfield::Bitfield,
    peer::{ConnectionId, Peer, PeerMsg},
    tcp_wire::{Block, BlockInfo, Handshake},
};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InfoHash(pub [u8; 20]);

impl Display for InfoHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_string())
    }
}

impl Deref for InfoHash {
    type Target = [u8; 20];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<[u8; 20]> for InfoHash {
    fn from(value: [u8; 20]) -> Self {
        Self(value)
    }
}

impl TryFrom<&str> for InfoHash {
    type Error = &'static str;

    /// From the hex representation, as found in magnet links.
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let buff = hex::decode(value).map_err(|_| "The InfoHash is not valid hex")?;
        let hash: [u8; 20] = buff
            .try_into()
            .map_err(|_| "The InfoHash must have exactly 20 bytes")?;
        Ok(InfoHash(hash))
    }
}

/// Messages received by the torrent, from its peers, its tracker and the
/// outside world. They are handled one at a time, in order of arrival.
#[derive(Debug)]
pub enum TorrentMsg {
    /// A peer finished its handshake. `has` is what the remote told us it
    /// has so far.
    NewPeer {
        peer: Peer,
        conn: ConnectionId,
        tx: mpsc::UnboundedSender<PeerMsg>,
        has: Bitfield,
    },

    /// A peer has room for `count` more pieces.
    RequestPieces { peer: Peer, count: usize, has: Bitfield },

    /// The remote peer wants this block from us.
    RequestChunk { peer: Peer, block_info: BlockInfo },

    /// A block that the remote peer sent us.
    DownloadedChunk { peer: Peer, block: Block },

    /// Bytes of piece data written to the remote peer.
    Uploaded { peer: Peer, bytes: u64 },

    /// The connection is closed, `was_downloading` are the pieces that were
    /// assigned to it and can be given to other peers.
    CloseConnection {
        peer: Peer,
        conn: ConnectionId,
        was_downloading: Vec<usize>,
    },

    /// Sent by the tracker on periodic announces.
    AddPeers(Vec<Peer>),

    /// A connection accepted by the listener, with its handshake already
    /// read. `buf` holds any bytes that came after the handshake.
    Inbound {
        stream: TcpStream,
        buf: BytesMut,
        handshake: Handshake,
    },

    GetStats(oneshot::Sender<Stats>),

    /// Announce `stopped`, close every connection and return from `run`.
    Quit,
}

/// Events of a torrent that the outside world, like a UI, cares about.
#[derive(Debug, Clone, PartialEq)]
pub enum TorrentEvent {
    PeerCountChanged(usize),
    /// A piece was verified and written, `completion` goes from 0.0 to 1.0.
    PieceDownloaded { index: usize, completion: f64 },
    /// Every piece was downloaded.
    Completed,
    /// The torrent stopped because of `Quit`.
    Stopped,
    /// The torrent stopped because of an unrecoverable error.
    Failed(String),
}

/// State of the torrent, also used for tracker announces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Bytes received from peers, including what failed the hash check.
    pub downloaded: u64,
    pub uploaded: u64,
    /// Bytes of pieces verified and written to disk.
    pub verified: u64,
    /// Bytes still missing.
    pub left: u64,
    pub peers: usize,
}

impl Stats {
    pub fn is_complete(&self) -> bool {
        self.left == 0
    }
}
