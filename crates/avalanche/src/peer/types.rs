use std::{
    fmt::Display,
    hash::{Hash, Hasher},
    net::SocketAddr,
    sync::atomic::{AtomicU64, Ordering},
};

use rand::{distributions::Alphanumeric, Rng};

use crate::tcp_wire::Block;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PeerId(pub [u8; 20]);

impl PeerId {
    /// Prefix sent in every local peer id, in the Azureus-style.
    pub const PREFIX: &'static [u8; 8] = b"-AV0010-";

    /// A random peer id for the local client.
    pub fn gen() -> Self {
        let mut id = [0u8; 20];
        id[..8].copy_from_slice(Self::PREFIX);

        let mut rng = rand::thread_rng();
        for b in &mut id[8..] {
            *b = rng.sample(Alphanumeric);
        }
        Self(id)
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_string())
    }
}

impl From<[u8; 20]> for PeerId {
    fn from(value: [u8; 20]) -> Self {
        Self(value)
    }
}

impl TryFrom<&[u8]> for PeerId {
    type Error = &'static str;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let buff: [u8; 20] = value
            .try_into()
            .map_err(|_| "The PeerId must have exactly 20 bytes")?;
        Ok(PeerId(buff))
    }
}

/// A remote peer, as announced by a tracker or accepted by the listener.
///
/// Two peers are the same if they share the address, the id is only used to
/// validate the handshake.
#[derive(Clone, Debug)]
pub struct Peer {
    pub addr: SocketAddr,
    pub id: Option<PeerId>,
}

impl Peer {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, id: None }
    }
}

impl From<SocketAddr> for Peer {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr)
    }
}

impl PartialEq for Peer {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl Eq for Peer {}

impl Hash for Peer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr.hash(state);
    }
}

impl Display for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.addr)
    }
}

/// Identifies one connection, a peer that reconnects gets a new one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Messages sent by the torrent to a single peer.
#[derive(Debug)]
pub enum PeerMsg {
    /// Pieces this peer should download. When `endgame` is set, other peers
    /// may be downloading the same pieces, and the blocks are requested in
    /// random order.
    SupplyPieces { pieces: Vec<usize>, endgame: bool },
    /// A block the remote peer asked for, read from disk.
    SupplyChunk(Block),
    /// When we download a full piece, we need to send Have's
    /// to the remote and cancel our requests of the same piece.
    HavePiece(usize),
    /// The piece failed the hash check, this peer should drop it and
    /// ask for more work.
    PieceRejected(usize),
    /// Close the connection.
    FinishConnection,
}

/// Determines who initiated the connection.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Direction {
    /// Outbound means we initiated the connection
    Outbound,
    /// Inbound means the peer initiated the connection
    Inbound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gen_peer_id() {
        let id = PeerId::gen();
        assert_eq!(&id.0[..8], PeerId::PREFIX);
        assert!(id.0[8..].iter().all(u8::is_ascii_alphanumeric));
        assert_ne!(id, PeerId::gen());
    }

    #[test]
    fn peers_are_equal_by_address() {
        let addr: SocketAddr = "10.0.0.1:6881".parse().unwrap();
        let a = Peer { addr, id: Some(PeerId([1; 20])) };
        let b = Peer::new(addr);
        assert_eq!(a, b);

        let c = Peer::new("10.0.0.1:6882".parse().unwrap());
        assert_ne!(a, c);
    }
}
