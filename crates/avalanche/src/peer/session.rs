use hashbrown::HashSet;

use crate::{
    bitfield::{Bitfield, BitfieldExt},
    tcp_wire::{Block, BlockInfo, Core, MAX_BLOCK_LEN},
};

/// How many pieces a peer downloads at the same time.
pub const MAX_ASSIGNED_PIECES: usize = 20;

/// Contains the state of both sides of the connection.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CoreState {
    /// If we're choked, peer doesn't allow us to download pieces from them.
    pub am_choked: bool,

    /// If we're interested, peer has pieces that we don't have.
    pub am_interested: bool,

    /// If peer is choked, we don't allow them to download pieces from us.
    pub peer_choked: bool,

    /// If peer is interested in us, they mean to download pieces that we have.
    pub peer_interested: bool,
}

impl Default for CoreState {
    /// By default, both sides of the connection start off as choked and not
    /// interested in the other.
    fn default() -> Self {
        Self {
            am_choked: true,
            am_interested: false,
            peer_choked: true,
            peer_interested: false,
        }
    }
}

/// State of one connection, shared by the loop that reads the socket and the
/// loop that handles messages of the torrent.
#[derive(Debug)]
pub struct Session {
    pub state: CoreState,

    /// Pieces that the remote peer has.
    pub has: Bitfield,

    /// Pieces the torrent gave us to download.
    pub assigned: HashSet<usize>,

    /// Requests written to the socket and not answered yet.
    pub outstanding: Vec<BlockInfo>,

    /// Messages waiting to be written. Only requests stay here, while we are
    /// choked.
    pub queue: Vec<Core>,

    /// Requests of the remote peer that we didn't serve yet.
    pub owed: Vec<BlockInfo>,

    /// A `RequestPieces` was sent and not answered yet.
    pub asking: bool,

    /// Something changed while `asking`, ask again when the answer arrives.
    pub ask_again: bool,
}

impl Session {
    pub fn new(pieces: usize) -> Self {
        Self {
            state: CoreState::default(),
            has: Bitfield::from_piece(pieces),
            assigned: HashSet::new(),
            outstanding: Vec::new(),
            queue: Vec::new(),
            owed: Vec::new(),
            asking: false,
            ask_again: false,
        }
    }

    /// Queue `msgs` and return the ones that can be written now, updating
    /// the state as if they were already written, together with the bytes
    /// of piece data in them.
    ///
    /// Requests are held in the queue while we are choked.
    pub fn prepare(&mut self, msgs: impl IntoIterator<Item = Core>) -> (Vec<Core>, u64) {
        self.queue.extend(msgs);

        let mut ready = Vec::with_capacity(self.queue.len());
        let mut uploaded = 0;

        for msg in std::mem::take(&mut self.queue) {
            match &msg {
                Core::Request(_) if self.state.am_choked => {
                    self.queue.push(msg);
                    continue;
                }
                Core::Request(info) => self.outstanding.push(info.clone()),
                Core::Interested => self.state.am_interested = true,
                Core::NotInterested => self.state.am_interested = false,
                Core::Choke => self.state.peer_choked = true,
                Core::Unchoke => self.state.peer_choked = false,
                Core::Piece(block) => uploaded += block.block.len() as u64,
                _ => {}
            }
            ready.push(msg);
        }

        (ready, uploaded)
    }

    /// The remote choked us and will drop our requests, hold them until we
    /// are unchoked.
    pub fn requeue_outstanding(&mut self) {
        let outstanding = std::mem::take(&mut self.outstanding);
        self.queue.extend(outstanding.into_iter().map(Core::Request));
    }

    /// A block arrived.
    pub fn received(&mut self, block: &Block) {
        self.outstanding.retain(|info| !block.answers(info));
        self.queue.retain(|msg| !matches!(msg, Core::Request(info) if block.answers(info)));
    }

    /// Forget about every request of `index`, returning the `Cancel`s of the
    /// ones that were already written.
    pub fn cancel_piece(&mut self, index: usize) -> Vec<Core> {
        let index = index as u32;
        self.queue
            .retain(|msg| !matches!(msg, Core::Request(info) if info.index == index));

        let (cancel, keep) =
            std::mem::take(&mut self.outstanding).into_iter().partition(|info| info.index == index);
        self.outstanding = keep;

        cancel.into_iter().map(Core::Cancel).collect()
    }

    /// Pieces of `pieces` that were not assigned before, in order.
    pub fn assign(&mut self, pieces: Vec<usize>) -> Vec<usize> {
        pieces.into_iter().filter(|p| self.assigned.insert(*p)).collect()
    }

    /// How many pieces to ask for, if any.
    pub fn wants(&self) -> Option<usize> {
        let assigned = self.assigned.len();
        (assigned < MAX_ASSIGNED_PIECES).then(|| MAX_ASSIGNED_PIECES - assigned)
    }

    /// Record a request of the remote peer. Returns false if it must be
    /// dropped: too large, or already owed.
    pub fn owe(&mut self, info: BlockInfo) -> bool {
        if info.len > MAX_BLOCK_LEN || self.owed.contains(&info) {
            return false;
        }
        self.owed.push(info);
        true
    }

    /// If the block is still owed to the remote, consume the entry.
    pub fn take_owed(&mut self, block: &Block) -> bool {
        match self.owed.iter().position(|info| block.answers(info)) {
            Some(i) => {
                self.owed.remove(i);
                true
            }
            None => false,
        }
    }

    /// Set a piece the remote peer has, returns false if it is out of
    /// range.
    pub fn set_have(&mut self, index: usize) -> bool {
        if index >= self.has.len() {
            return false;
        }
        self.has.set(index, true);
        true
    }

    /// Replace the pieces that the remote peer has, keeping our length.
    pub fn set_bitfield(&mut self, bitfield: Bitfield) {
        let len = self.has.len();
        self.has = bitfield;
        self.has.resize(len, false);
    }
}
