//! Torrent that owns the swarm.
//!
//! A torrent will manage multiple peers, peers can send messages to the torrent
//! using [`TorrentMsg`], and torrent can send messages to the Peers using
//! [`PeerMsg`]. Every message goes through the same channel, so all the state
//! below is only touched by [`Torrent::run`].
mod types;

// re-exports
pub use types::*;

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use hashbrown::{HashMap, HashSet};
use rand::seq::SliceRandom;
use sha1_smol::Sha1;
use tokio::{spawn, sync::mpsc};
use tracing::{debug, error, info, warn};

use crate::{
    bitfield::{Bitfield, BitfieldExt},
    config::Config,
    disk::PieceStore,
    error::Error,
    metainfo::{Info, MetaInfo},
    peer::{self, session::MAX_ASSIGNED_PIECES, ConnectionId, Peer, PeerId, PeerMsg},
    tcp_wire::{Block, BlockInfo},
    tracker::{Tracker, TrackerMsg},
};

/// Context of [`Torrent`] that is shared with its peers.
#[derive(Debug)]
pub struct TorrentCtx {
    pub info_hash: InfoHash,
    pub local_peer_id: PeerId,
    pub info: Arc<Info>,
    pub tx: mpsc::UnboundedSender<TorrentMsg>,
    pub connect_timeout: Duration,
    pub peer_timeout: Duration,
}

/// A connected peer, as seen by the torrent.
#[derive(Debug)]
struct PeerEntry {
    conn: ConnectionId,
    tx: mpsc::UnboundedSender<PeerMsg>,
    /// Last snapshot of the pieces the remote has.
    has: Bitfield,
}

/// This is the main entity responsible for the high-level management of
/// a torrent download or upload.
pub struct Torrent {
    pub ctx: Arc<TorrentCtx>,
    pub config: Config,
    pub announce_list: Vec<Vec<String>>,

    /// Pieces that were verified and written to disk, bits are never unset.
    pub bitfield: Bitfield,
    pub stats: Stats,

    rx: mpsc::UnboundedReceiver<TorrentMsg>,
    peers: HashMap<Peer, PeerEntry>,
    /// Outbound connections that did not finish the handshake yet.
    connecting: HashSet<Peer>,
    /// Peers that were given each piece. Outside of endgame, a piece has at
    /// most one owner.
    reserved: HashMap<usize, HashSet<Peer>>,
    /// Blocks of pieces being downloaded, by offset.
    assembling: HashMap<usize, BTreeMap<u32, Vec<u8>>>,
    store: PieceStore,
    tracker_tx: Option<mpsc::UnboundedSender<TrackerMsg>>,
    events: Option<mpsc::UnboundedSender<TorrentEvent>>,
}

impl Torrent {
    /// Create the files of the torrent under `config.download_dir`.
    pub async fn new(meta: MetaInfo, config: Config) -> Result<Self, Error> {
        let info = Arc::new(meta.info);
        let store = PieceStore::new(info.clone(), &config.download_dir).await?;
        let (tx, rx) = mpsc::unbounded_channel();

        let ctx = Arc::new(TorrentCtx {
            info_hash: info.info_hash,
            local_peer_id: PeerId::gen(),
            info: info.clone(),
            tx,
            connect_timeout: config.connect_timeout(),
            peer_timeout: config.peer_timeout(),
        });

        let stats = Stats { left: info.total_size(), ..Default::default() };

        Ok(Self {
            bitfield: Bitfield::from_piece(info.pieces_count()),
            announce_list: meta.announce_list,
            stats,
            ctx,
            config,
            rx,
            peers: HashMap::new(),
            connecting: HashSet::new(),
            reserved: HashMap::new(),
            assembling: HashMap::new(),
            store,
            tracker_tx: None,
            events: None,
        })
    }

    /// Send [`TorrentEvent`]s to `tx`.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<TorrentEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Sender used to control the torrent once it is running.
    pub fn handle(&self) -> mpsc::UnboundedSender<TorrentMsg> {
        self.ctx.tx.clone()
    }

    /// Set the bits of the pieces that are already on disk, returns how many
    /// there are.
    pub async fn verify_existing(&mut self) -> Result<usize, Error> {
        for index in 0..self.ctx.info.pieces_count() {
            if self.bitfield[index] || !self.store.has_piece(index).await? {
                continue;
            }
            self.bitfield.set(index, true);
            self.stats.verified += self.ctx.info.piece_len(index)? as u64;
        }
        self.stats.left = self.ctx.info.total_size() - self.stats.verified;

        let count = self.bitfield.count_ones();
        if count > 0 {
            info!("{count} pieces already on disk");
        }
        Ok(count)
    }

    /// Run the torrent until it receives [`TorrentMsg::Quit`] or fails to
    /// read or write its files.
    #[tracing::instrument(skip_all, name = "torrent", fields(info_hash = %self.ctx.info_hash))]
    pub async fn run(mut self) -> Result<(), Error> {
        info!("running torrent {:?}", self.ctx.info.name);

        let r = self.start().await;

        if let Err(e) = &r {
            error!("torrent stopped: {e}");
            self.shutdown();
            self.emit(TorrentEvent::Failed(e.to_string()));
        }

        r
    }

    async fn start(&mut self) -> Result<(), Error> {
        self.verify_existing().await?;

        if self.announce_list.iter().flatten().next().is_some() {
            self.spawn_tracker()?;
        } else {
            warn!("torrent has no trackers");
        }

        while let Some(msg) = self.rx.recv().await {
            if !self.handle_msg(msg).await? {
                break;
            }
        }

        Ok(())
    }

    fn spawn_tracker(&mut self) -> Result<(), Error> {
        let (tx, rx) = mpsc::unbounded_channel();

        let tracker = Tracker::new(
            self.announce_list.clone(),
            self.ctx.info_hash,
            self.ctx.local_peer_id,
            self.config.local_peer_port,
            self.stats(),
            self.config.tracker_timeout(),
            self.ctx.tx.clone(),
            rx,
        )?;

        spawn(async move {
            if let Err(e) = tracker.run().await {
                warn!("tracker stopped: {e}");
            }
        });

        self.tracker_tx = Some(tx);
        Ok(())
    }

    /// Returns `false` when the torrent must stop.
    async fn handle_msg(&mut self, msg: TorrentMsg) -> Result<bool, Error> {
        match msg {
            TorrentMsg::NewPeer { peer, conn, tx, has } => {
                self.new_peer(peer, conn, tx, has);
            }
            TorrentMsg::RequestPieces { peer, count, has } => {
                if let Some(entry) = self.peers.get_mut(&peer) {
                    entry.has = has;
                }
                self.supply_pieces(&peer, count, false);
            }
            TorrentMsg::RequestChunk { peer, block_info } => {
                self.request_chunk(&peer, block_info).await?;
            }
            TorrentMsg::DownloadedChunk { peer, block } => {
                self.downloaded_chunk(&peer, block).await?;
            }
            TorrentMsg::Uploaded { peer, bytes } => {
                debug!("{peer} uploaded {bytes} bytes");
                self.stats.uploaded += bytes;
                self.push_stats();
            }
            TorrentMsg::CloseConnection { peer, conn, was_downloading } => {
                self.close_connection(&peer, conn, was_downloading);
            }
            TorrentMsg::AddPeers(peers) => {
                self.add_peers(peers);
            }
            TorrentMsg::Inbound { stream, buf, handshake } => {
                if self.is_full() {
                    debug!("dropping inbound connection, too many peers");
                    return Ok(true);
                }
                let ctx = self.ctx.clone();
                let has = self.bitfield.clone();
                spawn(async move {
                    if let Err(e) = peer::run_inbound(stream, buf, handshake, ctx, has).await {
                        debug!("inbound connection closed: {e}");
                    }
                });
            }
            TorrentMsg::GetStats(tx) => {
                let _ = tx.send(self.stats());
            }
            TorrentMsg::Quit => {
                info!("quitting torrent");
                self.shutdown();
                self.emit(TorrentEvent::Stopped);
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn stats(&self) -> Stats {
        Stats { peers: self.peers.len(), ..self.stats }
    }

    /// Once 90% of the bytes are verified, a piece can be downloaded from
    /// more than one peer at the same time.
    pub fn is_endgame(&self) -> bool {
        let total = self.ctx.info.total_size();
        self.stats.verified * 10 >= total * 9
    }

    fn is_full(&self) -> bool {
        self.peers.len() + self.connecting.len() >= self.config.max_torrent_peers
    }

    fn emit(&self, event: TorrentEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn push_stats(&self) {
        if let Some(tx) = &self.tracker_tx {
            let _ = tx.send(TrackerMsg::Stats(self.stats()));
        }
    }

    /// Stop the tracker and every connection.
    fn shutdown(&mut self) {
        if let Some(tx) = self.tracker_tx.take() {
            let _ = tx.send(TrackerMsg::Stop);
        }
        for entry in self.peers.values() {
            let _ = entry.tx.send(PeerMsg::FinishConnection);
        }
    }

    /// Connect to the peers that we are not connected to, until the limit of
    /// connections is reached.
    fn add_peers(&mut self, peers: Vec<Peer>) {
        for peer in peers {
            if self.is_full() {
                debug!("too many peers, ignoring the rest");
                break;
            }
            if self.peers.contains_key(&peer) || !self.connecting.insert(peer.clone()) {
                continue;
            }

            debug!("{peer} connecting");

            let ctx = self.ctx.clone();
            let has = self.bitfield.clone();
            spawn(peer::run_outbound(peer, ctx, has));
        }
    }

    fn new_peer(
        &mut self,
        peer: Peer,
        conn: ConnectionId,
        tx: mpsc::UnboundedSender<PeerMsg>,
        has: Bitfield,
    ) {
        self.connecting.remove(&peer);

        if self.peers.contains_key(&peer) {
            debug!("{peer} is already connected");
            let _ = tx.send(PeerMsg::FinishConnection);
            return;
        }

        debug!("{peer} connected");

        self.peers.insert(peer.clone(), PeerEntry { conn, tx, has });
        self.emit(TorrentEvent::PeerCountChanged(self.peers.len()));
        self.push_stats();

        self.supply_pieces(&peer, MAX_ASSIGNED_PIECES, true);
    }

    fn close_connection(&mut self, peer: &Peer, conn: ConnectionId, was_downloading: Vec<usize>) {
        self.connecting.remove(peer);

        match self.peers.get(peer) {
            Some(entry) if entry.conn == conn => {
                self.peers.remove(peer);
                debug!("{peer} disconnected, freeing {was_downloading:?}");
                self.emit(TorrentEvent::PeerCountChanged(self.peers.len()));
                self.push_stats();
            }
            // a duplicate of a live connection, the reservations are not its
            Some(_) => return,
            None => {}
        }

        // supplies that never reached the connection are not in
        // `was_downloading`, so every reservation of the peer is dropped
        self.release(peer, |_| true);
    }

    /// Drop the reservations of `peer` on the pieces that match `f`.
    fn release(&mut self, peer: &Peer, f: impl Fn(usize) -> bool) {
        self.reserved.retain(|&index, owners| {
            if f(index) {
                owners.remove(peer);
            }
            !owners.is_empty()
        });
    }

    /// Pick up to `count` random pieces that `peer` has and we don't, and
    /// reserve them for it.
    pub fn select_pieces(&mut self, peer: &Peer, count: usize) -> Vec<usize> {
        let endgame = self.is_endgame();

        let Some(entry) = self.peers.get(peer) else {
            return Vec::new();
        };

        let mut candidates: Vec<usize> = entry
            .has
            .iter_ones()
            .filter(|&index| matches!(self.bitfield.get(index).as_deref(), Some(false)))
            .filter(|index| match self.reserved.get(index) {
                None => true,
                Some(owners) => endgame && !owners.contains(peer),
            })
            .collect();

        candidates.shuffle(&mut rand::thread_rng());
        candidates.truncate(count);

        for &index in &candidates {
            self.reserved.entry(index).or_default().insert(peer.clone());
        }

        candidates
    }

    /// Answer a [`TorrentMsg::RequestPieces`]. A new peer is only answered if
    /// it has something to download.
    fn supply_pieces(&mut self, peer: &Peer, count: usize, only_if_any: bool) {
        let pieces = self.select_pieces(peer, count);

        if only_if_any && pieces.is_empty() {
            return;
        }

        let endgame = self.is_endgame();
        let Some(entry) = self.peers.get(peer) else {
            return;
        };

        if let Err(e) = entry.tx.send(PeerMsg::SupplyPieces { pieces, endgame }) {
            let PeerMsg::SupplyPieces { pieces, .. } = e.0 else {
                return;
            };
            debug!("{peer} is closing, freeing {pieces:?}");
            self.release(peer, |index| pieces.contains(&index));
        }
    }

    async fn request_chunk(&mut self, peer: &Peer, block_info: BlockInfo) -> Result<(), Error> {
        let index = block_info.index as usize;

        if !self.bitfield.get(index).is_some_and(|b| *b) {
            debug!("{peer} requested piece {index} which we don't have");
            return Ok(());
        }

        let piece_len = self.ctx.info.piece_len(index)?;
        if block_info.begin as u64 + block_info.len as u64 > piece_len as u64 {
            debug!("{peer} requested a block outside of piece {index}");
            return Ok(());
        }

        let block = self.store.read_chunk(&block_info).await?;

        if let Some(entry) = self.peers.get(peer) {
            let _ = entry.tx.send(PeerMsg::SupplyChunk(Block {
                index,
                begin: block_info.begin,
                block,
            }));
        }

        Ok(())
    }

    async fn downloaded_chunk(&mut self, peer: &Peer, block: Block) -> Result<(), Error> {
        let index = block.index;

        if !matches!(self.bitfield.get(index).as_deref(), Some(false)) {
            return Ok(());
        }

        let piece_len = self.ctx.info.piece_len(index)?;
        let expected = BlockInfo::split_piece(index as u32, piece_len);

        let valid = expected
            .iter()
            .any(|info| info.begin == block.begin && info.len as usize == block.block.len());

        if !valid {
            debug!("{peer} sent a block with a bad offset or length");
            return Ok(());
        }

        let chunks = self.assembling.entry(index).or_default();

        if chunks.contains_key(&block.begin) {
            return Ok(());
        }

        self.stats.downloaded += block.block.len() as u64;
        chunks.insert(block.begin, block.block);

        if chunks.len() < expected.len() {
            return Ok(());
        }

        let piece: Vec<u8> = self
            .assembling
            .remove(&index)
            .unwrap_or_default()
            .into_values()
            .flatten()
            .collect();

        let hash = Sha1::from(&piece).digest().bytes();

        if self.ctx.info.pieces.get(index) != Some(&hash) {
            warn!("piece {index} from {peer} failed the hash check");
            for owner in self.reserved.remove(&index).into_iter().flatten() {
                if let Some(entry) = self.peers.get(&owner) {
                    let _ = entry.tx.send(PeerMsg::PieceRejected(index));
                }
            }
            return Ok(());
        }

        self.store.store_piece(index, &piece).await?;

        self.bitfield.set(index, true);
        self.reserved.remove(&index);
        self.stats.verified += piece.len() as u64;
        self.stats.left = self.ctx.info.total_size() - self.stats.verified;

        for entry in self.peers.values() {
            let _ = entry.tx.send(PeerMsg::HavePiece(index));
        }

        let completion = self.stats.verified as f64 / self.ctx.info.total_size() as f64;
        debug!("downloaded piece {index}, {:.2}%", completion * 100.0);

        self.emit(TorrentEvent::PieceDownloaded { index, completion });
        self.push_stats();

        if self.bitfield.all() {
            info!("downloaded the entire torrent");
            self.emit(TorrentEvent::Completed);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use tempfile::TempDir;

    use super::*;
    use crate::{metainfo::Layout, tcp_wire::BLOCK_LEN};

    const PIECE_LEN: u32 = BLOCK_LEN * 2;

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    async fn torrent(data: &[u8], dir: &TempDir) -> Result<Torrent, Error> {
        let meta = MetaInfo {
            announce_list: Vec::new(),
            info: Info {
                info_hash: InfoHash([7; 20]),
                name: "file.bin".to_owned(),
                piece_length: PIECE_LEN,
                pieces: Info::hash_pieces(data, PIECE_LEN),
                layout: Layout::Single { length: data.len() as u64 },
            },
        };
        let config = Config {
            download_dir: dir.path().display().to_string(),
            ..Default::default()
        };
        Torrent::new(meta, config).await
    }

    fn connect(
        torrent: &mut Torrent,
        port: u16,
    ) -> (Peer, ConnectionId, mpsc::UnboundedReceiver<PeerMsg>) {
        let peer = Peer::new(SocketAddr::from(([127, 0, 0, 1], port)));
        let conn = ConnectionId::next();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut has = Bitfield::from_piece(torrent.ctx.info.pieces_count());
        has.fill(true);
        torrent.new_peer(peer.clone(), conn, tx, has);
        (peer, conn, rx)
    }

    fn blocks(data: &[u8], index: usize) -> Vec<Block> {
        let piece = &data[index * PIECE_LEN as usize..][..PIECE_LEN as usize];
        piece
            .chunks(BLOCK_LEN as usize)
            .enumerate()
            .map(|(i, b)| Block {
                index,
                begin: i as u32 * BLOCK_LEN,
                block: b.to_vec(),
            })
            .collect()
    }

    #[tokio::test]
    async fn new_peer_gets_pieces_it_has() -> Result<(), Error> {
        let dir = TempDir::new()?;
        let data = data(PIECE_LEN as usize * 4);
        let mut torrent = torrent(&data, &dir).await?;

        let (_, _, mut rx) = connect(&mut torrent, 1);

        let Some(PeerMsg::SupplyPieces { mut pieces, endgame }) = rx.recv().await else {
            panic!("expected pieces");
        };
        pieces.sort();
        assert_eq!(pieces, vec![0, 1, 2, 3]);
        assert!(!endgame);

        // every piece is reserved, a second peer gets nothing
        let (peer, _, mut rx) = connect(&mut torrent, 2);
        assert!(rx.try_recv().is_err());
        assert!(torrent.select_pieces(&peer, 10).is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn bad_hash_is_discarded() -> Result<(), Error> {
        let dir = TempDir::new()?;
        let data = data(PIECE_LEN as usize * 2);
        let mut torrent = torrent(&data, &dir).await?;
        let (peer, _, mut rx) = connect(&mut torrent, 1);
        rx.recv().await;

        let mut blocks = blocks(&data, 1);
        blocks[1].block[0] ^= 0xff;

        for block in blocks {
            torrent.downloaded_chunk(&peer, block).await?;
        }

        assert!(!torrent.bitfield[1]);
        assert_eq!(torrent.stats.verified, 0);
        assert_eq!(torrent.stats.downloaded, PIECE_LEN as u64);
        assert!(!torrent.assembling.contains_key(&1));
        assert!(!torrent.reserved.contains_key(&1));
        assert!(matches!(rx.recv().await, Some(PeerMsg::PieceRejected(1))));

        // nothing was written
        assert_eq!(torrent.store.get_piece(1).await?, vec![0; PIECE_LEN as usize]);

        Ok(())
    }

    #[tokio::test]
    async fn piece_is_stored_once() -> Result<(), Error> {
        let dir = TempDir::new()?;
        let data = data(PIECE_LEN as usize * 2);
        let mut torrent = torrent(&data, &dir).await?;
        let (peer, _, mut rx) = connect(&mut torrent, 1);
        rx.recv().await;

        let blocks = blocks(&data, 0);

        // duplicated offsets are ignored
        torrent.downloaded_chunk(&peer, blocks[0].clone()).await?;
        torrent.downloaded_chunk(&peer, blocks[0].clone()).await?;
        assert!(!torrent.bitfield[0]);
        assert_eq!(torrent.stats.downloaded, BLOCK_LEN as u64);

        torrent.downloaded_chunk(&peer, blocks[1].clone()).await?;
        assert!(torrent.bitfield[0]);
        assert_eq!(torrent.stats.verified, PIECE_LEN as u64);
        assert!(matches!(rx.recv().await, Some(PeerMsg::HavePiece(0))));

        // late blocks of a complete piece are ignored
        torrent.downloaded_chunk(&peer, blocks[1].clone()).await?;
        assert_eq!(torrent.stats.verified, PIECE_LEN as u64);
        assert!(rx.try_recv().is_err());

        assert_eq!(torrent.store.get_piece(0).await?, data[..PIECE_LEN as usize]);

        Ok(())
    }

    #[tokio::test]
    async fn endgame_shares_pieces() -> Result<(), Error> {
        let dir = TempDir::new()?;
        let data = data(PIECE_LEN as usize * 10);
        let mut torrent = torrent(&data, &dir).await?;

        let (a, _, mut a_rx) = connect(&mut torrent, 1);
        a_rx.recv().await;
        let (b, _, _b_rx) = connect(&mut torrent, 2);

        // 8 of 10 pieces, not endgame yet
        for index in 0..8 {
            for block in blocks(&data, index) {
                torrent.downloaded_chunk(&a, block).await?;
            }
        }
        assert!(!torrent.is_endgame());
        assert!(torrent.select_pieces(&b, 10).is_empty());

        for block in blocks(&data, 8) {
            torrent.downloaded_chunk(&a, block).await?;
        }
        assert!(torrent.is_endgame());

        // piece 9 is still owned by `a`, but `b` can get it too
        assert_eq!(torrent.select_pieces(&b, 10), vec![9]);
        assert_eq!(torrent.reserved[&9].len(), 2);
        // a peer never gets the same piece twice
        assert!(torrent.select_pieces(&a, 10).is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn closed_connection_frees_pieces() -> Result<(), Error> {
        let dir = TempDir::new()?;
        let data = data(PIECE_LEN as usize * 3);
        let mut torrent = torrent(&data, &dir).await?;

        let (a, a_conn, mut a_rx) = connect(&mut torrent, 1);
        let Some(PeerMsg::SupplyPieces { pieces, .. }) = a_rx.recv().await else {
            panic!("expected pieces");
        };
        assert_eq!(pieces.len(), 3);

        let (b, _, _b_rx) = connect(&mut torrent, 2);
        assert!(torrent.select_pieces(&b, 10).is_empty());

        // a duplicate connection of `a` closing does not free anything
        torrent.close_connection(&a, ConnectionId::next(), pieces.clone());
        assert!(torrent.select_pieces(&b, 10).is_empty());
        assert_eq!(torrent.stats().peers, 2);

        torrent.close_connection(&a, a_conn, pieces);
        assert_eq!(torrent.stats().peers, 1);

        let mut got = torrent.select_pieces(&b, 10);
        got.sort();
        assert_eq!(got, vec![0, 1, 2]);

        Ok(())
    }

    #[tokio::test]
    async fn pieces_supplied_to_a_closing_peer_are_freed() -> Result<(), Error> {
        let dir = TempDir::new()?;
        let data = data(PIECE_LEN as usize * 3);
        let mut torrent = torrent(&data, &dir).await?;

        // the connection closed its channel before the pieces arrived
        let a = Peer::new(SocketAddr::from(([127, 0, 0, 1], 1)));
        let a_conn = ConnectionId::next();
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mut has = Bitfield::from_piece(3);
        has.fill(true);
        torrent.new_peer(a.clone(), a_conn, tx, has);
        assert!(torrent.reserved.is_empty());

        // reserved without a message, the close still frees them
        assert_eq!(torrent.select_pieces(&a, 10).len(), 3);
        torrent.close_connection(&a, a_conn, Vec::new());
        assert!(torrent.reserved.is_empty());

        let (b, _, mut b_rx) = connect(&mut torrent, 2);
        let Some(PeerMsg::SupplyPieces { mut pieces, .. }) = b_rx.recv().await else {
            panic!("expected pieces");
        };
        pieces.sort();
        assert_eq!(pieces, vec![0, 1, 2]);
        assert!(torrent.select_pieces(&b, 10).is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn serves_only_verified_pieces() -> Result<(), Error> {
        let dir = TempDir::new()?;
        let data = data(PIECE_LEN as usize * 2);
        let mut torrent = torrent(&data, &dir).await?;
        let (peer, _, mut rx) = connect(&mut torrent, 1);
        rx.recv().await;

        let info = BlockInfo::new().index(0).begin(BLOCK_LEN);
        torrent.request_chunk(&peer, info.clone()).await?;
        assert!(rx.try_recv().is_err());

        for block in blocks(&data, 0) {
            torrent.downloaded_chunk(&peer, block).await?;
        }
        rx.recv().await;

        torrent.request_chunk(&peer, info).await?;
        let Some(PeerMsg::SupplyChunk(block)) = rx.recv().await else {
            panic!("expected a block");
        };
        assert_eq!(block.begin, BLOCK_LEN);
        assert_eq!(block.block, data[BLOCK_LEN as usize..PIECE_LEN as usize]);

        // outside of the piece
        let info = BlockInfo::new().index(0).begin(PIECE_LEN);
        torrent.request_chunk(&peer, info).await?;
        assert!(rx.try_recv().is_err());

        Ok(())
    }

    #[tokio::test]
    async fn resumes_from_disk() -> Result<(), Error> {
        let dir = TempDir::new()?;
        let data = data(PIECE_LEN as usize * 2 + 10);
        tokio::fs::write(dir.path().join("file.bin"), &data).await?;

        let mut torrent = torrent(&data, &dir).await?;
        assert_eq!(torrent.verify_existing().await?, 3);
        assert!(torrent.stats.is_complete());

        Ok(())
    }
}
