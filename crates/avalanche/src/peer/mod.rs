//! A remote peer in the network that downloads and uploads data.
//!
//! Every connection runs two loops at the same time: one reads messages from
//! the socket, the other handles the messages of the torrent. Both of them
//! write to the socket through the [`Outbox`], which is behind a mutex
//! together with the [`Session`].
pub mod session;
mod types;

// re-exports
pub use types::*;

use std::{sync::Arc, time::Duration};

use bytes::BytesMut;
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use rand::seq::SliceRandom;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    select,
    sync::{mpsc, Mutex},
    time::{interval_at, timeout, Instant},
};
use tokio_util::codec::{Framed, FramedParts};
use tracing::{debug, warn};

use self::session::Session;
use crate::{
    bitfield::Bitfield,
    error::Error,
    tcp_wire::{BlockInfo, Core, CoreCodec, Handshake, HandshakeCodec},
    torrent::{TorrentCtx, TorrentMsg},
};

/// How often a keep-alive is sent to the remote peer.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(90);

/// Connect to `peer`, handshake, and run the connection until it is closed.
pub async fn run_outbound(peer: Peer, ctx: Arc<TorrentCtx>, local_has: Bitfield) {
    let conn = ConnectionId::next();

    match connect(&peer, &ctx).await {
        Ok(socket) => {
            let _ = PeerConnection::run(peer, conn, Direction::Outbound, ctx, socket, local_has)
                .await;
        }
        Err(e) => {
            debug!("{peer} handshake failed: {e}");
            let _ = ctx.tx.send(TorrentMsg::CloseConnection {
                peer,
                conn,
                was_downloading: Vec::new(),
            });
        }
    }
}

/// Answer the handshake of a connection accepted by the listener, and run
/// it until it is closed.
pub async fn run_inbound(
    stream: TcpStream,
    buf: BytesMut,
    handshake: Handshake,
    ctx: Arc<TorrentCtx>,
    local_has: Bitfield,
) -> Result<(), Error> {
    let peer = Peer { addr: stream.peer_addr()?, id: Some(handshake.peer_id) };
    let conn = ConnectionId::next();

    handshake.validate(&ctx.info_hash, None)?;

    let mut socket = Framed::new(stream, HandshakeCodec);
    socket.read_buffer_mut().extend_from_slice(&buf);

    debug!("{peer} sending the second handshake");
    socket
        .send(Handshake::new(ctx.info_hash, ctx.local_peer_id))
        .await?;

    PeerConnection::run(peer, conn, Direction::Inbound, ctx, into_core(socket), local_has).await
}

/// Open a TCP connection, send our handshake and validate theirs.
pub async fn connect(peer: &Peer, ctx: &TorrentCtx) -> Result<Framed<TcpStream, CoreCodec>, Error> {
    let stream = timeout(ctx.connect_timeout, TcpStream::connect(peer.addr))
        .await
        .map_err(|_| Error::Timeout)??;

    let mut socket = Framed::new(stream, HandshakeCodec);

    debug!("{peer} sending the first handshake");
    socket
        .send(Handshake::new(ctx.info_hash, ctx.local_peer_id))
        .await?;

    let their_handshake = timeout(ctx.connect_timeout, socket.next())
        .await
        .map_err(|_| Error::Timeout)?
        .ok_or(Error::NoHandshake)??;

    their_handshake.validate(&ctx.info_hash, peer.id.as_ref())?;
    debug!("{peer} handshake ok, peer id {}", their_handshake.peer_id);

    Ok(into_core(socket))
}

/// Switch the codec of the socket, keeping the bytes that are already
/// buffered.
fn into_core<S: AsyncRead + AsyncWrite>(socket: Framed<S, HandshakeCodec>) -> Framed<S, CoreCodec> {
    let old_parts = socket.into_parts();
    let mut new_parts = FramedParts::new(old_parts.io, CoreCodec);
    new_parts.read_buf = old_parts.read_buf;
    new_parts.write_buf = old_parts.write_buf;
    Framed::from_parts(new_parts)
}

/// The write half of the socket, and the state that decides what can be
/// written to it.
pub struct Outbox<S> {
    pub session: Session,
    sink: SplitSink<Framed<S, CoreCodec>, Core>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Outbox<S> {
    /// Queue the messages and write all the ones that can be written,
    /// returns the bytes of piece data written.
    async fn send(&mut self, msgs: impl IntoIterator<Item = Core>, write_timeout: Duration) -> Result<u64, Error> {
        let (ready, uploaded) = self.session.prepare(msgs);
        if ready.is_empty() {
            return Ok(0);
        }

        let write = async move {
            for msg in ready {
                self.sink.feed(msg).await?;
            }
            self.sink.flush().await
        };

        timeout(write_timeout, write).await.map_err(|_| Error::Timeout)??;

        Ok(uploaded)
    }
}

/// One connection with a remote peer, after the handshake.
pub struct PeerConnection<S> {
    pub peer: Peer,
    pub conn: ConnectionId,
    pub direction: Direction,
    ctx: Arc<TorrentCtx>,
    outbox: Mutex<Outbox<S>>,
}

impl<S> PeerConnection<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Register the connection in the torrent and run it until the socket
    /// fails, the remote goes silent or the torrent tells us to finish.
    ///
    /// The torrent always receives one `CloseConnection` after this, with
    /// every piece that was assigned to this connection.
    #[tracing::instrument(skip_all, name = "peer", fields(addr = %peer))]
    pub async fn run(
        peer: Peer,
        conn: ConnectionId,
        direction: Direction,
        ctx: Arc<TorrentCtx>,
        socket: Framed<S, CoreCodec>,
        local_has: Bitfield,
    ) -> Result<(), Error> {
        let (sink, mut stream) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let this = Self {
            outbox: Mutex::new(Outbox { session: Session::new(ctx.info.pieces_count()), sink }),
            peer,
            conn,
            direction,
            ctx,
        };

        let r = this.start(tx, local_has, &mut stream, &mut rx).await;

        match &r {
            Ok(_) => debug!("{} connection closed", this.peer),
            Err(e) => debug!("{} connection closed: {e}", this.peer),
        }

        this.teardown(&mut rx).await;
        r
    }

    async fn start(
        &self,
        tx: mpsc::UnboundedSender<PeerMsg>,
        local_has: Bitfield,
        stream: &mut SplitStream<Framed<S, CoreCodec>>,
        rx: &mut mpsc::UnboundedReceiver<PeerMsg>,
    ) -> Result<(), Error> {
        let has = self.outbox.lock().await.session.has.clone();

        self.ctx.tx.send(TorrentMsg::NewPeer {
            peer: self.peer.clone(),
            conn: self.conn,
            tx,
            has,
        })?;

        if local_has.any() {
            debug!("{} sending bitfield", self.peer);
            self.send([Core::Bitfield(local_has)]).await?;
        }

        // the first loop to finish cancels the other one
        select! {
            r = self.receive_loop(stream) => r,
            r = self.control_loop(rx) => r,
        }
    }

    async fn receive_loop(&self, stream: &mut SplitStream<Framed<S, CoreCodec>>) -> Result<(), Error> {
        loop {
            // the timeout is reset only when a whole message arrives
            let msg = match timeout(self.ctx.peer_timeout, stream.next()).await {
                Err(_) => return Err(Error::Timeout),
                Ok(None) => return Err(Error::PeerClosedSocket),
                Ok(Some(msg)) => msg?,
            };
            self.handle_message(msg).await?;
        }
    }

    async fn control_loop(&self, rx: &mut mpsc::UnboundedReceiver<PeerMsg>) -> Result<(), Error> {
        let mut keep_alive = interval_at(Instant::now() + KEEP_ALIVE_INTERVAL, KEEP_ALIVE_INTERVAL);

        loop {
            select! {
                msg = rx.recv() => {
                    match msg {
                        Some(PeerMsg::FinishConnection) | None => return Ok(()),
                        Some(msg) => self.handle_peer_msg(msg).await?,
                    }
                }
                _ = keep_alive.tick() => {
                    self.send([Core::KeepAlive]).await?;
                }
            }
        }
    }

    async fn send(&self, msgs: impl IntoIterator<Item = Core>) -> Result<(), Error> {
        let mut outbox = self.outbox.lock().await;
        self.send_locked(&mut outbox, msgs).await
    }

    async fn send_locked(
        &self,
        outbox: &mut Outbox<S>,
        msgs: impl IntoIterator<Item = Core>,
    ) -> Result<(), Error> {
        let uploaded = outbox.send(msgs, self.ctx.peer_timeout).await?;
        if uploaded > 0 {
            self.ctx.tx.send(TorrentMsg::Uploaded { peer: self.peer.clone(), bytes: uploaded })?;
        }
        Ok(())
    }

    /// Ask the torrent for more pieces if there is room for them and the
    /// remote has anything at all.
    fn ask_for_pieces(&self, session: &mut Session) -> Result<(), Error> {
        if !session.has.any() {
            return Ok(());
        }
        if session.asking {
            session.ask_again = true;
            return Ok(());
        }
        let Some(count) = session.wants() else {
            return Ok(());
        };

        session.asking = true;
        session.ask_again = false;

        self.ctx.tx.send(TorrentMsg::RequestPieces {
            peer: self.peer.clone(),
            count,
            has: session.has.clone(),
        })?;
        Ok(())
    }

    async fn handle_message(&self, msg: Core) -> Result<(), Error> {
        let remote = &self.peer;
        let mut outbox = self.outbox.lock().await;

        match msg {
            Core::KeepAlive => {
                debug!("{remote} < keepalive");
            }
            Core::Choke => {
                debug!("{remote} < choke");
                outbox.session.state.am_choked = true;
                outbox.session.requeue_outstanding();
            }
            Core::Unchoke => {
                debug!("{remote} < unchoke");
                outbox.session.state.am_choked = false;
                self.send_locked(&mut outbox, []).await?;
                self.ask_for_pieces(&mut outbox.session)?;
            }
            Core::Interested => {
                debug!("{remote} < interested");
                outbox.session.state.peer_interested = true;
                if outbox.session.state.peer_choked {
                    debug!("{remote} sending unchoke");
                    self.send_locked(&mut outbox, [Core::Unchoke]).await?;
                }
            }
            Core::NotInterested => {
                debug!("{remote} < not_interested");
                outbox.session.state.peer_interested = false;
                outbox.session.owed.clear();
            }
            Core::Have(index) => {
                if !outbox.session.set_have(index) {
                    debug!("{remote} < have {index}, out of range");
                    return Ok(());
                }
                self.ask_for_pieces(&mut outbox.session)?;
            }
            Core::Bitfield(bitfield) => {
                debug!("{remote} < bitfield ones: {}", bitfield.count_ones());
                outbox.session.set_bitfield(bitfield);
                self.ask_for_pieces(&mut outbox.session)?;
            }
            Core::Request(block_info) => {
                if !outbox.session.owe(block_info.clone()) {
                    debug!("{remote} < dropping request {block_info:?}");
                    return Ok(());
                }
                self.ctx.tx.send(TorrentMsg::RequestChunk { peer: remote.clone(), block_info })?;
            }
            Core::Piece(block) => {
                outbox.session.received(&block);
                self.ctx.tx.send(TorrentMsg::DownloadedChunk { peer: remote.clone(), block })?;
            }
            Core::Cancel(block_info) => {
                debug!("{remote} < cancel {block_info:?}");
                outbox.session.owed.retain(|info| *info != block_info);
            }
        }

        Ok(())
    }

    async fn handle_peer_msg(&self, msg: PeerMsg) -> Result<(), Error> {
        let remote = &self.peer;
        let mut outbox = self.outbox.lock().await;

        match msg {
            PeerMsg::SupplyPieces { pieces, endgame } => {
                outbox.session.asking = false;

                let pieces = outbox.session.assign(pieces);
                let mut msgs = Vec::new();

                if !pieces.is_empty() {
                    debug!("{remote} downloading pieces {pieces:?}");
                    if !outbox.session.state.am_interested {
                        debug!("{remote} sending interested");
                        msgs.push(Core::Interested);
                    }
                }

                for index in pieces {
                    let len = self.ctx.info.piece_len(index)?;
                    let mut infos = BlockInfo::split_piece(index as u32, len);
                    if endgame {
                        infos.shuffle(&mut rand::thread_rng());
                    }
                    msgs.extend(infos.into_iter().map(Core::Request));
                }

                self.send_locked(&mut outbox, msgs).await?;

                if outbox.session.ask_again {
                    self.ask_for_pieces(&mut outbox.session)?;
                }
            }
            PeerMsg::SupplyChunk(block) => {
                if !outbox.session.take_owed(&block) {
                    debug!("{remote} block {} {} was cancelled", block.index, block.begin);
                    return Ok(());
                }
                self.send_locked(&mut outbox, [Core::Piece(block)]).await?;
            }
            PeerMsg::HavePiece(index) => {
                let mut msgs = vec![Core::Have(index)];
                msgs.extend(outbox.session.cancel_piece(index));

                self.send_locked(&mut outbox, msgs).await?;

                if outbox.session.assigned.remove(&index) {
                    self.ask_for_pieces(&mut outbox.session)?;
                }
            }
            PeerMsg::PieceRejected(index) => {
                warn!("{remote} piece {index} failed the hash check");
                let cancels = outbox.session.cancel_piece(index);
                self.send_locked(&mut outbox, cancels).await?;

                if outbox.session.assigned.remove(&index) {
                    self.ask_for_pieces(&mut outbox.session)?;
                }
            }
            // handled by the control loop
            PeerMsg::FinishConnection => {}
        }

        Ok(())
    }

    /// Close the socket and the channel, and give every piece that was
    /// assigned to this connection back to the torrent.
    async fn teardown(&self, rx: &mut mpsc::UnboundedReceiver<PeerMsg>) {
        let mut outbox = self.outbox.lock().await;

        if let Err(e) = timeout(Duration::from_secs(1), outbox.sink.close()).await {
            debug!("{} timed out closing the socket: {e}", self.peer);
        }

        rx.close();

        let mut was_downloading: Vec<usize> = outbox.session.assigned.drain().collect();

        while let Ok(msg) = rx.try_recv() {
            if let PeerMsg::SupplyPieces { pieces, .. } = msg {
                was_downloading.extend(pieces);
            }
        }

        was_downloading.sort_unstable();
        was_downloading.dedup();

        let _ = self.ctx.tx.send(TorrentMsg::CloseConnection {
            peer: self.peer.clone(),
            conn: self.conn,
            was_downloading,
        });
    }
}
