//! Accepts connections from other peers and hands them to their torrent.
use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures::StreamExt;
use hashbrown::HashMap;
use tokio::{
    net::{TcpListener, TcpStream, ToSocketAddrs},
    spawn,
    sync::mpsc,
    time::timeout,
};
use tokio_util::codec::Framed;
use tracing::{debug, info};

use crate::{
    error::Error,
    tcp_wire::HandshakeCodec,
    torrent::{InfoHash, TorrentMsg},
};

pub struct Listener {
    listener: TcpListener,
    torrents: HashMap<InfoHash, mpsc::UnboundedSender<TorrentMsg>>,
    handshake_timeout: Duration,
}

impl Listener {
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr).await?;

        Ok(Self {
            listener,
            torrents: HashMap::new(),
            handshake_timeout: Duration::from_secs(10),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.listener.local_addr()?)
    }

    pub fn handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }

    /// Connections with `info_hash` in their handshake will be sent to `tx`.
    pub fn add_torrent(&mut self, info_hash: InfoHash, tx: mpsc::UnboundedSender<TorrentMsg>) {
        self.torrents.insert(info_hash, tx);
    }

    /// Accept connections forever.
    #[tracing::instrument(skip_all, name = "listener")]
    pub async fn run(self) -> Result<(), Error> {
        info!("accepting connections on {:?}", self.listener.local_addr());

        let torrents = Arc::new(self.torrents);

        loop {
            let (stream, addr) = self.listener.accept().await?;
            debug!("{addr} inbound connection");

            let torrents = torrents.clone();
            let handshake_timeout = self.handshake_timeout;

            spawn(async move {
                if let Err(e) = route(stream, &torrents, handshake_timeout).await {
                    debug!("{addr} dropped: {e}");
                }
            });
        }
    }
}

/// Read the handshake of the remote and send the connection to the torrent
/// of its info hash.
async fn route(
    stream: TcpStream,
    torrents: &HashMap<InfoHash, mpsc::UnboundedSender<TorrentMsg>>,
    handshake_timeout: Duration,
) -> Result<(), Error> {
    let mut socket = Framed::new(stream, HandshakeCodec);

    let handshake = timeout(handshake_timeout, socket.next())
        .await
        .map_err(|_| Error::Timeout)?
        .ok_or(Error::NoHandshake)??;

    let tx = torrents
        .get(&handshake.info_hash)
        .ok_or(Error::HandshakeInfoHash)?;

    let parts = socket.into_parts();

    tx.send(TorrentMsg::Inbound {
        stream: parts.io,
        buf: parts.read_buf,
        handshake,
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use futures::SinkExt;

    use super::*;
    use crate::{peer::PeerId, tcp_wire::Handshake};

    #[tokio::test]
    async fn routes_by_info_hash() -> Result<(), Error> {
        let mut listener = Listener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        listener.add_torrent(InfoHash([1; 20]), tx);
        spawn(listener.run());

        // unknown torrent, the connection is dropped
        let stream = TcpStream::connect(addr).await?;
        let mut socket = Framed::new(stream, HandshakeCodec);
        socket.send(Handshake::new(InfoHash([2; 20]), PeerId::gen())).await?;
        assert!(socket.next().await.is_none());

        let stream = TcpStream::connect(addr).await?;
        let mut socket = Framed::new(stream, HandshakeCodec);
        let peer_id = PeerId::gen();
        socket.send(Handshake::new(InfoHash([1; 20]), peer_id)).await?;

        let Some(TorrentMsg::Inbound { handshake, .. }) = rx.recv().await else {
            panic!("expected an inbound connection");
        };
        assert_eq!(handshake.peer_id, peer_id);

        Ok(())
    }
}
