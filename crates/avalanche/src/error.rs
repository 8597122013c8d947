use std::io;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::{peer::PeerMsg, torrent::TorrentMsg, tracker::TrackerMsg};

impl From<bendy::decoding::Error> for Error {
    fn from(value: bendy::decoding::Error) -> Self {
        Self::TrackerResponse(value.to_string())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("The handshake has {0} bytes, expected 68")]
    HandshakeLength(usize),

    #[error("The handshake declared a protocol name of {0} bytes")]
    HandshakePstrLength(u8),

    #[error("The handshake protocol name is not `BitTorrent protocol`")]
    HandshakePstr,

    #[error("The handshake info_hash does not match this torrent")]
    HandshakeInfoHash,

    #[error("The handshake peer_id does not match the one from the tracker")]
    HandshakePeerId,

    #[error("The peer closed the socket before sending a handshake")]
    NoHandshake,

    #[error("The peer declared a message of {0} bytes, which is too large")]
    MessageTooLarge(u32),

    #[error("The peer took too long to respond")]
    Timeout,

    #[error("The peer closed the socket")]
    PeerClosedSocket,

    #[error("HTTP request to the tracker failed: {0}")]
    TrackerHttp(#[from] reqwest::Error),

    #[error("The tracker responded with status {0}")]
    TrackerStatus(u16),

    #[error("The tracker refused the announce: {0}")]
    TrackerFailure(String),

    #[error("The tracker never sent an announce interval")]
    TrackerMissingInterval,

    #[error("The tracker response is not valid bencode: {0}")]
    TrackerResponse(String),

    #[error("The peer list returned by the announce request is not valid")]
    TrackerCompactPeerList,

    #[error("No tracker answered the announce")]
    TrackerNoHosts,

    #[error(
        "Could not open the file `{0}`. Please make sure the program has \
         permission to access it"
    )]
    FileOpenError(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("The piece index {0} is out of range for this torrent")]
    PieceOutOfRange(usize),

    #[error("The piece should have {expected} bytes, but it has {got}")]
    PieceLength { expected: usize, got: usize },

    #[error("The torrent descriptor is not valid: {0}")]
    InvalidInfo(&'static str),

    #[error("Error while trying to load configuration: `{0}`")]
    Config(#[from] config::ConfigError),

    #[error("Could not receive message from oneshot")]
    ReceiveErrorOneshot(#[from] oneshot::error::RecvError),

    #[error("Could not send message to Peer")]
    SendErrorPeer(#[from] mpsc::error::SendError<PeerMsg>),

    #[error("Could not send message to Torrent")]
    SendErrorTorrent(#[from] mpsc::error::SendError<TorrentMsg>),

    #[error("Could not send message to Tracker")]
    SendErrorTracker(#[from] mpsc::error::SendError<TrackerMsg>),
}
