//! Core of a BitTorrent client.
//!
//! The crate is made of a few actors talking through channels:
//!
//! - [`tracker::Tracker`] announces to HTTP trackers and feeds peers to the
//!   torrent.
//! - [`torrent::Torrent`] owns the swarm state: which pieces we have, which
//!   are being downloaded and by whom.
//! - [`peer::PeerConnection`] owns one TCP connection to a remote peer.
//!
//! Pieces are persisted by [`disk::PieceStore`], and every byte that goes over
//! the wire is handled by the codecs in [`tcp_wire`].
pub mod bitfield;
pub mod config;
pub mod disk;
pub mod error;
pub mod listener;
pub mod metainfo;
pub mod peer;
pub mod tcp_wire;
pub mod torrent;
pub mod tracker;
