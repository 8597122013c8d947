#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use avalanche::{
    metainfo::{Info, Layout, MetaInfo},
    peer::PeerId,
    tcp_wire::BLOCK_LEN,
    torrent::{InfoHash, TorrentCtx, TorrentMsg},
};
use tokio::sync::mpsc;

pub const PIECE_LEN: u32 = BLOCK_LEN * 2;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .compact()
        .without_time()
        .with_test_writer()
        .try_init();
}

pub fn data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

pub fn meta_info(data: &[u8], announce_list: Vec<Vec<String>>) -> MetaInfo {
    MetaInfo {
        announce_list,
        info: Info {
            info_hash: InfoHash([9; 20]),
            name: "data.bin".to_owned(),
            piece_length: PIECE_LEN,
            pieces: Info::hash_pieces(data, PIECE_LEN),
            layout: Layout::Single { length: data.len() as u64 },
        },
    }
}

/// Context of a torrent that is not running, messages of its peers are
/// received by the returned receiver.
pub fn torrent_ctx(data: &[u8]) -> (Arc<TorrentCtx>, mpsc::UnboundedReceiver<TorrentMsg>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let info = Arc::new(meta_info(data, Vec::new()).info);

    let ctx = Arc::new(TorrentCtx {
        info_hash: info.info_hash,
        local_peer_id: PeerId::gen(),
        info,
        tx,
        connect_timeout: Duration::from_secs(2),
        peer_timeout: Duration::from_secs(5),
    });

    (ctx, rx)
}
