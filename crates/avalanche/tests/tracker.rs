use std::time::Duration;

use avalanche::{
    error::Error,
    peer::PeerId,
    torrent::{InfoHash, Stats, TorrentMsg},
    tracker::{event::Event, Tracker, TrackerMsg},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
    spawn,
    sync::mpsc,
    time::timeout,
};

mod common;

const FAILURE: &[u8] = b"d14:failure reason4:nopee";

fn compact_ok() -> Vec<u8> {
    let mut body = b"d8:intervali900e5:peers6:".to_vec();
    body.extend_from_slice(&[127, 0, 0, 1, 0x1a, 0xe1]);
    body.push(b'e');
    body
}

/// A tracker that answers every announce with `body`, the request paths are
/// sent to the returned receiver.
async fn mock_tracker(body: Vec<u8>) -> Result<(String, mpsc::UnboundedReceiver<String>), Error> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("http://{}/announce", listener.local_addr()?);
    let (tx, rx) = mpsc::unbounded_channel();

    spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut req = Vec::new();
            let mut buf = [0u8; 1024];
            while !req.windows(4).any(|w| w == b"\r\n\r\n") {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => req.extend_from_slice(&buf[..n]),
                }
            }

            let head = String::from_utf8_lossy(&req);
            let path = head.split_whitespace().nth(1).unwrap_or_default().to_owned();
            let _ = tx.send(path);

            let mut res = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            )
            .into_bytes();
            res.extend_from_slice(&body);
            let _ = socket.write_all(&res).await;
            let _ = socket.shutdown().await;
        }
    });

    Ok((url, rx))
}

fn tracker(
    announce_list: Vec<Vec<String>>,
) -> (Tracker, mpsc::UnboundedReceiver<TorrentMsg>, mpsc::UnboundedSender<TrackerMsg>) {
    let (torrent_tx, torrent_rx) = mpsc::unbounded_channel();
    let (tx, rx) = mpsc::unbounded_channel();
    let stats = Stats { left: 1000, ..Default::default() };

    let tracker = Tracker::new(
        announce_list,
        InfoHash([9; 20]),
        PeerId::gen(),
        6881,
        stats,
        Duration::from_secs(5),
        torrent_tx,
        rx,
    )
    .expect("http client");

    (tracker, torrent_rx, tx)
}

#[tokio::test]
async fn failure_reason_tries_the_next_tracker() -> Result<(), Error> {
    common::init_tracing();

    let (bad, mut bad_rx) = mock_tracker(FAILURE.to_vec()).await?;
    let (good, mut good_rx) = mock_tracker(compact_ok()).await?;

    let (mut tracker, ..) = tracker(vec![vec![bad, good.clone()]]);

    let res = tracker.announce(Event::Started).await?;

    assert_eq!(res.interval, Some(900));
    assert_eq!(res.peers()?.len(), 1);
    assert_eq!(res.peers()?[0].addr.to_string(), "127.0.0.1:6881");
    assert_eq!(tracker.used_tracker(), Some(good.as_str()));

    let path = bad_rx.recv().await.unwrap_or_default();
    assert!(path.contains("event=started"));
    let path = good_rx.recv().await.unwrap_or_default();
    assert!(path.contains("info_hash=%09%09"));
    assert!(path.contains("compact=1"));
    assert!(path.contains("left=1000"));

    Ok(())
}

#[tokio::test]
async fn every_tracker_failing_is_retried() -> Result<(), Error> {
    common::init_tracing();

    let (a, mut a_rx) = mock_tracker(FAILURE.to_vec()).await?;
    let (b, mut b_rx) = mock_tracker(FAILURE.to_vec()).await?;

    let (mut tracker, ..) = tracker(vec![vec![a], vec!["udp://ignored:80".to_owned(), b]]);

    assert!(matches!(
        tracker.announce(Event::Started).await,
        Err(Error::TrackerNoHosts)
    ));
    assert!(matches!(
        tracker.announce(Event::Started).await,
        Err(Error::TrackerNoHosts)
    ));
    assert_eq!(tracker.used_tracker(), None);

    for rx in [&mut a_rx, &mut b_rx] {
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
    }

    Ok(())
}

#[tokio::test]
async fn missing_interval_on_first_response() -> Result<(), Error> {
    common::init_tracing();

    let (url, _rx) = mock_tracker(b"d5:peers0:e".to_vec()).await?;
    let (mut tracker, ..) = tracker(vec![vec![url]]);

    assert!(matches!(
        tracker.announce(Event::Started).await,
        Err(Error::TrackerNoHosts)
    ));

    Ok(())
}

#[tokio::test]
async fn run_sends_peers_and_stops() -> Result<(), Error> {
    common::init_tracing();

    let (url, mut paths) = mock_tracker(compact_ok()).await?;
    let (tracker, mut torrent_rx, tx) = tracker(vec![vec![url]]);

    let handle = spawn(tracker.run());

    let msg = timeout(Duration::from_secs(5), torrent_rx.recv()).await;
    let Ok(Some(TorrentMsg::AddPeers(peers))) = msg else {
        panic!("expected peers");
    };
    assert_eq!(peers.len(), 1);
    assert!(paths.recv().await.unwrap_or_default().contains("event=started"));

    tx.send(TrackerMsg::Stop)?;
    timeout(Duration::from_secs(5), handle)
        .await
        .expect("tracker did not stop")
        .expect("tracker panicked")?;

    assert!(paths.recv().await.unwrap_or_default().contains("event=stopped"));

    Ok(())
}
