//! A tracker is a server that manages peers and stats of multiple torrents.
//!
//! The [`Tracker`] announces to the trackers of one torrent over HTTP,
//! forwards the peers it gets to the torrent and keeps the announce timer.
pub mod announce;
pub mod event;

use std::time::Duration;

use reqwest::Client;
use tokio::{
    select,
    sync::mpsc,
    time::{sleep_until, Instant},
};
use tracing::{debug, info, warn};

use self::{
    announce::{Request, Response},
    event::Event,
};
use crate::{
    error::Error,
    peer::PeerId,
    torrent::{InfoHash, Stats, TorrentMsg},
};
use bendy::decoding::FromBencode;

/// Used until a tracker sends its own `interval`.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Used while the swarm is small until a tracker sends its own
/// `min interval`.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(3 * 60);

/// With this many peers or less, and the download incomplete, announces
/// happen every `min interval`.
pub const FEW_PEERS: usize = 20;

#[derive(Debug)]
pub enum TrackerMsg {
    /// Latest stats of the torrent, used in announces and to adapt the
    /// announce interval.
    Stats(Stats),
    /// Announce `stopped` and return from `run`.
    Stop,
}

/// When to announce next.
///
/// Every announce is scheduled relative to the last one, switching the
/// interval never makes an announce happen earlier than the tracker allows.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    /// Last `interval` sent by a tracker.
    pub interval: Option<Duration>,
    /// Last `min interval` sent by a tracker.
    pub min_interval: Option<Duration>,
    pub last_announce: Option<Instant>,
    using_min: bool,
}

impl Schedule {
    /// The interval currently in use.
    pub fn current(&self) -> Duration {
        if self.using_min {
            self.min_interval.unwrap_or(DEFAULT_MIN_INTERVAL)
        } else {
            self.interval.unwrap_or(DEFAULT_INTERVAL)
        }
    }

    pub fn using_min(&self) -> bool {
        self.using_min
    }

    /// Pick the interval for the size of the swarm. Returns true if it
    /// changed.
    pub fn reconfigure(&mut self, peers: usize, complete: bool) -> bool {
        let use_min = peers <= FEW_PEERS && !complete;
        let changed = use_min != self.using_min;
        self.using_min = use_min;
        changed
    }

    /// Update the intervals with the ones of a successful response.
    pub fn update(&mut self, res: &Response) {
        if let Some(interval) = res.interval() {
            self.interval = Some(interval);
        }
        if let Some(min) = res.min_interval() {
            self.min_interval = Some(min);
        }
    }

    /// The first announce happens right away.
    pub fn next_announce(&self) -> Instant {
        match self.last_announce {
            Some(last) => last + self.current(),
            None => Instant::now(),
        }
    }
}

pub struct Tracker {
    client: Client,
    /// Tiers of announce urls, as in the torrent.
    announce_list: Vec<Vec<String>>,
    /// The url that answered the last announce, tried first.
    used_tracker: Option<String>,
    tracker_id: Option<String>,
    info_hash: InfoHash,
    peer_id: PeerId,
    port: u16,
    stats: Stats,
    sent_started: bool,
    sent_completed: bool,
    pub schedule: Schedule,
    torrent_tx: mpsc::UnboundedSender<TorrentMsg>,
    rx: mpsc::UnboundedReceiver<TrackerMsg>,
}

impl Tracker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        announce_list: Vec<Vec<String>>,
        info_hash: InfoHash,
        peer_id: PeerId,
        port: u16,
        stats: Stats,
        timeout: Duration,
        torrent_tx: mpsc::UnboundedSender<TorrentMsg>,
        rx: mpsc::UnboundedReceiver<TrackerMsg>,
    ) -> Result<Self, Error> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            announce_list,
            used_tracker: None,
            tracker_id: None,
            info_hash,
            peer_id,
            port,
            stats,
            sent_started: false,
            // a torrent that starts complete never sends `completed`
            sent_completed: stats.is_complete(),
            schedule: Schedule::default(),
            torrent_tx,
            rx,
        })
    }

    pub fn used_tracker(&self) -> Option<&str> {
        self.used_tracker.as_deref()
    }

    #[tracing::instrument(skip_all, name = "tracker")]
    pub async fn run(mut self) -> Result<(), Error> {
        debug!("running tracker");

        let mut next = self.schedule.next_announce();

        loop {
            select! {
                _ = sleep_until(next) => {
                    self.poll().await;
                    next = self.schedule.next_announce();
                }
                msg = self.rx.recv() => {
                    match msg {
                        Some(TrackerMsg::Stats(stats)) => {
                            self.stats = stats;
                            if self.schedule.reconfigure(stats.peers, stats.is_complete()) {
                                debug!(
                                    "{} peers, using min interval: {}",
                                    stats.peers,
                                    self.schedule.using_min()
                                );
                                next = self.schedule.next_announce();
                            }
                        }
                        Some(TrackerMsg::Stop) | None => {
                            self.stop().await;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// One scheduled announce, errors are logged and the next one happens
    /// after the current interval.
    async fn poll(&mut self) {
        let event = if !self.sent_started {
            Event::Started
        } else if !self.sent_completed && self.stats.is_complete() {
            Event::Completed
        } else {
            Event::None
        };

        self.schedule.last_announce = Some(Instant::now());

        let res = match self.announce(event).await {
            Ok(res) => res,
            Err(e) => {
                warn!("announce failed: {e}");
                return;
            }
        };

        match event {
            Event::Started => self.sent_started = true,
            Event::Completed => self.sent_completed = true,
            _ => {}
        }

        match res.peers() {
            Ok(peers) if !peers.is_empty() => {
                info!("tracker sent {} peers", peers.len());
                let _ = self.torrent_tx.send(TorrentMsg::AddPeers(peers));
            }
            Ok(_) => {}
            Err(e) => warn!("{e}"),
        }

        self.schedule.reconfigure(self.stats.peers, self.stats.is_complete());
    }

    /// Announce to the last tracker that worked, and then to every tracker
    /// in order, until one of them answers.
    pub async fn announce(&mut self, event: Event) -> Result<Response, Error> {
        let mut urls: Vec<String> = self.used_tracker.iter().cloned().collect();
        for url in self.announce_list.iter().flatten() {
            if !urls.contains(url) {
                urls.push(url.clone());
            }
        }

        for url in urls {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                debug!("skipping tracker {url}");
                continue;
            }
            match self.announce_to(&url, event).await {
                Ok(res) => {
                    debug!("{url} answered {event:?}");
                    self.schedule.update(&res);
                    if let Some(id) = &res.tracker_id {
                        self.tracker_id = Some(id.clone());
                    }
                    if let Some(msg) = &res.warning_message {
                        warn!("{url} warning: {msg}");
                    }
                    self.used_tracker = Some(url);
                    return Ok(res);
                }
                Err(e) => warn!("{url} {e}"),
            }
        }

        Err(Error::TrackerNoHosts)
    }

    async fn announce_to(&self, url: &str, event: Event) -> Result<Response, Error> {
        let req = Request {
            info_hash: &self.info_hash,
            peer_id: &self.peer_id,
            port: self.port,
            downloaded: self.stats.downloaded,
            uploaded: self.stats.uploaded,
            left: self.stats.left,
            event,
            tracker_id: self.tracker_id.as_deref(),
        };

        let res = self.client.get(req.url(url)).send().await?;

        if !res.status().is_success() {
            return Err(Error::TrackerStatus(res.status().as_u16()));
        }

        let bytes = res.bytes().await?;
        let mut res = Response::from_bencode(&bytes)?;

        if let Some(reason) = res.failure_reason.take() {
            return Err(Error::TrackerFailure(reason));
        }

        if res.interval.is_none() && self.schedule.interval.is_none() {
            return Err(Error::TrackerMissingInterval);
        }

        Ok(res)
    }

    /// Tell the tracker that answered last that we are leaving.
    async fn stop(&mut self) {
        let Some(url) = self.used_tracker.clone() else {
            return;
        };
        match self.announce_to(&url, Event::Stopped).await {
            Ok(_) => info!("announced stopped to {url}"),
            Err(e) => warn!("stopped announce to {url} failed: {e}"),
        }
    }
}
