//! HTTP announce request and its bencoded response.
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use bendy::{
    decoding::{self, FromBencode, Object, ResultExt},
    encoding::AsString,
};
use tracing::debug;

use super::event::Event;
use crate::{
    error::Error,
    peer::{Peer, PeerId},
    torrent::InfoHash,
};

#[derive(Debug, Clone)]
pub struct Request<'a> {
    pub info_hash: &'a InfoHash,
    pub peer_id: &'a PeerId,
    pub port: u16,
    pub downloaded: u64,
    pub uploaded: u64,
    pub left: u64,
    pub event: Event,
    pub tracker_id: Option<&'a str>,
}

impl Request<'_> {
    /// The full URL of an announce to `announce`.
    pub fn url(&self, announce: &str) -> String {
        let separator = if announce.contains('?') { '&' } else { '?' };

        let mut url = format!(
            "{announce}{separator}info_hash={}&peer_id={}&port={}&downloaded={}&uploaded={}&left={}&compact=1",
            urlencoding::encode_binary(&self.info_hash.0),
            urlencoding::encode_binary(&self.peer_id.0),
            self.port,
            self.downloaded,
            self.uploaded,
            self.left,
        );

        if let Some(event) = self.event.as_str() {
            url.push_str("&event=");
            url.push_str(event);
        }

        if let Some(id) = self.tracker_id {
            url.push_str("&trackerid=");
            url.push_str(&urlencoding::encode(id));
        }

        url
    }
}

/// The peers of a response, trackers send one of two formats.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerList {
    /// BEP 23, 6 bytes per peer.
    Compact(Vec<u8>),
    Dicts(Vec<DictPeer>),
}

impl Default for PeerList {
    fn default() -> Self {
        Self::Compact(Vec::new())
    }
}

/// A peer of the non-compact peer list.
#[derive(Debug, Clone, PartialEq)]
pub struct DictPeer {
    pub ip: Vec<u8>,
    pub port: u16,
    pub id: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    pub failure_reason: Option<String>,
    pub warning_message: Option<String>,
    pub interval: Option<u32>,
    pub min_interval: Option<u32>,
    pub tracker_id: Option<String>,
    pub peers: PeerList,
}

impl Response {
    pub fn interval(&self) -> Option<Duration> {
        self.interval.map(|v| Duration::from_secs(v as u64))
    }

    pub fn min_interval(&self) -> Option<Duration> {
        self.min_interval.map(|v| Duration::from_secs(v as u64))
    }

    /// The peers of the response, in either format.
    pub fn peers(&self) -> Result<Vec<Peer>, Error> {
        match &self.peers {
            PeerList::Compact(buf) => parse_compact_peer_list(buf),
            PeerList::Dicts(dicts) => Ok(dicts.iter().filter_map(DictPeer::to_peer).collect()),
        }
    }
}

impl DictPeer {
    /// `ip` is usually text, but some trackers send the raw octets. Peers
    /// announced with a domain name are skipped.
    fn to_peer(&self) -> Option<Peer> {
        let ip = match std::str::from_utf8(&self.ip).ok().and_then(|s| s.parse().ok()) {
            Some(ip) => ip,
            None => match self.ip.len() {
                4 => IpAddr::from(<[u8; 4]>::try_from(&self.ip[..]).ok()?),
                16 => IpAddr::from(<[u8; 16]>::try_from(&self.ip[..]).ok()?),
                _ => {
                    debug!("skipping peer with ip {:?}", String::from_utf8_lossy(&self.ip));
                    return None;
                }
            },
        };
        let id = self.id.as_deref().and_then(|id| PeerId::try_from(id).ok());
        Some(Peer { addr: SocketAddr::new(ip, self.port), id })
    }
}

/// Support for BEP23
pub fn parse_compact_peer_list(buf: &[u8]) -> Result<Vec<Peer>, Error> {
    // the addresses come in packets of 6 bytes,
    // first 4 for ip and 2 for port
    let chunks = buf.chunks_exact(6);
    if !chunks.remainder().is_empty() {
        return Err(Error::TrackerCompactPeerList);
    }

    let peers: Vec<Peer> = chunks
        .map(|c| {
            let ip = Ipv4Addr::new(c[0], c[1], c[2], c[3]);
            let port = u16::from_be_bytes([c[4], c[5]]);
            Peer::new(SocketAddr::new(ip.into(), port))
        })
        .collect();

    debug!("{} ips of peers", peers.len());

    Ok(peers)
}

impl FromBencode for DictPeer {
    fn decode_bencode_object(object: Object) -> Result<Self, decoding::Error>
    where
        Self: Sized,
    {
        let mut ip = None;
        let mut port = None;
        let mut id = None;

        let mut dict = object.try_into_dictionary()?;
        while let Some(pair) = dict.next_pair()? {
            match pair {
                (b"ip", value) => {
                    ip = AsString::decode_bencode_object(value)
                        .context("ip")
                        .map(|bytes| Some(bytes.0))?;
                }
                (b"port", value) => {
                    port = u16::decode_bencode_object(value)
                        .context("port")
                        .map(Some)?;
                }
                (b"peer id" | b"id", value) => {
                    id = AsString::decode_bencode_object(value)
                        .context("peer id")
                        .map(|bytes| Some(bytes.0))?;
                }
                _ => {}
            }
        }

        let ip = ip.ok_or_else(|| decoding::Error::missing_field("ip"))?;
        let port = port.ok_or_else(|| decoding::Error::missing_field("port"))?;

        Ok(Self { ip, port, id })
    }
}

impl FromBencode for Response {
    fn decode_bencode_object(object: Object) -> Result<Self, decoding::Error>
    where
        Self: Sized,
    {
        let mut res = Response::default();

        let mut dict = object.try_into_dictionary()?;
        while let Some(pair) = dict.next_pair()? {
            match pair {
                (b"failure reason", value) => {
                    res.failure_reason = String::decode_bencode_object(value)
                        .context("failure reason")
                        .map(Some)?;
                }
                (b"warning message", value) => {
                    res.warning_message = String::decode_bencode_object(value)
                        .context("warning message")
                        .map(Some)?;
                }
                (b"interval", value) => {
                    res.interval = u32::decode_bencode_object(value)
                        .context("interval")
                        .map(Some)?;
                }
                (b"min interval", value) => {
                    res.min_interval = u32::decode_bencode_object(value)
                        .context("min interval")
                        .map(Some)?;
                }
                (b"tracker id", value) => {
                    res.tracker_id = String::decode_bencode_object(value)
                        .context("tracker id")
                        .map(Some)?;
                }
                (b"peers", Object::Bytes(bytes)) => {
                    res.peers = PeerList::Compact(bytes.to_vec());
                }
                (b"peers", value) => {
                    res.peers = Vec::<DictPeer>::decode_bencode_object(value)
                        .context("peers")
                        .map(PeerList::Dicts)?;
                }
                _ => {}
            }
        }

        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_url() {
        let info_hash = InfoHash([0xAB; 20]);
        let peer_id = PeerId(*b"-AV0010-abcdefghijkl");
        let mut req = Request {
            info_hash: &info_hash,
            peer_id: &peer_id,
            port: 51413,
            downloaded: 10,
            uploaded: 20,
            left: 30,
            event: Event::Started,
            tracker_id: None,
        };

        let url = req.url("http://tracker.example/announce");
        assert_eq!(
            url,
            format!(
                "http://tracker.example/announce?info_hash={}&peer_id=-AV0010-abcdefghijkl\
                 &port=51413&downloaded=10&uploaded=20&left=30&compact=1&event=started",
                "%AB".repeat(20)
            )
        );

        req.event = Event::None;
        req.tracker_id = Some("x y");
        let url = req.url("http://tracker.example/announce?passkey=1");
        assert!(url.starts_with("http://tracker.example/announce?passkey=1&info_hash="));
        assert!(url.ends_with("&compact=1&trackerid=x%20y"));
    }

    #[test]
    fn compact_response() {
        let body = b"d8:intervali1800e12:min intervali60e5:peers12:\
\x7f\x00\x00\x01\x1a\xe1\x0a\x00\x00\x02\x00\x5010:tracker id3:abce";
        let res = Response::from_bencode(body).unwrap();

        assert_eq!(res.interval(), Some(Duration::from_secs(1800)));
        assert_eq!(res.min_interval(), Some(Duration::from_secs(60)));
        assert_eq!(res.tracker_id.as_deref(), Some("abc"));
        assert_eq!(res.failure_reason, None);

        let peers = res.peers().unwrap();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].addr, "127.0.0.1:6881".parse().unwrap());
        assert_eq!(peers[1].addr, "10.0.0.2:80".parse().unwrap());
    }

    #[test]
    fn dict_response() {
        let body = b"d8:intervali900e5:peersld2:ip9:127.0.0.17:peer id20:-AV0010-abcdefghijkl\
4:porti6881eed2:ip11:example.com4:porti1eed2:ip3:::14:porti2eeee";
        let res = Response::from_bencode(body).unwrap();

        let peers = res.peers().unwrap();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].addr, "127.0.0.1:6881".parse().unwrap());
        assert_eq!(peers[0].id, Some(PeerId(*b"-AV0010-abcdefghijkl")));
        assert_eq!(peers[1].addr, "[::1]:2".parse().unwrap());
        assert_eq!(peers[1].id, None);
    }

    #[test]
    fn failure_response() {
        let body = b"d14:failure reason17:torrent not founde";
        let res = Response::from_bencode(body).unwrap();
        assert_eq!(res.failure_reason.as_deref(), Some("torrent not found"));
        assert_eq!(res.interval, None);
        assert!(res.peers().unwrap().is_empty());
    }

    #[test]
    fn bad_compact_peers() {
        assert!(matches!(
            parse_compact_peer_list(&[1, 2, 3, 4, 5, 6, 7]),
            Err(Error::TrackerCompactPeerList)
        ));
        assert!(Response::from_bencode(b"i3e").is_err());
    }
}
