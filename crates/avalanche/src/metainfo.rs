//! Torrent descriptor, already decoded from a `.torrent` file.
//!
//! Nothing here reads bencode, the engine only needs the fields below and
//! never mutates them.
use std::path::PathBuf;

use sha1_smol::Sha1;

use crate::{error::Error, torrent::InfoHash};

/// A file of a multi file torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    /// Length of the file in bytes.
    pub length: u64,
    /// Path components, relative to the torrent folder.
    pub path: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    /// The torrent is a single file called `Info::name`.
    Single { length: u64 },
    /// The torrent is a folder called `Info::name` with these files in it.
    Multi { files: Vec<File> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Info {
    pub info_hash: InfoHash,
    pub name: String,
    /// Length of every piece, except maybe the last one.
    pub piece_length: u32,
    /// SHA-1 of every piece.
    pub pieces: Vec<[u8; 20]>,
    pub layout: Layout,
}

/// Everything the engine needs to run a torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaInfo {
    /// Tiers of tracker URLs, tried in order.
    pub announce_list: Vec<Vec<String>>,
    pub info: Info,
}

impl Info {
    /// Split the concatenated `pieces` field of the info dict.
    pub fn hashes_from_bytes(bytes: &[u8]) -> Result<Vec<[u8; 20]>, Error> {
        if bytes.len() % 20 != 0 {
            return Err(Error::InvalidInfo("pieces is not a multiple of 20"));
        }
        Ok(bytes
            .chunks_exact(20)
            .map(|c| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(c);
                hash
            })
            .collect())
    }

    /// Hash `data` the way a torrent creator would.
    pub fn hash_pieces(data: &[u8], piece_length: u32) -> Vec<[u8; 20]> {
        data.chunks(piece_length as usize)
            .map(|piece| Sha1::from(piece).digest().bytes())
            .collect()
    }

    pub fn total_size(&self) -> u64 {
        match &self.layout {
            Layout::Single { length } => *length,
            Layout::Multi { files } => files.iter().map(|f| f.length).sum(),
        }
    }

    pub fn pieces_count(&self) -> usize {
        self.pieces.len()
    }

    /// Length of the piece, the last one has the remainder of the torrent.
    pub fn piece_len(&self, index: usize) -> Result<u32, Error> {
        if index >= self.pieces.len() {
            return Err(Error::PieceOutOfRange(index));
        }
        if index + 1 < self.pieces.len() {
            return Ok(self.piece_length);
        }
        let rem = self.total_size() % self.piece_length as u64;
        if rem == 0 {
            Ok(self.piece_length)
        } else {
            Ok(rem as u32)
        }
    }

    /// Files in the order in which their bytes appear in the torrent, with
    /// paths relative to the download dir.
    pub fn files(&self) -> Vec<(PathBuf, u64)> {
        match &self.layout {
            Layout::Single { length } => vec![(PathBuf::from(&self.name), *length)],
            Layout::Multi { files } => files
                .iter()
                .map(|f| {
                    let mut path = PathBuf::from(&self.name);
                    path.extend(&f.path);
                    (path, f.length)
                })
                .collect(),
        }
    }

    /// Check the descriptor is internally consistent.
    pub fn validate(&self) -> Result<(), Error> {
        if self.piece_length == 0 {
            return Err(Error::InvalidInfo("piece length is zero"));
        }
        if let Layout::Multi { files } = &self.layout {
            if files.is_empty() {
                return Err(Error::InvalidInfo("torrent has no files"));
            }
        }
        let expected = self.total_size().div_ceil(self.piece_length as u64);
        if expected != self.pieces.len() as u64 {
            return Err(Error::InvalidInfo("pieces do not cover the files"));
        }
        Ok(())
    }
}
