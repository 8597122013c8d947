//! Piece storage of a single torrent.
//!
//! The files of a torrent are treated as one contiguous buffer: piece `i`
//! starts at `i * piece_length` of the concatenation of all files, in the
//! order of the descriptor. Reads and writes that cross the end of a file
//! continue at the start of the next one.
use std::{
    io::SeekFrom,
    path::{Path, PathBuf},
    sync::Arc,
};

use sha1_smol::Sha1;
use tokio::{
    fs::{create_dir_all, File, OpenOptions},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tracing::{debug, info};

use crate::{error::Error, metainfo::Info, tcp_wire::BlockInfo};

#[derive(Debug)]
struct StoreFile {
    path: PathBuf,
    file: File,
    /// Offset of the first byte of this file in the torrent.
    start: u64,
    length: u64,
}

#[derive(Debug)]
pub struct PieceStore {
    info: Arc<Info>,
    files: Vec<StoreFile>,
}

impl PieceStore {
    /// Open or create every file of the torrent under `download_dir`, each
    /// one with exactly its declared length.
    #[tracing::instrument(skip_all, name = "disk::new")]
    pub async fn new(info: Arc<Info>, download_dir: impl AsRef<Path>) -> Result<Self, Error> {
        info.validate()?;

        let mut files = Vec::new();
        let mut start = 0;

        for (path, length) in info.files() {
            let path = download_dir.as_ref().join(path);

            if let Some(parent) = path.parent() {
                create_dir_all(parent)
                    .await
                    .map_err(|_| Error::FileOpenError(parent.display().to_string()))?;
            }

            let file = Self::open_file(&path).await?;
            file.set_len(length)
                .await
                .map_err(|_| Error::FileOpenError(path.display().to_string()))?;

            debug!("allocated {path:?} with {length} bytes");

            files.push(StoreFile { path, file, start, length });
            start += length;
        }

        info!("opened {} files for {}", files.len(), info.name);

        Ok(Self { info, files })
    }

    pub async fn open_file(path: impl AsRef<Path>) -> Result<File, Error> {
        let path = path.as_ref();

        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .await
            .map_err(|_| Error::FileOpenError(path.display().to_string()))
    }

    pub fn piece_len(&self, index: usize) -> Result<u32, Error> {
        self.info.piece_len(index)
    }

    /// Persist a verified piece.
    pub async fn store_piece(&mut self, index: usize, piece: &[u8]) -> Result<(), Error> {
        let expected = self.piece_len(index)? as usize;
        if piece.len() != expected {
            return Err(Error::PieceLength { expected, got: piece.len() });
        }
        let offset = index as u64 * self.info.piece_length as u64;
        self.write_at(offset, piece).await
    }

    pub async fn get_piece(&mut self, index: usize) -> Result<Vec<u8>, Error> {
        let len = self.piece_len(index)?;
        let mut buf = vec![0u8; len as usize];
        let offset = index as u64 * self.info.piece_length as u64;
        self.read_at(offset, &mut buf).await?;
        Ok(buf)
    }

    /// Read the bytes asked by a `Request`, which must be inside its piece.
    pub async fn read_chunk(&mut self, block_info: &BlockInfo) -> Result<Vec<u8>, Error> {
        let index = block_info.index as usize;
        let piece_len = self.piece_len(index)?;

        let end = block_info.begin as u64 + block_info.len as u64;
        if end > piece_len as u64 {
            return Err(Error::PieceLength {
                expected: piece_len as usize,
                got: end as usize,
            });
        }

        let mut buf = vec![0u8; block_info.len as usize];
        let offset = index as u64 * self.info.piece_length as u64 + block_info.begin as u64;
        self.read_at(offset, &mut buf).await?;
        Ok(buf)
    }

    /// If the bytes on disk for `index` already match its hash.
    pub async fn has_piece(&mut self, index: usize) -> Result<bool, Error> {
        let piece = self.get_piece(index).await?;
        let hash = Sha1::from(&piece).digest().bytes();
        Ok(self.info.pieces.get(index) == Some(&hash))
    }

    async fn write_at(&mut self, offset: u64, mut data: &[u8]) -> Result<(), Error> {
        let mut pos = offset;

        for f in self.files.iter_mut() {
            if data.is_empty() {
                break;
            }
            if pos >= f.start + f.length {
                continue;
            }
            let n = ((f.start + f.length - pos) as usize).min(data.len());

            f.file.seek(SeekFrom::Start(pos - f.start)).await?;
            f.file.write_all(&data[..n]).await?;
            f.file.flush().await?;

            debug!("wrote {n} bytes to {:?}", f.path);

            data = &data[n..];
            pos += n as u64;
        }

        Ok(())
    }

    async fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), Error> {
        let mut pos = offset;
        let mut filled = 0;

        for f in self.files.iter_mut() {
            if filled == buf.len() {
                break;
            }
            if pos >= f.start + f.length {
                continue;
            }
            let n = ((f.start + f.length - pos) as usize).min(buf.len() - filled);

            f.file.seek(SeekFrom::Start(pos - f.start)).await?;
            f.file.read_exact(&mut buf[filled..filled + n]).await?;

            filled += n;
            pos += n as u64;
        }

        Ok(())
    }
}
