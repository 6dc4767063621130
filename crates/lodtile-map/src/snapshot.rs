use crate::{tile::Tile, tile_pos::TilePos};

use either::Either;
use lz4_flex::frame::{FrameDecoder, FrameEncoder};
use std::io::{self, Read, Write};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot compression failed: {0}")]
    Compression(#[from] io::Error),
    #[error("decompressed {actual} bytes but the snapshot recorded {expected}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("unexpected end of input")]
    Truncated,
    #[error("malformed snapshot: {0}")]
    Malformed(&'static str),
}

/// LZ4-compressed tile bytes plus the size they decompress to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CompressedBytes {
    pub bytes: Arc<[u8]>,
    pub uncompressed_len: usize,
}

impl CompressedBytes {
    pub fn compress(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let mut encoder = FrameEncoder::new(Vec::new());
        encoder.write_all(bytes)?;
        let compressed = encoder
            .finish()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(Self {
            bytes: compressed.into(),
            uncompressed_len: bytes.len(),
        })
    }

    /// Fails with [`SnapshotError::SizeMismatch`] rather than returning truncated or oversized output.
    pub fn decompress(&self) -> Result<Vec<u8>, SnapshotError> {
        let mut out = Vec::with_capacity(self.uncompressed_len);
        // Read one byte past the recorded size so oversized output is detected without decoding all of it.
        let mut decoder = FrameDecoder::new(&self.bytes[..]).take(self.uncompressed_len as u64 + 1);
        decoder.read_to_end(&mut out)?;
        if out.len() != self.uncompressed_len {
            return Err(SnapshotError::SizeMismatch {
                expected: self.uncompressed_len,
                actual: out.len(),
            });
        }
        Ok(out)
    }
}

/// An immutable, cheaply cloned copy of a tile's encoded contents at some point in time.
///
/// `data` is `None` when there is no tile at `pos` (the timestamp still says as of when that was known). Otherwise it holds the
/// tile's binary encoding, either as-is or LZ4-compressed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TileSnapshot {
    pos: TilePos,
    timestamp: i64,
    data: Option<Either<Arc<[u8]>, CompressedBytes>>,
}

impl TileSnapshot {
    pub fn new(pos: TilePos, timestamp: i64, tile: Option<&Tile>) -> Self {
        let data = tile.map(|tile| {
            let mut bytes = Vec::new();
            tile.write(&mut bytes);
            Either::Left(bytes.into())
        });
        Self { pos, timestamp, data }
    }

    /// A snapshot confirming that there is no tile at `pos` as of `timestamp`.
    pub fn empty(pos: TilePos, timestamp: i64) -> Self {
        Self {
            pos,
            timestamp,
            data: None,
        }
    }

    pub fn from_bytes(pos: TilePos, timestamp: i64, bytes: Option<Vec<u8>>) -> Self {
        Self {
            pos,
            timestamp,
            data: bytes.map(|b| Either::Left(b.into())),
        }
    }

    #[inline]
    pub fn pos(&self) -> TilePos {
        self.pos
    }

    #[inline]
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// `true` iff there is no tile at this position.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_none()
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self.data, Some(Either::Right(_)))
    }

    /// The uncompressed tile encoding, if there is a tile.
    pub fn data(&self) -> Result<Option<Arc<[u8]>>, SnapshotError> {
        match &self.data {
            None => Ok(None),
            Some(Either::Left(bytes)) => Ok(Some(bytes.clone())),
            Some(Either::Right(compressed)) => Ok(Some(compressed.decompress()?.into())),
        }
    }

    /// Size of the uncompressed tile encoding.
    pub fn data_size(&self) -> usize {
        match &self.data {
            None => 0,
            Some(Either::Left(bytes)) => bytes.len(),
            Some(Either::Right(compressed)) => compressed.uncompressed_len,
        }
    }

    /// Size of the bytes actually held by this snapshot.
    pub fn stored_size(&self) -> usize {
        match &self.data {
            None => 0,
            Some(Either::Left(bytes)) => bytes.len(),
            Some(Either::Right(compressed)) => compressed.bytes.len(),
        }
    }

    /// Decodes the snapshot into `tile`. Returns `false` (leaving `tile` reset) if there is no tile at this position.
    pub fn load_tile(&self, tile: &mut Tile) -> Result<bool, SnapshotError> {
        match self.data()? {
            None => {
                tile.reset();
                Ok(false)
            }
            Some(bytes) => {
                tile.read(&bytes)?;
                Ok(true)
            }
        }
    }

    pub fn compressed(&self) -> Result<Self, SnapshotError> {
        let data = match &self.data {
            Some(Either::Left(bytes)) => Some(Either::Right(CompressedBytes::compress(bytes)?)),
            other => other.clone(),
        };
        Ok(Self {
            pos: self.pos,
            timestamp: self.timestamp,
            data,
        })
    }

    pub fn uncompressed(&self) -> Result<Self, SnapshotError> {
        let data = match &self.data {
            Some(Either::Right(compressed)) => Some(Either::Left(compressed.decompress()?.into())),
            other => other.clone(),
        };
        Ok(Self {
            pos: self.pos,
            timestamp: self.timestamp,
            data,
        })
    }

    /// Appends `timestamp` and the uncompressed data to `out`, each length-prefixed with zig-zag varints. A length of `-1`
    /// means there is no tile.
    pub fn write_for_network(&self, out: &mut Vec<u8>) -> Result<(), SnapshotError> {
        write_varint_zigzag(out, self.timestamp);
        match self.data()? {
            None => write_varint_zigzag(out, -1),
            Some(bytes) => {
                write_varint_zigzag(out, bytes.len() as i64);
                out.extend_from_slice(&bytes);
            }
        }
        Ok(())
    }

    /// Decodes a snapshot written by [`write_for_network`](Self::write_for_network). Returns the snapshot and the number of
    /// bytes consumed.
    pub fn read_from_network(pos: TilePos, bytes: &[u8]) -> Result<(Self, usize), SnapshotError> {
        let mut cursor = 0;
        let timestamp = read_varint_zigzag(bytes, &mut cursor)?;
        let len = read_varint_zigzag(bytes, &mut cursor)?;
        let data = match len {
            -1 => None,
            len if len < -1 => return Err(SnapshotError::Malformed("negative length")),
            len => {
                let len = usize::try_from(len).map_err(|_| SnapshotError::Malformed("length overflow"))?;
                let end = cursor.checked_add(len).ok_or(SnapshotError::Truncated)?;
                let slice = bytes.get(cursor..end).ok_or(SnapshotError::Truncated)?;
                cursor = end;
                Some(Either::Left(Arc::from(slice)))
            }
        };
        Ok((Self { pos, timestamp, data }, cursor))
    }
}

fn write_varint_zigzag(out: &mut Vec<u8>, value: i64) {
    let mut v = ((value << 1) ^ (value >> 63)) as u64;
    loop {
        if v < 0x80 {
            out.push(v as u8);
            return;
        }
        out.push((v as u8 & 0x7F) | 0x80);
        v >>= 7;
    }
}

fn read_varint_zigzag(bytes: &[u8], cursor: &mut usize) -> Result<i64, SnapshotError> {
    let mut v = 0u64;
    for shift in (0..64).step_by(7) {
        let b = *bytes.get(*cursor).ok_or(SnapshotError::Truncated)?;
        *cursor += 1;
        v |= ((b & 0x7F) as u64) << shift;
        if b & 0x80 == 0 {
            return Ok((v >> 1) as i64 ^ -((v & 1) as i64));
        }
    }
    Err(SnapshotError::Malformed("varint too long"))
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝

#[cfg(test)]
mod test {
    use super::*;
    use crate::tile::{edge_bits, TileData, EDGE_DIR_POSITIVE};

    fn surface_tile() -> Tile {
        let mut tile = Tile::new();
        for x in 0..16 {
            for z in 0..16 {
                tile.set(
                    x,
                    7,
                    z,
                    &TileData {
                        edges: edge_bits(EDGE_DIR_POSITIVE, 1),
                        states: [0, 1 + (x ^ z) % 3, 0],
                        light: 0xF0,
                        ..Default::default()
                    },
                );
            }
        }
        tile
    }

    #[test]
    fn compression_round_trip_is_bit_identical() {
        let pos = TilePos::new(0, 1, 2, 3);
        let snapshot = TileSnapshot::new(pos, 42, Some(&surface_tile()));
        let compressed = snapshot.compressed().unwrap();
        assert!(compressed.is_compressed());
        assert!(compressed.stored_size() < compressed.data_size());

        let uncompressed = compressed.uncompressed().unwrap();
        assert_eq!(uncompressed, snapshot);
        assert_eq!(uncompressed.compressed().unwrap(), compressed);

        let mut tile = Tile::new();
        assert!(compressed.load_tile(&mut tile).unwrap());
        assert_eq!(tile, surface_tile());
    }

    #[test]
    fn size_mismatch_is_an_error() {
        let mut compressed = CompressedBytes::compress(&[7; 100]).unwrap();
        compressed.uncompressed_len = 99;
        assert!(matches!(
            compressed.decompress(),
            Err(SnapshotError::SizeMismatch { expected: 99, actual: 100 })
        ));
        compressed.uncompressed_len = 101;
        assert!(matches!(
            compressed.decompress(),
            Err(SnapshotError::SizeMismatch { expected: 101, actual: 100 })
        ));
    }

    #[test]
    fn network_round_trip_distinguishes_absent_and_empty() {
        let pos = TilePos::new(2, -1, 0, 1);
        for snapshot in [
            TileSnapshot::empty(pos, -5),
            TileSnapshot::new(pos, 0, Some(&Tile::new())),
            TileSnapshot::new(pos, i64::MAX, Some(&surface_tile())),
            TileSnapshot::new(pos, i64::MIN, Some(&surface_tile())).compressed().unwrap(),
        ] {
            let mut out = vec![0xAA];
            snapshot.write_for_network(&mut out).unwrap();
            let (decoded, consumed) = TileSnapshot::read_from_network(pos, &out[1..]).unwrap();
            assert_eq!(consumed, out.len() - 1);
            assert_eq!(decoded.timestamp(), snapshot.timestamp());
            assert_eq!(decoded.is_empty(), snapshot.is_empty());
            assert_eq!(decoded.data().unwrap(), snapshot.data().unwrap());
        }
    }

    #[test]
    fn absent_length_is_minus_one() {
        let mut out = Vec::new();
        TileSnapshot::empty(TilePos::new(0, 0, 0, 0), 3).write_for_network(&mut out).unwrap();
        // zig-zag(3) = 6, zig-zag(-1) = 1
        assert_eq!(out, vec![6, 1]);
    }

    #[test]
    fn truncated_network_input() {
        let mut out = Vec::new();
        TileSnapshot::new(TilePos::new(0, 0, 0, 0), 1, Some(&surface_tile()))
            .write_for_network(&mut out)
            .unwrap();
        out.truncate(out.len() - 1);
        assert!(matches!(
            TileSnapshot::read_from_network(TilePos::new(0, 0, 0, 0), &out),
            Err(SnapshotError::Truncated)
        ));
    }

    #[test]
    fn varints() {
        for v in [0, 1, -1, 63, -64, 64, 1 << 40, i64::MAX, i64::MIN] {
            let mut out = Vec::new();
            write_varint_zigzag(&mut out, v);
            let mut cursor = 0;
            assert_eq!(read_varint_zigzag(&out, &mut cursor).unwrap(), v);
            assert_eq!(cursor, out.len());
        }
    }
}
