/// Snapshot providers let the in-memory store survive restarts by persisting
/// a full copy of every table after each commit.
use crate::config::Compression;
use crate::value::Row;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(thiserror::Error, Debug)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("could not replace snapshot file: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),
}

/// Every committed row, grouped by table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    version: u32,
    pub tables: BTreeMap<String, Vec<Row>>,
}

impl Snapshot {
    pub fn new(tables: BTreeMap<String, Vec<Row>>) -> Self {
        Snapshot {
            version: SNAPSHOT_VERSION,
            tables,
        }
    }
}

pub trait SnapshotProvider: Send + Sync {
    /// Whether `store` actually persists anything.
    fn is_persistent(&self) -> bool;

    /// Loads the last stored snapshot, `None` if there is none yet.
    fn load(&self) -> Result<Option<Snapshot>, SnapshotError>;

    /// Stores `snapshot`, returning its uncompressed encoded size.
    fn store(&self, snapshot: &Snapshot) -> Result<usize, SnapshotError>;
}

struct Codec {
    compression: Compression,
    config: bincode::config::Configuration,
}

impl Codec {
    fn new(compression: Compression) -> Self {
        Codec {
            compression,
            // standard defaults to little-endian + varint
            config: bincode::config::standard(),
        }
    }

    fn write<W: Write>(&self, writer: &mut W, data: &Snapshot) -> Result<usize, SnapshotError> {
        let level = match self.compression {
            Compression::None => {
                let size = bincode::serde::encode_into_std_write(data, writer, self.config)?;
                writer.flush()?;
                return Ok(size);
            }
            Compression::Zstd1 => 1,
            Compression::Zstd3 => 3,
        };

        let mut encoder = zstd::stream::write::Encoder::new(writer, level)?;
        let size = bincode::serde::encode_into_std_write(data, &mut encoder, self.config)?;
        encoder.finish()?.flush()?;
        Ok(size)
    }

    fn read<R: Read>(&self, mut reader: R) -> Result<Snapshot, SnapshotError> {
        let snapshot: Snapshot = match self.compression {
            Compression::None => bincode::serde::decode_from_std_read(&mut reader, self.config)?,
            Compression::Zstd1 | Compression::Zstd3 => {
                let mut decoder = zstd::stream::read::Decoder::new(reader)?;
                bincode::serde::decode_from_std_read(&mut decoder, self.config)?
            }
        };

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(snapshot.version));
        }
        Ok(snapshot)
    }
}

/// Keeps nothing: the store lives only as long as the process.
pub struct NoopSnapshotProvider {}

impl SnapshotProvider for NoopSnapshotProvider {
    fn is_persistent(&self) -> bool {
        false
    }

    fn load(&self) -> Result<Option<Snapshot>, SnapshotError> {
        Ok(None)
    }

    fn store(&self, _snapshot: &Snapshot) -> Result<usize, SnapshotError> {
        Ok(0)
    }
}

pub struct FilesystemSnapshotProvider {
    base_dir: PathBuf,
    path: PathBuf,
    codec: Codec,
}

impl FilesystemSnapshotProvider {
    pub fn new(base_dir: &str, filename: &str, compression: Compression) -> Self {
        FilesystemSnapshotProvider {
            base_dir: PathBuf::from(base_dir),
            path: Path::new(base_dir).join(filename),
            codec: Codec::new(compression),
        }
    }
}

impl SnapshotProvider for FilesystemSnapshotProvider {
    fn is_persistent(&self) -> bool {
        true
    }

    fn load(&self) -> Result<Option<Snapshot>, SnapshotError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let reader = io::BufReader::new(file);
        self.codec.read(reader).map(Some)
    }

    fn store(&self, snapshot: &Snapshot) -> Result<usize, SnapshotError> {
        fs::create_dir_all(&self.base_dir)?;

        // Write next to the target, then rename over it so readers never see a partial file
        let mut tmp = tempfile::NamedTempFile::new_in(&self.base_dir)?;
        let size = {
            let mut writer = io::BufWriter::new(tmp.as_file_mut());
            let size = self.codec.write(&mut writer, snapshot)?;
            writer.flush()?;
            size
        };
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)?;

        tracing::debug!(path = ?self.path, bytes = size, "Stored snapshot");
        Ok(size)
    }
}
