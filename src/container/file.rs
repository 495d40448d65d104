//! The container file.

use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    num::NonZeroU64,
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::{
    compressor::{try_create_compressor, CompressorConfiguration},
    data_type::DataType,
    metadata::{ArrayMetadata, MAX_RANK},
};

use super::{
    dataset::Dataset,
    index::{ContainerIndex, DatasetRecord, FORMAT_VERSION, MAGIC, SUPERBLOCK_LEN},
    native_type::NativeType,
    ContainerError,
};

/// The mode a container file is opened with.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum OpenMode {
    /// Open an existing file for reading.
    ReadOnly,
    /// Open an existing file for reading and writing.
    ReadWrite,
    /// Create a file, truncating any existing content.
    CreateTruncate,
}

pub(crate) struct FileState {
    pub file: File,
    pub index: ContainerIndex,
    /// The append tail: chunk payloads and index blocks are written here.
    pub end_offset: u64,
    pub index_dirty: bool,
}

pub(crate) struct FileInner {
    path: PathBuf,
    readonly: bool,
    pub state: Mutex<FileState>,
}

impl FileInner {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn readonly(&self) -> bool {
        self.readonly
    }

    /// Append the index block and repoint the superblock at it.
    pub fn persist_index_locked(&self, state: &mut FileState) -> Result<(), ContainerError> {
        if !state.index_dirty {
            return Ok(());
        }
        let bytes = serde_json::to_vec(&state.index)
            .map_err(|err| ContainerError::Other(format!("encode container index: {err}")))?;
        let index_offset = state.end_offset;
        state.file.seek(SeekFrom::Start(index_offset))?;
        state.file.write_all(&bytes)?;
        write_superblock(&mut state.file, index_offset, bytes.len() as u64)?;
        state.file.flush()?;
        state.end_offset = index_offset + bytes.len() as u64;
        state.index_dirty = false;
        debug!(
            "persisted container index of {} at {index_offset}",
            self.path.display()
        );
        Ok(())
    }

    pub fn flush(&self) -> Result<(), ContainerError> {
        let mut state = self.state.lock();
        self.persist_index_locked(&mut state)
    }
}

impl Drop for FileInner {
    fn drop(&mut self) {
        if !self.readonly {
            if let Err(err) = self.flush() {
                error!("close container {}: {err}", self.path.display());
            }
        }
    }
}

fn write_superblock(file: &mut File, index_offset: u64, index_len: u64) -> std::io::Result<()> {
    let mut superblock = [0u8; SUPERBLOCK_LEN as usize];
    superblock[..8].copy_from_slice(&MAGIC);
    superblock[8..12].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
    superblock[12..20].copy_from_slice(&index_offset.to_le_bytes());
    superblock[20..28].copy_from_slice(&index_len.to_le_bytes());
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&superblock)
}

/// A container file: a hierarchy of chunked datasets in a single file.
///
/// All native resources are scoped: dropping the last handle referencing the
/// file persists the index and closes it.
pub struct ContainerFile {
    inner: Arc<FileInner>,
}

impl ContainerFile {
    /// Open a container file at `path` with `mode`.
    ///
    /// # Errors
    /// Returns [`ContainerError::NotFound`] if `mode` requires an existing
    /// file and there is none, [`ContainerError::AlreadyExists`] if creation
    /// is obstructed, [`ContainerError::InvalidArgument`] if the file is not
    /// a container file, and [`ContainerError::Io`] on other IO errors.
    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self, ContainerError> {
        let path = path.as_ref();
        let state = match mode {
            OpenMode::ReadOnly | OpenMode::ReadWrite => {
                let mut file = OpenOptions::new()
                    .read(true)
                    .write(mode == OpenMode::ReadWrite)
                    .open(path)
                    .map_err(|err| map_open_error(err, path))?;
                let (index, end_offset) = read_index(&mut file, path)?;
                FileState {
                    file,
                    index,
                    end_offset,
                    index_dirty: false,
                }
            }
            OpenMode::CreateTruncate => {
                let mut file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
                    .map_err(|err| map_open_error(err, path))?;
                // Write a valid superblock and empty index up front.
                let index = ContainerIndex::default();
                let bytes = serde_json::to_vec(&index)
                    .map_err(|err| ContainerError::Other(format!("encode container index: {err}")))?;
                file.seek(SeekFrom::Start(SUPERBLOCK_LEN))?;
                file.write_all(&bytes)?;
                write_superblock(&mut file, SUPERBLOCK_LEN, bytes.len() as u64)?;
                file.flush()?;
                FileState {
                    file,
                    index,
                    end_offset: SUPERBLOCK_LEN + bytes.len() as u64,
                    index_dirty: false,
                }
            }
        };
        Ok(Self {
            inner: Arc::new(FileInner {
                path: path.to_path_buf(),
                readonly: mode == OpenMode::ReadOnly,
                state: Mutex::new(state),
            }),
        })
    }

    /// Return the filesystem path of the container file.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Create a chunked dataset at `path` inside the container.
    ///
    /// # Errors
    /// Returns [`ContainerError::AlreadyExists`] if a dataset exists at
    /// `path`, [`ContainerError::InvalidArgument`] if the arguments are
    /// inconsistent, and [`ContainerError::Io`] on IO errors.
    pub fn create_dataset(
        &self,
        path: &str,
        dtype: DataType,
        shape: &[u64],
        chunk_shape: &[NonZeroU64],
        compression: Option<&CompressorConfiguration>,
    ) -> Result<Dataset, ContainerError> {
        if self.inner.readonly() {
            return Err(ContainerError::InvalidArgument(format!(
                "container {} is read-only",
                self.path().display()
            )));
        }
        let path = normalize_dataset_path(path)?;
        if shape.len() != chunk_shape.len() {
            return Err(ContainerError::InvalidArgument(format!(
                "shape has {} dimensions but chunk shape has {}",
                shape.len(),
                chunk_shape.len()
            )));
        }
        if shape.len() > MAX_RANK {
            return Err(ContainerError::InvalidArgument(format!(
                "rank {} exceeds the maximum supported rank of {MAX_RANK}",
                shape.len()
            )));
        }
        let compressor = compression
            .map(|compression| {
                try_create_compressor(compression)
                    .map_err(|err| ContainerError::InvalidArgument(err.to_string()))
            })
            .transpose()?;

        let record = DatasetRecord {
            path: path.clone(),
            dtype: NativeType::from_data_type(dtype),
            shape: shape.to_vec(),
            chunk_shape: chunk_shape.iter().map(|c| c.get()).collect(),
            compression: compression.cloned(),
            attributes: Vec::new(),
            chunks: Vec::new(),
        };
        {
            let mut state = self.inner.state.lock();
            if state.index.find(&path).is_some() {
                return Err(ContainerError::AlreadyExists(path));
            }
            state.index.datasets.push(record);
            state.index_dirty = true;
            self.inner.persist_index_locked(&mut state)?;
        }
        Ok(Dataset::new(
            self.inner.clone(),
            path,
            NativeType::from_data_type(dtype),
            shape.to_vec(),
            chunk_shape.to_vec(),
            compressor,
        ))
    }

    /// Open the dataset at `path` inside the container and decode its
    /// metadata.
    ///
    /// # Errors
    /// Returns [`ContainerError::NotFound`] if there is no dataset at `path`,
    /// [`ContainerError::UnsupportedType`] if the dataset's native type has
    /// no engine counterpart, and [`ContainerError::Io`] on IO errors.
    pub fn open_dataset(&self, path: &str) -> Result<(Dataset, ArrayMetadata), ContainerError> {
        let path = normalize_dataset_path(path)?;
        let record = {
            let state = self.inner.state.lock();
            state
                .index
                .find(&path)
                .cloned()
                .ok_or_else(|| ContainerError::NotFound(path.clone()))?
        };
        let dtype = record.dtype.to_data_type()?;
        let chunk_shape: Vec<NonZeroU64> = record
            .chunk_shape
            .iter()
            .map(|&c| NonZeroU64::new(c))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| {
                ContainerError::InvalidArgument(format!(
                    "dataset {path} has a zero chunk extent"
                ))
            })?;
        let compressor = record
            .compression
            .as_ref()
            .map(|compression| {
                try_create_compressor(compression)
                    .map_err(|err| ContainerError::InvalidArgument(err.to_string()))
            })
            .transpose()?;
        let metadata = ArrayMetadata::new(
            record.shape.clone(),
            chunk_shape.clone(),
            dtype,
            record.compression.clone(),
        );
        Ok((
            Dataset::new(
                self.inner.clone(),
                path,
                record.dtype,
                record.shape,
                chunk_shape,
                compressor,
            ),
            metadata,
        ))
    }

    /// Returns true if a dataset exists at `path`.
    #[must_use]
    pub fn dataset_exists(&self, path: &str) -> bool {
        normalize_dataset_path(path)
            .map(|path| self.inner.state.lock().index.find(&path).is_some())
            .unwrap_or(false)
    }

    /// Persist the container index.
    ///
    /// # Errors
    /// Returns [`ContainerError::Io`] on IO errors.
    pub fn flush(&self) -> Result<(), ContainerError> {
        self.inner.flush()
    }

    /// Close the container file.
    ///
    /// Never fails observably; errors persisting the index are logged.
    /// Datasets opened from this file keep it alive until they are dropped.
    pub fn close(self) {
        drop(self);
    }
}

fn map_open_error(err: std::io::Error, path: &Path) -> ContainerError {
    match err.kind() {
        std::io::ErrorKind::NotFound => ContainerError::NotFound(path.display().to_string()),
        std::io::ErrorKind::AlreadyExists => {
            ContainerError::AlreadyExists(path.display().to_string())
        }
        _ => ContainerError::Io(err),
    }
}

fn read_index(file: &mut File, path: &Path) -> Result<(ContainerIndex, u64), ContainerError> {
    let not_a_container = || {
        ContainerError::InvalidArgument(format!(
            "{} is not a container file",
            path.display()
        ))
    };
    let mut superblock = [0u8; SUPERBLOCK_LEN as usize];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut superblock)
        .map_err(|_| not_a_container())?;
    if superblock[..8] != MAGIC {
        return Err(not_a_container());
    }
    let version = u32::from_le_bytes(superblock[8..12].try_into().expect("4 bytes"));
    if version != FORMAT_VERSION {
        return Err(ContainerError::InvalidArgument(format!(
            "{} has unsupported container format version {version}",
            path.display()
        )));
    }
    let index_offset = u64::from_le_bytes(superblock[12..20].try_into().expect("8 bytes"));
    let index_len = u64::from_le_bytes(superblock[20..28].try_into().expect("8 bytes"));
    file.seek(SeekFrom::Start(index_offset))?;
    let mut bytes = vec![
        0u8;
        usize::try_from(index_len).map_err(|_| not_a_container())?
    ];
    file.read_exact(&mut bytes).map_err(|_| not_a_container())?;
    let index = serde_json::from_slice(&bytes).map_err(|err| {
        ContainerError::Other(format!(
            "decode container index of {}: {err}",
            path.display()
        ))
    })?;
    let end_offset = file.seek(SeekFrom::End(0))?;
    Ok((index, end_offset))
}

fn normalize_dataset_path(path: &str) -> Result<String, ContainerError> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Err(ContainerError::InvalidArgument(format!(
            "invalid dataset path {path:?}"
        )));
    }
    Ok(format!("/{trimmed}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nz(shape: &[u64]) -> Vec<NonZeroU64> {
        shape.iter().map(|&i| NonZeroU64::new(i).unwrap()).collect()
    }

    #[test]
    fn container_file_modes() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("modes.gcf");

        assert!(matches!(
            ContainerFile::open(&path, OpenMode::ReadOnly),
            Err(ContainerError::NotFound(_))
        ));
        assert!(matches!(
            ContainerFile::open(&path, OpenMode::ReadWrite),
            Err(ContainerError::NotFound(_))
        ));

        let file = ContainerFile::open(&path, OpenMode::CreateTruncate).unwrap();
        file.create_dataset("/a", DataType::UInt8, &[4], &nz(&[2]), None)
            .unwrap();
        file.close();

        let file = ContainerFile::open(&path, OpenMode::ReadOnly).unwrap();
        assert!(file.dataset_exists("/a"));
        assert!(matches!(
            file.create_dataset("/b", DataType::UInt8, &[4], &nz(&[2]), None),
            Err(ContainerError::InvalidArgument(_))
        ));
    }

    #[test]
    fn container_file_not_a_container() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("bogus");
        std::fs::write(&path, b"not a container").unwrap();
        assert!(matches!(
            ContainerFile::open(&path, OpenMode::ReadOnly),
            Err(ContainerError::InvalidArgument(_))
        ));
    }

    #[test]
    fn container_dataset_lifecycle() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("datasets.gcf");
        let file = ContainerFile::open(&path, OpenMode::CreateTruncate).unwrap();

        assert!(matches!(
            file.open_dataset("/missing"),
            Err(ContainerError::NotFound(_))
        ));
        file.create_dataset("/x/y", DataType::Float32, &[10, 10], &nz(&[5, 5]), None)
            .unwrap();
        assert!(matches!(
            file.create_dataset("/x/y", DataType::Float32, &[10, 10], &nz(&[5, 5]), None),
            Err(ContainerError::AlreadyExists(_))
        ));
        assert!(matches!(
            file.create_dataset("/bad", DataType::Float32, &[10, 10], &nz(&[5]), None),
            Err(ContainerError::InvalidArgument(_))
        ));

        let (_, metadata) = file.open_dataset("x/y/").unwrap();
        assert_eq!(metadata.shape, vec![10, 10]);
        assert_eq!(metadata.dtype, DataType::Float32);
    }
}
