use futures::Stream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Write granularity of progress-reporting uploads.
pub const UPLOAD_CHUNK_SIZE: usize = 1024 * 1024;

/// Video container types accepted for upload.
pub const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "video/mp4",
    "video/mpeg",
    "video/quicktime",
    "video/x-msvideo",
    "video/x-matroska",
];

pub fn is_allowed_content_type(content_type: &str) -> bool {
    ALLOWED_CONTENT_TYPES.contains(&content_type)
}

/// Content type to serve a stored video with, from its extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("mp4" | "m4v") => "video/mp4",
        Some("mpeg" | "mpg") => "video/mpeg",
        Some("mov") => "video/quicktime",
        Some("avi") => "video/x-msvideo",
        Some("mkv") => "video/x-matroska",
        _ => "application/octet-stream",
    }
}

/// An upload written to local storage.
#[derive(Debug, Clone)]
pub struct StoredUpload {
    pub file_id: String,
    pub filename: String,
    pub path: PathBuf,
}

/// Progress of a chunked upload write.
#[derive(Debug, Clone)]
pub enum UploadProgress {
    Written { uploaded: u64, total: u64 },
    Stored(StoredUpload),
}

impl UploadProgress {
    /// Whole percent written, 100 for an empty upload.
    pub fn percent(uploaded: u64, total: u64) -> u8 {
        if total == 0 {
            return 100;
        }
        (uploaded.min(total) * 100 / total) as u8
    }
}

enum ChunkedWrite {
    Start {
        storage: Arc<UploadStorage>,
        data: Vec<u8>,
        original_filename: String,
    },
    Writing {
        file: tokio::fs::File,
        stored: StoredUpload,
        data: Vec<u8>,
        written: usize,
    },
    Done,
}

/// Local-disk storage for uploaded videos, named `<file_id><ext>`.
pub struct UploadStorage {
    root: PathBuf,
}

impl UploadStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Write uploaded bytes under a freshly generated file id, keeping the
    /// original extension.
    pub async fn store(
        &self,
        data: &[u8],
        original_filename: &str,
    ) -> Result<StoredUpload, StorageError> {
        let (mut file, stored) = self.create(original_filename).await?;
        file.write_all(data).await?;
        file.flush().await?;

        tracing::info!(
            file_id = %stored.file_id,
            path = %stored.path.display(),
            size = data.len(),
            "Stored upload"
        );
        Ok(stored)
    }

    /// Like [`UploadStorage::store`], but writes in [`UPLOAD_CHUNK_SIZE`]
    /// chunks and reports progress after each one. The last item is the
    /// stored upload; an error ends the stream.
    pub fn store_with_progress(
        self: Arc<Self>,
        data: Vec<u8>,
        original_filename: String,
    ) -> impl Stream<Item = Result<UploadProgress, StorageError>> + Send + 'static {
        let state = ChunkedWrite::Start {
            storage: self,
            data,
            original_filename,
        };

        futures::stream::unfold(state, |mut state| async move {
            loop {
                match state {
                    ChunkedWrite::Done => return None,
                    ChunkedWrite::Start {
                        storage,
                        data,
                        original_filename,
                    } => match storage.create(&original_filename).await {
                        Ok((file, stored)) => {
                            state = ChunkedWrite::Writing {
                                file,
                                stored,
                                data,
                                written: 0,
                            }
                        }
                        Err(e) => return Some((Err(e), ChunkedWrite::Done)),
                    },
                    ChunkedWrite::Writing {
                        mut file,
                        stored,
                        data,
                        written,
                    } => {
                        let total = data.len();
                        if written < total {
                            let end = (written + UPLOAD_CHUNK_SIZE).min(total);
                            if let Err(e) = file.write_all(&data[written..end]).await {
                                return Some((Err(e.into()), ChunkedWrite::Done));
                            }
                            let progress = UploadProgress::Written {
                                uploaded: end as u64,
                                total: total as u64,
                            };
                            let next = ChunkedWrite::Writing {
                                file,
                                stored,
                                data,
                                written: end,
                            };
                            return Some((Ok(progress), next));
                        }

                        if let Err(e) = file.flush().await {
                            return Some((Err(e.into()), ChunkedWrite::Done));
                        }
                        tracing::info!(
                            file_id = %stored.file_id,
                            path = %stored.path.display(),
                            size = total,
                            "Stored upload"
                        );
                        return Some((Ok(UploadProgress::Stored(stored)), ChunkedWrite::Done));
                    }
                }
            }
        })
    }

    async fn create(
        &self,
        original_filename: &str,
    ) -> Result<(tokio::fs::File, StoredUpload), StorageError> {
        tokio::fs::create_dir_all(&self.root).await?;

        let file_id = Uuid::new_v4().to_string();
        let filename = match extension(original_filename) {
            Some(ext) => format!("{file_id}.{ext}"),
            None => file_id.clone(),
        };
        let path = self.root.join(&filename);
        let file = tokio::fs::File::create(&path).await?;
        Ok((
            file,
            StoredUpload {
                file_id,
                filename,
                path,
            },
        ))
    }

    /// Locate a stored upload by file id.
    pub async fn find(&self, file_id: &str) -> Result<Option<StoredUpload>, StorageError> {
        // File ids are generated UUIDs; anything else cannot be ours.
        if Uuid::parse_str(file_id).is_err() {
            return Ok(None);
        }

        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let stem = name.split_once('.').map_or(name.as_str(), |(stem, _)| stem);
            if stem == file_id {
                return Ok(Some(StoredUpload {
                    file_id: file_id.to_string(),
                    filename: name.clone(),
                    path: entry.path(),
                }));
            }
        }
        Ok(None)
    }
}

fn extension(filename: &str) -> Option<&str> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}
