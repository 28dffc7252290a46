//! Joint files: the pre-compiled on-disk cache of one filter category.
//!
//! Layout, all integers little endian:
//!
//! ```text
//! header   magic "NSJF" | version u16 | category u8 | reserved u8 | count u64
//! record*  len u32 | postcard(FilterEntry) [ | len u32 | postcard(ModifyAction) ]
//! trailer  byte copy of header
//! ```
//!
//! The action section is present only for categories carrying an action.
//! A file whose trailer does not repeat the header byte for byte was cut
//! short by a crash mid-write and is rejected as a whole.

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::filter::{FilterCategory, FilterContainer, FilterEntry, ModifyAction};

const MAGIC: [u8; 4] = *b"NSJF";
const VERSION: u16 = 1;
const HEADER_LEN: usize = 16;

/// Error type for joint file operations.
#[derive(Debug, thiserror::Error)]
pub enum JointError {
    #[error("joint file {0:?} does not exist")]
    Missing(PathBuf),

    #[error("I/O error on joint file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("file is shorter than its header frames ({len} bytes)")]
    TooShort { len: usize },

    #[error("bad magic bytes")]
    BadMagic,

    #[error("unsupported joint file version {0}")]
    UnsupportedVersion(u16),

    #[error("joint file holds category tag {found}, expected {expected}")]
    CategoryMismatch { expected: FilterCategory, found: u8 },

    #[error("trailing header does not match the leading header")]
    TrailerMismatch,

    #[error("record at offset {offset} runs past the end of the file")]
    TruncatedRecord { offset: usize },

    #[error("header announces {expected} records, found {found}")]
    CountMismatch { expected: u64, found: u64 },

    #[error("record codec error: {0}")]
    Codec(#[from] postcard::Error),

    #[error("task join error")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    category: FilterCategory,
    count: u64,
}

impl Header {
    fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[..4].copy_from_slice(&MAGIC);
        bytes[4..6].copy_from_slice(&VERSION.to_le_bytes());
        bytes[6] = self.category.as_u8();
        bytes[8..].copy_from_slice(&self.count.to_le_bytes());
        bytes
    }

    fn parse(bytes: &[u8; HEADER_LEN], expected: FilterCategory) -> Result<Self, JointError> {
        if bytes[..4] != MAGIC {
            return Err(JointError::BadMagic);
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != VERSION {
            return Err(JointError::UnsupportedVersion(version));
        }
        let category = FilterCategory::from_u8(bytes[6])
            .filter(|category| *category == expected)
            .ok_or(JointError::CategoryMismatch {
                expected,
                found: bytes[6],
            })?;
        let mut count = [0u8; 8];
        count.copy_from_slice(&bytes[8..]);
        Ok(Self {
            category,
            count: u64::from_le_bytes(count),
        })
    }
}

/// Path of the joint file for `category` inside `dir`.
#[must_use]
pub fn joint_path(dir: &Path, category: FilterCategory) -> PathBuf {
    dir.join(format!("{}.joint", category.name()))
}

/// Serialize `entries` as the joint file content of `category`.
///
/// # Errors
///
/// Returns [`JointError::Codec`] if an entry cannot be serialized.
pub fn encode<'a>(
    category: FilterCategory,
    entries: impl ExactSizeIterator<Item = &'a FilterEntry>,
) -> Result<Vec<u8>, JointError> {
    let header = Header {
        category,
        count: entries.len() as u64,
    }
    .to_bytes();

    let mut out = Vec::with_capacity(HEADER_LEN * 2 + entries.len() * 32);
    out.extend_from_slice(&header);
    let default_action = ModifyAction::default();
    for entry in entries {
        push_blob(&mut out, &postcard::to_stdvec(entry)?);
        if category.carries_action() {
            let action = entry.action.as_ref().unwrap_or(&default_action);
            push_blob(&mut out, &postcard::to_stdvec(action)?);
        }
    }
    out.extend_from_slice(&header);
    Ok(out)
}

fn push_blob(out: &mut Vec<u8>, blob: &[u8]) {
    // Records are bounded by a single filter line.
    #[allow(clippy::cast_possible_truncation)]
    out.extend_from_slice(&(blob.len() as u32).to_le_bytes());
    out.extend_from_slice(blob);
}

/// Parse joint file content for `category`.
///
/// Nothing is returned unless the whole file checks out: both header frames,
/// every record and the announced count.
///
/// # Errors
///
/// Returns the first [`JointError`] encountered.
pub fn decode(category: FilterCategory, bytes: &[u8]) -> Result<Vec<FilterEntry>, JointError> {
    if bytes.len() < HEADER_LEN * 2 {
        return Err(JointError::TooShort { len: bytes.len() });
    }
    let (leading, rest) = bytes.split_at(HEADER_LEN);
    let (body, trailing) = rest.split_at(rest.len() - HEADER_LEN);

    let mut frame = [0u8; HEADER_LEN];
    frame.copy_from_slice(leading);
    let header = Header::parse(&frame, category)?;
    if leading != trailing {
        return Err(JointError::TrailerMismatch);
    }

    let mut cursor = Cursor { body, offset: 0 };
    let mut entries = Vec::new();
    while !cursor.is_empty() {
        let mut entry: FilterEntry = postcard::from_bytes(cursor.next_blob()?)?;
        if category.carries_action() {
            let action: ModifyAction = postcard::from_bytes(cursor.next_blob()?)?;
            entry.action = Some(action);
        }
        entries.push(entry);
    }

    if entries.len() as u64 != header.count {
        return Err(JointError::CountMismatch {
            expected: header.count,
            found: entries.len() as u64,
        });
    }
    Ok(entries)
}

struct Cursor<'a> {
    body: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn is_empty(&self) -> bool {
        self.offset >= self.body.len()
    }

    fn next_blob(&mut self) -> Result<&'a [u8], JointError> {
        let truncated = JointError::TruncatedRecord {
            offset: self.offset + HEADER_LEN,
        };
        let len_end = self.offset + 4;
        let len_bytes = self.body.get(self.offset..len_end).ok_or(truncated)?;
        let len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]);
        let end = len_end + len as usize;
        let blob = self
            .body
            .get(len_end..end)
            .ok_or(JointError::TruncatedRecord {
                offset: self.offset + HEADER_LEN,
            })?;
        self.offset = end;
        Ok(blob)
    }
}

/// Write the joint file of `category` into `dir`.
///
/// Content goes to a temporary file first and is renamed into place, so a
/// reader never picks up a half-written file under the final name.
///
/// # Errors
///
/// Returns a [`JointError`] if serialization or any filesystem step fails.
pub async fn write(
    dir: &Path,
    category: FilterCategory,
    container: &FilterContainer,
) -> Result<(), JointError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| JointError::Io { path, source }
    };

    let entries: Vec<&FilterEntry> = container.entries().collect();
    let bytes = encode(category, entries.into_iter())?;

    fs::create_dir_all(dir).await.map_err(io_err(dir))?;
    let path = joint_path(dir, category);
    let tmp = path.with_extension("joint.tmp");
    fs::write(&tmp, &bytes).await.map_err(io_err(&tmp))?;
    fs::rename(&tmp, &path).await.map_err(io_err(&path))?;

    tracing::debug!(
        category = %category,
        filters = container.len(),
        bytes = bytes.len(),
        "wrote joint file"
    );
    Ok(())
}

/// Read and verify the joint file of `category` from `dir`.
///
/// # Errors
///
/// Returns [`JointError::Missing`] when there is no file, or the reason the
/// file was rejected.
pub async fn read(dir: &Path, category: FilterCategory) -> Result<FilterContainer, JointError> {
    let path = joint_path(dir, category);
    let bytes = fs::read(&path).await.map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            JointError::Missing(path.clone())
        } else {
            JointError::Io {
                path: path.clone(),
                source,
            }
        }
    })?;

    let entries = tokio::task::spawn_blocking(move || decode(category, &bytes)).await??;
    Ok(entries.into_iter().collect())
}

/// Delete the joint file of `category`, if any.
///
/// # Errors
///
/// Returns [`JointError::Io`] for failures other than the file being absent.
pub async fn remove(dir: &Path, category: FilterCategory) -> Result<(), JointError> {
    let path = joint_path(dir, category);
    match fs::remove_file(&path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(JointError::Io { path, source }),
    }
}
