//! Multipart Uploads
//!
//! Each upload lives in its own directory until it is completed or aborted:
//!
//! ```text
//! {bucket}/multipart/{upload_id}/
//!     upload.json        descriptor (key, content type, metadata)
//!     part-000001        one file per part, replaced on re-upload
//!     part-000002
//! ```
//!
//! Completion hands a sequential reader over the chosen parts to the normal
//! write path, so a completed object is an ordinary record in the log.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::SyncStrategy;
use crate::error::{io_context, Result, VaultError};
use crate::index::{system_time_from_ns, unix_ns};
use crate::storage::{MultipartUpload, PartInfo};

/// Highest accepted part number
pub const MAX_PART_NUMBER: u32 = 10_000;

const UPLOAD_DESCRIPTOR: &str = "upload.json";
const PART_PREFIX: &str = "part-";
const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// Hex CRC32 used as the ETag of parts and objects
pub fn etag_of(checksum: u32) -> String {
    format!("{:08x}", checksum)
}

fn part_file_name(number: u32) -> String {
    format!("{}{:06}", PART_PREFIX, number)
}

fn parse_part_file_name(name: &str) -> Option<u32> {
    let digits = name.strip_prefix(PART_PREFIX)?;
    if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().filter(|n| (1..=MAX_PART_NUMBER).contains(n))
}

/// Persisted form of an upload
#[derive(Debug, Serialize, Deserialize)]
struct UploadDescriptor {
    upload_id: String,
    key: String,
    content_type: String,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    created_unix_ns: i64,
}

struct UploadState {
    upload: MultipartUpload,
    parts: Mutex<BTreeMap<u32, PartInfo>>,
}

/// Parts selected for completion
pub struct CompletionPlan {
    pub upload: MultipartUpload,
    pub paths: Vec<PathBuf>,
    pub total_size: u64,
}

impl CompletionPlan {
    /// Sequential reader over the selected parts
    pub fn reader(&self) -> PartChainReader {
        PartChainReader::new(self.paths.clone())
    }
}

// =============================================================================
// Multipart Manager
// =============================================================================

/// Registry of in-flight uploads for one bucket
pub struct MultipartManager {
    bucket: String,
    dir: PathBuf,
    sync: SyncStrategy,
    uploads: RwLock<HashMap<String, Arc<UploadState>>>,
}

impl MultipartManager {
    /// Open the registry, rediscovering uploads left on disk
    pub fn load(bucket: &str, dir: impl Into<PathBuf>, sync: SyncStrategy) -> Result<Self> {
        let manager = Self {
            bucket: bucket.to_string(),
            dir: dir.into(),
            sync,
            uploads: RwLock::new(HashMap::new()),
        };

        let entries = match fs::read_dir(&manager.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(manager),
            Err(e) => return Err(io_context(format!("list {}", manager.dir.display()))(e)),
        };

        let mut found = HashMap::new();
        for entry in entries {
            let entry = entry.map_err(io_context("read multipart directory entry"))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            match manager.load_upload(&path) {
                Ok(state) => {
                    found.insert(state.upload.upload_id.clone(), Arc::new(state));
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable multipart upload");
                }
            }
        }
        if !found.is_empty() {
            debug!(bucket = %manager.bucket, uploads = found.len(), "Rediscovered multipart uploads");
        }
        *manager.uploads.write() = found;
        Ok(manager)
    }

    fn load_upload(&self, dir: &Path) -> Result<UploadState> {
        let raw = fs::read(dir.join(UPLOAD_DESCRIPTOR))
            .map_err(io_context(format!("read descriptor in {}", dir.display())))?;
        let desc: UploadDescriptor = serde_json::from_slice(&raw)?;

        let mut parts = BTreeMap::new();
        for entry in fs::read_dir(dir).map_err(io_context(format!("list {}", dir.display())))? {
            let entry = entry.map_err(io_context("read upload directory entry"))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };

            if name.starts_with(PART_PREFIX) && name.contains(".tmp") {
                if let Err(e) = fs::remove_file(entry.path()) {
                    warn!(path = %entry.path().display(), error = %e, "Failed to remove stale part");
                }
                continue;
            }
            let Some(number) = parse_part_file_name(name) else { continue };

            let (size, checksum) = checksum_file(&entry.path())?;
            let last_modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or_else(|_| SystemTime::now());
            parts.insert(
                number,
                PartInfo {
                    number,
                    size,
                    etag: etag_of(checksum),
                    last_modified,
                },
            );
        }

        Ok(UploadState {
            upload: MultipartUpload {
                bucket: self.bucket.clone(),
                key: desc.key,
                upload_id: desc.upload_id,
                content_type: desc.content_type,
                metadata: desc.metadata,
                created: system_time_from_ns(desc.created_unix_ns),
            },
            parts: Mutex::new(parts),
        })
    }

    fn upload_dir(&self, upload_id: &str) -> PathBuf {
        self.dir.join(upload_id)
    }

    fn state(&self, upload_id: &str) -> Result<Arc<UploadState>> {
        self.uploads
            .read()
            .get(upload_id)
            .cloned()
            .ok_or(VaultError::NotExist)
    }

    /// Register a new upload for `key`
    pub fn init(
        &self,
        key: &str,
        content_type: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<MultipartUpload> {
        let upload_id = Uuid::new_v4().simple().to_string();
        let created = SystemTime::now();
        let dir = self.upload_dir(&upload_id);
        fs::create_dir_all(&dir).map_err(io_context(format!("create {}", dir.display())))?;

        let desc = UploadDescriptor {
            upload_id: upload_id.clone(),
            key: key.to_string(),
            content_type: content_type.to_string(),
            metadata: metadata.clone(),
            created_unix_ns: unix_ns(created),
        };
        let tmp = dir.join(format!("{}.tmp", UPLOAD_DESCRIPTOR));
        let stored = fs::write(&tmp, serde_json::to_vec(&desc)?)
            .and_then(|_| fs::rename(&tmp, dir.join(UPLOAD_DESCRIPTOR)));
        if let Err(e) = stored {
            let _ = fs::remove_dir_all(&dir);
            return Err(io_context("write upload descriptor")(e));
        }

        let upload = MultipartUpload {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            upload_id: upload_id.clone(),
            content_type: content_type.to_string(),
            metadata,
            created,
        };
        self.uploads.write().insert(
            upload_id,
            Arc::new(UploadState {
                upload: upload.clone(),
                parts: Mutex::new(BTreeMap::new()),
            }),
        );
        Ok(upload)
    }

    /// Look up an upload by id
    pub fn get(&self, upload_id: &str) -> Result<MultipartUpload> {
        Ok(self.state(upload_id)?.upload.clone())
    }

    /// Store one part, replacing any earlier upload of the same number
    pub fn upload_part(
        &self,
        upload_id: &str,
        number: u32,
        src: &mut dyn Read,
        size: Option<u64>,
    ) -> Result<PartInfo> {
        if !(1..=MAX_PART_NUMBER).contains(&number) {
            return Err(VaultError::InvalidInput(format!(
                "part number {} outside 1..={}",
                number, MAX_PART_NUMBER
            )));
        }
        let state = self.state(upload_id)?;

        let dir = self.upload_dir(upload_id);
        let final_path = dir.join(part_file_name(number));
        let tmp = dir.join(format!("{}.tmp-{}", part_file_name(number), Uuid::new_v4().simple()));

        let written = write_part(&tmp, src, size, self.sync.should_sync());
        let (bytes, checksum) = match written.and_then(|w| fs::rename(&tmp, &final_path).map(|_| w)) {
            Ok(w) => w,
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(io_context(format!("store part {} of {}", number, upload_id))(e));
            }
        };

        let info = PartInfo {
            number,
            size: bytes,
            etag: etag_of(checksum),
            last_modified: SystemTime::now(),
        };
        state.parts.lock().insert(number, info.clone());
        Ok(info)
    }

    /// Parts in ascending order, paginated (`limit == 0` means no limit)
    pub fn list_parts(&self, upload_id: &str, limit: usize, offset: usize) -> Result<Vec<PartInfo>> {
        let state = self.state(upload_id)?;
        let parts = state.parts.lock();
        let iter = parts.values().skip(offset).cloned();
        Ok(if limit > 0 {
            iter.take(limit).collect()
        } else {
            iter.collect()
        })
    }

    /// Validate the requested parts and resolve them to files.
    ///
    /// Every number must have been uploaded, numbers must be unique and any
    /// non-empty ETag must match. Nothing is modified.
    pub fn plan_completion(&self, upload_id: &str, requested: &[PartInfo]) -> Result<CompletionPlan> {
        if requested.is_empty() {
            return Err(VaultError::InvalidInput("no parts to complete".to_string()));
        }
        let state = self.state(upload_id)?;
        let parts = state.parts.lock();

        let mut chosen: Vec<&PartInfo> = Vec::with_capacity(requested.len());
        for want in requested {
            let have = parts.get(&want.number).ok_or_else(|| {
                VaultError::InvalidInput(format!("part {} was not uploaded", want.number))
            })?;
            if !want.etag.is_empty() && want.etag != have.etag {
                return Err(VaultError::InvalidInput(format!(
                    "part {} etag mismatch: expected {}, have {}",
                    want.number, want.etag, have.etag
                )));
            }
            chosen.push(have);
        }
        chosen.sort_by_key(|p| p.number);
        if chosen.windows(2).any(|w| w[0].number == w[1].number) {
            return Err(VaultError::InvalidInput("duplicate part number".to_string()));
        }

        let dir = self.upload_dir(upload_id);
        Ok(CompletionPlan {
            upload: state.upload.clone(),
            paths: chosen.iter().map(|p| dir.join(part_file_name(p.number))).collect(),
            total_size: chosen.iter().map(|p| p.size).sum(),
        })
    }

    /// Forget a completed upload and delete its directory
    pub fn finish(&self, upload_id: &str) -> Result<()> {
        self.uploads.write().remove(upload_id);
        let dir = self.upload_dir(upload_id);
        if let Err(e) = fs::remove_dir_all(&dir) {
            warn!(path = %dir.display(), error = %e, "Failed to remove completed upload");
        }
        Ok(())
    }

    /// Discard an upload and all of its parts
    pub fn abort(&self, upload_id: &str) -> Result<()> {
        if self.uploads.write().remove(upload_id).is_none() {
            return Err(VaultError::NotExist);
        }
        let dir = self.upload_dir(upload_id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_context(format!("remove {}", dir.display()))(e)),
        }
    }

    /// Every in-flight upload, oldest first
    pub fn uploads(&self) -> Vec<MultipartUpload> {
        let mut all: Vec<MultipartUpload> =
            self.uploads.read().values().map(|s| s.upload.clone()).collect();
        all.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.upload_id.cmp(&b.upload_id)));
        all
    }

    pub fn len(&self) -> usize {
        self.uploads.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.uploads.read().is_empty()
    }
}

/// Stream `src` into a new file, returning (bytes, crc32)
fn write_part(path: &Path, src: &mut dyn Read, limit: Option<u64>, sync: bool) -> io::Result<(u64, u32)> {
    let file = File::create(path)?;
    let mut out = BufWriter::new(file);
    let mut hasher = crc32fast::Hasher::new();
    let mut chunk = vec![0u8; COPY_CHUNK_SIZE];
    let mut written = 0u64;

    loop {
        let want = match limit {
            Some(limit) => (limit - written).min(COPY_CHUNK_SIZE as u64) as usize,
            None => COPY_CHUNK_SIZE,
        };
        if want == 0 {
            break;
        }
        let n = match src.read(&mut chunk[..want]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        out.write_all(&chunk[..n])?;
        hasher.update(&chunk[..n]);
        written += n as u64;
    }

    out.flush()?;
    if sync {
        out.get_ref().sync_all()?;
    }
    Ok((written, hasher.finalize()))
}

fn checksum_file(path: &Path) -> Result<(u64, u32)> {
    let mut file = File::open(path).map_err(io_context(format!("open {}", path.display())))?;
    let mut hasher = crc32fast::Hasher::new();
    let mut chunk = vec![0u8; COPY_CHUNK_SIZE];
    let mut size = 0u64;
    loop {
        let n = file
            .read(&mut chunk)
            .map_err(io_context(format!("read {}", path.display())))?;
        if n == 0 {
            break;
        }
        hasher.update(&chunk[..n]);
        size += n as u64;
    }
    Ok((size, hasher.finalize()))
}

// =============================================================================
// Part Chain Reader
// =============================================================================

/// Reads a list of files back to back
pub struct PartChainReader {
    pending: VecDeque<PathBuf>,
    current: Option<File>,
}

impl PartChainReader {
    pub fn new(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            pending: paths.into_iter().collect(),
            current: None,
        }
    }
}

impl Read for PartChainReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.current.is_none() {
                match self.pending.pop_front() {
                    Some(path) => self.current = Some(File::open(&path)?),
                    None => return Ok(0),
                }
            }
            if let Some(file) = self.current.as_mut() {
                let n = file.read(buf)?;
                if n > 0 {
                    return Ok(n);
                }
            }
            self.current = None;
        }
    }
}
