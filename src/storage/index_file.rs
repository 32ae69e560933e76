use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use xxhash_rust::xxh3::{xxh3_64, Xxh3};

use crate::core::TableReference;
use crate::error::{CacheError, Result};
use crate::index::spatial::IndexRecord;

/// 索引文件 Header
const MAGIC: u32 = 0x5253_4958; // "RSIX"
const VERSION_CURRENT: u32 = 1;
const STATE_COMMITTED: u32 = 0x0000_0001;
const STATE_INCOMPLETE: u32 = 0xFFFF_FFFF;
const HEADER_SIZE: usize = 4 + 4 + 4 + 8 + 8; // magic + version + state + data_len + checksum

pub const INDEX_FILE_EXT: &str = "rsidx";

static FILE_SEQ: AtomicU64 = AtomicU64::new(0);

fn now_nanos() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// 空间索引的可丢弃备份文件（进程临时产物，无前向兼容保证）
///
/// 落盘流程（沿用快照的原子替换）：
/// 1) 写 `<name>.tmp` 的 INCOMPLETE header
/// 2) `bincode::serialize_into` 流式写 body，边写边算 xxh3 / data_len
/// 3) seek 回开头覆盖 COMMITTED header
/// 4) fsync(tmp) 后 rename 到正式文件名
///
/// 所有权：`IndexFile` drop 时删除文件（best-effort）；构建中途失败时 tmp 文件同样被清理。
#[derive(Debug)]
pub struct IndexFile {
    path: PathBuf,
    /// 落盘后的 (len, mtime)；不变时跳过整文件校验
    stamp: Option<(u64, SystemTime)>,
}

/// 出错路径上删除 tmp 文件
struct TmpGuard {
    path: PathBuf,
    armed: bool,
}

impl Drop for TmpGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

struct ChecksumWriter<'a, W: Write> {
    inner: &'a mut W,
    hasher: Xxh3,
    bytes: u64,
}

impl<'a, W: Write> ChecksumWriter<'a, W> {
    fn new(inner: &'a mut W) -> Self {
        Self {
            inner,
            hasher: Xxh3::new(),
            bytes: 0,
        }
    }

    fn finish(self) -> (u64, u64) {
        (self.bytes, self.hasher.digest())
    }
}

impl<'a, W: Write> Write for ChecksumWriter<'a, W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

fn header(state: u32, data_len: u64, checksum: u64) -> [u8; HEADER_SIZE] {
    let mut h = [0u8; HEADER_SIZE];
    h[0..4].copy_from_slice(&MAGIC.to_le_bytes());
    h[4..8].copy_from_slice(&VERSION_CURRENT.to_le_bytes());
    h[8..12].copy_from_slice(&state.to_le_bytes());
    h[12..20].copy_from_slice(&data_len.to_le_bytes());
    h[20..28].copy_from_slice(&checksum.to_le_bytes());
    h
}

fn stamp_of(path: &Path) -> Option<(u64, SystemTime)> {
    let meta = std::fs::metadata(path).ok()?;
    Some((meta.len(), meta.modified().ok()?))
}

impl IndexFile {
    /// 以构建时间戳命名：`<table>-<nanos>-<seq>.rsidx`
    pub fn path_for(dir: &Path, table: &TableReference) -> PathBuf {
        let seq = FILE_SEQ.fetch_add(1, Ordering::Relaxed);
        dir.join(format!(
            "{}-{:016x}-{}.{}",
            table.file_stem(),
            now_nanos(),
            seq,
            INDEX_FILE_EXT
        ))
    }

    /// 原子写入一份索引文件
    pub fn write(dir: &Path, table: &TableReference, records: &[IndexRecord]) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = Self::path_for(dir, table);
        let tmp_path = path.with_extension(format!("{}.tmp", INDEX_FILE_EXT));
        let mut guard = TmpGuard {
            path: tmp_path.clone(),
            armed: true,
        };

        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(&header(STATE_INCOMPLETE, 0, 0))?;

        let (data_len, checksum) = {
            let mut cw = ChecksumWriter::new(&mut file);
            bincode::serialize_into(&mut cw, records).map_err(|e| {
                CacheError::IndexBuildFailure {
                    table: table.to_string(),
                    reason: format!("serialize index file: {}", e),
                }
            })?;
            cw.finish()
        };

        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header(STATE_COMMITTED, data_len, checksum))?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&tmp_path, &path)?;
        guard.armed = false;

        tracing::debug!(
            "Index file written: {:?} ({} entries, {} bytes)",
            path,
            records.len(),
            HEADER_SIZE as u64 + data_len
        );
        let stamp = stamp_of(&path);
        Ok(Self { path, stamp })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 文件仍在且内容完整（被外部删除或改写即视为失效，只能重建）。元数据与落盘时一致则直接认可，否则整文件重新校验。
    pub fn is_intact(&self) -> bool {
        let Some(now) = stamp_of(&self.path) else {
            return false;
        };
        if self.stamp == Some(now) {
            return true;
        }
        matches!(self.load(), Ok(Some(_)))
    }

    /// 读取并校验（magic/version/state/len/checksum）；任何不一致返回 None
    pub fn load(&self) -> Result<Option<Vec<IndexRecord>>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = std::fs::read(&self.path)?;
        if data.len() < HEADER_SIZE {
            tracing::warn!("Index file too small, ignoring: {:?}", self.path);
            return Ok(None);
        }

        let le_u32 = |r: std::ops::Range<usize>| {
            data[r].try_into().map(u32::from_le_bytes).unwrap_or(0)
        };
        let le_u64 = |r: std::ops::Range<usize>| {
            data[r].try_into().map(u64::from_le_bytes).unwrap_or(0)
        };
        let magic = le_u32(0..4);
        let version = le_u32(4..8);
        let state = le_u32(8..12);
        let data_len = le_u64(12..20) as usize;
        let stored = le_u64(20..28);

        if magic != MAGIC || version != VERSION_CURRENT {
            tracing::warn!(
                "Index file header mismatch: magic={:#x} version={}",
                magic,
                version
            );
            return Ok(None);
        }
        if state != STATE_COMMITTED {
            tracing::warn!("Index file state INCOMPLETE, ignoring");
            return Ok(None);
        }
        let body = &data[HEADER_SIZE..];
        if body.len() != data_len {
            tracing::warn!("Index file data length mismatch");
            return Ok(None);
        }
        let computed = xxh3_64(body);
        if computed != stored {
            tracing::warn!("Index file checksum mismatch: {} != {}", computed, stored);
            return Ok(None);
        }

        match bincode::deserialize::<Vec<IndexRecord>>(body) {
            Ok(v) => Ok(Some(v)),
            Err(e) => {
                tracing::warn!("Index file deserialize failed: {}", e);
                Ok(None)
            }
        }
    }

    /// 立即删除（best-effort）；返回是否确实删除了文件
    pub fn discard(&self) -> bool {
        match std::fs::remove_file(&self.path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                tracing::warn!("Failed to delete index file {:?}: {}", self.path, e);
                false
            }
        }
    }
}

impl Drop for IndexFile {
    fn drop(&mut self) {
        self.discard();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Envelope, IdentifierCase, RowIdentity};

    fn unique_tmp_dir(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("rowset-cache-file-{}-{}", tag, nanos))
    }

    fn records() -> Vec<IndexRecord> {
        (1..=5)
            .map(|i| IndexRecord {
                id: RowIdentity(i),
                envelope: Envelope::point(i as f64, 0.0),
            })
            .collect()
    }

    #[test]
    fn write_load_and_drop_deletes() {
        let dir = unique_tmp_dir("basic");
        let t = TableReference::parse("public.roads", IdentifierCase::Lower).unwrap();
        let f = IndexFile::write(&dir, &t, &records()).unwrap();
        let path = f.path().to_path_buf();
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("public_roads-"));
        assert_eq!(f.load().unwrap().unwrap(), records());

        // 无 tmp 残留
        let leftovers: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());

        drop(f);
        assert!(!path.exists());
    }

    #[test]
    fn corrupted_body_is_rejected() {
        let dir = unique_tmp_dir("corrupt");
        let t = TableReference::new(None, "t");
        let f = IndexFile::write(&dir, &t, &records()).unwrap();
        let mut bytes = std::fs::read(f.path()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(f.path(), &bytes).unwrap();
        assert!(f.load().unwrap().is_none());
    }

    #[test]
    fn truncated_or_extended_file_is_not_intact() {
        let dir = unique_tmp_dir("intact");
        let t = TableReference::new(None, "t");
        let f = IndexFile::write(&dir, &t, &records()).unwrap();
        assert!(f.is_intact());

        let mut bytes = std::fs::read(f.path()).unwrap();
        bytes.extend_from_slice(b"junk");
        std::fs::write(f.path(), &bytes).unwrap();
        assert!(!f.is_intact());

        std::fs::remove_file(f.path()).unwrap();
        assert!(!f.is_intact());
    }

    #[test]
    fn externally_deleted_file_is_gone() {
        let dir = unique_tmp_dir("deleted");
        let t = TableReference::new(None, "t");
        let f = IndexFile::write(&dir, &t, &records()).unwrap();
        std::fs::remove_file(f.path()).unwrap();
        assert!(!f.is_intact());
        assert!(f.load().unwrap().is_none());
        assert!(!f.discard());
    }

    #[test]
    fn names_are_unique() {
        let dir = unique_tmp_dir("names");
        let t = TableReference::new(None, "t");
        let a = IndexFile::path_for(&dir, &t);
        let b = IndexFile::path_for(&dir, &t);
        assert_ne!(a, b);
    }
}
