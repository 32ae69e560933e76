use std::path::Path;

use crate::core::{ProgressMonitor, TableReference};
use crate::error::{CacheError, Result};
use crate::index::spatial::{IndexRecord, SpatialIndex};
use crate::source::DataSource;
use crate::storage::IndexFile;

/// 一次索引构建需要的全部上下文
pub struct IndexBuildRequest<'a> {
    pub source: &'a dyn DataSource,
    pub table: &'a TableReference,
    pub geometry_column: &'a str,
    pub primary_key: Option<&'a str>,
    pub cache_dir: &'a Path,
    pub progress: &'a dyn ProgressMonitor,
}

/// 空间索引工厂
///
/// ## 契约
/// - 取消时返回 `Cancelled`，且不落盘任何东西。
/// - 其他失败统一为 `IndexBuildFailure`（调用方据此降级为全表扫描）。
pub trait IndexProvider: Send + Sync {
    fn name(&self) -> &str;

    fn build(&self, req: IndexBuildRequest<'_>) -> Result<SpatialIndex>;
}

/// 默认实现：单次前向扫描几何列 -> R*-tree 批量装载 + 备份文件
#[derive(Debug, Clone)]
pub struct RTreeIndexProvider {
    persist: bool,
}

impl Default for RTreeIndexProvider {
    fn default() -> Self {
        Self { persist: true }
    }
}

impl RTreeIndexProvider {
    /// 不写备份文件的纯内存变体
    pub fn in_memory() -> Self {
        Self { persist: false }
    }

    fn scan(&self, req: &IndexBuildRequest<'_>) -> Result<Vec<IndexRecord>> {
        let scan = req
            .source
            .scan_geometry(req.table, req.geometry_column, req.primary_key)?;
        req.progress.start("build spatial index", scan.total);

        let mut records = Vec::with_capacity(scan.total.unwrap_or(0) as usize);
        for item in scan.rows {
            if req.progress.is_cancelled() {
                return Err(CacheError::Cancelled {
                    table: req.table.to_string(),
                });
            }
            let (id, envelope) = item?;
            // NaN/Inf 几何无法进树，跳过
            if envelope.is_finite() {
                records.push(IndexRecord { id, envelope });
            }
            req.progress.advance(1);
        }
        if req.progress.is_cancelled() {
            return Err(CacheError::Cancelled {
                table: req.table.to_string(),
            });
        }
        Ok(records)
    }
}

impl IndexProvider for RTreeIndexProvider {
    fn name(&self) -> &str {
        if self.persist {
            "rtree"
        } else {
            "rtree-memory"
        }
    }

    fn build(&self, req: IndexBuildRequest<'_>) -> Result<SpatialIndex> {
        let as_build_failure = |e: CacheError| match e {
            CacheError::Cancelled { .. } | CacheError::IndexBuildFailure { .. } => e,
            other => CacheError::IndexBuildFailure {
                table: req.table.to_string(),
                reason: other.to_string(),
            },
        };

        let records = self.scan(&req).map_err(as_build_failure)?;
        let file = if self.persist {
            Some(IndexFile::write(req.cache_dir, req.table, &records).map_err(as_build_failure)?)
        } else {
            None
        };
        req.progress.finish();

        tracing::info!(
            "Spatial index built for {}: {} entries ({})",
            req.table,
            records.len(),
            self.name()
        );
        Ok(SpatialIndex::bulk_load(req.table.clone(), records, file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CancellableProgress, Envelope, NullProgress, Value};
    use crate::source::{MemoryDataSource, MemoryTable};

    fn unique_tmp_dir(tag: &str) -> std::path::PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("rowset-cache-provider-{}-{}", tag, nanos))
    }

    fn source(n: i64) -> (MemoryDataSource, TableReference) {
        let src = MemoryDataSource::default();
        let mut t = MemoryTable::new(["gid", "geom"])
            .with_primary_key("gid")
            .with_geometry_column("geom");
        for i in 1..=n {
            t.push_row(vec![
                Value::Integer(i),
                if i % 10 == 0 {
                    Value::Null
                } else {
                    Value::Geometry(Envelope::point(i as f64, 0.0))
                },
            ]);
        }
        let key = src.register("parcels", t).unwrap();
        (src, key)
    }

    #[test]
    fn builds_index_and_backing_file() {
        let (src, key) = source(50);
        let dir = unique_tmp_dir("build");
        let progress = CancellableProgress::new();
        let idx = RTreeIndexProvider::default()
            .build(IndexBuildRequest {
                source: &src,
                table: &key,
                geometry_column: "geom",
                primary_key: Some("gid"),
                cache_dir: &dir,
                progress: &progress,
            })
            .unwrap();
        // 每 10 行一个 NULL 几何
        assert_eq!(idx.len(), 45);
        assert_eq!(progress.total(), 50);
        assert_eq!(progress.done(), 45);
        let path = idx.file_path().unwrap().to_path_buf();
        assert!(path.exists());
        drop(idx);
        assert!(!path.exists());
    }

    #[test]
    fn cancellation_discards_partial_index() {
        let (src, key) = source(100);
        let dir = unique_tmp_dir("cancel");
        let progress = CancellableProgress::cancel_after(10);
        let err = RTreeIndexProvider::default()
            .build(IndexBuildRequest {
                source: &src,
                table: &key,
                geometry_column: "geom",
                primary_key: Some("gid"),
                cache_dir: &dir,
                progress: &progress,
            })
            .unwrap_err();
        assert!(err.is_cancelled());
        // 什么都没落盘
        let files = std::fs::read_dir(&dir).map(|d| d.count()).unwrap_or(0);
        assert_eq!(files, 0);
    }

    #[test]
    fn scan_failure_becomes_build_failure() {
        let (src, key) = source(5);
        src.set_fail_queries(true);
        let dir = unique_tmp_dir("fail");
        let err = RTreeIndexProvider::in_memory()
            .build(IndexBuildRequest {
                source: &src,
                table: &key,
                geometry_column: "geom",
                primary_key: None,
                cache_dir: &dir,
                progress: &NullProgress,
            })
            .unwrap_err();
        assert!(matches!(err, CacheError::IndexBuildFailure { .. }));
    }
}
