use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwapOption;
use dashmap::{DashMap, DashSet};

use crate::cache::lock::LockCoordinator;
use crate::cache::planner::QueryPlanner;
use crate::cache::result_set::CachedResultSet;
use crate::config::CacheConfig;
use crate::core::{Envelope, ProgressMonitor, TableReference};
use crate::cursor::{CloseDelay, FetchDirection, RowCursor};
use crate::error::{CacheError, Result};
use crate::index::{IndexBuildRequest, IndexProvider, RTreeIndexProvider, SpatialIndex};
use crate::source::DataSource;
use crate::stats::{CacheCounters, CacheStats};

/// 每张表一份：游标 + 元数据 + 整表范围
pub struct CacheEntry {
    table: TableReference,
    cursor: LockCoordinator<RowCursor>,
    close_delay: CloseDelay,
    primary_key: Option<String>,
    geometry_column: Option<String>,
    envelope: Option<Envelope>,
    created_at: Instant,
}

impl CacheEntry {
    pub fn table(&self) -> &TableReference {
        &self.table
    }

    pub fn primary_key(&self) -> Option<&str> {
        self.primary_key.as_deref()
    }

    pub fn geometry_column(&self) -> Option<&str> {
        self.geometry_column.as_deref()
    }

    pub fn envelope(&self) -> Option<&Envelope> {
        self.envelope.as_ref()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// 物理 SQL 游标是否打开（被读者占用时按打开计）
    pub fn is_cursor_open(&self) -> bool {
        self.cursor.try_acquire().map_or(true, |c| c.is_open())
    }

    /// 立即释放（空闲的）物理游标
    fn evict_now(&self) -> bool {
        self.close_delay.set_ms(0);
        self.cursor
            .try_acquire()
            .is_some_and(|mut c| c.release())
    }
}

struct IndexSettings {
    provider: Arc<dyn IndexProvider>,
    cache_dir: PathBuf,
}

/// table reference -> 行游标 / 空间索引 的进程内缓存
///
/// ## 锁
/// - 容器锁：串行化 entry 创建与空间索引构建。构建某张表的索引（一次全表扫描）期间，
///   其他任何表的 `get_result_set_provider` 都会排队等待；这是已知的串行点。
/// - per-cursor 读锁：由 `CachedResultSet::execute` 持有到 `close`，
///   同一张表的并发重绘经此串行，始终只有一个物理 SQL 游标。
pub struct ResultSetCache {
    source: Arc<dyn DataSource>,
    config: CacheConfig,
    container: LockCoordinator<()>,
    entries: DashMap<TableReference, Arc<CacheEntry>>,
    indexes: DashMap<TableReference, Arc<SpatialIndex>>,
    /// 构建失败过的表：不再重扫，直到换工厂 / clear / remove
    failed_indexes: DashSet<TableReference>,
    index_settings: ArcSwapOption<IndexSettings>,
    planner: QueryPlanner,
    counters: Arc<CacheCounters>,
}

impl ResultSetCache {
    pub fn new(source: Arc<dyn DataSource>, config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let settings = config.spatial_index.then(|| {
            Arc::new(IndexSettings {
                provider: Arc::new(RTreeIndexProvider::default()) as Arc<dyn IndexProvider>,
                cache_dir: config.cache_dir.clone(),
            })
        });
        Ok(Self {
            source,
            container: LockCoordinator::new("result set cache", (), config.lock_timeout()),
            entries: DashMap::new(),
            indexes: DashMap::new(),
            failed_indexes: DashSet::new(),
            index_settings: ArcSwapOption::new(settings),
            planner: QueryPlanner::new(config.index_threshold),
            counters: Arc::new(CacheCounters::default()),
            config,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn source(&self) -> &Arc<dyn DataSource> {
        &self.source
    }

    fn canonicalize(&self, layer: &str) -> Result<TableReference> {
        TableReference::parse(layer, self.source.identifier_case())
    }

    fn acquire_container(&self) -> Result<parking_lot::MutexGuard<'_, ()>> {
        self.container.acquire().map_err(|e| {
            CacheCounters::bump(&self.counters.busy_rejections);
            e
        })
    }

    /// 取得（必要时创建）某图层的结果集；若配置了索引工厂且索引尚不存在，在容器锁内阻塞构建
    pub fn get_result_set_provider(
        &self,
        layer: &str,
        progress: &dyn ProgressMonitor,
    ) -> Result<CachedResultSet> {
        self.sweep_idle();

        let container = self.acquire_container()?;
        let table = self.canonicalize(layer)?;

        let entry = match self.entries.get(&table).map(|e| e.value().clone()) {
            Some(e) => e,
            None => {
                let e = Arc::new(self.create_entry(&table, progress)?);
                self.entries.insert(table.clone(), e.clone());
                e
            }
        };
        let index = self.ensure_index(&entry, progress)?;
        drop(container);

        let envelope = entry
            .envelope
            .or_else(|| index.as_ref().and_then(|i| i.extent()));
        Ok(CachedResultSet::new(
            table,
            entry.cursor.clone(),
            index,
            envelope,
            self.planner,
            self.counters.clone(),
        ))
    }

    fn create_entry(&self, table: &TableReference, progress: &dyn ProgressMonitor) -> Result<CacheEntry> {
        let primary_key = self.source.primary_key_column(table)?;
        let geometry_column = self.source.geometry_column(table)?;
        let envelope = match geometry_column.as_deref() {
            Some(g) => self.source.table_envelope(table, g)?,
            None => None,
        };

        let mut cursor = RowCursor::new(self.source.clone());
        cursor.set_fetch_size(self.config.fetch_size);
        cursor.set_fetch_direction(FetchDirection::Forward);
        cursor.set_close_delay(self.config.close_delay_ms);
        cursor.initialize(table, primary_key.as_deref(), progress)?;
        let close_delay = cursor.close_delay();

        CacheCounters::bump(&self.counters.entries_created);
        tracing::info!(
            "Cache entry created for {} (pk={:?}, geom={:?})",
            table,
            primary_key,
            geometry_column
        );
        Ok(CacheEntry {
            table: table.clone(),
            cursor: LockCoordinator::new(
                format!("cursor {}", table),
                cursor,
                self.config.read_lock_timeout(),
            ),
            close_delay,
            primary_key,
            geometry_column,
            envelope,
            created_at: Instant::now(),
        })
    }

    /// 调用方已持有容器锁。构建失败降级为无索引（Ok(None)）；取消则上抛。
    fn ensure_index(
        &self,
        entry: &CacheEntry,
        progress: &dyn ProgressMonitor,
    ) -> Result<Option<Arc<SpatialIndex>>> {
        let Some(settings) = self.index_settings.load_full() else {
            return Ok(None);
        };
        let Some(geometry_column) = entry.geometry_column.as_deref() else {
            return Ok(None);
        };

        if let Some(idx) = self.indexes.get(&entry.table).map(|i| i.value().clone()) {
            if idx.is_valid() {
                return Ok(Some(idx));
            }
            tracing::info!("Index file for {} is missing or corrupt, rebuilding", entry.table);
            self.indexes.remove(&entry.table);
        }
        if self.failed_indexes.contains(&entry.table) {
            return Ok(None);
        }

        let built = settings.provider.build(IndexBuildRequest {
            source: self.source.as_ref(),
            table: &entry.table,
            geometry_column,
            primary_key: entry.primary_key.as_deref(),
            cache_dir: &settings.cache_dir,
            progress,
        });
        match built {
            Ok(idx) => {
                CacheCounters::bump(&self.counters.index_builds);
                let idx = Arc::new(idx);
                self.indexes.insert(entry.table.clone(), idx.clone());
                Ok(Some(idx))
            }
            Err(e @ CacheError::Cancelled { .. }) => {
                CacheCounters::bump(&self.counters.index_builds_cancelled);
                tracing::info!("Spatial index build cancelled for {}", entry.table);
                Err(e)
            }
            Err(e) => {
                CacheCounters::bump(&self.counters.index_build_failures);
                self.failed_indexes.insert(entry.table.clone());
                tracing::warn!("{}; falling back to full scans", e);
                Ok(None)
            }
        }
    }

    /// 替换索引工厂；现有索引全部失效并删除其备份文件（best-effort）
    pub fn set_index_provider(
        &self,
        provider: Option<Arc<dyn IndexProvider>>,
        cache_dir: PathBuf,
    ) -> Result<()> {
        let _container = self.acquire_container()?;
        let name = provider.as_ref().map(|p| p.name().to_string());
        self.index_settings
            .store(provider.map(|provider| Arc::new(IndexSettings { provider, cache_dir })));
        let dropped = self.invalidate_indexes();
        tracing::info!(
            "Index provider set to {:?}; {} indexes invalidated",
            name,
            dropped
        );
        Ok(())
    }

    fn invalidate_indexes(&self) -> usize {
        self.failed_indexes.clear();
        let tables: Vec<TableReference> = self.indexes.iter().map(|e| e.key().clone()).collect();
        let mut dropped = 0;
        for t in tables {
            if let Some((_, idx)) = self.indexes.remove(&t) {
                // 正在读的 CachedResultSet 仍持有内存树；文件此刻就删
                idx.discard_file();
                dropped += 1;
            }
        }
        dropped
    }

    /// 失效全部索引，所有游标 close delay 置 0；不强关正在使用的游标
    pub fn clear_cache(&self) -> Result<()> {
        let _container = self.acquire_container()?;
        let indexes = self.invalidate_indexes();
        let tables: Vec<TableReference> = self.entries.iter().map(|e| e.key().clone()).collect();
        let mut released = 0;
        for t in &tables {
            if let Some((_, entry)) = self.entries.remove(t) {
                if entry.evict_now() {
                    released += 1;
                }
            }
        }
        for _ in 0..released {
            CacheCounters::bump(&self.counters.cursors_released);
        }
        tracing::info!(
            "Cache cleared: {} entries, {} indexes, {} cursors released",
            tables.len(),
            indexes,
            released
        );
        Ok(())
    }

    /// 移除单个 entry；规范化后的查找失败时，剥离 `public` schema 再试一次。
    /// 条目本就不存在不算错误。
    pub fn remove_cache(&self, layer: &str) -> Result<bool> {
        let _container = self.acquire_container()?;
        let table = self.canonicalize(layer)?;
        if self.evict(&table) {
            return Ok(true);
        }
        match table.without_default_schema() {
            Some(bare) => Ok(self.evict(&bare)),
            None => Ok(false),
        }
    }

    fn evict(&self, table: &TableReference) -> bool {
        let entry = self.entries.remove(table);
        let index = self.indexes.remove(table);
        self.failed_indexes.remove(table);
        if let Some((_, idx)) = &index {
            idx.discard_file();
        }
        if let Some((_, e)) = &entry {
            if e.evict_now() {
                CacheCounters::bump(&self.counters.cursors_released);
            }
            tracing::info!("Cache entry removed for {}", table);
        }
        entry.is_some() || index.is_some()
    }

    /// 释放所有空闲超过 close delay 的物理游标（跳过正被读者持有的）
    pub fn sweep_idle(&self) -> usize {
        let now = Instant::now();
        let mut released = 0;
        for e in self.entries.iter() {
            if let Some(mut c) = e.value().cursor.try_acquire() {
                if c.is_open() && c.release_if_idle(now) {
                    released += 1;
                }
            }
        }
        for _ in 0..released {
            CacheCounters::bump(&self.counters.cursors_released);
        }
        if released > 0 {
            tracing::debug!("Idle sweep released {} cursors", released);
        }
        released
    }

    pub fn entry(&self, layer: &str) -> Option<Arc<CacheEntry>> {
        let table = self.canonicalize(layer).ok()?;
        self.entries.get(&table).map(|e| e.value().clone())
    }

    pub fn index(&self, layer: &str) -> Option<Arc<SpatialIndex>> {
        let table = self.canonicalize(layer).ok()?;
        self.indexes.get(&table).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let mut s = CacheStats {
            entries: self.entries.len(),
            ..Default::default()
        };
        for e in self.entries.iter() {
            if e.value().is_cursor_open() {
                s.open_cursors += 1;
            }
        }
        for i in self.indexes.iter() {
            if i.value().is_valid() {
                s.indexes += 1;
                s.index_entries += i.value().len();
            }
        }
        s.with_counters(&self.counters)
    }
}
