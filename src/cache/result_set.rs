use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::cache::lock::{LockCoordinator, OwnedGuard};
use crate::cache::planner::{AccessPath, QueryPlan, QueryPlanner};
use crate::core::{Envelope, ProgressMonitor, TableReference};
use crate::cursor::RowCursor;
use crate::error::{CacheError, Result};
use crate::index::SpatialIndex;
use crate::stats::CacheCounters;

/// renderer 侧契约：每次 `execute` 之后必须恰好调用一次 `close`（无论成败）
pub trait ResultSetProvider {
    /// 返回已按视图框过滤并回到首行之前的可滚动游标
    fn execute(&mut self, progress: &dyn ProgressMonitor, envelope: &Envelope)
        -> Result<&mut RowCursor>;

    /// 释放读锁；从不关闭底层游标（游标归缓存所有）
    fn close(&mut self);
}

/// 缓存中某张表的一次只读视图
pub struct CachedResultSet {
    table: TableReference,
    cursor: LockCoordinator<RowCursor>,
    index: Option<Arc<SpatialIndex>>,
    envelope: Option<Envelope>,
    planner: QueryPlanner,
    counters: Arc<CacheCounters>,
    guard: Option<OwnedGuard<RowCursor>>,
    last_plan: Option<QueryPlan>,
}

impl CachedResultSet {
    pub(crate) fn new(
        table: TableReference,
        cursor: LockCoordinator<RowCursor>,
        index: Option<Arc<SpatialIndex>>,
        envelope: Option<Envelope>,
        planner: QueryPlanner,
        counters: Arc<CacheCounters>,
    ) -> Self {
        Self {
            table,
            cursor,
            index,
            envelope,
            planner,
            counters,
            guard: None,
            last_plan: None,
        }
    }

    pub fn table(&self) -> &TableReference {
        &self.table
    }

    pub fn index(&self) -> Option<&SpatialIndex> {
        self.index.as_deref()
    }

    /// 整表范围
    pub fn envelope(&self) -> Option<&Envelope> {
        self.envelope.as_ref()
    }

    pub fn last_plan(&self) -> Option<QueryPlan> {
        self.last_plan
    }

    pub fn is_executing(&self) -> bool {
        self.guard.is_some()
    }

    fn reposition(&mut self, envelope: &Envelope) -> Result<QueryPlan> {
        if self.guard.is_none() {
            let g = self.cursor.acquire_owned().map_err(|e| {
                CacheCounters::bump(&self.counters.busy_rejections);
                match e {
                    CacheError::ResourceBusy { waited, .. } => CacheError::ResourceBusy {
                        resource: self.table.to_string(),
                        waited,
                    },
                    other => other,
                }
            })?;
            self.guard = Some(g);
        }
        let cursor = self
            .guard
            .as_deref_mut()
            .ok_or(CacheError::NotInitialized)?;
        self.planner.reposition(
            cursor,
            envelope,
            self.envelope.as_ref(),
            self.index.as_deref(),
        )
    }
}

impl fmt::Debug for CachedResultSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedResultSet")
            .field("table", &self.table)
            .field("index", &self.index)
            .field("envelope", &self.envelope)
            .field("executing", &self.guard.is_some())
            .field("last_plan", &self.last_plan)
            .finish()
    }
}

impl ResultSetProvider for CachedResultSet {
    fn execute(
        &mut self,
        progress: &dyn ProgressMonitor,
        envelope: &Envelope,
    ) -> Result<&mut RowCursor> {
        if progress.is_cancelled() {
            return Err(CacheError::Cancelled {
                table: self.table.to_string(),
            });
        }
        progress.start("execute", None);
        match self.reposition(envelope) {
            Ok(plan) => {
                let counter = match plan.path {
                    AccessPath::IndexLookup => &self.counters.index_executions,
                    AccessPath::FullScan => &self.counters.full_scan_executions,
                };
                CacheCounters::bump(counter);
                self.last_plan = Some(plan);
                progress.finish();
            }
            Err(e) => {
                // 失败时立即放锁，close 变为空操作
                self.guard = None;
                return Err(e);
            }
        }
        match self.guard.as_deref_mut() {
            Some(cursor) => Ok(cursor),
            None => Err(CacheError::NotInitialized),
        }
    }

    fn close(&mut self) {
        // 读锁释放前按 close delay 收尾；被 clear/remove 的游标 delay 为 0，在此立即关闭
        if let Some(mut cursor) = self.guard.take() {
            if cursor.is_open() && cursor.release_if_idle(Instant::now()) {
                CacheCounters::bump(&self.counters.cursors_released);
            }
        }
    }
}

impl Drop for CachedResultSet {
    fn drop(&mut self) {
        self.close();
    }
}
