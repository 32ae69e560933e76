use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::core::{envelope, Envelope, IdentifierCase, Row, RowIdentity, TableReference, Value};
use crate::error::{CacheError, Result};
use crate::source::{DataSource, GeometryScan, SqlCursor};

/// 内存表：列定义 + 行（按插入顺序即物理顺序）
#[derive(Clone, Debug, Default)]
pub struct MemoryTable {
    columns: Vec<String>,
    primary_key: Option<String>,
    geometry_column: Option<String>,
    rows: Vec<Vec<Value>>,
}

impl MemoryTable {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_primary_key(mut self, col: &str) -> Self {
        self.primary_key = Some(col.to_string());
        self
    }

    pub fn with_geometry_column(mut self, col: &str) -> Self {
        self.geometry_column = Some(col.to_string());
        self
    }

    pub fn push_row(&mut self, values: Vec<Value>) {
        self.rows.push(values);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    fn identity_at(&self, pk_col: Option<usize>, ordinal: usize) -> Result<RowIdentity> {
        match pk_col {
            Some(c) => self.rows[ordinal]
                .get(c)
                .and_then(Value::as_i64)
                .map(RowIdentity)
                .ok_or_else(|| {
                    CacheError::QueryFailure(format!(
                        "non-integer primary key at row {}",
                        ordinal + 1
                    ))
                }),
            None => Ok(RowIdentity(ordinal as i64 + 1)),
        }
    }
}

/// 进程内数据源：测试与 demo 使用，支持故障注入与调用计数
pub struct MemoryDataSource {
    tables: RwLock<HashMap<TableReference, Arc<MemoryTable>>>,
    case: IdentifierCase,
    fail_queries: Arc<AtomicBool>,
    cursors_opened: AtomicU64,
    open_cursors: Arc<AtomicI64>,
    fetch_calls: Arc<AtomicU64>,
    geometry_scans: AtomicU64,
}

impl Default for MemoryDataSource {
    fn default() -> Self {
        Self::new(IdentifierCase::Lower)
    }
}

impl MemoryDataSource {
    pub fn new(case: IdentifierCase) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            case,
            fail_queries: Arc::new(AtomicBool::new(false)),
            cursors_opened: AtomicU64::new(0),
            open_cursors: Arc::new(AtomicI64::new(0)),
            fetch_calls: Arc::new(AtomicU64::new(0)),
            geometry_scans: AtomicU64::new(0),
        }
    }

    /// 注册（或替换）一张表
    pub fn register(&self, name: &str, table: MemoryTable) -> Result<TableReference> {
        let key = TableReference::parse(name, self.case)?;
        self.tables.write().insert(key.clone(), Arc::new(table));
        Ok(key)
    }

    /// 之后的所有查询都返回 `QueryFailure`
    pub fn set_fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    pub fn cursors_opened(&self) -> u64 {
        self.cursors_opened.load(Ordering::SeqCst)
    }

    pub fn open_cursors(&self) -> i64 {
        self.open_cursors.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> u64 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn geometry_scans(&self) -> u64 {
        self.geometry_scans.load(Ordering::SeqCst)
    }

    fn table(&self, table: &TableReference) -> Result<Arc<MemoryTable>> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(CacheError::QueryFailure(format!(
                "injected failure for {}",
                table
            )));
        }
        self.tables
            .read()
            .get(table)
            .cloned()
            .ok_or_else(|| CacheError::QueryFailure(format!("relation {} does not exist", table)))
    }
}

impl DataSource for MemoryDataSource {
    fn identifier_case(&self) -> IdentifierCase {
        self.case
    }

    fn primary_key_column(&self, table: &TableReference) -> Result<Option<String>> {
        Ok(self.table(table)?.primary_key.clone())
    }

    fn geometry_column(&self, table: &TableReference) -> Result<Option<String>> {
        Ok(self.table(table)?.geometry_column.clone())
    }

    fn open_cursor(
        &self,
        table: &TableReference,
        primary_key: Option<&str>,
    ) -> Result<Box<dyn SqlCursor>> {
        let data = self.table(table)?;
        let pk_col = match primary_key {
            Some(pk) => Some(data.column_index(pk).ok_or_else(|| {
                CacheError::QueryFailure(format!("column {} does not exist in {}", pk, table))
            })?),
            None => None,
        };
        self.cursors_opened.fetch_add(1, Ordering::SeqCst);
        self.open_cursors.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryCursor {
            data,
            pk_col,
            closed: false,
            fail: self.fail_queries.clone(),
            open_cursors: self.open_cursors.clone(),
            fetch_calls: self.fetch_calls.clone(),
        }))
    }

    fn scan_geometry(
        &self,
        table: &TableReference,
        geometry_column: &str,
        primary_key: Option<&str>,
    ) -> Result<GeometryScan> {
        let data = self.table(table)?;
        let geom = data.column_index(geometry_column).ok_or_else(|| {
            CacheError::QueryFailure(format!("column {} does not exist", geometry_column))
        })?;
        let pk_col = primary_key.and_then(|pk| data.column_index(pk));
        self.geometry_scans.fetch_add(1, Ordering::SeqCst);

        let total = data.len() as u64;
        let fail = self.fail_queries.clone();
        let rows = (0..data.len()).filter_map(move |i| {
            if fail.load(Ordering::SeqCst) {
                return Some(Err(CacheError::QueryFailure(
                    "connection lost during geometry scan".into(),
                )));
            }
            let env = data.rows[i].get(geom).and_then(Value::as_envelope).copied()?;
            Some(data.identity_at(pk_col, i).map(|id| (id, env)))
        });
        Ok(GeometryScan {
            total: Some(total),
            rows: Box::new(rows),
        })
    }

    fn table_envelope(
        &self,
        table: &TableReference,
        geometry_column: &str,
    ) -> Result<Option<Envelope>> {
        let data = self.table(table)?;
        let Some(geom) = data.column_index(geometry_column) else {
            return Ok(None);
        };
        Ok(envelope::union_all(
            data.rows.iter().filter_map(|r| r.get(geom).and_then(Value::as_envelope)),
        ))
    }
}

struct MemoryCursor {
    data: Arc<MemoryTable>,
    pk_col: Option<usize>,
    closed: bool,
    fail: Arc<AtomicBool>,
    open_cursors: Arc<AtomicI64>,
    fetch_calls: Arc<AtomicU64>,
}

impl MemoryCursor {
    fn check(&self) -> Result<()> {
        if self.closed {
            return Err(CacheError::QueryFailure("cursor is closed".into()));
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(CacheError::QueryFailure("injected failure".into()));
        }
        Ok(())
    }
}

impl SqlCursor for MemoryCursor {
    fn row_count(&mut self) -> Result<usize> {
        self.check()?;
        Ok(self.data.len())
    }

    fn fetch(&mut self, offset: usize, limit: usize) -> Result<Vec<Row>> {
        self.check()?;
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let end = offset.saturating_add(limit).min(self.data.len());
        (offset.min(end)..end)
            .map(|i| {
                Ok(Row {
                    identity: self.data.identity_at(self.pk_col, i)?,
                    values: self.data.rows[i].clone(),
                })
            })
            .collect()
    }

    fn identities(&mut self) -> Result<Vec<RowIdentity>> {
        self.check()?;
        (0..self.data.len())
            .map(|i| self.data.identity_at(self.pk_col, i))
            .collect()
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.open_cursors.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MemoryCursor {
    fn drop(&mut self) {
        self.close();
    }
}
