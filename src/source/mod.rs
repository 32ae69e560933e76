pub mod memory;

use crate::core::{Envelope, IdentifierCase, Row, RowIdentity, TableReference};
use crate::error::Result;

/// 连接绑定的物理 SQL 游标（后端数据库客户端提供）
///
/// ## 契约
/// - 行号均为 0-based 物理行号，顺序在游标生命周期内稳定。
/// - `close` 之后的任何调用都应返回 `QueryFailure`；上层负责按需重开。
pub trait SqlCursor: Send {
    fn row_count(&mut self) -> Result<usize>;

    /// 读取物理行 `[offset, offset + limit)`，越界部分截断
    fn fetch(&mut self, offset: usize, limit: usize) -> Result<Vec<Row>>;

    /// 按物理顺序返回所有行身份（主键列的单列扫描）
    fn identities(&mut self) -> Result<Vec<RowIdentity>>;

    fn close(&mut self);
}

/// 几何列的单次前向扫描
pub struct GeometryScan {
    /// 已知时用于进度汇报
    pub total: Option<u64>,
    pub rows: Box<dyn Iterator<Item = Result<(RowIdentity, Envelope)>> + Send>,
}

/// 后端数据源：连接 + 元数据查询
pub trait DataSource: Send + Sync {
    /// 未加引号标识符的大小写规则
    fn identifier_case(&self) -> IdentifierCase {
        IdentifierCase::Lower
    }

    fn primary_key_column(&self, table: &TableReference) -> Result<Option<String>>;

    fn geometry_column(&self, table: &TableReference) -> Result<Option<String>>;

    fn open_cursor(
        &self,
        table: &TableReference,
        primary_key: Option<&str>,
    ) -> Result<Box<dyn SqlCursor>>;

    fn scan_geometry(
        &self,
        table: &TableReference,
        geometry_column: &str,
        primary_key: Option<&str>,
    ) -> Result<GeometryScan>;

    /// 整表范围（通常来自几何列统计/元数据）
    fn table_envelope(
        &self,
        table: &TableReference,
        geometry_column: &str,
    ) -> Result<Option<Envelope>>;
}

pub use memory::{MemoryDataSource, MemoryTable};
