use serde::Serialize;

use crate::core::Envelope;
use crate::cursor::RowCursor;
use crate::error::Result;
use crate::index::SpatialIndex;

/// 默认阈值：视图覆盖整表范围不足一半时才走索引
pub const DEFAULT_INDEX_THRESHOLD: f64 = 0.5;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub enum AccessPath {
    /// 索引查出相交行身份 -> 设为游标过滤
    IndexLookup,
    /// 清空过滤，顺序扫已打开的游标
    FullScan,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct QueryPlan {
    pub path: AccessPath,
    /// area(query ∩ table) / area(table)
    pub ratio: f64,
}

/// `area(query ∩ table) / area(table)`
///
/// 退化（面积为 0）的整表范围：相交记 1.0，不相交记 0.0。
pub fn coverage_ratio(query: &Envelope, table: &Envelope) -> f64 {
    let Some(inter) = query.intersection(table) else {
        return 0.0;
    };
    let table_area = table.area();
    if table_area <= 0.0 || !table_area.is_finite() {
        return 1.0;
    }
    (inter.area() / table_area).clamp(0.0, 1.0)
}

/// 索引 vs 全表扫描的启发式规划器（阈值是可调常数，不做自适应）
#[derive(Copy, Clone, Debug)]
pub struct QueryPlanner {
    threshold: f64,
}

impl Default for QueryPlanner {
    fn default() -> Self {
        Self::new(DEFAULT_INDEX_THRESHOLD)
    }
}

impl QueryPlanner {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn plan(&self, query: &Envelope, table: Option<&Envelope>, has_index: bool) -> QueryPlan {
        let ratio = table.map_or(1.0, |t| coverage_ratio(query, t));
        let path = if has_index && ratio < self.threshold {
            AccessPath::IndexLookup
        } else {
            AccessPath::FullScan
        };
        QueryPlan { path, ratio }
    }

    /// 规划并重新定位游标：设置（或清除）过滤，然后回到首行之前
    pub fn reposition(
        &self,
        cursor: &mut RowCursor,
        query: &Envelope,
        table: Option<&Envelope>,
        index: Option<&SpatialIndex>,
    ) -> Result<QueryPlan> {
        let plan = self.plan(query, table, index.is_some());
        match (plan.path, index) {
            (AccessPath::IndexLookup, Some(idx)) => {
                let ids = idx.query(query);
                tracing::debug!(
                    "Plan for {}: index lookup (ratio={:.3}, hits={})",
                    idx.table(),
                    plan.ratio,
                    ids.len()
                );
                cursor.set_filter(Some(ids));
            }
            _ => {
                tracing::debug!("Plan: full scan (ratio={:.3})", plan.ratio);
                cursor.set_filter(None);
            }
        }
        cursor.before_first()?;
        Ok(plan)
    }
}
