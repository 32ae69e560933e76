use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// 缓存运行时计数器（全部 Relaxed，仅用于观测）
#[derive(Debug, Default)]
pub struct CacheCounters {
    pub entries_created: AtomicU64,
    pub index_builds: AtomicU64,
    pub index_build_failures: AtomicU64,
    pub index_builds_cancelled: AtomicU64,
    pub index_executions: AtomicU64,
    pub full_scan_executions: AtomicU64,
    pub busy_rejections: AtomicU64,
    pub cursors_released: AtomicU64,
}

impl CacheCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// 某一时刻的缓存统计快照
#[derive(Clone, Debug, Default, Serialize)]
pub struct CacheStats {
    /// 已注册的 CacheEntry 数
    pub entries: usize,
    /// 物理 SQL 游标仍打开的 entry 数（被读者占用的也算打开）
    pub open_cursors: usize,
    /// 有效空间索引数
    pub indexes: usize,
    /// 所有空间索引条目总数
    pub index_entries: usize,
    pub entries_created: u64,
    pub index_builds: u64,
    pub index_build_failures: u64,
    pub index_builds_cancelled: u64,
    pub index_executions: u64,
    pub full_scan_executions: u64,
    pub busy_rejections: u64,
    pub cursors_released: u64,
}

impl CacheStats {
    pub fn with_counters(mut self, c: &CacheCounters) -> Self {
        self.entries_created = CacheCounters::get(&c.entries_created);
        self.index_builds = CacheCounters::get(&c.index_builds);
        self.index_build_failures = CacheCounters::get(&c.index_build_failures);
        self.index_builds_cancelled = CacheCounters::get(&c.index_builds_cancelled);
        self.index_executions = CacheCounters::get(&c.index_executions);
        self.full_scan_executions = CacheCounters::get(&c.full_scan_executions);
        self.busy_rejections = CacheCounters::get(&c.busy_rejections);
        self.cursors_released = CacheCounters::get(&c.cursors_released);
        self
    }

    /// 走索引的 execute 占比
    pub fn index_hit_ratio(&self) -> f64 {
        let total = self.index_executions + self.full_scan_executions;
        if total == 0 {
            0.0
        } else {
            self.index_executions as f64 / total as f64
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "╔══════════════════════════════════════════════════╗")?;
        writeln!(f, "║           rowset-cache Report                    ║")?;
        writeln!(f, "╠══════════════════════════════════════════════════╣")?;
        writeln!(f, "║ Entries:                                         ║")?;
        writeln!(f, "║   cached:       {:>10}                       ║", self.entries)?;
        writeln!(f, "║   open cursors: {:>10}                       ║", self.open_cursors)?;
        writeln!(f, "║   created:      {:>10}                       ║", self.entries_created)?;
        writeln!(f, "║   released:     {:>10}                       ║", self.cursors_released)?;
        writeln!(f, "╠──────────────────────────────────────────────────╣")?;
        writeln!(f, "║ Spatial Index:                                   ║")?;
        writeln!(
            f,
            "║   indexes:      {:>10}  ({:>10} entries)  ║",
            self.indexes, self.index_entries
        )?;
        writeln!(f, "║   builds:       {:>10}                       ║", self.index_builds)?;
        writeln!(f, "║   failures:     {:>10}                       ║", self.index_build_failures)?;
        writeln!(f, "║   cancelled:    {:>10}                       ║", self.index_builds_cancelled)?;
        writeln!(f, "╠──────────────────────────────────────────────────╣")?;
        writeln!(f, "║ Planner:                                         ║")?;
        writeln!(f, "║   index path:   {:>10}                       ║", self.index_executions)?;
        writeln!(f, "║   full scan:    {:>10}                       ║", self.full_scan_executions)?;
        writeln!(
            f,
            "║   hit ratio:    {:>10.3}                       ║",
            self.index_hit_ratio()
        )?;
        writeln!(f, "║   busy:         {:>10}                       ║", self.busy_rejections)?;
        writeln!(f, "╚══════════════════════════════════════════════════╝")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reads_counters() {
        let c = CacheCounters::default();
        CacheCounters::bump(&c.index_executions);
        CacheCounters::bump(&c.full_scan_executions);
        CacheCounters::bump(&c.full_scan_executions);
        CacheCounters::bump(&c.full_scan_executions);
        let s = CacheStats::default().with_counters(&c);
        assert_eq!(s.index_executions, 1);
        assert!((s.index_hit_ratio() - 0.25).abs() < 1e-12);
        assert!(s.to_string().contains("hit ratio"));
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["full_scan_executions"], 3);
    }
}
