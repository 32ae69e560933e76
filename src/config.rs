use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::planner::DEFAULT_INDEX_THRESHOLD;
use crate::cursor::DEFAULT_FETCH_SIZE;
use crate::error::{CacheError, Result};

/// 缓存配置（toml）
///
/// ```toml
/// lock_timeout_ms = 10000
/// read_lock_timeout_ms = 10000
/// close_delay_ms = 5000
/// fetch_size = 100
/// index_threshold = 0.5
/// spatial_index = true
/// cache_dir = "/var/cache/rowset-cache"
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// 容器锁超时
    pub lock_timeout_ms: u64,
    /// per-cursor 读锁超时
    pub read_lock_timeout_ms: u64,
    /// 空闲多久后释放物理 SQL 游标
    pub close_delay_ms: u64,
    /// fetch window 行数
    pub fetch_size: usize,
    /// 覆盖比例低于该值才走索引
    pub index_threshold: f64,
    /// 构造时是否安装默认空间索引工厂
    pub spatial_index: bool,
    /// 索引备份文件目录
    pub cache_dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 10_000,
            read_lock_timeout_ms: 10_000,
            close_delay_ms: 5_000,
            fetch_size: DEFAULT_FETCH_SIZE,
            index_threshold: DEFAULT_INDEX_THRESHOLD,
            spatial_index: true,
            cache_dir: default_cache_dir(),
        }
    }
}

pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("rowset-cache")
}

impl CacheConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(s).map_err(|e| CacheError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fetch_size == 0 {
            return Err(CacheError::Config("fetch_size must be positive".into()));
        }
        if !(self.index_threshold > 0.0 && self.index_threshold <= 1.0) {
            return Err(CacheError::Config(format!(
                "index_threshold must be in (0, 1], got {}",
                self.index_threshold
            )));
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn read_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.read_lock_timeout_ms)
    }
}
