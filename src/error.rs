use std::time::Duration;

use thiserror::Error;

/// 结果集缓存的错误分类
///
/// 只有 `ResourceBusy` 属于“下一帧重试即可”的瞬时争用；其余错误直接上抛给 renderer。
#[derive(Debug, Error)]
pub enum CacheError {
    /// 锁在超时时间内未拿到
    #[error("{resource} is busy (waited {waited:?}): cannot draw until data source is initialized")]
    ResourceBusy { resource: String, waited: Duration },

    /// 空间索引构建失败（几何扫描或文件 I/O）
    #[error("spatial index build failed for {table}: {reason}")]
    IndexBuildFailure { table: String, reason: String },

    /// 底层 SQL 执行失败，原样上抛
    #[error("query failed: {0}")]
    QueryFailure(String),

    /// 在 initialize 之前就尝试定位游标
    #[error("row cursor is not initialized")]
    NotInitialized,

    #[error("row cursor is already bound to {table}")]
    AlreadyBound { table: String },

    /// 进度监视器请求取消
    #[error("operation cancelled while processing {table}")]
    Cancelled { table: String },

    #[error("invalid table reference: {0}")]
    InvalidTableReference(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CacheError {
    /// 调用方唯一应当重试的错误：锁争用
    pub fn is_retryable(&self) -> bool {
        matches!(self, CacheError::ResourceBusy { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CacheError::Cancelled { .. })
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_busy_is_retryable() {
        let busy = CacheError::ResourceBusy {
            resource: "public.roads".into(),
            waited: Duration::from_millis(10),
        };
        assert!(busy.is_retryable());
        assert!(busy.to_string().contains("cannot draw until data source is initialized"));

        assert!(!CacheError::NotInitialized.is_retryable());
        assert!(!CacheError::QueryFailure("boom".into()).is_retryable());
        assert!(!CacheError::Cancelled { table: "t".into() }.is_retryable());
    }
}
