use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, MutexGuard, RawMutex};

use crate::error::{CacheError, Result};

/// 跨调用持有的守卫（per-cursor 读锁在 execute 与 close 之间一直持有）
pub type OwnedGuard<T> = ArcMutexGuard<RawMutex, T>;

/// 带超时的互斥原语
///
/// 容器锁与 per-cursor 锁是两个独立实例，不做可重入嵌套；超时统一报告为 `ResourceBusy`。
pub struct LockCoordinator<T> {
    name: Arc<str>,
    inner: Arc<Mutex<T>>,
    timeout: Duration,
}

impl<T> Clone for LockCoordinator<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            inner: self.inner.clone(),
            timeout: self.timeout,
        }
    }
}

impl<T> LockCoordinator<T> {
    pub fn new(name: impl Into<String>, value: T, timeout: Duration) -> Self {
        Self {
            name: Arc::from(name.into()),
            inner: Arc::new(Mutex::new(value)),
            timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn busy(&self, started: Instant) -> CacheError {
        let waited = started.elapsed();
        tracing::warn!("Lock timeout on {} after {:?}", self.name, waited);
        CacheError::ResourceBusy {
            resource: self.name.to_string(),
            waited,
        }
    }

    /// 在超时内获取（作用域守卫）
    pub fn acquire(&self) -> Result<MutexGuard<'_, T>> {
        let started = Instant::now();
        self.inner
            .try_lock_for(self.timeout)
            .ok_or_else(|| self.busy(started))
    }

    /// 在超时内获取（可跨方法调用持有的守卫）
    pub fn acquire_owned(&self) -> Result<OwnedGuard<T>> {
        let started = Instant::now();
        self.inner
            .try_lock_arc_for(self.timeout)
            .ok_or_else(|| self.busy(started))
    }

    /// 不等待；被占用时返回 None
    pub fn try_acquire(&self) -> Option<MutexGuard<'_, T>> {
        self.inner.try_lock()
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}
