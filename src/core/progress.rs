use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// 进度监视器：长操作（索引构建）逐行汇报，并轮询取消标志
pub trait ProgressMonitor: Send + Sync {
    fn start(&self, _task: &str, _total: Option<u64>) {}
    fn advance(&self, _done: u64) {}
    fn is_cancelled(&self) -> bool {
        false
    }
    fn finish(&self) {}
}

/// 什么都不做的监视器
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressMonitor for NullProgress {}

/// 可取消的计数型监视器
#[derive(Debug, Default)]
pub struct CancellableProgress {
    cancelled: AtomicBool,
    total: AtomicU64,
    done: AtomicU64,
    /// 达到该进度后自动取消（0 = 不启用）；测试中模拟用户中途取消
    cancel_after: AtomicU64,
}

impl CancellableProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel_after(n: u64) -> Self {
        let p = Self::default();
        p.cancel_after.store(n, Ordering::Relaxed);
        p
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn done(&self) -> u64 {
        self.done.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

impl ProgressMonitor for CancellableProgress {
    fn start(&self, _task: &str, total: Option<u64>) {
        self.total.store(total.unwrap_or(0), Ordering::Relaxed);
        self.done.store(0, Ordering::Relaxed);
    }

    fn advance(&self, done: u64) {
        let now = self.done.fetch_add(done, Ordering::Relaxed) + done;
        let limit = self.cancel_after.load(Ordering::Relaxed);
        if limit != 0 && now >= limit {
            self.cancel();
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
