use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::Receiver;
use roaring::RoaringBitmap;

use crate::core::{ProgressMonitor, Row, RowIdentity, TableReference};
use crate::cursor::events::{CursorEvent, CursorMove, ListenerId, Listeners};
use crate::cursor::pk_index::PrimaryKeyIndex;
use crate::cursor::window::{coalesce_runs, placement, Anchor, FetchWindow};
use crate::error::{CacheError, Result};
use crate::source::{DataSource, SqlCursor};

pub const DEFAULT_FETCH_SIZE: usize = 100;

/// 游标位置：永远是 BeforeFirst、`[1, N]` 内的逻辑行号、或 AfterLast 之一
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Position {
    BeforeFirst,
    /// 1-based 逻辑行号（过滤视图内）
    At(usize),
    AfterLast,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum FetchDirection {
    #[default]
    Forward,
    Reverse,
}

/// 空闲关闭延迟（毫秒），可在不持有游标锁的情况下修改
#[derive(Clone, Debug, Default)]
pub struct CloseDelay(Arc<AtomicU64>);

impl CloseDelay {
    pub fn new(ms: u64) -> Self {
        Self(Arc::new(AtomicU64::new(ms)))
    }

    pub fn set_ms(&self, ms: u64) {
        self.0.store(ms, Ordering::Relaxed);
    }

    pub fn get(&self) -> Duration {
        Duration::from_millis(self.0.load(Ordering::Relaxed))
    }
}

/// 行过滤：identity 集合 + 按当前物理游标解析出的行号位图
struct RowFilter {
    ids: BTreeSet<RowIdentity>,
    ordinals: Option<RoaringBitmap>,
    generation: u64,
}

impl RowFilter {
    fn new(ids: BTreeSet<RowIdentity>) -> Self {
        Self {
            ids,
            ordinals: None,
            generation: 0,
        }
    }
}

/// 绑定到某张表之后才存在的状态
struct Binding {
    source: Arc<dyn DataSource>,
    table: TableReference,
    primary_key: Option<String>,
    sql: Option<Box<dyn SqlCursor>>,
    row_count: Option<usize>,
    pk_index: Option<PrimaryKeyIndex>,
    /// 每次（重新）打开物理游标递增；行号相关缓存据此失效
    generation: u64,
}

impl Binding {
    fn sql_cursor(&mut self) -> Result<&mut Box<dyn SqlCursor>> {
        if self.sql.is_none() {
            let cur = self
                .source
                .open_cursor(&self.table, self.primary_key.as_deref())?;
            self.sql = Some(cur);
            self.row_count = None;
            self.pk_index = None;
            self.generation += 1;
            tracing::debug!("Opened SQL cursor for {} (gen={})", self.table, self.generation);
        }
        match self.sql.as_mut() {
            Some(c) => Ok(c),
            None => Err(CacheError::NotInitialized),
        }
    }

    fn row_count(&mut self) -> Result<usize> {
        if let Some(n) = self.row_count {
            if self.sql.is_some() {
                return Ok(n);
            }
        }
        let n = self.sql_cursor()?.row_count()?;
        self.row_count = Some(n);
        Ok(n)
    }

    fn pk_index(&mut self) -> Result<&PrimaryKeyIndex> {
        if self.pk_index.is_none() || self.sql.is_none() {
            let ids = self.sql_cursor()?.identities()?;
            self.pk_index = Some(PrimaryKeyIndex::build(ids));
        }
        match self.pk_index.as_ref() {
            Some(i) => Ok(i),
            None => Err(CacheError::NotInitialized),
        }
    }

    fn release(&mut self) -> bool {
        match self.sql.take() {
            Some(mut c) => {
                c.close();
                self.row_count = None;
                self.pk_index = None;
                true
            }
            None => false,
        }
    }
}

/// 可滚动、可过滤、可随机定位的行游标
///
/// ## 契约
/// - 定位前必须 `initialize`；重复绑定返回 `AlreadyBound`。
/// - 任何定位尝试（成功或失败）都会通知所有 listener。
/// - 越界移动不是错误：`next`/`previous` 失败时位置不变并返回 false；
///   `absolute(n)` 越界时停在 BeforeFirst / AfterLast。
/// - 客户端只物化一个 fetch window，内存为 O(window) 而非 O(行数)。
pub struct RowCursor {
    source: Arc<dyn DataSource>,
    binding: Option<Binding>,
    position: Position,
    filter: Option<RowFilter>,
    /// 已定位的游标上设置的过滤，在下一次 before_first / after_last 时生效
    pending_filter: Option<Option<BTreeSet<RowIdentity>>>,
    window: Option<FetchWindow>,
    fetch_size: usize,
    fetch_direction: FetchDirection,
    close_delay: CloseDelay,
    last_touched: Instant,
    listeners: Listeners,
}

impl RowCursor {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self {
            source,
            binding: None,
            position: Position::BeforeFirst,
            filter: None,
            pending_filter: None,
            window: None,
            fetch_size: DEFAULT_FETCH_SIZE,
            fetch_direction: FetchDirection::Forward,
            close_delay: CloseDelay::default(),
            last_touched: Instant::now(),
            listeners: Listeners::default(),
        }
    }

    /// 绑定查询并打开物理游标
    pub fn initialize(
        &mut self,
        table: &TableReference,
        primary_key: Option<&str>,
        progress: &dyn ProgressMonitor,
    ) -> Result<()> {
        if let Some(b) = &self.binding {
            return Err(CacheError::AlreadyBound {
                table: b.table.to_string(),
            });
        }
        progress.start("open row cursor", None);
        let mut binding = Binding {
            source: self.source.clone(),
            table: table.clone(),
            primary_key: primary_key.map(str::to_string),
            sql: None,
            row_count: None,
            pk_index: None,
            generation: 0,
        };
        let rows = binding.row_count()?;
        progress.finish();

        tracing::debug!(
            "RowCursor bound to {} (pk={:?}, rows={})",
            table,
            primary_key,
            rows
        );
        self.binding = Some(binding);
        self.position = Position::BeforeFirst;
        self.window = None;
        self.touch();
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.binding.is_some()
    }

    pub fn table(&self) -> Option<&TableReference> {
        self.binding.as_ref().map(|b| &b.table)
    }

    pub fn primary_key(&self) -> Option<&str> {
        self.binding.as_ref().and_then(|b| b.primary_key.as_deref())
    }

    pub fn position(&self) -> Position {
        self.position
    }

    /// 当前逻辑行号（1-based）
    pub fn row_number(&self) -> Option<usize> {
        match self.position {
            Position::At(n) => Some(n),
            _ => None,
        }
    }

    // ---- 定位 ----

    pub fn next(&mut self) -> Result<bool> {
        self.navigate(CursorMove::Next)
    }

    pub fn previous(&mut self) -> Result<bool> {
        self.navigate(CursorMove::Previous)
    }

    pub fn first(&mut self) -> Result<bool> {
        self.navigate(CursorMove::First)
    }

    pub fn last(&mut self) -> Result<bool> {
        self.navigate(CursorMove::Last)
    }

    pub fn absolute(&mut self, n: i64) -> Result<bool> {
        self.navigate(CursorMove::Absolute(n))
    }

    /// 回到首行之前；暂存的过滤在此生效。总是返回 false（不指向有效行）。
    pub fn before_first(&mut self) -> Result<bool> {
        self.navigate(CursorMove::BeforeFirst)
    }

    pub fn after_last(&mut self) -> Result<bool> {
        self.navigate(CursorMove::AfterLast)
    }

    fn navigate(&mut self, movement: CursorMove) -> Result<bool> {
        let result = self.move_to(movement);
        let event = CursorEvent {
            movement,
            succeeded: matches!(result, Ok(true)),
            position: self.position,
        };
        self.listeners.emit(&event);
        result
    }

    fn move_to(&mut self, movement: CursorMove) -> Result<bool> {
        if self.binding.is_none() {
            return Err(CacheError::NotInitialized);
        }
        self.touch();

        if matches!(movement, CursorMove::BeforeFirst | CursorMove::AfterLast) {
            self.install_pending_filter();
        }

        let n = self.visible_count()?;
        let (target, anchor) = match movement {
            CursorMove::BeforeFirst => {
                self.position = Position::BeforeFirst;
                return Ok(false);
            }
            CursorMove::AfterLast => {
                self.position = Position::AfterLast;
                return Ok(false);
            }
            CursorMove::Next => match self.position {
                Position::BeforeFirst => (1, Anchor::Start),
                Position::At(k) => (k + 1, Anchor::Start),
                Position::AfterLast => return Ok(false),
            },
            CursorMove::Previous => match self.position {
                Position::BeforeFirst => return Ok(false),
                Position::At(k) => (k.saturating_sub(1), Anchor::End),
                Position::AfterLast => (n, Anchor::End),
            },
            CursorMove::First => (1, Anchor::Start),
            CursorMove::Last => (n, Anchor::End),
            CursorMove::Absolute(i) => {
                if i < 1 {
                    self.position = Position::BeforeFirst;
                    return Ok(false);
                }
                let i = usize::try_from(i).unwrap_or(usize::MAX);
                if i > n {
                    self.position = Position::AfterLast;
                    return Ok(false);
                }
                (i, Anchor::Center)
            }
        };

        if target < 1 || target > n {
            // next/previous/first/last 越界：位置保持不变
            return Ok(false);
        }

        self.ensure_window(target, anchor)?;
        self.position = Position::At(target);
        Ok(true)
    }

    // ---- 过滤 ----

    /// 限制可见行为给定 identity 集合（None 取消限制）
    ///
    /// 游标尚未定位时立即生效；否则在下一次 `before_first` / `after_last` 时生效。
    pub fn set_filter(&mut self, ids: Option<BTreeSet<RowIdentity>>) {
        if self.position == Position::BeforeFirst {
            self.pending_filter = None;
            self.apply_filter(ids);
        } else {
            self.pending_filter = Some(ids);
        }
    }

    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }

    fn install_pending_filter(&mut self) {
        if let Some(ids) = self.pending_filter.take() {
            self.apply_filter(ids);
        }
    }

    fn apply_filter(&mut self, ids: Option<BTreeSet<RowIdentity>>) {
        self.filter = ids.map(RowFilter::new);
        self.window = None;
    }

    /// identity 集合 -> 当前物理行号集合（1-based，表内顺序）；不存在的 identity 静默丢弃
    pub fn row_numbers_for_identities(
        &mut self,
        ids: &BTreeSet<RowIdentity>,
    ) -> Result<BTreeSet<usize>> {
        let binding = self.binding.as_mut().ok_or(CacheError::NotInitialized)?;
        let idx = binding.pk_index()?;
        Ok(idx
            .ordinals_of(ids)
            .iter()
            .map(|o| o as usize + 1)
            .collect())
    }

    /// 过滤视图内的行数
    pub fn row_count(&mut self) -> Result<usize> {
        self.visible_count()
    }

    fn visible_count(&mut self) -> Result<usize> {
        let binding = self.binding.as_mut().ok_or(CacheError::NotInitialized)?;
        let total = binding.row_count()?;
        let Some(filter) = self.filter.as_mut() else {
            return Ok(total);
        };
        if filter.ordinals.is_none() || filter.generation != binding.generation {
            let ordinals = binding.pk_index()?.ordinals_of(&filter.ids);
            filter.ordinals = Some(ordinals);
            filter.generation = binding.generation;
        }
        Ok(filter
            .ordinals
            .as_ref()
            .map(|o| o.len() as usize)
            .unwrap_or(0))
    }

    /// 逻辑行号 -> 0-based 物理行号
    fn physical_ordinal(&self, pos: usize) -> Option<usize> {
        if pos == 0 {
            return None;
        }
        match &self.filter {
            None => Some(pos - 1),
            Some(f) => {
                let rank = u32::try_from(pos - 1).ok()?;
                f.ordinals.as_ref()?.select(rank).map(|o| o as usize)
            }
        }
    }

    // ---- fetch window ----

    fn ensure_window(&mut self, target: usize, anchor: Anchor) -> Result<()> {
        if self.window.as_ref().is_some_and(|w| w.contains(target)) {
            return Ok(());
        }
        let total = self.visible_count()?;
        let (start, len) = placement(target, total, self.fetch_size, anchor);
        let ordinals: Vec<usize> = (start..start + len)
            .filter_map(|p| self.physical_ordinal(p))
            .collect();

        let binding = self.binding.as_mut().ok_or(CacheError::NotInitialized)?;
        let sql = binding.sql_cursor()?;
        let mut rows = Vec::with_capacity(len);
        for (offset, run) in coalesce_runs(&ordinals) {
            rows.extend(sql.fetch(offset, run)?);
        }
        tracing::debug!(
            "Fetch window for {}: rows {}..{} ({:?})",
            binding.table,
            start,
            start + rows.len(),
            anchor
        );

        let window = FetchWindow::new(start, rows);
        if !window.contains(target) {
            return Err(CacheError::QueryFailure(format!(
                "row {} vanished from {} while fetching",
                target, binding.table
            )));
        }
        self.window = Some(window);
        Ok(())
    }

    /// 当前行（必要时重新取窗）
    pub fn current_row(&mut self) -> Result<Option<&Row>> {
        let Position::At(n) = self.position else {
            return Ok(None);
        };
        self.touch();
        let anchor = match self.fetch_direction {
            FetchDirection::Forward => Anchor::Start,
            FetchDirection::Reverse => Anchor::End,
        };
        self.ensure_window(n, anchor)?;
        Ok(self.window.as_ref().and_then(|w| w.get(n)))
    }

    pub fn identity(&mut self) -> Result<Option<RowIdentity>> {
        Ok(self.current_row()?.map(|r| r.identity))
    }

    /// 丢弃客户端窗口，下次访问从物理游标重新读取
    pub fn refresh_row(&mut self) -> Result<()> {
        if self.binding.is_none() {
            return Err(CacheError::NotInitialized);
        }
        self.window = None;
        Ok(())
    }

    pub fn window(&self) -> Option<&FetchWindow> {
        self.window.as_ref()
    }

    pub fn set_fetch_size(&mut self, rows: usize) {
        self.fetch_size = rows.max(1);
    }

    pub fn fetch_size(&self) -> usize {
        self.fetch_size
    }

    pub fn set_fetch_direction(&mut self, direction: FetchDirection) {
        self.fetch_direction = direction;
    }

    pub fn fetch_direction(&self) -> FetchDirection {
        self.fetch_direction
    }

    // ---- 资源生命周期 ----

    pub fn set_close_delay(&mut self, ms: u64) {
        self.close_delay.set_ms(ms);
    }

    /// 共享的 close delay 句柄（缓存在不拿游标锁时也能调整）
    pub fn close_delay(&self) -> CloseDelay {
        self.close_delay.clone()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_touched.elapsed()
    }

    fn touch(&mut self) {
        self.last_touched = Instant::now();
    }

    pub fn is_open(&self) -> bool {
        self.binding.as_ref().is_some_and(|b| b.sql.is_some())
    }

    /// 空闲超过 close delay 时释放物理游标；位置与过滤保留，下次访问透明重开
    pub fn release_if_idle(&mut self, now: Instant) -> bool {
        let idle = now.saturating_duration_since(self.last_touched);
        if idle < self.close_delay.get() {
            return false;
        }
        self.release()
    }

    pub fn release(&mut self) -> bool {
        let Some(binding) = self.binding.as_mut() else {
            return false;
        };
        let released = binding.release();
        if released {
            self.window = None;
            tracing::debug!("Released SQL cursor for {}", binding.table);
        }
        released
    }

    // ---- listeners ----

    pub fn add_listener<F>(&mut self, f: F) -> ListenerId
    where
        F: Fn(&CursorEvent) + Send + Sync + 'static,
    {
        self.listeners.add(f)
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub fn subscribe(&mut self) -> Receiver<CursorEvent> {
        self.listeners.subscribe()
    }
}

impl Drop for RowCursor {
    fn drop(&mut self) {
        if let Some(b) = self.binding.as_mut() {
            b.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Envelope, IdentifierCase, NullProgress, Value};
    use crate::source::{MemoryDataSource, MemoryTable};
    use std::sync::atomic::AtomicUsize;

    /// `n` 行，主键 = 10 * 行号，几何为点 (行号, 行号)
    fn table(n: usize) -> MemoryTable {
        let mut t = MemoryTable::new(["id", "name", "geom"])
            .with_primary_key("id")
            .with_geometry_column("geom");
        for i in 1..=n {
            t.push_row(vec![
                Value::Integer(i as i64 * 10),
                Value::Text(format!("row-{i}")),
                Value::Geometry(Envelope::point(i as f64, i as f64)),
            ]);
        }
        t
    }

    fn bound(n: usize, fetch: usize) -> (Arc<MemoryDataSource>, RowCursor) {
        let src = Arc::new(MemoryDataSource::new(IdentifierCase::Lower));
        let t = src.register("public.pts", table(n)).unwrap();
        let mut c = RowCursor::new(src.clone());
        c.set_fetch_size(fetch);
        c.initialize(&t, Some("id"), &NullProgress).unwrap();
        (src, c)
    }

    fn name(c: &mut RowCursor) -> String {
        match c.current_row().unwrap().unwrap().get(1) {
            Some(Value::Text(s)) => s.clone(),
            other => panic!("unexpected {other:?}"),
        }
    }

    fn ids(v: &[i64]) -> BTreeSet<RowIdentity> {
        v.iter().copied().map(RowIdentity).collect()
    }

    #[test]
    fn navigation_before_initialize_fails() {
        let src = Arc::new(MemoryDataSource::default());
        let mut c = RowCursor::new(src);
        assert!(matches!(c.next(), Err(CacheError::NotInitialized)));
        assert!(matches!(c.refresh_row(), Err(CacheError::NotInitialized)));
    }

    #[test]
    fn second_initialize_is_rejected() {
        let (src, mut c) = bound(3, 10);
        let t = TableReference::parse("public.pts", src.identifier_case()).unwrap();
        assert!(matches!(
            c.initialize(&t, Some("id"), &NullProgress),
            Err(CacheError::AlreadyBound { .. })
        ));
    }

    #[test]
    fn absolute_matches_sequential_scan() {
        let (_src, mut c) = bound(37, 5);
        let mut seq = Vec::new();
        c.before_first().unwrap();
        while c.next().unwrap() {
            seq.push(name(&mut c));
        }
        assert_eq!(seq.len(), 37);

        for n in [1usize, 2, 17, 36, 37] {
            assert!(c.absolute(n as i64).unwrap());
            assert_eq!(name(&mut c), seq[n - 1]);
        }
    }

    #[test]
    fn forward_and_reverse_scans_agree() {
        let (_src, mut c) = bound(23, 4);
        let mut fwd = Vec::new();
        c.before_first().unwrap();
        let mut moves = 0;
        while c.next().unwrap() {
            moves += 1;
            fwd.push(name(&mut c));
        }
        assert_eq!(moves, 23);
        assert!(!c.next().unwrap());

        let mut rev = Vec::new();
        c.after_last().unwrap();
        while c.previous().unwrap() {
            rev.push(name(&mut c));
        }
        rev.reverse();
        assert_eq!(fwd, rev);
    }

    #[test]
    fn failed_previous_keeps_first_row() {
        let (_src, mut c) = bound(5, 2);
        c.before_first().unwrap();
        assert!(c.next().unwrap());
        assert!(!c.previous().unwrap());
        assert_eq!(c.position(), Position::At(1));
        let after_fail = name(&mut c);

        assert!(c.first().unwrap());
        assert_eq!(c.position(), Position::At(1));
        assert_eq!(name(&mut c), after_fail);
        assert!(c.next().unwrap());
        assert_eq!(name(&mut c), "row-2");
    }

    #[test]
    fn absolute_out_of_range_parks_cursor() {
        let (_src, mut c) = bound(5, 2);
        assert!(!c.absolute(0).unwrap());
        assert_eq!(c.position(), Position::BeforeFirst);
        assert!(!c.absolute(6).unwrap());
        assert_eq!(c.position(), Position::AfterLast);
        assert!(!c.absolute(-3).unwrap());
        assert_eq!(c.position(), Position::BeforeFirst);
        assert!(c.current_row().unwrap().is_none());
    }

    #[test]
    fn listeners_fire_on_every_attempt() {
        let (_src, mut c) = bound(2, 10);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        c.add_listener(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        let rx = c.subscribe();

        c.before_first().unwrap();
        assert!(!c.previous().unwrap()); // 失败也通知
        assert!(c.next().unwrap());
        assert!(!c.previous().unwrap());
        assert!(!c.absolute(99).unwrap());

        assert_eq!(hits.load(Ordering::SeqCst), 5);
        let events: Vec<CursorEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 5);
        assert_eq!(events[1].movement, CursorMove::Previous);
        assert!(!events[1].succeeded);
        assert!(events[2].succeeded);
        assert_eq!(events[4].position, Position::AfterLast);
    }

    #[test]
    fn listeners_fire_even_when_uninitialized() {
        let src = Arc::new(MemoryDataSource::default());
        let mut c = RowCursor::new(src);
        let rx = c.subscribe();
        assert!(c.first().is_err());
        assert_eq!(rx.try_recv().unwrap().succeeded, false);
    }

    #[test]
    fn row_numbers_from_primary_keys() {
        let (_src, mut c) = bound(10, 3);
        // 主键 10, 50, 100 位于第 1, 5, 10 行
        let got = c.row_numbers_for_identities(&ids(&[10, 50, 100])).unwrap();
        assert_eq!(got.into_iter().collect::<Vec<_>>(), vec![1, 5, 10]);

        let lossy = c.row_numbers_for_identities(&ids(&[10, 500])).unwrap();
        assert_eq!(lossy.into_iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn filter_restricts_navigation() {
        let (_src, mut c) = bound(20, 3);
        c.set_filter(Some(ids(&[30, 70, 150, 9999])));
        c.before_first().unwrap();
        assert_eq!(c.row_count().unwrap(), 3);

        let mut seen = Vec::new();
        while c.next().unwrap() {
            seen.push(c.identity().unwrap().unwrap().0);
        }
        assert_eq!(seen, vec![30, 70, 150]);

        assert!(c.absolute(2).unwrap());
        assert_eq!(c.identity().unwrap(), Some(RowIdentity(70)));
    }

    #[test]
    fn filter_on_positioned_cursor_waits_for_rewind() {
        let (_src, mut c) = bound(10, 4);
        assert!(c.absolute(4).unwrap());
        c.set_filter(Some(ids(&[20])));
        assert!(!c.has_filter());
        assert!(c.next().unwrap());
        assert_eq!(c.identity().unwrap(), Some(RowIdentity(50)));

        c.before_first().unwrap();
        assert!(c.has_filter());
        assert!(c.next().unwrap());
        assert_eq!(c.identity().unwrap(), Some(RowIdentity(20)));
        assert!(!c.next().unwrap());

        c.set_filter(None);
        c.before_first().unwrap();
        assert_eq!(c.row_count().unwrap(), 10);
    }

    #[test]
    fn window_stays_bounded() {
        let (src, mut c) = bound(1000, 50);
        c.before_first().unwrap();
        while c.next().unwrap() {
            assert!(c.window().unwrap().len() <= 50);
        }
        // 1000 行 / 50 行窗口
        assert_eq!(src.fetch_calls(), 20);

        assert!(c.absolute(500).unwrap());
        let w = c.window().unwrap();
        assert!(w.start() <= 500 && w.start() + w.len() > 500);
        assert!(w.start() > 450);
    }

    #[test]
    fn refresh_row_forces_refetch() {
        let (src, mut c) = bound(10, 10);
        assert!(c.first().unwrap());
        let before = src.fetch_calls();
        c.current_row().unwrap();
        assert_eq!(src.fetch_calls(), before);
        c.refresh_row().unwrap();
        assert!(c.window().is_none());
        assert_eq!(name(&mut c), "row-1");
        assert_eq!(src.fetch_calls(), before + 1);
    }

    #[test]
    fn released_cursor_reopens_transparently() {
        let (src, mut c) = bound(8, 3);
        assert!(c.absolute(5).unwrap());
        c.set_close_delay(0);
        assert!(c.release_if_idle(Instant::now()));
        assert!(!c.is_open());
        assert_eq!(src.open_cursors(), 0);

        assert_eq!(name(&mut c), "row-5");
        assert!(c.is_open());
        assert_eq!(src.cursors_opened(), 2);
    }

    #[test]
    fn close_delay_keeps_busy_cursor_open() {
        let (_src, mut c) = bound(3, 3);
        c.set_close_delay(60_000);
        assert!(!c.release_if_idle(Instant::now()));
        assert!(c.is_open());
    }

    #[test]
    fn query_failure_propagates() {
        let (src, mut c) = bound(30, 5);
        c.before_first().unwrap();
        assert!(c.next().unwrap());
        src.set_fail_queries(true);
        assert!(matches!(c.absolute(20), Err(CacheError::QueryFailure(_))));
        assert_eq!(c.position(), Position::At(1));
    }

    #[test]
    fn synthetic_identity_without_primary_key() {
        let src = Arc::new(MemoryDataSource::default());
        let mut t = MemoryTable::new(["v"]);
        for v in ["a", "b", "c"] {
            t.push_row(vec![Value::Text(v.into())]);
        }
        let key = src.register("letters", t).unwrap();
        let mut c = RowCursor::new(src.clone());
        c.initialize(&key, None, &NullProgress).unwrap();
        let got = c.row_numbers_for_identities(&ids(&[2, 3, 4])).unwrap();
        assert_eq!(got.into_iter().collect::<Vec<_>>(), vec![2, 3]);
        assert!(c.last().unwrap());
        assert_eq!(c.identity().unwrap(), Some(RowIdentity(3)));
    }

    #[test]
    fn empty_table_has_no_rows() {
        let (_src, mut c) = bound(0, 5);
        c.before_first().unwrap();
        assert!(!c.next().unwrap());
        assert!(!c.first().unwrap());
        assert!(!c.last().unwrap());
        assert_eq!(c.position(), Position::BeforeFirst);
    }
}
