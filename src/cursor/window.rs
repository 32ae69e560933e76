use crate::core::Row;

/// 取窗时目标行在窗口中的锚点
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Anchor {
    /// 向前移动：窗口从目标行开始
    Start,
    /// 向后移动：窗口在目标行结束
    End,
    /// 随机访问：窗口以目标行为中心
    Center,
}

/// 客户端已物化的一段连续逻辑行（1-based 逻辑行号）
#[derive(Clone, Debug)]
pub struct FetchWindow {
    start: usize,
    rows: Vec<Row>,
}

impl FetchWindow {
    pub fn new(start: usize, rows: Vec<Row>) -> Self {
        Self { start, rows }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, pos: usize) -> bool {
        pos >= self.start && pos < self.start + self.rows.len()
    }

    pub fn get(&self, pos: usize) -> Option<&Row> {
        if !self.contains(pos) {
            return None;
        }
        self.rows.get(pos - self.start)
    }
}

/// 计算新窗口 `(start, len)`：保证包含 `target`，且不越出 `[1, total]`
pub fn placement(target: usize, total: usize, size: usize, anchor: Anchor) -> (usize, usize) {
    let len = size.max(1).min(total);
    if len == 0 {
        return (1, 0);
    }
    let wanted = match anchor {
        Anchor::Start => target,
        Anchor::End => (target + 1).saturating_sub(len),
        Anchor::Center => target.saturating_sub(len / 2),
    };
    let start = wanted.max(1).min(total - len + 1);
    (start, len)
}

/// 把升序物理行号合并为连续区间 `(offset, len)`，减少 fetch 次数
pub fn coalesce_runs(ordinals: &[usize]) -> Vec<(usize, usize)> {
    let mut runs: Vec<(usize, usize)> = Vec::new();
    for &o in ordinals {
        match runs.last_mut() {
            Some((start, len)) if *start + *len == o => *len += 1,
            _ => runs.push((o, 1)),
        }
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_window_starts_at_target() {
        assert_eq!(placement(11, 1000, 10, Anchor::Start), (11, 10));
        // 靠近末尾时回退，仍包含目标
        assert_eq!(placement(998, 1000, 10, Anchor::Start), (991, 10));
    }

    #[test]
    fn backward_window_ends_at_target() {
        assert_eq!(placement(50, 1000, 10, Anchor::End), (41, 10));
        assert_eq!(placement(3, 1000, 10, Anchor::End), (1, 10));
    }

    #[test]
    fn random_access_recenters() {
        assert_eq!(placement(500, 1000, 10, Anchor::Center), (495, 10));
        assert_eq!(placement(2, 5, 10, Anchor::Center), (1, 5));
    }

    #[test]
    fn empty_total() {
        assert_eq!(placement(1, 0, 10, Anchor::Start), (1, 0));
    }

    #[test]
    fn runs_are_coalesced() {
        assert_eq!(
            coalesce_runs(&[0, 1, 2, 7, 9, 10]),
            vec![(0, 3), (7, 1), (9, 2)]
        );
        assert!(coalesce_runs(&[]).is_empty());
    }
}
