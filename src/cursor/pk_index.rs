use std::collections::BTreeSet;

use roaring::RoaringBitmap;

use crate::core::RowIdentity;

/// 主键有序索引：identity -> 0-based 物理行号，二分查找
#[derive(Clone, Debug, Default)]
pub struct PrimaryKeyIndex {
    entries: Vec<(RowIdentity, u32)>,
}

impl PrimaryKeyIndex {
    /// `ids` 按物理顺序排列
    pub fn build(ids: Vec<RowIdentity>) -> Self {
        let mut entries: Vec<(RowIdentity, u32)> = ids
            .into_iter()
            .enumerate()
            .filter_map(|(i, id)| u32::try_from(i).ok().map(|o| (id, o)))
            .collect();
        entries.sort_unstable_by_key(|(id, _)| *id);
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ordinal_of(&self, id: RowIdentity) -> Option<u32> {
        self.entries
            .binary_search_by_key(&id, |(k, _)| *k)
            .ok()
            .map(|i| self.entries[i].1)
    }

    /// 不存在的 identity 静默丢弃
    pub fn ordinals_of(&self, ids: &BTreeSet<RowIdentity>) -> RoaringBitmap {
        ids.iter().filter_map(|id| self.ordinal_of(*id)).collect()
    }
}
