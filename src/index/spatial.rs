use std::collections::BTreeSet;
use std::path::Path;
use std::time::SystemTime;

use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

use crate::core::{Envelope, RowIdentity, TableReference};
use crate::storage::IndexFile;

/// R-tree 条目：行身份 + 几何包围盒
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub id: RowIdentity,
    pub envelope: Envelope,
}

impl RTreeObject for IndexRecord {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        to_aabb(&self.envelope)
    }
}

fn to_aabb(e: &Envelope) -> AABB<[f64; 2]> {
    AABB::from_corners([e.min_x, e.min_y], [e.max_x, e.max_y])
}

/// 单表空间索引：envelope -> 行身份集合
///
/// 内存中是 R*-tree；备份文件只是可丢弃的副本，文件被删即视为失效。
pub struct SpatialIndex {
    table: TableReference,
    tree: RTree<IndexRecord>,
    file: Option<IndexFile>,
    built_at: SystemTime,
}

impl SpatialIndex {
    pub fn bulk_load(table: TableReference, records: Vec<IndexRecord>, file: Option<IndexFile>) -> Self {
        Self {
            table,
            tree: RTree::bulk_load(records),
            file,
            built_at: SystemTime::now(),
        }
    }

    pub fn table(&self) -> &TableReference {
        &self.table
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    pub fn built_at(&self) -> SystemTime {
        self.built_at
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file.as_ref().map(|f| f.path())
    }

    /// 备份文件仍在且校验通过（纯内存索引永远有效）
    pub fn is_valid(&self) -> bool {
        self.file.as_ref().map_or(true, IndexFile::is_intact)
    }

    /// 删除备份文件；之后 `is_valid` 为 false
    pub fn discard_file(&self) -> bool {
        self.file.as_ref().is_some_and(IndexFile::discard)
    }

    /// 与查询框相交的行身份（有序）
    pub fn query(&self, envelope: &Envelope) -> BTreeSet<RowIdentity> {
        self.tree
            .locate_in_envelope_intersecting(&to_aabb(envelope))
            .map(|r| r.id)
            .collect()
    }

    /// 索引覆盖范围
    pub fn extent(&self) -> Option<Envelope> {
        if self.is_empty() {
            return None;
        }
        let aabb = self.tree.root().envelope();
        let (lo, hi) = (aabb.lower(), aabb.upper());
        Some(Envelope::new(lo[0], lo[1], hi[0], hi[1]))
    }
}

impl std::fmt::Debug for SpatialIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpatialIndex")
            .field("table", &self.table)
            .field("entries", &self.tree.size())
            .field("file", &self.file_path())
            .finish()
    }
}
