use serde::{Deserialize, Serialize};

use crate::core::envelope::Envelope;

/// 行身份：主键值，或无主键表的合成序号（1-based）
///
/// 任意时刻与一行一一对应；跨重排保持稳定（区别于物理行号）。
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct RowIdentity(pub i64);

impl From<i64> for RowIdentity {
    fn from(v: i64) -> Self {
        RowIdentity(v)
    }
}

impl std::fmt::Display for RowIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 单元格值（几何列只保留其包围盒，渲染管线的完整几何不在本层）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Geometry(Envelope),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_envelope(&self) -> Option<&Envelope> {
        match self {
            Value::Geometry(e) => Some(e),
            _ => None,
        }
    }
}

/// 物化到客户端的一行
#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    pub identity: RowIdentity,
    pub values: Vec<Value>,
}

impl Row {
    pub fn get(&self, col: usize) -> Option<&Value> {
        self.values.get(col)
    }
}
