use std::fmt;

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use crate::error::{CacheError, Result};

/// 兼容回退时被剥离的默认 schema
pub const DEFAULT_SCHEMA: &str = "public";

/// 未加引号的标识符如何折叠大小写（取决于后端数据库的规则）
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierCase {
    /// PostgreSQL 风格：折叠为小写
    #[default]
    Lower,
    /// H2 / SQL 标准风格：折叠为大写
    Upper,
    /// 保持原样
    Preserve,
}

impl IdentifierCase {
    fn fold(self, ident: &str) -> String {
        match self {
            IdentifierCase::Lower => ident.to_lowercase(),
            IdentifierCase::Upper => ident.to_uppercase(),
            IdentifierCase::Preserve => ident.to_string(),
        }
    }
}

/// 规范化后的表引用（缓存 key）
///
/// 同一张表的不同书写形式（`Roads`、`"roads"`、`ROADS`）必须得到同一个 key。
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct TableReference {
    catalog: Option<String>,
    schema: Option<String>,
    table: String,
}

impl TableReference {
    /// 解析 `table` / `schema.table` / `catalog.schema.table`，支持双引号标识符（`""` 转义）。
    pub fn parse(text: &str, case: IdentifierCase) -> Result<Self> {
        let parts = split_identifiers(text.trim())?;
        let mut idents: Vec<String> = parts
            .into_iter()
            .map(|(raw, quoted)| {
                let nfc: String = raw.nfc().collect();
                if quoted {
                    nfc
                } else {
                    case.fold(&nfc)
                }
            })
            .collect();

        let table = idents
            .pop()
            .ok_or_else(|| CacheError::InvalidTableReference(text.to_string()))?;
        let schema = idents.pop();
        let catalog = idents.pop();
        if !idents.is_empty() {
            return Err(CacheError::InvalidTableReference(text.to_string()));
        }
        Ok(Self {
            catalog,
            schema,
            table,
        })
    }

    pub fn new(schema: Option<&str>, table: &str) -> Self {
        Self {
            catalog: None,
            schema: schema.map(|s| s.nfc().collect()),
            table: table.nfc().collect(),
        }
    }

    pub fn catalog(&self) -> Option<&str> {
        self.catalog.as_deref()
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// 剥离 `public` schema 限定（removeCache 的兼容回退用）
    pub fn without_default_schema(&self) -> Option<Self> {
        match self.schema.as_deref() {
            Some(s) if s.eq_ignore_ascii_case(DEFAULT_SCHEMA) && self.catalog.is_none() => {
                Some(Self {
                    catalog: None,
                    schema: None,
                    table: self.table.clone(),
                })
            }
            _ => None,
        }
    }

    /// 适合做文件名的扁平形式
    pub fn file_stem(&self) -> String {
        self.to_string()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect()
    }
}

impl fmt::Display for TableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(c) = &self.catalog {
            write_ident(f, c)?;
            f.write_str(".")?;
        }
        if let Some(s) = &self.schema {
            write_ident(f, s)?;
            f.write_str(".")?;
        }
        write_ident(f, &self.table)
    }
}

fn write_ident(f: &mut fmt::Formatter<'_>, ident: &str) -> fmt::Result {
    let plain = !ident.is_empty()
        && ident
            .chars()
            .next()
            .is_some_and(|c| c.is_alphabetic() || c == '_')
        && ident.chars().all(|c| c.is_alphanumeric() || c == '_')
        && ident.to_lowercase() == ident;
    if plain {
        f.write_str(ident)
    } else {
        write!(f, "\"{}\"", ident.replace('"', "\"\""))
    }
}

/// 按 `.` 切分标识符，返回 (原文, 是否带引号)
fn split_identifiers(text: &str) -> Result<Vec<(String, bool)>> {
    let invalid = || CacheError::InvalidTableReference(text.to_string());
    let mut out = Vec::new();
    let mut chars = text.chars().peekable();

    loop {
        let mut ident = String::new();
        let quoted = chars.peek() == Some(&'"');
        if quoted {
            chars.next();
            loop {
                match chars.next() {
                    Some('"') if chars.peek() == Some(&'"') => {
                        chars.next();
                        ident.push('"');
                    }
                    Some('"') => break,
                    Some(c) => ident.push(c),
                    None => return Err(invalid()),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == '.' {
                    break;
                }
                if c == '"' {
                    return Err(invalid());
                }
                ident.push(c);
                chars.next();
            }
            ident = ident.trim().to_string();
        }

        if ident.is_empty() {
            return Err(invalid());
        }
        out.push((ident, quoted));

        match chars.next() {
            None => break,
            Some('.') => continue,
            Some(_) => return Err(invalid()),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spellings_of_same_table_share_key() {
        let a = TableReference::parse("Public.Roads", IdentifierCase::Lower).unwrap();
        let b = TableReference::parse("public.\"roads\"", IdentifierCase::Lower).unwrap();
        let c = TableReference::parse("  PUBLIC.ROADS ", IdentifierCase::Lower).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.to_string(), "public.roads");
    }

    #[test]
    fn quoted_identifiers_keep_case_and_dots() {
        let t = TableReference::parse("\"My.Schema\".\"Big \"\"T\"\"\"", IdentifierCase::Lower)
            .unwrap();
        assert_eq!(t.schema(), Some("My.Schema"));
        assert_eq!(t.table(), "Big \"T\"");
        let again = TableReference::parse(&t.to_string(), IdentifierCase::Lower).unwrap();
        assert_eq!(again, t);
    }

    #[test]
    fn upper_case_rules() {
        let t = TableReference::parse("geo.parcels", IdentifierCase::Upper).unwrap();
        assert_eq!(t.schema(), Some("GEO"));
        assert_eq!(t.table(), "PARCELS");
    }

    #[test]
    fn nfc_normalizes_identifiers() {
        // "é" 组合字符 vs 预组合字符
        let a = TableReference::parse("\"cafe\u{301}\"", IdentifierCase::Lower).unwrap();
        let b = TableReference::parse("\"caf\u{e9}\"", IdentifierCase::Lower).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn strips_public_only() {
        let t = TableReference::parse("public.t", IdentifierCase::Lower).unwrap();
        assert_eq!(
            t.without_default_schema(),
            Some(TableReference::new(None, "t"))
        );
        let other = TableReference::parse("geo.t", IdentifierCase::Lower).unwrap();
        assert!(other.without_default_schema().is_none());
    }

    #[test]
    fn rejects_malformed() {
        for bad in ["", "a..b", "\"open", "a.b.c.d", "x\"y"] {
            assert!(TableReference::parse(bad, IdentifierCase::Lower).is_err(), "{bad}");
        }
    }
}
