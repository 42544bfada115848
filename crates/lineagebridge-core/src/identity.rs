//! Deterministic identity keys
//!
//! Two records with equal keys denote the same entity. Job keys are compared
//! exactly (scheduler names are case-sensitive); dataset names are normalized
//! to lowercase dotted form before keying.

use crate::model::SourceSystem;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Entity tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Container,
    Job,
    Dataset,
}

impl EntityType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Container => "container",
            Self::Job => "job",
            Self::Dataset => "dataset",
        }
    }
}

/// (source-system tag, qualified name) pair identifying one entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub entity: EntityType,
    pub system: SourceSystem,
    pub name: String,
}

impl EntityKey {
    pub fn new(entity: EntityType, system: SourceSystem, name: impl Into<String>) -> Self {
        Self {
            entity,
            system,
            name: name.into(),
        }
    }

    /// Catalog URN for this entity in the given environment
    pub fn urn(&self, env: &str) -> String {
        format!(
            "urn:lineagebridge:{}:({},{},{})",
            self.entity.as_str(),
            self.system.tag(),
            self.name,
            env
        )
    }
}

/// Strip quoting from one identifier part (`"x"`, `[x]`, `` `x` ``)
pub fn unquote_ident(part: &str) -> &str {
    let part = part.trim();
    let bytes = part.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"')
            || (first == b'[' && last == b']')
            || (first == b'`' && last == b'`')
        {
            return &part[1..part.len() - 1];
        }
    }
    part
}

/// Split a qualified name on dots that are not inside quotes or brackets
pub fn split_qualified(raw: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut closing: Option<char> = None;

    for c in raw.trim().chars() {
        match closing {
            Some(close) => {
                current.push(c);
                if c == close {
                    closing = None;
                }
            }
            None => match c {
                '"' => {
                    closing = Some('"');
                    current.push(c);
                }
                '`' => {
                    closing = Some('`');
                    current.push(c);
                }
                '[' => {
                    closing = Some(']');
                    current.push(c);
                }
                '.' => parts.push(std::mem::take(&mut current)),
                _ => current.push(c),
            },
        }
    }
    parts.push(current);

    parts
        .iter()
        .map(|p| unquote_ident(p).trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Normalize a table reference into a lowercase `db.schema.name` style key
///
/// One part is qualified with whichever defaults are configured, two parts
/// get the default database prepended, three or more are kept as written.
pub fn normalize_dataset_name(
    raw: &str,
    default_db: Option<&str>,
    default_schema: Option<&str>,
) -> String {
    let parts = split_qualified(raw);
    let defaults = |with_schema: bool| {
        let mut prefix = Vec::new();
        if let Some(db) = default_db.filter(|d| !d.is_empty()) {
            prefix.push(db.to_string());
        }
        if with_schema {
            if let Some(schema) = default_schema.filter(|s| !s.is_empty()) {
                prefix.push(schema.to_string());
            }
        }
        prefix
    };

    let qualified = match parts.len() {
        0 => Vec::new(),
        1 => {
            let mut q = defaults(true);
            q.extend(parts);
            q
        }
        2 => {
            let mut q = defaults(false);
            q.extend(parts);
            q
        }
        _ => parts,
    };

    qualified.join(".").to_lowercase()
}

/// Last dotted part of a qualified name
pub fn short_name(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// First 16 hex characters of the SHA-256 of `text`
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(16);
    hex
}

/// At most `max_chars` characters of `text`, cut on a char boundary
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn qualifies_bare_and_two_part_names() {
        assert_eq!(normalize_dataset_name("ORDERS", Some("DWH"), Some("ETL")), "dwh.etl.orders");
        assert_eq!(normalize_dataset_name("etl.orders", Some("DWH"), Some("ETL")), "dwh.etl.orders");
        assert_eq!(normalize_dataset_name("a.b.c.d", Some("DWH"), None), "a.b.c.d");
        assert_eq!(normalize_dataset_name("orders", None, None), "orders");
        assert_eq!(normalize_dataset_name("orders", None, Some("dbo")), "dbo.orders");
    }

    #[test]
    fn strips_identifier_quoting() {
        assert_eq!(normalize_dataset_name("[dbo].[Sales Orders]", None, None), "dbo.sales orders");
        assert_eq!(normalize_dataset_name("\"ETL\".\"A.B\"", None, None), "etl.a.b");
        assert_eq!(split_qualified("`p`.`d`.t"), vec!["p", "d", "t"]);
    }

    #[test]
    fn hash_is_stable_and_short() {
        let h = content_hash("SELECT 1 FROM dual");
        assert_eq!(h.len(), 16);
        assert_eq!(h, content_hash("SELECT 1 FROM dual"));
        assert_ne!(h, content_hash("SELECT 2 FROM dual"));
    }

    #[test]
    fn preview_respects_char_boundaries() {
        assert_eq!(preview("héllo wörld", 4), "héll");
        assert_eq!(preview("abc", 10), "abc");
    }

    #[test]
    fn urn_shape() {
        let key = EntityKey::new(EntityType::Dataset, SourceSystem::Oracle, "dwh.etl.orders");
        assert_eq!(key.urn("PROD"), "urn:lineagebridge:dataset:(oracle,dwh.etl.orders,PROD)");
    }
}
