//! The named field surface shared by links, the persisted store and defaults.
//!
//! 由分享链接、持久化存储和默认值共享的命名字段集合。

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

pub const URL: &str = "url";
pub const TOKEN: &str = "token";
pub const NODE_ID: &str = "nodeId";
pub const DATA_NAME: &str = "dataName";
pub const DATA_TYPE: &str = "dataType";
pub const MODE: &str = "mode";
pub const FLUSH_INTERVAL: &str = "flushInterval";
pub const PAYLOAD_SIZE: &str = "payloadSize";
pub const FREQUENCY: &str = "frequency";
pub const LIMIT: &str = "limit";
pub const INTERVAL: &str = "interval";

/// Every known key together with its default value, in link order.
///
/// 所有已知键及其默认值，按链接中的顺序排列。
pub const DEFAULTS: [(&str, &str); 11] = [
    (URL, "https://example.intdash.jp"),
    (TOKEN, ""),
    (NODE_ID, ""),
    (DATA_NAME, "data_name"),
    (DATA_TYPE, "bytes"),
    (MODE, "bulk"),
    (FLUSH_INTERVAL, "10"),
    (PAYLOAD_SIZE, "10"),
    (FREQUENCY, "1000"),
    (LIMIT, "1000"),
    (INTERVAL, "1000"),
];

/// Returns the canonical static key for `key`, if it is known.
pub fn known_key(key: &str) -> Option<&'static str> {
    DEFAULTS.iter().map(|(k, _)| *k).find(|k| *k == key)
}

pub fn default_value(key: &str) -> Option<&'static str> {
    DEFAULTS.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

/// A set of raw string field values keyed by field name.
///
/// 以字段名为键的原始字符串字段值集合。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fields(BTreeMap<String, String>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// All keys set to their default values.
    pub fn defaults() -> Self {
        Self(
            DEFAULTS
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
        )
    }

    /// Decodes the known keys of an incoming link's query string.
    ///
    /// 解码传入链接查询字符串中的已知键。
    pub fn from_link(link: &Url) -> Self {
        Self(
            link.query_pairs()
                .filter(|(k, _)| known_key(k).is_some())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
        )
    }

    /// Resolves every key as link value, else persisted value, else default.
    /// Empty strings count as absent.
    ///
    /// 按“链接值、持久化值、默认值”的优先级解析每个键。空字符串视为缺失。
    pub fn resolve(link: &Fields, persisted: &Fields) -> Fields {
        Self(
            DEFAULTS
                .iter()
                .map(|(key, default)| {
                    let value = link
                        .non_empty(key)
                        .or_else(|| persisted.non_empty(key))
                        .unwrap_or(*default);
                    ((*key).to_owned(), value.to_owned())
                })
                .collect(),
        )
    }

    /// Returns the raw value of `key`, which may be empty.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    fn non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    /// Sets a known field. Unknown keys are rejected.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> Result<()> {
        let key = known_key(key).ok_or_else(|| Error::InvalidField {
            field: "key",
            reason: format!("unknown field `{key}`"),
        })?;
        self.0.insert(key.to_owned(), value.into());
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Re-encodes the fields into a shareable link under `base`, using the
    /// same keys an incoming link is read with.
    ///
    /// 将字段重新编码为 `base` 下的分享链接，使用与读取传入链接相同的键。
    pub fn to_link(&self, base: &Url) -> Url {
        let mut link = base.clone();
        link.set_query(None);
        {
            let mut query = link.query_pairs_mut();
            for (key, _) in DEFAULTS.iter() {
                if let Some(value) = self.get(key) {
                    query.append_pair(key, value);
                }
            }
        }
        link
    }
}
