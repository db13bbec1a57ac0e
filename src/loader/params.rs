use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const LIMIT_KEY: &str = "limit";
pub const DEFAULT_CID: &str = "default";

/// 查询参数：决定加载“哪个数据集的哪一页”（folder、sort、过滤条件……）
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryParams(BTreeMap<String, Value>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// 解析 `limit` 参数（"offset,count"）
    pub fn limit(&self) -> Option<Limit> {
        self.get(LIMIT_KEY)?.as_str()?.parse().ok()
    }

    pub fn set_limit(&mut self, limit: Limit) {
        self.insert(LIMIT_KEY, limit.to_string());
    }

    /// 复合 id：忽略 `ignore` 中的键，`key=value` 排序后以 `&` 连接；为空时为 "default"
    pub fn cid(&self, ignore: &[String]) -> String {
        let mut pairs: Vec<String> = self
            .0
            .iter()
            .filter(|(k, _)| !ignore.iter().any(|i| i == *k))
            .map(|(k, v)| format!("{}={}", k, render_value(v)))
            .collect();
        if pairs.is_empty() {
            return DEFAULT_CID.to_string();
        }
        pairs.sort();
        pairs.join("&")
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for QueryParams {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut p = Self::new();
        for (k, v) in iter {
            p.insert(k, v);
        }
        p
    }
}

fn render_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 拆分 cid 为 (key, value) 对
pub fn cid_pairs(cid: &str) -> impl Iterator<Item = (&str, &str)> {
    cid.split('&').filter_map(|pair| pair.split_once('='))
}

/// 分页窗口：offset 起取 count 条
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Limit {
    pub offset: usize,
    pub count: usize,
}

impl Limit {
    pub fn new(offset: usize, count: usize) -> Self {
        Self { offset, count }
    }

    /// 对应后端数组的切片区间，供数据源按窗口截取
    pub fn range(&self, total: usize) -> Range<usize> {
        let start = self.offset.min(total);
        let end = self.offset.saturating_add(self.count).min(total);
        start..end
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.offset, self.count)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("malformed limit {0:?}, expected \"offset,count\"")]
pub struct ParseLimitError(String);

impl FromStr for Limit {
    type Err = ParseLimitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseLimitError(s.to_string());
        let (offset, count) = s.split_once(',').ok_or_else(err)?;
        Ok(Self {
            offset: offset.trim().parse().map_err(|_| err())?,
            count: count.trim().parse().map_err(|_| err())?,
        })
    }
}
