use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

use parking_lot::{Mutex, RwLock};

use crate::index::normalize::{normalize, words};
use crate::index::trie::Node;

/// 搜索结果排序键：priority 越小越靠前
pub trait Prioritized {
    fn priority(&self) -> i32;
}

struct Tree<Id> {
    root: Node<Id>,
    words: usize,
    /// 每次写入 +1；缓存条目只在 generation 相同时有效
    generation: u64,
}

type CachedIds<Id> = (u64, Vec<Id>);

/// 轻量全文索引：单词前缀树 + 查询缓存
///
/// - 大小写、变音符号、常见标点不敏感
/// - 多词查询为 AND，每个词按前缀匹配
/// - 只增不删；`reset` 整体清空
///
/// 查询缓存在每次 `add` 后失效，避免长生命周期索引返回旧结果。
/// 缓存条目带有计算时的树 generation，与并发写入交错时不会留下旧结果。
pub struct TextIndex<Id> {
    tree: RwLock<Tree<Id>>,
    query_cache: Mutex<HashMap<String, CachedIds<Id>>>,
}

impl<Id> Default for TextIndex<Id> {
    fn default() -> Self {
        Self {
            tree: RwLock::new(Tree {
                root: Node::default(),
                words: 0,
                generation: 0,
            }),
            query_cache: Mutex::new(HashMap::new()),
        }
    }
}

impl<Id> TextIndex<Id>
where
    Id: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// 以文本本身作为缺省 id 加入索引
    pub fn add<T>(&self, text: &T, id: Option<Id>)
    where
        T: fmt::Display + ?Sized,
        Id: From<String>,
    {
        let raw = text.to_string();
        let id = id.unwrap_or_else(|| Id::from(raw.clone()));
        self.insert_words(&raw, id);
    }

    pub fn add_with_id<T>(&self, text: &T, id: Id)
    where
        T: fmt::Display + ?Sized,
    {
        self.insert_words(&text.to_string(), id);
    }

    fn insert_words(&self, raw: &str, id: Id) {
        let normalized = normalize(raw);
        let mut inserted = false;
        {
            let mut tree = self.tree.write();
            for word in words(&normalized) {
                if tree.root.insert(word, id.clone()) {
                    tree.words += 1;
                }
                inserted = true;
            }
            if inserted {
                tree.generation += 1;
            }
        }
        if inserted {
            self.query_cache.lock().clear();
        }
    }

    /// 返回满足全部查询词（前缀匹配）的去重 id 列表；空查询返回空。
    pub fn search_for_ids(&self, query: &str) -> Vec<Id> {
        self.collect_ids(query).1
    }

    /// 同一把读锁下取得结果及其对应的树 generation
    fn collect_ids(&self, query: &str) -> CachedIds<Id> {
        let normalized = normalize(query);
        let tree = self.tree.read();

        let mut acc: Option<Vec<Id>> = None;
        for word in words(&normalized) {
            let matches = tree.root.collect_prefix(word);
            acc = Some(match acc {
                None => matches,
                Some(prev) => {
                    let prev: HashSet<Id> = prev.into_iter().collect();
                    matches.into_iter().filter(|id| prev.contains(id)).collect()
                }
            });
            if acc.as_ref().is_some_and(|v| v.is_empty()) {
                break;
            }
        }

        let mut seen = HashSet::new();
        let ids = acc
            .unwrap_or_default()
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();
        (tree.generation, ids)
    }

    /// 查询并经 `leaves` 映射为展示对象，按 priority 升序（同 priority 保持收集顺序）。
    /// 排好序的 id 列表按原始查询串缓存。
    pub fn search<L, F>(&self, query: &str, leaves: F) -> Vec<L>
    where
        L: Prioritized,
        F: Fn(&Id) -> Option<L>,
    {
        let current = self.tree.read().generation;
        if let Some((generation, ids)) = self.query_cache.lock().get(query) {
            if *generation == current {
                return ids.iter().filter_map(&leaves).collect();
            }
        }

        let (generation, ids) = self.collect_ids(query);
        let mut found: Vec<(Id, L)> = ids
            .into_iter()
            .filter_map(|id| leaves(&id).map(|leaf| (id, leaf)))
            .collect();
        found.sort_by_key(|(_, leaf)| leaf.priority());

        let ids = found.iter().map(|(id, _)| id.clone()).collect();
        self.query_cache
            .lock()
            .insert(query.to_string(), (generation, ids));
        tracing::debug!("text index: query {:?} -> {} hits", query, found.len());

        found.into_iter().map(|(_, leaf)| leaf).collect()
    }

    /// 清空全部词条与查询缓存
    pub fn reset(&self) {
        let mut tree = self.tree.write();
        tree.root = Node::default();
        tree.words = 0;
        tree.generation += 1;
        self.query_cache.lock().clear();
    }

    /// 不同单词数
    pub fn len(&self) -> usize {
        self.tree.read().words
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn node_count(&self) -> usize {
        self.tree.read().root.node_count()
    }

    pub fn cached_queries(&self) -> usize {
        self.query_cache.lock().len()
    }
}
