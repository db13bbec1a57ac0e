use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;

use crate::loader::collection::Collection;
use crate::loader::params::{cid_pairs, DEFAULT_CID};
use crate::loader::source::Indexed;
use crate::stats::PoolStats;

/// gc 从不回收的详情集合
pub const DETAIL_CID: &str = "detail";
/// 搜索结果集合没有可靠的重置时机，gc 跳过
const SEARCH_PREFIX: &str = "search";

struct Entry<R> {
    collection: Arc<Collection<R>>,
    last_access: Instant,
}

/// cid -> 集合 的注册表。相同 cid 总是返回同一个 `Arc<Collection>`。
pub struct Pool<R> {
    name: String,
    inner: DashMap<String, Entry<R>>,
}

impl<R> Pool<R> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 取集合，不存在则创建；同时刷新访问时间
    pub fn get(&self, cid: &str) -> Arc<Collection<R>> {
        let mut entry = self
            .inner
            .entry(cid.to_string())
            .or_insert_with(|| Entry {
                collection: Arc::new(Collection::new(cid)),
                last_access: Instant::now(),
            });
        entry.last_access = Instant::now();
        entry.collection.clone()
    }

    pub fn get_default(&self) -> Arc<Collection<R>> {
        self.get(DEFAULT_CID)
    }

    /// 取集合并将其排除在 gc 过期标记之外
    pub fn pin(&self, cid: &str) -> Arc<Collection<R>> {
        let collection = self.get(cid);
        collection.pin();
        collection
    }

    pub fn contains(&self, cid: &str) -> bool {
        self.inner.contains_key(cid)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn collections(&self) -> Vec<Arc<Collection<R>>> {
        self.inner.iter().map(|e| e.collection.clone()).collect()
    }

    pub fn last_access(&self, cid: &str) -> Option<Instant> {
        self.inner.get(cid).map(|e| e.last_access)
    }

    /// cid 中含有 `folder=<id>` 的全部集合
    pub fn by_folder(&self, folder: &str) -> Vec<Arc<Collection<R>>> {
        self.inner
            .iter()
            .filter(|e| cid_pairs(e.key()).any(|(k, v)| k == "folder" && v == folder))
            .map(|e| e.collection.clone())
            .collect()
    }

    /// 让指定 folder 的集合全部过期，返回受影响的集合（按 cid 去重）
    pub fn reset_folder<'a, I>(&self, folders: I) -> Vec<Arc<Collection<R>>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut hit: Vec<Arc<Collection<R>>> = Vec::new();
        for folder in folders {
            for c in self.by_folder(folder) {
                if !hit.iter().any(|h| Arc::ptr_eq(h, &c)) {
                    hit.push(c);
                }
            }
        }
        for c in &hit {
            c.expire();
        }
        hit
    }

    /// 垃圾回收：
    /// 1. 已过期的集合清空并移出 pool（detail 与 search* 除外）
    /// 2. 其余未 pin 的集合统一标记过期；仍在使用的集合会在下次加载时恢复
    ///
    /// 返回移除的集合数。
    pub fn gc(&self) -> usize {
        let removed = self.sweep();
        self.mark_expired();
        removed
    }

    /// 同 `gc`，并在标记过期前把 detail 集合中不再被任何集合引用的记录移除
    pub fn gc_with<K>(&self, key_of: K) -> usize
    where
        R: Clone + Indexed,
        K: Fn(&R) -> Option<String>,
    {
        let removed = self.sweep();

        let mut referenced = HashSet::new();
        for e in self.inner.iter().filter(|e| e.key() != DETAIL_CID) {
            referenced.extend(e.collection.snapshot().iter().filter_map(&key_of));
        }
        if let Some(detail) = self.inner.get(DETAIL_CID).map(|e| e.collection.clone()) {
            let pruned = detail.remove_where(|r| {
                key_of(r).is_some_and(|k| !referenced.contains(&k))
            });
            if pruned > 0 {
                tracing::debug!("pool {}: gc pruned {} detail records", self.name, pruned);
            }
        }

        self.mark_expired();
        removed
    }

    fn sweep(&self) -> usize {
        let stale: Vec<String> = self
            .inner
            .iter()
            .filter(|e| {
                e.key() != DETAIL_CID
                    && !e.key().starts_with(SEARCH_PREFIX)
                    && e.collection.is_expired()
            })
            .map(|e| e.key().clone())
            .collect();

        for cid in &stale {
            if let Some((_, entry)) = self.inner.remove(cid) {
                entry.collection.clear();
            }
        }

        if !stale.is_empty() {
            tracing::debug!("pool {}: gc removed {} collections", self.name, stale.len());
        }
        stale.len()
    }

    fn mark_expired(&self) {
        for e in self.inner.iter() {
            if e.key() != DETAIL_CID && !e.collection.is_pinned() {
                e.collection.expire();
            }
        }
    }

    /// 一条记录被修改：替换所有集合中 key 相同的记录（保留各自的 index）。
    /// 返回受影响的集合数。
    pub fn propagate_change<K>(&self, key: &str, record: &R, key_of: K) -> usize
    where
        R: Clone + Indexed,
        K: Fn(&R) -> Option<String>,
    {
        let touched = self
            .collections()
            .iter()
            .filter(|c| c.replace_keyed(key, record, &key_of))
            .count();
        tracing::debug!("pool {}: change of {} reached {} collections", self.name, key, touched);
        touched
    }

    /// 一条记录被删除：从所有集合中移除。返回受影响的集合数。
    pub fn propagate_remove<K>(&self, key: &str, key_of: K) -> usize
    where
        R: Clone + Indexed,
        K: Fn(&R) -> Option<String>,
    {
        let touched = self
            .collections()
            .iter()
            .filter(|c| c.remove_where(|r| key_of(r).as_deref() == Some(key)) > 0)
            .count();
        tracing::debug!("pool {}: removal of {} reached {} collections", self.name, key, touched);
        touched
    }

    /// 把记录按 key 合并进指定集合（缺省用于 detail）
    pub fn merge<K>(&self, cid: &str, records: Vec<R>, key_of: K) -> Arc<Collection<R>>
    where
        R: Clone + Indexed,
        K: Fn(&R) -> Option<String>,
    {
        let collection = self.get(cid);
        collection.merge(records, key_of);
        collection
    }

    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            name: self.name.clone(),
            ..PoolStats::default()
        };
        let now = Instant::now();
        for e in self.inner.iter() {
            stats.idle_secs = stats
                .idle_secs
                .max(now.duration_since(e.last_access).as_secs());
            stats.collections += 1;
            stats.records += e.collection.len();
            if e.collection.is_expired() {
                stats.expired += 1;
            }
            if e.collection.is_loading() {
                stats.loading += 1;
            }
            if e.collection.is_complete() {
                stats.complete += 1;
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_cid_same_instance() {
        let pool: Pool<u32> = Pool::new("mail");
        let a = pool.get("folder=A");
        let b = pool.get("folder=A");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&pool.get_default(), &pool.get("default")));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn folder_lookup_matches_whole_pair() {
        let pool: Pool<u32> = Pool::new("mail");
        pool.get("folder=A&sort=1");
        pool.get("folder=A&sort=2");
        pool.get("folder=AB&sort=1");
        pool.get("a=folder");

        assert_eq!(pool.by_folder("A").len(), 2);
        assert_eq!(pool.by_folder("AB").len(), 1);

        let hit = pool.reset_folder(["A", "A"]);
        assert_eq!(hit.len(), 2);
        assert!(hit.iter().all(|c| c.is_expired()));
        assert!(!pool.get("folder=AB&sort=1").is_expired());
    }

    #[test]
    fn gc_removes_expired_and_marks_the_rest() {
        let pool: Pool<u32> = Pool::new("mail");
        let old = pool.get("folder=old");
        let live = pool.get("folder=live");
        let pinned = pool.pin("folder=pinned");
        pool.get(DETAIL_CID);
        pool.get("search=foo").expire();

        old.expire();
        assert_eq!(pool.gc(), 1);
        assert!(!pool.contains("folder=old"));
        assert!(pool.contains("search=foo"));
        assert!(pool.contains(DETAIL_CID));

        assert!(live.is_expired());
        assert!(!pinned.is_expired());
        assert!(!pool.get(DETAIL_CID).is_expired());

        // 第二轮：live 没被重新加载，回收
        assert_eq!(pool.gc(), 1);
        assert!(!pool.contains("folder=live"));
    }

    #[derive(Clone, Debug, PartialEq)]
    struct Mail {
        id: u32,
        subject: &'static str,
        index: Option<usize>,
    }

    impl Indexed for Mail {
        fn set_index(&mut self, index: usize) {
            self.index = Some(index);
        }

        fn index(&self) -> Option<usize> {
            self.index
        }
    }

    fn mail(id: u32, subject: &'static str) -> Mail {
        Mail {
            id,
            subject,
            index: None,
        }
    }

    /// id 0 表示没有身份的记录
    fn key_of(m: &Mail) -> Option<String> {
        (m.id != 0).then(|| m.id.to_string())
    }

    fn subjects(c: &Collection<Mail>) -> Vec<&'static str> {
        c.snapshot().iter().map(|m| m.subject).collect()
    }

    #[test]
    fn change_reaches_every_collection_holding_the_record() {
        let pool: Pool<Mail> = Pool::new("mail");
        let a = pool.merge("folder=A", vec![mail(1, "hi"), mail(2, "lunch")], key_of);
        let b = pool.merge("folder=B&sort=1", vec![mail(2, "lunch")], key_of);
        let other = pool.merge("folder=C", vec![mail(3, "memo")], key_of);

        assert_eq!(pool.propagate_change("2", &mail(2, "lunch moved"), key_of), 2);
        assert_eq!(subjects(&a), vec!["hi", "lunch moved"]);
        assert_eq!(subjects(&b), vec!["lunch moved"]);
        assert_eq!(subjects(&other), vec!["memo"]);
    }

    #[test]
    fn removal_reaches_every_collection_and_keeps_indices_dense() {
        let pool: Pool<Mail> = Pool::new("mail");
        let mut rows = vec![mail(1, "a"), mail(2, "b"), mail(3, "c")];
        for (i, m) in rows.iter_mut().enumerate() {
            m.set_index(i);
        }
        let a = pool.merge("folder=A", rows, key_of);
        let detail = pool.merge(DETAIL_CID, vec![mail(2, "b")], key_of);

        assert_eq!(pool.propagate_remove("2", key_of), 2);
        assert!(detail.is_empty());
        let held: Vec<(u32, Option<usize>)> = a.snapshot().iter().map(|m| (m.id, m.index)).collect();
        assert_eq!(held, vec![(1, Some(0)), (3, Some(1))]);
        assert_eq!(pool.propagate_remove("2", key_of), 0);
    }

    #[test]
    fn gc_prunes_unreferenced_detail_records() {
        let pool: Pool<Mail> = Pool::new("mail");
        pool.merge("folder=A", vec![mail(1, "kept")], key_of);
        pool.merge("folder=old", vec![mail(2, "gone")], key_of).expire();
        let detail = pool.merge(
            DETAIL_CID,
            vec![mail(1, "kept"), mail(2, "gone"), mail(3, "orphan"), mail(0, "anonymous")],
            key_of,
        );

        assert_eq!(pool.gc_with(key_of), 1);
        assert_eq!(subjects(&detail), vec!["kept", "anonymous"]);
        assert!(!detail.is_expired());
        assert!(pool.get("folder=A").is_expired());
    }

    #[test]
    fn get_refreshes_last_access() {
        let pool: Pool<u32> = Pool::new("mail");
        assert!(pool.last_access("folder=A").is_none());
        pool.get("folder=A");
        let first = pool.last_access("folder=A").unwrap();
        pool.get("folder=A");
        assert!(pool.last_access("folder=A").unwrap() >= first);
        assert_eq!(pool.stats().idle_secs, 0);
    }

    #[test]
    fn stats_count_collections() {
        let pool: Pool<u32> = Pool::new("tasks");
        pool.get("a=1");
        pool.get("a=2").expire();
        let s = pool.stats();
        assert_eq!(s.name, "tasks");
        assert_eq!(s.collections, 2);
        assert_eq!(s.expired, 1);
        assert_eq!(s.records, 0);
    }
}
