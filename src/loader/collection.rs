use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::loader::error::LoaderError;
use crate::loader::source::Indexed;

const EVENT_CAPACITY: usize = 64;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadKind {
    Load,
    Paginate,
    Reload,
}

impl fmt::Display for LoadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoadKind::Load => "load",
            LoadKind::Paginate => "paginate",
            LoadKind::Reload => "reload",
        })
    }
}

/// 单个 bucket 的生命周期
///
/// `Empty -> Loading -> Loaded`，`Loaded -> LoadingMore -> Loaded`，
/// 任意状态 `-> Reloading -> Loaded`。失败时回到最近一次稳定状态。
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum BucketState {
    Empty,
    Loading,
    Loaded,
    LoadingMore,
    Reloading,
}

impl BucketState {
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            BucketState::Loading | BucketState::LoadingMore | BucketState::Reloading
        )
    }

    fn for_kind(kind: LoadKind) -> Self {
        match kind {
            LoadKind::Load => BucketState::Loading,
            LoadKind::Paginate => BucketState::LoadingMore,
            LoadKind::Reload => BucketState::Reloading,
        }
    }
}

/// 集合事件（订阅方据此判断何时可以读取）
#[derive(Clone, Debug, PartialEq)]
pub enum CollectionEvent {
    Before(LoadKind),
    Loading(bool),
    Done {
        kind: LoadKind,
        len: usize,
        cached: bool,
    },
    Failed {
        kind: LoadKind,
        message: String,
    },
    Complete(bool),
    Expired,
}

struct Control {
    state: BucketState,
    /// 最近一次稳定状态（Empty / Loaded）
    settled: BucketState,
    /// load/reload/clear 每次 +1；结果只在 generation 未变时生效
    generation: u64,
    /// 后端已返回的原始条数（含被 is_bad 过滤掉的），paginate 从这里继续取
    fetched: usize,
    /// 每条持有记录在后端结果中的位置；merge 进来的记录为 None
    positions: Vec<Option<usize>>,
}

/// 一次 load/paginate/reload 的凭据
#[derive(Copy, Clone, Debug)]
pub(crate) struct Ticket {
    pub kind: LoadKind,
    /// 新记录的起始 index（当前持有条数）
    pub offset: usize,
    /// 后端 limit 的起点
    pub fetch_offset: usize,
    generation: u64,
}

/// 一次取数的结果：过滤后的记录及其相对请求起点的位置
pub(crate) struct Page<R> {
    pub records: Vec<R>,
    pub positions: Vec<usize>,
    /// 过滤前的条数
    pub fetched: usize,
}

impl<R> Page<R> {
    pub fn filtered(raw: Vec<R>, is_bad: impl Fn(&R) -> bool) -> Self {
        let fetched = raw.len();
        let mut records = Vec::with_capacity(fetched);
        let mut positions = Vec::with_capacity(fetched);
        for (position, record) in raw.into_iter().enumerate() {
            if !is_bad(&record) {
                records.push(record);
                positions.push(position);
            }
        }
        Self {
            records,
            positions,
            fetched,
        }
    }
}

impl<R> From<Vec<R>> for Page<R> {
    fn from(records: Vec<R>) -> Self {
        Self::filtered(records, |_| false)
    }
}

/// 一个 cid 对应的有序集合
///
/// 只有 loader 会修改内容；读取方通过 `snapshot()` 拿到一致视图，
/// 整体替换是原子的，新旧内容不会混在一起被观察到。
pub struct Collection<R> {
    cid: String,
    records: ArcSwap<Vec<R>>,
    control: Mutex<Control>,
    complete: AtomicBool,
    expired: AtomicBool,
    pagination: AtomicBool,
    pinned: AtomicBool,
    events: broadcast::Sender<CollectionEvent>,
}

impl<R> Collection<R> {
    pub fn new(cid: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            cid: cid.into(),
            records: ArcSwap::from_pointee(Vec::new()),
            control: Mutex::new(Control {
                state: BucketState::Empty,
                settled: BucketState::Empty,
                generation: 0,
                fetched: 0,
                positions: Vec::new(),
            }),
            complete: AtomicBool::new(false),
            expired: AtomicBool::new(false),
            pagination: AtomicBool::new(true),
            pinned: AtomicBool::new(false),
            events,
        }
    }

    pub fn cid(&self) -> &str {
        &self.cid
    }

    pub fn snapshot(&self) -> Arc<Vec<R>> {
        self.records.load_full()
    }

    pub fn len(&self) -> usize {
        self.records.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn state(&self) -> BucketState {
        self.control.lock().state
    }

    /// 后端已返回的原始条数
    pub fn fetched(&self) -> usize {
        self.control.lock().fetched
    }

    pub fn is_loading(&self) -> bool {
        self.state().is_busy()
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::Acquire)
    }

    pub fn has_pagination(&self) -> bool {
        self.pagination.load(Ordering::Acquire)
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CollectionEvent> {
        self.events.subscribe()
    }

    /// 标记过期：下次 gc 时移出 pool
    pub fn expire(&self) {
        self.expired.store(true, Ordering::Release);
        self.emit(CollectionEvent::Expired);
    }

    /// 不参与 gc 过期标记
    pub fn pin(&self) {
        self.pinned.store(true, Ordering::Release);
    }

    pub(crate) fn set_pagination(&self, on: bool) {
        self.pagination.store(on, Ordering::Release);
    }

    fn emit(&self, event: CollectionEvent) {
        // 没有订阅者时 send 返回 Err，忽略
        let _ = self.events.send(event);
    }

    fn set_complete(&self, state: bool) {
        let state = state || !self.has_pagination();
        if self.complete.swap(state, Ordering::AcqRel) != state {
            self.emit(CollectionEvent::Complete(state));
        }
    }

    /// 开始一次请求。paginate 只允许在 Loaded 状态下进行；
    /// load/reload 总是可以开始，并让进行中的旧请求失效。
    pub(crate) fn begin(&self, kind: LoadKind) -> Result<Ticket, LoaderError> {
        let mut ctl = self.control.lock();
        if kind == LoadKind::Paginate {
            if ctl.state.is_busy() {
                return Err(LoaderError::InFlight {
                    kind,
                    cid: self.cid.clone(),
                });
            }
            if ctl.state == BucketState::Empty {
                return Err(LoaderError::NotLoaded {
                    cid: self.cid.clone(),
                });
            }
        } else {
            ctl.generation += 1;
        }
        let was_busy = ctl.state.is_busy();
        ctl.state = BucketState::for_kind(kind);
        let paginate = kind == LoadKind::Paginate;
        let ticket = Ticket {
            kind,
            offset: if paginate { self.len() } else { 0 },
            fetch_offset: if paginate { ctl.fetched } else { 0 },
            generation: ctl.generation,
        };
        drop(ctl);

        self.emit(CollectionEvent::Before(kind));
        if !was_busy {
            self.emit(CollectionEvent::Loading(true));
        }
        Ok(ticket)
    }

    /// 写入结果。paginate 追加，load/reload 整体替换。
    /// `requested` 为本次窗口大小，用于判断是否已取完。
    pub(crate) fn commit(
        &self,
        ticket: Ticket,
        page: Page<R>,
        requested: usize,
    ) -> Result<usize, LoaderError>
    where
        R: Clone + Indexed,
    {
        let mut ctl = self.control.lock();
        if ctl.generation != ticket.generation {
            return Err(LoaderError::Superseded {
                kind: ticket.kind,
                cid: self.cid.clone(),
            });
        }

        let Page {
            mut records,
            positions,
            fetched,
        } = page;
        let len = match ticket.kind {
            LoadKind::Paginate => {
                let current = self.records.load();
                // 请求期间有记录被 propagate_remove 移除：新页的 index 接在当前末尾
                if current.len() != ticket.offset {
                    for (i, record) in records.iter_mut().enumerate() {
                        record.set_index(current.len() + i);
                    }
                }
                let base = ctl.fetched;
                ctl.positions
                    .extend(positions.into_iter().map(|p| Some(base + p)));
                ctl.fetched = base + fetched;

                let mut next = Vec::with_capacity(current.len() + records.len());
                next.extend(current.iter().cloned());
                next.extend(records);
                let len = next.len();
                self.records.store(Arc::new(next));
                len
            }
            LoadKind::Load | LoadKind::Reload => {
                ctl.positions = positions.into_iter().map(Some).collect();
                ctl.fetched = fetched;
                let len = records.len();
                self.records.store(Arc::new(records));
                self.expired.store(false, Ordering::Release);
                len
            }
        };
        ctl.state = BucketState::Loaded;
        ctl.settled = BucketState::Loaded;
        drop(ctl);

        self.set_complete(fetched < requested);
        self.emit(CollectionEvent::Loading(false));
        self.emit(CollectionEvent::Done {
            kind: ticket.kind,
            len,
            cached: false,
        });
        Ok(len)
    }

    /// 请求失败：内容不变，状态回到最近一次稳定状态
    pub(crate) fn fail(&self, ticket: Ticket, message: String) {
        let mut ctl = self.control.lock();
        if ctl.generation != ticket.generation {
            return;
        }
        ctl.state = ctl.settled;
        drop(ctl);

        self.emit(CollectionEvent::Loading(false));
        self.emit(CollectionEvent::Failed {
            kind: ticket.kind,
            message,
        });
    }

    /// 命中缓存的 load：过长的集合截回首屏大小
    pub(crate) fn serve_cached(&self, page_size: usize) -> usize
    where
        R: Clone,
    {
        let mut ctl = self.control.lock();
        let current = self.records.load_full();
        if current.len() > page_size {
            // 下次 paginate 从第一条被截掉的后端记录继续
            let resume = ctl
                .positions
                .get(page_size..)
                .and_then(|rest| rest.iter().flatten().next().copied());
            if let Some(next) = resume {
                ctl.fetched = next;
            }
            ctl.positions.truncate(page_size);
            self.records
                .store(Arc::new(current.iter().take(page_size).cloned().collect()));
            self.complete.store(false, Ordering::Release);
        }
        drop(ctl);

        let len = self.len();
        self.emit(CollectionEvent::Done {
            kind: LoadKind::Load,
            len,
            cached: true,
        });
        len
    }

    /// 清空内容并让进行中的请求失效（gc 使用）
    pub(crate) fn clear(&self) {
        let mut ctl = self.control.lock();
        ctl.generation += 1;
        ctl.state = BucketState::Empty;
        ctl.settled = BucketState::Empty;
        ctl.fetched = 0;
        ctl.positions.clear();
        self.records.store(Arc::new(Vec::new()));
        self.complete.store(false, Ordering::Release);
    }

    /// 用 `record` 替换所有 key 相同的记录，保留原有 index。返回是否命中。
    pub(crate) fn replace_keyed<K>(&self, key: &str, record: &R, key_of: K) -> bool
    where
        R: Clone + Indexed,
        K: Fn(&R) -> Option<String>,
    {
        let _ctl = self.control.lock();
        let current = self.records.load_full();
        if !current.iter().any(|r| key_of(r).as_deref() == Some(key)) {
            return false;
        }
        let next: Vec<R> = current
            .iter()
            .map(|r| {
                if key_of(r).as_deref() != Some(key) {
                    return r.clone();
                }
                let mut updated = record.clone();
                if let Some(index) = r.index() {
                    updated.set_index(index);
                }
                updated
            })
            .collect();
        self.records.store(Arc::new(next));
        true
    }

    /// 移除满足 `remove` 的记录并重排 index。
    /// 被移除的后端记录视为已在后端删除，paginate 起点随之前移。
    pub(crate) fn remove_where<P>(&self, remove: P) -> usize
    where
        R: Clone + Indexed,
        P: Fn(&R) -> bool,
    {
        let mut ctl = self.control.lock();
        let current = self.records.load_full();
        let mut next = Vec::with_capacity(current.len());
        let mut positions = Vec::with_capacity(current.len());
        let mut removed = 0;
        let mut shift = 0;
        for (i, record) in current.iter().enumerate() {
            let position = ctl.positions.get(i).copied().flatten();
            if remove(record) {
                removed += 1;
                if position.is_some() {
                    shift += 1;
                }
                continue;
            }
            let mut kept = record.clone();
            if kept.index().is_some() {
                kept.set_index(next.len());
            }
            next.push(kept);
            positions.push(position.map(|p| p - shift));
        }
        if removed == 0 {
            return 0;
        }
        ctl.positions = positions;
        ctl.fetched = ctl.fetched.saturating_sub(shift);
        self.records.store(Arc::new(next));
        removed
    }

    /// 按 key 合并：已有则替换，否则追加到末尾
    pub(crate) fn merge<K>(&self, records: Vec<R>, key_of: K) -> usize
    where
        R: Clone + Indexed,
        K: Fn(&R) -> Option<String>,
    {
        let mut ctl = self.control.lock();
        let mut next: Vec<R> = Vec::clone(&self.records.load());
        for record in records {
            let key = key_of(&record);
            let slot = key
                .as_deref()
                .and_then(|k| next.iter().position(|r| key_of(r).as_deref() == Some(k)));
            match slot {
                Some(i) => {
                    let mut updated = record;
                    if let Some(index) = next[i].index() {
                        updated.set_index(index);
                    }
                    next[i] = updated;
                }
                None => {
                    ctl.positions.push(None);
                    next.push(record);
                }
            }
        }
        let len = next.len();
        self.records.store(Arc::new(next));
        len
    }
}

impl<R> fmt::Debug for Collection<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("cid", &self.cid)
            .field("len", &self.len())
            .field("state", &self.state())
            .field("complete", &self.is_complete())
            .field("expired", &self.is_expired())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Row {
        id: u32,
        index: Option<usize>,
    }

    impl Indexed for Row {
        fn set_index(&mut self, index: usize) {
            self.index = Some(index);
        }

        fn index(&self) -> Option<usize> {
            self.index
        }
    }

    fn rows(ids: &[u32]) -> Vec<Row> {
        ids.iter().map(|&id| Row { id, index: None }).collect()
    }

    fn indexed(ids: &[u32], offset: usize) -> Vec<Row> {
        ids.iter()
            .enumerate()
            .map(|(i, &id)| Row {
                id,
                index: Some(offset + i),
            })
            .collect()
    }

    fn ids(c: &Collection<Row>) -> Vec<u32> {
        c.snapshot().iter().map(|r| r.id).collect()
    }

    fn key_of(r: &Row) -> Option<String> {
        Some(r.id.to_string())
    }

    #[test]
    fn paginate_requires_loaded_state() {
        let c: Collection<Row> = Collection::new("default");
        assert!(matches!(
            c.begin(LoadKind::Paginate),
            Err(LoaderError::NotLoaded { .. })
        ));

        let t = c.begin(LoadKind::Load).unwrap();
        assert!(matches!(
            c.begin(LoadKind::Paginate),
            Err(LoaderError::InFlight { .. })
        ));
        c.commit(t, rows(&[1, 2, 3]).into(), 3).unwrap();
        assert_eq!(c.state(), BucketState::Loaded);
        assert!(!c.is_complete());

        let t = c.begin(LoadKind::Paginate).unwrap();
        assert_eq!(t.offset, 3);
        assert_eq!(t.fetch_offset, 3);
        assert_eq!(c.commit(t, rows(&[4]).into(), 3).unwrap(), 4);
        assert!(c.is_complete());
        assert_eq!(ids(&c), vec![1, 2, 3, 4]);
    }

    #[test]
    fn filtered_rows_still_advance_the_backend_offset() {
        let c: Collection<Row> = Collection::new("default");
        let t = c.begin(LoadKind::Load).unwrap();
        let page = Page::filtered(rows(&[1, 0, 3]), |r| r.id == 0);
        assert_eq!(page.positions, vec![0, 2]);
        c.commit(t, page, 3).unwrap();

        let t = c.begin(LoadKind::Paginate).unwrap();
        assert_eq!(t.offset, 2);
        assert_eq!(t.fetch_offset, 3);
        assert_eq!(c.fetched(), 3);
    }

    #[test]
    fn newer_load_supersedes_older() {
        let c: Collection<Row> = Collection::new("default");
        let old = c.begin(LoadKind::Load).unwrap();
        let new = c.begin(LoadKind::Reload).unwrap();

        assert!(matches!(
            c.commit(old, rows(&[9, 9]).into(), 2),
            Err(LoaderError::Superseded { .. })
        ));
        assert!(c.is_empty());
        assert_eq!(c.state(), BucketState::Reloading);

        c.commit(new, rows(&[1]).into(), 2).unwrap();
        assert_eq!(ids(&c), vec![1]);
    }

    #[test]
    fn clear_supersedes_in_flight_request() {
        let c: Collection<Row> = Collection::new("folder=A");
        let t = c.begin(LoadKind::Load).unwrap();
        c.clear();
        assert!(matches!(
            c.commit(t, rows(&[1]).into(), 3),
            Err(LoaderError::Superseded { .. })
        ));
        assert_eq!(c.state(), BucketState::Empty);
        assert!(c.is_empty());
    }

    #[test]
    fn failure_restores_settled_state() {
        let c: Collection<Row> = Collection::new("default");
        let t = c.begin(LoadKind::Load).unwrap();
        c.fail(t, "boom".to_string());
        assert_eq!(c.state(), BucketState::Empty);

        let t = c.begin(LoadKind::Load).unwrap();
        c.commit(t, rows(&[1, 2]).into(), 2).unwrap();
        let t = c.begin(LoadKind::Paginate).unwrap();
        c.fail(t, "boom".to_string());
        assert_eq!(c.state(), BucketState::Loaded);
        assert_eq!(ids(&c), vec![1, 2]);
    }

    #[test]
    fn events_in_order() {
        let c: Collection<Row> = Collection::new("default");
        let mut rx = c.subscribe();

        let t = c.begin(LoadKind::Load).unwrap();
        c.commit(t, rows(&[1]).into(), 5).unwrap();
        c.expire();

        let mut seen = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            seen.push(ev);
        }
        assert_eq!(
            seen,
            vec![
                CollectionEvent::Before(LoadKind::Load),
                CollectionEvent::Loading(true),
                CollectionEvent::Complete(true),
                CollectionEvent::Loading(false),
                CollectionEvent::Done {
                    kind: LoadKind::Load,
                    len: 1,
                    cached: false
                },
                CollectionEvent::Expired,
            ]
        );
        assert!(c.is_expired());
    }

    #[test]
    fn without_pagination_always_complete() {
        let c: Collection<Row> = Collection::new("default");
        c.set_pagination(false);
        let t = c.begin(LoadKind::Load).unwrap();
        c.commit(t, rows(&[1, 2, 3]).into(), 3).unwrap();
        assert!(c.is_complete());
    }

    #[test]
    fn replace_keeps_index_and_remove_reindexes() {
        let c: Collection<Row> = Collection::new("default");
        let t = c.begin(LoadKind::Load).unwrap();
        c.commit(t, indexed(&[1, 2, 3], 0).into(), 5).unwrap();

        assert!(c.replace_keyed("2", &Row { id: 2, index: None }, key_of));
        assert_eq!(c.snapshot()[1].index, Some(1));
        assert!(!c.replace_keyed("9", &Row { id: 9, index: None }, key_of));

        assert_eq!(c.remove_where(|r| r.id == 1), 1);
        assert_eq!(*c.snapshot(), indexed(&[2, 3], 0));
        // 后端少了一条，paginate 起点前移
        assert_eq!(c.fetched(), 2);
    }

    #[test]
    fn merge_replaces_known_keys_and_appends_new_ones() {
        let c: Collection<Row> = Collection::new("detail");
        assert_eq!(c.merge(rows(&[1, 2]), key_of), 2);
        assert_eq!(c.merge(rows(&[2, 3]), key_of), 3);
        assert_eq!(ids(&c), vec![1, 2, 3]);
        assert_eq!(c.fetched(), 0);
    }
}
