use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::loader::collection::{Collection, LoadKind, Page, Ticket};
use crate::loader::error::LoaderError;
use crate::loader::params::{Limit, QueryParams, LIMIT_KEY};
use crate::loader::pool::{Pool, DETAIL_CID};
use crate::loader::source::{CollectionSource, Indexed};
use crate::stats::PoolStats;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// load 的首屏大小
    pub primary_page_size: usize,
    /// paginate 每次追加的大小
    pub secondary_page_size: usize,
    /// 关闭后不带 limit 取数，集合视为一次取完
    pub use_limit: bool,
    /// 不参与 cid 计算的参数
    pub ignore: Vec<String>,
    /// 未过期且有内容的集合直接复用，不再取数
    pub reuse_cached: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            primary_page_size: 50,
            secondary_page_size: 200,
            use_limit: true,
            ignore: vec![LIMIT_KEY.to_string(), "max".to_string()],
            reuse_cached: false,
        }
    }
}

/// 分页加载器：按 cid 维护有序集合，负责 load / paginate / reload
///
/// 同一 bucket 上：load/reload 总是开始并让旧请求失效（后写者胜），
/// paginate 在有请求进行中时直接拒绝。
pub struct CollectionLoader<S: CollectionSource> {
    source: S,
    config: LoaderConfig,
    pool: Pool<S::Record>,
}

impl<S: CollectionSource> CollectionLoader<S> {
    pub fn new(name: impl Into<String>, source: S, config: LoaderConfig) -> Self {
        Self {
            source,
            config,
            pool: Pool::new(name),
        }
    }

    pub fn with_defaults(name: impl Into<String>, source: S) -> Self {
        Self::new(name, source, LoaderConfig::default())
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn pool(&self) -> &Pool<S::Record> {
        &self.pool
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn cid(&self, params: &QueryParams) -> String {
        params.cid(&self.config.ignore)
    }

    pub fn get_collection(&self, params: &QueryParams) -> Arc<Collection<S::Record>> {
        self.pool.get(&self.cid(params))
    }

    pub fn get_default_collection(&self) -> Arc<Collection<S::Record>> {
        self.pool.get_default()
    }

    fn resolve(
        &self,
        params: QueryParams,
    ) -> Result<(QueryParams, Arc<Collection<S::Record>>), LoaderError> {
        let params = self.source.query_params(params).ok_or(LoaderError::Virtual)?;
        let collection = self.get_collection(&params);
        collection.set_pagination(self.config.use_limit);
        Ok((params, collection))
    }

    /// 首屏：offset 0 取 `primary_page_size` 条，替换集合内容
    pub async fn load(&self, params: QueryParams) -> Result<Arc<Collection<S::Record>>, LoaderError> {
        let (mut params, collection) = self.resolve(params)?;

        if self.config.reuse_cached
            && !collection.is_expired()
            && !collection.is_loading()
            && (!collection.is_empty() || collection.is_complete())
        {
            let len = collection.serve_cached(self.config.primary_page_size);
            tracing::debug!("load {}: served {} cached records", collection.cid(), len);
            return Ok(collection);
        }

        let ticket = collection.begin(LoadKind::Load)?;
        let requested = self.config.primary_page_size;
        if self.config.use_limit {
            params.set_limit(Limit::new(0, requested));
        }
        self.fetch_into(&collection, ticket, params, requested).await?;
        Ok(collection)
    }

    /// 追加下一页：从后端已返回的原始条数处继续，取 `secondary_page_size` 条。
    /// 新记录的 index 接在当前持有条数之后。
    pub async fn paginate(
        &self,
        params: QueryParams,
    ) -> Result<Arc<Collection<S::Record>>, LoaderError> {
        let (mut params, collection) = self.resolve(params)?;

        let ticket = collection.begin(LoadKind::Paginate)?;
        let requested = self.config.secondary_page_size;
        if self.config.use_limit {
            params.set_limit(Limit::new(ticket.fetch_offset, requested));
        }
        self.fetch_into(&collection, ticket, params, requested).await?;
        Ok(collection)
    }

    /// 从头重取，集合对象不变（订阅者保持有效），内容整体替换。
    /// 窗口覆盖后端已返回的全部记录，避免列表变短。
    pub async fn reload(
        &self,
        params: QueryParams,
    ) -> Result<Arc<Collection<S::Record>>, LoaderError> {
        let (mut params, collection) = self.resolve(params)?;

        let held = collection.fetched();
        let ticket = collection.begin(LoadKind::Reload)?;
        let requested = self.reload_window(held);
        if self.config.use_limit {
            params.set_limit(Limit::new(0, requested));
        }
        self.fetch_into(&collection, ticket, params, requested).await?;
        Ok(collection)
    }

    /// 已做过 n 次 paginate 的集合：primary + n * secondary；空集合取首屏
    fn reload_window(&self, held: usize) -> usize {
        let primary = self.config.primary_page_size;
        if held == 0 {
            return primary;
        }
        let secondary = self.config.secondary_page_size.max(1);
        let pages = held.saturating_sub(primary).div_ceil(secondary);
        held.max(pages * secondary + primary)
    }

    async fn fetch_into(
        &self,
        collection: &Collection<S::Record>,
        ticket: Ticket,
        params: QueryParams,
        requested: usize,
    ) -> Result<usize, LoaderError> {
        let kind = ticket.kind;
        tracing::debug!(
            "{} {}: fetching limit={:?}",
            kind,
            collection.cid(),
            params.limit()
        );

        let records = match self.source.fetch(params.clone()).await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!("{} {} failed: {:#}", kind, collection.cid(), e);
                collection.fail(ticket, format!("{e:#}"));
                return Err(LoaderError::Fetch {
                    kind,
                    cid: collection.cid().to_string(),
                    source: e.into(),
                });
            }
        };

        let mut page = Page::filtered(records, |r| self.source.is_bad(r));
        let fetched = page.fetched;
        self.add_index(ticket.offset, &params, &mut page.records);

        match collection.commit(ticket, page, requested) {
            Ok(len) => {
                tracing::debug!("{} {}: {} fetched, {} held", kind, collection.cid(), fetched, len);
                Ok(len)
            }
            Err(e) => {
                tracing::debug!("{} {}: result discarded ({})", kind, e.cid().unwrap_or("-"), e);
                Err(e)
            }
        }
    }

    /// 记录在别处被修改：同步到本 pool 中所有持有它的集合
    pub fn propagate_change(&self, record: &S::Record) -> usize {
        match self.source.key(record) {
            Some(key) => self
                .pool
                .propagate_change(&key, record, |r| self.source.key(r)),
            None => 0,
        }
    }

    /// 记录已删除：从本 pool 的所有集合中移除
    pub fn propagate_remove(&self, key: &str) -> usize {
        self.pool.propagate_remove(key, |r| self.source.key(r))
    }

    /// 单条记录放入 detail 集合（按 key 合并）
    pub fn add_detail(&self, records: Vec<S::Record>) -> Arc<Collection<S::Record>> {
        self.pool
            .merge(DETAIL_CID, records, |r| self.source.key(r))
    }

    /// pool gc，并回收 detail 中不再被引用的记录
    pub fn gc(&self) -> usize {
        self.pool.gc_with(|r| self.source.key(r))
    }

    /// 写入 `index = offset + position` 并依次调用 before / each / after。
    /// 单条 each 出错只记日志，不影响后续记录。
    pub fn add_index(&self, offset: usize, params: &QueryParams, records: &mut [S::Record]) {
        self.source.before(offset, params, records);
        for (position, record) in records.iter_mut().enumerate() {
            record.set_index(offset + position);
            if let Err(e) = self.source.each(record, position, offset, params) {
                tracing::warn!("each hook failed at index {}: {:#}", offset + position, e);
            }
        }
        self.source.after(offset, params, records);
    }
}
