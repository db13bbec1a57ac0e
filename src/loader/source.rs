use std::future::Future;

use serde_json::Value;

use crate::loader::params::QueryParams;

/// 记录在有序集合中的位置标注
pub trait Indexed {
    fn set_index(&mut self, index: usize);
    fn index(&self) -> Option<usize>;
}

/// JSON 记录：写入对象的 `index` 字段；非对象记录不标注
impl Indexed for Value {
    fn set_index(&mut self, index: usize) {
        if let Value::Object(map) = self {
            map.insert("index".to_string(), Value::from(index));
        }
    }

    fn index(&self) -> Option<usize> {
        self.get("index")?.as_u64().map(|i| i as usize)
    }
}

/// 分页数据源：由调用方注入的取数与钩子
///
/// `fetch` 收到的参数里已写入 `limit`（"offset,count"）。
pub trait CollectionSource: Send + Sync + 'static {
    type Record: Indexed + Clone + Send + Sync + 'static;

    /// 调用方上下文 -> 完整查询参数；返回 None 表示虚拟列表（不取数）
    fn query_params(&self, params: QueryParams) -> Option<QueryParams> {
        Some(params)
    }

    fn fetch(
        &self,
        params: QueryParams,
    ) -> impl Future<Output = anyhow::Result<Vec<Self::Record>>> + Send;

    /// 永远不进入集合的记录
    fn is_bad(&self, _record: &Self::Record) -> bool {
        false
    }

    /// 记录身份，用于跨集合同步修改/删除以及 detail 集合回收；
    /// None 的记录不参与同步，也不会被 gc 从 detail 中移除
    fn key(&self, _record: &Self::Record) -> Option<String> {
        None
    }

    fn before(&self, _offset: usize, _params: &QueryParams, _records: &[Self::Record]) {}

    /// 每条记录加入集合时调用一次；出错只记日志，不影响后续记录
    fn each(
        &self,
        _record: &Self::Record,
        _position: usize,
        _offset: usize,
        _params: &QueryParams,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn after(&self, _offset: usize, _params: &QueryParams, _records: &[Self::Record]) {}
}

/// 闭包数据源
pub struct FnSource<R, F> {
    fetch: F,
    _record: std::marker::PhantomData<fn() -> R>,
}

impl<R, F> FnSource<R, F> {
    pub fn new(fetch: F) -> Self {
        Self {
            fetch,
            _record: std::marker::PhantomData,
        }
    }
}

impl<R, F, Fut> CollectionSource for FnSource<R, F>
where
    R: Indexed + Clone + Send + Sync + 'static,
    F: Fn(QueryParams) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Vec<R>>> + Send,
{
    type Record = R;

    fn fetch(&self, params: QueryParams) -> impl Future<Output = anyhow::Result<Vec<R>>> + Send {
        (self.fetch)(params)
    }
}
