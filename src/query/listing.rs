use std::future::Future;
use std::sync::Arc;

use serde::Serialize;

use crate::index::{Catalog, Leaf};
use crate::loader::{CollectionSource, Indexed, QueryParams};

pub const QUERY_KEY: &str = "q";

/// 带位置的搜索结果行
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ListedLeaf {
    #[serde(flatten)]
    pub leaf: Leaf,
    pub index: Option<usize>,
}

impl Indexed for ListedLeaf {
    fn set_index(&mut self, index: usize) {
        self.index = Some(index);
    }

    fn index(&self) -> Option<usize> {
        self.index
    }
}

/// 把目录搜索结果当作分页数据源：`q` 为查询串，按 `limit` 截取
pub struct CatalogListing {
    catalog: Arc<Catalog>,
}

impl CatalogListing {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }
}

impl CollectionSource for CatalogListing {
    type Record = ListedLeaf;

    /// 空查询没有结果可列
    fn query_params(&self, params: QueryParams) -> Option<QueryParams> {
        let q = params.get(QUERY_KEY)?.as_str()?;
        if q.trim().is_empty() {
            return None;
        }
        Some(params)
    }

    fn key(&self, record: &ListedLeaf) -> Option<String> {
        Some(record.leaf.id.clone())
    }

    fn fetch(
        &self,
        params: QueryParams,
    ) -> impl Future<Output = anyhow::Result<Vec<ListedLeaf>>> + Send {
        let catalog = self.catalog.clone();
        async move {
            let q = params
                .get(QUERY_KEY)
                .and_then(|v| v.as_str())
                .ok_or_else(|| anyhow::anyhow!("missing query parameter {:?}", QUERY_KEY))?;
            let hits = catalog.search(q);
            let range = match params.limit() {
                Some(limit) => limit.range(hits.len()),
                None => 0..hits.len(),
            };
            Ok::<_, anyhow::Error>(
                hits[range]
                    .iter()
                    .cloned()
                    .map(|leaf| ListedLeaf { leaf, index: None })
                    .collect(),
            )
        }
    }
}
