use crate::loader::collection::LoadKind;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    /// 数据源失败：原样上抛，集合内容不变
    #[error("{kind} failed for {cid}: {source}")]
    Fetch {
        kind: LoadKind,
        cid: String,
        #[source]
        source: BoxError,
    },
    #[error("{kind} rejected for {cid}: another request is in flight")]
    InFlight { kind: LoadKind, cid: String },
    #[error("paginate before initial load for {cid}")]
    NotLoaded { cid: String },
    /// 同一 bucket 上更新的 load/reload 已开始，本次结果被丢弃
    #[error("{kind} superseded for {cid}")]
    Superseded { kind: LoadKind, cid: String },
    #[error("virtual list, nothing to fetch")]
    Virtual,
}

impl LoaderError {
    pub fn cid(&self) -> Option<&str> {
        match self {
            LoaderError::Fetch { cid, .. }
            | LoaderError::InFlight { cid, .. }
            | LoaderError::NotLoaded { cid }
            | LoaderError::Superseded { cid, .. } => Some(cid),
            LoaderError::Virtual => None,
        }
    }
}
