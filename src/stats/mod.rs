use std::fmt;

use serde::Serialize;

/// 索引统计
#[derive(Clone, Debug, Default, Serialize)]
pub struct IndexStats {
    /// 目录叶子数
    pub leaves: usize,
    /// 不同单词数
    pub words: usize,
    /// 前缀树节点数（含根）
    pub nodes: usize,
    /// 查询缓存条目数
    pub cached_queries: usize,
    /// 前缀树估算内存（字节）
    pub estimated_bytes: u64,
}

/// 集合池统计
#[derive(Clone, Debug, Default, Serialize)]
pub struct PoolStats {
    pub name: String,
    pub collections: usize,
    /// 所有集合的记录总数
    pub records: usize,
    pub expired: usize,
    pub loading: usize,
    pub complete: usize,
    /// 最久未被访问的集合距今秒数
    pub idle_secs: u64,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct StatsReport {
    pub index: IndexStats,
    pub pools: Vec<PoolStats>,
}

fn human_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "╔══════════════════════════════════════════════════╗")?;
        writeln!(f, "║           catalog-pool Report                    ║")?;
        writeln!(f, "╠══════════════════════════════════════════════════╣")?;
        writeln!(f, "║ Text index:                                      ║")?;
        writeln!(f, "║   leaves:       {:>10}                       ║", self.index.leaves)?;
        writeln!(f, "║   words:        {:>10}                       ║", self.index.words)?;
        writeln!(
            f,
            "║   nodes:        {:>10}  ({:>10})          ║",
            self.index.nodes,
            human_bytes(self.index.estimated_bytes)
        )?;
        writeln!(
            f,
            "║   query cache:  {:>10}                       ║",
            self.index.cached_queries
        )?;
        for pool in &self.pools {
            writeln!(f, "╠──────────────────────────────────────────────────╣")?;
            writeln!(f, "║ Pool {:<44}║", pool.name)?;
            writeln!(f, "║   collections:  {:>10}                       ║", pool.collections)?;
            writeln!(f, "║   records:      {:>10}                       ║", pool.records)?;
            writeln!(f, "║   expired:      {:>10}                       ║", pool.expired)?;
            writeln!(f, "║   loading:      {:>10}                       ║", pool.loading)?;
            writeln!(f, "║   complete:     {:>10}                       ║", pool.complete)?;
            writeln!(f, "║   max idle:     {:>9}s                       ║", pool.idle_secs)?;
        }
        writeln!(f, "╚══════════════════════════════════════════════════╝")?;
        Ok(())
    }
}
