use catalog_pool::config::Config;
use catalog_pool::index::Catalog;
use catalog_pool::loader::{CollectionLoader, QueryParams};
use catalog_pool::query::{CatalogListing, QueryServer, QUERY_KEY};
use catalog_pool::stats::StatsReport;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "catalog-pool", version, about = "Searchable settings catalog with paged result pools")]
struct Cli {
    /// 配置文件（TOML）
    #[arg(short, long, default_value = "catalog-pool.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 启动 HTTP 查询服务
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// 一次性查询并打印结果
    Search {
        query: String,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// 分页浏览查询结果
    Browse {
        query: String,
        /// 首屏之后再追加的页数
        #[arg(short, long, default_value_t = 1)]
        pages: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::load_or_default(&cli.config)?;
    let catalog = Arc::new(Catalog::from_config(&config.catalog));

    match cli.command {
        Command::Serve { port } => {
            let port = port.unwrap_or(config.server.port);
            info!("Query via: http://localhost:{}/search?q=keyword", port);
            let server = QueryServer::new(catalog, config.server.default_limit);
            tokio::select! {
                res = server.run(port) => res?,
                _ = tokio::signal::ctrl_c() => info!("Shutting down..."),
            }
        }
        Command::Search { query, limit } => {
            let limit = limit.unwrap_or(config.server.default_limit);
            for leaf in catalog.search(&query).into_iter().take(limit) {
                println!("{}\t{} / {}\t{}", leaf.id, leaf.page, leaf.section, leaf.text);
            }
        }
        Command::Browse { query, pages } => {
            let loader = CollectionLoader::new(
                "settings",
                CatalogListing::new(catalog.clone()),
                config.loader.clone(),
            );
            let params = QueryParams::new().with(QUERY_KEY, query);

            let collection = loader.load(params.clone()).await?;
            for _ in 0..pages {
                if collection.is_complete() {
                    break;
                }
                loader.paginate(params.clone()).await?;
            }

            for row in collection.snapshot().iter() {
                println!(
                    "{:>4}  {}\t{}",
                    row.index.unwrap_or_default(),
                    row.leaf.id,
                    row.leaf.text
                );
            }
            let report = StatsReport {
                index: catalog.stats(),
                pools: vec![loader.stats()],
            };
            eprint!("{}", report);
        }
    }

    Ok(())
}
