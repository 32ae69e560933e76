use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use rayon::prelude::*;
use rowset_cache::core::Value;
use rowset_cache::{
    CacheConfig, Envelope, MemoryDataSource, MemoryTable, NullProgress, ResultSetCache,
    ResultSetProvider,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const LAYER: &str = "points";
const MAX_ATTEMPTS: u32 = 8;

/// 模拟多线程 map renderer：在合成点图层上反复重绘滑动视图
#[derive(Parser, Debug)]
#[command(name = "rowset-cache", version, about)]
struct Args {
    /// 图层行数（排成近似正方形的点阵）
    #[arg(long, default_value_t = 10_000)]
    rows: u64,

    /// 重绘线程数
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// 总帧数
    #[arg(long, default_value_t = 64)]
    frames: u32,

    /// toml 配置文件
    #[arg(long)]
    config: Option<PathBuf>,

    /// 以 JSON 输出统计
    #[arg(long)]
    json: bool,

    /// 不安装空间索引工厂（全部走全表扫描）
    #[arg(long)]
    no_index: bool,
}

fn build_source(rows: u64) -> anyhow::Result<(MemoryDataSource, f64)> {
    let side = (rows as f64).sqrt().ceil().max(1.0);
    let mut table = MemoryTable::new(["gid", "label", "geom"])
        .with_primary_key("gid")
        .with_geometry_column("geom");
    for i in 0..rows {
        let (x, y) = ((i as f64) % side, (i as f64 / side).floor());
        table.push_row(vec![
            Value::Integer(i as i64 + 1),
            Value::Text(format!("pt-{}", i + 1)),
            Value::Geometry(Envelope::point(x, y)),
        ]);
    }
    let source = MemoryDataSource::default();
    source.register(LAYER, table)?;
    Ok((source, side))
}

/// 每 8 帧一次全图，其余是沿对角线平移的 1/10 视图
fn view_for(frame: u32, side: f64) -> Envelope {
    if frame % 8 == 0 {
        return Envelope::new(0.0, 0.0, side, side);
    }
    let w = side / 10.0;
    let t = f64::from(frame % 10) * w;
    Envelope::new(t, t, t + w, t + w)
}

fn draw_once(cache: &ResultSetCache, view: &Envelope) -> rowset_cache::Result<usize> {
    let mut rs = cache.get_result_set_provider(LAYER, &NullProgress)?;
    let drawn = {
        let cursor = rs.execute(&NullProgress, view)?;
        let mut n = 0;
        while cursor.next()? {
            if cursor.current_row()?.is_some() {
                n += 1;
            }
        }
        n
    };
    rs.close();
    Ok(drawn)
}

fn redraw(cache: &ResultSetCache, frame: u32, side: f64) -> anyhow::Result<usize> {
    let view = view_for(frame, side);
    let mut attempt = 1;
    loop {
        match draw_once(cache, &view) {
            Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                tracing::debug!("Frame {} busy (attempt {}): {}", frame, attempt, e);
                attempt += 1;
            }
            other => return Ok(other?),
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => CacheConfig::from_toml_file(path)?,
        None => CacheConfig::default(),
    };
    if args.no_index {
        config.spatial_index = false;
    }

    let (source, side) = build_source(args.rows)?;
    info!(
        "Starting rowset-cache demo: {} rows, {} threads, {} frames",
        args.rows, args.threads, args.frames
    );
    let cache = ResultSetCache::new(Arc::new(source), config)?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(args.threads.max(1))
        .build()?;
    let started = Instant::now();
    let drawn: Vec<usize> = pool.install(|| {
        (0..args.frames)
            .into_par_iter()
            .map(|f| redraw(&cache, f, side))
            .collect::<anyhow::Result<Vec<_>>>()
    })?;
    info!(
        "Rendered {} frames ({} features) in {:?}",
        drawn.len(),
        drawn.iter().sum::<usize>(),
        started.elapsed()
    );

    let stats = cache.stats();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print!("{}", stats);
    }

    cache.clear_cache()?;
    Ok(())
}
