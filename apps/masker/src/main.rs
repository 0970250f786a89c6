//! 胎儿脑部 MRI 批量掩膜工具.
//!
//! 用法: `masker <输入目录> <输出目录>`, 其余选项见
//! [`config::MaskerConfig::resolve`] 的环境变量说明.
//!
//! 输入目录下匹配 glob 的每个 nifti 文件各自独立地跑完整条掩膜
//! 流水线 (工作线程池按 CPU 并行度调度, 文件间无顺序保证);
//! 失败的文件被记录并跳过, 不影响其余文件.

use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::{env, fs, process};

use log::{error, info, warn};
use threadpool::ThreadPool;

use fetal_berry::infer::IntensityOracle;
use fetal_berry::pipeline::{MaskOptions, MaskingPipeline};

mod config;
mod run;

use config::MaskerConfig;

fn main() {
    simple_logger::init_with_level(log::Level::Info).expect("日志初始化失败");

    let mut args = env::args().skip(1);
    let (Some(input_dir), Some(output_dir)) = (args.next(), args.next()) else {
        eprintln!("用法: masker <输入目录> <输出目录>");
        process::exit(2);
    };
    let cfg = MaskerConfig::resolve(PathBuf::from(input_dir), PathBuf::from(output_dir));
    config::require_dir(&cfg.input_dir);

    // 所有输出目录在工作线程启动前一次性创建, 避免并发建目录竞争.
    // 建目录失败是致命错误: 任何文件处理开始前整个运行中止.
    for dir in cfg.dirs_to_create() {
        fs::create_dir_all(&dir)
            .unwrap_or_else(|e| panic!("无法创建输出目录 {}: {e}", dir.display()));
    }

    let inputs = discover_inputs(&cfg);
    if inputs.is_empty() {
        warn!("输入目录下没有匹配 `{}` 的文件", cfg.pattern);
        return;
    }
    info!("共发现 {} 个输入文件", inputs.len());

    // 模型加载失败同样在任何文件处理开始前中止整个运行.
    let opts = MaskOptions {
        smooth: cfg.smooth,
        ..Default::default()
    };
    let pipeline = Arc::new(MaskingPipeline::new(IntensityOracle, opts));
    let cfg = Arc::new(cfg);

    let skipped = dispatch(&pipeline, &cfg, inputs);

    if let Some(path) = cfg.skipped_list_path() {
        run::write_skipped_list(&path, &skipped)
            .unwrap_or_else(|e| error!("无法写出失败清单 {}: {e}", path.display()));
    }
    if !skipped.is_empty() {
        warn!("有 {} 个文件被跳过", skipped.len());
    }
}

/// 按配置的 glob 收集输入文件.
fn discover_inputs(cfg: &MaskerConfig) -> Vec<PathBuf> {
    let pattern = cfg.full_pattern();
    let paths = glob::glob(&pattern)
        .unwrap_or_else(|e| panic!("非法 glob 模式 `{pattern}`: {e}"));

    paths
        .filter_map(|entry| match entry {
            Ok(p) if p.is_file() => Some(p),
            Ok(_) => None,
            Err(e) => {
                warn!("跳过不可读的目录项: {e}");
                None
            }
        })
        .collect()
}

/// 把每个输入文件作为独立任务投入线程池, 返回失败文件集合.
///
/// 推理后端经由 `Arc` 被所有工作线程共享 ([`IntensityOracle`]
/// 可重入; 不可重入后端应包一层 `SharedModel`).
fn dispatch(
    pipeline: &Arc<MaskingPipeline<IntensityOracle>>,
    cfg: &Arc<MaskerConfig>,
    inputs: Vec<PathBuf>,
) -> Vec<PathBuf> {
    let pool = ThreadPool::new(config::cpus());
    let (tx, rx) = mpsc::channel();
    let total = inputs.len();

    for input in inputs {
        let (pipeline, cfg, tx) = (Arc::clone(pipeline), Arc::clone(cfg), tx.clone());
        pool.execute(move || {
            let outcome = run::mask_one(pipeline.as_ref(), &cfg, &input);
            // 接收端活到所有任务结束, send 不会失败.
            tx.send((input, outcome)).unwrap();
        });
    }
    drop(tx);

    let mut skipped = Vec::new();
    for (input, outcome) in rx {
        if let Err(e) = outcome {
            error!("{e}");
            error!("Failed to create a mask for {}", input.display());
            skipped.push(input);
        }
    }
    pool.join();

    info!("成功 {} / {total}", total - skipped.len());
    skipped
}
