//! 批处理配置.
//!
//! 沿用环境变量风格的配置解析: 两个位置参数指定输入/输出目录,
//! 其余选项从 `MASKER_*` 环境变量读取.

use std::env;
use std::path::{Path, PathBuf};

use fetal_berry::consts::DEFAULT_MASK_SUFFIX;

/// 输入文件筛选 glob 的默认值: 递归匹配 .nii 与 .nii.gz.
pub const DEFAULT_PATTERN: &str = "**/*.nii*";

/// 批处理配置项.
#[derive(Debug, Clone)]
pub struct MaskerConfig {
    /// 输入目录.
    pub input_dir: PathBuf,

    /// 输出目录. 掩膜文件直接写在该目录下.
    pub output_dir: PathBuf,

    /// 输入文件筛选 glob (相对输入目录, 支持 `**` 递归).
    pub pattern: String,

    /// 掩膜输出文件名后缀.
    pub suffix: String,

    /// 是否启用后处理平滑.
    pub smooth: bool,

    /// 失败文件清单的输出文件名 (相对输出目录). `None` 表示不输出.
    pub skipped_list: Option<String>,

    /// overlay 输出子目录名 (相对输出目录). `None` 表示不生成 overlay.
    pub overlay_dest: Option<String>,

    /// overlay 背景灰度系数集合. 每个系数各占一个子目录.
    pub overlay_backgrounds: Vec<f32>,

    /// 输入文件副本的输出子目录名 (相对输出目录). `None` 表示不复制.
    pub input_dest: Option<String>,
}

impl MaskerConfig {
    /// 从位置参数与 `MASKER_*` 环境变量解析配置.
    ///
    /// 识别的环境变量:
    ///
    /// - `MASKER_PATTERN`: 输入筛选 glob, 默认 `**/*.nii*`;
    /// - `MASKER_SUFFIX`: 掩膜文件名后缀, 默认 `_mask.nii`;
    /// - `MASKER_NO_SMOOTH`: 非空时关闭后处理平滑;
    /// - `MASKER_SKIPPED_LIST`: 失败清单文件名, 缺省不输出;
    /// - `MASKER_OVERLAY_DEST`: overlay 子目录名, 缺省不生成;
    /// - `MASKER_OVERLAY_BACKGROUNDS`: 逗号分隔的背景系数, 默认 `0.2`;
    /// - `MASKER_INPUT_DEST`: 输入副本子目录名, 缺省不复制.
    ///
    /// # 注意
    ///
    /// 背景系数必须全部落在 `[0, 1)` 内, 否则程序 panic (启动期配置错误).
    pub fn resolve(input_dir: PathBuf, output_dir: PathBuf) -> Self {
        let backgrounds = env::var("MASKER_OVERLAY_BACKGROUNDS")
            .map(|s| parse_backgrounds(&s).expect("MASKER_OVERLAY_BACKGROUNDS 格式非法"))
            .unwrap_or_else(|_| vec![0.2]);

        Self {
            input_dir,
            output_dir,
            pattern: env_or("MASKER_PATTERN", DEFAULT_PATTERN),
            suffix: env_or("MASKER_SUFFIX", DEFAULT_MASK_SUFFIX),
            smooth: env::var("MASKER_NO_SMOOTH").map_or(true, |v| v.is_empty()),
            skipped_list: env_opt("MASKER_SKIPPED_LIST"),
            overlay_dest: env_opt("MASKER_OVERLAY_DEST"),
            overlay_backgrounds: backgrounds,
            input_dest: env_opt("MASKER_INPUT_DEST"),
        }
    }

    /// 计算所有 overlay 输出子目录及其对应的背景系数.
    ///
    /// 子目录按系数命名 (如 `overlay/b0.20`), 一个系数一个目录.
    pub fn overlay_dirs(&self) -> Vec<(PathBuf, f32)> {
        let Some(dest) = &self.overlay_dest else {
            return vec![];
        };
        self.overlay_backgrounds
            .iter()
            .map(|&b| (self.output_dir.join(dest).join(format!("b{b:.2}")), b))
            .collect()
    }

    /// 输入副本目录全路径.
    #[inline]
    pub fn input_dest_dir(&self) -> Option<PathBuf> {
        self.input_dest.as_ref().map(|d| self.output_dir.join(d))
    }

    /// 需要在工作线程启动前一次性创建的全部输出目录.
    pub fn dirs_to_create(&self) -> Vec<PathBuf> {
        let mut dirs = vec![self.output_dir.clone()];
        dirs.extend(self.overlay_dirs().into_iter().map(|(d, _)| d));
        dirs.extend(self.input_dest_dir());
        dirs
    }

    /// 输入筛选 glob 的全模式 (拼上输入目录).
    pub fn full_pattern(&self) -> String {
        format!("{}/{}", self.input_dir.display(), self.pattern)
    }

    /// 失败清单文件全路径.
    #[inline]
    pub fn skipped_list_path(&self) -> Option<PathBuf> {
        self.skipped_list.as_ref().map(|f| self.output_dir.join(f))
    }
}

/// 读取环境变量, 空值或缺省时回退到 `default`.
fn env_or(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => default.to_owned(),
    }
}

/// 读取可选环境变量, 空值视为未设置.
fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

/// 解析逗号分隔的背景系数列表. 所有系数必须落在 `[0, 1)` 内.
fn parse_backgrounds(s: &str) -> Option<Vec<f32>> {
    let mut out = vec![];
    for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let b: f32 = part.parse().ok()?;
        if !(0.0..1.0).contains(&b) {
            return None;
        }
        out.push(b);
    }
    (!out.is_empty()).then_some(out)
}

/// 获得可并行核心数.
pub fn cpus() -> usize {
    std::thread::available_parallelism().map_or_else(|_| num_cpus::get(), usize::from)
}

/// 判断路径是否指向目录, 用于启动期检查.
#[inline]
pub fn require_dir(p: &Path) {
    assert!(p.is_dir(), "{} 不是目录", p.display());
}
