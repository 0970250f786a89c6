//! 逐文件掩膜流水线编排.
//!
//! 单个体数据的处理是一条固定顺序的流水线:
//! 规范化 -> (放缩?) -> 推理 -> 阈值化 -> (平滑?) -> (缩回?) -> 重组.
//! 任一环节失败即中止该文件的处理, 错误上抛到调用方的逐文件边界.

use std::fmt;

use log::{debug, error, warn};
use ndarray::Array3;
use nifti::NiftiError;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::consts::{BRAIN_PROB_THRESHOLD, CLOSING_CUBE_WIDTH, NET_INPUT_EDGE};
use crate::data::OpenVolumeError;
use crate::infer::{BrainModel, PredictError};
use crate::post_proc::{
    closing_cube, keep_component, label_components, largest_component, threshold_stack,
    ComponentSearch,
};
use crate::preproc::{normalize_stack, resize_gray_stack, resize_mask_stack};
use crate::{BrainMask, Idx2d, MriScan, NiftiHeaderAttr};

/// 逐文件流水线错误. 在逐文件边界统一记录并计入 skipped 列表.
#[derive(Debug)]
pub enum MaskError {
    /// 读取/解析输入体数据失败.
    Open(OpenVolumeError),

    /// 模型推理失败.
    Predict(PredictError),

    /// 写出 nifti 文件失败.
    Save(NiftiError),

    /// 其他底层 I/O 错误.
    Io(std::io::Error),
}

impl fmt::Display for MaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open(e) => write!(f, "打开体数据失败: {e}"),
            Self::Predict(e) => e.fmt(f),
            Self::Save(e) => write!(f, "写出 nifti 失败: {e}"),
            Self::Io(e) => write!(f, "I/O 错误: {e}"),
        }
    }
}

impl std::error::Error for MaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open(e) => Some(e),
            Self::Predict(e) => Some(e),
            Self::Save(e) => Some(e),
            Self::Io(e) => Some(e),
        }
    }
}

impl From<OpenVolumeError> for MaskError {
    #[inline]
    fn from(e: OpenVolumeError) -> Self {
        Self::Open(e)
    }
}

impl From<PredictError> for MaskError {
    #[inline]
    fn from(e: PredictError) -> Self {
        Self::Predict(e)
    }
}

impl From<NiftiError> for MaskError {
    #[inline]
    fn from(e: NiftiError) -> Self {
        Self::Save(e)
    }
}

impl From<std::io::Error> for MaskError {
    #[inline]
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// 流水线可调参数.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MaskOptions {
    /// 是否启用后处理平滑 (三维闭运算 + 最大连通分量提取).
    pub smooth: bool,

    /// 概率二值化阈值.
    pub threshold: f32,
}

impl Default for MaskOptions {
    #[inline]
    fn default() -> Self {
        Self {
            smooth: true,
            threshold: BRAIN_PROB_THRESHOLD,
        }
    }
}

/// 平面分辨率是否需要放缩到网络输入大小?
///
/// 已经是 256x256 的体数据完全跳过重采样.
/// 这既是优化也是正确性要求: 不必要的往返插值是有损的.
#[inline]
fn needs_resize((h, w): Idx2d) -> bool {
    h != NET_INPUT_EDGE || w != NET_INPUT_EDGE
}

/// 掩膜流水线. 持有推理后端与参数, 把单个 [`MriScan`]
/// 变换为同形状的 [`BrainMask`].
///
/// 后端要求实现 [`BrainModel`], 因此同一条流水线可被多个
/// 工作线程安全地共享 (每个文件一个任务).
pub struct MaskingPipeline<M> {
    model: M,
    opts: MaskOptions,
}

impl<M: BrainModel> MaskingPipeline<M> {
    /// 组装流水线.
    pub fn new(model: M, opts: MaskOptions) -> Self {
        Self { model, opts }
    }

    /// 获取流水线参数.
    #[inline]
    pub fn options(&self) -> &MaskOptions {
        &self.opts
    }

    /// 对单个扫描生成脑部掩膜.
    ///
    /// 输出与输入形状一致, 并复用输入的 header. 推理错误不在内部捕获,
    /// 与其他环节的错误一样上抛.
    pub fn create_mask(&self, scan: &MriScan) -> Result<BrainMask, MaskError> {
        let original_hw = scan.slice_shape();
        let resize_needed = needs_resize(original_hw);

        let mut stack = normalize_stack(scan);
        if resize_needed {
            debug!(
                "平面分辨率 {original_hw:?} != {NET_INPUT_EDGE}, 放缩到网络输入大小"
            );
            stack = resize_gray_stack(&stack, (NET_INPUT_EDGE, NET_INPUT_EDGE));
        }

        let prob = self.model.predict(&stack)?;
        if prob.dim() != stack.dim() {
            return Err(PredictError::new(format!(
                "概率栈形状 {:?} 与输入 {:?} 不一致",
                prob.dim(),
                stack.dim()
            ))
            .into());
        }

        let thresholded = threshold_stack(&prob, self.opts.threshold);
        let mut mask = if self.opts.smooth {
            self.defragment(thresholded)
        } else {
            thresholded
        };

        if resize_needed {
            mask = resize_mask_stack(&mask, original_hw);
        }
        Ok(BrainMask::from_stack(scan.header(), mask))
    }

    /// 平滑后处理: 闭运算 + 最大连通分量.
    ///
    /// 闭运算后的掩膜若不存在任何前景分量, 记录错误并回退到
    /// 未平滑的阈值掩膜, 而不是让整个文件失败.
    fn defragment(&self, thresholded: Array3<u8>) -> Array3<u8> {
        let closed = closing_cube(&thresholded, CLOSING_CUBE_WIDTH);
        let (labels, n) = label_components(&closed);
        match largest_component(&labels, n) {
            ComponentSearch::Found { label, voxels } => {
                debug!("保留最大连通分量 #{label} ({voxels} 体素, 共 {n} 个分量)");
                keep_component(&labels, label)
            }
            ComponentSearch::NoComponent => {
                error!("掩膜中不存在前景分量, 回退到未平滑的阈值掩膜");
                thresholded
            }
        }
    }
}

/// 由输入文件名推导掩膜输出文件名.
///
/// 去掉末尾的 `.nii.gz` 或 `.nii` 扩展名后拼接 `suffix`;
/// 两种扩展名都不存在时直接在全名后拼接, 并发出一条警告.
pub fn mask_filename(basename: &str, suffix: &str) -> String {
    if let Some(stem) = basename.strip_suffix(".nii.gz") {
        format!("{stem}{suffix}")
    } else if let Some(stem) = basename.strip_suffix(".nii") {
        format!("{stem}{suffix}")
    } else {
        warn!("{basename} 不含 .nii 文件扩展名");
        format!("{basename}{suffix}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::gray::*;
    use crate::consts::DEFAULT_MASK_SUFFIX;
    use crate::infer::{IntensityOracle, PredictResult};
    use ndarray::Array3;
    use nifti::NiftiHeader;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_needs_resize_policy() {
        assert!(!needs_resize((256, 256)));
        assert!(needs_resize((256, 255)));
        assert!(needs_resize((64, 64)));
    }

    #[test]
    fn test_mask_filename_derivation() {
        assert_eq!(
            mask_filename("scan.nii.gz", DEFAULT_MASK_SUFFIX),
            "scan_mask.nii"
        );
        assert_eq!(
            mask_filename("scan.nii", DEFAULT_MASK_SUFFIX),
            "scan_mask.nii"
        );
        // 无 .nii 扩展名: 全名直接拼接 (并发警告).
        assert_eq!(
            mask_filename("scan.img", DEFAULT_MASK_SUFFIX),
            "scan.img_mask.nii"
        );
    }

    /// 合成体数据: 零背景上一个值为 1000 的亮立方体.
    /// 内存形状 (z, H, W) = (10, 64, 64), 立方体 5x20x20.
    fn cube_scan() -> MriScan {
        let mut data = Array3::<f32>::zeros((10, 64, 64));
        for z in 2..7 {
            for h in 20..40 {
                for w in 20..40 {
                    data[(z, h, w)] = 1000.0;
                }
            }
        }
        MriScan::fake_with_header(&NiftiHeader::default(), data)
    }

    #[test]
    fn test_end_to_end_cube() {
        let scan = cube_scan();
        let pipeline = MaskingPipeline::new(IntensityOracle, MaskOptions::default());
        let mask = pipeline.create_mask(&scan).unwrap();

        // 输出形状与 header 均与输入一致.
        assert_eq!(mask.shape(), scan.shape());

        // 立方体内部 (留 2 体素边界容忍插值毛刺) 全为前景.
        for z in 3..6 {
            for h in 22..38 {
                for w in 22..38 {
                    assert_eq!(mask[(z, h, w)], MASK_BRAIN, "({z}, {h}, {w})");
                }
            }
        }
        // 远离立方体的背景保持为 0.
        for z in [0, 1, 8, 9] {
            for h in (0..16).chain(44..64) {
                assert_eq!(mask[(z, h, 5)], MASK_BACKGROUND, "({z}, {h}, 5)");
            }
        }
    }

    #[test]
    fn test_smoothing_keeps_single_component() {
        let scan = cube_scan();
        let pipeline = MaskingPipeline::new(IntensityOracle, MaskOptions::default());
        let mask = pipeline.create_mask(&scan).unwrap();

        let (_, n) = crate::post_proc::label_components(&mask.data().to_owned());
        assert_eq!(n, 1);
    }

    #[test]
    fn test_empty_volume_falls_back() {
        // 全零体数据: 退化掩膜走回退分支, 而不是报错.
        let scan = MriScan::fake_with_header(
            &NiftiHeader::default(),
            Array3::<f32>::zeros((4, 32, 32)),
        );
        let pipeline = MaskingPipeline::new(IntensityOracle, MaskOptions::default());
        let mask = pipeline.create_mask(&scan).unwrap();
        assert_eq!(mask.brain_count(), 0);
    }

    /// 记录输入形状的后端, 用于验证 256x256 输入跳过重采样.
    struct Recording {
        calls: AtomicUsize,
        expect: (usize, usize, usize),
    }

    impl BrainModel for Recording {
        fn predict(&self, stack: &Array3<u16>) -> PredictResult {
            self.calls.fetch_add(1, Ordering::Relaxed);
            assert_eq!(stack.dim(), self.expect);
            Ok(Array3::zeros(stack.dim()))
        }
    }

    #[test]
    fn test_native_256_input_skips_resize() {
        let scan = MriScan::fake_with_header(
            &NiftiHeader::default(),
            Array3::<f32>::zeros((3, 256, 256)),
        );
        let model = Recording {
            calls: AtomicUsize::new(0),
            expect: (3, 256, 256),
        };
        let pipeline = MaskingPipeline::new(model, MaskOptions::default());
        let mask = pipeline.create_mask(&scan).unwrap();

        assert_eq!(pipeline.model.calls.load(Ordering::Relaxed), 1);
        assert_eq!(mask.shape(), (3, 256, 256));
    }

    /// 总是失败的后端.
    struct Broken;

    impl BrainModel for Broken {
        fn predict(&self, _: &Array3<u16>) -> PredictResult {
            Err(PredictError::new("会话已失效"))
        }
    }

    #[test]
    fn test_predict_error_propagates() {
        let scan = cube_scan();
        let pipeline = MaskingPipeline::new(Broken, MaskOptions::default());
        let err = pipeline.create_mask(&scan).unwrap_err();
        assert!(matches!(err, MaskError::Predict(_)));
    }

    #[test]
    fn test_no_smooth_keeps_raw_threshold() {
        let scan = cube_scan();
        let opts = MaskOptions {
            smooth: false,
            ..Default::default()
        };
        let with = MaskingPipeline::new(IntensityOracle, MaskOptions::default())
            .create_mask(&scan)
            .unwrap();
        let without = MaskingPipeline::new(IntensityOracle, opts)
            .create_mask(&scan)
            .unwrap();

        // 本例掩膜本身已是单连通, 两条路径的体素数应当接近.
        let (a, b) = (with.brain_count(), without.brain_count());
        assert!(a.abs_diff(b) <= a / 10, "{a} vs {b}");
    }
}
