//! 推理前的体数据预处理: 逐切片灰度规范化与平面重采样.

use ndarray::{Array3, ArrayView2, ArrayViewMut2, Axis, Zip};

use crate::consts::gray::GRAY_MAX;
use crate::consts::INTENSITY_CLIP_RATE;
use crate::MriScan;

mod resize;

pub use resize::{resize_gray_stack, resize_mask_stack};

/// 将 3D 扫描规范化为神经网络期望的灰度切片栈.
///
/// 每个水平切片独立处理, 互不影响 (规范化是逐切片局部的,
/// 不使用任何全体积统计量):
///
/// 1. 负灰度钳制为 0;
/// 2. 取排序后扁平切片的 97 分位值 (nearest-rank,
///   下标为 `floor(0.97 * 像素数)`) 作为上限, 更亮的像素钳制到该值;
/// 3. 按钳制后的最大值线性放缩到 \[0, 255\] 并四舍五入;
/// 4. 全零 (或全负) 切片直接输出全零, 避免除零.
///
/// 输出以 `u16` 保存 (只使用 0-255, 与流水线其余环节的中间表示一致).
///
/// 启用 `rayon` feature 时切片间并行.
pub fn normalize_stack(scan: &MriScan) -> Array3<u16> {
    let data = scan.data();
    let mut out = Array3::<u16>::zeros(data.dim());

    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            Zip::from(out.axis_iter_mut(Axis(0)))
                .and(data.axis_iter(Axis(0)))
                .par_for_each(|dst, src| normalize_slice_into(src, dst));
        } else {
            Zip::from(out.axis_iter_mut(Axis(0)))
                .and(data.axis_iter(Axis(0)))
                .for_each(|dst, src| normalize_slice_into(src, dst));
        }
    }
    out
}

/// 单切片规范化. 见 [`normalize_stack`].
fn normalize_slice_into(src: ArrayView2<'_, f32>, mut dst: ArrayViewMut2<'_, u16>) {
    debug_assert_eq!(src.dim(), dst.dim());
    if src.is_empty() {
        return;
    }

    // 负值钳 0 后排序, 取 nearest-rank 分位值.
    let mut sorted: Vec<f32> = src.iter().map(|v| v.max(0.0)).collect();
    sorted.sort_unstable_by(f32::total_cmp);
    let rank = ((sorted.len() as f64 * INTENSITY_CLIP_RATE) as usize).min(sorted.len() - 1);
    let limit = sorted[rank];

    // 钳制后的最大值即 limit. limit 为 0 说明切片全零, 保持输出全零.
    if limit <= 0.0 {
        dst.fill(0);
        return;
    }

    let scale = f32::from(GRAY_MAX) / limit;
    Zip::from(&mut dst).and(&src).for_each(|d, &s| {
        let clipped = s.clamp(0.0, limit);
        *d = (clipped * scale).round() as u16;
    });
}
