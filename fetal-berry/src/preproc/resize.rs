//! 切片栈的平面重采样.
//!
//! 神经网络只接受固定的 256x256 平面输入, 因此平面分辨率不同的体数据
//! 需要在推理前放缩过去, 并在推理后把掩膜放缩回来. 切片个数不变,
//! 每个切片独立做 2D 插值.

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma, Pixel, Primitive};
use ndarray::{Array2, Array3, Axis};

use crate::Idx2d;

/// 将灰度切片栈的每个切片双线性放缩到 `target` (高, 宽).
///
/// 用于神经网络输入侧. 双线性插值平滑单调, 不会在图像中引入
/// 新的灰度极值.
#[inline]
pub fn resize_gray_stack(stack: &Array3<u16>, target: Idx2d) -> Array3<u16> {
    resize_stack(stack, target, FilterType::Triangle)
}

/// 将二值掩膜栈的每个切片按最近邻放缩到 `target` (高, 宽).
///
/// 用于推理输出侧. 最近邻对标签图是整数安全的,
/// 不会产生 0/1 之外的中间值.
#[inline]
pub fn resize_mask_stack(stack: &Array3<u8>, target: Idx2d) -> Array3<u8> {
    resize_stack(stack, target, FilterType::Nearest)
}

/// 逐切片 2D 重采样的公共实现.
fn resize_stack<T>(stack: &Array3<T>, (th, tw): Idx2d, filter: FilterType) -> Array3<T>
where
    T: Primitive + 'static,
    Luma<T>: Pixel<Subpixel = T>,
{
    assert!(th > 0 && tw > 0, "目标分辨率必须非零");

    let (z, h, w) = stack.dim();
    let mut out = Array3::from_elem((z, th, tw), T::DEFAULT_MIN_VALUE);

    for (mut dst, src) in out.axis_iter_mut(Axis(0)).zip(stack.axis_iter(Axis(0))) {
        // ndarray 的 (H, W) 行优先布局与 ImageBuffer 的行优先布局一致.
        let buf: Vec<T> = src.iter().copied().collect();
        // 尺寸与缓冲长度一致, 不会失败.
        let img: ImageBuffer<Luma<T>, Vec<T>> =
            ImageBuffer::from_raw(w as u32, h as u32, buf).unwrap();

        let resized = imageops::resize(&img, tw as u32, th as u32, filter);
        let arr = Array2::from_shape_vec((th, tw), resized.into_raw()).unwrap();
        dst.assign(&arr);
    }
    out
}
