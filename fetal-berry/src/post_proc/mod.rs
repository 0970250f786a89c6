//! 掩膜后处理流程集合.
//!
//! 把神经网络输出的概率栈清理成单一连通的二值脑部掩膜:
//! 阈值化 -> 三维形态学闭运算 -> 最大连通分量提取.

use ndarray::Array3;

use crate::consts::gray::*;

mod components;

pub use components::{keep_component, label_components, largest_component, ComponentSearch};

/// 将概率栈二值化: 概率不小于 `threshold` 的像素记为脑部.
///
/// 输出形状与输入一致.
pub fn threshold_stack(prob: &Array3<f32>, threshold: f32) -> Array3<u8> {
    prob.mapv(|p| {
        if p >= threshold {
            MASK_BRAIN
        } else {
            MASK_BACKGROUND
        }
    })
}

/// 对整个 3D 掩膜做形态学闭运算 (先膨胀后腐蚀),
/// 结构元为边长 `width` 的立方体.
///
/// 闭运算在整个体数据上进行而不是逐切片, 因为目标是切片间的解剖连续性.
///
/// # 边界约定
///
/// 膨胀时把界外视为背景, 腐蚀时把界外视为前景 (不侵蚀体数据边缘).
///
/// # 注意
///
/// `width` 必须非零, 否则程序 panic.
pub fn closing_cube(mask: &Array3<u8>, width: usize) -> Array3<u8> {
    assert_ne!(width, 0, "结构元边长必须非零");
    let dilated = cube_filter(mask, width, true);
    cube_filter(&dilated, width, false)
}

/// 立方体邻域滤波. `dilate` 为真时求邻域存在前景 (膨胀),
/// 为假时求反射邻域全为前景 (腐蚀).
fn cube_filter(mask: &Array3<u8>, width: usize, dilate: bool) -> Array3<u8> {
    let (nz, nh, nw) = mask.dim();
    let mut out = Array3::<u8>::zeros(mask.dim());

    // 边长 width 的结构元锚点取 width / 2; 腐蚀用反射结构元.
    let lo = -((width / 2) as isize);
    let hi = lo + width as isize - 1;
    let (lo, hi) = if dilate { (lo, hi) } else { (-hi, -lo) };

    let in_bound = |p: usize, d: isize, n: usize| -> Option<usize> {
        let q = p as isize + d;
        (q >= 0 && (q as usize) < n).then_some(q as usize)
    };

    for ((z, h, w), o) in out.indexed_iter_mut() {
        let mut any = false;
        let mut all = true;
        'probe: for dz in lo..=hi {
            for dh in lo..=hi {
                for dw in lo..=hi {
                    let probe = (
                        in_bound(z, dz, nz),
                        in_bound(h, dh, nh),
                        in_bound(w, dw, nw),
                    );
                    let (Some(pz), Some(ph), Some(pw)) = probe else {
                        // 界外: 膨胀视为背景, 腐蚀视为前景.
                        continue;
                    };
                    match is_brain(mask[(pz, ph, pw)]) {
                        true if dilate => {
                            any = true;
                            break 'probe;
                        }
                        false if !dilate => {
                            all = false;
                            break 'probe;
                        }
                        _ => {}
                    }
                }
            }
        }
        let keep = if dilate { any } else { all };
        *o = if keep { MASK_BRAIN } else { MASK_BACKGROUND };
    }
    out
}
