//! 3D 连通分量标注与最大分量选取.

use std::collections::VecDeque;

use ndarray::Array3;

use crate::consts::gray::*;
use crate::Idx3d;

/// 对二值掩膜做 3D 连通分量标注.
///
/// 相邻关系采用 26-邻域 (同一 3x3x3 立方体内的体素互为邻居).
/// 背景标签为 0, 前景分量标签从 1 开始按扫描序 (行优先) 分配,
/// 因此对相同输入多次运行结果一致 (稳定性).
///
/// # 返回值
///
/// `(标签体数据, 前景分量个数)`.
pub fn label_components(mask: &Array3<u8>) -> (Array3<u32>, u32) {
    let shape = mask.dim();
    let mut labels = Array3::<u32>::zeros(shape);
    let mut next = 0u32;

    let mut queue = VecDeque::new();
    for ((z, h, w), &pix) in mask.indexed_iter() {
        if is_background(pix) || labels[(z, h, w)] != 0 {
            continue;
        }

        // 发现新分量, BFS 泛洪填充.
        next += 1;
        labels[(z, h, w)] = next;
        queue.push_back((z, h, w));
        while let Some(pos) = queue.pop_front() {
            for neigh in moore_neighbours(pos, shape) {
                if is_brain(mask[neigh]) && labels[neigh] == 0 {
                    labels[neigh] = next;
                    queue.push_back(neigh);
                }
            }
        }
    }
    (labels, next)
}

/// 获取 `pos` 的 26-邻域坐标.
///
/// 在数据范围外的坐标会被过滤掉, 不会包含在返回值中.
fn moore_neighbours((z, h, w): Idx3d, (nz, nh, nw): Idx3d) -> Vec<Idx3d> {
    let mut out = Vec::with_capacity(26);
    for dz in -1isize..=1 {
        for dh in -1isize..=1 {
            for dw in -1isize..=1 {
                if (dz, dh, dw) == (0, 0, 0) {
                    continue;
                }
                let (qz, qh, qw) = (
                    z.wrapping_add_signed(dz),
                    h.wrapping_add_signed(dh),
                    w.wrapping_add_signed(dw),
                );
                if qz < nz && qh < nh && qw < nw {
                    out.push((qz, qh, qw));
                }
            }
        }
    }
    out
}

/// 最大连通分量搜索结果.
///
/// 掩膜退化 (不存在前景分量) 是普通分支而不是异常,
/// 由调用方显式决定回退策略.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentSearch {
    /// 找到了最大分量.
    Found {
        /// 最大分量的标签.
        label: u32,

        /// 该分量的体素个数.
        voxels: usize,
    },

    /// 掩膜中不存在任何前景分量.
    NoComponent,
}

impl ComponentSearch {
    /// 是否找到了分量?
    #[inline]
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found { .. })
    }
}

/// 在标注结果中选出体素个数最多的前景分量.
///
/// 出现次数直方图不统计背景标签 0. 若多个分量并列最大,
/// 取标签最小者 (确定性规则).
pub fn largest_component(labels: &Array3<u32>, component_count: u32) -> ComponentSearch {
    if component_count == 0 {
        return ComponentSearch::NoComponent;
    }

    let mut counts = vec![0usize; component_count as usize + 1];
    for &l in labels.iter().filter(|&&l| l != 0) {
        counts[l as usize] += 1;
    }

    // 严格大于保证并列时保留较小标签.
    let mut best = (1usize, counts[1]);
    for (label, &cnt) in counts.iter().enumerate().skip(2) {
        if cnt > best.1 {
            best = (label, cnt);
        }
    }
    ComponentSearch::Found {
        label: best.0 as u32,
        voxels: best.1,
    }
}

/// 只保留标签为 `label` 的体素, 重新生成二值掩膜.
pub fn keep_component(labels: &Array3<u32>, label: u32) -> Array3<u8> {
    labels.mapv(|l| if l == label { MASK_BRAIN } else { MASK_BACKGROUND })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    /// 两个互不相邻的方块: 100 体素与 10 体素.
    fn two_blob_mask() -> Array3<u8> {
        let mut mask = Array3::<u8>::zeros((10, 12, 12));
        // 5x5x4 = 100 体素.
        for z in 0..5 {
            for h in 0..5 {
                for w in 0..4 {
                    mask[(z, h, w)] = MASK_BRAIN;
                }
            }
        }
        // 1x2x5 = 10 体素, 与上一块彻底隔开.
        for h in 9..11 {
            for w in 2..7 {
                mask[(8, h, w)] = MASK_BRAIN;
            }
        }
        mask
    }

    #[test]
    fn test_label_two_components() {
        let mask = two_blob_mask();
        let (labels, n) = label_components(&mask);
        assert_eq!(n, 2);
        // 扫描序保证大方块先被发现.
        assert_eq!(labels[(0, 0, 0)], 1);
        assert_eq!(labels[(8, 9, 2)], 2);
    }

    #[test]
    fn test_largest_component_wins() {
        let mask = two_blob_mask();
        let (labels, n) = label_components(&mask);

        let ComponentSearch::Found { label, voxels } = largest_component(&labels, n) else {
            panic!("应当找到分量");
        };
        assert_eq!((label, voxels), (1, 100));

        let kept = label_components(&keep_component(&labels, label));
        // 结果只含最大的那一个分量.
        assert_eq!(kept.1, 1);
        assert_eq!(kept.0.iter().filter(|&&l| l != 0).count(), 100);
    }

    #[test]
    fn test_no_component_is_explicit() {
        let (labels, n) = label_components(&Array3::<u8>::zeros((3, 3, 3)));
        let res = largest_component(&labels, n);
        assert_eq!(res, ComponentSearch::NoComponent);
        assert!(!res.is_found());
    }

    #[test]
    fn test_tie_break_takes_lowest_label() {
        // 两个同为 1 体素的分量.
        let mut mask = Array3::<u8>::zeros((1, 1, 5));
        mask[(0, 0, 0)] = MASK_BRAIN;
        mask[(0, 0, 4)] = MASK_BRAIN;

        let (labels, n) = label_components(&mask);
        assert_eq!(n, 2);
        let ComponentSearch::Found { label, voxels } = largest_component(&labels, n) else {
            panic!("应当找到分量");
        };
        assert_eq!((label, voxels), (1, 1));
    }

    #[test]
    fn test_diagonal_voxels_are_connected() {
        // 26-邻域下对角体素属于同一分量.
        let mut mask = Array3::<u8>::zeros((2, 2, 2));
        mask[(0, 0, 0)] = MASK_BRAIN;
        mask[(1, 1, 1)] = MASK_BRAIN;
        let (_, n) = label_components(&mask);
        assert_eq!(n, 1);
    }
}
