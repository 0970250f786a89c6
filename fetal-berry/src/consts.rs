//! 通用常量.

/// 单通道颜色.
pub mod gray {
    /// 掩膜中背景的体素值.
    pub const MASK_BACKGROUND: u8 = 0;

    /// 掩膜中脑部的体素值.
    pub const MASK_BRAIN: u8 = 1;

    /// 规范化切片的灰度上限.
    pub const GRAY_MAX: u16 = 255;

    /// 体素是否是脑部?
    #[inline]
    pub const fn is_brain(p: u8) -> bool {
        matches!(p, MASK_BRAIN)
    }

    /// 体素是否是背景?
    #[inline]
    pub const fn is_background(p: u8) -> bool {
        matches!(p, MASK_BACKGROUND)
    }
}

/// 神经网络固定的平面输入边长 (高与宽).
pub const NET_INPUT_EDGE: usize = 256;

/// 逐切片灰度裁剪分位率. 超过该分位的亮斑 (血管, 伪影)
/// 会被钳制到分位值, 不需要全局统计量.
pub const INTENSITY_CLIP_RATE: f64 = 0.97;

/// 概率图二值化的默认阈值. 概率不小于该值的像素被视为脑部.
pub const BRAIN_PROB_THRESHOLD: f32 = 0.5;

/// 三维形态学闭运算的立方体结构元边长.
pub const CLOSING_CUBE_WIDTH: usize = 2;

/// 掩膜输出文件的默认后缀.
pub const DEFAULT_MASK_SUFFIX: &str = "_mask.nii";
