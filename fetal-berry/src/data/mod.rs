use std::fmt;
use std::ops::Index;
use std::path::Path;

use ndarray::{Array3, ArrayView, Ix3, Zip};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiError, NiftiHeader, NiftiObject, ReaderOptions};

use crate::consts::gray::*;
use crate::{Idx2d, Idx3d};

/// `NiftiHeader` 是栈上大对象, 移动该对象的开销很可观.
/// 因此我们将其分配到堆上.
type BoxedHeader = Box<NiftiHeader>;

/// 将 (W, H, z) 转换成 (z, H, W). 以后均按照该模式访问.
#[inline]
fn get_shape_from_header(h: &NiftiHeader) -> Idx3d {
    // [W, H, z]. 体素个数数组.
    let [_, w, h, z, ..] = h.dim;
    (z as usize, h as usize, w as usize)
}

/// 打开 3D MRI nii 文件错误.
#[derive(Debug)]
pub enum OpenVolumeError {
    /// 底层 nifti 读取/解析错误.
    Nifti(NiftiError),

    /// 文件不是 3D 体数据. 参数为 header 声明的维数.
    NotVolume3d(u16),
}

impl fmt::Display for OpenVolumeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nifti(e) => write!(f, "nifti 读取错误: {e}"),
            Self::NotVolume3d(d) => write!(f, "期望 3D 体数据, 但文件声明了 {d} 维"),
        }
    }
}

impl std::error::Error for OpenVolumeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Nifti(e) => Some(e),
            Self::NotVolume3d(_) => None,
        }
    }
}

impl From<NiftiError> for OpenVolumeError {
    #[inline]
    fn from(e: NiftiError) -> Self {
        Self::Nifti(e)
    }
}

/// 3D MRI nii 文件 header 的共用属性和部分通用操作.
pub trait NiftiHeaderAttr {
    /// 获取 header 部分.
    fn header(&self) -> &NiftiHeader;

    /// 获取数据形状大小.
    #[inline]
    fn shape(&self) -> Idx3d {
        get_shape_from_header(self.header())
    }

    /// 获取数据水平切片形状大小.
    #[inline]
    fn slice_shape(&self) -> Idx2d {
        let (_, h, w) = self.shape();
        (h, w)
    }

    /// 获取水平切片个数.
    #[inline]
    fn len_z(&self) -> usize {
        self.shape().0
    }

    /// 获取数据体素个数.
    #[inline]
    fn size(&self) -> usize {
        let (z, h, w) = self.shape();
        z * h * w
    }

    /// 检查索引是否合法.
    #[inline]
    fn check(&self, (z0, h0, w0): &Idx3d) -> bool {
        let (z, h, w) = self.shape();
        *z0 < z && *h0 < h && *w0 < w
    }
}

/// nii 格式 3D MRI 扫描, 包括 header 和体数据. 灰度值以 `f32` 保存.
#[derive(Debug, Clone)]
pub struct MriScan {
    header: BoxedHeader,
    data: Array3<f32>,
}

impl NiftiHeaderAttr for MriScan {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }
}

impl Index<Idx3d> for MriScan {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl MriScan {
    /// 打开 nii 文件格式的 3D MRI 扫描. `path` 为 nii (或 nii.gz) 文件的本地路径.
    /// 如果打开成功, 则返回 `Ok(Self)`, 否则返回 `Err`.
    ///
    /// 体素值按 header 的 `scl_slope`/`scl_inter` 换算为 `f32`.
    /// 非 3D 文件返回 [`OpenVolumeError::NotVolume3d`].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, OpenVolumeError> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let header = Box::new(obj.header().clone());

        let ndim = header.dim[0];
        if ndim != 3 {
            return Err(OpenVolumeError::NotVolume3d(ndim));
        }

        // [W, H, z] -> [z, H, W].
        // hint: 原第一维向下增长, 原第二维向右增长.
        let data = obj
            .into_volume()
            .into_ndarray::<f32>()?
            .permuted_axes([2, 1, 0].as_slice());

        // The nature of nifti data field layout.
        debug_assert!(data.is_standard_layout());

        // 该操作不会生成 `Err`, 可直接 unwrap.
        let data =
            Array3::<f32>::from_shape_vec(get_shape_from_header(&header), data.into_raw_vec())
                .unwrap();

        Ok(Self { header, data })
    }

    /// 将扫描写回 nii 文件. 输出保留 `self` 的 header
    /// (维数与数据类型字段由底层 writer 按数据修正).
    /// 若 `path` 以 `.gz` 结尾则自动压缩.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> nifti::Result<()> {
        // (z, H, W) -> [W, H, z], 与 `open` 对称.
        let data = self.data.view().permuted_axes([2, 1, 0]);
        WriterOptions::new(path.as_ref())
            .reference_header(&self.header)
            .write_nifti(&data)
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, f32, Ix3> {
        self.data.view()
    }

    /// 将掩膜叠加回源扫描, 生成便于目视检查的 overlay 体数据:
    /// `overlay = source * clip(mask, background, 1.0)`.
    ///
    /// 脑部体素 (掩膜为 1) 原样保留; 背景体素保留 `background`
    /// 倍的源灰度而不是直接清零.
    ///
    /// # 注意
    ///
    /// 1. `background` 必须落在 `[0, 1)` 内, 否则程序 panic.
    /// 2. `mask` 的形状必须与 `self` 一致, 否则程序 panic.
    pub fn overlay(&self, mask: &BrainMask, background: f32) -> MriScan {
        assert!(
            (0.0..1.0).contains(&background),
            "overlay 背景系数必须落在 [0, 1) 内"
        );
        assert_eq!(self.shape(), mask.shape(), "扫描和掩膜形状不一致");

        let mut data = self.data.clone();
        Zip::from(&mut data).and(mask.data()).for_each(|v, &m| {
            if is_background(m) {
                *v *= background;
            }
        });
        MriScan {
            header: self.header.clone(),
            data,
        }
    }

    /// 根据裸数据和已有 header 直接创建 `MriScan` 实体.
    ///
    /// # 参数
    ///
    /// `data` 按照内存惯用的 `(z, H, W)` 格式存储.
    ///
    /// # 注意
    ///
    /// 该方法可能会创建不一致的实体, 因此你应仅将其用于实验目的.
    pub fn fake_with_header(header: &NiftiHeader, data: Array3<f32>) -> Self {
        let mut header = Box::new(header.clone());
        sync_header_dim(&mut header, data.dim());
        header.intent_name[..4].copy_from_slice(b"fake");
        Self { header, data }
    }

    /// 判断该结构是否是由 `fake_*` 方法手动拼接的.
    pub fn is_faked(&self) -> bool {
        self.header.intent_name.starts_with(b"fake")
    }
}

/// 使 header 的 dim 字段与 `(z, h, w)` 形状的内存数据一致.
fn sync_header_dim(header: &mut NiftiHeader, (z, h, w): Idx3d) {
    header.dim = [3, w as u16, h as u16, z as u16, 1, 1, 1, 1];
}

/// nii 格式 3D 脑部掩膜, 包括 header 和二值体数据 (0/1, `u8` 保存).
///
/// header 总是来自派生它的源扫描, 空间元信息原样保留.
#[derive(Debug, Clone)]
pub struct BrainMask {
    header: BoxedHeader,
    data: Array3<u8>,
}

impl NiftiHeaderAttr for BrainMask {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }
}

impl Index<Idx3d> for BrainMask {
    type Output = u8;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl BrainMask {
    /// 用源扫描的 header 和内存格式 `(z, H, W)` 的二值栈重组掩膜体数据.
    ///
    /// 若 `data` 的形状与 header 声明的形状不一致, 则程序 panic.
    pub fn from_stack(header: &NiftiHeader, data: Array3<u8>) -> Self {
        let header = Box::new(header.clone());
        assert_eq!(
            get_shape_from_header(&header),
            data.dim(),
            "掩膜栈和源 header 形状不一致"
        );
        Self { header, data }
    }

    /// 将掩膜写回 nii 文件. 输出保留源扫描的 header
    /// (维数与数据类型字段由底层 writer 按数据修正).
    /// 若 `path` 以 `.gz` 结尾则自动压缩.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> nifti::Result<()> {
        // (z, H, W) -> [W, H, z], 与读取方向对称.
        let data = self.data.view().permuted_axes([2, 1, 0]);
        WriterOptions::new(path.as_ref())
            .reference_header(&self.header)
            .write_nifti(&data)
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, u8, Ix3> {
        self.data.view()
    }

    /// 获取掩膜中脑部体素的个数.
    #[inline]
    pub fn brain_count(&self) -> usize {
        self.data.iter().filter(|p| is_brain(**p)).count()
    }

    /// 根据裸数据和已有 header 直接创建 `BrainMask` 实体.
    ///
    /// # 参数
    ///
    /// `data` 按照内存惯用的 `(z, H, W)` 格式存储, 体素值必须为 0 或 1,
    /// 否则程序行为未定义.
    ///
    /// # 注意
    ///
    /// 该方法可能会创建不一致的实体, 因此你应仅将其用于实验目的.
    pub fn fake_with_header(header: &NiftiHeader, data: Array3<u8>) -> Self {
        let mut header = Box::new(header.clone());
        sync_header_dim(&mut header, data.dim());
        header.intent_name[..4].copy_from_slice(b"fake");
        Self { header, data }
    }
}
