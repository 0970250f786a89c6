#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 提供胎儿脑部 MRI nifti 文件的结构化信息和自动掩膜处理算法.
//!
//! 该 crate 将预训练神经网络视为不透明的外部协作方
//! (见 [`infer::BrainModel`]), 自身只负责网络前后的数据通路:
//! 逐切片灰度规范化、切片栈与体数据之间的轴序转换、
//! 到网络固定输入分辨率 (256x256) 的往返重采样,
//! 以及用于清理噪声掩膜的最大连通分量提取.
//!
//! # 注意
//!
//! 1. 所有 3D 数据在内存中按 `(z, H, W)` 模式组织 (切片轴在前),
//!   读写 nifti 文件时自动与文件的 `[W, H, z]` 模式互转.
//! 2. 派生的输出文件 (掩膜, overlay) 总是复用源文件的 header,
//!   空间元信息原样保留.
//! 3. 在非期望情况下 (越界索引, 形状不匹配等编程错误), 程序会直接
//!   panic, 而不会导致内存错误. As what Rust promises.
//!   可恢复的运行时错误 (I/O, 畸形文件, 推理失败) 以 `Result` 表达,
//!   由上层的逐文件边界统一兜底.
//!
//! # 流程总览
//!
//! 单个文件的处理顺序固定为:
//!
//! 1. 读取 nifti 体数据 ([`MriScan::open`]);
//! 2. 逐切片规范化到 \[0, 255\] ([`preproc::normalize_stack`]);
//! 3. 若平面分辨率不是 256x256, 双线性放缩到 256x256
//!   ([`preproc::resize_gray_stack`]);
//! 4. 神经网络推理 ([`infer::BrainModel::predict`]);
//! 5. 概率图阈值化, 可选的三维形态学闭运算与最大连通分量提取
//!   ([`post_proc`]);
//! 6. 若第 3 步放缩过, 将掩膜按最近邻放缩回原分辨率;
//! 7. 重组为 [`BrainMask`] 并保存, 可选地生成 overlay
//!   ([`MriScan::overlay`]).
//!
//! 以上编排由 [`pipeline::MaskingPipeline`] 完成.

/// 二维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx2d = (usize, usize);

/// 三维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

/// 3D MRI nii 文件基础数据结构.
mod data;

pub use data::{BrainMask, MriScan, NiftiHeaderAttr, OpenVolumeError};

pub mod consts;

pub mod infer;
pub mod pipeline;
pub mod post_proc;
pub mod preproc;

pub mod prelude;
