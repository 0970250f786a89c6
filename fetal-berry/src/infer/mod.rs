//! 神经网络推理接口.
//!
//! 预训练模型对本 crate 是不透明的黑盒: 一个
//! "256x256 规范化切片栈 -> 逐像素概率图" 的函数.
//! 该模块只定义能力接口与线程安全包装, 不关心模型内部结构,
//! 以便替换后端 (含测试用桩).

use std::fmt;
use std::sync::Mutex;

use ndarray::Array3;

use crate::consts::gray::GRAY_MAX;

/// 推理失败. 由具体后端构造, 原样传播到逐文件错误边界.
#[derive(Debug)]
pub struct PredictError {
    /// 后端给出的失败原因.
    pub reason: String,
}

impl PredictError {
    /// 从任意可显示的原因构造.
    pub fn new<S: Into<String>>(reason: S) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for PredictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "模型推理失败: {}", self.reason)
    }
}

impl std::error::Error for PredictError {}

/// 推理结果.
pub type PredictResult = Result<Array3<f32>, PredictError>;

/// 脑部掩膜推理后端的能力接口.
///
/// # 约定
///
/// 1. 输入是 `(z, H, W)` 的规范化切片栈, 灰度范围 \[0, 255\],
///   平面分辨率已由调用方放缩到模型要求的固定大小;
/// 2. 输出概率栈与输入形状一致, 每个像素一个 \[0, 1\] 概率;
/// 3. 实现不在内部捕获自身错误, 失败以 `Err` 上抛.
///
/// 实现该 trait 即承诺 `predict` 可被多个工作线程并发调用.
/// 内部不可重入的后端请通过 [`SharedModel`] 串行化.
pub trait BrainModel: Send + Sync {
    /// 对整个切片栈做逐像素脑部概率预测.
    fn predict(&self, stack: &Array3<u16>) -> PredictResult;
}

/// 内部状态可变 (不可重入) 的推理后端.
///
/// 典型情形是持有独占推理会话的模型运行时.
pub trait BrainModelMut: Send {
    /// 同 [`BrainModel::predict`], 但允许修改内部状态.
    fn predict_mut(&mut self, stack: &Array3<u16>) -> PredictResult;
}

/// 用互斥锁把不可重入后端适配为可并发调用的 [`BrainModel`].
///
/// 多个工作线程共享同一个模型实例时, 对 `predict`
/// 的访问在此处串行化.
pub struct SharedModel<M> {
    inner: Mutex<M>,
}

impl<M: BrainModelMut> SharedModel<M> {
    /// 包装一个不可重入后端.
    pub fn new(model: M) -> Self {
        Self {
            inner: Mutex::new(model),
        }
    }

    /// 解除包装, 取回底层后端.
    pub fn into_inner(self) -> M {
        // 锁被毒化只可能源于后端 panic, 此处直接传播.
        self.inner.into_inner().unwrap()
    }
}

impl<M: BrainModelMut> BrainModel for SharedModel<M> {
    fn predict(&self, stack: &Array3<u16>) -> PredictResult {
        self.inner.lock().unwrap().predict_mut(stack)
    }
}

/// 零依赖的占位后端: 概率正比于规范化灰度.
///
/// 用于测试与流水线调试. 真实 U-Net
/// 后端接入前, 批处理工具默认使用它.
// TODO: 接入加载 unet_weights.h5 的真实推理后端.
#[derive(Debug, Default, Clone, Copy)]
pub struct IntensityOracle;

impl BrainModel for IntensityOracle {
    fn predict(&self, stack: &Array3<u16>) -> PredictResult {
        Ok(stack.mapv(|v| f32::from(v) / f32::from(GRAY_MAX)))
    }
}
