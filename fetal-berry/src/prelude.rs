//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx2d, Idx3d};

pub use crate::data::{BrainMask, MriScan, NiftiHeaderAttr, OpenVolumeError};

pub use crate::consts::gray::{is_background, is_brain, MASK_BACKGROUND, MASK_BRAIN};
pub use crate::consts::{
    BRAIN_PROB_THRESHOLD, DEFAULT_MASK_SUFFIX, INTENSITY_CLIP_RATE, NET_INPUT_EDGE,
};

pub use crate::infer::{BrainModel, BrainModelMut, IntensityOracle, PredictError, SharedModel};
pub use crate::pipeline::{mask_filename, MaskError, MaskOptions, MaskingPipeline};
pub use crate::post_proc::ComponentSearch;
