// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model.rs - 模型
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use thiserror::Error;

use crate::frame::RgbNhwcFrame;

pub mod registry;
pub mod softmax;
pub mod topk;
pub mod worker;

#[cfg(feature = "rknpu")]
mod rknn;
#[cfg(feature = "rknpu")]
pub use self::rknn::{RknnBuilder, RknnEngine};

pub use self::registry::{ModelHandle, ModelRegistry};
pub use self::softmax::{argmax, softmax};
pub use self::topk::{MAX_TOP_NUM, TopKEntry, TopKError, TopKResult, UNASSIGNED_CLASS, top_k};
pub use self::worker::{EngineThread, LocalEngine};

/// 模型声明的输入张量排布
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
  Nhwc,
  Nchw,
}

impl TensorLayout {
  pub fn parse(name: &str) -> Option<Self> {
    match name.to_ascii_lowercase().as_str() {
      "nhwc" => Some(TensorLayout::Nhwc),
      "nchw" => Some(TensorLayout::Nchw),
      _ => None,
    }
  }

  /// 224x224 RGB 输入在该排布下的属性维度
  pub fn default_dims(self) -> [u32; 3] {
    match self {
      TensorLayout::Nhwc => [3, 224, 224],
      TensorLayout::Nchw => [224, 224, 3],
    }
  }
}

/// 解析 `a,b,c` 形式的三个维度
pub fn parse_dims(text: &str) -> Option<[u32; 3]> {
  let mut dims = [0u32; 3];
  let mut parts = text.split(',');
  for dim in dims.iter_mut() {
    *dim = parts.next()?.trim().parse().ok().filter(|d| *d > 0)?;
  }
  if parts.next().is_some() {
    return None;
  }
  Some(dims)
}

/// 模型输入尺寸，初始化时读取一次
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputShape {
  pub width: u32,
  pub height: u32,
  pub channels: u32,
}

impl InputShape {
  /// 按声明的排布从 RKNN 张量属性的维度中取出宽、高、通道
  ///
  /// 属性维度从最内层开始排列：NHWC 为 `[c, w, h]`，NCHW 为 `[w, h, c]`。
  pub fn from_dims(layout: TensorLayout, dims: [u32; 3]) -> Self {
    match layout {
      TensorLayout::Nhwc => InputShape {
        channels: dims[0],
        width: dims[1],
        height: dims[2],
      },
      TensorLayout::Nchw => InputShape {
        width: dims[0],
        height: dims[1],
        channels: dims[2],
      },
    }
  }
}

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("推理失败: {0}")]
  InferenceFailed(String),
  #[cfg(feature = "rknpu")]
  #[error("RKNN 错误: {0}")]
  RknnError(#[from] rknpu::Error),
}

/// 加速器推理引擎，对外只暴露输入尺寸查询和同步推理
///
/// 实现不要求线程安全，调用方负责串行化。`infer` 返回全部输出张量的
/// 浮点拷贝，引擎内部的输出缓冲在返回前释放。
pub trait NpuEngine: Send {
  fn input_shape(&self) -> InputShape;
  fn infer(&mut self, input: &RgbNhwcFrame) -> Result<Vec<Box<[f32]>>, EngineError>;
}

/// 逐帧推理的模型，连续任务按帧调用
pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn shape_follows_layout() {
    let nhwc = InputShape::from_dims(TensorLayout::Nhwc, [3, 160, 224]);
    assert_eq!((nhwc.width, nhwc.height, nhwc.channels), (160, 224, 3));

    let nchw = InputShape::from_dims(TensorLayout::Nchw, [160, 224, 3]);
    assert_eq!((nchw.width, nchw.height, nchw.channels), (160, 224, 3));
  }

  #[test]
  fn same_dims_read_differently_per_layout() {
    let dims = [3, 160, 224];
    let nhwc = InputShape::from_dims(TensorLayout::Nhwc, dims);
    let nchw = InputShape::from_dims(TensorLayout::Nchw, dims);
    assert_ne!(nhwc, nchw);
    assert_eq!((nchw.width, nchw.height, nchw.channels), (3, 160, 224));
  }

  #[test]
  fn default_dims_describe_mobilenet_input() {
    for layout in [TensorLayout::Nhwc, TensorLayout::Nchw] {
      let shape = InputShape::from_dims(layout, layout.default_dims());
      assert_eq!((shape.width, shape.height, shape.channels), (224, 224, 3));
    }
  }

  #[test]
  fn dims_parse_three_positive_values() {
    assert_eq!(parse_dims("3, 224,160"), Some([3, 224, 160]));
    assert_eq!(parse_dims("3,224"), None);
    assert_eq!(parse_dims("3,224,160,1"), None);
    assert_eq!(parse_dims("3,0,160"), None);
    assert_eq!(parse_dims("3,x,160"), None);
  }

  #[test]
  fn layout_names_are_case_insensitive() {
    assert_eq!(TensorLayout::parse("NCHW"), Some(TensorLayout::Nchw));
    assert_eq!(TensorLayout::parse("nhwc"), Some(TensorLayout::Nhwc));
    assert_eq!(TensorLayout::parse("chw"), None);
  }
}
