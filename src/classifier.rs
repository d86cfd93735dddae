// 该文件是 Shanan （山南西风） 项目的一部分。
// src/classifier.rs - 单模型分类服务
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

use std::sync::Arc;

use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

use crate::{
  input::{InputError, decode_image, prepare_frame},
  model::{
    EngineError, Model, ModelRegistry, TopKError, argmax, registry::RegistryError, softmax, top_k,
  },
};

/// 模型输出的类别编号相对外部编号偏移 +1，0 号保留
pub const DEFAULT_LABEL_OFFSET: i64 = 1;
pub const DEFAULT_TOP_K: usize = 5;

#[derive(Error, Debug)]
pub enum ClassifyError {
  #[error("{0}")]
  Input(#[from] InputError),
  #[error("{0}")]
  Registry(#[from] RegistryError),
  #[error("{0}")]
  Engine(#[from] EngineError),
  #[error("{0}")]
  TopK(#[from] TopKError),
  #[error("模型没有输出张量")]
  NoOutput,
  #[error("分类输出为空")]
  EmptyOutput,
}

/// 后处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Postprocess {
  /// 直接在原始输出上取 Top-K
  TopK(usize),
  /// 先 softmax 再取最大类别，用于输出未归一化 logits 的小类别数模型
  SoftmaxArgmax,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassScore {
  pub class: i64,
  pub prob: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SingleClassResult {
  #[serde(rename = "class")]
  pub class_id: i64,
  pub probability: f32,
}

/// softmax 之后的完整类别分布，按外部类别编号查询
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDistribution {
  probs: Box<[f32]>,
  label_offset: i64,
}

impl ClassDistribution {
  /// 指定外部类别的概率，越界时为 0
  pub fn probability(&self, class: i64) -> f32 {
    usize::try_from(class + self.label_offset)
      .ok()
      .and_then(|index| self.probs.get(index).copied())
      .unwrap_or(0.0)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
  TopK(Vec<ClassScore>),
  Single {
    result: SingleClassResult,
    distribution: ClassDistribution,
  },
}

/// 每个输出头各自的 Top-K 结果，按输出顺序排列
pub type HeadScores = Vec<Vec<ClassScore>>;

/// 加速器模型上的单次分类：解码、缩放、推理、后处理
pub struct ClassifierService {
  registry: Arc<ModelRegistry>,
  postprocess: Postprocess,
  label_offset: i64,
}

impl ClassifierService {
  pub fn new(registry: Arc<ModelRegistry>, postprocess: Postprocess) -> Self {
    Self {
      registry,
      postprocess,
      label_offset: DEFAULT_LABEL_OFFSET,
    }
  }

  pub fn with_label_offset(mut self, label_offset: i64) -> Self {
    self.label_offset = label_offset;
    self
  }

  pub fn classify(&self, image_bytes: &[u8]) -> Result<Classification, ClassifyError> {
    debug!("预处理输入图像");
    let image = decode_image(image_bytes)?;
    let outputs = self.infer_image(&image)?;
    // 第一个输出为分类头
    let head = outputs.into_iter().next().ok_or(ClassifyError::NoOutput)?;

    debug!("后处理模型输出, 长度 {}", head.len());
    self.postprocess_head(head)
  }

  /// 对已解码的帧逐个输出头取 Top-K
  pub fn classify_heads(
    &self,
    image: &RgbImage,
    k: usize,
  ) -> Result<HeadScores, ClassifyError> {
    let outputs = self.infer_image(image)?;
    if outputs.is_empty() {
      return Err(ClassifyError::NoOutput);
    }
    outputs
      .iter()
      .map(|head| self.top_k_scores(head, k))
      .collect()
  }

  fn infer_image(&self, image: &RgbImage) -> Result<Vec<Box<[f32]>>, ClassifyError> {
    let handle = self.registry.primary()?;
    let shape = handle.input_shape();
    let frame = prepare_frame(image, shape.width, shape.height);

    debug!("执行推理");
    let outputs = handle.infer(&frame).inspect_err(|e| {
      error!("推理失败: {}", e);
    })?;
    Ok(outputs)
  }

  fn top_k_scores(&self, head: &[f32], k: usize) -> Result<Vec<ClassScore>, ClassifyError> {
    let result = top_k(head, k)?;
    let scores = result
      .assigned()
      .map(|e| ClassScore {
        class: e.class_index as i64 - self.label_offset,
        prob: e.probability,
      })
      .collect::<Vec<_>>();
    for (i, s) in scores.iter().enumerate() {
      debug!("Top-{}: Class {}, Probability: {:.6}", i + 1, s.class, s.prob);
    }
    Ok(scores)
  }

  fn postprocess_head(&self, mut head: Box<[f32]>) -> Result<Classification, ClassifyError> {
    match self.postprocess {
      Postprocess::TopK(k) => Ok(Classification::TopK(self.top_k_scores(&head, k)?)),
      Postprocess::SoftmaxArgmax => {
        softmax(&mut head);
        let (index, probability) = argmax(&head).ok_or(ClassifyError::EmptyOutput)?;
        let result = SingleClassResult {
          class_id: index as i64 - self.label_offset,
          probability,
        };
        debug!("分类结果: {:?}", result);
        Ok(Classification::Single {
          result,
          distribution: ClassDistribution {
            probs: head,
            label_offset: self.label_offset,
          },
        })
      }
    }
  }
}

impl Model for ClassifierService {
  type Input = RgbImage;
  type Output = HeadScores;
  type Error = ClassifyError;

  fn infer(&self, input: &RgbImage) -> Result<HeadScores, ClassifyError> {
    let k = match self.postprocess {
      Postprocess::TopK(k) => k,
      Postprocess::SoftmaxArgmax => 1,
    };
    self.classify_heads(input, k)
  }
}
