// 该文件是 Shanan （山南西风） 项目的一部分。
// src/secondary.rs - 特征向量分类器
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

use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{argmax, softmax};

#[cfg(feature = "onnx")]
mod onnx;
#[cfg(feature = "onnx")]
pub use self::onnx::{OnnxClassifier, OnnxClassifierBuilder};

/// 外部特征向量的默认长度
pub const DEFAULT_FEATURE_LEN: usize = 34;
/// 二分类模型的默认输出宽度
pub const DEFAULT_OUTPUT_LEN: usize = 2;

#[derive(Error, Debug)]
pub enum SecondaryError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(String),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("推理失败: {0}")]
  InferenceFailed(String),
  #[error("无法读取分类器输出: {0}")]
  UnreadableOutput(String),
  #[error("分类器锁已损坏")]
  Poisoned,
  #[cfg(feature = "onnx")]
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
}

/// 把 `类别 -> 概率` 表展开成按类别编号索引的向量，缺失的类别记为 0
pub fn dense_class_probs(pairs: &[(i64, f32)]) -> Vec<f32> {
  let len = pairs
    .iter()
    .filter_map(|(class, _)| usize::try_from(*class).ok())
    .max()
    .map_or(0, |max| max + 1);
  let mut probs = vec![0.0; len];
  for (class, prob) in pairs {
    if let Ok(index) = usize::try_from(*class) {
      probs[index] = *prob;
    }
  }
  probs
}

/// 以单行特征向量为输入的经典模型
pub trait FeatureModel: Send {
  /// 模型期望的特征长度
  fn input_len(&self) -> usize;
  fn forward(&mut self, features: &[f32]) -> Result<Vec<f32>, SecondaryError>;
}

/// 经典分类器服务，构造时即持有已加载的模型
///
/// 输出宽度大于 1 时先做 softmax，再把最大类别的索引以浮点数返回；
/// 宽度为 1 时原值即为概率。输出宽度与配置不符时记录警告并返回 0。
pub struct SecondaryClassifier {
  model: Mutex<Box<dyn FeatureModel>>,
  input_len: usize,
  output_len: usize,
}

impl SecondaryClassifier {
  pub fn new(model: Box<dyn FeatureModel>, output_len: usize) -> Self {
    let input_len = model.input_len();
    Self {
      model: Mutex::new(model),
      input_len,
      output_len,
    }
  }

  pub fn input_len(&self) -> usize {
    self.input_len
  }

  pub fn output_len(&self) -> usize {
    self.output_len
  }

  pub fn score(&self, features: &[f32]) -> Result<f32, SecondaryError> {
    let forwarded = {
      let mut model = self.model.lock().map_err(|_| SecondaryError::Poisoned)?;
      model.forward(features)
    };
    let mut output = match forwarded {
      Ok(output) => output,
      Err(SecondaryError::UnreadableOutput(reason)) => {
        warn!("{}, 返回中性分数", reason);
        return Ok(0.0);
      }
      Err(e) => return Err(e),
    };

    if output.len() != self.output_len {
      warn!(
        "分类器输出宽度不符: 期望 {}, 实际 {}, 返回中性分数",
        self.output_len,
        output.len()
      );
      return Ok(0.0);
    }

    let score = if output.len() > 1 {
      softmax(&mut output);
      match argmax(&output) {
        Some((index, _)) => index as f32,
        None => 0.0,
      }
    } else {
      output[0]
    };
    debug!("分类器输出: {:?}, 分数: {}", output, score);
    Ok(score)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  };

  struct StubModel {
    output: Vec<f32>,
    calls: Arc<AtomicUsize>,
  }

  impl FeatureModel for StubModel {
    fn input_len(&self) -> usize {
      3
    }

    fn forward(&mut self, features: &[f32]) -> Result<Vec<f32>, SecondaryError> {
      assert_eq!(features.len(), 3);
      self.calls.fetch_add(1, Ordering::SeqCst);
      Ok(self.output.clone())
    }
  }

  fn classifier(output: Vec<f32>, output_len: usize) -> SecondaryClassifier {
    let model = StubModel {
      output,
      calls: Arc::new(AtomicUsize::new(0)),
    };
    SecondaryClassifier::new(Box::new(model), output_len)
  }

  #[test]
  fn multi_class_output_returns_argmax_index() {
    let svm = classifier(vec![-1.2, 3.4], 2);
    assert_eq!(svm.score(&[0.0, 1.0, 2.0]).unwrap(), 1.0);

    let svm = classifier(vec![0.1, 5.0, 0.3], 3);
    assert_eq!(svm.score(&[0.0, 1.0, 2.0]).unwrap(), 1.0);
  }

  #[test]
  fn single_output_is_a_probability() {
    let svm = classifier(vec![0.73], 1);
    assert_eq!(svm.score(&[0.0, 1.0, 2.0]).unwrap(), 0.73);
  }

  #[test]
  fn shape_mismatch_degrades_to_neutral() {
    let svm = classifier(vec![0.2, 0.5, 0.3], 2);
    assert_eq!(svm.score(&[0.0, 1.0, 2.0]).unwrap(), 0.0);
  }

  #[test]
  fn class_probability_map_is_expanded_by_index() {
    assert_eq!(dense_class_probs(&[(1, 0.75), (0, 0.25)]), vec![0.25, 0.75]);
    assert_eq!(dense_class_probs(&[(2, 0.5), (-1, 0.1)]), vec![0.0, 0.0, 0.5]);
    assert!(dense_class_probs(&[]).is_empty());
  }

  struct OpaqueOutputModel;

  impl FeatureModel for OpaqueOutputModel {
    fn input_len(&self) -> usize {
      2
    }

    fn forward(&mut self, _features: &[f32]) -> Result<Vec<f32>, SecondaryError> {
      Err(SecondaryError::UnreadableOutput("seq(string)".to_string()))
    }
  }

  #[test]
  fn unreadable_output_degrades_to_neutral() {
    let svm = SecondaryClassifier::new(Box::new(OpaqueOutputModel), 2);
    assert_eq!(svm.score(&[0.5, 0.5]).unwrap(), 0.0);
  }

  #[test]
  fn concurrent_scores_are_serialized() {
    let calls = Arc::new(AtomicUsize::new(0));
    let model = StubModel {
      output: vec![0.9],
      calls: calls.clone(),
    };
    let svm = SecondaryClassifier::new(Box::new(model), 1);
    assert_eq!(svm.input_len(), 3);

    std::thread::scope(|s| {
      for _ in 0..8 {
        s.spawn(|| svm.score(&[1.0, 2.0, 3.0]).unwrap());
      }
    });
    assert_eq!(calls.load(Ordering::SeqCst), 8);
  }
}
