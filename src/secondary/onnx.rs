// 该文件是 Shanan （山南西风） 项目的一部分。
// src/secondary/onnx.rs - ONNX Runtime 经典模型
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

use ort::{
  memory::Allocator,
  session::{Session, builder::GraphOptimizationLevel},
  value::{DowncastableTarget, DynMapValueType, DynSequenceValueType, DynValue, Tensor},
};
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  secondary::{
    DEFAULT_FEATURE_LEN, DEFAULT_OUTPUT_LEN, FeatureModel, SecondaryError, dense_class_probs,
  },
  url_file_path, url_query,
};

/// 导出为 ONNX 的 SVM 等经典模型
pub struct OnnxClassifier {
  session: Session,
  input_name: String,
  output_name: String,
  input_len: usize,
}

/// 从 `onnx:///path/svm.onnx?features=34&outputs=2&threads=1` 构建
pub struct OnnxClassifierBuilder {
  model_path: String,
  input_len: usize,
  output_len: usize,
  threads: usize,
}

impl FromUrlWithScheme for OnnxClassifierBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxClassifierBuilder {
  type Error = SecondaryError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(SecondaryError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    Ok(OnnxClassifierBuilder {
      model_path: url_file_path(url),
      input_len: url_query(url, "features").unwrap_or(DEFAULT_FEATURE_LEN),
      output_len: url_query(url, "outputs").unwrap_or(DEFAULT_OUTPUT_LEN),
      threads: url_query(url, "threads").unwrap_or(1),
    })
  }
}

impl OnnxClassifierBuilder {
  pub fn output_len(&self) -> usize {
    self.output_len
  }

  pub fn build(self) -> Result<OnnxClassifier, SecondaryError> {
    ort::init().commit()?;
    info!(
      "加载分类器模型: {}, 线程数: {}",
      self.model_path, self.threads
    );

    let session = Session::builder()?
      .with_optimization_level(GraphOptimizationLevel::Level3)?
      .with_intra_threads(self.threads)?
      .commit_from_file(&self.model_path)
      .map_err(|e| SecondaryError::ModelLoadError(format!("{}: {}", self.model_path, e)))?;

    let input_name = session
      .inputs
      .first()
      .map(|i| i.name.clone())
      .ok_or_else(|| SecondaryError::ModelLoadError("模型没有输入".to_string()))?;

    // 优先使用概率输出，其次是最后一个输出
    let output_name = session
      .outputs
      .iter()
      .find(|o| o.name.contains("prob"))
      .or_else(|| session.outputs.last())
      .map(|o| o.name.clone())
      .ok_or_else(|| SecondaryError::ModelLoadError("模型没有输出".to_string()))?;

    info!(
      "分类器加载完成, 输入: {}, 输出: {}, 特征长度: {}",
      input_name, output_name, self.input_len
    );

    Ok(OnnxClassifier {
      session,
      input_name,
      output_name,
      input_len: self.input_len,
    })
  }
}

impl FeatureModel for OnnxClassifier {
  fn input_len(&self) -> usize {
    self.input_len
  }

  fn forward(&mut self, features: &[f32]) -> Result<Vec<f32>, SecondaryError> {
    let shape = vec![1_i64, features.len() as i64];
    let input_tensor = Tensor::from_array((shape, features.to_vec()))?;

    let outputs = self
      .session
      .run(ort::inputs![&self.input_name => input_tensor])?;

    let output = outputs.get(&self.output_name).ok_or_else(|| {
      SecondaryError::InferenceFailed(format!("缺少输出 {}", self.output_name))
    })?;

    // 张量输出直接读取；sklearn 导出的 ZipMap 输出为 seq(map(int64, float))
    if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
      debug!("分类器输出形状: {:?}", shape);
      return Ok(data.to_vec());
    }
    let dtype = output.dtype();
    if DynSequenceValueType::can_downcast(&dtype) {
      return extract_sequence_map(output);
    }

    Err(SecondaryError::UnreadableOutput(format!(
      "{} 的类型 {:?} 不受支持",
      self.output_name, dtype
    )))
  }
}

fn extract_sequence_map(output: &DynValue) -> Result<Vec<f32>, SecondaryError> {
  let allocator = Allocator::default();
  let sequence = output
    .downcast_ref::<DynSequenceValueType>()
    .map_err(|e| SecondaryError::UnreadableOutput(e.to_string()))?;
  let maps = sequence
    .try_extract_sequence::<DynMapValueType>(&allocator)
    .map_err(|e| SecondaryError::UnreadableOutput(e.to_string()))?;

  // 批大小固定为 1
  let map = maps
    .first()
    .ok_or_else(|| SecondaryError::UnreadableOutput("空的概率序列".to_string()))?;
  let pairs = map
    .try_extract_key_values::<i64, f32>()
    .map_err(|e| SecondaryError::UnreadableOutput(e.to_string()))?;
  debug!("分类器概率表: {:?}", pairs);
  Ok(dense_class_probs(&pairs))
}
