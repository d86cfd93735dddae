// 该文件是 Shanan （山南西风） 项目的一部分。
// src/pipeline.rs - 可配置分类流水线
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
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
  classifier::{
    ClassScore, Classification, ClassifierService, ClassifyError, DEFAULT_TOP_K, Postprocess,
    SingleClassResult,
  },
  fusion::{FusionPolicy, FusionResult, FusionWeights},
  model::ModelRegistry,
  output::{DecisionRecord, RecordSink},
  secondary::{SecondaryClassifier, SecondaryError},
};

/// 融合时视为正类的外部类别编号
pub const POSITIVE_CLASS: i64 = 1;

/// 部署形态
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Variant {
  /// 只返回加速器模型的 Top-K
  TopK,
  /// 加速器模型 softmax 后的单一类别
  SingleClass,
  /// 与经典分类器加权融合
  WeightedFusion,
  /// 与经典分类器一致优先融合
  AgreementFusion,
}

impl Variant {
  pub fn fusion_policy(&self) -> Option<FusionPolicy> {
    match self {
      Variant::TopK | Variant::SingleClass => None,
      Variant::WeightedFusion => Some(FusionPolicy::WeightedBlend),
      Variant::AgreementFusion => Some(FusionPolicy::AgreementFirst),
    }
  }

  pub fn needs_features(&self) -> bool {
    self.fusion_policy().is_some()
  }
}

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("{0}")]
  Classify(#[from] ClassifyError),
  #[error("{0}")]
  Secondary(#[from] SecondaryError),
  #[error("缺少必需字段: features")]
  MissingFeatures,
  #[error("特征长度错误: 期望 {expected}, 实际 {actual}")]
  FeatureLength { expected: usize, actual: usize },
  #[error("特征包含非有限数值")]
  NonFiniteFeature,
  #[error("当前部署未配置特征分类器")]
  NoSecondary,
}

/// 已完成格式解析的请求：图像字节与可选特征向量
#[derive(Debug, Clone, Default)]
pub struct ClassifyRequest {
  pub image: Vec<u8>,
  pub features: Option<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PipelineOutput {
  TopK { results: Vec<ClassScore> },
  Single(SingleClassResult),
  Fusion(FusionResult),
}

pub struct PipelineBuilder {
  registry: Arc<ModelRegistry>,
  variant: Variant,
  top_k: usize,
  label_offset: Option<i64>,
  weights: FusionWeights,
  secondary: Option<SecondaryClassifier>,
  record: Option<Box<dyn RecordSink>>,
}

impl PipelineBuilder {
  pub fn variant(mut self, variant: Variant) -> Self {
    self.variant = variant;
    self
  }

  pub fn top_k(mut self, k: usize) -> Self {
    self.top_k = k;
    self
  }

  pub fn label_offset(mut self, offset: i64) -> Self {
    self.label_offset = Some(offset);
    self
  }

  pub fn weights(mut self, weights: FusionWeights) -> Self {
    self.weights = weights;
    self
  }

  pub fn secondary(mut self, secondary: SecondaryClassifier) -> Self {
    self.secondary = Some(secondary);
    self
  }

  pub fn record(mut self, record: Box<dyn RecordSink>) -> Self {
    self.record = Some(record);
    self
  }

  pub fn build(self) -> Result<Pipeline, PipelineError> {
    if self.variant.needs_features() && self.secondary.is_none() {
      return Err(PipelineError::NoSecondary);
    }

    let postprocess = match self.variant {
      Variant::TopK => Postprocess::TopK(self.top_k),
      _ => Postprocess::SoftmaxArgmax,
    };
    let mut primary = ClassifierService::new(self.registry, postprocess);
    if let Some(offset) = self.label_offset {
      primary = primary.with_label_offset(offset);
    }

    Ok(Pipeline {
      variant: self.variant,
      primary,
      secondary: self.secondary,
      weights: self.weights,
      record: self.record,
    })
  }
}

/// 一条流水线覆盖全部部署形态，按 [`Variant`] 选择输出
pub struct Pipeline {
  variant: Variant,
  primary: ClassifierService,
  secondary: Option<SecondaryClassifier>,
  weights: FusionWeights,
  record: Option<Box<dyn RecordSink>>,
}

impl Pipeline {
  pub fn builder(registry: Arc<ModelRegistry>) -> PipelineBuilder {
    PipelineBuilder {
      registry,
      variant: Variant::TopK,
      top_k: DEFAULT_TOP_K,
      label_offset: None,
      weights: FusionWeights::default(),
      secondary: None,
      record: None,
    }
  }

  /// 经典分类器期望的特征长度，未配置时为 `None`
  pub fn expected_features(&self) -> Option<usize> {
    self.secondary.as_ref().map(|s| s.input_len())
  }

  /// 在请求边界校验特征向量
  pub fn validate_features(&self, features: &[f32]) -> Result<(), PipelineError> {
    if let Some(expected) = self.expected_features() {
      if features.len() != expected {
        return Err(PipelineError::FeatureLength {
          expected,
          actual: features.len(),
        });
      }
    }
    if features.iter().any(|v| !v.is_finite()) {
      return Err(PipelineError::NonFiniteFeature);
    }
    Ok(())
  }

  pub fn run(&self, request: &ClassifyRequest) -> Result<PipelineOutput, PipelineError> {
    let started = Instant::now();

    let Some(policy) = self.variant.fusion_policy() else {
      let output = match self.primary.classify(&request.image)? {
        Classification::TopK(results) => PipelineOutput::TopK { results },
        Classification::Single { result, .. } => PipelineOutput::Single(result),
      };
      info!("分类完成, 耗时: {:.2?}", started.elapsed());
      return Ok(output);
    };

    let features = request
      .features
      .as_deref()
      .ok_or(PipelineError::MissingFeatures)?;
    self.validate_features(features)?;
    let secondary = self.secondary.as_ref().ok_or(PipelineError::NoSecondary)?;

    let primary_score = match self.primary.classify(&request.image)? {
      Classification::Single { distribution, .. } => distribution.probability(POSITIVE_CLASS),
      Classification::TopK(results) => results
        .iter()
        .find(|s| s.class == POSITIVE_CLASS)
        .map(|s| s.prob)
        .unwrap_or(0.0),
    };
    let secondary_score = secondary.score(features)?;
    debug!(
      "融合输入: 加速器分数 {:.4}, 分类器分数 {:.4}",
      primary_score, secondary_score
    );

    let result = policy.fuse(primary_score, secondary_score, self.weights);
    let elapsed = started.elapsed();
    info!(
      "融合完成: 类别 {}, 概率 {:.4}, 耗时: {:.2?}",
      result.class_id, result.probability, elapsed
    );

    if let Some(record) = &self.record {
      // 记录失败不影响本次响应
      if let Err(e) = record.record(&DecisionRecord::now(result, elapsed)) {
        error!("写入决策记录失败: {}", e);
      }
    }

    Ok(PipelineOutput::Fusion(result))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    frame::RgbNhwcFrame,
    model::{EngineError, InputShape, NpuEngine},
    output::RecordError,
    secondary::FeatureModel,
  };
  use image::{ImageFormat, Rgb, RgbImage};
  use std::io::Cursor;
  use std::sync::Mutex;

  struct LogitEngine(Vec<f32>);

  impl NpuEngine for LogitEngine {
    fn input_shape(&self) -> InputShape {
      InputShape {
        width: 4,
        height: 4,
        channels: 3,
      }
    }

    fn infer(&mut self, _input: &RgbNhwcFrame) -> Result<Vec<Box<[f32]>>, EngineError> {
      Ok(vec![self.0.clone().into_boxed_slice()])
    }
  }

  struct ProbModel(f32);

  impl FeatureModel for ProbModel {
    fn input_len(&self) -> usize {
      4
    }

    fn forward(&mut self, _features: &[f32]) -> Result<Vec<f32>, SecondaryError> {
      Ok(vec![self.0])
    }
  }

  #[derive(Default)]
  struct MemorySink(Mutex<Vec<DecisionRecord>>);

  impl RecordSink for Arc<MemorySink> {
    fn record(&self, record: &DecisionRecord) -> Result<(), RecordError> {
      self.0.lock().unwrap().push(*record);
      Ok(())
    }
  }

  fn png() -> Vec<u8> {
    let image = RgbImage::from_pixel(6, 6, Rgb([1, 2, 3]));
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png).unwrap();
    buffer.into_inner()
  }

  fn registry(logits: Vec<f32>) -> Arc<ModelRegistry> {
    Arc::new(ModelRegistry::preloaded(Box::new(LogitEngine(logits))))
  }

  fn request(features: Option<Vec<f32>>) -> ClassifyRequest {
    ClassifyRequest {
      image: png(),
      features,
    }
  }

  #[test]
  fn top_k_variant_outputs_results() {
    let pipeline = Pipeline::builder(registry(vec![0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6]))
      .build()
      .unwrap();
    let output = pipeline.run(&request(None)).unwrap();
    let PipelineOutput::TopK { results } = output else {
      panic!("expected top-k output");
    };
    let classes: Vec<i64> = results.iter().map(|r| r.class).collect();
    assert_eq!(classes, vec![5, 4, 3, 2, 1]);
  }

  #[test]
  fn single_class_variant_outputs_best_class() {
    let pipeline = Pipeline::builder(registry(vec![0.0, 0.0, 3.0]))
      .variant(Variant::SingleClass)
      .build()
      .unwrap();
    let output = pipeline.run(&request(None)).unwrap();
    assert!(matches!(
      output,
      PipelineOutput::Single(SingleClassResult { class_id: 1, .. })
    ));
  }

  #[test]
  fn fusion_requires_secondary_classifier() {
    let result = Pipeline::builder(registry(vec![0.0, 1.0]))
      .variant(Variant::WeightedFusion)
      .build();
    assert!(matches!(result, Err(PipelineError::NoSecondary)));
  }

  #[test]
  fn weighted_fusion_blends_and_records() {
    let sink = Arc::new(MemorySink::default());
    // [背景, 类别 0, 类别 1]，类别 1 的 softmax 概率约 0.8
    let logits = vec![-20.0, 0.0, 1.386_294_4];
    let pipeline = Pipeline::builder(registry(logits))
      .variant(Variant::WeightedFusion)
      .secondary(SecondaryClassifier::new(Box::new(ProbModel(0.8)), 1))
      .record(Box::new(sink.clone()))
      .build()
      .unwrap();

    let output = pipeline
      .run(&request(Some(vec![0.1, 0.2, 0.3, 0.4])))
      .unwrap();
    let PipelineOutput::Fusion(result) = output else {
      panic!("expected fusion output");
    };
    assert_eq!(result.class_id, 1);
    assert!((result.probability - 0.8).abs() < 1e-3);
    assert!((result.primary_score - 0.8).abs() < 1e-3);
    assert_eq!(result.secondary_score, 0.8);

    let records = sink.0.lock().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].result, result);
  }

  #[test]
  fn agreement_fusion_lets_stronger_model_win() {
    // 加速器判为类别 0 (p≈0.6)，正类分数约 0.4
    let logits = vec![-20.0, 0.405_465, 0.0];
    let pipeline = Pipeline::builder(registry(logits))
      .variant(Variant::AgreementFusion)
      .secondary(SecondaryClassifier::new(Box::new(ProbModel(0.9)), 1))
      .build()
      .unwrap();

    let output = pipeline
      .run(&request(Some(vec![0.0; 4])))
      .unwrap();
    let PipelineOutput::Fusion(result) = output else {
      panic!("expected fusion output");
    };
    assert_eq!(result.class_id, 1);
    assert_eq!(result.probability, 0.9);
    assert!((result.primary_score - 0.4).abs() < 1e-3);
  }

  #[test]
  fn primary_score_is_positive_class_probability() {
    // [背景, 类别 0, 类别 1] = [0.3, 0.4, 0.3]，最大类别为 0，但类别 1 的概率只有 0.3
    let logits = vec![0.3f32.ln(), 0.4f32.ln(), 0.3f32.ln()];
    let pipeline = Pipeline::builder(registry(logits))
      .variant(Variant::WeightedFusion)
      .secondary(SecondaryClassifier::new(Box::new(ProbModel(0.5)), 1))
      .build()
      .unwrap();

    let output = pipeline.run(&request(Some(vec![0.0; 4]))).unwrap();
    let PipelineOutput::Fusion(result) = output else {
      panic!("expected fusion output");
    };
    assert!((result.primary_score - 0.3).abs() < 1e-5);
    assert!((result.probability - 0.4).abs() < 1e-5);
    assert_eq!(result.class_id, 0);
  }

  #[test]
  fn fusion_validates_features() {
    let pipeline = Pipeline::builder(registry(vec![0.0, 1.0, 2.0]))
      .variant(Variant::WeightedFusion)
      .secondary(SecondaryClassifier::new(Box::new(ProbModel(0.5)), 1))
      .build()
      .unwrap();

    assert!(matches!(
      pipeline.run(&request(None)),
      Err(PipelineError::MissingFeatures)
    ));
    assert!(matches!(
      pipeline.run(&request(Some(vec![1.0; 3]))),
      Err(PipelineError::FeatureLength {
        expected: 4,
        actual: 3
      })
    ));
    assert!(matches!(
      pipeline.run(&request(Some(vec![1.0, f32::NAN, 0.0, 0.0]))),
      Err(PipelineError::NonFiniteFeature)
    ));
  }

  #[test]
  fn serializes_each_output_shape() {
    let top = PipelineOutput::TopK {
      results: vec![ClassScore { class: 3, prob: 0.5 }],
    };
    assert_eq!(
      serde_json::to_value(&top).unwrap(),
      serde_json::json!({"results": [{"class": 3, "prob": 0.5}]})
    );

    let single = PipelineOutput::Single(SingleClassResult {
      class_id: 2,
      probability: 0.25,
    });
    assert_eq!(
      serde_json::to_value(&single).unwrap(),
      serde_json::json!({"class": 2, "probability": 0.25})
    );
  }
}
