// 该文件是 Shanan （山南西风） 项目的一部分。
// src/fusion.rs - 双模型融合决策
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

use serde::Serialize;

/// 加权融合的判决阈值
pub const BLEND_DECISION_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
  pub primary: f32,
  pub secondary: f32,
}

impl Default for FusionWeights {
  fn default() -> Self {
    Self {
      primary: 0.5,
      secondary: 0.5,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionPolicy {
  /// 加权求和，超过 0.5 判为类别 1
  WeightedBlend,
  /// 两者取整后类别一致则加权；否则加权分数较大的一方直接胜出
  AgreementFirst,
}

/// 融合结果，构造后不再修改
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FusionResult {
  #[serde(rename = "class")]
  pub class_id: i64,
  pub probability: f32,
  #[serde(rename = "rknn_score")]
  pub primary_score: f32,
  #[serde(rename = "svm_score")]
  pub secondary_score: f32,
}

impl FusionPolicy {
  pub fn fuse(&self, primary: f32, secondary: f32, weights: FusionWeights) -> FusionResult {
    let weighted_primary = primary * weights.primary;
    let weighted_secondary = secondary * weights.secondary;
    let blended = weighted_primary + weighted_secondary;

    let (class_id, probability) = match self {
      FusionPolicy::WeightedBlend => {
        let class_id = if blended > BLEND_DECISION_THRESHOLD { 1 } else { 0 };
        (class_id, blended)
      }
      FusionPolicy::AgreementFirst => {
        let primary_class = primary.round() as i64;
        let secondary_class = secondary.round() as i64;
        if primary_class == secondary_class {
          (primary_class, blended)
        } else if weighted_primary >= weighted_secondary {
          (primary_class, primary)
        } else {
          (secondary_class, secondary)
        }
      }
    };

    FusionResult {
      class_id,
      probability,
      primary_score: primary,
      secondary_score: secondary,
    }
  }
}

/// 使用指定策略融合两路分数
pub fn fuse(
  policy: FusionPolicy,
  primary: f32,
  secondary: f32,
  weights: FusionWeights,
) -> FusionResult {
  policy.fuse(primary, secondary, weights)
}
