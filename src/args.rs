// 该文件是 Shanan （山南西风） 项目的一部分。
// src/args.rs - 服务参数配置
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

use std::net::SocketAddr;

use clap::Parser;
use url::Url;

use shanan_fusion::{
  classifier::{DEFAULT_LABEL_OFFSET, DEFAULT_TOP_K},
  fusion::FusionWeights,
  pipeline::Variant,
};

/// 图像分类融合服务
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 加速器模型，如 rknn:///opt/mobilenet.rknn?layout=nhwc&dims=3,224,224
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 特征分类器模型，如 onnx:///opt/svm.onnx?features=34&outputs=2
  #[arg(long, value_name = "SECONDARY")]
  pub secondary: Option<Url>,

  /// 部署形态
  #[arg(long, value_enum, default_value = "top-k")]
  pub variant: Variant,

  /// Top-K 形态返回的类别数
  #[arg(long, default_value_t = DEFAULT_TOP_K)]
  pub top_k: usize,

  /// 从原始类别索引中减去的偏移量
  #[arg(long, default_value_t = DEFAULT_LABEL_OFFSET, allow_negative_numbers = true)]
  pub label_offset: i64,

  #[arg(long, default_value_t = 0.5)]
  pub primary_weight: f32,

  #[arg(long, default_value_t = 0.5)]
  pub secondary_weight: f32,

  /// 决策记录输出，如 csv:///var/log/shanan/results.csv
  #[arg(long, value_name = "RECORD")]
  pub record: Option<Url>,

  /// 监听地址
  #[arg(long, default_value = "0.0.0.0:8080")]
  pub listen: SocketAddr,

  /// 推迟到首个请求时再加载加速器模型
  #[arg(long)]
  pub lazy: bool,
}

impl Args {
  pub fn weights(&self) -> FusionWeights {
    FusionWeights {
      primary: self.primary_weight,
      secondary: self.secondary_weight,
    }
  }
}
