// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/simple_oneshot.rs - 单张图像分类
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

use anyhow::{Result, bail};
use clap::Parser;
use url::Url;

use shanan_fusion::{
  FromUrl,
  classifier::{
    Classification, ClassifierService, DEFAULT_LABEL_OFFSET, DEFAULT_TOP_K, Postprocess,
  },
  input::ImageFileInput,
  model::{EngineError, ModelRegistry, NpuEngine},
};
use tracing::info;

/// 单张图像 Top-K 分类
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// RKNN 模型路径
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入图像，如 image:///tmp/dog.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  #[arg(long, default_value_t = DEFAULT_TOP_K)]
  pub top_k: usize,
  #[arg(long, default_value_t = DEFAULT_LABEL_OFFSET, allow_negative_numbers = true)]
  pub label_offset: i64,
}

#[cfg(feature = "rknpu")]
fn load_engine(model: &Url) -> Result<Box<dyn NpuEngine>, EngineError> {
  use shanan_fusion::model::RknnBuilder;
  Ok(Box::new(RknnBuilder::from_url(model)?.build()?))
}

#[cfg(not(feature = "rknpu"))]
fn load_engine(model: &Url) -> Result<Box<dyn NpuEngine>, EngineError> {
  Err(EngineError::ModelInvalid(format!(
    "未启用 rknpu 特性，无法加载 {}",
    model
  )))
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);

  let input_image = ImageFileInput::from_url(&args.input)?;
  let image_bytes = input_image.read_bytes()?;

  let registry = Arc::new(ModelRegistry::preloaded(load_engine(&args.model)?));
  let service = ClassifierService::new(registry, Postprocess::TopK(args.top_k))
    .with_label_offset(args.label_offset);

  info!("开始推理...");
  let now = std::time::Instant::now();
  let Classification::TopK(scores) = service.classify(&image_bytes)? else {
    bail!("后处理方式不是 Top-K");
  };
  info!("推理完成，耗时: {:.2?}", now.elapsed());

  println!(" --- Top{} ---", args.top_k);
  for (i, score) in scores.iter().enumerate() {
    println!(
      "Top-{}: Class {}, Probability: {:.6}",
      i + 1,
      score.class,
      score.prob
    );
  }

  Ok(())
}
