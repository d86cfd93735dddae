// 该文件是 Shanan （山南西风） 项目的一部分。
// src/main.rs - 分类融合服务主程序
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

mod args;

use std::sync::Arc;
use std::{thread, time::Duration};

use anyhow::{Result, bail, ensure};
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use shanan_fusion::{
  FromUrl,
  model::{EngineError, MAX_TOP_NUM, ModelRegistry, NpuEngine},
  output::OutputWrapper,
  pipeline::Pipeline,
  secondary::SecondaryClassifier,
  server,
};

#[cfg(feature = "rknpu")]
fn load_engine(model: &Url) -> Result<Box<dyn NpuEngine>, EngineError> {
  use shanan_fusion::model::RknnBuilder;
  let engine = RknnBuilder::from_url(model)?.build()?;
  Ok(Box::new(engine))
}

#[cfg(not(feature = "rknpu"))]
fn load_engine(model: &Url) -> Result<Box<dyn NpuEngine>, EngineError> {
  Err(EngineError::ModelInvalid(format!(
    "未启用 rknpu 特性，无法加载 {}",
    model
  )))
}

#[cfg(feature = "onnx")]
fn load_secondary(url: &Url) -> Result<SecondaryClassifier> {
  use shanan_fusion::secondary::OnnxClassifierBuilder;
  let builder = OnnxClassifierBuilder::from_url(url)?;
  let output_len = builder.output_len();
  let model = builder.build()?;
  Ok(SecondaryClassifier::new(Box::new(model), output_len))
}

#[cfg(not(feature = "onnx"))]
fn load_secondary(url: &Url) -> Result<SecondaryClassifier> {
  bail!("未启用 onnx 特性，无法加载 {}", url)
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("部署形态: {:?}", args.variant);
  if let Some(secondary) = &args.secondary {
    info!("特征分类器: {}", secondary);
  }
  if let Some(record) = &args.record {
    info!("决策记录: {}", record);
  }
  ensure!(
    args.top_k <= MAX_TOP_NUM,
    "--top-k 不能超过 {}",
    MAX_TOP_NUM
  );

  let model_url = args.model.clone();
  let registry = Arc::new(ModelRegistry::new(move || load_engine(&model_url)));
  if args.lazy {
    info!("延迟加载模型，首个请求到达时初始化");
  } else {
    // 启动时加载失败直接退出
    registry.primary()?;
  }

  let mut builder = Pipeline::builder(registry)
    .variant(args.variant)
    .top_k(args.top_k)
    .label_offset(args.label_offset)
    .weights(args.weights());

  if let Some(url) = &args.secondary {
    let secondary = load_secondary(url)?;
    info!(
      "特征分类器加载完成, 输入长度: {}, 输出宽度: {}",
      secondary.input_len(),
      secondary.output_len()
    );
    builder = builder.secondary(secondary);
  } else if args.variant.needs_features() {
    bail!("{:?} 形态需要 --secondary 指定特征分类器", args.variant);
  }

  if let Some(url) = &args.record {
    if !args.variant.needs_features() {
      warn!("当前形态不产生融合结果，决策记录不会写入");
    }
    builder = builder.record(Box::new(OutputWrapper::from_url(url)?));
  }

  let pipeline = Arc::new(builder.build()?);

  let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<()>();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;

  let listener = tokio::net::TcpListener::bind(args.listen).await?;
  server::serve(listener, pipeline, async move {
    let _ = rx.recv().await;
  })
  .await?;

  info!("服务已停止");
  Ok(())
}
