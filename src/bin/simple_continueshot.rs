// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/simple_continueshot.rs - 视频流连续分类
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
use std::{thread, time::Duration};

use anyhow::{Result, ensure};
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use shanan_fusion::{
  FromUrl,
  classifier::{ClassifierService, DEFAULT_LABEL_OFFSET, DEFAULT_TOP_K, Postprocess},
  input::GStreamerInput,
  model::{MAX_TOP_NUM, ModelRegistry, RknnBuilder},
  output::FrameOutputWrapper,
  task::{ContinuousTask, Task},
};

/// 摄像头或视频文件逐帧 Top-K 分类
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// RKNN 模型路径
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 视频来源，如 gst://camera/dev/video0?width=640&height=480
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 逐帧输出，如 image:///tmp/latest.jpg 或 console://
  #[arg(long, value_name = "OUTPUT", default_value = "console://")]
  pub output: Url,

  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
  #[arg(long, default_value_t = DEFAULT_TOP_K)]
  pub top_k: usize,
  #[arg(long, default_value_t = DEFAULT_LABEL_OFFSET, allow_negative_numbers = true)]
  pub label_offset: i64,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);
  ensure!(
    args.top_k <= MAX_TOP_NUM,
    "--top-k 不能超过 {}",
    MAX_TOP_NUM
  );

  let engine = RknnBuilder::from_url(&args.model)?.build()?;
  let registry = Arc::new(ModelRegistry::preloaded(Box::new(engine)));
  let service = ClassifierService::new(registry, Postprocess::TopK(args.top_k))
    .with_label_offset(args.label_offset);

  let input = GStreamerInput::from_url(&args.input)?;
  let output = FrameOutputWrapper::from_url(&args.output)?;

  let (tx, rx) = std::sync::mpsc::channel();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;

  ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .with_interrupt(rx)
    .run_task(input, service, output)?;

  Ok(())
}
