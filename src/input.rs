// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input.rs - 图像输入与预处理
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

use image::{RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::debug;

use crate::frame::RgbNhwcFrame;

mod read_image_file;
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GStreamerInput, GStreamerInputError, GStreamerInputPipelineBuilder};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("图像数据为空")]
  Empty,
  #[error("图像解码错误: {0}")]
  Decode(#[from] image::ImageError),
}

/// 将字节序列解码为 RGB 彩色图像
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, InputError> {
  if bytes.is_empty() {
    return Err(InputError::Empty);
  }
  let image = image::load_from_memory(bytes)?;
  debug!("图像解码完成: {}x{}", image.width(), image.height());
  Ok(image.into_rgb8())
}

/// 缩放到模型输入尺寸并转为 NHWC 帧；尺寸一致时不做缩放
pub fn prepare_frame(image: &RgbImage, width: u32, height: u32) -> RgbNhwcFrame {
  if image.dimensions() == (width, height) {
    return RgbNhwcFrame::from(image.clone());
  }
  let resized = image::imageops::resize(image, width, height, FilterType::Triangle);
  RgbNhwcFrame::from(resized)
}
