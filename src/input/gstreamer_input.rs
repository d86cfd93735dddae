// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 视频帧输入
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

//! 摄像头或视频文件的逐帧输入，帧统一转换为 RGB。
//!
//! - `gst://camera/dev/video0?width=640&height=480&fps=15&format=NV12&rotate=90`
//! - `gst://file/data/test.mp4?rotate=180`
//!
//! 需要系统安装 GStreamer 开发库（`libgstreamer1.0-dev`、
//! `libgstreamer-plugins-base1.0-dev`）。

use std::collections::HashMap;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_CAMERA_FPS: u32 = 15;

#[derive(Error, Debug)]
pub enum GStreamerInputError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  #[error("Unsupported video format")]
  UnsupportedFormat,
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PipelineItem {
  FileSource(String),
  CameraSource {
    camera: String,
    io_mode: Option<u32>,
    format: String,
    width: u32,
    height: u32,
    fps: u32,
  },
  VideoFlip {
    method: u32,
  },
  TargetFormat {
    format: String,
  },
}

impl PipelineItem {
  fn to_pipeline(&self) -> String {
    match self {
      PipelineItem::FileSource(path) => format!("filesrc location={} ! decodebin", path),
      PipelineItem::CameraSource {
        camera,
        io_mode,
        format,
        width,
        height,
        fps,
      } => {
        let io_mode = io_mode
          .map(|mode| format!(" io-mode={}", mode))
          .unwrap_or_default();
        format!(
          "v4l2src device={}{} ! video/x-raw,format={},width={},height={},framerate={}/1",
          camera, io_mode, format, width, height, fps
        )
      }
      PipelineItem::VideoFlip { method } => format!("videoflip method={}", method),
      PipelineItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
    }
  }
}

/// 从 `gst://` URL 组装管道描述
pub struct GStreamerInputPipelineBuilder {
  items: Vec<PipelineItem>,
}

impl FromUrlWithScheme for GStreamerInputPipelineBuilder {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerInputPipelineBuilder {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerInputError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();
    let path = crate::url_file_path(url);

    let mut items = match url.host_str() {
      Some("camera") => vec![Self::camera_source(path, &query)],
      Some("file") => vec![PipelineItem::FileSource(path)],
      _ => return Err(GStreamerInputError::SchemeMismatch),
    };
    if let Some(method) = query.get("rotate").and_then(|r| Self::flip_method(r)) {
      items.push(PipelineItem::VideoFlip { method });
    }
    items.push(PipelineItem::TargetFormat {
      format: "RGB".to_string(),
    });

    Ok(GStreamerInputPipelineBuilder { items })
  }
}

impl GStreamerInputPipelineBuilder {
  fn camera_source(camera: String, query: &HashMap<String, String>) -> PipelineItem {
    let number = |key: &str, default: u32| {
      query
        .get(key)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
    };
    PipelineItem::CameraSource {
      camera,
      io_mode: query.get("io-mode").and_then(|v| v.parse::<u32>().ok()),
      format: query
        .get("format")
        .cloned()
        .unwrap_or_else(|| "RGB".to_string()),
      width: number("width", DEFAULT_CAMERA_WIDTH),
      height: number("height", DEFAULT_CAMERA_HEIGHT),
      fps: number("fps", DEFAULT_CAMERA_FPS),
    }
  }

  fn flip_method(rotate: &str) -> Option<u32> {
    match rotate {
      "0" => None,
      "90" => Some(1),
      "180" => Some(2),
      "270" => Some(3),
      other => {
        warn!("忽略不支持的旋转角度: {}", other);
        None
      }
    }
  }

  pub fn description(&self) -> String {
    let basic = self
      .items
      .iter()
      .map(PipelineItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    format!("{} ! appsink max-buffers=2 drop=true name=sink", basic)
  }

  pub fn build(self) -> Result<GStreamerInput, GStreamerInputError> {
    gst::init()?;

    let description = self.description();
    info!("GStreamer pipeline description: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerInput { pipeline, appsink })
  }
}

/// 运行中的管道，迭代产出 RGB 帧，管道结束时迭代结束
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
}

impl FromUrl for GStreamerInput {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    GStreamerInputPipelineBuilder::from_url(url)?.build()
  }
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

impl Iterator for GStreamerInput {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    let sample = self
      .appsink
      .pull_sample()
      .map_err(|e| error!("Failed to pull sample: {}", e))
      .ok()?;
    convert_sample(&sample)
      .map_err(|e| error!("Failed to fetch sample: {}", e))
      .ok()
  }
}

fn convert_sample(sample: &gst::Sample) -> Result<RgbImage, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;
  let bgr = match video_info.format() {
    gst_video::VideoFormat::Rgb => false,
    gst_video::VideoFormat::Bgr => true,
    _ => return Err(GStreamerInputError::UnsupportedFormat),
  };

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let stride = video_info.stride()[0] as usize;
  packed_rgb(
    map.as_slice(),
    video_info.width(),
    video_info.height(),
    stride,
    bgr,
  )
}

/// 去掉行尾填充，按需交换 B、R 通道
fn packed_rgb(
  data: &[u8],
  width: u32,
  height: u32,
  stride: usize,
  bgr: bool,
) -> Result<RgbImage, GStreamerInputError> {
  let row_len = width as usize * 3;
  let stride = stride.max(row_len);
  let expected = stride * (height as usize).saturating_sub(1) + row_len;
  if height == 0 || data.len() < expected {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  let mut pixels = Vec::with_capacity(row_len * height as usize);
  for row in data.chunks(stride).take(height as usize) {
    pixels.extend_from_slice(&row[..row_len]);
  }
  if bgr {
    for pixel in pixels.chunks_exact_mut(3) {
      pixel.swap(0, 2);
    }
  }

  RgbImage::from_raw(width, height, pixels).ok_or(GStreamerInputError::BufferSizeMismatch {
    expected,
    actual: data.len(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn builder(url: &str) -> GStreamerInputPipelineBuilder {
    GStreamerInputPipelineBuilder::from_url(&Url::parse(url).unwrap()).unwrap()
  }

  #[test]
  fn camera_pipeline_uses_query_parameters() {
    let description =
      builder("gst://camera/dev/video1?width=1280&height=720&fps=30&format=NV12&io-mode=4")
        .description();
    assert_eq!(
      description,
      "v4l2src device=/dev/video1 io-mode=4 ! video/x-raw,format=NV12,width=1280,height=720,framerate=30/1 \
       ! videoconvert ! video/x-raw,format=RGB ! appsink max-buffers=2 drop=true name=sink"
    );
  }

  #[test]
  fn file_pipeline_can_rotate() {
    let description = builder("gst://file/data/test.mp4?rotate=180").description();
    assert_eq!(
      description,
      "filesrc location=/data/test.mp4 ! decodebin ! videoflip method=2 \
       ! videoconvert ! video/x-raw,format=RGB ! appsink max-buffers=2 drop=true name=sink"
    );
  }

  #[test]
  fn unknown_source_is_rejected() {
    let url = Url::parse("gst://rtsp/live").unwrap();
    assert!(matches!(
      GStreamerInputPipelineBuilder::from_url(&url),
      Err(GStreamerInputError::SchemeMismatch)
    ));
  }

  #[test]
  fn row_padding_is_dropped_and_bgr_swapped() {
    // 2x2 BGR，每行填充 2 字节
    let data = [3, 2, 1, 6, 5, 4, 0, 0, 9, 8, 7, 12, 11, 10, 0, 0];
    let image = packed_rgb(&data, 2, 2, 8, true).unwrap();
    assert_eq!(
      image.as_raw().as_slice(),
      &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]
    );
  }

  #[test]
  fn short_buffer_is_rejected() {
    let data = [0u8; 10];
    assert!(matches!(
      packed_rgb(&data, 2, 2, 6, false),
      Err(GStreamerInputError::BufferSizeMismatch {
        expected: 12,
        actual: 10
      })
    ));
  }
}
