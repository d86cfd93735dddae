// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output.rs - 结果记录输出
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

use std::time::Duration;

use chrono::{DateTime, Local};
use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, classifier::HeadScores, fusion::FusionResult};

pub trait Render<Frame, Output>: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

mod console;
mod csv_record;
pub use self::console::ConsoleOutput;
pub use self::csv_record::CsvRecordOutput;

#[cfg(feature = "save_image_file")]
pub mod draw;

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[derive(Error, Debug)]
pub enum RecordError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("记录文件锁已损坏")]
  Poisoned,
}

/// 一次融合决策的持久化记录
#[derive(Debug, Clone, Copy)]
pub struct DecisionRecord {
  pub timestamp: DateTime<Local>,
  pub result: FusionResult,
  pub elapsed: Duration,
}

impl DecisionRecord {
  pub fn now(result: FusionResult, elapsed: Duration) -> Self {
    Self {
      timestamp: Local::now(),
      result,
      elapsed,
    }
  }
}

pub trait RecordSink: Send + Sync {
  fn record(&self, record: &DecisionRecord) -> Result<(), RecordError>;
}

pub enum OutputWrapper {
  CsvRecordOutput(CsvRecordOutput),
}

impl FromUrl for OutputWrapper {
  type Error = RecordError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      CsvRecordOutput::SCHEME => Ok(OutputWrapper::CsvRecordOutput(CsvRecordOutput::from_url(
        url,
      )?)),
      _ => Err(RecordError::SchemeMismatch),
    }
  }
}

impl RecordSink for OutputWrapper {
  fn record(&self, record: &DecisionRecord) -> Result<(), RecordError> {
    match self {
      OutputWrapper::CsvRecordOutput(output) => output.record(record),
    }
  }
}

#[derive(Error, Debug)]
pub enum FrameOutputError {
  #[error("控制台输出错误: {0}")]
  ConsoleError(#[from] std::io::Error),
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 连续分类的逐帧输出
pub enum FrameOutputWrapper {
  Console(ConsoleOutput),
  #[cfg(feature = "save_image_file")]
  SaveImageFileOutput(SaveImageFileOutput),
}

impl FromUrl for FrameOutputWrapper {
  type Error = FrameOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ConsoleOutput::SCHEME => Ok(FrameOutputWrapper::Console(ConsoleOutput)),
      #[cfg(feature = "save_image_file")]
      SaveImageFileOutput::SCHEME => Ok(FrameOutputWrapper::SaveImageFileOutput(
        SaveImageFileOutput::from_url(url)?,
      )),
      _ => Err(FrameOutputError::SchemeMismatch),
    }
  }
}

impl Render<image::RgbImage, HeadScores> for FrameOutputWrapper {
  type Error = FrameOutputError;

  fn render_result(
    &self,
    frame: &image::RgbImage,
    result: &HeadScores,
  ) -> Result<(), Self::Error> {
    match self {
      FrameOutputWrapper::Console(output) => output
        .render_result(frame, result)
        .map_err(FrameOutputError::from),
      #[cfg(feature = "save_image_file")]
      FrameOutputWrapper::SaveImageFileOutput(output) => output
        .render_result(frame, result)
        .map_err(FrameOutputError::from),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn frame_output_is_chosen_by_scheme() {
    let console = Url::parse("console://").unwrap();
    assert!(matches!(
      FrameOutputWrapper::from_url(&console),
      Ok(FrameOutputWrapper::Console(_))
    ));

    let unknown = Url::parse("rtsp://0.0.0.0:8554/live").unwrap();
    assert!(matches!(
      FrameOutputWrapper::from_url(&unknown),
      Err(FrameOutputError::SchemeMismatch)
    ));
  }
}
