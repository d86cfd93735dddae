// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/save_image_file.rs - 保存标注后的帧
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

use std::path::Path;

use image::RgbImage;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  classifier::HeadScores,
  output::{
    Render,
    draw::{DEFAULT_FONT_PATH, DEFAULT_LABEL_ORIGIN, Draw, DrawError},
  },
  url_file_path, url_query,
};

/// `image:///tmp/latest.jpg?font=/path/font.ttf&x=32&y=76`，每帧覆盖写入同一文件
pub struct SaveImageFileOutput {
  path: String,
  draw: Draw,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(image::ImageError),
  #[error("字体错误: {0}")]
  DrawError(#[from] DrawError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let font = url_query::<String>(uri, "font").unwrap_or_else(|| DEFAULT_FONT_PATH.to_string());
    let origin = (
      url_query(uri, "x").unwrap_or(DEFAULT_LABEL_ORIGIN.0),
      url_query(uri, "y").unwrap_or(DEFAULT_LABEL_ORIGIN.1),
    );

    Ok(SaveImageFileOutput {
      path: url_file_path(uri),
      draw: Draw::from_font_file(&font)?.with_origin(origin),
    })
  }
}

impl SaveImageFileOutput {
  fn save_image(&self, image: RgbImage) -> Result<(), SaveImageFileError> {
    if let Some(parent) = Path::new(&self.path).parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent).map_err(SaveImageFileError::IoError)?;
    }

    image
      .save(&self.path)
      .map_err(SaveImageFileError::ImageError)?;

    debug!("保存图像到文件: {}", self.path);

    Ok(())
  }
}

impl Render<RgbImage, HeadScores> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, frame: &RgbImage, result: &HeadScores) -> Result<(), Self::Error> {
    let mut image = frame.clone();
    self.draw.draw_top_k(&mut image, result);
    self.save_image(image)
  }
}
