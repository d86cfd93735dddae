// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/draw.rs - 分类结果标注
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

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_text_mut;
use thiserror::Error;

use crate::classifier::HeadScores;

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 40.0;
const LABEL_LINE_HEIGHT: i32 = 48;
const LABEL_PROB_OFFSET_X: i32 = 228;
const LABEL_COLOR: [u8; 3] = [255, 0, 0]; // 红色

pub const DEFAULT_FONT_PATH: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf";
pub const DEFAULT_LABEL_ORIGIN: (i32, i32) = (32, 76);

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("读取字体失败: {0}")]
  IoError(#[from] std::io::Error),
  #[error("无效的字体文件: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

/// 一段待绘制的文本，坐标为左上角
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextItem {
  pub x: i32,
  pub y: i32,
  pub text: String,
}

/// 每个类别一行：左列类别编号，右列概率；多个输出头依次向下排列
pub fn layout_top_k(heads: &HeadScores, origin: (i32, i32)) -> Vec<TextItem> {
  let (x, y) = origin;
  heads
    .iter()
    .flatten()
    .enumerate()
    .flat_map(|(row, score)| {
      let line_y = y + row as i32 * LABEL_LINE_HEIGHT;
      [
        TextItem {
          x,
          y: line_y,
          text: score.class.to_string(),
        },
        TextItem {
          x: x + LABEL_PROB_OFFSET_X,
          y: line_y,
          text: format!("{:.6}", score.prob),
        },
      ]
    })
    .collect()
}

pub struct Draw {
  font: FontVec,
  font_size: f32,
  origin: (i32, i32),
  label_color: [u8; 3],
}

impl Draw {
  pub fn from_font_file<P: AsRef<Path>>(path: P) -> Result<Self, DrawError> {
    let font = FontVec::try_from_vec(std::fs::read(path)?)?;
    Ok(Self {
      font,
      font_size: LABEL_FONT_SIZE,
      origin: DEFAULT_LABEL_ORIGIN,
      label_color: LABEL_COLOR,
    })
  }

  pub fn with_origin(mut self, origin: (i32, i32)) -> Self {
    self.origin = origin;
    self
  }

  pub fn draw_top_k(&self, image: &mut RgbImage, heads: &HeadScores) {
    let scale = PxScale::from(self.font_size);
    for item in layout_top_k(heads, self.origin) {
      draw_text_mut(
        image,
        Rgb(self.label_color),
        item.x,
        item.y,
        scale,
        &self.font,
        &item.text,
      );
    }
  }
}
