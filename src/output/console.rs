// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/console.rs - 终端 Top-K 输出
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

use std::fmt::Write as _;
use std::io::Write;

use image::RgbImage;

use crate::{FromUrlWithScheme, classifier::HeadScores, output::Render};

/// 把每个输出头的 Top-K 打印到标准输出
pub struct ConsoleOutput;

impl FromUrlWithScheme for ConsoleOutput {
  const SCHEME: &'static str = "console";
}

impl crate::FromUrl for ConsoleOutput {
  type Error = std::io::Error;

  fn from_url(_url: &url::Url) -> Result<Self, Self::Error> {
    Ok(ConsoleOutput)
  }
}

pub fn format_heads(heads: &HeadScores) -> String {
  let mut text = String::new();
  for scores in heads {
    let _ = writeln!(text, " --- Top{} ---", scores.len());
    for score in scores {
      let _ = writeln!(text, "{:3}: {:8.6}", score.class, score.prob);
    }
  }
  text
}

impl Render<RgbImage, HeadScores> for ConsoleOutput {
  type Error = std::io::Error;

  fn render_result(&self, _frame: &RgbImage, result: &HeadScores) -> Result<(), Self::Error> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(format_heads(result).as_bytes())?;
    stdout.flush()
  }
}
