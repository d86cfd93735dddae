// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/softmax.rs - 分数归一化
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

/// 原地 softmax，先减去最大值防止 exp 溢出；空切片不做处理
pub fn softmax(logits: &mut [f32]) {
  let Some(max) = logits.iter().copied().reduce(f32::max) else {
    return;
  };

  let mut sum = 0.0f32;
  for v in logits.iter_mut() {
    *v = (*v - max).exp();
    sum += *v;
  }
  for v in logits.iter_mut() {
    *v /= sum;
  }
}

/// 最大值及其索引，并列时取第一个
pub fn argmax(values: &[f32]) -> Option<(usize, f32)> {
  let mut best: Option<(usize, f32)> = None;
  for (i, &v) in values.iter().enumerate() {
    match best {
      Some((_, b)) if v <= b => {}
      _ => best = Some((i, v)),
    }
  }
  best
}

#[cfg(test)]
mod tests {
  use super::*;

  fn assert_distribution(values: &[f32]) {
    let sum: f32 = values.iter().sum();
    assert!((sum - 1.0).abs() < 1e-5, "sum = {}", sum);
    assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
  }

  #[test]
  fn normalizes_small_logits() {
    let mut logits = [1.0, 2.0, 3.0];
    softmax(&mut logits);
    assert_distribution(&logits);
    assert!(logits[2] > logits[1] && logits[1] > logits[0]);
    assert!((logits[2] - 0.665_241).abs() < 1e-5);
  }

  #[test]
  fn survives_huge_magnitudes() {
    let mut logits = [1000.0, 999.0, -1000.0, 88.8];
    softmax(&mut logits);
    assert_distribution(&logits);
    assert!((logits[0] - 0.731_058_6).abs() < 1e-5);

    let mut negative = [-5000.0, -5001.0];
    softmax(&mut negative);
    assert_distribution(&negative);
  }

  #[test]
  fn uniform_and_single_inputs() {
    let mut single = [42.0];
    softmax(&mut single);
    assert_eq!(single, [1.0]);

    let mut uniform = [3.0; 4];
    softmax(&mut uniform);
    assert!(uniform.iter().all(|v| (v - 0.25).abs() < 1e-6));

    let mut empty: [f32; 0] = [];
    softmax(&mut empty);
  }

  #[test]
  fn argmax_prefers_first_on_ties() {
    assert_eq!(argmax(&[0.1, 0.7, 0.7, 0.2]), Some((1, 0.7)));
    assert_eq!(argmax(&[-3.0, -1.0]), Some((1, -1.0)));
    assert_eq!(argmax(&[]), None);
  }
}
