// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/topk.rs - Top-K 提取
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

use thiserror::Error;

/// 单次提取允许的最大 K 值
pub const MAX_TOP_NUM: usize = 20;

/// 未分配槽位的类别索引
pub const UNASSIGNED_CLASS: u32 = u32::MAX;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TopKError {
  #[error("K 值 {0} 超过上限 {max}", max = MAX_TOP_NUM)]
  TooMany(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TopKEntry {
  pub class_index: u32,
  pub probability: f32,
}

impl TopKEntry {
  pub fn is_assigned(&self) -> bool {
    self.class_index != UNASSIGNED_CLASS
  }
}

/// 按概率降序排列的 K 个条目，类别索引互不重复
#[derive(Debug, Clone, PartialEq)]
pub struct TopKResult {
  entries: Box<[TopKEntry]>,
}

impl TopKResult {
  pub fn entries(&self) -> &[TopKEntry] {
    &self.entries
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn assigned(&self) -> impl Iterator<Item = &TopKEntry> {
    self.entries.iter().filter(|e| e.is_assigned())
  }
}

/// 逐槽全量扫描选出概率最高的 K 个类别
///
/// 每个槽位扫描整个向量，跳过已选索引，只接受严格大于当前值的元素，
/// 因此并列时索引较小者胜出。概率不大于 0 的元素不会被选中，
/// 对应槽位保持概率 0 与 [`UNASSIGNED_CLASS`]。
pub fn top_k(probs: &[f32], k: usize) -> Result<TopKResult, TopKError> {
  if k > MAX_TOP_NUM {
    return Err(TopKError::TooMany(k));
  }

  let mut entries = vec![
    TopKEntry {
      class_index: UNASSIGNED_CLASS,
      probability: 0.0,
    };
    k
  ];
  let mut selected: Vec<usize> = Vec::with_capacity(k);

  for slot in entries.iter_mut() {
    let mut best: Option<usize> = None;
    for (i, &p) in probs.iter().enumerate() {
      if selected.contains(&i) {
        continue;
      }
      if p > slot.probability {
        slot.probability = p;
        best = Some(i);
      }
    }
    if let Some(i) = best {
      slot.class_index = i as u32;
      selected.push(i);
    }
  }

  Ok(TopKResult {
    entries: entries.into_boxed_slice(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn picks_highest_in_descending_order() {
    let probs = [0.05, 0.4, 0.1, 0.3, 0.15];
    let result = top_k(&probs, 3).unwrap();
    let classes: Vec<u32> = result.entries().iter().map(|e| e.class_index).collect();
    assert_eq!(classes, vec![1, 3, 4]);
    assert_eq!(result.entries()[0].probability, 0.4);
  }

  #[test]
  fn ties_go_to_first_index() {
    let probs = [0.2, 0.3, 0.3, 0.2];
    let result = top_k(&probs, 4).unwrap();
    let classes: Vec<u32> = result.entries().iter().map(|e| e.class_index).collect();
    assert_eq!(classes, vec![1, 2, 0, 3]);
  }

  #[test]
  fn k_above_limit_is_an_error() {
    assert_eq!(top_k(&[0.5; 30], 21), Err(TopKError::TooMany(21)));
    assert_eq!(top_k(&[0.5; 30], MAX_TOP_NUM).unwrap().len(), MAX_TOP_NUM);
  }

  #[test]
  fn short_vectors_leave_unassigned_slots() {
    let result = top_k(&[0.7, 0.0, 0.3], 5).unwrap();
    assert_eq!(result.len(), 5);
    assert_eq!(result.assigned().count(), 2);
    for entry in &result.entries()[2..] {
      assert_eq!(entry.class_index, UNASSIGNED_CLASS);
      assert_eq!(entry.probability, 0.0);
    }
  }

  #[test]
  fn results_are_non_increasing_without_duplicates() {
    // 伪随机向量，覆盖多种长度和 K
    let mut seed = 0x2545_f491_u32;
    for n in [1usize, 5, 17, 100, 1001] {
      let probs: Vec<f32> = (0..n)
        .map(|_| {
          seed ^= seed << 13;
          seed ^= seed >> 17;
          seed ^= seed << 5;
          (seed % 1000) as f32 / 1000.0
        })
        .collect();
      let k = n.min(MAX_TOP_NUM);
      let result = top_k(&probs, k).unwrap();
      assert_eq!(result.len(), k);

      let entries = result.entries();
      for pair in entries.windows(2) {
        assert!(pair[0].probability >= pair[1].probability);
      }
      let mut seen: Vec<u32> = result.assigned().map(|e| e.class_index).collect();
      let before = seen.len();
      seen.sort_unstable();
      seen.dedup();
      assert_eq!(seen.len(), before);
    }
  }
}
