// 该文件是 Anchor Decode （锚框解码） 项目的一部分。
// src/nms.rs - 按类别的非极大值抑制
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

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::{debug, error};

use crate::{
  bbox::BoundBox,
  error::{DecodeError, Result},
  iou::{ensure_non_degenerate, iou_unchecked},
};

/// 对单个类别执行贪心 NMS，返回抑制后的分数列与被置零的数量
///
/// 只读取几何信息和第 `class` 列，因此不同类别可以并发执行。
fn suppress_column(boxes: &[BoundBox], class: usize, nms_threshold: f32) -> (Vec<f32>, usize) {
  let mut scores: Vec<f32> = boxes.iter().map(|b| b.class_scores[class]).collect();

  // 稳定排序，同分时保持构建顺序
  let mut order: Vec<usize> = (0..boxes.len()).collect();
  order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

  let mut suppressed = 0;
  for (i, &idx_i) in order.iter().enumerate() {
    if !(scores[idx_i] > 0.0) {
      continue;
    }

    for &idx_j in &order[(i + 1)..] {
      if iou_unchecked(&boxes[idx_i], &boxes[idx_j]) >= nms_threshold {
        if scores[idx_j] != 0.0 {
          suppressed += 1;
        }
        scores[idx_j] = 0.0;
      }
    }
  }

  (scores, suppressed)
}

/// 按类别独立执行非极大值抑制
///
/// 对每个类别 c，按 `class_scores[c]` 降序遍历候选框，将与更高分框
/// IoU 不小于 `nms_threshold` 的框在第 c 项上置零。其它类别的分数不受影响。
/// 返回被置零的分数项总数。
pub fn suppress(boxes: &mut [BoundBox], nms_threshold: f32) -> Result<usize> {
  let Some(first) = boxes.first() else {
    return Ok(0);
  };
  let num_classes = first.class_scores.len();

  for bbox in boxes.iter() {
    if bbox.class_scores.len() != num_classes {
      error!(
        "类别分数长度不一致: 期望 {}, 实际 {}",
        num_classes,
        bbox.class_scores.len()
      );
      return Err(DecodeError::shape(
        format!("{} 个类别分数", num_classes),
        bbox.class_scores.len(),
      ));
    }
    ensure_non_degenerate(bbox)?;
  }

  let columns: Vec<(Vec<f32>, usize)> = {
    let boxes: &[BoundBox] = boxes;

    #[cfg(feature = "parallel")]
    let classes = (0..num_classes).into_par_iter();
    #[cfg(not(feature = "parallel"))]
    let classes = 0..num_classes;

    classes
      .map(|class| suppress_column(boxes, class, nms_threshold))
      .collect()
  };

  let mut total = 0;
  for (class, (scores, suppressed)) in columns.into_iter().enumerate() {
    for (bbox, score) in boxes.iter_mut().zip(scores) {
      bbox.class_scores[class] = score;
    }
    if suppressed > 0 {
      debug!("类别 {}: 抑制 {} 个候选框", class, suppressed);
    }
    total += suppressed;
  }

  Ok(total)
}
