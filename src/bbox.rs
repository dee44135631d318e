// 该文件是 Anchor Decode （锚框解码） 项目的一部分。
// src/bbox.rs - 边界框定义与重建
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

use ndarray::{ArrayView1, s};

use crate::{
  activation::{CLASS_CHANNEL_OFFSET, OBJECTNESS_CHANNEL, sigmoid},
  config::{ClipPolicy, DecodeConfig},
};

/// 候选边界框，坐标为特征图像素坐标
///
/// 类别分数在抑制阶段会被逐项置零，因此这里不缓存 label / score，
/// 需要时在抑制结束后调用 [`finalize`]。
#[derive(Debug, Clone, PartialEq)]
pub struct BoundBox {
  pub xmin: f32,
  pub ymin: f32,
  pub xmax: f32,
  pub ymax: f32,
  /// sigmoid 后的 objectness
  pub confidence: f32,
  pub class_scores: Vec<f32>,
}

impl BoundBox {
  pub fn new(
    [xmin, ymin, xmax, ymax]: [f32; 4],
    confidence: f32,
    class_scores: Vec<f32>,
  ) -> Self {
    Self {
      xmin,
      ymin,
      xmax,
      ymax,
      confidence,
      class_scores,
    }
  }

  pub fn width(&self) -> f32 {
    self.xmax - self.xmin
  }

  pub fn height(&self) -> f32 {
    self.ymax - self.ymin
  }

  pub fn area(&self) -> f32 {
    self.width() * self.height()
  }

  /// 宽或高非正，或任一坐标非有限值
  pub fn is_degenerate(&self) -> bool {
    let finite = [self.xmin, self.ymin, self.xmax, self.ymax]
      .iter()
      .all(|v| v.is_finite());
    !(finite && self.width() > 0.0 && self.height() > 0.0)
  }

  pub fn max_class_score(&self) -> f32 {
    self.class_scores.iter().copied().fold(0.0, f32::max)
  }
}

/// 计算最终的 (label, score)，label 为第一个最大分数的下标
///
/// 必须在抑制完成后调用。
pub fn finalize(bbox: &BoundBox) -> (usize, f32) {
  bbox
    .class_scores
    .iter()
    .copied()
    .enumerate()
    .fold((0, f32::NEG_INFINITY), |(label, score), (idx, s)| {
      if s > score { (idx, s) } else { (label, score) }
    })
}

/// 解码输出
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub xmin: f32,
  pub ymin: f32,
  pub xmax: f32,
  pub ymax: f32,
  pub confidence: f32,
  pub label: usize,
  pub score: f32,
}

impl Detection {
  pub fn bbox(&self) -> [f32; 4] {
    [self.xmin, self.ymin, self.xmax, self.ymax]
  }
}

impl From<BoundBox> for Detection {
  fn from(bbox: BoundBox) -> Self {
    let (label, score) = finalize(&bbox);
    Detection {
      xmin: bbox.xmin,
      ymin: bbox.ymin,
      xmax: bbox.xmax,
      ymax: bbox.ymax,
      confidence: bbox.confidence,
      label,
      score,
    }
  }
}

/// 网格中的单个预测位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSlot {
  pub row: usize,
  pub col: usize,
  pub anchor: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reconstruction {
  /// 类别分数全为零
  Empty,
  /// 裁剪后宽或高非正，或坐标溢出为非有限值
  Degenerate { width: f32, height: f32 },
  Candidate(BoundBox),
}

/// 从一个已激活的预测向量重建像素坐标边界框
///
/// `grid` 为 (grid_h, grid_w)，`anchor` 为 (宽, 高)，单位为网格单元。
pub fn reconstruct(
  lane: ArrayView1<f32>,
  slot: GridSlot,
  grid: (usize, usize),
  anchor: (f32, f32),
  config: &DecodeConfig,
) -> Reconstruction {
  let classes = lane.slice(s![CLASS_CHANNEL_OFFSET..]);
  if !(classes.sum() > 0.0) {
    return Reconstruction::Empty;
  }

  let (grid_h, grid_w) = (grid.0 as f32, grid.1 as f32);
  let (anchor_w, anchor_h) = anchor;

  // 网格归一化的中心与尺寸
  let x = (slot.col as f32 + sigmoid(lane[0])) / grid_w;
  let y = (slot.row as f32 + sigmoid(lane[1])) / grid_h;
  let w = anchor_w * lane[2].exp() / grid_w;
  let h = anchor_h * lane[3].exp() / grid_h;

  let fm = config.feature_map();
  let (fm_h, fm_w) = (fm.height as f32, fm.width as f32);
  let snap = config.snap();
  let xmin_clip = match config.clip() {
    ClipPolicy::FeatureMap => fm_w,
    ClipPolicy::Legacy => fm_h,
  };

  let xmin = snap.apply((x - w / 2.0) * fm_w).min(xmin_clip);
  let ymin = snap.apply((y - h / 2.0) * fm_h).min(fm_h);
  let xmax = snap.apply((x + w / 2.0) * fm_w).min(fm_w);
  let ymax = snap.apply((y + h / 2.0) * fm_h).min(fm_h);

  let bbox = BoundBox::new(
    [xmin, ymin, xmax, ymax],
    lane[OBJECTNESS_CHANNEL],
    classes.to_vec(),
  );

  if bbox.is_degenerate() {
    return Reconstruction::Degenerate {
      width: bbox.width(),
      height: bbox.height(),
    };
  }

  Reconstruction::Candidate(bbox)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::PixelSnap;
  use approx::assert_abs_diff_eq;
  use ndarray::Array1;

  fn config(clip: ClipPolicy, snap: PixelSnap, fm: (usize, usize)) -> DecodeConfig {
    DecodeConfig::builder()
      .anchors(&[1.0, 1.0])
      .num_classes(2)
      .feature_map(fm.0, fm.1)
      .clip(clip)
      .snap(snap)
      .build()
      .unwrap()
  }

  fn lane(values: [f32; 7]) -> Array1<f32> {
    Array1::from(values.to_vec())
  }

  #[test]
  fn empty_class_vector_is_skipped() {
    let cfg = config(ClipPolicy::FeatureMap, PixelSnap::Round, (28, 28));
    let l = lane([0.0, 0.0, 0.0, 0.0, 0.9, 0.0, 0.0]);
    let slot = GridSlot { row: 0, col: 0, anchor: 0 };
    assert_eq!(
      reconstruct(l.view(), slot, (7, 7), (1.0, 1.0), &cfg),
      Reconstruction::Empty
    );
  }

  #[test]
  fn box_is_centered_on_cell() {
    // sigmoid(0) = 0.5，cell (3, 3) 的中心在 3.5 / 7 = 0.5
    let cfg = config(ClipPolicy::FeatureMap, PixelSnap::Round, (28, 28));
    let l = lane([0.0, 0.0, 0.0, 0.0, 0.9, 0.8, 0.0]);
    let slot = GridSlot { row: 3, col: 3, anchor: 0 };
    let Reconstruction::Candidate(bbox) = reconstruct(l.view(), slot, (7, 7), (2.0, 1.0), &cfg)
    else {
      panic!("expected a candidate");
    };
    // w = 2 / 7，像素宽度 = 8
    assert_abs_diff_eq!(bbox.xmin, 10.0);
    assert_abs_diff_eq!(bbox.xmax, 18.0);
    assert_abs_diff_eq!(bbox.ymin, 12.0);
    assert_abs_diff_eq!(bbox.ymax, 16.0);
    assert_abs_diff_eq!(bbox.confidence, 0.9);
    assert_eq!(bbox.class_scores, vec![0.8, 0.0]);
  }

  #[test]
  fn legacy_clip_bounds_xmin_by_height() {
    // 非方形特征图 (h=10, w=40)，框位于最右侧
    let l = lane([0.0, 0.0, 0.0, 0.0, 0.9, 0.8, 0.0]);
    let slot = GridSlot { row: 0, col: 3, anchor: 0 };

    let corrected = config(ClipPolicy::FeatureMap, PixelSnap::Round, (10, 40));
    let Reconstruction::Candidate(bbox) =
      reconstruct(l.view(), slot, (4, 4), (1.0, 1.0), &corrected)
    else {
      panic!("expected a candidate");
    };
    assert_abs_diff_eq!(bbox.xmin, 30.0);

    let legacy = config(ClipPolicy::Legacy, PixelSnap::Round, (10, 40));
    let Reconstruction::Candidate(bbox) = reconstruct(l.view(), slot, (4, 4), (1.0, 1.0), &legacy)
    else {
      panic!("expected a candidate");
    };
    assert_abs_diff_eq!(bbox.xmin, 10.0);
    assert_abs_diff_eq!(bbox.xmax, 40.0);
  }

  #[test]
  fn truncate_snap_rounds_toward_zero() {
    // x = 0.5，w = e^0.1 / 7 ≈ 0.1579，xmin ≈ 0.4211 * 28 ≈ 11.79
    let l = lane([0.0, 0.0, 0.1, 0.0, 0.9, 0.8, 0.0]);
    let slot = GridSlot { row: 3, col: 3, anchor: 0 };
    let round = config(ClipPolicy::FeatureMap, PixelSnap::Round, (28, 28));
    let trunc = config(ClipPolicy::FeatureMap, PixelSnap::Truncate, (28, 28));
    let Reconstruction::Candidate(a) = reconstruct(l.view(), slot, (7, 7), (1.0, 1.0), &round)
    else {
      panic!("expected a candidate");
    };
    let Reconstruction::Candidate(b) = reconstruct(l.view(), slot, (7, 7), (1.0, 1.0), &trunc)
    else {
      panic!("expected a candidate");
    };
    assert_abs_diff_eq!(a.xmin, 12.0);
    assert_abs_diff_eq!(b.xmin, 11.0);
  }

  #[test]
  fn collapsed_box_is_degenerate() {
    // 极小的锚框在取整后宽度为零
    let cfg = config(ClipPolicy::FeatureMap, PixelSnap::Round, (28, 28));
    let l = lane([0.0, 0.0, -10.0, 0.0, 0.9, 0.8, 0.0]);
    let slot = GridSlot { row: 0, col: 0, anchor: 0 };
    assert!(matches!(
      reconstruct(l.view(), slot, (7, 7), (1.0, 1.0), &cfg),
      Reconstruction::Degenerate { .. }
    ));
  }

  #[test]
  fn overflowing_extent_is_degenerate() {
    // exp(100) 溢出为 inf，xmin / ymin 变为 -inf
    let cfg = config(ClipPolicy::FeatureMap, PixelSnap::Round, (16, 16));
    let l = lane([0.0, 0.0, 100.0, 100.0, 0.9, 0.8, 0.0]);
    let slot = GridSlot { row: 0, col: 0, anchor: 0 };
    assert!(matches!(
      reconstruct(l.view(), slot, (1, 1), (1.0, 1.0), &cfg),
      Reconstruction::Degenerate { .. }
    ));
  }

  #[test]
  fn non_finite_coordinates_are_degenerate() {
    let open = BoundBox::new([f32::NEG_INFINITY, 0.0, 16.0, 16.0], 0.9, vec![0.8]);
    assert!(open.is_degenerate());
    let nan = BoundBox::new([0.0, f32::NAN, 16.0, 16.0], 0.9, vec![0.8]);
    assert!(nan.is_degenerate());
    let healthy = BoundBox::new([0.0, 0.0, 16.0, 16.0], 0.9, vec![0.8]);
    assert!(!healthy.is_degenerate());
  }

  #[test]
  fn finalize_picks_first_maximum() {
    let bbox = BoundBox::new([0.0, 0.0, 1.0, 1.0], 0.9, vec![0.2, 0.7, 0.7]);
    assert_eq!(finalize(&bbox), (1, 0.7));
    let det = Detection::from(bbox);
    assert_eq!(det.label, 1);
    assert_eq!(det.bbox(), [0.0, 0.0, 1.0, 1.0]);
  }
}
