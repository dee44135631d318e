// 该文件是 Anchor Decode （锚框解码） 项目的一部分。
// src/iou.rs - 交并比计算
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

use crate::{
  bbox::BoundBox,
  error::{DecodeError, Result},
};

/// 一维区间 [a1, a2] 与 [b1, b2] 的重叠长度
///
/// 按起点分支判断，而不是 `max(0, min - max)`，
/// 以保持边界相接时的行为。
pub fn interval_overlap(a1: f32, a2: f32, b1: f32, b2: f32) -> f32 {
  if b1 < a1 {
    if b2 < a1 { 0.0 } else { a2.min(b2) - a1 }
  } else if a2 < b1 {
    0.0
  } else {
    a2.min(b2) - b1
  }
}

/// 调用方需保证两个框宽高均为正
pub(crate) fn iou_unchecked(a: &BoundBox, b: &BoundBox) -> f32 {
  let overlap_w = interval_overlap(a.xmin, a.xmax, b.xmin, b.xmax);
  let overlap_h = interval_overlap(a.ymin, a.ymax, b.ymin, b.ymax);
  let intersection = overlap_w * overlap_h;
  let union = a.area() + b.area() - intersection;
  intersection / union
}

pub(crate) fn ensure_non_degenerate(bbox: &BoundBox) -> Result<()> {
  if bbox.is_degenerate() {
    return Err(DecodeError::DegenerateBox {
      width: bbox.width(),
      height: bbox.height(),
    });
  }
  Ok(())
}

/// 两个轴对齐框的交并比
pub fn iou(a: &BoundBox, b: &BoundBox) -> Result<f32> {
  ensure_non_degenerate(a)?;
  ensure_non_degenerate(b)?;
  Ok(iou_unchecked(a, b))
}
