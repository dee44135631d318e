// 该文件是 Anchor Decode （锚框解码） 项目的一部分。
// src/activation.rs - 激活解码
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

use ndarray::{ArrayViewMut1, ArrayViewMut4, Axis, Zip, s};
use tracing::error;

use crate::error::{DecodeError, Result};

/// objectness 通道索引
pub const OBJECTNESS_CHANNEL: usize = 4;
/// 第一个类别通道索引
pub const CLASS_CHANNEL_OFFSET: usize = 5;
/// softmax 稳定化下限，低于该值时整体缩放
pub const SOFTMAX_FLOOR: f32 = -100.0;

pub fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

/// 数值稳定的 softmax，原地计算
pub fn softmax_in_place(mut logits: ArrayViewMut1<f32>) {
  if logits.is_empty() {
    return;
  }

  let max = logits.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
  logits.mapv_inplace(|v| v - max);

  let min = logits.fold(f32::INFINITY, |acc, &v| acc.min(v));
  if min < SOFTMAX_FLOOR {
    let scale = SOFTMAX_FLOOR / min;
    logits.mapv_inplace(|v| v * scale);
  }

  logits.mapv_inplace(f32::exp);
  let sum = logits.sum();
  logits.mapv_inplace(|v| v / sum);
}

/// 对单个 (row, col, anchor) 向量做激活
fn activate_lane(mut lane: ArrayViewMut1<f32>, obj_threshold: f32) {
  let objectness = sigmoid(lane[OBJECTNESS_CHANNEL]);
  lane[OBJECTNESS_CHANNEL] = objectness;

  let mut classes = lane.slice_mut(s![CLASS_CHANNEL_OFFSET..]);
  softmax_in_place(classes.view_mut());
  classes.mapv_inplace(|p| {
    let score = objectness * p;
    if score < obj_threshold { 0.0 } else { score }
  });
}

/// 原地激活整个预测张量 `[grid_h, grid_w, anchors, 5 + classes]`
///
/// objectness 通道替换为 sigmoid 值，类别通道替换为
/// `objectness * softmax(logits)`，并将低于 `obj_threshold` 的分数置零（不重新归一化）。
pub fn activate(
  mut tensor: ArrayViewMut4<f32>,
  num_classes: usize,
  obj_threshold: f32,
) -> Result<()> {
  let channels = tensor.len_of(Axis(3));
  if channels != CLASS_CHANNEL_OFFSET + num_classes {
    error!(
      "通道数不匹配: 期望 {}, 实际 {}",
      CLASS_CHANNEL_OFFSET + num_classes,
      channels
    );
    return Err(DecodeError::shape(
      format!("{} 个通道", CLASS_CHANNEL_OFFSET + num_classes),
      tensor.shape(),
    ));
  }

  let lanes = Zip::from(tensor.lanes_mut(Axis(3)));

  #[cfg(feature = "parallel")]
  lanes.par_for_each(|lane| activate_lane(lane, obj_threshold));
  #[cfg(not(feature = "parallel"))]
  lanes.for_each(|lane| activate_lane(lane, obj_threshold));

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_abs_diff_eq;
  use ndarray::{Array1, Array4, array};

  #[test]
  fn sigmoid_is_centered() {
    assert_abs_diff_eq!(sigmoid(0.0), 0.5);
    assert!(sigmoid(20.0) > 0.999);
    assert!(sigmoid(-20.0) < 0.001);
  }

  #[test]
  fn softmax_sums_to_one() {
    let mut logits = array![1.0f32, 2.0, 3.0];
    softmax_in_place(logits.view_mut());
    assert_abs_diff_eq!(logits.sum(), 1.0, epsilon = 1e-6);
    assert!(logits[2] > logits[1] && logits[1] > logits[0]);
  }

  #[test]
  fn softmax_rescales_below_floor() {
    // 最小值 -1000 低于下限，整体乘以 0.1
    let mut logits = array![0.0f32, -50.0, -1000.0];
    softmax_in_place(logits.view_mut());
    let e5 = (-5.0f32).exp();
    assert_abs_diff_eq!(logits[1], e5 / (1.0 + e5), epsilon = 1e-6);
    assert_abs_diff_eq!(logits.sum(), 1.0, epsilon = 1e-6);
  }

  #[test]
  fn softmax_of_single_logit_is_one() {
    let mut logits = Array1::from_elem(1, -42.0f32);
    softmax_in_place(logits.view_mut());
    assert_abs_diff_eq!(logits[0], 1.0);
  }

  #[test]
  fn activation_applies_sigmoid_softmax_and_threshold() {
    let mut tensor = Array4::<f32>::zeros((1, 1, 1, 7));
    tensor[[0, 0, 0, 4]] = 10.0;
    tensor[[0, 0, 0, 5]] = 5.0;
    tensor[[0, 0, 0, 6]] = 0.0;
    activate(tensor.view_mut(), 2, 0.3).unwrap();

    let objectness = sigmoid(10.0);
    assert_abs_diff_eq!(tensor[[0, 0, 0, 4]], objectness);
    let expected = objectness / (1.0 + (-5.0f32).exp());
    assert_abs_diff_eq!(tensor[[0, 0, 0, 5]], expected, epsilon = 1e-6);
    assert_eq!(tensor[[0, 0, 0, 6]], 0.0);
  }

  #[test]
  fn activated_scores_are_in_unit_range_and_thresholded() {
    let mut tensor = Array4::<f32>::from_shape_fn((3, 4, 2, 9), |(r, c, a, ch)| {
      ((r * 31 + c * 17 + a * 7 + ch * 3) % 23) as f32 - 11.0
    });
    activate(tensor.view_mut(), 4, 0.3).unwrap();

    for lane in tensor.lanes(Axis(3)) {
      for &score in lane.slice(s![CLASS_CHANNEL_OFFSET..]).iter() {
        assert!((0.0..=1.0).contains(&score));
        assert!(score == 0.0 || score >= 0.3);
      }
    }
  }

  #[test]
  fn wrong_channel_count_is_a_shape_mismatch() {
    let mut tensor = Array4::<f32>::zeros((1, 1, 1, 6));
    let err = activate(tensor.view_mut(), 2, 0.3).unwrap_err();
    assert!(matches!(err, DecodeError::ShapeMismatch { .. }));
  }
}
