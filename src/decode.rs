// 该文件是 Anchor Decode （锚框解码） 项目的一部分。
// src/decode.rs - 解码流水线
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

use ndarray::{Array4, Array5, ArrayD, ArrayView4, ArrayViewMut4, Axis, Ix4, Ix5, s};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::{debug, error, info};

use crate::{
  activation::activate,
  bbox::{BoundBox, Detection, GridSlot, Reconstruction, reconstruct},
  config::{DecodeConfig, FeatureMapShape},
  error::{DecodeError, Result},
  metrics::{DecodeStats, MetricsSink, NoopSink},
  nms::suppress,
};

/// 锚框 YOLO 输出解码器
///
/// 输入张量形状为 `[grid_h, grid_w, anchors, 5 + classes]`，
/// 批量输入在最前面多一个 batch 维度。
#[derive(Debug, Clone)]
pub struct Decoder {
  config: DecodeConfig,
}

impl Decoder {
  pub fn new(config: DecodeConfig) -> Self {
    info!(
      "创建解码器: {} 个锚框, {} 个类别, 特征图 {}x{}, obj={}, nms={}",
      config.num_anchors(),
      config.num_classes(),
      config.feature_map().height,
      config.feature_map().width,
      config.obj_threshold(),
      config.nms_threshold()
    );
    Self { config }
  }

  pub fn config(&self) -> &DecodeConfig {
    &self.config
  }

  fn check_shape(&self, shape: &[usize]) -> Result<()> {
    let (anchors, channels) = (self.config.num_anchors(), self.config.num_channels());
    if shape.len() != 4 || shape[2] != anchors || shape[3] != channels {
      error!(
        "张量形状不匹配: 期望 [grid_h, grid_w, {}, {}], 实际 {:?}",
        anchors, channels, shape
      );
      return Err(DecodeError::shape(
        format!("[grid_h, grid_w, {}, {}]", anchors, channels),
        shape,
      ));
    }
    Ok(())
  }

  /// 解码单张图像，张量在激活阶段被原地修改
  pub fn decode(&self, raw: Array4<f32>) -> Result<Vec<Detection>> {
    self.decode_with_sink(raw, &NoopSink)
  }

  pub fn decode_with_sink(
    &self,
    mut raw: Array4<f32>,
    sink: &dyn MetricsSink,
  ) -> Result<Vec<Detection>> {
    self.decode_image(0, raw.view_mut(), sink)
  }

  /// 解码借用的张量，内部会复制一份
  pub fn decode_view(&self, raw: ArrayView4<f32>) -> Result<Vec<Detection>> {
    self.check_shape(raw.shape())?;
    self.decode(raw.to_owned())
  }

  /// 批量解码，每张图像独立处理，结果按批次顺序返回
  pub fn decode_batch(&self, raw: Array5<f32>) -> Result<Vec<Vec<Detection>>> {
    self.decode_batch_with_sink(raw, &NoopSink)
  }

  /// 每张图像的激活在批次张量的对应子视图上原地进行
  pub fn decode_batch_with_sink(
    &self,
    mut raw: Array5<f32>,
    sink: &dyn MetricsSink,
  ) -> Result<Vec<Vec<Detection>>> {
    self.check_shape(&raw.shape()[1..])?;
    debug!("批量解码 {} 张图像", raw.len_of(Axis(0)));

    #[cfg(feature = "parallel")]
    let images = raw.axis_iter_mut(Axis(0)).into_par_iter();
    #[cfg(not(feature = "parallel"))]
    let images = raw.axis_iter_mut(Axis(0));

    images
      .enumerate()
      .map(|(index, image)| self.decode_image(index, image, sink))
      .collect()
  }

  /// 按秩分派：4 维视为单张图像，5 维视为批次
  pub fn decode_dyn(&self, raw: ArrayD<f32>) -> Result<Vec<Vec<Detection>>> {
    self.decode_dyn_with_sink(raw, &NoopSink)
  }

  pub fn decode_dyn_with_sink(
    &self,
    raw: ArrayD<f32>,
    sink: &dyn MetricsSink,
  ) -> Result<Vec<Vec<Detection>>> {
    match raw.ndim() {
      4 => {
        let shape = raw.shape().to_vec();
        let image = raw
          .into_dimensionality::<Ix4>()
          .map_err(|_| DecodeError::shape("4 维张量", &shape))?;
        Ok(vec![self.decode_with_sink(image, sink)?])
      }
      5 => {
        let shape = raw.shape().to_vec();
        let batch = raw
          .into_dimensionality::<Ix5>()
          .map_err(|_| DecodeError::shape("5 维张量", &shape))?;
        self.decode_batch_with_sink(batch, sink)
      }
      rank => {
        error!("不支持的张量秩: {}", rank);
        Err(DecodeError::shape("4 维或 5 维张量", raw.shape()))
      }
    }
  }

  fn decode_image(
    &self,
    index: usize,
    mut raw: ArrayViewMut4<f32>,
    sink: &dyn MetricsSink,
  ) -> Result<Vec<Detection>> {
    self.check_shape(raw.shape())?;
    let mut stats = DecodeStats {
      image: index,
      ..Default::default()
    };

    activate(
      raw.view_mut(),
      self.config.num_classes(),
      self.config.obj_threshold(),
    )?;

    let mut boxes = self.build_candidates(raw.view(), &mut stats);
    stats.candidates = boxes.len();

    stats.suppressed = suppress(&mut boxes, self.config.nms_threshold())?;

    let obj_threshold = self.config.obj_threshold();
    let detections: Vec<Detection> = boxes
      .into_iter()
      .filter(|bbox| bbox.max_class_score() > obj_threshold)
      .map(Detection::from)
      .collect();
    stats.kept = detections.len();

    debug!(
      "图像 {}: 候选 {}, 退化 {}, 抑制 {}, 保留 {}",
      index, stats.candidates, stats.degenerate, stats.suppressed, stats.kept
    );
    sink.observe(&stats);

    Ok(detections)
  }

  /// 按 (row, col, anchor) 顺序构建候选框
  fn build_candidates(&self, activated: ArrayView4<f32>, stats: &mut DecodeStats) -> Vec<BoundBox> {
    let (grid_h, grid_w, num_anchors, _) = activated.dim();
    let mut boxes = Vec::new();

    for row in 0..grid_h {
      for col in 0..grid_w {
        for (anchor, dims) in self.config.anchors().iter().enumerate().take(num_anchors) {
          stats.slots += 1;
          let slot = GridSlot { row, col, anchor };
          let lane = activated.slice(s![row, col, anchor, ..]);
          match reconstruct(lane, slot, (grid_h, grid_w), dims, &self.config) {
            Reconstruction::Empty => {}
            Reconstruction::Degenerate { width, height } => {
              debug!(
                "丢弃退化边界框 ({}, {}, {}): 宽 {}, 高 {}",
                row, col, anchor, width, height
              );
              stats.degenerate += 1;
            }
            Reconstruction::Candidate(bbox) => boxes.push(bbox),
          }
        }
      }
    }

    boxes
  }
}

/// 一次性解码单张图像
pub fn decode(
  raw: Array4<f32>,
  anchors: &[f32],
  num_classes: usize,
  feature_map: FeatureMapShape,
  obj_threshold: f32,
  nms_threshold: f32,
) -> Result<Vec<Detection>> {
  let config = DecodeConfig::builder()
    .anchors(anchors)
    .num_classes(num_classes)
    .feature_map(feature_map.height, feature_map.width)
    .obj_threshold(obj_threshold)
    .nms_threshold(nms_threshold)
    .build()?;
  Decoder::new(config).decode(raw)
}
