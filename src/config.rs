// 该文件是 Anchor Decode （锚框解码） 项目的一部分。
// src/config.rs - 解码配置
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

use std::str::FromStr;

use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

pub const DEFAULT_OBJ_THRESHOLD: f32 = 0.3;
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
  #[error("锚框序列长度 {0} 不是偶数")]
  AnchorLength(usize),
  #[error("第 {index} 个锚框无效: ({width}, {height})")]
  InvalidAnchor { index: usize, width: f32, height: f32 },
  #[error("未配置锚框")]
  NoAnchors,
  #[error("{name} 阈值 {value} 不在 [0, 1] 范围内")]
  ThresholdOutOfRange { name: &'static str, value: f32 },
  #[error("类别数量必须大于 0")]
  NoClasses,
  #[error("特征图尺寸无效: {height}x{width}")]
  EmptyFeatureMap { height: usize, width: usize },
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("参数 {key} 无效: {value}")]
  InvalidParameter { key: String, value: String },
  #[error("缺少参数: {0}")]
  MissingParameter(&'static str),
}

impl ConfigError {
  fn invalid(key: &str, value: &str) -> Self {
    ConfigError::InvalidParameter {
      key: key.to_string(),
      value: value.to_string(),
    }
  }
}

/// 锚框集合，每个元素为 (宽, 高)，单位为网格单元
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorSet {
  pairs: Box<[(f32, f32)]>,
}

impl AnchorSet {
  /// 从扁平序列 `[w0, h0, w1, h1, ...]` 构建
  pub fn from_flat(values: &[f32]) -> Result<Self, ConfigError> {
    if values.is_empty() {
      return Err(ConfigError::NoAnchors);
    }
    if values.len() % 2 != 0 {
      return Err(ConfigError::AnchorLength(values.len()));
    }

    let pairs = values
      .chunks_exact(2)
      .enumerate()
      .map(|(index, pair)| {
        let (width, height) = (pair[0], pair[1]);
        if !(width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0) {
          return Err(ConfigError::InvalidAnchor {
            index,
            width,
            height,
          });
        }
        Ok((width, height))
      })
      .collect::<Result<Vec<_>, _>>()?;

    Ok(Self {
      pairs: pairs.into_boxed_slice(),
    })
  }

  pub fn len(&self) -> usize {
    self.pairs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.pairs.is_empty()
  }

  pub fn get(&self, index: usize) -> Option<(f32, f32)> {
    self.pairs.get(index).copied()
  }

  pub fn iter(&self) -> impl Iterator<Item = (f32, f32)> + '_ {
    self.pairs.iter().copied()
  }
}

impl FromStr for AnchorSet {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let values = s
      .split(',')
      .map(str::trim)
      .filter(|v| !v.is_empty())
      .map(|v| v.parse::<f32>().map_err(|_| ConfigError::invalid("anchors", v)))
      .collect::<Result<Vec<_>, _>>()?;
    AnchorSet::from_flat(&values)
  }
}

/// 特征图尺寸（像素）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureMapShape {
  pub height: usize,
  pub width: usize,
}

impl FeatureMapShape {
  pub fn new(height: usize, width: usize) -> Self {
    Self { height, width }
  }
}

impl FromStr for FeatureMapShape {
  type Err = ConfigError;

  /// 格式为 `HxW`，例如 `28x28`
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (h, w) = s
      .split_once(['x', 'X'])
      .ok_or_else(|| ConfigError::invalid("feature_map", s))?;
    let height = h
      .trim()
      .parse()
      .map_err(|_| ConfigError::invalid("feature_map", s))?;
    let width = w
      .trim()
      .parse()
      .map_err(|_| ConfigError::invalid("feature_map", s))?;
    Ok(Self { height, width })
  }
}

/// xmin 的上界裁剪方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClipPolicy {
  /// x 方向用特征图宽度裁剪，y 方向用高度裁剪
  #[default]
  FeatureMap,
  /// xmin 用特征图高度裁剪，其余坐标与 `FeatureMap` 相同
  Legacy,
}

impl FromStr for ClipPolicy {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "feature_map" | "feature-map" => Ok(ClipPolicy::FeatureMap),
      "legacy" => Ok(ClipPolicy::Legacy),
      _ => Err(ConfigError::invalid("clip", s)),
    }
  }
}

/// 归一化坐标到像素坐标的取整方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelSnap {
  /// 四舍五入
  #[default]
  Round,
  /// 向零截断
  Truncate,
}

impl PixelSnap {
  pub fn apply(self, value: f32) -> f32 {
    match self {
      PixelSnap::Round => value.round(),
      PixelSnap::Truncate => value.trunc(),
    }
  }
}

impl FromStr for PixelSnap {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "round" => Ok(PixelSnap::Round),
      "truncate" | "trunc" => Ok(PixelSnap::Truncate),
      _ => Err(ConfigError::invalid("snap", s)),
    }
  }
}

/// 已校验的解码配置
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeConfig {
  anchors: AnchorSet,
  num_classes: usize,
  feature_map: FeatureMapShape,
  obj_threshold: f32,
  nms_threshold: f32,
  clip: ClipPolicy,
  snap: PixelSnap,
}

impl DecodeConfig {
  pub fn builder() -> DecodeConfigBuilder {
    DecodeConfigBuilder::default()
  }

  pub fn anchors(&self) -> &AnchorSet {
    &self.anchors
  }

  pub fn num_anchors(&self) -> usize {
    self.anchors.len()
  }

  pub fn num_classes(&self) -> usize {
    self.num_classes
  }

  /// 每个锚框的通道数：tx, ty, tw, th, objectness 加上类别
  pub fn num_channels(&self) -> usize {
    5 + self.num_classes
  }

  pub fn feature_map(&self) -> FeatureMapShape {
    self.feature_map
  }

  pub fn obj_threshold(&self) -> f32 {
    self.obj_threshold
  }

  pub fn nms_threshold(&self) -> f32 {
    self.nms_threshold
  }

  pub fn clip(&self) -> ClipPolicy {
    self.clip
  }

  pub fn snap(&self) -> PixelSnap {
    self.snap
  }
}

#[derive(Debug, Clone)]
pub struct DecodeConfigBuilder {
  anchors: Vec<f32>,
  num_classes: usize,
  feature_map: Option<FeatureMapShape>,
  obj_threshold: f32,
  nms_threshold: f32,
  clip: ClipPolicy,
  snap: PixelSnap,
}

impl Default for DecodeConfigBuilder {
  fn default() -> Self {
    Self {
      anchors: Vec::new(),
      num_classes: 0,
      feature_map: None,
      obj_threshold: DEFAULT_OBJ_THRESHOLD,
      nms_threshold: DEFAULT_NMS_THRESHOLD,
      clip: ClipPolicy::default(),
      snap: PixelSnap::default(),
    }
  }
}

const ANCHOR_SCHEME: &str = "anchor";

impl FromUrl for DecodeConfigBuilder {
  type Error = ConfigError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ConfigError::SchemeMismatch(url.scheme().to_string()));
    }

    let mut builder = DecodeConfigBuilder::default();
    let mut has_anchors = false;
    let mut has_classes = false;
    let mut has_feature_map = false;

    for (key, value) in url.query_pairs() {
      debug!("解码配置参数: {} = {}", key, value);
      match key.as_ref() {
        "anchors" => {
          let anchors: AnchorSet = value.parse()?;
          builder.anchors = anchors.iter().flat_map(|(w, h)| [w, h]).collect();
          has_anchors = true;
        }
        "classes" => {
          builder.num_classes = value
            .parse()
            .map_err(|_| ConfigError::invalid("classes", &value))?;
          has_classes = true;
        }
        "feature_map" | "fm" => {
          builder.feature_map = Some(value.parse()?);
          has_feature_map = true;
        }
        "obj" => {
          builder.obj_threshold = value
            .parse()
            .map_err(|_| ConfigError::invalid("obj", &value))?;
        }
        "nms" => {
          builder.nms_threshold = value
            .parse()
            .map_err(|_| ConfigError::invalid("nms", &value))?;
        }
        "clip" => builder.clip = value.parse()?,
        "snap" => builder.snap = value.parse()?,
        _ => return Err(ConfigError::invalid(&key, &value)),
      }
    }

    if !has_anchors {
      return Err(ConfigError::MissingParameter("anchors"));
    }
    if !has_classes {
      return Err(ConfigError::MissingParameter("classes"));
    }
    if !has_feature_map {
      return Err(ConfigError::MissingParameter("feature_map"));
    }

    Ok(builder)
  }
}

impl FromUrlWithScheme for DecodeConfigBuilder {
  const SCHEME: &'static str = ANCHOR_SCHEME;
}

impl DecodeConfigBuilder {
  pub fn anchors(mut self, anchors: &[f32]) -> Self {
    self.anchors = anchors.to_vec();
    self
  }

  pub fn num_classes(mut self, num_classes: usize) -> Self {
    self.num_classes = num_classes;
    self
  }

  pub fn feature_map(mut self, height: usize, width: usize) -> Self {
    self.feature_map = Some(FeatureMapShape::new(height, width));
    self
  }

  pub fn obj_threshold(mut self, threshold: f32) -> Self {
    self.obj_threshold = threshold;
    self
  }

  pub fn nms_threshold(mut self, threshold: f32) -> Self {
    self.nms_threshold = threshold;
    self
  }

  pub fn clip(mut self, clip: ClipPolicy) -> Self {
    self.clip = clip;
    self
  }

  pub fn snap(mut self, snap: PixelSnap) -> Self {
    self.snap = snap;
    self
  }

  pub fn build(self) -> Result<DecodeConfig, ConfigError> {
    let anchors = AnchorSet::from_flat(&self.anchors)?;

    if self.num_classes == 0 {
      return Err(ConfigError::NoClasses);
    }

    let feature_map = self
      .feature_map
      .ok_or(ConfigError::MissingParameter("feature_map"))?;
    if feature_map.height == 0 || feature_map.width == 0 {
      return Err(ConfigError::EmptyFeatureMap {
        height: feature_map.height,
        width: feature_map.width,
      });
    }

    check_threshold("obj", self.obj_threshold)?;
    check_threshold("nms", self.nms_threshold)?;

    Ok(DecodeConfig {
      anchors,
      num_classes: self.num_classes,
      feature_map,
      obj_threshold: self.obj_threshold,
      nms_threshold: self.nms_threshold,
      clip: self.clip,
      snap: self.snap,
    })
  }
}

fn check_threshold(name: &'static str, value: f32) -> Result<(), ConfigError> {
  // NaN 也会落入此分支
  if !(0.0..=1.0).contains(&value) {
    return Err(ConfigError::ThresholdOutOfRange { name, value });
  }
  Ok(())
}
