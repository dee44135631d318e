// 该文件是 Anchor Decode （锚框解码） 项目的一部分。
// src/error.rs - 错误定义
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

use crate::config::ConfigError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
  #[error("张量形状不匹配: 期望 {expected}, 实际 {actual}")]
  ShapeMismatch { expected: String, actual: String },
  #[error("配置错误: {0}")]
  Configuration(#[from] ConfigError),
  #[error("退化边界框: 宽 {width}, 高 {height}")]
  DegenerateBox { width: f32, height: f32 },
}

impl DecodeError {
  pub fn shape(expected: impl Into<String>, actual: impl std::fmt::Debug) -> Self {
    DecodeError::ShapeMismatch {
      expected: expected.into(),
      actual: format!("{:?}", actual),
    }
  }
}

pub type Result<T, E = DecodeError> = std::result::Result<T, E>;
