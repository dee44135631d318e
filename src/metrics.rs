// 该文件是 Anchor Decode （锚框解码） 项目的一部分。
// src/metrics.rs - 解码统计
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

use std::sync::Mutex;

/// 单张图像的解码统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
  /// 图像在批次中的下标
  pub image: usize,
  /// 访问过的 (row, col, anchor) 数量
  pub slots: usize,
  /// 构建出的候选框数量
  pub candidates: usize,
  /// 因宽或高非正而丢弃的框
  pub degenerate: usize,
  /// 抑制阶段被置零的类别分数项
  pub suppressed: usize,
  /// 最终输出的框
  pub kept: usize,
}

/// 由调用方提供的统计接收端
///
/// 批量解码时可能在多个线程上被调用。
pub trait MetricsSink: Sync {
  fn observe(&self, stats: &DecodeStats);
}

/// 丢弃所有统计
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
  fn observe(&self, _stats: &DecodeStats) {}
}

impl<F: Fn(&DecodeStats) + Sync> MetricsSink for F {
  fn observe(&self, stats: &DecodeStats) {
    self(stats)
  }
}

/// 收集所有统计，按图像下标排序后返回
#[derive(Debug, Default)]
pub struct StatsCollector {
  records: Mutex<Vec<DecodeStats>>,
}

impl StatsCollector {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn into_records(self) -> Vec<DecodeStats> {
    let mut records = self
      .records
      .into_inner()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    records.sort_by_key(|s| s.image);
    records
  }
}

impl MetricsSink for StatsCollector {
  fn observe(&self, stats: &DecodeStats) {
    let mut records = self
      .records
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    records.push(*stats);
  }
}
