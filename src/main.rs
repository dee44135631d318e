// 该文件是 Anchor Decode （锚框解码） 项目的一部分。
// src/main.rs - 解码基准程序
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

mod args;

use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use ndarray::Array5;
use tracing::{info, warn};

use anchor_decode::{DecodeConfigBuilder, Decoder, Detection, FromUrl, StatsCollector};

/// 构造确定性的合成网络输出，便于复现
fn synthetic_output(
  batch: usize,
  grid: (usize, usize),
  anchors: usize,
  channels: usize,
) -> Array5<f32> {
  Array5::from_shape_fn(
    (batch, grid.0, grid.1, anchors, channels),
    |(b, row, col, anchor, ch)| {
      let seed = (b * 131 + row * 31 + col * 17 + anchor * 7 + ch * 3) as f32;
      match ch {
        0..=3 => (seed * 0.37).sin(),
        4 => (seed * 0.11).sin() * 4.0,
        _ => (seed * 0.53).cos() * 3.0,
      }
    },
  )
}

fn to_json(images: &[Vec<Detection>]) -> serde_json::Value {
  serde_json::Value::Array(
    images
      .iter()
      .map(|detections| {
        serde_json::Value::Array(
          detections
            .iter()
            .map(|d| {
              serde_json::json!({
                "xmin": d.xmin,
                "ymin": d.ymin,
                "xmax": d.xmax,
                "ymax": d.ymax,
                "label": d.label,
                "score": d.score,
                "confidence": d.confidence,
              })
            })
            .collect(),
        )
      })
      .collect(),
  )
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("解码配置: {}", args.config);
  info!("网格尺寸: {}x{}", args.grid.0, args.grid.1);
  info!("批次大小: {}", args.batch);

  let config = DecodeConfigBuilder::from_url(&args.config)?.build()?;
  let raw = synthetic_output(
    args.batch,
    args.grid,
    config.num_anchors(),
    config.num_channels(),
  );
  let decoder = Decoder::new(config);

  let repeat = args.repeat.max(1);
  let mut times = Vec::with_capacity(repeat);
  let mut last = Vec::new();
  for i in 0..repeat {
    let now = Instant::now();
    last = decoder.decode_batch(raw.clone())?;
    let elapsed = now.elapsed();
    info!("({})解码完成，耗时: {:.2?}", i, elapsed);
    times.push(elapsed);
  }

  warn!(
    "平均解码时间: {:.2?}",
    times.iter().sum::<Duration>() / times.len() as u32
  );

  let collector = StatsCollector::new();
  decoder.decode_batch_with_sink(raw, &collector)?;
  for stats in collector.into_records() {
    info!(
      "图像 {}: 候选 {}, 退化 {}, 抑制 {}, 保留 {}",
      stats.image, stats.candidates, stats.degenerate, stats.suppressed, stats.kept
    );
  }

  println!("{}", serde_json::to_string_pretty(&to_json(&last))?);

  Ok(())
}
