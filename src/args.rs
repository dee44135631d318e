// 该文件是 Anchor Decode （锚框解码） 项目的一部分。
// src/args.rs - 基准程序参数配置
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

use clap::Parser;
use url::Url;

/// Anchor Decode 基准程序参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 解码配置
  /// 例如: anchor://decode?anchors=1.0,1.5,2.0,3.0&classes=3&feature_map=28x28&obj=0.3&nms=0.3
  #[arg(long, value_name = "CONFIG")]
  pub config: Url,

  /// 输出网格尺寸，格式为 HxW
  #[arg(long, default_value = "7x7", value_name = "GRID", value_parser = parse_grid)]
  pub grid: (usize, usize),

  /// 批次大小
  #[arg(long, default_value = "1", value_name = "COUNT")]
  pub batch: usize,

  /// 重复解码次数
  #[arg(long, default_value = "100", value_name = "COUNT")]
  pub repeat: usize,
}

fn parse_grid(s: &str) -> Result<(usize, usize), String> {
  let (h, w) = s
    .split_once(['x', 'X'])
    .ok_or_else(|| format!("网格尺寸格式应为 HxW: {}", s))?;
  let h = h.trim().parse().map_err(|e| format!("网格高度无效: {}", e))?;
  let w = w.trim().parse().map_err(|e| format!("网格宽度无效: {}", e))?;
  Ok((h, w))
}
