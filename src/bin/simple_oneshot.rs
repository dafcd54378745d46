// 该文件是 Guanggao （广告牌检测） 项目的一部分。
// src/bin/simple_oneshot.rs - 单张图片推理
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

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use url::Url;

use guanggao::{
  FromUrl,
  frame::{OutputFormat, decode_image},
  model::{BillboardLabel, DetectResult, Model, YoloObbBuilder},
  output::{AnnotateOutput, Render, draw::Draw, draw::load_font},
};
use tracing::info;

/// 单张图片广告牌检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址
  #[arg(long, value_name = "MODEL", default_value = "onnx:models/fusedbillboard.onnx")]
  pub model: Url,
  /// 输入图片
  #[arg(long, value_name = "SOURCE")]
  pub input: PathBuf,
  /// 输出图片，扩展名为 png 时输出 PNG，否则输出 JPEG
  #[arg(long, value_name = "OUTPUT")]
  pub output: PathBuf,
  /// 标签字体
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型地址: {}", args.model);
  info!("输入图片: {}", args.input.display());
  info!("输出路径: {}", args.output.display());

  let format = args
    .output
    .extension()
    .and_then(|ext| ext.to_str())
    .and_then(|ext| ext.parse::<OutputFormat>().ok())
    .unwrap_or_default();

  let bytes = std::fs::read(&args.input)
    .with_context(|| format!("无法读取输入图片 {}", args.input.display()))?;
  let frame = decode_image(&bytes)?;
  let model = YoloObbBuilder::from_url(&args.model)?.build::<BillboardLabel>()?;
  let output = AnnotateOutput::new(Draw::new(load_font(args.font.as_deref())?), format);

  info!("开始推理...");
  let now = std::time::Instant::now();
  let result: DetectResult<BillboardLabel> = model.infer(&frame)?;
  info!("推理完成: {} 个广告牌，耗时: {:.2?}", result.len(), now.elapsed());

  let rendered = output.render_result(&frame, &result)?;
  std::fs::write(&args.output, &rendered.bytes)
    .with_context(|| format!("无法写入输出图片 {}", args.output.display()))?;
  info!("结果已保存: {}", args.output.display());

  Ok(())
}
