// 该文件是 Guanggao （广告牌检测） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use url::Url;

use crate::frame::OutputFormat;

/// Guanggao 广告牌检测服务参数配置
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 监听地址
  #[arg(long, env = "GUANGGAO_LISTEN", default_value = "0.0.0.0:5001")]
  pub listen: SocketAddr,

  /// 模型地址，例如:
  /// - onnx:models/fusedbillboard.onnx
  /// - onnx:///opt/models/fusedbillboard.onnx?imgsz=1024&conf=0.25
  #[arg(
    long,
    env = "GUANGGAO_MODEL",
    value_name = "MODEL",
    default_value = "onnx:models/fusedbillboard.onnx"
  )]
  pub model: Url,

  /// 置信度阈值，覆盖模型地址中的 conf 参数
  #[arg(long, value_name = "THRESHOLD")]
  pub confidence: Option<f32>,

  /// NMS IOU 阈值，覆盖模型地址中的 iou 参数
  #[arg(long, value_name = "THRESHOLD")]
  pub nms_threshold: Option<f32>,

  /// 静态资源目录
  #[arg(long, env = "GUANGGAO_STATIC_DIR", default_value = "static")]
  pub static_dir: PathBuf,

  /// 首页模板
  #[arg(long, env = "GUANGGAO_INDEX", default_value = "templates/index.html")]
  pub index: PathBuf,

  /// 标签字体（TTF/OTF），未指定时尝试系统字体
  #[arg(long, env = "GUANGGAO_FONT", value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 不绘制类别标签，只绘制边框
  #[arg(long, env = "GUANGGAO_NO_LABELS")]
  pub no_labels: bool,

  /// 输出图像格式 (jpeg, png)
  #[arg(long, env = "GUANGGAO_OUTPUT_FORMAT", default_value = "jpeg")]
  pub output_format: OutputFormat,

  /// JPEG 输出质量 (1 - 100)
  #[arg(long, env = "GUANGGAO_JPEG_QUALITY", default_value = "95")]
  pub jpeg_quality: u8,

  /// 上传文件大小上限（MiB）
  #[arg(long, env = "GUANGGAO_MAX_UPLOAD_MB", default_value = "32")]
  pub max_upload_mb: usize,
}

impl Args {
  pub fn output_format(&self) -> OutputFormat {
    self.output_format.with_quality(self.jpeg_quality)
  }

  pub fn max_upload_bytes(&self) -> usize {
    self.max_upload_mb.saturating_mul(1024 * 1024)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_service_layout() {
    let args = Args::try_parse_from(["guanggao"]).unwrap();
    assert_eq!(args.listen.port(), 5001);
    assert_eq!(args.model.scheme(), "onnx");
    assert_eq!(args.output_format(), OutputFormat::default());
    assert_eq!(args.max_upload_bytes(), 32 * 1024 * 1024);
    assert!(!args.no_labels);
    assert!(args.font.is_none());
  }

  #[test]
  fn png_output_ignores_quality() {
    let args = Args::try_parse_from([
      "guanggao",
      "--output-format",
      "png",
      "--jpeg-quality",
      "40",
    ])
    .unwrap();
    assert_eq!(args.output_format(), OutputFormat::Png);
  }

  #[test]
  fn jpeg_quality_is_applied() {
    let args = Args::try_parse_from(["guanggao", "--jpeg-quality", "80"]).unwrap();
    assert_eq!(args.output_format(), OutputFormat::Jpeg { quality: 80 });
  }
}
