// 该文件是 Guanggao （广告牌检测） 项目的一部分。
// src/output.rs - 输出定义
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

use image::RgbImage;
use thiserror::Error;

use crate::frame::{FrameError, OutputFormat, encode_image};
use crate::model::{DetectResult, WithLabel};

pub mod draw;

use self::draw::{Draw, DrawError};

pub trait Render<Frame, Output>: Sized {
  type Rendered;
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<Self::Rendered, Self::Error>;
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("绘制错误: {0}")]
  Draw(#[from] DrawError),
  #[error("{0}")]
  Frame(#[from] FrameError),
}

/// 绘制完成的图像及其编码结果，只在单次请求内存在
#[derive(Debug, Clone)]
pub struct AnnotatedImage {
  pub image: RgbImage,
  pub bytes: Vec<u8>,
  pub format: OutputFormat,
}

/// 绘制检测结果并编码为固定格式
pub struct AnnotateOutput {
  draw: Draw,
  format: OutputFormat,
}

impl AnnotateOutput {
  pub fn new(draw: Draw, format: OutputFormat) -> Self {
    Self { draw, format }
  }
}

impl<T: WithLabel> Render<RgbImage, DetectResult<T>> for AnnotateOutput {
  type Rendered = AnnotatedImage;
  type Error = OutputError;

  fn render_result(
    &self,
    frame: &RgbImage,
    result: &DetectResult<T>,
  ) -> Result<Self::Rendered, Self::Error> {
    let image = self.draw.annotate(frame, result)?;
    let bytes = encode_image(&image, self.format)?;
    Ok(AnnotatedImage {
      image,
      bytes,
      format: self.format,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::decode_image;
  use crate::model::{BillboardLabel, DetectItem};
  use image::Rgb;

  #[test]
  fn render_encodes_annotated_image() {
    let frame = RgbImage::from_pixel(120, 80, Rgb([0, 0, 0]));
    let result = DetectResult::from(vec![DetectItem::new(
      BillboardLabel::Billboard,
      0.87,
      [[10.0, 10.0], [50.0, 10.0], [50.0, 50.0], [10.0, 50.0]],
    )]);

    let output = AnnotateOutput::new(Draw::default(), OutputFormat::Png);
    let rendered = output.render_result(&frame, &result).unwrap();

    assert_eq!(rendered.format, OutputFormat::Png);
    assert_eq!(rendered.image.get_pixel(30, 10), &Rgb([0, 0, 255]));
    let decoded = decode_image(&rendered.bytes).unwrap();
    assert_eq!(decoded, rendered.image);
  }

  #[test]
  fn render_surfaces_draw_errors() {
    let frame = RgbImage::from_pixel(16, 16, Rgb([0, 0, 0]));
    let result = DetectResult::from(vec![DetectItem {
      kind: BillboardLabel::Billboard,
      score: 0.4,
      corners: vec![[1.0, 1.0]],
    }]);

    let output = AnnotateOutput::new(Draw::default(), OutputFormat::default());
    let err = output.render_result(&frame, &result).unwrap_err();
    assert!(matches!(err, OutputError::Draw(_)));
  }
}
