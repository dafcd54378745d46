// 该文件是 Guanggao （广告牌检测） 项目的一部分。
// src/frame.rs - 图像帧编解码
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

//! 像素网格统一使用 [`RgbImage`]，通道顺序在解码、绘制、编码全程保持 RGB。

use std::io::Cursor;
use std::str::FromStr;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ImageDecoder, ImageReader, RgbImage};
use thiserror::Error;
use tracing::debug;

pub const RGB_CHANNELS: usize = 3;

/// 与 OpenCV `imencode('.jpg')` 的默认质量一致
pub const DEFAULT_JPEG_QUALITY: u8 = 95;

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("图像解码失败: {0}")]
  Decode(String),
  #[error("图像编码失败: {0}")]
  Encode(String),
}

/// 输出图像格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
  Jpeg { quality: u8 },
  Png,
}

impl Default for OutputFormat {
  fn default() -> Self {
    OutputFormat::Jpeg {
      quality: DEFAULT_JPEG_QUALITY,
    }
  }
}

impl OutputFormat {
  pub fn mime_type(&self) -> &'static str {
    match self {
      OutputFormat::Jpeg { .. } => "image/jpeg",
      OutputFormat::Png => "image/png",
    }
  }

  pub fn with_quality(self, quality: u8) -> Self {
    match self {
      OutputFormat::Jpeg { .. } => OutputFormat::Jpeg {
        quality: quality.clamp(1, 100),
      },
      other => other,
    }
  }
}

impl FromStr for OutputFormat {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "jpg" | "jpeg" => Ok(OutputFormat::default()),
      "png" => Ok(OutputFormat::Png),
      other => Err(format!("不支持的输出格式: {}（可选 jpeg, png）", other)),
    }
  }
}

/// 将上传的压缩字节解码为 RGB 像素网格
///
/// 按 EXIF 方向信息旋转图像，灰度、带透明通道或 16 位图像一律转换为 8 位 RGB。
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, FrameError> {
  let mut decoder = ImageReader::new(Cursor::new(bytes))
    .with_guessed_format()
    .map_err(|e| FrameError::Decode(e.to_string()))?
    .into_decoder()
    .map_err(|e| FrameError::Decode(e.to_string()))?;

  let orientation = decoder
    .orientation()
    .map_err(|e| FrameError::Decode(e.to_string()))?;
  let mut image =
    DynamicImage::from_decoder(decoder).map_err(|e| FrameError::Decode(e.to_string()))?;
  image.apply_orientation(orientation);

  let image = image.to_rgb8();
  if image.width() == 0 || image.height() == 0 {
    return Err(FrameError::Decode("图像尺寸为零".to_string()));
  }

  debug!("解码图像: {}x{}", image.width(), image.height());
  Ok(image)
}

/// 将像素网格编码为压缩图像字节
pub fn encode_image(image: &RgbImage, format: OutputFormat) -> Result<Vec<u8>, FrameError> {
  if image.width() == 0 || image.height() == 0 {
    return Err(FrameError::Encode(format!(
      "无法编码尺寸为 {}x{} 的图像",
      image.width(),
      image.height()
    )));
  }

  let mut buffer = Cursor::new(Vec::new());
  match format {
    OutputFormat::Jpeg { quality } => {
      image.write_with_encoder(JpegEncoder::new_with_quality(&mut buffer, quality))
    }
    OutputFormat::Png => image.write_with_encoder(PngEncoder::new(&mut buffer)),
  }
  .map_err(|e| FrameError::Encode(e.to_string()))?;

  let bytes = buffer.into_inner();
  debug!("编码图像: {} 字节, 格式 {:?}", bytes.len(), format);
  Ok(bytes)
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{GrayImage, Luma, Rgb};

  fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
      Rgb([(x * 4) as u8, (y * 4) as u8, ((x + y) * 2) as u8])
    })
  }

  #[test]
  fn jpeg_keeps_dimensions_and_channels() {
    let image = gradient(64, 48);
    let bytes = encode_image(&image, OutputFormat::default()).unwrap();
    assert_eq!(&bytes[..2], &[0xFF, 0xD8]);

    let decoded = decode_image(&bytes).unwrap();
    assert_eq!(decoded.dimensions(), (64, 48));
    assert_eq!(decoded.as_raw().len(), 64 * 48 * RGB_CHANNELS);
  }

  #[test]
  fn png_is_lossless() {
    let image = gradient(17, 9);
    let bytes = encode_image(&image, OutputFormat::Png).unwrap();
    let decoded = decode_image(&bytes).unwrap();
    assert_eq!(decoded, image);
  }

  #[test]
  fn empty_image_fails_to_encode() {
    let image = RgbImage::new(0, 0);
    let err = encode_image(&image, OutputFormat::default()).unwrap_err();
    assert!(matches!(err, FrameError::Encode(_)));
  }

  #[test]
  fn garbage_fails_to_decode() {
    let err = decode_image(b"definitely not an image").unwrap_err();
    assert!(matches!(err, FrameError::Decode(_)));
  }

  #[test]
  fn grayscale_is_widened_to_rgb() {
    let gray = GrayImage::from_pixel(8, 4, Luma([200]));
    let mut bytes = Cursor::new(Vec::new());
    gray
      .write_with_encoder(PngEncoder::new(&mut bytes))
      .unwrap();

    let decoded = decode_image(bytes.get_ref()).unwrap();
    assert_eq!(decoded.dimensions(), (8, 4));
    assert_eq!(decoded.get_pixel(3, 2), &Rgb([200, 200, 200]));
  }

  #[test]
  fn output_format_parsing() {
    assert_eq!("JPG".parse::<OutputFormat>().unwrap(), OutputFormat::default());
    assert_eq!("png".parse::<OutputFormat>().unwrap(), OutputFormat::Png);
    assert!("gif".parse::<OutputFormat>().is_err());
    assert_eq!(
      OutputFormat::default().with_quality(0),
      OutputFormat::Jpeg { quality: 1 }
    );
    assert_eq!(OutputFormat::Png.mime_type(), "image/png");
  }
}
