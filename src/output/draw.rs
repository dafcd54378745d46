// 该文件是 Guanggao （广告牌检测） 项目的一部分。
// src/output/draw.rs - 旋转框检测结果可视化
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

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
  draw_filled_circle_mut, draw_filled_rect_mut, draw_line_segment_mut, draw_polygon_mut,
  draw_text_mut, text_size,
};
use imageproc::point::Point;
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::{DetectResult, OBB_CORNERS, WithLabel};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_OFFSET_Y: i32 = 10; // 标签位于第一个角点上方
const LABEL_PADDING: i32 = 2;
const LINE_COLOR: [u8; 3] = [0, 0, 255]; // 蓝色（RGB）
const LABEL_TEXT_COLOR: [u8; 3] = [255, 255, 255];
/// 每 600 像素（宽 + 高）加粗 1 像素
const THICKNESS_DIVISOR: f32 = 600.0;
/// 线段先裁剪到图像四周 `CLIP_MARGIN_FACTOR * (宽 + 高)` 的范围内再绘制
const CLIP_MARGIN_FACTOR: f64 = 4.0;

const SYSTEM_FONT_PATHS: &[&str] = &[
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
  "/usr/share/fonts/truetype/wqy/wqy-microhei.ttc",
  "/usr/share/fonts/opentype/noto/NotoSansCJK-Regular.ttc",
  "/System/Library/Fonts/Supplemental/Arial.ttf",
  "C:\\Windows\\Fonts\\arial.ttf",
];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("第 {index} 个检测结果的角点数量应为 4，实际为 {count}")]
  MalformedCorners { index: usize, count: usize },
  #[error("无法加载字体 {path}: {reason}")]
  FontLoad { path: String, reason: String },
}

/// 根据图像尺寸计算线宽：`max(1, round((h + w) / 600))`
pub fn line_thickness(width: u32, height: u32) -> u32 {
  let thickness = ((width as f32 + height as f32) / THICKNESS_DIVISOR).round() as u32;
  thickness.max(1)
}

/// 标签文本：`<类别> <置信度，两位小数>`
pub fn label_text<T: WithLabel>(kind: &T, score: f32) -> String {
  format!("{} {:.2}", kind.to_label_str(), score)
}

/// 标签锚点：第一个角点上移 10 像素，文本底边落在锚点所在行
pub fn label_anchor(corners: &[[f32; 2]]) -> (i32, i32) {
  let [x, y] = corners[0];
  // `as` 转换在越界时饱和，减法同样需要饱和
  (x as i32, (y as i32).saturating_sub(LABEL_OFFSET_Y))
}

/// 加载字体：优先使用指定路径，否则在常见系统路径中查找
pub fn load_font(path: Option<&Path>) -> Result<Option<FontVec>, DrawError> {
  if let Some(path) = path {
    let data = std::fs::read(path).map_err(|e| DrawError::FontLoad {
      path: path.display().to_string(),
      reason: e.to_string(),
    })?;
    let font = FontVec::try_from_vec(data).map_err(|e| DrawError::FontLoad {
      path: path.display().to_string(),
      reason: e.to_string(),
    })?;
    info!("加载字体: {}", path.display());
    return Ok(Some(font));
  }

  for candidate in SYSTEM_FONT_PATHS {
    if let Ok(data) = std::fs::read(candidate)
      && let Ok(font) = FontVec::try_from_vec(data)
    {
      info!("加载系统字体: {}", candidate);
      return Ok(Some(font));
    }
  }

  warn!("未找到可用字体，将不绘制标签文本");
  Ok(None)
}

/// 将线段裁剪到图像外扩后的窗口内（Liang–Barsky），完全落在窗口外时返回 `None`
///
/// 角点可以是任意实数，裁剪后的坐标才能安全地转换为像素坐标。
fn clip_segment(
  p1: [f32; 2],
  p2: [f32; 2],
  width: u32,
  height: u32,
) -> Option<([f32; 2], [f32; 2])> {
  if !(p1.iter().chain(p2.iter()).all(|v| v.is_finite())) {
    return None;
  }

  let margin = CLIP_MARGIN_FACTOR * (width as f64 + height as f64);
  let (x_min, y_min) = (-margin, -margin);
  let (x_max, y_max) = (width as f64 + margin, height as f64 + margin);
  let (x1, y1) = (p1[0] as f64, p1[1] as f64);
  let (dx, dy) = (p2[0] as f64 - x1, p2[1] as f64 - y1);

  let mut t0 = 0.0f64;
  let mut t1 = 1.0f64;
  for (p, q) in [
    (-dx, x1 - x_min),
    (dx, x_max - x1),
    (-dy, y1 - y_min),
    (dy, y_max - y1),
  ] {
    if p == 0.0 {
      if q < 0.0 {
        return None;
      }
      continue;
    }
    let r = q / p;
    if p < 0.0 {
      if r > t1 {
        return None;
      }
      t0 = t0.max(r);
    } else {
      if r < t0 {
        return None;
      }
      t1 = t1.min(r);
    }
  }

  let at = |t: f64| [(x1 + t * dx) as f32, (y1 + t * dy) as f32];
  Some((at(t0), at(t1)))
}

/// 绘制粗线：宽度大于 1 时以四边形加圆头近似
fn draw_thick_line(image: &mut RgbImage, p1: [f32; 2], p2: [f32; 2], thickness: u32, color: Rgb<u8>) {
  let Some((p1, p2)) = clip_segment(p1, p2, image.width(), image.height()) else {
    return;
  };

  if thickness <= 1 {
    draw_line_segment_mut(image, (p1[0], p1[1]), (p2[0], p2[1]), color);
    return;
  }

  let radius = thickness as f32 / 2.0;
  let (dx, dy) = (p2[0] - p1[0], p2[1] - p1[1]);
  let length = (dx * dx + dy * dy).sqrt();

  if length > f32::EPSILON {
    let (nx, ny) = (-dy / length * radius, dx / length * radius);
    let poly = [
      Point::new((p1[0] + nx).round() as i32, (p1[1] + ny).round() as i32),
      Point::new((p2[0] + nx).round() as i32, (p2[1] + ny).round() as i32),
      Point::new((p2[0] - nx).round() as i32, (p2[1] - ny).round() as i32),
      Point::new((p1[0] - nx).round() as i32, (p1[1] - ny).round() as i32),
    ];
    // 首尾重合的多边形会被 imageproc 拒绝
    if poly[0] != poly[3] {
      draw_polygon_mut(image, &poly, color);
    }
  }

  let r = radius.floor() as i32;
  for p in [p1, p2] {
    draw_filled_circle_mut(image, (p[0].round() as i32, p[1].round() as i32), r, color);
  }
}

pub struct Draw {
  font: Option<FontVec>,
  font_size: f32,
  line_color: [u8; 3],
  label_text_color: [u8; 3],
  render_label: bool,
}

impl Default for Draw {
  fn default() -> Self {
    Self::new(None)
  }
}

impl Draw {
  pub fn new(font: Option<FontVec>) -> Self {
    Self {
      font,
      font_size: LABEL_FONT_SIZE,
      line_color: LINE_COLOR,
      label_text_color: LABEL_TEXT_COLOR,
      render_label: true,
    }
  }

  /// 关闭标签绘制，只画边框
  pub fn with_labels(mut self, render_label: bool) -> Self {
    self.render_label = render_label;
    self
  }

  pub fn renders_labels(&self) -> bool {
    self.render_label && self.font.is_some()
  }

  /// 在图像副本上绘制所有检测结果，原图保持不变
  ///
  /// 任意一个检测结果的角点数量不是 4 时直接返回错误，不绘制任何内容。
  pub fn annotate<T: WithLabel>(
    &self,
    image: &RgbImage,
    result: &DetectResult<T>,
  ) -> Result<RgbImage, DrawError> {
    if let Some((index, item)) = result
      .items
      .iter()
      .enumerate()
      .find(|(_, item)| item.corners.len() != OBB_CORNERS)
    {
      return Err(DrawError::MalformedCorners {
        index,
        count: item.corners.len(),
      });
    }

    let mut output = image.clone();
    let thickness = line_thickness(image.width(), image.height());
    let color = Rgb(self.line_color);
    debug!("绘制 {} 个检测框，线宽 {}", result.len(), thickness);

    for item in result.items.iter() {
      for i in 0..OBB_CORNERS {
        let p1 = item.corners[i];
        let p2 = item.corners[(i + 1) % OBB_CORNERS];
        draw_thick_line(&mut output, p1, p2, thickness, color);
      }

      if self.render_label
        && let Some(font) = &self.font
      {
        let label = label_text(&item.kind, item.score);
        self.draw_label(&mut output, font, label_anchor(&item.corners), &label);
      }
    }

    Ok(output)
  }

  fn draw_label(&self, image: &mut RgbImage, font: &FontVec, anchor: (i32, i32), label: &str) {
    let scale = PxScale::from(self.font_size);
    let (text_w, text_h) = text_size(scale, font, label);
    let box_w = text_w as i32 + 2 * LABEL_PADDING;
    let box_h = text_h as i32 + 2 * LABEL_PADDING;

    // 背景框底边贴在锚点上，并限制在图像内
    let max_x = (image.width() as i32 - box_w).max(0);
    let max_y = (image.height() as i32 - box_h).max(0);
    let x = anchor.0.clamp(0, max_x);
    let y = anchor.1.saturating_sub(box_h).clamp(0, max_y);

    let rect = Rect::at(x, y).of_size(box_w.max(1) as u32, box_h.max(1) as u32);
    draw_filled_rect_mut(image, rect, Rgb(self.line_color));
    draw_text_mut(
      image,
      Rgb(self.label_text_color),
      x + LABEL_PADDING,
      y + LABEL_PADDING,
      scale,
      font,
      label,
    );
  }
}
