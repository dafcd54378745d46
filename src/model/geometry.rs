// 该文件是 Guanggao （广告牌检测） 项目的一部分。
// src/model/geometry.rs - 旋转框几何计算
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

use std::f32::consts::{FRAC_PI_2, PI};

pub type Point = [f32; 2];

/// 中心点、宽高、旋转角（弧度）表示的旋转框
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotatedBox {
  pub cx: f32,
  pub cy: f32,
  pub w: f32,
  pub h: f32,
  pub angle: f32,
}

impl RotatedBox {
  /// 规整化：保证 w >= h，角度落在 [0, π)
  pub fn regularized(self) -> Self {
    let (w, h, angle) = if self.w >= self.h {
      (self.w, self.h, self.angle)
    } else {
      (self.h, self.w, self.angle + FRAC_PI_2)
    };
    Self {
      w,
      h,
      angle: angle.rem_euclid(PI),
      ..self
    }
  }

  /// 转换为四个角点，顺序与 xyxyxyxy 一致
  pub fn corners(&self) -> [Point; 4] {
    let (sin, cos) = self.angle.sin_cos();
    let v1 = [self.w / 2.0 * cos, self.w / 2.0 * sin];
    let v2 = [-self.h / 2.0 * sin, self.h / 2.0 * cos];
    let c = [self.cx, self.cy];

    [
      [c[0] + v1[0] + v2[0], c[1] + v1[1] + v2[1]],
      [c[0] + v1[0] - v2[0], c[1] + v1[1] - v2[1]],
      [c[0] - v1[0] - v2[0], c[1] - v1[1] - v2[1]],
      [c[0] - v1[0] + v2[0], c[1] - v1[1] + v2[1]],
    ]
  }
}

/// 多边形有向面积（逆时针为正）
fn signed_area(poly: &[Point]) -> f32 {
  let n = poly.len();
  if n < 3 {
    return 0.0;
  }
  (0..n)
    .map(|i| {
      let a = poly[i];
      let b = poly[(i + 1) % n];
      a[0] * b[1] - b[0] * a[1]
    })
    .sum::<f32>()
    / 2.0
}

pub fn polygon_area(poly: &[Point]) -> f32 {
  signed_area(poly).abs()
}

fn cross(o: Point, a: Point, b: Point) -> f32 {
  (a[0] - o[0]) * (b[1] - o[1]) - (a[1] - o[1]) * (b[0] - o[0])
}

fn ccw(poly: &[Point]) -> Vec<Point> {
  let mut poly = poly.to_vec();
  if signed_area(&poly) < 0.0 {
    poly.reverse();
  }
  poly
}

/// 两个凸多边形的交集（Sutherland–Hodgman 裁剪）
pub fn convex_intersection(subject: &[Point], clip: &[Point]) -> Vec<Point> {
  let clip = ccw(clip);
  let mut output = ccw(subject);

  for i in 0..clip.len() {
    if output.is_empty() {
      break;
    }
    let edge_start = clip[i];
    let edge_end = clip[(i + 1) % clip.len()];
    let input = std::mem::take(&mut output);

    for j in 0..input.len() {
      let current = input[j];
      let previous = input[(j + input.len() - 1) % input.len()];
      let current_inside = cross(edge_start, edge_end, current) >= 0.0;
      let previous_inside = cross(edge_start, edge_end, previous) >= 0.0;

      if current_inside {
        if !previous_inside {
          output.extend(line_intersection(previous, current, edge_start, edge_end));
        }
        output.push(current);
      } else if previous_inside {
        output.extend(line_intersection(previous, current, edge_start, edge_end));
      }
    }
  }

  output
}

fn line_intersection(p1: Point, p2: Point, q1: Point, q2: Point) -> Option<Point> {
  let d1 = [p2[0] - p1[0], p2[1] - p1[1]];
  let d2 = [q2[0] - q1[0], q2[1] - q1[1]];
  let denom = d1[0] * d2[1] - d1[1] * d2[0];
  if denom.abs() < f32::EPSILON {
    return None;
  }
  let t = ((q1[0] - p1[0]) * d2[1] - (q1[1] - p1[1]) * d2[0]) / denom;
  Some([p1[0] + t * d1[0], p1[1] + t * d1[1]])
}

/// 两个凸多边形的 IoU
pub fn polygon_iou(a: &[Point], b: &[Point]) -> f32 {
  let inter = polygon_area(&convex_intersection(a, b));
  let union = polygon_area(a) + polygon_area(b) - inter;
  if union > 0.0 { inter / union } else { 0.0 }
}
