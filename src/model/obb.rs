// 该文件是 Guanggao （广告牌检测） 项目的一部分。
// src/model/obb.rs - YOLO 旋转框模型（ONNX）
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

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Mutex, MutexGuard, PoisonError};

use image::{Rgb, RgbImage, imageops::FilterType};
use ndarray::{Array4, ArrayView2, Axis, Ix3};
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::Value;
use tracing::{debug, info};
use url::Url;

use super::geometry::{RotatedBox, polygon_iou};
use crate::{
  FromUrl, FromUrlWithScheme,
  model::{DetectItem, DetectResult, Model, ModelError, WithLabel},
};

const OBB_DEFAULT_IMGSZ: u32 = 1024;
const OBB_DEFAULT_CONF: f32 = 0.25;
const OBB_DEFAULT_IOU: f32 = 0.7;
const OBB_DEFAULT_MAX_DET: usize = 300;
const OBB_DEFAULT_THREADS: usize = 4;
const LETTERBOX_FILL: u8 = 114;
/// cx, cy, w, h 与末尾的角度
const OBB_NON_CLASS_ROWS: usize = 5;

pub struct YoloObb<T> {
  session: Mutex<Session>,
  input_name: String,
  imgsz: u32,
  confidence_threshold: f32,
  iou_threshold: f32,
  max_det: usize,
  _phantom: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for YoloObb<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("YoloObb")
      .field("input_name", &self.input_name)
      .field("imgsz", &self.imgsz)
      .field("confidence_threshold", &self.confidence_threshold)
      .field("iou_threshold", &self.iou_threshold)
      .field("max_det", &self.max_det)
      .finish_non_exhaustive()
  }
}

#[derive(Debug, Clone)]
pub struct YoloObbBuilder {
  model_path: String,
  imgsz: u32,
  confidence_threshold: f32,
  iou_threshold: f32,
  max_det: usize,
  threads: usize,
}

impl FromUrlWithScheme for YoloObbBuilder {
  const SCHEME: &'static str = "onnx";
}

fn ort_error<E: std::fmt::Display>(err: E) -> ModelError {
  ModelError::OrtError(err.to_string())
}

fn query_value<V: std::str::FromStr>(
  query: &HashMap<String, String>,
  key: &str,
  default: V,
) -> Result<V, ModelError> {
  match query.get(key) {
    Some(value) => value
      .parse::<V>()
      .map_err(|_| ModelError::ModelPathError(format!("参数 {} 的取值无效: {}", key, value))),
    None => Ok(default),
  }
}

impl FromUrl for YoloObbBuilder {
  type Error = ModelError;

  /// `onnx:models/fusedbillboard.onnx?imgsz=1024&conf=0.25&iou=0.7&max_det=300&threads=4`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案，实际为 {}",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let model_path = match url.host_str() {
      // onnx://models/a.onnx 中的 models 会被解析为主机名
      Some(host) if !host.is_empty() => format!("{}{}", host, url.path()),
      _ => url.path().to_string(),
    };
    if model_path.is_empty() {
      return Err(ModelError::ModelPathError("模型路径为空".to_string()));
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();

    Ok(YoloObbBuilder {
      model_path,
      imgsz: query_value(&query, "imgsz", OBB_DEFAULT_IMGSZ)?,
      confidence_threshold: query_value(&query, "conf", OBB_DEFAULT_CONF)?,
      iou_threshold: query_value(&query, "iou", OBB_DEFAULT_IOU)?,
      max_det: query_value(&query, "max_det", OBB_DEFAULT_MAX_DET)?,
      threads: query_value(&query, "threads", OBB_DEFAULT_THREADS)?,
    })
  }
}

impl YoloObbBuilder {
  pub fn model_path(&self) -> &str {
    &self.model_path
  }

  pub fn confidence(mut self, threshold: f32) -> Self {
    self.confidence_threshold = threshold.clamp(0.0, 1.0);
    self
  }

  pub fn nms_threshold(mut self, threshold: f32) -> Self {
    self.iou_threshold = threshold.clamp(0.0, 1.0);
    self
  }

  pub fn build<T>(self) -> Result<YoloObb<T>, ModelError> {
    if self.imgsz == 0 || self.imgsz % 32 != 0 {
      return Err(ModelError::ModelInvalid(format!(
        "输入尺寸必须是 32 的正整数倍，实际为 {}",
        self.imgsz
      )));
    }

    info!("加载模型文件: {}", self.model_path);
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 ONNX Runtime 推理会话");
    let session = Session::builder()
      .map_err(ort_error)?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(ort_error)?
      .with_intra_threads(self.threads)
      .map_err(ort_error)?
      .commit_from_memory(&model_data)
      .map_err(ort_error)?;

    if session.inputs.len() != 1 {
      return Err(ModelError::ModelInvalid(format!(
        "预期模型输入数量为 1, 实际为 {}",
        session.inputs.len()
      )));
    }
    if session.outputs.is_empty() {
      return Err(ModelError::ModelInvalid("模型没有输出".to_string()));
    }

    let input_name = session.inputs[0].name.clone();
    debug!("模型输入: {}", input_name);
    debug!(
      "模型输出: {:?}",
      session.outputs.iter().map(|o| o.name.as_str()).collect::<Vec<_>>()
    );
    info!("模型加载完成");

    Ok(YoloObb {
      session: Mutex::new(session),
      input_name,
      imgsz: self.imgsz,
      confidence_threshold: self.confidence_threshold,
      iou_threshold: self.iou_threshold,
      max_det: self.max_det,
      _phantom: PhantomData,
    })
  }
}

/// 信箱缩放参数，用于把模型坐标映射回原图
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxInfo {
  pub scale: f32,
  pub pad_x: f32,
  pub pad_y: f32,
}

impl LetterboxInfo {
  pub fn to_source(&self, point: [f32; 2]) -> [f32; 2] {
    [
      (point[0] - self.pad_x) / self.scale,
      (point[1] - self.pad_y) / self.scale,
    ]
  }
}

/// 保持长宽比缩放到 `size x size`，空白处以灰色填充并居中
pub fn letterbox(image: &RgbImage, size: u32) -> (RgbImage, LetterboxInfo) {
  let (w, h) = (image.width() as f32, image.height() as f32);
  let scale = (size as f32 / w).min(size as f32 / h);
  let new_w = ((w * scale).round() as u32).clamp(1, size);
  let new_h = ((h * scale).round() as u32).clamp(1, size);

  let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);
  let pad_x = (size - new_w) / 2;
  let pad_y = (size - new_h) / 2;

  let mut canvas = RgbImage::from_pixel(size, size, Rgb([LETTERBOX_FILL; 3]));
  image::imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

  (
    canvas,
    LetterboxInfo {
      scale,
      pad_x: pad_x as f32,
      pad_y: pad_y as f32,
    },
  )
}

fn to_nchw_tensor(image: &RgbImage) -> Array4<f32> {
  let (w, h) = (image.width() as usize, image.height() as usize);
  let mut input = Array4::<f32>::zeros((1, 3, h, w));
  for (x, y, pixel) in image.enumerate_pixels() {
    for c in 0..3 {
      input[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
    }
  }
  input
}

impl<T: WithLabel> YoloObb<T> {
  /// 解码 `[4 + nc + 1, N]` 形式的输出
  fn postprocess(&self, output: ArrayView2<f32>, letterbox: &LetterboxInfo) -> Vec<DetectItem<T>> {
    decode_candidates(
      output,
      letterbox,
      self.confidence_threshold,
      self.iou_threshold,
      self.max_det,
    )
  }
}

pub(crate) fn decode_candidates<T: WithLabel>(
  output: ArrayView2<f32>,
  letterbox: &LetterboxInfo,
  confidence_threshold: f32,
  iou_threshold: f32,
  max_det: usize,
) -> Vec<DetectItem<T>> {
  // 导出的模型可能是 [C, N] 也可能是 [N, C]，候选数量总是远大于通道数
  let output = if output.shape()[0] > output.shape()[1] {
    output.reversed_axes()
  } else {
    output
  };
  let rows = output.shape()[0];
  if rows <= OBB_NON_CLASS_ROWS {
    return Vec::new();
  }
  let num_classes = rows - OBB_NON_CLASS_ROWS;
  let angle_row = rows - 1;

  let mut candidates = Vec::new();
  for (i, column) in output.axis_iter(Axis(1)).enumerate() {
    let (class_id, score) = (0..num_classes)
      .map(|c| (c, column[4 + c]))
      .fold((0usize, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

    if score < confidence_threshold {
      continue;
    }

    let rbox = RotatedBox {
      cx: column[0],
      cy: column[1],
      w: column[2],
      h: column[3],
      angle: column[angle_row],
    }
    .regularized();

    let corners = rbox.corners().map(|p| letterbox.to_source(p));
    debug!("候选框 {}: 类别 {}, 置信度 {:.3}", i, class_id, score);
    candidates.push((class_id as u32, score, corners));
  }

  nms_rotated(candidates, iou_threshold, max_det)
    .into_iter()
    .map(|(class_id, score, corners)| DetectItem::new(T::from_label_id(class_id), score, corners))
    .collect()
}

type Candidate = (u32, f32, [[f32; 2]; 4]);

/// 旋转框非极大值抑制，结果按置信度降序
fn nms_rotated(mut candidates: Vec<Candidate>, iou_threshold: f32, max_det: usize) -> Vec<Candidate> {
  candidates.sort_by(|a, b| b.1.total_cmp(&a.1));

  let mut kept: Vec<Candidate> = Vec::new();
  for candidate in candidates {
    if kept.len() >= max_det {
      break;
    }
    let suppressed = kept
      .iter()
      .any(|k| k.0 == candidate.0 && polygon_iou(&k.2, &candidate.2) > iou_threshold);
    if !suppressed {
      kept.push(candidate);
    }
  }
  kept
}

/// 推理会话不保存请求间的状态，某次推理 panic 后仍可继续使用
fn lock_session<S>(session: &Mutex<S>) -> MutexGuard<'_, S> {
  session.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: WithLabel> Model for YoloObb<T> {
  type Input = RgbImage;
  type Output = DetectResult<T>;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    debug!("预处理输入图像 {}x{}", input.width(), input.height());
    let (boxed, letterbox) = letterbox(input, self.imgsz);
    let tensor = Value::from_array(to_nchw_tensor(&boxed)).map_err(ort_error)?;

    debug!("执行模型推理");
    let mut session = lock_session(&self.session);
    let outputs = session
      .run(ort::inputs![self.input_name.as_str() => tensor])
      .map_err(ort_error)?;

    debug!("获取模型输出");
    let output = outputs[0].try_extract_array::<f32>().map_err(ort_error)?;
    debug!("模型输出形状: {:?}", output.shape());
    let output = output.into_dimensionality::<Ix3>()?;
    if output.shape()[0] != 1 {
      return Err(ModelError::ModelInvalid(format!(
        "预期批大小为 1，实际输出形状为 {:?}",
        output.shape()
      )));
    }

    let items = self.postprocess(output.index_axis(Axis(0), 0), &letterbox);
    debug!("检测到 {} 个物体", items.len());

    Ok(DetectResult::from(items))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::BillboardLabel;
  use ndarray::Array2;

  fn identity() -> LetterboxInfo {
    LetterboxInfo {
      scale: 1.0,
      pad_x: 0.0,
      pad_y: 0.0,
    }
  }

  /// 构造 [6, N] 的单类别输出，不足 8 列时以零分候选补齐
  fn output(columns: &[[f32; 6]]) -> Array2<f32> {
    let mut out = Array2::<f32>::zeros((6, columns.len().max(8)));
    for (i, col) in columns.iter().enumerate() {
      for (r, v) in col.iter().enumerate() {
        out[[r, i]] = *v;
      }
    }
    out
  }

  #[test]
  fn letterbox_pads_short_side() {
    let image = RgbImage::from_pixel(200, 100, Rgb([10, 20, 30]));
    let (boxed, info) = letterbox(&image, 64);
    assert_eq!(boxed.dimensions(), (64, 64));
    assert!((info.scale - 0.32).abs() < 1e-6);
    assert_eq!(info.pad_x, 0.0);
    assert_eq!(info.pad_y, 16.0);
    assert_eq!(boxed.get_pixel(0, 0), &Rgb([LETTERBOX_FILL; 3]));
    assert_eq!(boxed.get_pixel(0, 15), &Rgb([LETTERBOX_FILL; 3]));
    let inside = boxed.get_pixel(32, 32);
    for (c, expected) in [10i16, 20, 30].into_iter().enumerate() {
      assert!((inside[c] as i16 - expected).abs() <= 1);
    }

    let back = info.to_source([32.0, 32.0]);
    assert!((back[0] - 100.0).abs() < 1e-3);
    assert!((back[1] - 50.0).abs() < 1e-3);
  }

  #[test]
  fn low_confidence_is_dropped() {
    let out = output(&[[50.0, 50.0, 20.0, 10.0, 0.1, 0.0]]);
    let items: Vec<DetectItem<BillboardLabel>> =
      decode_candidates(out.view(), &identity(), 0.25, 0.7, 300);
    assert!(items.is_empty());
  }

  #[test]
  fn overlapping_boxes_are_suppressed() {
    let out = output(&[
      [50.0, 50.0, 40.0, 20.0, 0.6, 0.0],
      [51.0, 50.0, 40.0, 20.0, 0.9, 0.0],
      [200.0, 200.0, 40.0, 20.0, 0.5, 0.3],
    ]);
    let items: Vec<DetectItem<BillboardLabel>> =
      decode_candidates(out.view(), &identity(), 0.25, 0.7, 300);

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].score, 0.9);
    assert_eq!(items[1].score, 0.5);
    assert!(items.iter().all(|item| item.corners.len() == 4));
    assert_eq!(items[0].kind, BillboardLabel::Billboard);
  }

  #[test]
  fn transposed_output_is_accepted() {
    let columns: Vec<[f32; 6]> = (0..8)
      .map(|i| [20.0 + 50.0 * i as f32, 30.0, 20.0, 10.0, 0.8, 0.0])
      .collect();
    let out = output(&columns).reversed_axes();
    assert_eq!(out.shape(), &[8, 6]);

    let items: Vec<DetectItem<BillboardLabel>> =
      decode_candidates(out.view(), &identity(), 0.25, 0.7, 300);
    assert_eq!(items.len(), 8);
  }

  #[test]
  fn max_det_caps_results() {
    let columns: Vec<[f32; 6]> = (0..10)
      .map(|i| [20.0 + 50.0 * i as f32, 30.0, 20.0, 10.0, 0.5 + i as f32 * 0.01, 0.0])
      .collect();
    let out = output(&columns);
    let items: Vec<DetectItem<BillboardLabel>> =
      decode_candidates(out.view(), &identity(), 0.25, 0.7, 3);
    assert_eq!(items.len(), 3);
    assert!(items[0].score > items[1].score && items[1].score > items[2].score);
  }

  #[test]
  fn corners_are_mapped_back_to_source() {
    let info = LetterboxInfo {
      scale: 0.5,
      pad_x: 0.0,
      pad_y: 10.0,
    };
    let out = output(&[[30.0, 40.0, 40.0, 20.0, 0.9, 0.0]]);
    let items: Vec<DetectItem<BillboardLabel>> = decode_candidates(out.view(), &info, 0.25, 0.7, 300);
    assert_eq!(items[0].corners[0], [100.0, 80.0]);
    assert_eq!(items[0].corners[2], [20.0, 40.0]);
  }

  #[test]
  fn builder_reads_query_parameters() {
    let url = Url::parse("onnx:models/fusedbillboard.onnx?imgsz=640&conf=0.4&max_det=10").unwrap();
    let builder = YoloObbBuilder::from_url(&url).unwrap();
    assert_eq!(builder.model_path(), "models/fusedbillboard.onnx");
    assert_eq!(builder.imgsz, 640);
    assert_eq!(builder.confidence_threshold, 0.4);
    assert_eq!(builder.iou_threshold, OBB_DEFAULT_IOU);
    assert_eq!(builder.max_det, 10);

    let url = Url::parse("onnx://models/fusedbillboard.onnx").unwrap();
    let builder = YoloObbBuilder::from_url(&url).unwrap();
    assert_eq!(builder.model_path(), "models/fusedbillboard.onnx");

    let url = Url::parse("onnx:///opt/models/a.onnx").unwrap();
    let builder = YoloObbBuilder::from_url(&url).unwrap();
    assert_eq!(builder.model_path(), "/opt/models/a.onnx");
  }

  #[test]
  fn builder_rejects_bad_input() {
    let url = Url::parse("file:models/a.onnx").unwrap();
    assert!(YoloObbBuilder::from_url(&url).is_err());

    let url = Url::parse("onnx:models/a.onnx?conf=high").unwrap();
    assert!(YoloObbBuilder::from_url(&url).is_err());

    let url = Url::parse("onnx:models/a.onnx?imgsz=100").unwrap();
    let err = YoloObbBuilder::from_url(&url).unwrap().build::<BillboardLabel>();
    assert!(matches!(err, Err(ModelError::ModelInvalid(_))));
  }

  #[test]
  fn session_lock_survives_panicking_inference() {
    let session = std::sync::Arc::new(Mutex::new(0u32));
    let shared = session.clone();
    let result: std::thread::Result<()> = std::thread::spawn(move || {
      let mut guard = shared.lock().unwrap();
      *guard += 1;
      panic!("inference panicked");
    })
    .join();
    assert!(result.is_err());
    assert!(session.is_poisoned());

    let mut guard = lock_session(session.as_ref());
    *guard += 1;
    assert_eq!(*guard, 2);
    drop(guard);
    assert_eq!(*lock_session(session.as_ref()), 2);
  }
}
