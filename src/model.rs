// 该文件是 Guanggao （广告牌检测） 项目的一部分。
// src/model.rs - 模型
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

use thiserror::Error;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 旋转框的角点数量
pub const OBB_CORNERS: usize = 4;

/// 单个旋转框检测结果
///
/// `corners` 为原图像素坐标，相邻两点构成一条边，最后一点与第一点相连。
#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem<T> {
  pub kind: T,
  pub score: f32,
  pub corners: Vec<[f32; 2]>,
}

impl<T> DetectItem<T> {
  pub fn new(kind: T, score: f32, corners: [[f32; 2]; OBB_CORNERS]) -> Self {
    Self {
      kind,
      score,
      corners: corners.to_vec(),
    }
  }
}

#[derive(Debug, Clone)]
pub struct DetectResult<T> {
  pub items: Box<[DetectItem<T>]>,
}

impl<T> DetectResult<T> {
  pub fn empty() -> Self {
    Self {
      items: Box::new([]),
    }
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

impl<T> From<Vec<DetectItem<T>>> for DetectResult<T> {
  fn from(items: Vec<DetectItem<T>>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

pub trait WithLabel: Sized + std::fmt::Debug {
  fn to_label_str(&self) -> String;
  fn from_label_id(id: u32) -> Self;
}

/// 广告牌检测模型只有一个类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillboardLabel {
  Billboard,
}

impl WithLabel for BillboardLabel {
  fn to_label_str(&self) -> String {
    match self {
      BillboardLabel::Billboard => "billboard".to_string(),
    }
  }

  fn from_label_id(_id: u32) -> Self {
    BillboardLabel::Billboard
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(std::io::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(String),
  #[error("张量形状错误: {0}")]
  ShapeError(#[from] ndarray::ShapeError),
}

impl From<std::io::Error> for ModelError {
  fn from(err: std::io::Error) -> Self {
    ModelError::ModelLoadError(err)
  }
}

/// 服务端共享的检测器句柄
///
/// 模型在进程启动时加载一次，此后只读地在各个请求间共享。
pub type SharedDetector = std::sync::Arc<
  dyn Model<Input = image::RgbImage, Output = DetectResult<BillboardLabel>, Error = ModelError>
    + Send
    + Sync,
>;

pub mod geometry;
mod obb;
pub use self::obb::{LetterboxInfo, YoloObb, YoloObbBuilder, letterbox};
