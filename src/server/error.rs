// 该文件是 Guanggao （广告牌检测） 项目的一部分。
// src/server/error.rs - 请求错误与 HTTP 响应映射
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

use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::frame::FrameError;
use crate::model::ModelError;
use crate::output::OutputError;
use crate::output::draw::DrawError;

/// `/predict` 请求可能出现的错误
///
/// 对外的错误信息保持英文，便于前端页面直接展示。
#[derive(Error, Debug)]
pub enum PredictError {
  #[error("{0}")]
  MissingInput(&'static str),
  #[error("Failed to read upload: {0}")]
  Upload(#[from] MultipartError),
  #[error("Failed to decode image: {0}")]
  Decode(String),
  #[error("Detection failed: {0}")]
  Detection(#[from] ModelError),
  #[error("Failed to annotate image: {0}")]
  Draw(#[from] DrawError),
  #[error("Failed to encode output image: {0}")]
  Encode(String),
  #[error("Internal error: {0}")]
  Internal(String),
}

impl PredictError {
  pub fn status(&self) -> StatusCode {
    match self {
      PredictError::MissingInput(_) | PredictError::Decode(_) => StatusCode::BAD_REQUEST,
      PredictError::Upload(err) => err.status(),
      PredictError::Detection(_)
      | PredictError::Draw(_)
      | PredictError::Encode(_)
      | PredictError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl From<FrameError> for PredictError {
  fn from(err: FrameError) -> Self {
    match err {
      FrameError::Decode(detail) => PredictError::Decode(detail),
      FrameError::Encode(detail) => PredictError::Encode(detail),
    }
  }
}

impl From<OutputError> for PredictError {
  fn from(err: OutputError) -> Self {
    match err {
      OutputError::Draw(err) => PredictError::Draw(err),
      OutputError::Frame(err) => err.into(),
    }
  }
}

#[derive(Serialize)]
struct ErrorBody {
  error: String,
}

impl IntoResponse for PredictError {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      error!("请求处理失败: {}", self);
    } else {
      warn!("请求被拒绝: {}", self);
    }
    (
      status,
      Json(ErrorBody {
        error: self.to_string(),
      }),
    )
      .into_response()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn client_errors_map_to_bad_request() {
    assert_eq!(
      PredictError::MissingInput("No file provided").status(),
      StatusCode::BAD_REQUEST
    );
    let decode: PredictError = FrameError::Decode("bad header".to_string()).into();
    assert_eq!(decode.status(), StatusCode::BAD_REQUEST);
    assert_eq!(decode.to_string(), "Failed to decode image: bad header");
  }

  #[test]
  fn server_errors_map_to_internal_error() {
    let detection: PredictError = ModelError::ModelInvalid("输出张量为空".to_string()).into();
    assert_eq!(detection.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(detection.to_string().starts_with("Detection failed: "));

    let draw: PredictError = OutputError::Draw(DrawError::MalformedCorners { index: 0, count: 2 }).into();
    assert!(matches!(draw, PredictError::Draw(_)));
    assert_eq!(draw.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let encode: PredictError = OutputError::Frame(FrameError::Encode("empty".to_string())).into();
    assert!(matches!(encode, PredictError::Encode(_)));
    assert_eq!(encode.status(), StatusCode::INTERNAL_SERVER_ERROR);
  }
}
