// 该文件是 Guanggao （广告牌检测） 项目的一部分。
// src/server/routes.rs - HTTP 请求处理
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

use std::time::Instant;

use axum::Json;
use axum::body::Bytes;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::http::{HeaderValue, header};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use tracing::{debug, info, info_span};

use super::error::PredictError;
use super::state::AppState;
use crate::frame::decode_image;
use crate::output::{AnnotatedImage, Render};

const FILE_FIELD: &str = "file";
const OUTPUT_PREFIX: &str = "processed_";
const FALLBACK_FILENAME: &str = "image";

/// 上传的文件
struct Upload {
  filename: String,
  bytes: Bytes,
}

/// 从 multipart 表单中取出 `file` 字段
async fn read_upload(multipart: Result<Multipart, MultipartRejection>) -> Result<Upload, PredictError> {
  let mut multipart = multipart.map_err(|rejection| {
    debug!("请求不是 multipart 表单: {}", rejection);
    PredictError::MissingInput("No file provided")
  })?;

  while let Some(field) = multipart.next_field().await? {
    if field.name() != Some(FILE_FIELD) {
      continue;
    }
    let filename = field.file_name().unwrap_or_default().to_string();
    if filename.is_empty() {
      return Err(PredictError::MissingInput("No file selected"));
    }
    let bytes = field.bytes().await?;
    if bytes.is_empty() {
      return Err(PredictError::MissingInput("Empty file"));
    }
    return Ok(Upload { filename, bytes });
  }

  Err(PredictError::MissingInput("No file provided"))
}

/// 解码、检测、绘制、编码，全部为 CPU 密集操作
fn process(state: &AppState, bytes: &[u8]) -> Result<AnnotatedImage, PredictError> {
  let started = Instant::now();
  let image = decode_image(bytes)?;
  debug!(
    "解码完成: {}x{}，耗时 {:.2?}",
    image.width(),
    image.height(),
    started.elapsed()
  );

  let started = Instant::now();
  let detections = state.detector.infer(&image)?;
  info!(
    "检测完成: {} 个广告牌，耗时 {:.2?}",
    detections.len(),
    started.elapsed()
  );

  let started = Instant::now();
  let rendered = state.output.render_result(&image, &detections)?;
  debug!(
    "绘制与编码完成: {} 字节，耗时 {:.2?}",
    rendered.bytes.len(),
    started.elapsed()
  );
  Ok(rendered)
}

pub async fn predict(
  State(state): State<AppState>,
  multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, PredictError> {
  let upload = read_upload(multipart).await?;
  let span = info_span!("predict", file = %upload.filename, size = upload.bytes.len());

  let worker_state = state.clone();
  let worker_span = span.clone();
  let bytes = upload.bytes;
  let rendered = tokio::task::spawn_blocking(move || {
    let _guard = worker_span.enter();
    process(&worker_state, &bytes)
  })
  .await
  .map_err(|err| PredictError::Internal(err.to_string()))??;

  let disposition = HeaderValue::from_str(&content_disposition(&upload.filename))
    .map_err(|err| PredictError::Internal(err.to_string()))?;
  info!(parent: &span, "返回处理结果: {}", rendered.format.mime_type());

  Ok(
    (
      [
        (
          header::CONTENT_TYPE,
          HeaderValue::from_static(rendered.format.mime_type()),
        ),
        (header::CONTENT_DISPOSITION, disposition),
      ],
      rendered.bytes,
    )
      .into_response(),
  )
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
  Json(json!({
    "status": "ok",
    "model": state.model_name,
  }))
}

/// 只保留路径的最后一段，去掉引号与控制字符
pub fn sanitize_filename(name: &str) -> String {
  let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
  let cleaned: String = base
    .chars()
    .filter(|c| !c.is_control() && *c != '"')
    .collect();
  let cleaned = cleaned.trim();
  if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
    FALLBACK_FILENAME.to_string()
  } else {
    cleaned.to_string()
  }
}

/// `attachment; filename="processed_x.jpg"; filename*=UTF-8''processed_x.jpg`
///
/// `filename` 只含 ASCII，非 ASCII 字符以 `_` 代替；完整名称放在 `filename*` 中。
pub fn content_disposition(name: &str) -> String {
  let output_name = format!("{}{}", OUTPUT_PREFIX, sanitize_filename(name));
  let ascii: String = output_name
    .chars()
    .map(|c| if c.is_ascii() { c } else { '_' })
    .collect();
  format!(
    "attachment; filename=\"{}\"; filename*=UTF-8''{}",
    ascii,
    urlencoding::encode(&output_name)
  )
}
