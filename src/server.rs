// 该文件是 Guanggao （广告牌检测） 项目的一部分。
// src/server.rs - HTTP 服务
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

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

pub mod error;
pub mod routes;
pub mod state;

pub use self::error::PredictError;
pub use self::state::AppState;

/// 默认上传大小上限
pub const DEFAULT_BODY_LIMIT: usize = 32 * 1024 * 1024;

/// 静态资源与请求体配置
#[derive(Debug, Clone)]
pub struct ServeConfig {
  pub static_dir: PathBuf,
  pub index: PathBuf,
  pub body_limit: usize,
}

impl Default for ServeConfig {
  fn default() -> Self {
    Self {
      static_dir: PathBuf::from("static"),
      index: PathBuf::from("templates/index.html"),
      body_limit: DEFAULT_BODY_LIMIT,
    }
  }
}

/// 构建完整的路由
///
/// `/static/imgs/*` 由 `/static` 目录服务覆盖。
pub fn router(state: AppState, config: &ServeConfig) -> Router {
  Router::new()
    .route("/predict", post(routes::predict))
    .route("/health", get(routes::health))
    .route_service("/", ServeFile::new(&config.index))
    .nest_service("/models", ServeDir::new(config.static_dir.join("models")))
    .nest_service("/static", ServeDir::new(&config.static_dir))
    .layer(DefaultBodyLimit::max(config.body_limit))
    .layer(CorsLayer::permissive())
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}
