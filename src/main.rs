// 该文件是 Guanggao （广告牌检测） 项目的一部分。
// src/main.rs - 服务主程序
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

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use guanggao::FromUrl;
use guanggao::args::Args;
use guanggao::model::{BillboardLabel, SharedDetector, YoloObbBuilder};
use guanggao::output::AnnotateOutput;
use guanggao::output::draw::{Draw, load_font};
use guanggao::server::{AppState, ServeConfig, router};

fn load_detector(args: &Args) -> Result<SharedDetector> {
  let mut builder = YoloObbBuilder::from_url(&args.model)
    .with_context(|| format!("无法解析模型地址 {}", args.model))?;
  if let Some(threshold) = args.confidence {
    builder = builder.confidence(threshold);
  }
  if let Some(threshold) = args.nms_threshold {
    builder = builder.nms_threshold(threshold);
  }

  info!("正在加载模型: {}", builder.model_path());
  let now = Instant::now();
  let model = builder
    .build::<BillboardLabel>()
    .context("模型加载失败")?;
  info!("模型加载完成，耗时: {:.2?}", now.elapsed());
  Ok(Arc::new(model))
}

fn load_output(args: &Args) -> Result<AnnotateOutput> {
  let font = if args.no_labels {
    None
  } else {
    load_font(args.font.as_deref()).context("标签字体加载失败")?
  };
  let draw = Draw::new(font).with_labels(!args.no_labels);
  Ok(AnnotateOutput::new(draw, args.output_format()))
}

async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(err) = tokio::signal::ctrl_c().await {
      warn!("无法监听 Ctrl-C: {}", err);
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
      Ok(mut signal) => {
        signal.recv().await;
      }
      Err(err) => {
        warn!("无法监听 SIGTERM: {}", err);
        std::future::pending::<()>().await;
      }
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => {},
    _ = terminate => {},
  }
  info!("收到退出信号，正在关闭服务...");
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse();

  info!("Guanggao 广告牌检测服务");
  info!("模型地址: {}", args.model);
  info!("静态资源目录: {}", args.static_dir.display());
  info!("输出格式: {}", args.output_format().mime_type());

  let detector = load_detector(&args)?;
  let output = load_output(&args)?;
  let state = AppState::new(detector, output, args.model.to_string());

  let config = ServeConfig {
    static_dir: args.static_dir.clone(),
    index: args.index.clone(),
    body_limit: args.max_upload_bytes(),
  };
  let app = router(state, &config);

  let listener = tokio::net::TcpListener::bind(args.listen)
    .await
    .with_context(|| format!("无法监听 {}", args.listen))?;
  info!("服务已启动: http://{}", args.listen);

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("服务异常退出")?;

  info!("服务已停止");
  Ok(())
}
