// 该文件是 Yeshi （叶识） 项目的一部分。
// src/server.rs - 网页上传与检测接口
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

use std::{io::Cursor, sync::Arc};

use axum::{
  Json, Router,
  extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartError},
  response::Html,
  routing::{get, post},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
  batch::{BatchError, BatchOrchestrator, BatchResult},
  input::{MemoryDecoder, UploadedFile},
  model::{AnnotatedImage, Detector},
};

const INDEX_HTML: &str = include_str!("server/index.html");

/// 表单中上传文件字段的名称
pub const UPLOAD_FIELD: &str = "files";
pub const DEFAULT_BODY_LIMIT: usize = 64 * 1024 * 1024;

pub type SharedOrchestrator = Arc<BatchOrchestrator<MemoryDecoder, Arc<dyn Detector>>>;

#[derive(Error, Debug)]
pub enum ServerError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

#[derive(Clone)]
pub struct AppState {
  orchestrator: SharedOrchestrator,
}

impl AppState {
  pub fn new(decoder: MemoryDecoder, detector: Arc<dyn Detector>) -> Self {
    Self {
      orchestrator: Arc::new(BatchOrchestrator::new(decoder, detector)),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryImage {
  pub name: String,
  pub detections: usize,
  pub data_url: String,
}

/// 页面所需的全部输出：图库与错误信息，二者不会同时非空
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectResponse {
  pub images: Vec<GalleryImage>,
  pub error: Option<String>,
}

impl DetectResponse {
  pub fn failed(error: &BatchError) -> Self {
    Self {
      images: Vec::new(),
      error: Some(error.to_string()),
    }
  }

  /// `names` 与批次输入一一对应
  pub fn from_batch(result: BatchResult, names: &[String]) -> Self {
    let annotated = match result {
      Ok(annotated) => annotated,
      Err(e) => return Self::failed(&e),
    };

    let mut images = Vec::with_capacity(annotated.len());
    for (name, image) in names.iter().zip(&annotated) {
      match encode_png_data_url(image) {
        Ok(data_url) => images.push(GalleryImage {
          name: name.clone(),
          detections: image.result.len(),
          data_url,
        }),
        Err(e) => return Self::failed(&BatchError::unexpected(e)),
      }
    }

    Self {
      images,
      error: None,
    }
  }
}

fn encode_png_data_url(annotated: &AnnotatedImage) -> Result<String, image::ImageError> {
  let mut buf = Cursor::new(Vec::new());
  annotated.image.write_to(&mut buf, ImageFormat::Png)?;
  Ok(format!("data:image/png;base64,{}", STANDARD.encode(buf.into_inner())))
}

pub fn router(state: AppState, body_limit: usize) -> Router {
  Router::new()
    .route("/", get(index_handler))
    .route("/api/detect", post(detect_handler))
    .route("/health", get(health_handler))
    .layer(DefaultBodyLimit::max(body_limit))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

pub async fn serve(listener: TcpListener, app: Router) -> Result<(), ServerError> {
  info!("服务监听于 http://{}", listener.local_addr()?);
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;
  info!("服务已停止");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    warn!("无法监听中断信号: {}", e);
    std::future::pending::<()>().await;
  }
  info!("收到中断信号，准备退出...");
}

async fn index_handler() -> Html<&'static str> {
  Html(INDEX_HTML)
}

async fn health_handler() -> Json<Value> {
  Json(json!({ "status": "ok" }))
}

async fn detect_handler(State(state): State<AppState>, multipart: Multipart) -> Json<DetectResponse> {
  let files = match collect_uploads(multipart).await {
    Ok(files) => files,
    Err(e) => {
      warn!("读取上传内容失败: {}", e);
      return Json(DetectResponse::failed(&BatchError::unexpected(e)));
    }
  };

  Json(run_batch(state.orchestrator.clone(), files).await)
}

/// 收集 `files` 字段；浏览器在未选择文件时会提交一个无名空文件，予以忽略
async fn collect_uploads(mut multipart: Multipart) -> Result<Vec<UploadedFile>, MultipartError> {
  let mut files = Vec::new();
  while let Some(field) = multipart.next_field().await? {
    if field.name() != Some(UPLOAD_FIELD) {
      continue;
    }

    let name = field.file_name().unwrap_or_default().to_string();
    let data = field.bytes().await?;
    if name.is_empty() && data.is_empty() {
      continue;
    }

    let name = if name.is_empty() {
      format!("upload-{}", files.len() + 1)
    } else {
      name
    };
    files.push(UploadedFile::new(name, data));
  }

  Ok(files)
}

/// 在阻塞线程池中顺序处理整个批次并编码结果
async fn run_batch(orchestrator: SharedOrchestrator, files: Vec<UploadedFile>) -> DetectResponse {
  let names: Vec<String> = files.iter().map(|f| f.name().to_string()).collect();
  let task = tokio::task::spawn_blocking(move || {
    let result = orchestrator.process(Some(&files));
    DetectResponse::from_batch(result, &names)
  });

  match task.await {
    Ok(response) => response,
    Err(e) => {
      warn!("检测任务异常终止: {}", e);
      DetectResponse::failed(&BatchError::unexpected(e))
    }
  }
}
