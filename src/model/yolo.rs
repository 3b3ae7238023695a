// 该文件是 Yeshi （叶识） 项目的一部分。
// src/model/yolo.rs - YOLO ONNX 检测模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{
  cmp::Ordering,
  path::{Path, PathBuf},
  sync::{Mutex, MutexGuard, PoisonError},
};

use image::imageops::{self, FilterType};
use ndarray::{Array4, ArrayViewD, Axis, Ix2, s};
use ort::{
  session::{Session, builder::GraphOptimizationLevel},
  value::Value,
};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbFrame,
  model::{DetectItem, DetectResult, Model},
};

const YOLO_SCHEME: &str = "yolo";
const YOLO_DEFAULT_INPUT_SIZE: u32 = 640;
const YOLO_DEFAULT_CONF_THRESH: f32 = 0.25;
const YOLO_DEFAULT_IOU_THRESH: f32 = 0.45;
const YOLO_DEFAULT_MAX_DETECTIONS: usize = 100;
const YOLO_DEFAULT_INTRA_THREADS: usize = 4;
const YOLO_PAD_VALUE: f32 = 114.0 / 255.0;
// cx, cy, w, h
const YOLO_BOX_CHANNELS: usize = 4;

#[derive(Error, Debug)]
pub enum YoloError {
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型文件不存在: {0}")]
  ModelNotFound(PathBuf),
  #[error("模型输入边长必须大于 0")]
  ZeroInputSize,
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(String),
  #[error("模型输出形状异常: {0:?}")]
  UnexpectedOutputShape(Vec<usize>),
  #[error("张量形状错误: {0}")]
  ShapeError(#[from] ndarray::ShapeError),
}

impl YoloError {
  fn ort<E: std::fmt::Display>(e: E) -> Self {
    YoloError::OrtError(e.to_string())
  }
}

/// 后处理参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YoloParams {
  pub input_size: u32,
  pub confidence_threshold: f32,
  pub iou_threshold: f32,
  pub max_detections: usize,
}

impl Default for YoloParams {
  fn default() -> Self {
    Self {
      input_size: YOLO_DEFAULT_INPUT_SIZE,
      confidence_threshold: YOLO_DEFAULT_CONF_THRESH,
      iou_threshold: YOLO_DEFAULT_IOU_THRESH,
      max_detections: YOLO_DEFAULT_MAX_DETECTIONS,
    }
  }
}

pub struct Yolo {
  session: Mutex<Session>,
  input_name: String,
  params: YoloParams,
}

impl std::fmt::Debug for Yolo {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Yolo")
      .field("input_name", &self.input_name)
      .field("params", &self.params)
      .finish_non_exhaustive()
  }
}

pub struct YoloBuilder {
  model_path: PathBuf,
  params: YoloParams,
  intra_threads: usize,
}

impl FromUrlWithScheme for YoloBuilder {
  const SCHEME: &'static str = YOLO_SCHEME;
}

impl FromUrl for YoloBuilder {
  type Error = YoloError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(YoloError::ModelPathError(format!(
        "模型路径必须使用 {} 方案, 实际为 {}",
        Self::SCHEME,
        url.scheme()
      )));
    }
    if url.path().is_empty() {
      return Err(YoloError::ModelPathError(format!("模型路径为空: {}", url)));
    }

    Ok(YoloBuilder::new(url.path()))
  }
}

impl YoloBuilder {
  pub fn new(model_path: impl AsRef<Path>) -> Self {
    Self {
      model_path: model_path.as_ref().to_path_buf(),
      params: YoloParams::default(),
      intra_threads: YOLO_DEFAULT_INTRA_THREADS,
    }
  }

  pub fn input_size(mut self, input_size: u32) -> Self {
    self.params.input_size = input_size;
    self
  }

  pub fn confidence_threshold(mut self, threshold: f32) -> Self {
    self.params.confidence_threshold = threshold.clamp(0.0, 1.0);
    self
  }

  pub fn iou_threshold(mut self, threshold: f32) -> Self {
    self.params.iou_threshold = threshold.clamp(0.0, 1.0);
    self
  }

  pub fn max_detections(mut self, max_detections: usize) -> Self {
    self.params.max_detections = max_detections;
    self
  }

  pub fn intra_threads(mut self, threads: usize) -> Self {
    self.intra_threads = threads.max(1);
    self
  }

  pub fn model_path(&self) -> &Path {
    &self.model_path
  }

  pub fn params(&self) -> &YoloParams {
    &self.params
  }

  pub fn build(self) -> Result<Yolo, YoloError> {
    if self.params.input_size == 0 {
      return Err(YoloError::ZeroInputSize);
    }
    if !self.model_path.exists() {
      return Err(YoloError::ModelNotFound(self.model_path));
    }

    info!("加载模型文件: {}", self.model_path.display());
    let session = Session::builder()
      .map_err(YoloError::ort)?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(YoloError::ort)?
      .with_intra_threads(self.intra_threads)
      .map_err(YoloError::ort)?
      .commit_from_file(&self.model_path)
      .map_err(YoloError::ort)?;

    let input_name = session
      .inputs
      .first()
      .map(|input| input.name.clone())
      .unwrap_or_else(|| "images".to_string());
    debug!("模型输入: {}, 参数: {:?}", input_name, self.params);
    info!("模型加载完成");

    Ok(Yolo {
      session: Mutex::new(session),
      input_name,
      params: self.params,
    })
  }
}

impl Model for Yolo {
  type Input = RgbFrame;
  type Output = DetectResult;
  type Error = YoloError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    debug!("预处理输入 {}x{}", input.width(), input.height());
    let (tensor, letterbox) = letterbox(input, self.params.input_size);

    let mut session = lock_session(&self.session);

    debug!("执行模型推理");
    let input_value = Value::from_array(tensor).map_err(YoloError::ort)?;
    let outputs = session
      .run(ort::inputs![self.input_name.as_str() => input_value])
      .map_err(YoloError::ort)?;
    let output = outputs[0]
      .try_extract_array::<f32>()
      .map_err(YoloError::ort)?;
    debug!("模型输出形状: {:?}", output.shape());

    postprocess(output, &letterbox, &self.params)
  }
}

// 推理中途 panic 不会破坏会话本身，锁中毒后继续使用
fn lock_session<T>(session: &Mutex<T>) -> MutexGuard<'_, T> {
  session.lock().unwrap_or_else(|poisoned| {
    warn!("推理会话锁已中毒，继续使用");
    PoisonError::into_inner(poisoned)
  })
}

/// 等比缩放并居中填充时的变换参数，用于将检测框映射回原图
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
  scale: f32,
  pad_x: f32,
  pad_y: f32,
  width: f32,
  height: f32,
}

impl Letterbox {
  fn new(width: u32, height: u32, size: u32) -> Self {
    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
    let new_w = (width as f32 * scale).round();
    let new_h = (height as f32 * scale).round();
    Self {
      scale,
      pad_x: ((size as f32 - new_w) / 2.0).floor(),
      pad_y: ((size as f32 - new_h) / 2.0).floor(),
      width: width as f32,
      height: height as f32,
    }
  }

  // 模型输入坐标 -> 原图归一化坐标
  fn restore(&self, bbox: [f32; 4]) -> [f32; 4] {
    let x = |v: f32| ((v - self.pad_x) / self.scale / self.width).clamp(0.0, 1.0);
    let y = |v: f32| ((v - self.pad_y) / self.scale / self.height).clamp(0.0, 1.0);
    [x(bbox[0]), y(bbox[1]), x(bbox[2]), y(bbox[3])]
  }
}

fn letterbox(frame: &RgbFrame, size: u32) -> (Array4<f32>, Letterbox) {
  let lb = Letterbox::new(frame.width(), frame.height(), size);
  let new_w = ((frame.width() as f32 * lb.scale).round() as u32).clamp(1, size);
  let new_h = ((frame.height() as f32 * lb.scale).round() as u32).clamp(1, size);
  let resized = imageops::resize(&frame.to_rgb_image(), new_w, new_h, FilterType::Triangle);

  let size = size as usize;
  let mut tensor = Array4::from_elem((1, 3, size, size), YOLO_PAD_VALUE);
  let (off_x, off_y) = (lb.pad_x as usize, lb.pad_y as usize);
  for (x, y, pixel) in resized.enumerate_pixels() {
    let (tx, ty) = (x as usize + off_x, y as usize + off_y);
    if tx >= size || ty >= size {
      continue;
    }
    for c in 0..3 {
      tensor[[0, c, ty, tx]] = pixel[c] as f32 / 255.0;
    }
  }

  (tensor, lb)
}

/// 解析 `[1, 4 + 类别数, 锚点数]` 输出（也接受转置后的 `[1, 锚点数, 4 + 类别数]`）
fn postprocess(
  output: ArrayViewD<f32>,
  letterbox: &Letterbox,
  params: &YoloParams,
) -> Result<DetectResult, YoloError> {
  let shape = output.shape().to_vec();
  if shape.len() != 3 || shape[0] != 1 {
    return Err(YoloError::UnexpectedOutputShape(shape));
  }

  let view = output.index_axis(Axis(0), 0).into_dimensionality::<Ix2>()?;
  let preds = if shape[1] <= shape[2] {
    view
  } else {
    view.reversed_axes()
  };
  if preds.nrows() <= YOLO_BOX_CHANNELS {
    return Err(YoloError::UnexpectedOutputShape(shape));
  }

  let mut candidates = Vec::new();
  for column in preds.columns() {
    let (class_id, score) = column
      .slice(s![YOLO_BOX_CHANNELS..])
      .iter()
      .enumerate()
      .fold((0usize, f32::MIN), |best, (idx, &score)| {
        if score > best.1 { (idx, score) } else { best }
      });

    if score < params.confidence_threshold {
      continue;
    }

    let (cx, cy, w, h) = (column[0], column[1], column[2], column[3]);
    let bbox = letterbox.restore([cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0]);
    if bbox[0] >= bbox[2] || bbox[1] >= bbox[3] {
      continue;
    }

    candidates.push(DetectItem {
      class_id: class_id as u32,
      score,
      bbox,
    });
  }
  debug!("置信度过滤后候选框: {}", candidates.len());

  let mut items = nms(candidates, params.iou_threshold);
  items.truncate(params.max_detections);
  debug!("检测结果: {:?}", items);

  Ok(items.into())
}

/// 按类别的非极大值抑制
fn nms(mut detections: Vec<DetectItem>, iou_threshold: f32) -> Vec<DetectItem> {
  // 按置信度降序排序
  detections.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

  let mut result: Vec<DetectItem> = Vec::new();
  for det in detections {
    let suppressed = result
      .iter()
      .any(|kept| kept.class_id == det.class_id && iou(&kept.bbox, &det.bbox) >= iou_threshold);
    if !suppressed {
      result.push(det);
    }
  }

  result
}

/// 计算两个边界框的 IoU
fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  let union = area_a + area_b - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}
