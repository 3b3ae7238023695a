// 该文件是 Yeshi （叶识） 项目的一部分。
// src/model.rs - 模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::sync::Arc;

use image::RgbImage;
use thiserror::Error;
use tracing::debug;

use crate::{frame::RgbFrame, output::draw::Draw};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，归一化坐标
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

/// 带有检测框和标签的图像
#[derive(Debug, Clone)]
pub struct AnnotatedImage {
  pub image: RgbImage,
  pub result: DetectResult,
}

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("invalid input image: {0}")]
  InvalidInput(String),
  #[error(transparent)]
  Model(Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl DetectError {
  pub fn model<E: std::error::Error + Send + Sync + 'static>(e: E) -> Self {
    DetectError::Model(Box::new(e))
  }
}

/// 检测能力：输入像素，输出标注后的图像
pub trait Detector: Send + Sync {
  fn detect(&self, image: &RgbFrame) -> Result<AnnotatedImage, DetectError>;
}

impl<T: Detector + ?Sized> Detector for Box<T> {
  fn detect(&self, image: &RgbFrame) -> Result<AnnotatedImage, DetectError> {
    (**self).detect(image)
  }
}

impl<T: Detector + ?Sized> Detector for Arc<T> {
  fn detect(&self, image: &RgbFrame) -> Result<AnnotatedImage, DetectError> {
    (**self).detect(image)
  }
}

/// 将任意检测模型与绘制工具组合成 [`Detector`]
///
/// 默认的绘制工具不带字体，只画边框；需要文字时通过 [`AnnotatingDetector::with_draw`] 指定。
pub struct AnnotatingDetector<M> {
  model: M,
  labels: Labels,
  draw: Draw,
}

impl<M> AnnotatingDetector<M> {
  pub fn new(model: M) -> Self {
    Self {
      model,
      labels: Labels::default(),
      draw: Draw::new(None),
    }
  }

  pub fn with_labels(mut self, labels: Labels) -> Self {
    self.labels = labels;
    self
  }

  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  pub fn model(&self) -> &M {
    &self.model
  }

  pub fn labels(&self) -> &Labels {
    &self.labels
  }

  pub fn draw(&self) -> &Draw {
    &self.draw
  }
}

impl<M, E> Detector for AnnotatingDetector<M>
where
  M: Model<Input = RgbFrame, Output = DetectResult, Error = E> + Send + Sync,
  E: std::error::Error + Send + Sync + 'static,
{
  fn detect(&self, image: &RgbFrame) -> Result<AnnotatedImage, DetectError> {
    if image.is_empty() {
      return Err(DetectError::InvalidInput(format!(
        "image has zero size ({}x{})",
        image.width(),
        image.height()
      )));
    }

    let result = self.model.infer(image).map_err(DetectError::model)?;
    debug!("检测到 {} 个物体", result.len());

    let mut canvas = image.to_rgb_image();
    self.draw.draw_detections_on_image(&mut canvas, &result, &self.labels);

    Ok(AnnotatedImage {
      image: canvas,
      result,
    })
  }
}

mod labels;
pub use self::labels::{Labels, LabelsError};

#[cfg(feature = "model_yolo")]
mod yolo;
#[cfg(feature = "model_yolo")]
pub use self::yolo::{Yolo, YoloBuilder, YoloError, YoloParams};

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  struct FixedModel(Vec<DetectItem>);

  #[derive(Error, Debug)]
  #[error("tensor shape mismatch")]
  struct ShapeError;

  impl Model for FixedModel {
    type Input = RgbFrame;
    type Output = DetectResult;
    type Error = ShapeError;

    fn infer(&self, _input: &RgbFrame) -> Result<DetectResult, ShapeError> {
      Ok(self.0.clone().into())
    }
  }

  struct FailingModel;

  impl Model for FailingModel {
    type Input = RgbFrame;
    type Output = DetectResult;
    type Error = ShapeError;

    fn infer(&self, _input: &RgbFrame) -> Result<DetectResult, ShapeError> {
      Err(ShapeError)
    }
  }

  fn gray_frame(w: u32, h: u32) -> RgbFrame {
    RgbFrame::from(RgbImage::from_pixel(w, h, Rgb([128, 128, 128])))
  }

  #[test]
  fn annotation_draws_over_a_copy() {
    let item = DetectItem {
      class_id: 0,
      score: 0.9,
      bbox: [0.25, 0.25, 0.75, 0.75],
    };
    let detector = AnnotatingDetector::new(FixedModel(vec![item.clone()]));
    let frame = gray_frame(64, 64);

    let annotated = detector.detect(&frame).unwrap();
    assert_eq!(annotated.result.items.as_ref(), &[item]);
    assert_eq!(annotated.image.dimensions(), (64, 64));
    assert_ne!(annotated.image, frame.to_rgb_image());
    // 原始帧保持不变
    assert_eq!(frame.pixel(16, 16), [128, 128, 128]);
  }

  #[test]
  fn default_draw_has_no_font() {
    let detector = AnnotatingDetector::new(FixedModel(Vec::new()));
    assert!(!detector.draw().has_font());
  }

  #[test]
  fn no_detections_leaves_pixels_untouched() {
    let detector = AnnotatingDetector::new(FixedModel(Vec::new()));
    let frame = gray_frame(10, 10);
    let annotated = detector.detect(&frame).unwrap();
    assert!(annotated.result.is_empty());
    assert_eq!(annotated.image, frame.to_rgb_image());
  }

  #[test]
  fn model_failure_keeps_its_message() {
    let detector = AnnotatingDetector::new(FailingModel);
    let err = detector.detect(&gray_frame(4, 4)).unwrap_err();
    assert_eq!(err.to_string(), "tensor shape mismatch");
  }

  #[test]
  fn empty_frame_is_invalid_input() {
    let detector = AnnotatingDetector::new(FixedModel(Vec::new()));
    let err = detector.detect(&RgbFrame::from(RgbImage::new(0, 0))).unwrap_err();
    assert!(matches!(err, DetectError::InvalidInput(_)));
  }
}
