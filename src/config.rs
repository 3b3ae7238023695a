// 该文件是 Yeshi （叶识） 项目的一部分。
// src/config.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use clap::Args;
use url::Url;

use crate::{input::DEFAULT_MAX_IMAGE_BYTES, model::Labels, output::draw::Draw};

/// 检测模型相关参数，供各个可执行程序复用
#[derive(Args, Debug, Clone)]
pub struct DetectorArgs {
  /// 模型地址，例如 yolo:///models/leaf.onnx
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 类别标签文件（每行一个名称）
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,

  /// 标注文字使用的 TTF 字体
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.25", value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.45", value_name = "THRESHOLD")]
  pub iou: f32,

  /// 模型输入边长
  #[arg(
    long,
    default_value = "640",
    value_name = "PIXELS",
    value_parser = clap::value_parser!(u32).range(1..)
  )]
  pub input_size: u32,

  /// 单张图像最多保留的检测框数量
  #[arg(long, default_value = "100", value_name = "COUNT")]
  pub max_detections: usize,

  /// 推理线程数
  #[arg(long, default_value = "4", value_name = "COUNT")]
  pub threads: usize,

  /// 单个图像文件的最大字节数
  #[arg(long, default_value_t = DEFAULT_MAX_IMAGE_BYTES, value_name = "BYTES")]
  pub max_image_bytes: usize,
}

impl DetectorArgs {
  pub fn load_labels(&self) -> Result<Labels, crate::model::LabelsError> {
    match &self.labels {
      Some(path) => Labels::from_file(path),
      None => Ok(Labels::default()),
    }
  }

  pub fn load_draw(&self) -> Result<Draw, crate::output::draw::DrawError> {
    match &self.font {
      Some(path) => Draw::from_font_file(path),
      None => Ok(Draw::default()),
    }
  }

  #[cfg(feature = "model_yolo")]
  pub fn yolo_builder(&self) -> Result<crate::model::YoloBuilder, crate::model::YoloError> {
    use crate::FromUrl;

    Ok(
      crate::model::YoloBuilder::from_url(&self.model)?
        .input_size(self.input_size)
        .confidence_threshold(self.confidence)
        .iou_threshold(self.iou)
        .max_detections(self.max_detections)
        .intra_threads(self.threads),
    )
  }

  /// 加载模型、标签与字体，组合成可直接使用的检测器
  #[cfg(feature = "model_yolo")]
  pub fn build_detector(
    &self,
  ) -> anyhow::Result<crate::model::AnnotatingDetector<crate::model::Yolo>> {
    let model = self.yolo_builder()?.build()?;
    Ok(
      crate::model::AnnotatingDetector::new(model)
        .with_labels(self.load_labels()?)
        .with_draw(self.load_draw()?),
    )
  }
}
