// 该文件是 Yeshi （叶识） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{DetectItem, DetectResult, Labels};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_PADDING: i32 = 2;
const LINE_THICKNESS: i32 = 2;
const PALETTE_SIZE: usize = 20;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// 未指定字体时依次尝试的系统字体
const SYSTEM_FONT_PATHS: [&str; 3] = [
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("无法读取字体文件: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
  line_thickness: i32,
  colors: Vec<Rgb<u8>>,
}

/// 依次尝试系统字体；均不可用时只画边框
impl Default for Draw {
  fn default() -> Self {
    let font = SYSTEM_FONT_PATHS
      .iter()
      .map(Path::new)
      .filter(|path| path.exists())
      .find_map(|path| load_font(path).ok());
    if font.is_none() {
      warn!("未找到可用字体，标注将不包含文字");
    }

    Self::new(font)
  }
}

fn load_font(path: &Path) -> Result<FontArc, DrawError> {
  let data = std::fs::read(path)?;
  let font = FontArc::try_from_vec(data)?;
  debug!("加载字体: {}", path.display());
  Ok(font)
}

/// 生成 `n` 种不同色相的颜色
fn palette(n: usize) -> Vec<Rgb<u8>> {
  (0..n)
    .map(|i| hsv_to_rgb((i as f32 / n as f32) * 360.0, 0.8, 0.9))
    .collect()
}

/// HSV 转 RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

impl Draw {
  pub fn new(font: Option<FontArc>) -> Self {
    Self {
      font,
      font_size: LABEL_FONT_SIZE,
      line_thickness: LINE_THICKNESS,
      colors: palette(PALETTE_SIZE),
    }
  }

  pub fn from_font_file(path: impl AsRef<Path>) -> Result<Self, DrawError> {
    Ok(Self::new(Some(load_font(path.as_ref())?)))
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  pub fn color_of(&self, class_id: u32) -> Rgb<u8> {
    self.colors[class_id as usize % self.colors.len()]
  }

  pub fn draw_detections_on_image(&self, image: &mut RgbImage, result: &DetectResult, labels: &Labels) {
    for item in result.items.iter() {
      self.draw_bbox_with_label(image, item, labels);
    }
  }

  // bbox 为归一化坐标 [x_min, y_min, x_max, y_max]
  fn draw_bbox_with_label(&self, image: &mut RgbImage, item: &DetectItem, labels: &Labels) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let x_min = ((item.bbox[0] * w as f32).floor() as i32).clamp(0, w - 1);
    let y_min = ((item.bbox[1] * h as f32).floor() as i32).clamp(0, h - 1);
    let x_max = ((item.bbox[2] * w as f32).ceil() as i32).clamp(0, w - 1);
    let y_max = ((item.bbox[3] * h as f32).ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let color = self.color_of(item.class_id);

    // 向内加粗边框
    for t in 0..self.line_thickness {
      let box_w = x_max - x_min + 1 - 2 * t;
      let box_h = y_max - y_min + 1 - 2 * t;
      if box_w <= 0 || box_h <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(box_w as u32, box_h as u32);
      draw_hollow_rect_mut(image, rect, color);
    }

    let Some(font) = &self.font else {
      return;
    };

    let label = format!("{} {:.2}", labels.label(item.class_id), item.score);
    let scale = PxScale::from(self.font_size);
    let (text_w, text_h) = text_size(scale, font, &label);

    // 标签背景放在边框上方，超出顶部时贴边
    let bar_h = text_h as i32 + 2 * LABEL_TEXT_PADDING;
    let bar_w = (text_w as i32 + 2 * LABEL_TEXT_PADDING).min(w - x_min);
    let bar_y = (y_min - bar_h).max(0);

    if bar_w > 0 && bar_h > 0 {
      let rect = Rect::at(x_min, bar_y).of_size(bar_w as u32, bar_h as u32);
      draw_filled_rect_mut(image, rect, color);
      draw_text_mut(
        image,
        TEXT_COLOR,
        x_min + LABEL_TEXT_PADDING,
        bar_y + LABEL_TEXT_PADDING,
        scale,
        font,
        &label,
      );
    }
  }
}

/// 以文本形式记录检测结果
pub struct Record {
  pub label_with_name: bool,
}

impl Record {
  pub fn format(&self, result: &DetectResult, labels: &Labels) -> String {
    result
      .items
      .iter()
      .map(|item| {
        let name = if self.label_with_name {
          labels.label(item.class_id).into_owned()
        } else {
          item.class_id.to_string()
        };
        format!(
          "{}, {:.4}, {:.4}, {:.4}, {:.4}, {:.4}",
          name, item.score, item.bbox[0], item.bbox[1], item.bbox[2], item.bbox[3]
        )
      })
      .collect::<Vec<_>>()
      .join("\n")
  }

  pub fn record(
    &self,
    result: &DetectResult,
    labels: &Labels,
    path: &Path,
  ) -> Result<(), std::io::Error> {
    std::fs::write(path.with_extension("txt"), self.format(result, labels))
  }
}
