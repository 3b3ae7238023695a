// 该文件是 Yeshi （叶识） 项目的一部分。
// src/frame.rs - NHWC 帧定义
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

use image::{Rgb, RgbImage};

const RGB_CHANNELS: usize = 3;

/// 解码后的 RGB 图像，按 高 × 宽 × 通道 排列
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbFrame {
  width: u32,
  height: u32,
  data: Box<[u8]>,
}

impl RgbFrame {
  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn is_empty(&self) -> bool {
    self.width == 0 || self.height == 0
  }

  pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
    let idx = (y as usize * self.width as usize + x as usize) * RGB_CHANNELS;
    [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
  }

  pub fn to_rgb_image(&self) -> RgbImage {
    RgbImage::from_fn(self.width, self.height, |x, y| Rgb(self.pixel(x, y)))
  }
}

impl From<RgbImage> for RgbFrame {
  fn from(image: RgbImage) -> Self {
    let (width, height) = image.dimensions();
    // RgbImage 本身就是 NHWC 排列
    Self {
      width,
      height,
      data: image.into_raw().into_boxed_slice(),
    }
  }
}
