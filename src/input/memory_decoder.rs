// 该文件是 Yeshi （叶识） 项目的一部分。
// src/input/memory_decoder.rs - 内存图像解码
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

use std::io::Cursor;

use image::ImageReader;
use thiserror::Error;
use tracing::debug;

use super::{ImageDecoder, UploadedFile};
use crate::frame::RgbFrame;

pub const DEFAULT_MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("file is empty")]
  Empty,
  #[error("file is too large: {0} bytes (max: {1} bytes)")]
  TooLarge(usize, usize),
  #[error("unsupported or unrecognized image format")]
  UnknownFormat,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("{0}")]
  Image(#[from] image::ImageError),
}

/// 从内存中的文件内容解码，格式由内容嗅探
#[derive(Debug, Clone)]
pub struct MemoryDecoder {
  max_bytes: usize,
}

impl Default for MemoryDecoder {
  fn default() -> Self {
    Self {
      max_bytes: DEFAULT_MAX_IMAGE_BYTES,
    }
  }
}

impl MemoryDecoder {
  pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
    self.max_bytes = max_bytes;
    self
  }

  pub fn max_bytes(&self) -> usize {
    self.max_bytes
  }
}

impl ImageDecoder for MemoryDecoder {
  type Error = DecodeError;

  fn decode(&self, file: &UploadedFile) -> Result<RgbFrame, Self::Error> {
    if file.is_empty() {
      return Err(DecodeError::Empty);
    }
    if file.len() > self.max_bytes {
      return Err(DecodeError::TooLarge(file.len(), self.max_bytes));
    }

    let reader = ImageReader::new(Cursor::new(file.data())).with_guessed_format()?;
    let format = reader.format().ok_or(DecodeError::UnknownFormat)?;
    debug!("文件 {} 格式: {:?}", file.name(), format);

    let image = reader.decode()?.to_rgb8();
    debug!(
      "文件 {} 解码完成: {}x{}",
      file.name(),
      image.width(),
      image.height()
    );

    Ok(RgbFrame::from(image))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{ImageFormat, Rgb, RgbImage, RgbaImage};

  fn encode(image: &RgbImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, format).unwrap();
    buf.into_inner()
  }

  #[test]
  fn decodes_png_and_jpeg() {
    let image = RgbImage::from_pixel(8, 6, Rgb([40, 160, 60]));
    let decoder = MemoryDecoder::default();

    let png = decoder
      .decode(&UploadedFile::new("leaf.png", encode(&image, ImageFormat::Png)))
      .unwrap();
    assert_eq!((png.width(), png.height()), (8, 6));
    assert_eq!(png.pixel(3, 3), [40, 160, 60]);

    let jpeg = decoder
      .decode(&UploadedFile::new("leaf.jpg", encode(&image, ImageFormat::Jpeg)))
      .unwrap();
    assert_eq!((jpeg.width(), jpeg.height()), (8, 6));
  }

  #[test]
  fn alpha_channel_is_dropped() {
    let image = RgbaImage::from_pixel(2, 2, image::Rgba([1, 2, 3, 128]));
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png).unwrap();

    let frame = MemoryDecoder::default()
      .decode(&UploadedFile::new("a.png", buf.into_inner()))
      .unwrap();
    assert_eq!(frame.to_rgb_image().as_raw().len(), 2 * 2 * 3);
    assert_eq!(frame.pixel(1, 1), [1, 2, 3]);
  }

  #[test]
  fn rejects_empty_and_oversized() {
    let decoder = MemoryDecoder::default().with_max_bytes(4);
    assert!(matches!(
      decoder.decode(&UploadedFile::new("empty.jpg", Vec::new())),
      Err(DecodeError::Empty)
    ));
    assert!(matches!(
      decoder.decode(&UploadedFile::new("big.jpg", vec![0u8; 5])),
      Err(DecodeError::TooLarge(5, 4))
    ));
  }

  #[test]
  fn unknown_bytes_are_rejected() {
    let err = MemoryDecoder::default()
      .decode(&UploadedFile::new("notes.txt", &b"just some text"[..]))
      .unwrap_err();
    assert!(matches!(err, DecodeError::UnknownFormat));
  }

  #[test]
  fn truncated_png_is_an_image_error() {
    let image = RgbImage::from_pixel(16, 16, Rgb([0, 0, 0]));
    let mut data = encode(&image, ImageFormat::Png);
    data.truncate(data.len() / 2);

    let err = MemoryDecoder::default()
      .decode(&UploadedFile::new("corrupt.png", data))
      .unwrap_err();
    assert!(matches!(err, DecodeError::Image(_)));
  }
}
