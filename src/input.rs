// 该文件是 Yeshi （叶识） 项目的一部分。
// src/input.rs - 上传文件与图像解码
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

use bytes::Bytes;

use crate::frame::RgbFrame;

/// 一次提交中的单个上传文件：显示名称加只读内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
  name: String,
  data: Bytes,
}

impl UploadedFile {
  pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
    Self {
      name: name.into(),
      data: data.into(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn data(&self) -> &[u8] {
    &self.data
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }
}

pub trait ImageDecoder {
  type Error;
  fn decode(&self, file: &UploadedFile) -> Result<RgbFrame, Self::Error>;
}

impl<D: ImageDecoder + ?Sized> ImageDecoder for &D {
  type Error = D::Error;

  fn decode(&self, file: &UploadedFile) -> Result<RgbFrame, Self::Error> {
    (**self).decode(file)
  }
}

mod memory_decoder;
pub use self::memory_decoder::{DEFAULT_MAX_IMAGE_BYTES, DecodeError, MemoryDecoder};

mod read_image_file;
pub use self::read_image_file::{ImageFileInputError, display_name};
