// 该文件是 Yeshi （叶识） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use std::{
  collections::HashSet,
  path::{Path, PathBuf},
  sync::{Mutex, PoisonError},
};

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{AnnotatedImage, Labels},
  output::{Render, draw::Record},
};

/// 将标注图像以 `<文件名>.png` 写入目录，可选地附带 `<文件名>.txt` 检测记录
///
/// 文件名保留原扩展名（`leaf.jpg` -> `leaf.jpg.png`）；同一输出中重名时追加序号。
pub struct SaveImageFileOutput {
  dir: PathBuf,
  record: Option<Record>,
  labels: Labels,
  written: Mutex<HashSet<PathBuf>>,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(SaveImageFileOutput::new(uri.path()))
  }
}

impl SaveImageFileOutput {
  pub fn new(dir: impl AsRef<Path>) -> Self {
    Self {
      dir: dir.as_ref().to_path_buf(),
      record: None,
      labels: Labels::default(),
      written: Mutex::new(HashSet::new()),
    }
  }

  pub fn with_record(mut self, record: Record, labels: Labels) -> Self {
    self.record = Some(record);
    self.labels = labels;
    self
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  fn target_path(&self, name: &str) -> PathBuf {
    let base = Path::new(name)
      .file_name()
      .map(|s| s.to_string_lossy().into_owned())
      .filter(|s| !s.is_empty())
      .unwrap_or_else(|| "image".to_string());

    let mut written = self.written.lock().unwrap_or_else(PoisonError::into_inner);
    let mut path = self.dir.join(format!("{}.png", base));
    let mut index = 1;
    while !written.insert(path.clone()) {
      index += 1;
      path = self.dir.join(format!("{}-{}.png", base, index));
    }
    path
  }
}

impl Render for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, name: &str, annotated: &AnnotatedImage) -> Result<(), Self::Error> {
    std::fs::create_dir_all(&self.dir)?;

    let path = self.target_path(name);
    annotated.image.save(&path)?;
    if let Some(record) = &self.record {
      record.record(&annotated.result, &self.labels, &path)?;
    }

    info!("保存图像到文件: {}", path.display());
    Ok(())
  }
}
