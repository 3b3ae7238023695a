// 该文件是 Yeshi （叶识） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use super::UploadedFile;

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("无法读取文件 {0}: {1}")]
  IoError(PathBuf, std::io::Error),
}

impl UploadedFile {
  /// 从磁盘读取文件，显示名称取文件名
  pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ImageFileInputError> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|e| ImageFileInputError::IoError(path.into(), e))?;
    debug!("读取文件 {} ({} 字节)", path.display(), data.len());

    Ok(UploadedFile::new(display_name(path), data))
  }
}

/// 路径对应的显示名称：文件名，没有文件名时使用完整路径
pub fn display_name(path: impl AsRef<Path>) -> String {
  let path = path.as_ref();
  path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn name_is_the_file_name() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("leaf1.jpg");
    std::fs::write(&path, b"abc").unwrap();

    let file = UploadedFile::from_path(&path).unwrap();
    assert_eq!(file.name(), "leaf1.jpg");
    assert_eq!(file.data(), b"abc");
  }

  #[test]
  fn missing_file_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.png");
    let err = UploadedFile::from_path(&missing).unwrap_err();
    assert!(err.to_string().contains("nope.png"));
  }

  #[test]
  fn display_name_drops_directories() {
    assert_eq!(display_name("/data/leaves/oak.jpg"), "oak.jpg");
    assert_eq!(display_name("/"), "/");
  }
}
