// 该文件是 Yeshi （叶识） 项目的一部分。
// src/model/labels.rs - 类别标签
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{borrow::Cow, path::Path};

use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum LabelsError {
  #[error("无法读取标签文件: {0}")]
  IoError(#[from] std::io::Error),
}

/// 类别名称表，下标即类别编号
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Labels {
  names: Vec<String>,
}

impl Labels {
  pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
    Self {
      names: names.into_iter().map(Into::into).collect(),
    }
  }

  /// 每行一个类别名称，忽略空行
  pub fn parse(text: &str) -> Self {
    Self::new(
      text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty()),
    )
  }

  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LabelsError> {
    let labels = Self::parse(&std::fs::read_to_string(path.as_ref())?);
    info!(
      "加载标签文件: {} ({} 个类别)",
      path.as_ref().display(),
      labels.len()
    );
    Ok(labels)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn label(&self, class_id: u32) -> Cow<'_, str> {
    match self.names.get(class_id as usize) {
      Some(name) => Cow::Borrowed(name),
      None => Cow::Owned(format!("class {}", class_id)),
    }
  }
}
