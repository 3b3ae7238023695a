// 该文件是 Yeshi （叶识） 项目的一部分。
// src/batch.rs - 批量检测编排
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

//! 对一次提交的全部文件依次解码、检测并标注。
//!
//! 任意一个文件失败即终止整个批次，已完成的结果一并丢弃；
//! 批次结果要么是完整的有序图像序列，要么是唯一一条错误信息。

use std::{
  borrow::Cow,
  path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{error, info};

use crate::{
  input::{DecodeError, ImageDecoder, ImageFileInputError, UploadedFile, display_name},
  model::{AnnotatedImage, DetectError, Detector},
};

pub const NO_FILES_MESSAGE: &str = "No files were uploaded. Please upload one or more images.";

/// 单个文件的失败原因
#[derive(Error, Debug)]
pub enum FileError {
  #[error(transparent)]
  Read(#[from] ImageFileInputError),
  #[error(transparent)]
  Decode(#[from] DecodeError),
  #[error(transparent)]
  Detect(#[from] DetectError),
}

#[derive(Error, Debug)]
pub enum BatchError {
  #[error("No files were uploaded. Please upload one or more images.")]
  NoFiles,
  #[error("Error processing file {file_name}: {source}")]
  PerFile {
    file_name: String,
    #[source]
    source: FileError,
  },
  #[error("An unexpected error occurred: {0}")]
  Unexpected(String),
}

impl BatchError {
  pub fn unexpected(detail: impl std::fmt::Display) -> Self {
    BatchError::Unexpected(detail.to_string())
  }

  /// 出错文件名（仅单文件错误）
  pub fn file_name(&self) -> Option<&str> {
    match self {
      BatchError::PerFile { file_name, .. } => Some(file_name),
      _ => None,
    }
  }
}

pub type BatchResult = Result<Vec<AnnotatedImage>, BatchError>;

/// 批次中的一项：已在内存中的上传内容，或尚未读取的磁盘文件
trait BatchInput {
  fn name(&self) -> Cow<'_, str>;
  fn load(&self) -> Result<Cow<'_, UploadedFile>, FileError>;
}

impl BatchInput for UploadedFile {
  fn name(&self) -> Cow<'_, str> {
    Cow::Borrowed(UploadedFile::name(self))
  }

  fn load(&self) -> Result<Cow<'_, UploadedFile>, FileError> {
    Ok(Cow::Borrowed(self))
  }
}

impl BatchInput for PathBuf {
  fn name(&self) -> Cow<'_, str> {
    Cow::Owned(display_name(self))
  }

  // 轮到该文件时才读取，读取失败与解码失败一样按单文件错误处理
  fn load(&self) -> Result<Cow<'_, UploadedFile>, FileError> {
    Ok(Cow::Owned(UploadedFile::from_path(self)?))
  }
}

pub struct BatchOrchestrator<D, M> {
  decoder: D,
  detector: M,
}

impl<D, M> BatchOrchestrator<D, M>
where
  D: ImageDecoder<Error = DecodeError>,
  M: Detector,
{
  pub fn new(decoder: D, detector: M) -> Self {
    Self { decoder, detector }
  }

  pub fn detector(&self) -> &M {
    &self.detector
  }

  pub fn process_file(&self, file: &UploadedFile) -> Result<AnnotatedImage, FileError> {
    let frame = self.decoder.decode(file)?;
    let annotated = self.detector.detect(&frame)?;
    Ok(annotated)
  }

  pub fn process(&self, files: Option<&[UploadedFile]>) -> BatchResult {
    self.run(files.unwrap_or_default())
  }

  /// 依次读取并处理磁盘上的文件
  pub fn process_paths<P: AsRef<Path>>(&self, paths: &[P]) -> BatchResult {
    let paths: Vec<PathBuf> = paths.iter().map(|p| p.as_ref().to_path_buf()).collect();
    self.run(&paths)
  }

  fn run<T: BatchInput>(&self, inputs: &[T]) -> BatchResult {
    if inputs.is_empty() {
      info!("未上传任何文件");
      return Err(BatchError::NoFiles);
    }

    info!("开始批量检测，共 {} 个文件", inputs.len());
    let mut annotated_images = Vec::with_capacity(inputs.len());
    for (idx, input) in inputs.iter().enumerate() {
      let name = input.name();
      info!("处理第 {} 个文件: {}", idx + 1, name);
      match input.load().and_then(|file| self.process_file(&file)) {
        Ok(annotated) => {
          info!("文件 {} 检测到 {} 个物体", name, annotated.result.len());
          annotated_images.push(annotated);
        }
        Err(source) => {
          error!("文件 {} 处理失败: {}", name, source);
          return Err(BatchError::PerFile {
            file_name: name.into_owned(),
            source,
          });
        }
      }
    }

    info!("批量检测完成");
    Ok(annotated_images)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    frame::RgbFrame,
    input::MemoryDecoder,
    model::{DetectItem, DetectResult},
  };
  use image::{ImageFormat, Rgb, RgbImage};
  use std::{io::Cursor, sync::Mutex};

  /// 记录调用顺序；对指定宽度的图像报错
  #[derive(Default)]
  struct FakeDetector {
    fail_on_width: Option<u32>,
    seen: Mutex<Vec<u32>>,
  }

  impl Detector for FakeDetector {
    fn detect(&self, image: &RgbFrame) -> Result<AnnotatedImage, DetectError> {
      self.seen.lock().unwrap().push(image.width());
      if self.fail_on_width == Some(image.width()) {
        return Err(DetectError::InvalidInput("bad dimensions".into()));
      }
      Ok(AnnotatedImage {
        image: image.to_rgb_image(),
        result: DetectResult::from(vec![DetectItem {
          class_id: image.width(),
          score: 1.0,
          bbox: [0.0, 0.0, 1.0, 1.0],
        }]),
      })
    }
  }

  fn png(name: &str, width: u32) -> UploadedFile {
    let mut buf = Cursor::new(Vec::new());
    RgbImage::from_pixel(width, 3, Rgb([0, 128, 0]))
      .write_to(&mut buf, ImageFormat::Png)
      .unwrap();
    UploadedFile::new(name, buf.into_inner())
  }

  fn corrupt(name: &str) -> UploadedFile {
    UploadedFile::new(name, &b"\xff\xd8\xff\xe0 not really a jpeg"[..])
  }

  fn orchestrator(detector: FakeDetector) -> BatchOrchestrator<MemoryDecoder, FakeDetector> {
    BatchOrchestrator::new(MemoryDecoder::default(), detector)
  }

  #[test]
  fn absent_and_empty_inputs_report_no_files() {
    let orchestrator = orchestrator(FakeDetector::default());

    for files in [None, Some(&[][..])] {
      let err = orchestrator.process(files).unwrap_err();
      assert!(matches!(err, BatchError::NoFiles));
      assert_eq!(err.to_string(), NO_FILES_MESSAGE);
    }
    assert!(orchestrator.detector().seen.lock().unwrap().is_empty());
  }

  #[test]
  fn all_files_processed_in_order() {
    let orchestrator = orchestrator(FakeDetector::default());
    let files = [png("a.png", 5), png("b.png", 7), png("c.png", 6)];

    let images = orchestrator.process(Some(&files)).unwrap();
    let widths: Vec<u32> = images.iter().map(|i| i.image.width()).collect();
    assert_eq!(widths, vec![5, 7, 6]);
    assert_eq!(images[1].result.items[0].class_id, 7);
  }

  #[test]
  fn decode_failure_names_the_file() {
    let orchestrator = orchestrator(FakeDetector::default());
    let err = orchestrator.process(Some(&[corrupt("corrupt.jpg")])).unwrap_err();

    assert_eq!(err.file_name(), Some("corrupt.jpg"));
    assert!(matches!(
      err,
      BatchError::PerFile {
        source: FileError::Decode(_),
        ..
      }
    ));
    assert!(err.to_string().starts_with("Error processing file corrupt.jpg: "));
  }

  #[test]
  fn first_failure_aborts_the_rest() {
    let orchestrator = orchestrator(FakeDetector::default());
    let files = [png("valid.jpg", 4), corrupt("corrupt.jpg"), png("valid2.jpg", 9)];

    let err = orchestrator.process(Some(&files)).unwrap_err();
    assert_eq!(err.file_name(), Some("corrupt.jpg"));
    // valid2.jpg 不会被处理
    assert_eq!(*orchestrator.detector().seen.lock().unwrap(), vec![4]);
  }

  #[test]
  fn detection_failure_is_reported_per_file() {
    let orchestrator = orchestrator(FakeDetector {
      fail_on_width: Some(8),
      ..Default::default()
    });
    let files = [png("ok.png", 4), png("weird.png", 8)];

    let err = orchestrator.process(Some(&files)).unwrap_err();
    assert_eq!(
      err.to_string(),
      "Error processing file weird.png: invalid input image: bad dimensions"
    );
  }

  #[test]
  fn unreadable_path_is_a_per_file_error() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first.png");
    std::fs::write(&first, png("first.png", 4).data()).unwrap();
    let missing = dir.path().join("leaf.jpg");
    let last = dir.path().join("last.png");
    std::fs::write(&last, png("last.png", 6).data()).unwrap();

    let orchestrator = orchestrator(FakeDetector::default());
    let err = orchestrator.process_paths(&[first, missing, last]).unwrap_err();

    assert!(matches!(
      err,
      BatchError::PerFile {
        source: FileError::Read(_),
        ..
      }
    ));
    assert_eq!(err.file_name(), Some("leaf.jpg"));
    assert!(err.to_string().starts_with("Error processing file leaf.jpg: "), "{}", err);
    assert_eq!(*orchestrator.detector().seen.lock().unwrap(), vec![4]);
  }

  #[test]
  fn paths_are_processed_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let paths: Vec<PathBuf> = [("a.png", 5), ("b.png", 2)]
      .iter()
      .map(|(name, width)| {
        let path = dir.path().join(name);
        std::fs::write(&path, png(name, *width).data()).unwrap();
        path
      })
      .collect();

    let images = orchestrator(FakeDetector::default())
      .process_paths(&paths)
      .unwrap();
    let widths: Vec<u32> = images.iter().map(|i| i.image.width()).collect();
    assert_eq!(widths, vec![5, 2]);
  }

  #[test]
  fn no_paths_report_no_files() {
    let paths: [PathBuf; 0] = [];
    let err = orchestrator(FakeDetector::default())
      .process_paths(&paths)
      .unwrap_err();
    assert!(matches!(err, BatchError::NoFiles));
  }

  #[test]
  fn unexpected_errors_are_prefixed() {
    let err = BatchError::unexpected("worker panicked");
    assert_eq!(err.to_string(), "An unexpected error occurred: worker panicked");
    assert_eq!(err.file_name(), None);
  }

  #[test]
  fn rerun_is_deterministic() {
    let orchestrator = orchestrator(FakeDetector::default());
    let files = [png("a.png", 3), png("b.png", 2)];

    let first = orchestrator.process(Some(&files)).unwrap();
    let second = orchestrator.process(Some(&files)).unwrap();
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(&second) {
      assert_eq!(a.image, b.image);
      assert_eq!(a.result, b.result);
    }
  }
}
