// 该文件是 Yeshi （叶识） 项目的一部分。
// src/bin/batch.rs - 命令行批量检测
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use url::Url;

use yeshi::{
  FromUrl,
  batch::BatchOrchestrator,
  config::DetectorArgs,
  input::{MemoryDecoder, display_name},
  output::{Render, SaveImageFileOutput, draw::Record},
};

/// Yeshi 批量检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(flatten)]
  pub detector: DetectorArgs,

  /// 输出地址，例如 image:///tmp/results
  #[arg(long, value_name = "URL")]
  pub output: Url,

  /// 同时写出检测记录 (<名称>.txt)
  #[arg(long)]
  pub record: bool,

  /// 待检测的图像文件
  #[arg(value_name = "FILE")]
  pub files: Vec<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型地址: {}", args.detector.model);
  info!("输入文件: {} 个", args.files.len());
  info!("输出地址: {}", args.output);

  let mut output = SaveImageFileOutput::from_url(&args.output)?;
  let detector = args.detector.build_detector()?;
  let labels = detector.labels().clone();
  let decoder = MemoryDecoder::default().with_max_bytes(args.detector.max_image_bytes);
  let orchestrator = BatchOrchestrator::new(decoder, detector);

  info!("开始推理...");
  let now = std::time::Instant::now();
  let images = match orchestrator.process_paths(&args.files) {
    Ok(images) => images,
    Err(e) => {
      error!("{}", e);
      return Err(e.into());
    }
  };
  info!("推理完成，耗时: {:.2?}", now.elapsed());

  if args.record {
    output = output.with_record(
      Record {
        label_with_name: true,
      },
      labels,
    );
  }
  for (path, image) in args.files.iter().zip(&images) {
    output.render_result(&display_name(path), image)?;
  }

  info!("处理完成，共 {} 张图像，保存于 {}", images.len(), output.dir().display());
  Ok(())
}
