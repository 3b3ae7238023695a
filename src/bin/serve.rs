// 该文件是 Yeshi （叶识） 项目的一部分。
// src/bin/serve.rs - 网页检测服务
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

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use yeshi::{
  config::DetectorArgs,
  input::MemoryDecoder,
  server::{self, AppState, DEFAULT_BODY_LIMIT},
};

/// Yeshi 网页检测服务
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(flatten)]
  pub detector: DetectorArgs,

  /// 监听地址
  #[arg(long, default_value = "127.0.0.1:7860", value_name = "ADDR")]
  pub listen: SocketAddr,

  /// 单次请求的最大字节数
  #[arg(long, default_value_t = DEFAULT_BODY_LIMIT, value_name = "BYTES")]
  pub body_limit: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型地址: {}", args.detector.model);
  info!("监听地址: {}", args.listen);

  let detector = args.detector.build_detector()?;
  let decoder = MemoryDecoder::default().with_max_bytes(args.detector.max_image_bytes);
  let state = AppState::new(decoder, Arc::new(detector));

  let listener = tokio::net::TcpListener::bind(args.listen)
    .await
    .with_context(|| format!("无法监听 {}", args.listen))?;
  server::serve(listener, server::router(state, args.body_limit)).await?;

  Ok(())
}
