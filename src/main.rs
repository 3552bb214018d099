// 该文件是 Shanan-Omni （山南西风·界面解析） 项目的一部分。
// src/main.rs - 屏幕解析服务主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use std::{sync::Arc, time::Duration};

use actix_web::web;
use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use shanan_omni::{
  FromUrl,
  model::{Device, DetectionAdapter, ModelError, OmniParser, OmniParserBuilder},
  output::draw::Draw,
  server::{self, ServiceContext},
};

const WEIGHTS_HINT: &str =
  "huggingface-cli download microsoft/OmniParser-v2.0 --local-dir weights";

fn load_model(args: &args::Args) -> Result<(Device, OmniParser), ModelError> {
  let mut builder = OmniParserBuilder::from_url(&args.model)?;
  if let Some(device) = args.device {
    builder = builder.device(device);
  }
  if let Some(secs) = args.startup_timeout_secs {
    builder = builder.startup_timeout(Duration::from_secs(secs));
  }
  info!("模型权重目录: {}", builder.weights().root().display());
  info!("请求推理设备: {:?}", builder.requested_device());

  let requested = builder.requested_device().resolve();
  let model = builder.build()?;
  Ok((requested, model))
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = args::Args::parse();
  let config = args.server_config();

  info!("Shanan-Omni 屏幕解析服务");
  info!("模型地址: {}", args.model);
  info!("监听地址: {}:{}", config.host, config.port);
  info!("推理超时: {:?}", config.inference_timeout);

  info!("正在加载模型...");
  let (requested, model) = match load_model(&args) {
    Ok(loaded) => loaded,
    Err(e) => {
      error!("模型加载失败: {}", e);
      eprintln!("无法加载 OmniParser 模型: {e}");
      eprintln!("请先下载模型权重: {WEIGHTS_HINT}");
      std::process::exit(1);
    }
  };

  let adapter = Arc::new(DetectionAdapter::new(requested));
  adapter.install(Box::new(model))?;

  let draw = match &args.overlay_font {
    Some(path) => Draw::with_font_file(path)?,
    None => Draw::default(),
  };
  let ctx = ServiceContext::new(adapter, config).with_draw(draw);

  actix_web::rt::System::new().block_on(server::run(web::Data::new(ctx)))?;
  info!("服务已停止");
  Ok(())
}
