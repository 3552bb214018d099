// 该文件是 Shanan-Omni （山南西风·界面解析） 项目的一部分。
// src/bin/simple_parse.rs - 单张截图解析测试代码
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use shanan_omni::{
  FromUrl,
  input::ImageFileInput,
  model::{DetectionAdapter, OmniParserBuilder},
  output::{OverlayPolicy, SaveImageFileOutput, draw::Draw},
  server::{ServerConfig, ServiceContext},
};

/// 不启动 HTTP 服务，直接解析一张截图
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址，例如 omniparser:///opt/omniparser/weights
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入截图，例如 image:///tmp/screen.png
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 标注图输出路径，例如 image:///tmp/screen.labeled.png
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 标注图来源: adapter 或 local
  #[arg(long, default_value = "adapter")]
  pub overlay: OverlayPolicy,
  /// 本地绘制时使用的字体文件
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型地址: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let input_image = ImageFileInput::from_url(&args.input)?;
  let model = OmniParserBuilder::from_url(&args.model)?.build()?;
  let output = SaveImageFileOutput::from_url(&args.output)?;

  let draw = match &args.font {
    Some(path) => Draw::with_font_file(path)?,
    None => Draw::default(),
  };
  let ctx = ServiceContext::new(
    Arc::new(DetectionAdapter::with_engine(Box::new(model))),
    ServerConfig {
      overlay: args.overlay,
      ..ServerConfig::default()
    },
  )
  .with_draw(draw);

  info!("开始解析...");
  let now = std::time::Instant::now();
  let response = ctx.parse_blocking(input_image.encoded(), None)?;
  info!(
    "解析完成，耗时: {:.2?}，元素 {} 个",
    now.elapsed(),
    response.element_count
  );

  for element in &response.elements {
    match element.bbox() {
      Some([x1, y1, x2, y2]) => info!(
        "  - [{}] {}: {} at ({:.3}, {:.3}, {:.3}, {:.3})",
        element.id,
        element.kind().as_str(),
        element.text(),
        x1,
        y1,
        x2,
        y2
      ),
      None => info!("  - [{}] {}", element.id, element.text()),
    }
  }

  output.render_result(&response)?;
  println!("{}", serde_json::to_string_pretty(&response.elements)?);

  Ok(())
}
