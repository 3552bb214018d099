// 该文件是 Shanan-Omni （山南西风·界面解析） 项目的一部分。
// src/output.rs - 输出定义
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{path::PathBuf, str::FromStr};

use thiserror::Error;

use crate::{
  element::DetectedElement,
  frame::{Screenshot, ScreenshotError, encode_png_base64},
};

pub mod draw;

mod save_image_file;
pub use self::save_image_file::SaveImageFileOutput;

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(PathBuf),
  #[error("overlay encoding failed: {0}")]
  Encode(#[from] ScreenshotError),
  #[error("序列化错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("未知的标注图策略: {0}")]
  UnknownPolicy(String),
}

/// 标注图来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverlayPolicy {
  /// 使用模型返回的标注图，模型未返回时本地绘制
  #[default]
  Adapter,
  /// 总是在服务端根据检测框重新绘制
  Local,
}

impl FromStr for OverlayPolicy {
  type Err = OutputError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "adapter" | "model" => Ok(OverlayPolicy::Adapter),
      "local" => Ok(OverlayPolicy::Local),
      other => Err(OutputError::UnknownPolicy(other.to_string())),
    }
  }
}

pub trait RenderOverlay {
  /// 在截图上绘制检测结果，返回 base64 编码的 PNG
  fn render_overlay(
    &self,
    screenshot: &Screenshot,
    elements: &[DetectedElement],
  ) -> Result<String, OutputError>;
}

impl RenderOverlay for draw::Draw {
  fn render_overlay(
    &self,
    screenshot: &Screenshot,
    elements: &[DetectedElement],
  ) -> Result<String, OutputError> {
    let mut image = screenshot.to_rgb_image();
    self.draw_elements(&mut image, elements);
    Ok(encode_png_base64(&image)?)
  }
}

impl OverlayPolicy {
  /// 根据策略决定返回给调用方的标注图
  pub fn select<R: RenderOverlay + ?Sized>(
    self,
    adapter_overlay: String,
    renderer: &R,
    screenshot: &Screenshot,
    elements: &[DetectedElement],
  ) -> Result<String, OutputError> {
    match self {
      OverlayPolicy::Adapter if !adapter_overlay.is_empty() => Ok(adapter_overlay),
      _ => renderer.render_overlay(screenshot, elements),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::Screenshot;
  use image::RgbImage;

  fn screenshot() -> Screenshot {
    let encoded = encode_png_base64(&RgbImage::new(4, 4)).unwrap();
    Screenshot::decode_base64(&encoded).unwrap()
  }

  #[test]
  fn adapter_overlay_is_passed_through() {
    let overlay = OverlayPolicy::Adapter
      .select("from-model".into(), &draw::Draw::default(), &screenshot(), &[])
      .unwrap();
    assert_eq!(overlay, "from-model");
  }

  #[test]
  fn empty_adapter_overlay_falls_back_to_local_render() {
    let shot = screenshot();
    let overlay = OverlayPolicy::Adapter
      .select(String::new(), &draw::Draw::default(), &shot, &[])
      .unwrap();
    let decoded = Screenshot::decode_base64(&overlay).unwrap();
    assert_eq!(decoded.size(), shot.size());
  }

  #[test]
  fn local_policy_ignores_adapter_overlay() {
    let overlay = OverlayPolicy::Local
      .select("from-model".into(), &draw::Draw::default(), &screenshot(), &[])
      .unwrap();
    assert_ne!(overlay, "from-model");
  }

  #[test]
  fn policy_from_str() {
    assert_eq!("LOCAL".parse::<OverlayPolicy>().unwrap(), OverlayPolicy::Local);
    assert_eq!("adapter".parse::<OverlayPolicy>().unwrap(), OverlayPolicy::Adapter);
    assert!("video".parse::<OverlayPolicy>().is_err());
  }
}
