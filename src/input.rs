// 该文件是 Shanan-Omni （山南西风·界面解析） 项目的一部分。
// src/input.rs - 图像文件输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use thiserror::Error;
use tracing::error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Screenshot, ScreenshotError, encode_base64},
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] ScreenshotError),
}

/// 从本地文件读取的截图，同时保留原始编码的 base64 文本
pub struct ImageFileInput {
  encoded: String,
  screenshot: Screenshot,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let path = urlencoding::decode(url.path())
      .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let bytes = std::fs::read(&*path)?;
    let screenshot = Screenshot::from_bytes(&bytes)?;

    Ok(ImageFileInput {
      encoded: encode_base64(&bytes),
      screenshot,
    })
  }
}

impl ImageFileInput {
  pub fn encoded(&self) -> &str {
    &self.encoded
  }

  pub fn screenshot(&self) -> &Screenshot {
    &self.screenshot
  }
}
