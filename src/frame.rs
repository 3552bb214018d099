// 该文件是 Shanan-Omni （山南西风·界面解析） 项目的一部分。
// src/frame.rs - 截图帧解码与编码
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

use std::io::Cursor;

use base64::{
  Engine, alphabet,
  engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
};
use image::{DynamicImage, ImageFormat, ImageReader, RgbImage};
use thiserror::Error;
use tracing::debug;

use crate::element::ImageSize;

/// 容忍缺失填充的标准 base64 解码器
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
  &alphabet::STANDARD,
  GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Error, Debug)]
pub enum ScreenshotError {
  #[error("invalid base64 payload: {0}")]
  Base64(#[from] base64::DecodeError),
  #[error("image payload is empty")]
  Empty,
  #[error("unsupported or corrupt image: {0}")]
  Image(#[from] image::ImageError),
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
}

/// 解码后的截图，保留原始分辨率
#[derive(Debug, Clone)]
pub struct Screenshot {
  image: DynamicImage,
  format: Option<ImageFormat>,
}

impl Screenshot {
  /// 从 base64 文本解码截图，允许 `data:*;base64,` 前缀与换行
  pub fn decode_base64(payload: &str) -> Result<Self, ScreenshotError> {
    let compact: String = strip_data_url(payload)
      .chars()
      .filter(|c| !c.is_ascii_whitespace())
      .collect();
    let bytes = LENIENT_BASE64.decode(compact.as_bytes())?;
    Self::from_bytes(&bytes)
  }

  pub fn from_bytes(bytes: &[u8]) -> Result<Self, ScreenshotError> {
    if bytes.is_empty() {
      return Err(ScreenshotError::Empty);
    }

    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    let format = reader.format();
    let image = reader.decode()?;
    debug!(
      "截图解码完成: {}x{} ({:?})",
      image.width(),
      image.height(),
      format
    );

    Ok(Screenshot { image, format })
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn size(&self) -> ImageSize {
    ImageSize {
      width: self.width(),
      height: self.height(),
    }
  }

  pub fn format(&self) -> Option<ImageFormat> {
    self.format
  }

  pub fn to_rgb_image(&self) -> RgbImage {
    self.image.to_rgb8()
  }
}

pub fn strip_data_url(payload: &str) -> &str {
  let trimmed = payload.trim_start();
  match trimmed.split_once(";base64,") {
    Some((prefix, data)) if prefix.starts_with("data:") => data,
    _ => trimmed,
  }
}

pub fn encode_base64(bytes: &[u8]) -> String {
  base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// 将 RGB 图像编码为 PNG 并转换为 base64 文本
pub fn encode_png_base64(image: &RgbImage) -> Result<String, ScreenshotError> {
  let mut buffer = Cursor::new(Vec::new());
  image.write_to(&mut buffer, ImageFormat::Png)?;
  Ok(encode_base64(buffer.get_ref()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  fn png_base64(width: u32, height: u32) -> String {
    let image = RgbImage::from_pixel(width, height, Rgb([10, 20, 30]));
    encode_png_base64(&image).unwrap()
  }

  #[test]
  fn decodes_true_dimensions() {
    let shot = Screenshot::decode_base64(&png_base64(37, 21)).unwrap();
    assert_eq!(
      shot.size(),
      ImageSize {
        width: 37,
        height: 21
      }
    );
    assert_eq!(shot.format(), Some(ImageFormat::Png));
  }

  #[test]
  fn tolerates_line_breaks_and_data_url() {
    let encoded = png_base64(8, 4);
    let wrapped: String = encoded
      .as_bytes()
      .chunks(16)
      .map(|chunk| std::str::from_utf8(chunk).unwrap())
      .collect::<Vec<_>>()
      .join("\n");
    let payload = format!("data:image/png;base64,{wrapped}");
    let shot = Screenshot::decode_base64(&payload).unwrap();
    assert_eq!(shot.width(), 8);
  }

  #[test]
  fn tolerates_missing_padding() {
    let encoded = png_base64(5, 5);
    let unpadded = encoded.trim_end_matches('=');
    assert!(Screenshot::decode_base64(unpadded).is_ok());
  }

  #[test]
  fn rejects_invalid_base64() {
    let err = Screenshot::decode_base64("not*base64!").unwrap_err();
    assert!(matches!(err, ScreenshotError::Base64(_)));
  }

  #[test]
  fn rejects_non_image_bytes() {
    let payload = encode_base64(b"definitely not a picture");
    let err = Screenshot::decode_base64(&payload).unwrap_err();
    assert!(matches!(err, ScreenshotError::Image(_)));
  }

  #[test]
  fn rejects_empty_payload() {
    let err = Screenshot::decode_base64("").unwrap_err();
    assert!(matches!(err, ScreenshotError::Empty));
  }
}
