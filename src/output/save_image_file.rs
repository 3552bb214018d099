// 该文件是 Shanan-Omni （山南西风·界面解析） 项目的一部分。
// src/output/save_image_file.rs - 保存标注图与解析记录
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

use std::path::{Path, PathBuf};

use tracing::warn;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  element::ParseResponse,
  frame::Screenshot,
  output::OutputError,
};

/// 将标注图写入文件，同名 `.json` 文件记录解析结果
pub struct SaveImageFileOutput {
  path: PathBuf,
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = OutputError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(SaveImageFileOutput {
      path: PathBuf::from(uri.path()),
    })
  }
}

impl SaveImageFileOutput {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn record_path(&self) -> PathBuf {
    self.path.with_extension("json")
  }

  pub fn render_result(&self, response: &ParseResponse) -> Result<(), OutputError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    // 标注图以 PNG 重新编码，保证扩展名与内容一致
    let overlay = Screenshot::decode_base64(&response.labeled_image)?;
    overlay
      .to_rgb_image()
      .save(&self.path)
      .map_err(crate::frame::ScreenshotError::from)?;

    let record = serde_json::to_string_pretty(&response.elements)?;
    std::fs::write(self.record_path(), record)?;

    warn!("保存标注图到文件: {}", self.path.display());
    Ok(())
  }
}
