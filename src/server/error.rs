// 该文件是 Shanan-Omni （山南西风·界面解析） 项目的一部分。
// src/server/error.rs - 请求错误与 HTTP 状态映射
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

use std::time::Duration;

use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{frame::ScreenshotError, model::ModelError, output::OutputError};

pub const NO_IMAGE_MESSAGE: &str = "No image provided. Use 'image_base64'";

/// 所有错误响应的 JSON 形状
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
  pub error: String,
}

/// 单次解析内部的失败原因
#[derive(Error, Debug)]
pub enum ParseFailure {
  #[error(transparent)]
  Screenshot(#[from] ScreenshotError),
  #[error(transparent)]
  Model(#[from] ModelError),
  #[error(transparent)]
  Overlay(#[from] OutputError),
  #[error("inference timed out after {0:?}")]
  Timeout(Duration),
  #[error("inference task was aborted")]
  Aborted,
}

/// 返回给调用方的错误
///
/// `strict` 为假时沿用旧客户端依赖的行为：缺少图像或模型未加载时以 200 返回错误体。
#[derive(Error, Debug)]
pub enum ApiError {
  #[error("{NO_IMAGE_MESSAGE}")]
  MissingImage { strict: bool },
  #[error("Models not loaded")]
  NotLoaded { strict: bool },
  #[error("request body exceeds {0} bytes")]
  TooLarge(usize),
  #[error("{0}")]
  MalformedBody(String),
  #[error("Parse failed: {0}")]
  Parse(String),
}

impl ResponseError for ApiError {
  fn status_code(&self) -> StatusCode {
    match self {
      ApiError::MissingImage { strict: false } | ApiError::NotLoaded { strict: false } => {
        StatusCode::OK
      }
      ApiError::MissingImage { strict: true } => StatusCode::BAD_REQUEST,
      ApiError::NotLoaded { strict: true } => StatusCode::SERVICE_UNAVAILABLE,
      ApiError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
      ApiError::MalformedBody(_) | ApiError::Parse(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  fn error_response(&self) -> HttpResponse {
    HttpResponse::build(self.status_code()).json(ErrorBody {
      error: self.to_string(),
    })
  }
}
