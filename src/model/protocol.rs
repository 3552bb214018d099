// 该文件是 Shanan-Omni （山南西风·界面解析） 项目的一部分。
// src/model/protocol.rs - 模型工作进程通信协议
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

//! 工作进程通过标准输入输出交换按行分隔的 JSON：
//!
//! - 启动握手：`{"event":"ready","device":"cuda"}`
//! - 请求：`{"id":1,"image_base64":"..."}`
//! - 应答：`{"event":"parsed","id":1,"labeled_image":"...","parsed_content_list":[...]}`
//! - 失败：`{"event":"error","id":1,"error":"..."}`
//!
//! 应答中的 `id` 回显请求编号；不回显编号的旧版工作进程按顺序匹配。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
  element::RawItem,
  model::{ModelError, ParseOutput},
};

#[derive(Debug, Serialize)]
pub struct WorkerRequest<'a> {
  pub id: u64,
  pub image_base64: &'a str,
}

impl WorkerRequest<'_> {
  pub fn to_line(&self) -> Result<String, ModelError> {
    let mut line = serde_json::to_string(self)
      .map_err(|e| ModelError::Protocol(format!("cannot encode request: {e}")))?;
    line.push('\n');
    Ok(line)
  }
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerReply {
  Ready {
    device: String,
  },
  Parsed {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    labeled_image: Option<String>,
    #[serde(default)]
    parsed_content_list: Vec<Value>,
  },
  Error {
    #[serde(default)]
    id: Option<u64>,
    error: String,
  },
}

impl WorkerReply {
  pub fn from_line(line: &str) -> Result<Self, ModelError> {
    serde_json::from_str(line.trim()).map_err(|e| {
      ModelError::Protocol(format!("cannot decode worker reply: {e}"))
    })
  }

  /// 应答所对应的请求编号
  pub fn request_id(&self) -> Option<u64> {
    match self {
      WorkerReply::Parsed { id, .. } | WorkerReply::Error { id, .. } => *id,
      WorkerReply::Ready { .. } => None,
    }
  }

  pub fn into_parse_output(self) -> Result<ParseOutput, ModelError> {
    match self {
      WorkerReply::Parsed {
        labeled_image,
        parsed_content_list,
        ..
      } => {
        let items = parsed_content_list
          .into_iter()
          .map(RawItem::from_value)
          .collect();
        Ok(ParseOutput {
          labeled_image: labeled_image.unwrap_or_default(),
          items,
        })
      }
      WorkerReply::Error { error, .. } => Err(ModelError::Inference(error)),
      WorkerReply::Ready { .. } => Err(ModelError::Protocol(
        "unexpected handshake while waiting for a parse reply".to_string(),
      )),
    }
  }
}
