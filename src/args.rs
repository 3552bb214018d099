// 该文件是 Shanan-Omni （山南西风·界面解析） 项目的一部分。
// src/args.rs - 服务参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use url::Url;

use shanan_omni::{model::DeviceRequest, output::OverlayPolicy, server::ServerConfig};

/// Shanan-Omni 屏幕解析服务参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 监听地址，默认只接受本机连接
  #[arg(long, env = "SHANAN_OMNI_HOST", default_value = "127.0.0.1")]
  pub host: String,

  /// 监听端口
  #[arg(long, env = "SHANAN_OMNI_PORT", default_value_t = 8765)]
  pub port: u16,

  /// 模型地址
  /// 例如:
  /// - omniparser:weights （相对于程序安装目录）
  /// - omniparser:///opt/omniparser/weights?caption_model=florence2&box_threshold=0.05
  #[arg(
    long,
    env = "SHANAN_OMNI_MODEL",
    default_value = "omniparser:weights",
    value_name = "MODEL"
  )]
  pub model: Url,

  /// 推理设备: auto, cpu, cuda；覆盖模型地址中的 device 参数
  #[arg(long, env = "SHANAN_OMNI_DEVICE", value_name = "DEVICE")]
  pub device: Option<DeviceRequest>,

  /// 等待模型加载完成的最长时间（秒）；覆盖模型地址中的 startup_timeout_secs 参数
  #[arg(long, env = "SHANAN_OMNI_STARTUP_TIMEOUT_SECS", value_name = "SECS")]
  pub startup_timeout_secs: Option<u64>,

  /// HTTP 工作线程数
  #[arg(long, env = "SHANAN_OMNI_WORKERS", default_value_t = 2)]
  pub workers: usize,

  /// 请求体大小上限（MiB）
  #[arg(long, env = "SHANAN_OMNI_MAX_BODY_MIB", default_value_t = 32)]
  pub max_body_mib: usize,

  /// 单次推理超时（秒）
  #[arg(long, env = "SHANAN_OMNI_INFERENCE_TIMEOUT_SECS", default_value_t = 120)]
  pub inference_timeout_secs: u64,

  /// 缺少图像或模型未加载时返回 4xx/5xx，而不是 200
  #[arg(long, env = "SHANAN_OMNI_STRICT_STATUS")]
  pub strict_status: bool,

  /// 标注图来源: adapter 或 local
  #[arg(long, env = "SHANAN_OMNI_OVERLAY", default_value = "adapter")]
  pub overlay: OverlayPolicy,

  /// 本地绘制标注图时使用的字体文件
  #[arg(long, env = "SHANAN_OMNI_OVERLAY_FONT", value_name = "FILE")]
  pub overlay_font: Option<PathBuf>,
}

impl Args {
  pub fn server_config(&self) -> ServerConfig {
    ServerConfig {
      host: self.host.clone(),
      port: self.port,
      workers: self.workers,
      max_body_bytes: self.max_body_mib.saturating_mul(1024 * 1024),
      inference_timeout: Duration::from_secs(self.inference_timeout_secs),
      strict_status: self.strict_status,
      overlay: self.overlay,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use shanan_omni::model::Device;

  #[test]
  fn defaults_bind_loopback() {
    let args = Args::try_parse_from(["shanan-omni"]).unwrap();
    let config = args.server_config();
    assert_eq!(config.host, "127.0.0.1");
    assert_eq!(config.port, 8765);
    assert_eq!(config.max_body_bytes, 32 * 1024 * 1024);
    assert!(!config.strict_status);
    assert!(args.device.is_none());
  }

  #[test]
  fn parses_overrides() {
    let args = Args::try_parse_from([
      "shanan-omni",
      "--port",
      "9000",
      "--device",
      "cuda",
      "--overlay",
      "local",
      "--strict-status",
    ])
    .unwrap();
    assert_eq!(args.port, 9000);
    assert_eq!(args.device, Some(DeviceRequest::Fixed(Device::Cuda)));
    assert_eq!(args.overlay, OverlayPolicy::Local);
    assert!(args.server_config().strict_status);
  }
}
