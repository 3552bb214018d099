// 该文件是 Shanan-Omni （山南西风·界面解析） 项目的一部分。
// src/model.rs - 检测适配器
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

use std::{
  fmt,
  path::{Path, PathBuf},
  str::FromStr,
  sync::{Mutex, OnceLock, PoisonError},
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::element::RawItem;

mod omniparser;
mod protocol;

pub use self::omniparser::{OmniParser, OmniParserBuilder, WeightsLayout};
pub use self::protocol::{WorkerReply, WorkerRequest};

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("Models not loaded")]
  NotLoaded,
  #[error("model is already loaded")]
  AlreadyLoaded,
  #[error("model weights not found: {0}")]
  WeightsMissing(PathBuf),
  #[error("model path error: {0}")]
  ModelPath(String),
  #[error("unknown compute device '{0}'")]
  UnknownDevice(String),
  #[error("failed to start model worker '{0}': {1}")]
  Spawn(String, std::io::Error),
  #[error("model worker I/O error: {0}")]
  Io(#[from] std::io::Error),
  #[error("model worker protocol error: {0}")]
  Protocol(String),
  #[error("model failed to load: {0}")]
  LoadFailed(String),
  #[error("model worker exited unexpectedly")]
  WorkerExited,
  #[error("{0}")]
  Inference(String),
  #[error("model worker was not ready within {0:?}")]
  HandshakeTimeout(Duration),
  #[error("request deadline passed before the model was free")]
  DeadlineExceeded,
}

/// 推理设备
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
  Cpu,
  Cuda,
}

impl Device {
  pub fn as_str(&self) -> &'static str {
    match self {
      Device::Cpu => "cpu",
      Device::Cuda => "cuda",
    }
  }
}

impl fmt::Display for Device {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Device {
  type Err = ModelError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "cpu" => Ok(Device::Cpu),
      "cuda" | "gpu" => Ok(Device::Cuda),
      other => Err(ModelError::UnknownDevice(other.to_string())),
    }
  }
}

/// 用户请求的设备，`Auto` 在启动时解析为实际设备
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceRequest {
  #[default]
  Auto,
  Fixed(Device),
}

impl FromStr for DeviceRequest {
  type Err = ModelError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    if s.trim().eq_ignore_ascii_case("auto") {
      return Ok(DeviceRequest::Auto);
    }
    s.parse().map(DeviceRequest::Fixed)
  }
}

impl DeviceRequest {
  pub fn resolve(self) -> Device {
    match self {
      DeviceRequest::Fixed(device) => device,
      DeviceRequest::Auto if cuda_available() => Device::Cuda,
      DeviceRequest::Auto => Device::Cpu,
    }
  }
}

fn cuda_available() -> bool {
  if let Ok(visible) = std::env::var("CUDA_VISIBLE_DEVICES") {
    let visible = visible.trim();
    if visible.is_empty() || visible == "-1" {
      return false;
    }
  }
  Path::new("/dev/nvidia0").exists() || Path::new("/proc/driver/nvidia/version").exists()
}

/// 一次解析的原始输出：标注图（base64）与按顺序排列的检测项
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParseOutput {
  pub labeled_image: String,
  pub items: Vec<RawItem>,
}

/// 屏幕解析模型
///
/// 实现者不必可重入，适配器保证同一时刻只有一个调用。
pub trait ScreenParser: Send {
  fn device(&self) -> Device;
  fn parse(&mut self, image_base64: &str) -> Result<ParseOutput, ModelError>;
}

struct LoadedModel {
  device: Device,
  engine: Mutex<Box<dyn ScreenParser>>,
}

/// 检测适配器：模型只加载一次，之后在进程生命周期内复用
pub struct DetectionAdapter {
  requested: Device,
  loaded: OnceLock<LoadedModel>,
}

impl DetectionAdapter {
  pub fn new(requested: Device) -> Self {
    Self {
      requested,
      loaded: OnceLock::new(),
    }
  }

  pub fn with_engine(engine: Box<dyn ScreenParser>) -> Self {
    let adapter = Self::new(engine.device());
    let loaded = LoadedModel {
      device: engine.device(),
      engine: Mutex::new(engine),
    };
    // 新建的 OnceLock 必定为空
    let _ = adapter.loaded.set(loaded);
    adapter
  }

  pub fn install(&self, engine: Box<dyn ScreenParser>) -> Result<(), ModelError> {
    let device = engine.device();
    if device != self.requested {
      warn!("模型实际运行设备 {} 与请求设备 {} 不一致", device, self.requested);
    }

    self
      .loaded
      .set(LoadedModel {
        device,
        engine: Mutex::new(engine),
      })
      .map_err(|_| ModelError::AlreadyLoaded)?;
    info!("模型已就绪，运行设备: {}", device);
    Ok(())
  }

  pub fn is_loaded(&self) -> bool {
    self.loaded.get().is_some()
  }

  /// 模型加载前返回请求的设备，加载后返回模型报告的设备
  pub fn device(&self) -> Device {
    self
      .loaded
      .get()
      .map(|loaded| loaded.device)
      .unwrap_or(self.requested)
  }

  pub fn parse(&self, image_base64: &str) -> Result<ParseOutput, ModelError> {
    self.parse_before(image_base64, None)
  }

  /// 取得模型锁时若已过 `deadline`，请求方已放弃等待，不再调用模型
  pub fn parse_before(
    &self,
    image_base64: &str,
    deadline: Option<Instant>,
  ) -> Result<ParseOutput, ModelError> {
    let loaded = self.loaded.get().ok_or(ModelError::NotLoaded)?;
    // 上一次调用 panic 后模型句柄本身仍然可用
    let mut engine = loaded
      .engine
      .lock()
      .unwrap_or_else(PoisonError::into_inner);

    if let Some(deadline) = deadline
      && Instant::now() >= deadline
    {
      debug!("请求已超时，跳过模型调用");
      return Err(ModelError::DeadlineExceeded);
    }

    let now = Instant::now();
    let output = engine.parse(image_base64)?;
    debug!(
      "模型推理完成，耗时: {:.2?}，检测项 {} 个",
      now.elapsed(),
      output.items.len()
    );
    Ok(output)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Counting {
    calls: usize,
  }

  impl ScreenParser for Counting {
    fn device(&self) -> Device {
      Device::Cpu
    }

    fn parse(&mut self, _image_base64: &str) -> Result<ParseOutput, ModelError> {
      self.calls += 1;
      Ok(ParseOutput {
        labeled_image: String::new(),
        items: vec![RawItem::Legacy(format!("call {}", self.calls))],
      })
    }
  }

  #[test]
  fn parse_before_install_reports_not_loaded() {
    let adapter = DetectionAdapter::new(Device::Cuda);
    assert!(!adapter.is_loaded());
    assert_eq!(adapter.device(), Device::Cuda);
    assert!(matches!(adapter.parse("abc"), Err(ModelError::NotLoaded)));
  }

  #[test]
  fn install_is_once_only() {
    let adapter = DetectionAdapter::new(Device::Cuda);
    adapter.install(Box::new(Counting { calls: 0 })).unwrap();
    assert!(adapter.is_loaded());
    assert_eq!(adapter.device(), Device::Cpu);

    let err = adapter.install(Box::new(Counting { calls: 0 })).unwrap_err();
    assert!(matches!(err, ModelError::AlreadyLoaded));
  }

  #[test]
  fn engine_is_reused_across_calls() {
    let adapter = DetectionAdapter::with_engine(Box::new(Counting { calls: 0 }));
    adapter.parse("a").unwrap();
    let second = adapter.parse("b").unwrap();
    assert_eq!(second.items, vec![RawItem::Legacy("call 2".into())]);
  }

  #[test]
  fn expired_deadline_skips_engine() {
    let adapter = DetectionAdapter::with_engine(Box::new(Counting { calls: 0 }));
    let err = adapter.parse_before("a", Some(Instant::now())).unwrap_err();
    assert!(matches!(err, ModelError::DeadlineExceeded));

    let later = Instant::now() + Duration::from_secs(60);
    let output = adapter.parse_before("b", Some(later)).unwrap();
    assert_eq!(output.items, vec![RawItem::Legacy("call 1".into())]);
  }

  #[test]
  fn device_strings() {
    assert_eq!("CUDA".parse::<Device>().unwrap(), Device::Cuda);
    assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
    assert!("tpu".parse::<Device>().is_err());
    assert_eq!("auto".parse::<DeviceRequest>().unwrap(), DeviceRequest::Auto);
    assert_eq!(
      "cpu".parse::<DeviceRequest>().unwrap().resolve(),
      Device::Cpu
    );
    assert_eq!(Device::Cuda.to_string(), "cuda");
  }
}
