// 该文件是 Shanan-Omni （山南西风·界面解析） 项目的一部分。
// src/model/omniparser.rs - OmniParser 模型工作进程
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
  io::{BufRead, BufReader, ErrorKind, Write},
  path::{Path, PathBuf},
  process::{Child, ChildStdin, ChildStdout, Command, Stdio},
  sync::mpsc::{self, Receiver, RecvTimeoutError},
  time::{Duration, Instant},
};

use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{
    Device, DeviceRequest, ModelError, ParseOutput, ScreenParser,
    protocol::{WorkerReply, WorkerRequest},
  },
};

const OMNIPARSER_DEFAULT_WORKER: &str = "omniparser-worker";
const OMNIPARSER_CAPTION_MODEL: &str = "florence2";
const OMNIPARSER_BOX_THRESHOLD: f32 = 0.05;
const OMNIPARSER_WEIGHTS_DIR: &str = "weights";
const OMNIPARSER_STARTUP_TIMEOUT: Duration = Duration::from_secs(600);

/// 权重目录布局：检测模型检查点与描述模型目录
#[derive(Debug, Clone, PartialEq)]
pub struct WeightsLayout {
  root: PathBuf,
}

impl WeightsLayout {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  /// 相对路径按可执行文件所在目录解析
  pub fn resolve(path: &Path) -> Result<Self, ModelError> {
    if path.is_absolute() {
      return Ok(Self::new(path));
    }
    Ok(Self::new(install_dir()?.join(path)))
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn detector(&self) -> PathBuf {
    self.root.join("icon_detect").join("model.pt")
  }

  pub fn captioner(&self) -> PathBuf {
    self.root.join("icon_caption")
  }

  pub fn validate(&self) -> Result<(), ModelError> {
    let detector = self.detector();
    if !detector.is_file() {
      return Err(ModelError::WeightsMissing(detector));
    }
    let captioner = self.captioner();
    if !captioner.is_dir() {
      return Err(ModelError::WeightsMissing(captioner));
    }
    Ok(())
  }
}

fn install_dir() -> Result<PathBuf, ModelError> {
  let exe = std::env::current_exe()?;
  exe
    .parent()
    .map(Path::to_path_buf)
    .ok_or_else(|| ModelError::ModelPath(format!("无法确定安装目录: {}", exe.display())))
}

pub struct OmniParserBuilder {
  weights: WeightsLayout,
  device: DeviceRequest,
  box_threshold: f32,
  caption_model: String,
  worker: Option<String>,
  startup_timeout: Duration,
}

impl FromUrlWithScheme for OmniParserBuilder {
  const SCHEME: &'static str = "omniparser";
}

impl FromUrl for OmniParserBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::ModelPath(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let path = urlencoding::decode(url.path())
      .map_err(|e| ModelError::ModelPath(format!("模型路径编码错误: {e}")))?;
    let path = if path.is_empty() || path == "/" {
      PathBuf::from(OMNIPARSER_WEIGHTS_DIR)
    } else {
      PathBuf::from(&*path)
    };

    let mut builder = OmniParserBuilder::new(WeightsLayout::resolve(&path)?);
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "device" => builder.device = value.parse()?,
        "box_threshold" => {
          builder.box_threshold = value
            .parse()
            .map_err(|e| ModelError::ModelPath(format!("box_threshold 无效: {e}")))?;
        }
        "caption_model" => builder.caption_model = value.into_owned(),
        "worker" => builder.worker = Some(value.into_owned()),
        "startup_timeout_secs" => {
          let secs: u64 = value
            .parse()
            .map_err(|e| ModelError::ModelPath(format!("startup_timeout_secs 无效: {e}")))?;
          builder.startup_timeout = Duration::from_secs(secs);
        }
        other => warn!("忽略未知的模型参数: {}", other),
      }
    }

    Ok(builder)
  }
}

impl OmniParserBuilder {
  pub fn new(weights: WeightsLayout) -> Self {
    Self {
      weights,
      device: DeviceRequest::Auto,
      box_threshold: OMNIPARSER_BOX_THRESHOLD,
      caption_model: OMNIPARSER_CAPTION_MODEL.to_string(),
      worker: None,
      startup_timeout: OMNIPARSER_STARTUP_TIMEOUT,
    }
  }

  pub fn device(mut self, device: DeviceRequest) -> Self {
    self.device = device;
    self
  }

  pub fn worker(mut self, command: impl Into<String>) -> Self {
    self.worker = Some(command.into());
    self
  }

  pub fn box_threshold(mut self, threshold: f32) -> Self {
    self.box_threshold = threshold;
    self
  }

  /// 等待工作进程完成模型加载的最长时间
  pub fn startup_timeout(mut self, timeout: Duration) -> Self {
    self.startup_timeout = timeout;
    self
  }

  pub fn weights(&self) -> &WeightsLayout {
    &self.weights
  }

  pub fn requested_device(&self) -> DeviceRequest {
    self.device
  }

  fn worker_command(&self) -> Result<String, ModelError> {
    if let Some(worker) = &self.worker {
      return Ok(worker.clone());
    }
    let beside = install_dir()?.join(OMNIPARSER_DEFAULT_WORKER);
    if beside.is_file() {
      Ok(beside.display().to_string())
    } else {
      Ok(OMNIPARSER_DEFAULT_WORKER.to_string())
    }
  }

  pub fn build(self) -> Result<OmniParser, ModelError> {
    info!("检查模型权重目录: {}", self.weights.root().display());
    self.weights.validate()?;
    debug!("检测模型: {}", self.weights.detector().display());
    debug!("描述模型: {}", self.weights.captioner().display());

    let device = self.device.resolve();
    let command = self.worker_command()?;
    let mut parts = command.split_whitespace();
    let program = parts
      .next()
      .ok_or_else(|| ModelError::ModelPath("模型工作进程命令为空".to_string()))?;

    info!("启动模型工作进程: {} (设备: {})", command, device);
    let mut child = Command::new(program)
      .args(parts)
      .arg("--som-model")
      .arg(self.weights.detector())
      .arg("--caption-model")
      .arg(self.weights.captioner())
      .arg("--caption-model-name")
      .arg(&self.caption_model)
      .arg("--box-threshold")
      .arg(self.box_threshold.to_string())
      .arg("--device")
      .arg(device.as_str())
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::inherit())
      .spawn()
      .map_err(|e| ModelError::Spawn(command.clone(), e))?;

    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
      let _ = child.kill();
      return Err(ModelError::Protocol("工作进程标准输入输出不可用".to_string()));
    };

    let lines = match spawn_reader(stdout) {
      Ok(lines) => lines,
      Err(e) => {
        let _ = child.kill();
        return Err(ModelError::Io(e));
      }
    };

    let mut parser = OmniParser {
      child,
      stdin,
      lines,
      device,
      next_id: 0,
    };

    info!("等待模型加载完成，最长 {:?}", self.startup_timeout);
    match parser.read_reply(None, Some(self.startup_timeout)) {
      Ok(WorkerReply::Ready { device: reported }) => {
        parser.device = reported.parse().unwrap_or_else(|_| {
          warn!("工作进程报告了未知设备 '{}', 沿用 {}", reported, device);
          device
        });
        info!("模型加载完成，运行设备: {}", parser.device);
        Ok(parser)
      }
      Ok(WorkerReply::Error { error, .. }) => {
        error!("模型加载失败: {}", error);
        Err(ModelError::LoadFailed(error))
      }
      Ok(WorkerReply::Parsed { .. }) => Err(ModelError::Protocol(
        "握手阶段收到了解析结果".to_string(),
      )),
      Err(ModelError::WorkerExited) => {
        let status = parser.child.wait()?;
        Err(ModelError::LoadFailed(format!(
          "model worker exited during startup ({status})"
        )))
      }
      Err(e) => Err(e),
    }
  }
}

/// 在独立线程中按行读取工作进程输出，握手阶段可以限时等待
fn spawn_reader(stdout: ChildStdout) -> std::io::Result<Receiver<String>> {
  let (tx, rx) = mpsc::channel();
  std::thread::Builder::new()
    .name("omniparser-stdout".to_string())
    .spawn(move || {
      let mut reader = BufReader::new(stdout);
      let mut line = String::new();
      loop {
        line.clear();
        match reader.read_line(&mut line) {
          Ok(0) => break,
          Ok(_) => {
            if tx.send(line.clone()).is_err() {
              break;
            }
          }
          Err(e) if e.kind() == ErrorKind::InvalidData => {
            warn!("工作进程输出了非 UTF-8 内容: {}", e);
          }
          Err(e) => {
            warn!("读取工作进程输出失败: {}", e);
            break;
          }
        }
      }
    })?;
  Ok(rx)
}

/// 常驻的 OmniParser 工作进程，进程生命周期内只启动一次
pub struct OmniParser {
  child: Child,
  stdin: ChildStdin,
  lines: Receiver<String>,
  device: Device,
  next_id: u64,
}

impl OmniParser {
  /// 读取下一条协议应答
  ///
  /// 无法识别的行当作日志跳过；编号与 `expected` 不符的应答属于更早的请求，直接丢弃。
  fn read_reply(
    &mut self,
    expected: Option<u64>,
    timeout: Option<Duration>,
  ) -> Result<WorkerReply, ModelError> {
    let deadline = timeout.map(|limit| (limit, Instant::now() + limit));
    loop {
      let line = match deadline {
        Some((limit, deadline)) => {
          match self
            .lines
            .recv_timeout(deadline.saturating_duration_since(Instant::now()))
          {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => return Err(ModelError::HandshakeTimeout(limit)),
            Err(RecvTimeoutError::Disconnected) => return Err(ModelError::WorkerExited),
          }
        }
        None => self.lines.recv().map_err(|_| ModelError::WorkerExited)?,
      };

      let trimmed = line.trim();
      if trimmed.is_empty() {
        continue;
      }
      // 模型库自身打印的日志不属于协议内容
      if !trimmed.starts_with('{') {
        debug!("工作进程输出: {}", trimmed);
        continue;
      }
      let reply = match WorkerReply::from_line(trimmed) {
        Ok(reply) => reply,
        Err(e) => {
          warn!("忽略无法识别的工作进程输出: {} ({})", trimmed, e);
          continue;
        }
      };
      if let (Some(expected), Some(id)) = (expected, reply.request_id())
        && id != expected
      {
        warn!("丢弃过期的工作进程应答: 期望请求 {}，收到请求 {}", expected, id);
        continue;
      }
      return Ok(reply);
    }
  }

  fn send(&mut self, request: &WorkerRequest<'_>) -> Result<(), ModelError> {
    let line = request.to_line()?;
    self
      .stdin
      .write_all(line.as_bytes())
      .and_then(|_| self.stdin.flush())
      .map_err(|e| match e.kind() {
        ErrorKind::BrokenPipe => ModelError::WorkerExited,
        _ => ModelError::Io(e),
      })
  }
}

impl ScreenParser for OmniParser {
  fn device(&self) -> Device {
    self.device
  }

  fn parse(&mut self, image_base64: &str) -> Result<ParseOutput, ModelError> {
    self.next_id += 1;
    let id = self.next_id;
    self.send(&WorkerRequest { id, image_base64 })?;
    self.read_reply(Some(id), None)?.into_parse_output()
  }
}

impl Drop for OmniParser {
  fn drop(&mut self) {
    debug!("关闭模型工作进程");
    let _ = self.child.kill();
    let _ = self.child.wait();
  }
}
