// 该文件是 Shanan-Omni （山南西风·界面解析） 项目的一部分。
// src/server.rs - HTTP 请求处理
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

//! `POST /parse` 与 `GET /health` 两个端点。
//!
//! 解析请求在阻塞线程池中执行并受超时约束；模型调用由检测适配器串行化，
//! 健康检查只读取无锁状态，不会等待进行中的解析。

use std::{sync::Arc, time::Duration, time::Instant};

use actix_web::{
  App, HttpRequest, HttpResponse, HttpServer,
  body::MessageBody,
  dev::{Service, ServiceFactory, ServiceRequest, ServiceResponse},
  http::Method,
  web,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::{
  element::{ParseResponse, normalize},
  frame::{Screenshot, strip_data_url},
  model::{DetectionAdapter, ModelError},
  output::{OverlayPolicy, draw::Draw},
};

mod error;
pub use self::error::{ApiError, ErrorBody, NO_IMAGE_MESSAGE, ParseFailure};

pub const IMAGE_FIELD: &str = "image_base64";

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8765;
const DEFAULT_WORKERS: usize = 2;
const DEFAULT_MAX_BODY_BYTES: usize = 32 * 1024 * 1024;
const DEFAULT_INFERENCE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct ServerConfig {
  pub host: String,
  pub port: u16,
  pub workers: usize,
  pub max_body_bytes: usize,
  pub inference_timeout: Duration,
  /// 缺少图像字段时返回 400 而不是 200
  pub strict_status: bool,
  pub overlay: OverlayPolicy,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host: DEFAULT_HOST.to_string(),
      port: DEFAULT_PORT,
      workers: DEFAULT_WORKERS,
      max_body_bytes: DEFAULT_MAX_BODY_BYTES,
      inference_timeout: DEFAULT_INFERENCE_TIMEOUT,
      strict_status: false,
      overlay: OverlayPolicy::default(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
  pub status: String,
  pub device: String,
  pub model_loaded: bool,
}

/// 服务上下文，启动时构造一次，以共享引用传给所有请求
pub struct ServiceContext {
  adapter: Arc<DetectionAdapter>,
  draw: Draw,
  config: ServerConfig,
}

impl ServiceContext {
  pub fn new(adapter: Arc<DetectionAdapter>, config: ServerConfig) -> Self {
    Self {
      adapter,
      draw: Draw::default(),
      config,
    }
  }

  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  pub fn adapter(&self) -> &Arc<DetectionAdapter> {
    &self.adapter
  }

  pub fn config(&self) -> &ServerConfig {
    &self.config
  }

  pub fn health(&self) -> HealthStatus {
    HealthStatus {
      status: "ok".to_string(),
      device: self.adapter.device().to_string(),
      model_loaded: self.adapter.is_loaded(),
    }
  }

  /// 解码截图、调用模型、整理结果，在阻塞线程中执行
  ///
  /// `deadline` 之后才轮到模型的请求不再调用模型。
  pub fn parse_blocking(
    &self,
    image_base64: &str,
    deadline: Option<Instant>,
  ) -> Result<ParseResponse, ParseFailure> {
    // 尺寸取自原图，而不是模型内部缩放后的副本
    let screenshot = Screenshot::decode_base64(image_base64)?;
    let output = self
      .adapter
      .parse_before(strip_data_url(image_base64), deadline)?;
    let elements = normalize(output.items);
    let labeled_image =
      self
        .config
        .overlay
        .select(output.labeled_image, &self.draw, &screenshot, &elements)?;
    Ok(ParseResponse::new(screenshot.size(), elements, labeled_image))
  }
}

/// 构造应用，测试与正式服务共用
pub fn build_app(
  ctx: web::Data<ServiceContext>,
) -> App<
  impl ServiceFactory<
    ServiceRequest,
    Config = (),
    Response = ServiceResponse<impl MessageBody>,
    Error = actix_web::Error,
    InitError = (),
  >,
> {
  App::new()
    .app_data(ctx)
    .wrap_fn(|req, srv| {
      let method = req.method().clone();
      let path = req.path().to_owned();
      let now = Instant::now();
      let fut = srv.call(req);
      async move {
        let res = fut.await?;
        info!(
          "{} {} -> {} ({:.2?})",
          method,
          path,
          res.status().as_u16(),
          now.elapsed()
        );
        Ok(res)
      }
    })
    .service(
      web::resource("/parse")
        .route(web::post().to(parse_handler))
        .default_service(web::to(not_found)),
    )
    .service(
      web::resource("/health")
        .route(web::get().to(health_handler))
        .route(web::post().to(health_handler))
        .default_service(web::to(not_found)),
    )
    .default_service(web::to(not_found))
}

pub async fn run(ctx: web::Data<ServiceContext>) -> std::io::Result<()> {
  let config = ctx.config().clone();
  let server = HttpServer::new(move || build_app(ctx.clone()))
    .workers(config.workers.max(1))
    .bind((config.host.as_str(), config.port))?;

  info!("屏幕解析服务已启动: http://{}:{}", config.host, config.port);
  info!("  POST /parse  - 解析截图并返回界面元素");
  info!("  GET  /health - 服务健康检查");
  server.run().await
}

async fn health_handler(ctx: web::Data<ServiceContext>) -> HttpResponse {
  HttpResponse::Ok().json(ctx.health())
}

async fn not_found(req: HttpRequest) -> HttpResponse {
  warn!("未知的请求路径: {} {}", req.method(), req.path());
  if req.method() == Method::POST {
    HttpResponse::NotFound().json(ErrorBody {
      error: format!("Unknown endpoint: {}", req.path()),
    })
  } else {
    HttpResponse::NotFound().finish()
  }
}

/// 请求体读取结果：超出上限返回 413，连接中断或长度不足返回 500
fn collect_body<E>(
  read: Result<Result<web::Bytes, actix_web::Error>, E>,
  limit: usize,
) -> Result<web::Bytes, ApiError> {
  match read {
    Ok(Ok(body)) => Ok(body),
    Ok(Err(e)) => {
      error!("读取请求体失败: {}", e);
      Err(ApiError::MalformedBody(format!(
        "failed to read request body: {e}"
      )))
    }
    Err(_) => {
      warn!("请求体超过上限 {} 字节", limit);
      Err(ApiError::TooLarge(limit))
    }
  }
}

async fn parse_handler(
  ctx: web::Data<ServiceContext>,
  payload: web::Payload,
) -> Result<HttpResponse, ApiError> {
  let strict = ctx.config.strict_status;

  let limit = ctx.config.max_body_bytes;
  let body = collect_body(payload.to_bytes_limited(limit).await, limit)?;
  debug!("收到解析请求，请求体 {} 字节", body.len());

  let mut request: Value = serde_json::from_slice(&body).map_err(|e| {
    error!("请求体不是合法的 JSON: {}", e);
    ApiError::MalformedBody(format!("invalid JSON body: {e}"))
  })?;

  if !ctx.adapter.is_loaded() {
    warn!("模型尚未加载，拒绝解析请求");
    return Err(ApiError::NotLoaded { strict });
  }

  let image_base64 = match request.get_mut(IMAGE_FIELD).map(Value::take) {
    Some(Value::String(image)) => image,
    _ => return Err(ApiError::MissingImage { strict }),
  };

  let timeout = ctx.config.inference_timeout;
  let deadline = Instant::now().checked_add(timeout);
  let job_ctx = ctx.clone();
  let job = web::block(move || job_ctx.parse_blocking(&image_base64, deadline));

  let result = match actix_web::rt::time::timeout(timeout, job).await {
    Ok(Ok(Err(ParseFailure::Model(ModelError::DeadlineExceeded)))) | Err(_) => {
      Err(ParseFailure::Timeout(timeout))
    }
    Ok(Ok(result)) => result,
    Ok(Err(_)) => Err(ParseFailure::Aborted),
  };

  match result {
    Ok(response) => {
      info!(
        "解析完成: {}x{}，元素 {} 个",
        response.image_size.width, response.image_size.height, response.element_count
      );
      Ok(HttpResponse::Ok().json(response))
    }
    Err(ParseFailure::Model(ModelError::NotLoaded)) => Err(ApiError::NotLoaded { strict }),
    Err(failure) => {
      let message = failure.to_string();
      error!("截图解析失败: {:?}", anyhow::Error::new(failure));
      Err(ApiError::Parse(message))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use actix_web::error::PayloadError;

  #[test]
  fn truncated_body_is_a_read_failure() {
    let read: Result<_, ()> = Ok(Err(PayloadError::Incomplete(None).into()));
    match collect_body(read, 64) {
      Err(ApiError::MalformedBody(message)) => {
        assert!(message.starts_with("failed to read request body"))
      }
      other => panic!("unexpected result: {other:?}"),
    }
  }

  #[test]
  fn body_over_limit_is_too_large() {
    let read: Result<Result<web::Bytes, actix_web::Error>, ()> = Err(());
    assert!(matches!(collect_body(read, 64), Err(ApiError::TooLarge(64))));
  }

  #[test]
  fn complete_body_is_returned() {
    let read: Result<_, ()> = Ok(Ok(web::Bytes::from_static(b"{}")));
    assert_eq!(collect_body(read, 64).unwrap(), web::Bytes::from_static(b"{}"));
  }
}
