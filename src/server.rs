// 该文件是 Shanan （山南西风） 项目的一部分。
// src/server.rs - HTTP 分类服务
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

use std::future::Future;
use std::sync::Arc;

use axum::{
  Json, Router,
  body::Bytes,
  extract::{DefaultBodyLimit, State, rejection::BytesRejection},
  http::{HeaderMap, header},
  routing::post,
};
use base64::Engine;
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::pipeline::{ClassifyRequest, Pipeline, PipelineOutput};

pub mod error;
pub use self::error::{ApiError, ApiResult};

pub const CLASSIFY_ROUTE: &str = "/api/classify";
/// 单个请求体上限
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Deserialize)]
struct ClassifyBody {
  image: Option<String>,
  features: Option<Vec<f32>>,
}

pub fn router(pipeline: Arc<Pipeline>) -> Router {
  router_with_body_limit(pipeline, MAX_BODY_BYTES)
}

pub fn router_with_body_limit(pipeline: Arc<Pipeline>, limit: usize) -> Router {
  Router::new()
    .route(CLASSIFY_ROUTE, post(classify).fallback(method_not_allowed))
    .fallback(not_found)
    .layer(DefaultBodyLimit::max(limit))
    .with_state(pipeline)
}

/// 监听并服务，`shutdown` 完成后停止接收新连接
pub async fn serve<F>(
  listener: TcpListener,
  pipeline: Arc<Pipeline>,
  shutdown: F,
) -> std::io::Result<()>
where
  F: Future<Output = ()> + Send + 'static,
{
  if let Ok(addr) = listener.local_addr() {
    info!("分类服务监听于 http://{}{}", addr, CLASSIFY_ROUTE);
  }
  axum::serve(listener, router(pipeline))
    .with_graceful_shutdown(shutdown)
    .await
}

async fn classify(
  State(pipeline): State<Arc<Pipeline>>,
  headers: HeaderMap,
  body: Result<Bytes, BytesRejection>,
) -> ApiResult<Json<PipelineOutput>> {
  let body = body?;
  let request = parse_request(&headers, &body)?;
  debug!(
    "收到分类请求: 图像 {} 字节, 特征 {:?} 个",
    request.image.len(),
    request.features.as_ref().map(|f| f.len())
  );

  // 推理是同步阻塞调用，放到阻塞线程池中执行到结束
  let output = tokio::task::spawn_blocking(move || pipeline.run(&request))
    .await
    .map_err(|e| ApiError::Internal(format!("推理任务异常终止: {}", e)))??;
  Ok(Json(output))
}

async fn method_not_allowed() -> ApiError {
  ApiError::MethodNotAllowed
}

async fn not_found() -> ApiError {
  ApiError::NotFound
}

fn is_json(headers: &HeaderMap, body: &[u8]) -> bool {
  let declared = headers
    .get(header::CONTENT_TYPE)
    .and_then(|v| v.to_str().ok())
    .map(|v| v.contains("application/json"))
    .unwrap_or(false);
  declared || body.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'{')
}

/// 解析请求体：JSON 对象或原始图像字节
pub fn parse_request(headers: &HeaderMap, body: &[u8]) -> ApiResult<ClassifyRequest> {
  if !is_json(headers, body) {
    return Ok(ClassifyRequest {
      image: body.to_vec(),
      features: None,
    });
  }

  let parsed: ClassifyBody = serde_json::from_slice(body)
    .map_err(|e| ApiError::BadRequest(format!("JSON 解析失败: {}", e)))?;
  let image = parsed
    .image
    .ok_or_else(|| ApiError::BadRequest("缺少必需字段: image".to_string()))?;

  Ok(ClassifyRequest {
    image: decode_image_field(&image),
    features: parsed.features,
  })
}

/// `image` 字段可以是 base64（允许 data URL 前缀），否则按原始字节处理
fn decode_image_field(field: &str) -> Vec<u8> {
  let payload = match field.split_once(";base64,") {
    Some((prefix, data)) if prefix.starts_with("data:") => data,
    _ => field,
  };
  match base64::engine::general_purpose::STANDARD.decode(payload.trim()) {
    Ok(bytes) => bytes,
    Err(_) => field.as_bytes().to_vec(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use axum::http::HeaderValue;

  fn json_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
      header::CONTENT_TYPE,
      HeaderValue::from_static("application/json"),
    );
    headers
  }

  #[test]
  fn raw_body_is_image_bytes() {
    let body = [0x89u8, b'P', b'N', b'G'];
    let request = parse_request(&HeaderMap::new(), &body).unwrap();
    assert_eq!(request.image, body.to_vec());
    assert!(request.features.is_none());
  }

  #[test]
  fn json_detected_without_content_type() {
    let body = br#"  {"image": "aGVsbG8=", "features": [1, 2.5]}"#;
    let request = parse_request(&HeaderMap::new(), body).unwrap();
    assert_eq!(request.image, b"hello".to_vec());
    assert_eq!(request.features, Some(vec![1.0, 2.5]));
  }

  #[test]
  fn data_url_prefix_is_stripped() {
    let body = br#"{"image": "data:image/png;base64,aGVsbG8="}"#;
    let request = parse_request(&json_headers(), body).unwrap();
    assert_eq!(request.image, b"hello".to_vec());
  }

  #[test]
  fn non_base64_image_is_taken_verbatim() {
    let body = br#"{"image": "not base64!"}"#;
    let request = parse_request(&json_headers(), body).unwrap();
    assert_eq!(request.image, b"not base64!".to_vec());
  }

  #[test]
  fn malformed_features_are_rejected() {
    let body = br#"{"image": "aGVsbG8=", "features": [1.0, "x"]}"#;
    let err = parse_request(&json_headers(), body).unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));
  }

  #[test]
  fn missing_image_is_rejected() {
    let body = br#"{"features": [1.0]}"#;
    let err = parse_request(&json_headers(), body).unwrap_err();
    assert!(err.to_string().contains("image"));
  }
}
