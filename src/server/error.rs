// 该文件是 Shanan （山南西风） 项目的一部分。
// src/server/error.rs - HTTP 错误响应
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

use axum::{
  Json,
  extract::rejection::BytesRejection,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::warn;

use crate::{classifier::ClassifyError, pipeline::PipelineError, secondary::SecondaryError};

pub type ApiResult<T> = Result<T, ApiError>;

/// 请求级错误，统一转换为 `{"error": "..."}`
#[derive(Error, Debug)]
pub enum ApiError {
  #[error("{0}")]
  BadRequest(String),
  #[error("Not Found")]
  NotFound,
  #[error("Method not allowed")]
  MethodNotAllowed,
  #[error("{0}")]
  PayloadTooLarge(String),
  #[error("{0}")]
  UnprocessableEntity(String),
  #[error("{0}")]
  ServiceUnavailable(String),
  #[error("{0}")]
  Internal(String),
}

impl ApiError {
  pub fn status(&self) -> StatusCode {
    match self {
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::NotFound => StatusCode::NOT_FOUND,
      ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
      ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
      ApiError::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
      ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
      ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      warn!("请求处理失败 ({}): {}", status, self);
    }
    let body = serde_json::json!({ "error": self.to_string() });
    (status, Json(body)).into_response()
  }
}

impl From<BytesRejection> for ApiError {
  fn from(rejection: BytesRejection) -> Self {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
      ApiError::PayloadTooLarge(rejection.body_text())
    } else {
      ApiError::BadRequest(rejection.body_text())
    }
  }
}

impl From<PipelineError> for ApiError {
  fn from(err: PipelineError) -> Self {
    match err {
      PipelineError::Classify(e) => match e {
        ClassifyError::Input(_) => ApiError::BadRequest(e.to_string()),
        ClassifyError::Registry(_) => ApiError::ServiceUnavailable(e.to_string()),
        ClassifyError::Engine(_) | ClassifyError::NoOutput | ClassifyError::EmptyOutput => {
          ApiError::UnprocessableEntity(e.to_string())
        }
        ClassifyError::TopK(_) => ApiError::Internal(e.to_string()),
      },
      PipelineError::Secondary(e) => match e {
        SecondaryError::Poisoned => ApiError::Internal(e.to_string()),
        _ => ApiError::UnprocessableEntity(e.to_string()),
      },
      PipelineError::MissingFeatures
      | PipelineError::FeatureLength { .. }
      | PipelineError::NonFiniteFeature => ApiError::BadRequest(err.to_string()),
      PipelineError::NoSecondary => ApiError::Internal(err.to_string()),
    }
  }
}
