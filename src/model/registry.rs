// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/registry.rs - 模型注册表
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

use std::sync::{Mutex, OnceLock};

use thiserror::Error;
use tracing::{error, info};

use crate::{
  frame::RgbNhwcFrame,
  model::{EngineError, InputShape, NpuEngine},
};

pub type EngineLoader =
  Box<dyn Fn() -> Result<Box<dyn NpuEngine>, EngineError> + Send + Sync + 'static>;

#[derive(Error, Debug, Clone)]
pub enum RegistryError {
  #[error("模型初始化失败: {0}")]
  InitFailed(String),
}

/// 已加载的加速器模型，进程内只存在一份
///
/// 输入尺寸在加载时读取一次；设备上下文不保证可并发提交，
/// 所有推理通过互斥锁串行执行。
pub struct ModelHandle {
  engine: Mutex<Box<dyn NpuEngine>>,
  shape: InputShape,
}

impl ModelHandle {
  pub fn new(engine: Box<dyn NpuEngine>) -> Self {
    let shape = engine.input_shape();
    Self {
      engine: Mutex::new(engine),
      shape,
    }
  }

  pub fn input_shape(&self) -> InputShape {
    self.shape
  }

  pub fn infer(&self, frame: &RgbNhwcFrame) -> Result<Vec<Box<[f32]>>, EngineError> {
    let mut engine = self
      .engine
      .lock()
      .map_err(|_| EngineError::InferenceFailed("模型上下文锁已损坏".to_string()))?;
    engine.infer(frame)
  }
}

/// 模型注册表，在启动时构造一次并传入请求处理上下文
///
/// 首次访问时调用加载器，无论多少线程同时触发，加载器只运行一次，
/// 其余调用者阻塞直到初始化完成。初始化失败的结果同样只记录一次。
pub struct ModelRegistry {
  loader: EngineLoader,
  primary: OnceLock<Result<ModelHandle, RegistryError>>,
}

impl ModelRegistry {
  pub fn new<F>(loader: F) -> Self
  where
    F: Fn() -> Result<Box<dyn NpuEngine>, EngineError> + Send + Sync + 'static,
  {
    Self {
      loader: Box::new(loader),
      primary: OnceLock::new(),
    }
  }

  /// 用已加载的引擎直接构造
  pub fn preloaded(engine: Box<dyn NpuEngine>) -> Self {
    let registry = Self::new(|| {
      Err(EngineError::ModelInvalid(
        "预加载的注册表不应再次加载".to_string(),
      ))
    });
    let _ = registry.primary.set(Ok(ModelHandle::new(engine)));
    registry
  }

  pub fn primary(&self) -> Result<&ModelHandle, RegistryError> {
    self
      .primary
      .get_or_init(|| {
        info!("初始化加速器模型");
        match (self.loader)() {
          Ok(engine) => {
            let handle = ModelHandle::new(engine);
            let shape = handle.input_shape();
            info!(
              "模型初始化完成, 输入尺寸: {}x{}x{}",
              shape.width, shape.height, shape.channels
            );
            Ok(handle)
          }
          Err(e) => {
            error!("模型初始化失败: {}", e);
            Err(RegistryError::InitFailed(e.to_string()))
          }
        }
      })
      .as_ref()
      .map_err(Clone::clone)
  }

  pub fn is_initialized(&self) -> bool {
    self.primary.get().is_some()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  };
  use std::time::Duration;

  struct ConstEngine;

  impl NpuEngine for ConstEngine {
    fn input_shape(&self) -> InputShape {
      InputShape {
        width: 4,
        height: 2,
        channels: 3,
      }
    }

    fn infer(&mut self, _input: &RgbNhwcFrame) -> Result<Vec<Box<[f32]>>, EngineError> {
      Ok(vec![vec![0.25, 0.75].into_boxed_slice()])
    }
  }

  #[test]
  fn concurrent_first_calls_load_once() {
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = loads.clone();
    let registry = ModelRegistry::new(move || {
      counter.fetch_add(1, Ordering::SeqCst);
      std::thread::sleep(Duration::from_millis(50));
      Ok(Box::new(ConstEngine) as Box<dyn NpuEngine>)
    });

    std::thread::scope(|s| {
      for _ in 0..16 {
        s.spawn(|| {
          let handle = registry.primary().unwrap();
          assert_eq!(handle.input_shape().width, 4);
          assert_eq!(handle.input_shape().height, 2);
        });
      }
    });

    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert!(registry.is_initialized());
  }

  #[test]
  fn init_failure_is_sticky_and_not_retried() {
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = loads.clone();
    let registry = ModelRegistry::new(move || {
      counter.fetch_add(1, Ordering::SeqCst);
      Err(EngineError::ModelPathError("missing.rknn".to_string()))
    });

    assert!(matches!(registry.primary(), Err(RegistryError::InitFailed(_))));
    assert!(matches!(registry.primary(), Err(RegistryError::InitFailed(_))));
    assert_eq!(loads.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn preloaded_registry_serves_inference() {
    let registry = ModelRegistry::preloaded(Box::new(ConstEngine));
    assert!(registry.is_initialized());
    let handle = registry.primary().unwrap();
    let outputs = handle.infer(&RgbNhwcFrame::with_shape(2, 4)).unwrap();
    assert_eq!(&*outputs[0], &[0.25, 0.75]);
  }
}
