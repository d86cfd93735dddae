// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/worker.rs - 独占线程上的推理引擎
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

use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info};

use crate::{
  frame::RgbNhwcFrame,
  model::{EngineError, InputShape, NpuEngine},
};

type Reply = Result<Vec<Box<[f32]>>, EngineError>;
type Job = (RgbNhwcFrame, Sender<Reply>);

/// 设备上下文不能跨线程移动的引擎
pub trait LocalEngine {
  fn input_shape(&self) -> InputShape;
  fn infer(&mut self, input: &RgbNhwcFrame) -> Reply;
}

/// 在专属线程内创建并持有 [`LocalEngine`]，推理请求经通道转发
///
/// 引擎从创建到销毁都不离开这个线程。丢弃 `EngineThread` 时关闭任务通道，
/// 等待线程处理完手上的帧后退出。
pub struct EngineThread {
  jobs: Option<Sender<Job>>,
  shape: InputShape,
  worker: Option<JoinHandle<()>>,
}

impl EngineThread {
  pub fn spawn<F, E>(name: &str, open: F) -> Result<Self, EngineError>
  where
    F: FnOnce() -> Result<E, EngineError> + Send + 'static,
    E: LocalEngine,
  {
    let (init_tx, init_rx) = mpsc::channel::<Result<InputShape, EngineError>>();
    let (jobs, job_rx) = mpsc::channel::<Job>();

    let worker = thread::Builder::new()
      .name(name.to_string())
      .spawn(move || {
        let mut engine = match open() {
          Ok(engine) => engine,
          Err(e) => {
            let _ = init_tx.send(Err(e));
            return;
          }
        };
        let _ = init_tx.send(Ok(engine.input_shape()));

        for (frame, reply) in job_rx {
          let _ = reply.send(engine.infer(&frame));
        }
        debug!("推理线程退出");
      })?;

    let shape = match init_rx.recv() {
      Ok(Ok(shape)) => shape,
      Ok(Err(e)) => {
        let _ = worker.join();
        return Err(e);
      }
      Err(_) => {
        error!("推理线程在初始化期间退出");
        return Err(EngineError::ModelInvalid(
          "推理线程在初始化期间退出".to_string(),
        ));
      }
    };
    info!("推理线程 {} 已就绪", name);

    Ok(Self {
      jobs: Some(jobs),
      shape,
      worker: Some(worker),
    })
  }
}

impl NpuEngine for EngineThread {
  fn input_shape(&self) -> InputShape {
    self.shape
  }

  fn infer(&mut self, input: &RgbNhwcFrame) -> Reply {
    let closed = || EngineError::InferenceFailed("推理线程已退出".to_string());
    let jobs = self.jobs.as_ref().ok_or_else(closed)?;
    let (reply_tx, reply_rx) = mpsc::channel();
    jobs.send((input.clone(), reply_tx)).map_err(|_| closed())?;
    reply_rx.recv().map_err(|_| closed())?
  }
}

impl Drop for EngineThread {
  fn drop(&mut self) {
    drop(self.jobs.take());
    if let Some(worker) = self.worker.take() {
      if worker.join().is_err() {
        error!("推理线程异常退出");
      }
    }
  }
}
