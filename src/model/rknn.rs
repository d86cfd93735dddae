// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/rknn.rs - RKNN 加速器推理引擎
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

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbNhwcFrame,
  model::{EngineError, EngineThread, InputShape, LocalEngine, TensorLayout, parse_dims},
  url_file_path, url_query,
};

const RKNN_NUM_INPUTS: u32 = 1;
const RKNN_WORKER_NAME: &str = "rknn-worker";

/// RKNN 上下文，只在创建它的推理线程上使用
pub struct RknnEngine {
  context: Context,
  shape: InputShape,
  num_outputs: u32,
}

/// 从 `rknn:///path/model.rknn?layout=nhwc&dims=3,224,224` 构建
///
/// `dims` 按 RKNN 输入属性的维度顺序给出：NHWC 为 `c,w,h`，NCHW 为 `w,h,c`。
pub struct RknnBuilder {
  model_path: String,
  flags: InitFlags,
  layout: TensorLayout,
  dims: [u32; 3],
}

impl FromUrlWithScheme for RknnBuilder {
  const SCHEME: &'static str = "rknn";
}

impl FromUrl for RknnBuilder {
  type Error = EngineError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(EngineError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let layout = match url_query::<String>(url, "layout") {
      None => TensorLayout::Nhwc,
      Some(name) => TensorLayout::parse(&name)
        .ok_or_else(|| EngineError::ModelPathError(format!("不支持的输入排布: {}", name)))?,
    };
    let dims = match url_query::<String>(url, "dims") {
      None => layout.default_dims(),
      Some(text) => parse_dims(&text)
        .ok_or_else(|| EngineError::ModelPathError(format!("无效的输入维度: {}", text)))?,
    };

    Ok(RknnBuilder {
      model_path: url_file_path(url),
      flags: InitFlags::default(),
      layout,
      dims,
    })
  }
}

impl RknnBuilder {
  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn input_shape(&self) -> InputShape {
    InputShape::from_dims(self.layout, self.dims)
  }

  /// 在专属线程上创建上下文，返回可跨线程调用的引擎
  pub fn build(self) -> Result<EngineThread, EngineError> {
    EngineThread::spawn(RKNN_WORKER_NAME, move || self.open())
  }

  fn open(self) -> Result<RknnEngine, EngineError> {
    info!("加载模型文件: {}", self.model_path);
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, self.flags)?;

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("模型驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!("查询 SDK 版本失败: {}", e);
        return Err(EngineError::ModelInvalid(format!("无法查询 SDK 版本: {}", e)));
      }
    }

    let num_inputs = context.num_inputs()?;
    let num_outputs = context.num_outputs()?;
    info!("模型输入数量: {}, 输出数量: {}", num_inputs, num_outputs);

    if num_inputs != RKNN_NUM_INPUTS {
      error!(
        "预期模型输入数量为 {}, 实际为 {}",
        RKNN_NUM_INPUTS, num_inputs
      );
      return Err(EngineError::ModelInvalid(format!(
        "预期模型输入数量为 {}, 实际为 {}",
        RKNN_NUM_INPUTS, num_inputs
      )));
    }
    if num_outputs == 0 {
      return Err(EngineError::ModelInvalid("模型没有输出".to_string()));
    }

    let shape = self.input_shape();
    info!(
      "w={}, h={}, c={}, fmt={:?}",
      shape.width, shape.height, shape.channels, self.layout
    );

    Ok(RknnEngine {
      context,
      shape,
      num_outputs,
    })
  }
}

impl LocalEngine for RknnEngine {
  fn input_shape(&self) -> InputShape {
    self.shape
  }

  fn infer(&mut self, input: &RgbNhwcFrame) -> Result<Vec<Box<[f32]>>, EngineError> {
    debug!("设置模型输入");
    // 帧总是 NHWC 排布，由运行时按模型声明的排布转换
    self
      .context
      .set_input(0, input.as_nhwc(), TensorFormat::NHWC, TensorType::UInt8)?;

    debug!("执行模型推理");
    self.context.run()?;

    debug!("获取模型输出");
    let output = self.context.get_outputs()?;
    let mut tensors = Vec::with_capacity(self.num_outputs as usize);
    for idx in 0..self.num_outputs as usize {
      let data = output.get_f32(idx)?;
      tensors.push(data.to_vec().into_boxed_slice());
    }
    // 输出缓冲随 output 一起释放
    drop(output);

    Ok(tensors)
  }
}
