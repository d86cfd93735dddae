// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/csv_record.rs - CSV 决策记录
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

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use tracing::{debug, info};

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{DecisionRecord, RecordError, RecordSink},
  url_file_path,
};

pub const CSV_HEADER: &str =
  "timestamp,class_id,probability,secondary_score,primary_score,processing_time_seconds";

/// 追加写入的 CSV 记录文件，所有写入共享同一把锁
pub struct CsvRecordOutput {
  file: Mutex<File>,
}

impl FromUrlWithScheme for CsvRecordOutput {
  const SCHEME: &'static str = "csv";
}

impl FromUrl for CsvRecordOutput {
  type Error = RecordError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(RecordError::SchemeMismatch);
    }
    Self::open(url_file_path(uri))
  }
}

impl CsvRecordOutput {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RecordError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() && !parent.exists() {
        std::fs::create_dir_all(parent)?;
      }
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    if file.metadata()?.len() == 0 {
      writeln!(file, "{}", CSV_HEADER)?;
    }
    info!("决策记录文件: {}", path.display());

    Ok(Self {
      file: Mutex::new(file),
    })
  }

  fn format_row(record: &DecisionRecord) -> String {
    format!(
      "{},{},{:.6},{:.6},{:.6},{:.6}\n",
      record.timestamp.format("%Y-%m-%d %H:%M:%S"),
      record.result.class_id,
      record.result.probability,
      record.result.secondary_score,
      record.result.primary_score,
      record.elapsed.as_secs_f64()
    )
  }
}

impl RecordSink for CsvRecordOutput {
  fn record(&self, record: &DecisionRecord) -> Result<(), RecordError> {
    let row = Self::format_row(record);
    let mut file = self.file.lock().map_err(|_| RecordError::Poisoned)?;
    file.write_all(row.as_bytes())?;
    file.flush()?;
    debug!("写入决策记录: {}", row.trim_end());
    Ok(())
  }
}
