//! 产物写入服务 - 业务能力层
//!
//! 只负责把一次批量任务的结果写成 CSV，并列出历史产物

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{AppError, AppResult, ConfigError};
use crate::models::action::{ActionLogEntry, ActionType};
use crate::services::column_order;

const ARTIFACT_EXT: &str = "csv";
const RAW_DATA_PREFIX: &str = "Raw_Data";

/// 还没有任何原始数据表时提供给列选择器的固定列
pub const DEFAULT_COLUMNS: [&str; 4] = column_order::PRIORITY_COLUMNS;

/// 产物类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    RawData,
    Log,
}

/// 历史产物
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactInfo {
    pub filename: String,
    pub kind: ArtifactKind,
    pub modified: DateTime<Local>,
    pub size: u64,
}

/// 列选择器的候选列
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnListing {
    pub columns: Vec<String>,
    /// 读取表头的产物；使用默认列时为 None
    pub from_file: Option<String>,
}

/// 产物写入服务
///
/// 职责：
/// - 审计日志 `Log_{Action}_{label}_{ts}.csv` 写到 log 目录
/// - 原始数据 `Raw_Data_{label}_{ts}.csv` 写到 raw_data 目录
/// - 不关心流程，只处理已经汇总好的数据
pub struct ArtifactWriter {
    log_dir: PathBuf,
    raw_data_dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(config: &Config) -> Self {
        Self {
            log_dir: config.log_dir(),
            raw_data_dir: config.raw_data_dir(),
        }
    }

    /// 写审计日志，返回文件名
    pub fn write_action_log(
        &self,
        action: ActionType,
        label: &str,
        entries: &[ActionLogEntry],
    ) -> AppResult<String> {
        let filename = format!(
            "Log_{}_{}_{}.{}",
            action.title(),
            sanitize_file_part(label),
            timestamp(),
            ARTIFACT_EXT
        );
        let path = prepare(&self.log_dir, &filename)?;

        let mut writer = csv::Writer::from_path(&path)
            .map_err(|e| AppError::file_write_failed(path.display().to_string(), e))?;
        for entry in entries {
            writer.serialize(entry)?;
        }
        writer
            .flush()
            .map_err(|e| AppError::file_write_failed(path.display().to_string(), e))?;

        info!("📁 审计日志已保存: {} ({} 行)", filename, entries.len());
        Ok(filename)
    }

    /// 写原始数据表，缺失的单元格写空字符串
    pub fn write_raw_data(
        &self,
        label: &str,
        columns: &[String],
        rows: &[BTreeMap<String, String>],
    ) -> AppResult<String> {
        let filename = format!(
            "Raw_Data_{}_{}.{}",
            sanitize_file_part(label),
            timestamp(),
            ARTIFACT_EXT
        );
        let path = prepare(&self.raw_data_dir, &filename)?;

        let mut writer = csv::Writer::from_path(&path)
            .map_err(|e| AppError::file_write_failed(path.display().to_string(), e))?;
        writer.write_record(columns)?;
        for row in rows {
            writer.write_record(
                columns
                    .iter()
                    .map(|c| row.get(c).map(String::as_str).unwrap_or("")),
            )?;
        }
        writer
            .flush()
            .map_err(|e| AppError::file_write_failed(path.display().to_string(), e))?;

        info!(
            "📁 原始数据已保存: {} ({} 行, {} 列)",
            filename,
            rows.len(),
            columns.len()
        );
        Ok(filename)
    }

    /// 列出两个目录中的产物，最新的在前
    pub fn list_artifacts(&self) -> AppResult<Vec<ArtifactInfo>> {
        let mut artifacts = Vec::new();
        collect(&self.raw_data_dir, ArtifactKind::RawData, &mut artifacts)?;
        collect(&self.log_dir, ArtifactKind::Log, &mut artifacts)?;
        artifacts.sort_by(|a, b| {
            b.modified
                .cmp(&a.modified)
                .then_with(|| b.filename.cmp(&a.filename))
        });
        Ok(artifacts)
    }

    /// 读取某个产物的表头（先找 raw_data，再找 log）
    pub fn artifact_columns(&self, filename: &str) -> AppResult<Vec<String>> {
        let path = self.locate(filename)?;
        let mut reader = open_reader(&path)?;
        let headers = reader
            .headers()
            .map_err(|e| AppError::file_read_failed(path.display().to_string(), e))?;
        Ok(headers.iter().map(str::to_string).collect())
    }

    /// 最近一次原始数据表的列（按智能顺序）；文件名需包含 `survey_name`，
    /// 为空时不过滤。没有匹配的表时返回 [`DEFAULT_COLUMNS`]
    pub fn survey_columns(&self, survey_name: &str) -> AppResult<ColumnListing> {
        let survey = sanitize_file_part(survey_name);
        let latest = raw_data_files(&self.raw_data_dir)?
            .into_iter()
            .filter(|f| survey.is_empty() || f.contains(&survey))
            .max();

        let Some(filename) = latest else {
            debug!("没有原始数据表，使用默认列");
            return Ok(ColumnListing {
                columns: DEFAULT_COLUMNS.iter().map(|c| c.to_string()).collect(),
                from_file: None,
            });
        };
        let columns = column_order::smart_sort_columns(&self.artifact_columns(&filename)?);
        Ok(ColumnListing {
            columns,
            from_file: Some(filename),
        })
    }

    /// 只保留选中的列，另存为 `{原文件名}_filtered_{HHMMSS}.csv`，不重新抓取
    pub fn export_filtered(&self, filename: &str, selected: &[String]) -> AppResult<String> {
        if selected.is_empty() {
            return Err(AppError::Config(ConfigError::Missing {
                field: "selectedColumns".to_string(),
            }));
        }

        let source = self.locate(filename)?;
        let mut reader = open_reader(&source)?;
        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| AppError::file_read_failed(source.display().to_string(), e))?
            .iter()
            .map(str::to_string)
            .collect();

        let columns = column_order::select_columns(selected, &headers);
        if columns.is_empty() {
            return Err(AppError::Config(ConfigError::InvalidValue {
                field: "selectedColumns".to_string(),
                reason: "No valid columns found".to_string(),
            }));
        }
        let indices: Vec<usize> = columns
            .iter()
            .filter_map(|c| headers.iter().position(|h| h == c))
            .collect();

        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let new_filename = format!(
            "{}_filtered_{}.{}",
            stem,
            Local::now().format("%H%M%S"),
            ARTIFACT_EXT
        );
        let path = prepare(&self.raw_data_dir, &new_filename)?;

        let mut writer = csv::Writer::from_path(&path)
            .map_err(|e| AppError::file_write_failed(path.display().to_string(), e))?;
        writer.write_record(&columns)?;
        let mut rows = 0usize;
        for record in reader.records() {
            let record = record?;
            writer.write_record(indices.iter().map(|&i| record.get(i).unwrap_or("")))?;
            rows += 1;
        }
        writer
            .flush()
            .map_err(|e| AppError::file_write_failed(path.display().to_string(), e))?;

        info!("📁 已导出选中列: {} ({} 行, {} 列)", new_filename, rows, columns.len());
        Ok(new_filename)
    }

    fn locate(&self, filename: &str) -> AppResult<PathBuf> {
        let name = Path::new(filename)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        [&self.raw_data_dir, &self.log_dir]
            .iter()
            .map(|dir| dir.join(&name))
            .find(|p| p.is_file())
            .ok_or_else(|| {
                AppError::file_read_failed(
                    filename,
                    std::io::Error::new(std::io::ErrorKind::NotFound, "artifact not found"),
                )
            })
    }
}

fn open_reader(path: &Path) -> AppResult<csv::Reader<fs::File>> {
    csv::Reader::from_path(path).map_err(|e| AppError::file_read_failed(path.display().to_string(), e))
}

fn raw_data_files(dir: &Path) -> AppResult<Vec<String>> {
    let mut found = Vec::new();
    collect(dir, ArtifactKind::RawData, &mut found)?;
    Ok(found
        .into_iter()
        .map(|a| a.filename)
        .filter(|f| f.starts_with(RAW_DATA_PREFIX))
        .collect())
}

fn prepare(dir: &Path, filename: &str) -> AppResult<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| AppError::file_write_failed(dir.display().to_string(), e))?;
    Ok(dir.join(filename))
}

fn collect(dir: &Path, kind: ArtifactKind, out: &mut Vec<ArtifactInfo>) -> AppResult<()> {
    if !dir.exists() {
        return Ok(());
    }
    let entries =
        fs::read_dir(dir).map_err(|e| AppError::file_read_failed(dir.display().to_string(), e))?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(ARTIFACT_EXT) {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            debug!("无法读取文件信息: {}", path.display());
            continue;
        };
        let modified = meta
            .modified()
            .map(DateTime::<Local>::from)
            .unwrap_or_else(|_| Local::now());
        out.push(ArtifactInfo {
            filename: entry.file_name().to_string_lossy().to_string(),
            kind,
            modified,
            size: meta.len(),
        });
    }
    Ok(())
}

fn timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// 去掉文件名中不能出现的字符
pub fn sanitize_file_part(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c if c.is_control() => '-',
            c => c,
        })
        .collect()
}
