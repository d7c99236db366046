//! 区域解析 - 业务能力层
//!
//! 把县/市展开成叶子工作单元（smallcode）。层数由区域元数据决定，
//! 每一层都检查是否已到达声明的深度，而不是假定固定 6 层。

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use serde_json::Value as JsonValue;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::clients::FasihApi;
use crate::config::Config;
use crate::error::{ApiError, AppError, AppResult};
use crate::models::region::{CacheStatus, RegionLevel, RegionNode, SmallCodeEntry, WilayahCache};

const MIN_DEPTH: usize = 3;
const MAX_DEPTH: usize = 6;

/// 叶子单元的上级名称
#[derive(Debug, Clone, Default)]
struct Lineage {
    kecamatan: Option<String>,
    desa: Option<String>,
    sls: Option<String>,
}

impl Lineage {
    fn descend(&self, level: RegionLevel, node: &RegionNode) -> Self {
        let mut next = self.clone();
        match level {
            RegionLevel::Kecamatan => next.kecamatan = Some(node.name.clone()),
            RegionLevel::Desa => next.desa = Some(node.name.clone()),
            RegionLevel::Sls => next.sls = Some(node.name.clone()),
            _ => {}
        }
        next
    }

    fn leaf(&self, level: RegionLevel, node: &RegionNode) -> SmallCodeEntry {
        let lineage = self.descend(level, node);
        let sls = match level {
            RegionLevel::SubSls => Some(format!(
                "{} / {}",
                self.sls.as_deref().unwrap_or_default(),
                node.name
            )),
            _ => lineage.sls,
        };
        SmallCodeEntry {
            smallcode: node.full_code.clone(),
            kecamatan: lineage.kecamatan.unwrap_or_default(),
            desa: lineage.desa,
            sls,
        }
    }
}

/// 区域解析器
pub struct RegionResolver {
    api: Arc<dyn FasihApi>,
    cache_dir: PathBuf,
    concurrency: usize,
}

impl RegionResolver {
    pub fn new(config: &Config, api: Arc<dyn FasihApi>) -> Self {
        Self {
            api,
            cache_dir: config.wilayah_dir(),
            concurrency: config.region_concurrency.max(1),
        }
    }

    /// 区域分组声明的层数，必须在 3..=6
    pub async fn declared_depth(&self, group_id: &str) -> AppResult<usize> {
        let metadata = self.api.region_metadata(group_id).await?;
        let depth = metadata_depth(&metadata);
        if !(MIN_DEPTH..=MAX_DEPTH).contains(&depth) {
            return Err(ApiError::InvalidRegionDepth {
                group_id: group_id.to_string(),
                depth,
            }
            .into());
        }
        Ok(depth)
    }

    /// 从县/市 `kab_id` 展开到声明深度的全部叶子单元，保持接口返回的兄弟顺序
    pub async fn resolve_leaf_units(
        &self,
        group_id: &str,
        kab_id: &str,
    ) -> AppResult<Vec<SmallCodeEntry>> {
        let depth = self.declared_depth(group_id).await?;
        debug!("区域分组 {} 共 {} 层", group_id, depth);

        let permits = Semaphore::new(self.concurrency);
        let leaves = self
            .expand(
                group_id,
                RegionLevel::Kecamatan,
                kab_id.to_string(),
                depth as u8,
                Lineage::default(),
                &permits,
            )
            .await?;

        info!("📍 {} 展开得到 {} 个叶子单元", kab_id, leaves.len());
        Ok(leaves)
    }

    pub async fn resolve_leaf_codes(&self, group_id: &str, kab_id: &str) -> AppResult<Vec<String>> {
        Ok(self
            .resolve_leaf_units(group_id, kab_id)
            .await?
            .into_iter()
            .map(|e| e.smallcode)
            .collect())
    }

    fn expand<'a>(
        &'a self,
        group_id: &'a str,
        level: RegionLevel,
        parent_id: String,
        depth: u8,
        lineage: Lineage,
        permits: &'a Semaphore,
    ) -> BoxFuture<'a, AppResult<Vec<SmallCodeEntry>>> {
        async move {
            let children = {
                let _permit = permits
                    .acquire()
                    .await
                    .map_err(|e| AppError::Other(e.to_string()))?;
                self.api.regions(level, group_id, Some(&parent_id)).await?
            };

            if level.number() >= depth {
                return Ok(children.iter().map(|c| lineage.leaf(level, c)).collect());
            }
            let Some(child_level) = level.child() else {
                return Ok(children.iter().map(|c| lineage.leaf(level, c)).collect());
            };

            let nested: Vec<AppResult<Vec<SmallCodeEntry>>> = stream::iter(children)
                .map(|child| {
                    let next = lineage.descend(level, &child);
                    self.expand(group_id, child_level, child.id, depth, next, permits)
                })
                .buffered(self.concurrency)
                .collect()
                .await;

            let mut leaves = Vec::new();
            for result in nested {
                leaves.extend(result?);
            }
            Ok(leaves)
        }
        .boxed()
    }

    // ========== 缓存 ==========

    pub fn cache_path(&self, survey_id: &str, period_id: &str, kab_id: &str) -> PathBuf {
        self.cache_dir
            .join(format!("wilayah_{}_{}_{}.json", survey_id, period_id, kab_id))
    }

    /// 读取缓存文件；不存在或内容损坏时返回 None
    pub fn load_cache(&self, survey_id: &str, period_id: &str, kab_id: &str) -> Option<WilayahCache> {
        let path = self.cache_path(survey_id, period_id, kab_id);
        let content = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(cache) => Some(cache),
            Err(e) => {
                warn!("⚠️ 区域缓存损坏，忽略 {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn load_cached(&self, survey_id: &str, period_id: &str, kab_id: &str) -> Option<Vec<String>> {
        self.load_cache(survey_id, period_id, kab_id)
            .map(|cache| cache.codes())
    }

    pub fn cache_status(&self, survey_id: &str, period_id: &str, kab_id: &str) -> CacheStatus {
        match self.load_cache(survey_id, period_id, kab_id) {
            Some(cache) => CacheStatus {
                exists: true,
                count: cache.smallcodes.len(),
            },
            None => CacheStatus::default(),
        }
    }

    /// 强制在线展开并覆盖写入缓存
    pub async fn fetch_and_cache(
        &self,
        survey_id: &str,
        period_id: &str,
        kab_id: &str,
        group_id: &str,
    ) -> AppResult<WilayahCache> {
        let smallcodes = self.resolve_leaf_units(group_id, kab_id).await?;
        let cache = WilayahCache {
            survey_id: survey_id.to_string(),
            period_id: period_id.to_string(),
            kab_id: kab_id.to_string(),
            group_id: group_id.to_string(),
            smallcodes,
        };

        fs::create_dir_all(&self.cache_dir)
            .map_err(|e| AppError::file_write_failed(self.cache_dir.display().to_string(), e))?;
        let path = self.cache_path(survey_id, period_id, kab_id);
        fs::write(&path, serde_json::to_string_pretty(&cache)?)
            .map_err(|e| AppError::file_write_failed(path.display().to_string(), e))?;

        info!("💾 已缓存 {} 个叶子单元: {}", cache.smallcodes.len(), path.display());
        Ok(cache)
    }

    /// 批量任务使用的叶子单元：优先使用非空缓存，否则在线展开
    ///
    /// 第二个返回值表示是否来自缓存。
    pub async fn smallcodes_for_run(
        &self,
        survey_id: &str,
        period_id: &str,
        kab_id: &str,
        group_id: &str,
    ) -> AppResult<(Vec<String>, bool)> {
        match self.load_cached(survey_id, period_id, kab_id) {
            Some(codes) if !codes.is_empty() => Ok((codes, true)),
            _ => Ok((self.resolve_leaf_codes(group_id, kab_id).await?, false)),
        }
    }
}

/// 元数据中 `data.level` 的条目数
pub fn metadata_depth(metadata: &JsonValue) -> usize {
    metadata
        .pointer("/data/level")
        .and_then(JsonValue::as_array)
        .map(Vec::len)
        .unwrap_or(0)
}
