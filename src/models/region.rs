use serde::{Deserialize, Serialize};

/// 行政区划层级
///
/// 省 → 县/市 → 区 → 村 → SLS → 子 SLS，实际层数由区域元数据决定（3 到 6）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegionLevel {
    Provinsi = 1,
    Kabupaten = 2,
    Kecamatan = 3,
    Desa = 4,
    Sls = 5,
    SubSls = 6,
}

impl RegionLevel {
    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(RegionLevel::Provinsi),
            2 => Some(RegionLevel::Kabupaten),
            3 => Some(RegionLevel::Kecamatan),
            4 => Some(RegionLevel::Desa),
            5 => Some(RegionLevel::Sls),
            6 => Some(RegionLevel::SubSls),
            _ => None,
        }
    }

    pub fn child(self) -> Option<Self> {
        Self::from_number(self.number() + 1)
    }

    /// 查询该层级时用于指定父节点的参数名
    pub fn parent_param(self) -> Option<&'static str> {
        match self {
            RegionLevel::Provinsi => None,
            RegionLevel::Kabupaten => Some("level1FullCode"),
            RegionLevel::Kecamatan => Some("level2Id"),
            RegionLevel::Desa => Some("level3Id"),
            RegionLevel::Sls => Some("level4Id"),
            RegionLevel::SubSls => Some("level5Id"),
        }
    }
}

/// 区域树节点
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionNode {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub code: String,
    pub full_code: String,
    #[serde(default)]
    pub level: u8,
}

/// 叶子工作单元（smallcode）及其上级名称
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmallCodeEntry {
    pub smallcode: String,
    pub kecamatan: String,
    pub desa: Option<String>,
    pub sls: Option<String>,
}

/// 一个 (survey, period, kabupaten) 的区域缓存文件内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WilayahCache {
    pub survey_id: String,
    pub period_id: String,
    pub kab_id: String,
    pub group_id: String,
    pub smallcodes: Vec<SmallCodeEntry>,
}

impl WilayahCache {
    pub fn codes(&self) -> Vec<String> {
        self.smallcodes.iter().map(|e| e.smallcode.clone()).collect()
    }
}

/// 缓存文件是否存在及条目数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatus {
    pub exists: bool,
    pub count: usize,
}
