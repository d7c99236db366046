//! 批量任务上下文
//!
//! 封装"我正在处理哪个调查、哪个周期、哪个县/市"这一信息

use std::fmt::Display;

use serde::Deserialize;

/// 批量任务的输入
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub survey_id: String,
    pub period_id: String,
    pub template_id: String,
    pub group_id: String,
    pub kab_id: String,
    /// 以下名称只用于产物文件名
    #[serde(default)]
    pub kab_name: String,
    #[serde(default)]
    pub survey_name: String,
    #[serde(default)]
    pub period_name: String,
}

impl RunRequest {
    /// 审阅页面地址
    pub fn review_url(&self, base_url: &str, assignment_id: &str) -> String {
        format!(
            "{}/survey-collection/survey-review/{}/{}/{}/a/1",
            base_url.trim_end_matches('/'),
            assignment_id,
            self.template_id,
            self.period_id
        )
    }

    /// 产物文件名中的 `{kab}_{survey}_{period}` 部分
    pub fn file_label(&self) -> String {
        format!("{}_{}_{}", self.kab_name, self.survey_name, self.period_name)
    }

    /// 缺少必填标识时返回字段名
    pub fn missing_field(&self) -> Option<&'static str> {
        [
            ("surveyId", &self.survey_id),
            ("periodId", &self.period_id),
            ("templateId", &self.template_id),
            ("groupId", &self.group_id),
            ("kabId", &self.kab_id),
        ]
        .into_iter()
        .find(|(_, v)| v.trim().is_empty())
        .map(|(name, _)| name)
    }
}

impl Display for RunRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[调查#{} 周期#{} 县市#{}]",
            self.survey_id, self.period_id, self.kab_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RunRequest {
        RunRequest {
            survey_id: "s1".to_string(),
            period_id: "p1".to_string(),
            template_id: "t1".to_string(),
            group_id: "g1".to_string(),
            kab_id: "k1".to_string(),
            kab_name: "KOTA".to_string(),
            survey_name: "SAKERNAS".to_string(),
            period_name: "AGUSTUS".to_string(),
        }
    }

    #[test]
    fn test_review_url_embeds_ids() {
        assert_eq!(
            request().review_url("https://fasih-sm.bps.go.id/", "a-1"),
            "https://fasih-sm.bps.go.id/survey-collection/survey-review/a-1/t1/p1/a/1"
        );
    }

    #[test]
    fn test_missing_field() {
        assert_eq!(request().missing_field(), None);
        let req = RunRequest {
            template_id: " ".to_string(),
            ..request()
        };
        assert_eq!(req.missing_field(), Some("templateId"));
    }

    #[test]
    fn test_deserialize_camel_case() {
        let req: RunRequest = serde_json::from_str(
            r#"{"surveyId":"s","periodId":"p","templateId":"t","groupId":"g","kabId":"k"}"#,
        )
        .unwrap();
        assert_eq!(req.kab_id, "k");
        assert_eq!(req.file_label(), "__");
    }
}
