/// FASIH-SM 读接口客户端
///
/// 复用浏览器登录得到的 Cookie 和请求头，以普通 HTTP 调用只读接口
use async_trait::async_trait;
use reqwest::header::COOKIE;
use reqwest::redirect::Policy;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value as JsonValue};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{ApiError, AppError, AppResult, AuthError};
use crate::models::assignment::{parse_status_history, Assignment, StatusEvent};
use crate::models::region::{RegionLevel, RegionNode};
use crate::models::session::Session;

/// 工作流依赖的只读接口
///
/// 无状态，可并发调用。
#[async_trait]
pub trait FasihApi: Send + Sync {
    /// 调查列表（原始分页响应）
    async fn list_surveys(&self, survey_type: &str, page_size: usize) -> AppResult<JsonValue>;

    /// 调查详情，包含周期、模板与区域分组
    async fn survey_detail(&self, survey_id: &str) -> AppResult<JsonValue>;

    /// 当前用户在某个周期中的角色名，例如 `Pengawas`
    async fn user_role(&self, period_id: &str) -> AppResult<String>;

    /// 区域分组的元数据，`data.level` 为层级定义列表
    async fn region_metadata(&self, group_id: &str) -> AppResult<JsonValue>;

    /// 列出某一层级的区域，`parent` 为上一层的 id（第 2 层为省的 fullCode）
    async fn regions(
        &self,
        level: RegionLevel,
        group_id: &str,
        parent: Option<&str>,
    ) -> AppResult<Vec<RegionNode>>;

    /// 叶子单元下的任务单；非 2xx 或空响应视为没有任务单
    async fn assignments_by_smallcode(
        &self,
        period_id: &str,
        smallcode: &str,
    ) -> AppResult<Vec<Assignment>>;

    async fn assignment_detail(&self, assignment_id: &str) -> AppResult<JsonValue>;

    async fn assignment_history(&self, assignment_id: &str) -> AppResult<Vec<StatusEvent>>;

    /// 用当前会话访问受保护接口，判断会话是否仍被服务端接受
    async fn probe_session(&self) -> AppResult<bool>;
}

/// 基于 reqwest 的实现
pub struct FasihClient {
    http: Client,
    probe_http: Client,
    survey_api: String,
    region_api: String,
    assignment_api: String,
    app_host: String,
    session: watch::Receiver<Option<Session>>,
}

impl FasihClient {
    pub fn new(config: &Config, session: watch::Receiver<Option<Session>>) -> AppResult<Self> {
        let http = Client::builder()
            .build()
            .map_err(|e| AppError::api_request_failed("client", e))?;
        let probe_http = Client::builder()
            .redirect(Policy::none())
            .timeout(config.probe_timeout())
            .build()
            .map_err(|e| AppError::api_request_failed("client", e))?;

        Ok(Self {
            http,
            probe_http,
            survey_api: config.survey_api(),
            region_api: config.region_api(),
            assignment_api: config.assignment_api(),
            app_host: config.app_host(),
            session,
        })
    }

    /// 附加会话请求头与 Cookie
    fn authed(&self, builder: RequestBuilder) -> AppResult<RequestBuilder> {
        let session = self
            .session
            .borrow()
            .clone()
            .ok_or(AuthError::NotLoggedIn)?;

        let mut builder = builder;
        for (name, value) in &session.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let cookie = session.cookie_header_for(&self.app_host);
        if !cookie.is_empty() {
            builder = builder.header(COOKIE, cookie);
        }
        Ok(builder)
    }

    async fn send_json(&self, endpoint: &str, builder: RequestBuilder) -> AppResult<JsonValue> {
        let resp = self
            .authed(builder)?
            .send()
            .await
            .map_err(|e| AppError::api_request_failed(endpoint, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ApiError::BadStatus {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            }
            .into());
        }
        resp.json::<JsonValue>()
            .await
            .map_err(|e| AppError::api_request_failed(endpoint, e))
    }

    async fn get_json(&self, endpoint: &str, url: String) -> AppResult<JsonValue> {
        debug!("GET {}", url);
        self.send_json(endpoint, self.http.get(url)).await
    }
}

#[async_trait]
impl FasihApi for FasihClient {
    async fn list_surveys(&self, survey_type: &str, page_size: usize) -> AppResult<JsonValue> {
        let url = format!("{}/surveys/datatable", self.survey_api);
        let payload = json!({
            "pageNumber": 0,
            "pageSize": page_size,
            "sortBy": "CREATED_AT",
            "sortDirection": "DESC",
            "keywordSearch": ""
        });
        let builder = self
            .http
            .post(url)
            .query(&[("surveyType", survey_type)])
            .json(&payload);
        self.send_json("surveys/datatable", builder).await
    }

    async fn survey_detail(&self, survey_id: &str) -> AppResult<JsonValue> {
        self.get_json("surveys", format!("{}/surveys/{}", self.survey_api, survey_id))
            .await
    }

    async fn user_role(&self, period_id: &str) -> AppResult<String> {
        let builder = self
            .http
            .get(format!("{}/users/myinfo", self.survey_api))
            .query(&[("surveyPeriodId", period_id)]);
        let body = self.send_json("users/myinfo", builder).await?;
        body.pointer("/data/surveyRole/description")
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ApiError::UnexpectedPayload {
                    endpoint: "users/myinfo".to_string(),
                    detail: "missing data.surveyRole.description".to_string(),
                }
                .into()
            })
    }

    async fn region_metadata(&self, group_id: &str) -> AppResult<JsonValue> {
        let builder = self
            .http
            .get(format!("{}/region-metadata", self.region_api))
            .query(&[("id", group_id)]);
        self.send_json("region-metadata", builder).await
    }

    async fn regions(
        &self,
        level: RegionLevel,
        group_id: &str,
        parent: Option<&str>,
    ) -> AppResult<Vec<RegionNode>> {
        let endpoint = format!("region/level{}", level.number());
        let mut query = vec![("groupId", group_id.to_string())];
        if let (Some(param), Some(parent)) = (level.parent_param(), parent) {
            query.push((param, parent.to_string()));
        }
        let builder = self
            .http
            .get(format!("{}/{}", self.region_api, endpoint))
            .query(&query);
        let body = self.send_json(&endpoint, builder).await?;

        let data = body.get("data").cloned().unwrap_or(JsonValue::Array(vec![]));
        let mut nodes: Vec<RegionNode> =
            serde_json::from_value(data).map_err(|e| ApiError::UnexpectedPayload {
                endpoint: endpoint.clone(),
                detail: e.to_string(),
            })?;
        for node in &mut nodes {
            node.level = level.number();
        }
        Ok(nodes)
    }

    async fn assignments_by_smallcode(
        &self,
        period_id: &str,
        smallcode: &str,
    ) -> AppResult<Vec<Assignment>> {
        let endpoint = "assignments/get-principal-values-by-smallest-code";
        let url = format!(
            "{}/{}/{}/{}",
            self.assignment_api, endpoint, period_id, smallcode
        );
        let resp = self
            .authed(self.http.get(url))?
            .send()
            .await
            .map_err(|e| AppError::api_request_failed(endpoint, e))?;

        if resp.status() != StatusCode::OK {
            debug!("{} 返回 {}，视为空列表", smallcode, resp.status());
            return Ok(Vec::new());
        }
        let text = resp
            .text()
            .await
            .map_err(|e| AppError::api_request_failed(endpoint, e))?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let body: JsonValue = serde_json::from_str(&text)?;
        let data = body.get("data").cloned().unwrap_or(JsonValue::Array(vec![]));
        let mut assignments: Vec<Assignment> =
            serde_json::from_value(data).map_err(|e| ApiError::UnexpectedPayload {
                endpoint: endpoint.to_string(),
                detail: e.to_string(),
            })?;
        for a in &mut assignments {
            if a.smallcode.is_empty() {
                a.smallcode = smallcode.to_string();
            }
        }
        Ok(assignments)
    }

    async fn assignment_detail(&self, assignment_id: &str) -> AppResult<JsonValue> {
        let builder = self
            .http
            .get(format!(
                "{}/assignment/get-by-id-with-data-for-scm",
                self.assignment_api
            ))
            .query(&[("id", assignment_id)]);
        self.send_json("assignment/get-by-id-with-data-for-scm", builder)
            .await
    }

    async fn assignment_history(&self, assignment_id: &str) -> AppResult<Vec<StatusEvent>> {
        let builder = self
            .http
            .get(format!(
                "{}/assignment-history/get-by-assignment-id",
                self.assignment_api
            ))
            .query(&[("assignmentId", assignment_id)]);
        let body = self
            .send_json("assignment-history/get-by-assignment-id", builder)
            .await?;
        Ok(parse_status_history(&body))
    }

    async fn probe_session(&self) -> AppResult<bool> {
        let builder = self
            .probe_http
            .get(format!("{}/surveys", self.survey_api));
        match self.authed(builder)?.send().await {
            Ok(resp) => Ok(resp.status() == StatusCode::OK),
            Err(e) => {
                warn!("会话探测失败: {}", e);
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_requests_need_a_session() {
        let (_tx, rx) = watch::channel(None);
        let client = FasihClient::new(&Config::default(), rx).unwrap();

        let err = client.user_role("period-1").await.unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthError::NotLoggedIn)));
    }
}
