mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{test_config, FakeApi, FakeFactory, PASSWORD, USERNAME};
use fasih_review::clients::FasihApi;
use fasih_review::models::{ActionType, TaskProgress, TaskStatus};
use fasih_review::services::LoginOutcome;
use fasih_review::{App, RunRequest};
use serde_json::json;

fn request() -> RunRequest {
    RunRequest {
        survey_id: "s1".to_string(),
        period_id: "p1".to_string(),
        template_id: "t1".to_string(),
        group_id: "g1".to_string(),
        kab_id: "kab".to_string(),
        kab_name: "KOTA BANDUNG".to_string(),
        survey_name: "SAKERNAS".to_string(),
        period_name: "AGUSTUS".to_string(),
    }
}

async fn app_with(dir: &std::path::Path, api: FakeApi) -> (App, Arc<FakeFactory>) {
    let config = test_config(dir);
    let factory = FakeFactory::new(&config);
    let api: Arc<dyn FasihApi> = Arc::new(api);
    let app = App::with_components(config, factory.clone(), move |_| Ok(api)).unwrap();
    assert_eq!(
        app.login(USERNAME, PASSWORD).await.unwrap(),
        LoginOutcome::Authenticated { restored: false }
    );
    (app, factory)
}

async fn wait_finished(app: &App, task_id: &str) -> TaskProgress {
    for _ in 0..500 {
        let progress = app.progress(task_id).unwrap();
        if progress.status.is_finished() {
            return progress;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("task {} did not finish", task_id);
}

fn log_files(dir: &std::path::Path) -> Vec<String> {
    std::fs::read_dir(dir.join("log"))
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn test_pengawas_approve_run() {
    let dir = tempfile::tempdir().unwrap();
    let api = FakeApi::new("Pengawas", 3, 2)
        .with_assignment("kab.1", "a1", &["OPEN", "SUBMITTED BY Pencacah"])
        .with_assignment("kab.1", "a2", &["APPROVED BY Pengawas"])
        .with_assignment("kab.2", "a3", &[]);
    let (app, factory) = app_with(dir.path(), api).await;

    let id = app.start_action(request(), ActionType::Approve).unwrap();
    let progress = wait_finished(&app, &id).await;

    assert_eq!(progress.status, TaskStatus::Completed);
    assert_eq!(progress.progress, 100);
    assert_eq!(progress.message, "Done! Success: 1, Failed: 0, Skipped: 2");
    assert_eq!(progress.counts.total_assignments, 3);
    assert_eq!(factory.with_site(|s| s.clicks_on("buttonApprove")), 1);
    assert!(factory.with_site(|s| s
        .navigations
        .iter()
        .any(|u| u.ends_with("/survey-review/a1/t1/p1/a/1"))));

    let filename = progress.output_filename.unwrap();
    assert!(filename.starts_with("Log_Approve_KOTA BANDUNG_SAKERNAS_AGUSTUS_"));
    let content = std::fs::read_to_string(dir.path().join("log").join(&filename)).unwrap();
    assert!(content.contains("a1"));
    assert!(content.contains("Skipped (already processed)"));
    assert!(content.contains("Skipped (status not eligible: Open)"));

    // 任务结束后凭据被回写
    assert!(app.check_credentials(USERNAME).exists);
}

#[tokio::test]
async fn test_admin_provinsi_cannot_revoke() {
    let dir = tempfile::tempdir().unwrap();
    let api = FakeApi::new("Admin Provinsi", 3, 1)
        .with_assignment("kab.1", "a1", &["COMPLETED BY Pengawas"])
        .with_assignment("kab.1", "a2", &["APPROVED BY Admin Kabupaten"]);
    let (app, factory) = app_with(dir.path(), api).await;

    let id = app.start_action(request(), ActionType::Revoke).unwrap();
    let progress = wait_finished(&app, &id).await;

    assert_eq!(progress.status, TaskStatus::Completed);
    assert_eq!(progress.counts.skipped, 2);
    assert_eq!(progress.counts.success, 0);
    assert_eq!(factory.with_site(|s| s.clicks_on("buttonRevoke")), 0);
}

#[tokio::test]
async fn test_pengawas_reject_checks_presence() {
    let dir = tempfile::tempdir().unwrap();
    let api = FakeApi::new("Pengawas", 3, 1)
        .with_assignment("kab.1", "found", &["SUBMITTED BY Pencacah"])
        .with_assignment("kab.1", "missing", &["SUBMITTED BY Pencacah"])
        .with_detail("missing", json!({ "data": { "data6": "3. Tidak Ditemukan" } }))
        .with_detail("found", json!({ "data": { "data6": "1. Ditemukan" } }));
    let (app, factory) = app_with(dir.path(), api).await;

    let id = app.start_action(request(), ActionType::Reject).unwrap();
    let progress = wait_finished(&app, &id).await;

    assert_eq!(progress.message, "Done! Success: 1, Failed: 0, Skipped: 1");
    assert_eq!(factory.with_site(|s| s.clicks_on("buttonReject")), 1);
    let filename = progress.output_filename.unwrap();
    let content = std::fs::read_to_string(dir.path().join("log").join(filename)).unwrap();
    assert!(content.contains("Skipped (status_keberadaan: 1. Ditemukan)"));
}

#[tokio::test]
async fn test_item_error_is_counted_as_failed() {
    let dir = tempfile::tempdir().unwrap();
    let mut api = FakeApi::new("Pengawas", 3, 1)
        .with_assignment("kab.1", "broken", &[])
        .with_assignment("kab.1", "a1", &["SUBMITTED BY Pencacah"]);
    api.failing_history.insert("broken".to_string());
    let (app, _factory) = app_with(dir.path(), api).await;

    let id = app.start_action(request(), ActionType::Approve).unwrap();
    let progress = wait_finished(&app, &id).await;

    assert_eq!(progress.status, TaskStatus::Completed);
    assert_eq!(progress.message, "Done! Success: 1, Failed: 1, Skipped: 0");
}

#[tokio::test]
async fn test_empty_region_completes_without_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let api = FakeApi::new("Pengawas", 3, 0);
    let (app, _factory) = app_with(dir.path(), api).await;

    let id = app.start_action(request(), ActionType::Approve).unwrap();
    let progress = wait_finished(&app, &id).await;

    assert_eq!(progress.status, TaskStatus::Completed);
    assert_eq!(progress.progress, 100);
    assert!(progress.message.contains("0 leaf units"));
    assert!(progress.output_filename.is_none());
    assert!(log_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_download_without_rows() {
    let dir = tempfile::tempdir().unwrap();
    let api = FakeApi::new("Pengawas", 3, 2);
    let (app, _factory) = app_with(dir.path(), api).await;

    let id = app.start_download(request(), Vec::new()).unwrap();
    let progress = wait_finished(&app, &id).await;

    assert_eq!(progress.status, TaskStatus::Completed);
    assert_eq!(progress.message, "No data found");
    assert!(progress.output_filename.is_none());
}

#[tokio::test]
async fn test_download_writes_sorted_columns() {
    let dir = tempfile::tempdir().unwrap();
    let answers = json!({
        "answers": [
            { "dataKey": "r102", "answer": "B" },
            { "dataKey": "r101", "answer": [{ "value": "1", "label": "Ya" }] },
            { "dataKey": "catatan", "answer": null }
        ]
    });
    let api = FakeApi::new("Pengawas", 3, 1)
        .with_assignment("kab.1", "a1", &["SUBMITTED BY Pencacah"])
        .with_detail("a1", json!({ "data": { "data": answers.to_string() } }));
    let (app, factory) = app_with(dir.path(), api).await;

    let id = app.start_download(request(), Vec::new()).unwrap();
    let progress = wait_finished(&app, &id).await;

    assert_eq!(progress.message, "Completed! 1 records saved.");
    assert_eq!(progress.columns.first().map(String::as_str), Some("assignment_id"));
    let r101 = progress.columns.iter().position(|c| c == "r101").unwrap();
    let r102 = progress.columns.iter().position(|c| c == "r102").unwrap();
    assert!(r101 < r102);

    let filename = progress.output_filename.unwrap();
    assert!(filename.starts_with("Raw_Data_"));
    let columns = app.artifact_columns(&filename).unwrap();
    assert_eq!(columns, progress.columns);
    // 下载不点击任何按钮
    assert_eq!(factory.with_site(|s| s.clicks.len()), 1);
}

#[tokio::test]
async fn test_incomplete_request_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _factory) = app_with(dir.path(), FakeApi::new("Pengawas", 3, 1)).await;

    let req = RunRequest {
        group_id: String::new(),
        ..request()
    };
    let err = app.start_action(req, ActionType::Approve).unwrap_err();
    assert!(err.to_string().contains("groupId"));
}

#[tokio::test]
async fn test_saved_session_is_restored_on_login() {
    let dir = tempfile::tempdir().unwrap();
    let (first, _factory) = app_with(dir.path(), FakeApi::new("Pengawas", 3, 1)).await;
    first.logout().await;

    let config = test_config(dir.path());
    let factory = FakeFactory::new(&config);
    let api: Arc<dyn FasihApi> = Arc::new(FakeApi::new("Pengawas", 3, 1));
    let app = App::with_components(config, factory.clone(), move |_| Ok(api)).unwrap();

    assert_eq!(
        app.login(USERNAME, PASSWORD).await.unwrap(),
        LoginOutcome::Authenticated { restored: true }
    );
    assert_eq!(factory.with_site(|s| s.clicks_on("kc-login")), 0);
}

#[tokio::test]
async fn test_download_writes_back_credentials() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _factory) = app_with(dir.path(), FakeApi::new("Pengawas", 3, 2)).await;
    std::fs::remove_dir_all(dir.path().join("session")).unwrap();
    assert!(!app.check_credentials(USERNAME).exists);

    let id = app.start_download(request(), Vec::new()).unwrap();
    let progress = wait_finished(&app, &id).await;

    assert_eq!(progress.status, TaskStatus::Completed);
    assert_eq!(progress.message, "No data found");
    assert!(progress.logs.iter().any(|l| l.contains("Session updated")));
    assert!(app.check_credentials(USERNAME).exists);
}

#[tokio::test]
async fn test_saved_session_rejected_by_api_falls_back_to_login() {
    let dir = tempfile::tempdir().unwrap();
    let (first, _factory) = app_with(dir.path(), FakeApi::new("Pengawas", 3, 1)).await;
    first.logout().await;

    let config = test_config(dir.path());
    let factory = FakeFactory::new(&config);
    let api = FakeApi {
        session_rejected: true,
        ..FakeApi::new("Pengawas", 3, 1)
    };
    let api: Arc<dyn FasihApi> = Arc::new(api);
    let app = App::with_components(config, factory.clone(), move |_| Ok(api)).unwrap();

    assert_eq!(
        app.login(USERNAME, PASSWORD).await.unwrap(),
        LoginOutcome::Authenticated { restored: false }
    );
    assert_eq!(factory.with_site(|s| s.clicks_on("kc-login")), 1);
}

#[tokio::test]
async fn test_filtered_export_and_column_listing() {
    let dir = tempfile::tempdir().unwrap();
    let answers = json!({ "answers": [{ "dataKey": "r101", "answer": "Ya" }] });
    let api = FakeApi::new("Pengawas", 3, 1)
        .with_assignment("kab.1", "a1", &["SUBMITTED BY Pencacah"])
        .with_detail("a1", json!({ "data": { "data": answers.to_string() } }));
    let (app, _factory) = app_with(dir.path(), api).await;

    let before = app.survey_columns("SAKERNAS").unwrap();
    assert!(before.from_file.is_none());
    assert_eq!(before.columns[0], "assignment_id");

    let id = app.start_download(request(), Vec::new()).unwrap();
    let filename = wait_finished(&app, &id).await.output_filename.unwrap();

    let listing = app.survey_columns("SAKERNAS").unwrap();
    assert_eq!(listing.from_file.as_deref(), Some(filename.as_str()));
    assert!(listing.columns.contains(&"r101".to_string()));

    let selected = vec!["r101".to_string(), "assignment_id".to_string()];
    let filtered = app.export_filtered(&filename, &selected).unwrap();
    assert!(filtered.contains("_filtered_"));
    assert_eq!(app.artifact_columns(&filtered).unwrap(), selected);
}
