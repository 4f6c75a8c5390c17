pub mod handlers;

use actix_web::web;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/health", web::get().to(handlers::health_check))
            .route("/config", web::get().to(handlers::get_config))
            .route("/execute", web::post().to(handlers::execute_code))
            .route("/stats", web::get().to(handlers::get_stats)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::container::fake::FakeRuntime;
    use crate::container::{ContainerRuntime, PoolManager, PoolSettings};
    use crate::executor::ExecutionService;
    use crate::models::{Backend, ExecutionReport};
    use crate::state::AppState;
    use actix_web::{http::StatusCode, test, App};
    use std::sync::Arc;

    fn app_state(scratch: &std::path::Path, config: Config) -> AppState {
        let config = Config {
            scratch_dir: Some(scratch.to_path_buf()),
            ..config
        };
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(FakeRuntime::new(Backend::Standard));
        let pool = Arc::new(PoolManager::new(
            vec![runtime.clone()],
            PoolSettings::from_config(&config),
        ));
        let service = ExecutionService::from_config(&config, pool, runtime.clone());
        AppState::new(config, Arc::new(service), runtime)
    }

    #[actix_web::test]
    async fn test_execute_returns_flat_result() {
        let scratch = tempfile::tempdir().unwrap();
        let state = app_state(scratch.path(), Config::default());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/v1/execute")
            .set_json(serde_json::json!({
                "functionId": 1,
                "language": "python",
                "code": "print(\"hi\")",
                "timeoutSeconds": 5,
            }))
            .to_request();
        let report: ExecutionReport = test::call_and_read_body_json(&app, req).await;

        assert_eq!(report.exit_code, Some(0));
        assert!(report.logs.unwrap().contains("hi"));
        assert!(report.error.is_none());
    }

    #[actix_web::test]
    async fn test_unsupported_language_is_bad_request() {
        let scratch = tempfile::tempdir().unwrap();
        let state = app_state(scratch.path(), Config::default());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/v1/execute")
            .set_json(serde_json::json!({
                "functionId": "1",
                "language": "cobol",
                "code": "DISPLAY 'HI'.",
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_rate_limit_rejects_burst() {
        let scratch = tempfile::tempdir().unwrap();
        let config = Config {
            rate_limit_per_minute: 1,
            rate_limit_burst: 1,
            ..Config::default()
        };
        let state = app_state(scratch.path(), config);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let body = serde_json::json!({
            "functionId": "1",
            "language": "python",
            "code": "print(\"hi\")",
        });
        let first = test::TestRequest::post()
            .uri("/api/v1/execute")
            .set_json(&body)
            .to_request();
        assert_eq!(test::call_service(&app, first).await.status(), StatusCode::OK);

        let second = test::TestRequest::post()
            .uri("/api/v1/execute")
            .set_json(&body)
            .to_request();
        assert_eq!(
            test::call_service(&app, second).await.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[actix_web::test]
    async fn test_stats_include_pool() {
        let scratch = tempfile::tempdir().unwrap();
        let state = app_state(scratch.path(), Config::default());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/stats").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["total_executions"], 0);
        assert_eq!(body["pool"]["totalIdle"], 0);
    }
}
