#[cfg(test)]
mod tests {
    use crate::error::{AppError, AppResult, OptionExt};
    use axum::http::{header, StatusCode};
    use axum::response::IntoResponse;
    use http_body_util::BodyExt;
    use serde_json::Value;

    async fn body_json(error: AppError) -> (StatusCode, axum::http::HeaderMap, Value) {
        let response = error.into_response();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, headers, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_app_error_display() {
        let error = AppError::BadRequest("Invalid input".to_string());
        assert_eq!(format!("{}", error), "Bad request: Invalid input");

        let error = AppError::NotFound("Resource not found".to_string());
        assert_eq!(format!("{}", error), "Not found: Resource not found");

        let error = AppError::RateLimited { retry_after_seconds: 60 };
        assert_eq!(format!("{}", error), "Rate limited. Retry after 60 seconds");

        let error = AppError::ThreatDetected { threats: vec!["sql_injection".into(), "xss".into()] };
        assert_eq!(format!("{}", error), "Potentially malicious input rejected: sql_injection, xss");
    }

    #[test]
    fn test_app_error_status_codes() {
        let cases = vec![
            (AppError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (AppError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (AppError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (AppError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (AppError::CsrfRejected("x".into()), StatusCode::FORBIDDEN),
            (AppError::RateLimited { retry_after_seconds: 1 }, StatusCode::TOO_MANY_REQUESTS),
            (AppError::ThreatDetected { threats: vec![] }, StatusCode::BAD_REQUEST),
            (AppError::PayloadTooLarge { limit: 10 }, StatusCode::PAYLOAD_TOO_LARGE),
            (AppError::Internal(anyhow::anyhow!("boom")), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }

    #[tokio::test]
    async fn test_rate_limited_sets_retry_after() {
        let (status, headers, body) = body_json(AppError::RateLimited { retry_after_seconds: 1800 }).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(headers.get(header::RETRY_AFTER).unwrap(), "1800");
        assert_eq!(body["error"]["code"], "RATE_LIMITED");
        assert_eq!(body["error"]["details"]["retry_after_seconds"], 1800);
        assert_eq!(body["status"], 429);
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_internal_error_hides_cause() {
        let (_, headers, body) = body_json(AppError::Internal(anyhow::anyhow!("db password leaked"))).await;
        assert!(headers.get(header::RETRY_AFTER).is_none());
        assert_eq!(body["error"]["message"], "An internal server error occurred");
        assert!(body["error"]["details"]["error_id"].is_string());
        assert!(!body.to_string().contains("password"));
    }

    #[tokio::test]
    async fn test_validation_error_details() {
        let (_, _, body) = body_json(AppError::ValidationError {
            field: "ip".to_string(),
            message: "not an IP".to_string(),
        })
        .await;
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(body["error"]["details"]["field"], "ip");
        assert_eq!(body["error"]["details"]["message"], "not an IP");
    }

    #[test]
    fn test_option_ext() {
        let some: Option<i32> = Some(42);
        assert_eq!(some.ok_or_not_found("Item").unwrap(), 42);

        let none: Option<i32> = None;
        let result: AppResult<i32> = none.ok_or_not_found("Blacklist entry");
        match result {
            Err(AppError::NotFound(msg)) => assert_eq!(msg, "Blacklist entry not found"),
            _ => panic!("Expected NotFound error"),
        }
    }
}
