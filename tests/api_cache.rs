mod common;

use anyhow::Result;
use caos_dashboard::api::ApiError;
use common::{SeriesRule, StubApi};
use serde_json::{Value, json};
use std::sync::Arc;

/// Reference data (projects, metrics, tags) is fetched once per client
/// and shared by every caller.
mod reference_cache_tests {
    use super::*;

    #[tokio::test]
    async fn test_concurrent_project_calls_fetch_once() -> Result<()> {
        // Given: a fresh client with nothing cached
        let stub = StubApi::spawn().await?;
        let client = stub.shared_client()?;

        // When: eight tasks request the project list at the same time
        let mut handles = Vec::new();
        for _ in 0..8 {
            let client = Arc::clone(&client);
            handles.push(tokio::spawn(async move {
                client.projects().await.map(|projects| projects.len())
            }));
        }

        // Then: every caller sees the list, from a single request
        for handle in handles {
            assert_eq!(handle.await??, 2);
        }
        assert_eq!(stub.projects_hits(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_projects_sorted_by_name() -> Result<()> {
        let stub =
            StubApi::spawn_with_projects(&[("p2", "zoo"), ("p3", "astro"), ("p1", "maths")])
                .await?;
        let client = stub.client()?;

        let names: Vec<&str> = client
            .projects()
            .await?
            .iter()
            .map(|project| project.name.as_str())
            .collect();
        assert_eq!(names, ["astro", "maths", "zoo"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_fetch_is_not_cached() -> Result<()> {
        // Given: the first project fetch fails server-side
        let stub = StubApi::spawn().await?;
        stub.fail_projects(1);
        let client = stub.client()?;

        // When: the first call errors
        let error = client.projects().await.unwrap_err();
        assert!(matches!(error, ApiError::Status { status: 500, .. }));

        // Then: the next call retries instead of replaying the failure
        assert_eq!(client.projects().await?.len(), 2);
        assert_eq!(stub.projects_hits(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_metrics_and_tags_fetch_once() -> Result<()> {
        let stub = StubApi::spawn().await?;
        let client = stub.client()?;

        let metrics = client.metrics().await?;
        assert_eq!(metrics[0].name, "cpu");
        assert_eq!(metrics[0].kind, "delta");
        client.metrics().await?;

        let tags = client.tags().await?;
        assert_eq!(tags[0].key, "project");
        client.tags().await?;

        assert_eq!(stub.metrics_hits(), 1);
        assert_eq!(stub.tags_hits(), 1);
        Ok(())
    }
}

mod auth_tests {
    use super::*;

    #[tokio::test]
    async fn test_anonymous_status() -> Result<()> {
        let stub = StubApi::spawn().await?;
        let client = stub.client()?;

        let status = client.status().await?;
        assert_eq!(status.status, "online");
        assert_eq!(status.version, "1.4.2");
        assert!(!status.auth);
        Ok(())
    }

    #[tokio::test]
    async fn test_login_stores_token_and_confirms() -> Result<()> {
        let stub = StubApi::spawn().await?;
        let client = stub.client()?;

        assert!(client.login("admin", "secret").await?);
        assert!(client.status().await?.auth);
        Ok(())
    }

    #[tokio::test]
    async fn test_login_with_wrong_password() -> Result<()> {
        let stub = StubApi::spawn().await?;
        let client = stub.client()?;

        let error = client.login("admin", "nope").await.unwrap_err();
        assert!(matches!(error, ApiError::Status { status: 401, .. }));
        assert_eq!(error.to_string(), "401: invalid credentials");
        assert_eq!(error.status_code(), Some(401));
        Ok(())
    }

    #[tokio::test]
    async fn test_logout_drops_token() -> Result<()> {
        let stub = StubApi::spawn().await?;
        let client = stub.client()?;

        assert!(client.login("admin", "secret").await?);
        client.logout().await;
        assert!(!client.status().await?.auth);
        Ok(())
    }
}

mod graphql_tests {
    use super::*;

    #[tokio::test]
    async fn test_graphql_errors_are_swallowed_and_data_returned() -> Result<()> {
        // Given: the server answers with a GraphQL error document
        let stub = StubApi::spawn().await?;
        stub.set_series(
            "broken:",
            SeriesRule::Errors(vec!["cannot resolve metric".to_string()]),
        );
        let client = stub.client()?;

        // When/Then: the call succeeds and yields the (null) data
        let data = client
            .graphql(
                "query { samples }",
                json!({ "series": { "metric": { "name": "broken" } } }),
            )
            .await?;
        assert_eq!(data, Value::Null);
        Ok(())
    }

    #[tokio::test]
    async fn test_graphql_http_error_maps_to_status() -> Result<()> {
        let stub = StubApi::spawn().await?;
        stub.set_series("cpu:", SeriesRule::Status(503));
        let client = stub.client()?;

        let error = client
            .graphql(
                "query { samples }",
                json!({ "series": { "metric": { "name": "cpu" } } }),
            )
            .await
            .unwrap_err();
        assert!(matches!(error, ApiError::Status { status: 503, .. }));
        assert_eq!(error.status_code(), Some(503));
        Ok(())
    }
}
