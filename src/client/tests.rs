//! Client Module Tests
//!
//! ## Test Scopes
//! - Configuration defaults, normalisation and validation, including zero intervals
//! - Model scoring and tier classification
//! - Error classification for the retry policy
//! - Leader discovery against stub replicas (live, dead, hanging, clueless)
//! - Write path retries, their pacing and leader hints
//! - Patient monitor: local GREEN history, queueing and backlog retry

#[cfg(test)]
mod tests {
    use crate::client::config::ClientConfig;
    use crate::client::directory::{ClientDirectory, DirectoryTimings};
    use crate::client::error::ClientError;
    use crate::client::model::{LogisticModel, RiskModel, classify};
    use crate::client::monitor::{CycleOutcome, PatientMonitor, Thresholds, VitalsSource};
    use crate::membership::types::ReplicaAddress;
    use crate::reports::protocol::SendRiskReportRequest;
    use crate::storage::types::{FEATURE_COUNT, RiskTier};
    use crate::transport::error::RpcError;
    use axum::{
        Json, Router,
        http::StatusCode,
        routing::{get, post},
    };
    use serde_json::json;
    use std::io::Write;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    // ============================================================
    // HELPERS
    // ============================================================

    fn fast_timings() -> DirectoryTimings {
        DirectoryTimings {
            rpc_timeout: Duration::from_millis(300),
            fallback_timeout: Duration::from_millis(200),
            overall_lookup_timeout: Duration::from_millis(1_000),
            retry_delay: Duration::from_millis(10),
            heartbeat_interval: Duration::from_millis(50),
            max_retries: 3,
        }
    }

    async fn serve(app: Router) -> ReplicaAddress {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        ReplicaAddress::from(addr.to_string())
    }

    /// An address nothing listens on.
    async fn dead_address() -> ReplicaAddress {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        ReplicaAddress::from(addr.to_string())
    }

    /// Replica that answers GetLeaderInfo with a fixed view.
    async fn replica_naming(leader: &str, replicas: Vec<String>) -> ReplicaAddress {
        let body = json!({
            "success": true,
            "leader_address": leader,
            "replica_addresses": replicas,
        });
        serve(Router::new().route(
            "/leader",
            get(move || {
                let body = body.clone();
                async move { Json(body) }
            }),
        ))
        .await
    }

    /// Replica that does not know the leader.
    async fn clueless_replica() -> ReplicaAddress {
        serve(Router::new().route(
            "/leader",
            get(|| async { Json(json!({ "success": false, "leader_address": "Unknown" })) }),
        ))
        .await
    }

    /// Replica whose GetLeaderInfo never returns in time.
    async fn hanging_replica() -> ReplicaAddress {
        serve(Router::new().route(
            "/leader",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Json(json!({ "success": true, "leader_address": "10.0.0.1:1" }))
            }),
        ))
        .await
    }

    /// Leader stub that accepts every report and answers GetLeaderInfo for itself.
    /// The returned counter tracks accepted reports.
    async fn accepting_leader() -> (ReplicaAddress, Arc<AtomicUsize>) {
        let accepted = Arc::new(AtomicUsize::new(0));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let self_addr = addr.clone();
        let counter = accepted.clone();
        let app = Router::new()
            .route(
                "/leader",
                get(move || {
                    let leader = self_addr.clone();
                    async move {
                        Json(json!({
                            "success": true,
                            "leader_address": leader,
                            "replica_addresses": [leader],
                        }))
                    }
                }),
            )
            .route(
                "/reports",
                post(move |Json(_): Json<SendRiskReportRequest>| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Json(json!({
                            "success": true,
                            "message": "Risk report received and stored successfully",
                            "alert_sent": false,
                        }))
                    }
                }),
            );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (ReplicaAddress::from(addr), accepted)
    }

    fn sample_request() -> SendRiskReportRequest {
        SendRiskReportRequest {
            patient_id: "patient_0001".to_string(),
            timestamp: 1_700_000_000,
            inputs: vec![80.0, 125.0, 2.2, 25.0, 90.0],
            probability: 0.93,
            tier: "RED".to_string(),
        }
    }

    // ============================================================
    // CONFIGURATION
    // ============================================================

    #[test]
    fn test_config_defaults_from_empty_object() {
        let config = ClientConfig::from_json("{}").unwrap();
        assert_eq!(config.leader_address().as_str(), "127.0.0.1:50051");
        assert_eq!(config.rpc_timeout_ms, 10_000);
        assert_eq!(config.fallback_timeout_ms, 1_000);
        assert_eq!(config.overall_leader_lookup_timeout_ms, 5_000);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.monitoring_interval(), Duration::from_secs(30));
        assert!(config.replicas().is_empty());
    }

    #[test]
    fn test_config_rewrites_localhost() {
        let config = ClientConfig::from_json(
            r#"{
                "client_connect_host": "localhost",
                "client_connect_port": 50052,
                "replica_addresses": ["localhost:50051", "localhostile:1", "10.0.0.2:50053"]
            }"#,
        )
        .unwrap();

        assert_eq!(config.leader_address().as_str(), "127.0.0.1:50052");
        let replicas: Vec<String> = config.replicas().iter().map(|a| a.to_string()).collect();
        assert_eq!(
            replicas,
            vec!["127.0.0.1:50051", "localhostile:1", "10.0.0.2:50053"]
        );
    }

    #[test]
    fn test_config_rejects_inverted_thresholds() {
        let err = ClientConfig::from_json(r#"{ "green_threshold": 0.7, "amber_threshold": 0.6 }"#)
            .unwrap_err();
        assert!(err.to_string().contains("thresholds"));
    }

    #[test]
    fn test_config_rejects_overall_below_fallback() {
        let result = ClientConfig::from_json(
            r#"{ "fallback_timeout_ms": 2000, "overall_leader_lookup_timeout_ms": 1000 }"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_config_rejects_zero_intervals() {
        for field in ["client_heartbeat_interval_ms", "monitoring_interval_ms"] {
            let err = ClientConfig::from_json(&format!(r#"{{ "{}": 0 }}"#, field)).unwrap_err();
            assert!(err.to_string().contains(field));
        }
    }

    #[test]
    fn test_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "patient_id": "patient_0042", "max_retries": 5, "retry_delay_ms": 250 }}"#
        )
        .unwrap();

        let config = ClientConfig::from_file(file.path()).unwrap();
        assert_eq!(config.patient_id.as_deref(), Some("patient_0042"));
        assert_eq!(config.directory_timings().max_retries, 5);
        assert_eq!(
            config.directory_timings().retry_delay,
            Duration::from_millis(250)
        );
    }

    // ============================================================
    // MODEL
    // ============================================================

    #[test]
    fn test_classify_boundaries() {
        assert_eq!(classify(0.0, 0.30, 0.60), RiskTier::Green);
        assert_eq!(classify(0.2999, 0.30, 0.60), RiskTier::Green);
        assert_eq!(classify(0.30, 0.30, 0.60), RiskTier::Amber);
        assert_eq!(classify(0.5999, 0.30, 0.60), RiskTier::Amber);
        assert_eq!(classify(0.60, 0.30, 0.60), RiskTier::Red);
        assert_eq!(classify(1.0, 0.30, 0.60), RiskTier::Red);
    }

    #[test]
    fn test_default_model_orders_risk() {
        let model = LogisticModel::default();
        let low = model.predict(&[75.0, 140.0, 0.9, 60.0, 30.0]).unwrap();
        let medium = model.predict(&[70.0, 134.0, 1.5, 38.0, 60.0]).unwrap();
        let high = model.predict(&[80.0, 125.0, 2.2, 25.0, 90.0]).unwrap();

        assert!(low < medium && medium < high);
        assert_eq!(classify(low, 0.30, 0.60), RiskTier::Green);
        assert_eq!(classify(medium, 0.30, 0.60), RiskTier::Amber);
        assert_eq!(classify(high, 0.30, 0.60), RiskTier::Red);
    }

    #[test]
    fn test_model_rejects_non_finite_input() {
        let model = LogisticModel::default();
        assert!(model.predict(&[f64::NAN, 140.0, 0.9, 60.0, 30.0]).is_err());
    }

    #[test]
    fn test_model_file_round_trip_and_validation() {
        let model = LogisticModel {
            bias: 0.0,
            ..LogisticModel::default()
        };
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(serde_json::to_string(&model).unwrap().as_bytes())
            .unwrap();
        assert_eq!(LogisticModel::from_file(file.path()).unwrap(), model);

        let broken = LogisticModel {
            scales: [1.0, 0.0, 1.0, 1.0, 1.0],
            ..LogisticModel::default()
        };
        assert!(broken.validate().is_err());
    }

    // ============================================================
    // ERRORS
    // ============================================================

    #[test]
    fn test_rpc_errors_map_to_client_classes() {
        let unavailable: ClientError = RpcError::Unavailable {
            address: "127.0.0.1:1".to_string(),
            reason: "connection refused".to_string(),
        }
        .into();
        assert!(unavailable.is_unavailable());

        let decode: ClientError = RpcError::Decode {
            address: "127.0.0.1:1".to_string(),
            reason: "expected value".to_string(),
        }
        .into();
        assert!(!decode.is_unavailable());
        assert!(matches!(decode, ClientError::Decode(_)));
    }

    // ============================================================
    // DISCOVERY
    // ============================================================

    #[tokio::test]
    async fn test_discovery_adopts_first_authoritative_answer() {
        let dead_a = dead_address().await;
        let dead_b = dead_address().await;
        let hanging = hanging_replica().await;
        let clueless = clueless_replica().await;
        let live = replica_naming("10.1.1.1:50051", vec!["10.1.1.2:50052".to_string()]).await;

        let directory = ClientDirectory::new(
            dead_a.clone(),
            vec![dead_a, dead_b, hanging, clueless, live],
            fast_timings(),
        );

        let started = tokio::time::Instant::now();
        let found = directory.discover().await;

        assert_eq!(found, Some(ReplicaAddress::from("10.1.1.1:50051")));
        assert_eq!(directory.leader_address().as_str(), "10.1.1.1:50051");
        assert!(
            directory
                .replicas()
                .contains(&ReplicaAddress::from("10.1.1.2:50052"))
        );
        // the hanging replica must not hold up the round
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_discovery_failure_keeps_cached_leader() {
        let dead = dead_address().await;
        let clueless = clueless_replica().await;
        let directory = ClientDirectory::new(
            ReplicaAddress::from("10.9.9.9:50051"),
            vec![dead, clueless],
            fast_timings(),
        );

        assert_eq!(directory.discover().await, None);
        assert_eq!(directory.leader_address().as_str(), "10.9.9.9:50051");
    }

    #[tokio::test]
    async fn test_discovery_is_bounded_by_overall_timeout() {
        let timings = DirectoryTimings {
            fallback_timeout: Duration::from_secs(5),
            overall_lookup_timeout: Duration::from_millis(300),
            ..fast_timings()
        };
        let hanging = hanging_replica().await;
        let directory = ClientDirectory::new(hanging.clone(), vec![hanging], timings);

        let started = tokio::time::Instant::now();
        assert_eq!(directory.discover().await, None);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_heartbeat_grows_replica_list() {
        let (leader, _) = accepting_leader().await;
        let directory = ClientDirectory::new(leader.clone(), Vec::new(), fast_timings());

        assert!(directory.heartbeat_once().await);
        assert_eq!(directory.leader_address(), leader);
        assert_eq!(directory.replicas(), vec![leader]);
    }

    #[tokio::test]
    async fn test_heartbeat_failure_falls_back_to_discovery() {
        let dead = dead_address().await;
        let (leader, _) = accepting_leader().await;
        let directory = ClientDirectory::new(dead.clone(), vec![dead, leader.clone()], fast_timings());

        assert!(!directory.heartbeat_once().await);
        assert_eq!(directory.leader_address(), leader);
    }

    #[tokio::test]
    async fn test_heartbeat_loop_stops_on_shutdown() {
        let (leader, _) = accepting_leader().await;
        let directory = ClientDirectory::new(leader, Vec::new(), fast_timings());
        let (tx, rx) = tokio::sync::watch::channel(false);

        let handle = directory.clone().start_heartbeat(rx);
        tokio::time::sleep(Duration::from_millis(120)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(directory.replicas().len(), 1);
    }

    // ============================================================
    // WRITE PATH
    // ============================================================

    #[tokio::test]
    async fn test_send_rediscovers_when_leader_unreachable() {
        let dead = dead_address().await;
        let (leader, accepted) = accepting_leader().await;
        let directory = ClientDirectory::new(dead.clone(), vec![dead, leader.clone()], fast_timings());

        let response = directory.send_with_retry(&sample_request()).await.unwrap();
        assert!(response.success);
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        assert_eq!(directory.leader_address(), leader);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let node = serve(Router::new().route(
            "/reports",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (
                        StatusCode::BAD_REQUEST,
                        Json(json!({
                            "success": false,
                            "message": "Invalid risk report data",
                            "alert_sent": false,
                        })),
                    )
                }
            }),
        ))
        .await;

        let directory = ClientDirectory::new(node, Vec::new(), fast_timings());
        let err = directory.send_with_retry(&sample_request()).await.unwrap_err();

        assert!(matches!(err, ClientError::Rejected(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_not_leader_hint_is_adopted() {
        let node = serve(Router::new().route(
            "/reports",
            post(|| async {
                (
                    StatusCode::MISDIRECTED_REQUEST,
                    Json(json!({
                        "success": false,
                        "message": "Not leader. Please contact the leader.",
                        "alert_sent": false,
                        "leader_address": "10.2.2.2:50051",
                    })),
                )
            }),
        ))
        .await;

        let directory = ClientDirectory::new(node, Vec::new(), fast_timings());
        let err = directory.send_with_retry(&sample_request()).await.unwrap_err();

        assert!(matches!(err, ClientError::Rejected(_)));
        assert_eq!(directory.leader_address().as_str(), "10.2.2.2:50051");
    }

    #[tokio::test]
    async fn test_send_gives_up_after_max_retries() {
        let dead = dead_address().await;
        let directory = ClientDirectory::new(dead.clone(), vec![dead], fast_timings());

        let err = directory.send_with_retry(&sample_request()).await.unwrap_err();
        assert!(matches!(err, ClientError::Exhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_retries_wait_once_per_attempt() {
        let dead = dead_address().await;
        let timings = DirectoryTimings {
            retry_delay: Duration::from_millis(300),
            ..fast_timings()
        };
        let directory = ClientDirectory::new(dead.clone(), vec![dead], timings);

        let started = std::time::Instant::now();
        let err = directory.send_with_retry(&sample_request()).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, ClientError::Exhausted { attempts: 3, .. }));
        // three failed lookups pause 300ms each; a second pause per attempt would pass 1.8s
        assert!(elapsed >= Duration::from_millis(900), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(1_500), "{:?}", elapsed);
    }

    // ============================================================
    // PATIENT MONITOR
    // ============================================================

    struct FixedVitals;

    impl VitalsSource for FixedVitals {
        fn sample(&self) -> [f64; FEATURE_COUNT] {
            [70.0, 135.0, 1.2, 40.0, 10.0]
        }
    }

    struct FixedModel(f64);

    impl RiskModel for FixedModel {
        fn predict(&self, _features: &[f64; FEATURE_COUNT]) -> anyhow::Result<f64> {
            Ok(self.0)
        }
    }

    struct BrokenModel;

    impl RiskModel for BrokenModel {
        fn predict(&self, _features: &[f64; FEATURE_COUNT]) -> anyhow::Result<f64> {
            anyhow::bail!("model file missing")
        }
    }

    fn monitor_with(directory: Arc<ClientDirectory>, model: Arc<dyn RiskModel>) -> Arc<PatientMonitor> {
        PatientMonitor::new(
            "patient_0001".to_string(),
            directory,
            model,
            Arc::new(FixedVitals),
            Thresholds::default(),
        )
    }

    #[tokio::test]
    async fn test_green_reading_stays_local() {
        let (leader, accepted) = accepting_leader().await;
        let directory = ClientDirectory::new(leader, Vec::new(), fast_timings());
        let monitor = monitor_with(directory, Arc::new(FixedModel(0.1)));

        let outcome = monitor.run_cycle().await;
        assert!(matches!(outcome, CycleOutcome::KeptLocal(_)));
        assert_eq!(monitor.local_history().len(), 1);
        assert_eq!(accepted.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_red_reading_is_sent() {
        let (leader, accepted) = accepting_leader().await;
        let directory = ClientDirectory::new(leader, Vec::new(), fast_timings());
        let monitor = monitor_with(directory, Arc::new(FixedModel(0.9)));

        let outcome = monitor.run_cycle().await;
        match outcome {
            CycleOutcome::Sent(reading) => assert_eq!(reading.tier, RiskTier::Red),
            other => panic!("expected Sent, got {:?}", other),
        }
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_model_failure_scores_as_amber() {
        let dead = dead_address().await;
        let directory = ClientDirectory::new(dead, Vec::new(), fast_timings());
        let monitor = monitor_with(directory, Arc::new(BrokenModel));

        let reading = monitor.assess();
        assert_eq!(reading.probability, 0.5);
        assert_eq!(reading.tier, RiskTier::Amber);
    }

    #[tokio::test]
    async fn test_undelivered_reports_are_queued_and_retried() {
        let open = Arc::new(AtomicBool::new(false));
        let accepted = Arc::new(AtomicUsize::new(0));
        let gate = open.clone();
        let counter = accepted.clone();
        let node = serve(Router::new().route(
            "/reports",
            post(move || {
                let gate = gate.clone();
                let counter = counter.clone();
                async move {
                    if !gate.load(Ordering::SeqCst) {
                        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({})));
                    }
                    counter.fetch_add(1, Ordering::SeqCst);
                    (
                        StatusCode::OK,
                        Json(json!({
                            "success": true,
                            "message": "Risk report received and stored successfully",
                            "alert_sent": false,
                        })),
                    )
                }
            }),
        ))
        .await;

        let directory = ClientDirectory::new(node, Vec::new(), fast_timings());
        let monitor = monitor_with(directory, Arc::new(FixedModel(0.45)));

        assert!(matches!(monitor.run_cycle().await, CycleOutcome::Queued(_)));
        assert!(matches!(monitor.run_cycle().await, CycleOutcome::Queued(_)));
        assert_eq!(monitor.pending_len(), 2);

        open.store(true, Ordering::SeqCst);
        assert_eq!(monitor.retry_pending().await, 0);
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }
}
