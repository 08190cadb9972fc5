// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::time::Duration;

    use cephup_lib::{
        cluster::Cluster,
        test_env::*,
        upgrade::{Orch, UpgradeConfig, UpgradePhase, CLUSTER_STATE_COMMANDS},
    };

    const UPGRADE_DONE: &str = r#"{"target_image": "rhceph/rhceph-5:latest", "in_progress": false}"#;
    const UPGRADE_RUNNING: &str = r#"{"target_image": "rhceph/rhceph-5:latest", "in_progress": true, "services_complete": ["mgr"]}"#;
    const CLEAN_STATUS: &str = "  cluster:\n    health: HEALTH_OK\n\n  data:\n    pgs: 128 active+clean\n";
    const OSDS_6_6_6: &str = r#"{"osdmap": {"num_osds": 6, "num_up_osds": 6, "num_in_osds": 6}}"#;
    const OSDS_6_5_6: &str = r#"{"osdmap": {"num_osds": 6, "num_up_osds": 5, "num_in_osds": 6}}"#;

    fn upgrade_cluster(conn: &Arc<TestConnector>) -> Arc<Cluster> {
        test_cluster(
            "5.1",
            vec![
                test_node_spec("inst01.test", &["installer", "mon", "mgr"], 0),
                test_node_spec("mon02.test", &["mon"], 0),
                test_node_spec("mon03.test", &["mon"], 0),
                test_node_spec("osd01.test", &["osd"], 3),
                test_node_spec("osd02.test", &["osd"], 3),
                test_node_spec("client01.test", &["client"], 0),
            ],
            conn,
        )
    }

    fn quick_config() -> UpgradeConfig {
        UpgradeConfig {
            image: None,
            benchmark: false,
            verify_cluster_health: false,
            poll_interval: Duration::from_secs(10),
            monitor_timeout: Duration::from_secs(60),
            health_timeout: Duration::from_secs(30),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn successful_upgrade_returns_zero() {
        let conn = TestConnector::new();
        conn.respond("ceph orch upgrade status", TestResponse::ok(UPGRADE_DONE));
        let cluster = upgrade_cluster(&conn);

        let orch = Orch::new(cluster, quick_config());
        assert_eq!(orch.run().await, 0);
        assert_eq!(orch.phase(), UpgradePhase::Done);

        // Every phase left its mark on the transport.
        assert!(conn.saw_command("curl -o /etc/yum.repos.d/ceph-tools.repo"));
        assert!(conn.saw_command("yum install -y cephadm"));
        assert!(conn.saw_command("ceph orch upgrade check --image latest"));
        assert!(conn.saw_command("ceph orch upgrade start --image latest"));
    }

    #[tokio::test(start_paused = true)]
    async fn image_override_reaches_the_trigger() {
        let conn = TestConnector::new();
        conn.respond("ceph orch upgrade status", TestResponse::ok(UPGRADE_DONE));
        let cluster = upgrade_cluster(&conn);

        let config = UpgradeConfig {
            image: Some("rhceph/rhceph-5:5-120".to_string()),
            ..quick_config()
        };
        let orch = Orch::new(cluster, config);
        assert_eq!(orch.run().await, 0);

        assert!(conn.saw_command("ceph orch upgrade start --image rhceph/rhceph-5:5-120"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_trigger_still_collects_diagnostics() {
        let conn = TestConnector::new();
        conn.respond(
            "ceph orch upgrade start",
            TestResponse::failed(22, "Error EINVAL: no such image"),
        );
        let cluster = upgrade_cluster(&conn);

        let orch = Orch::new(cluster, quick_config());
        assert_eq!(orch.run().await, 1);
        assert_eq!(orch.phase(), UpgradePhase::Failed);

        for command in CLUSTER_STATE_COMMANDS {
            assert!(conn.saw_command(command), "diagnostics missed `{command}`");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_monitoring_times_out() {
        let conn = TestConnector::new();
        conn.respond("ceph orch upgrade status", TestResponse::ok(UPGRADE_RUNNING));
        let cluster = upgrade_cluster(&conn);

        let orch = Orch::new(cluster, quick_config());
        assert_eq!(orch.run().await, 1);
        assert_eq!(orch.phase(), UpgradePhase::Failed);

        for command in CLUSTER_STATE_COMMANDS {
            assert!(conn.saw_command(command), "diagnostics missed `{command}`");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unhealthy_cluster_after_upgrade_fails_verification() {
        let conn = TestConnector::new();
        conn.respond("ceph orch upgrade status", TestResponse::ok(UPGRADE_DONE));
        conn.respond("ceph -s -f json", TestResponse::ok(OSDS_6_5_6));
        conn.respond("ceph -s", TestResponse::ok(CLEAN_STATUS));
        let cluster = upgrade_cluster(&conn);

        let config = UpgradeConfig {
            verify_cluster_health: true,
            ..quick_config()
        };
        let orch = Orch::new(cluster, config);
        assert_eq!(orch.run().await, 1);
        assert_eq!(orch.phase(), UpgradePhase::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_cluster_after_upgrade_verifies_clean() {
        let conn = TestConnector::new();
        conn.respond("ceph orch upgrade status", TestResponse::ok(UPGRADE_DONE));
        conn.respond("ceph -s -f json", TestResponse::ok(OSDS_6_6_6));
        conn.respond("ceph -s", TestResponse::ok(CLEAN_STATUS));
        let cluster = upgrade_cluster(&conn);

        let config = UpgradeConfig {
            verify_cluster_health: true,
            ..quick_config()
        };
        let orch = Orch::new(cluster, config);
        assert_eq!(orch.run().await, 0);
        assert_eq!(orch.phase(), UpgradePhase::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn known_bad_build_stops_the_stale_upgrade_first() {
        let conn = TestConnector::new();
        conn.respond("ceph orch upgrade status", TestResponse::ok(UPGRADE_DONE));
        conn.respond(
            "rpm -qa | grep ceph-common",
            TestResponse::ok("ceph-common-16.2.7-112.el8.x86_64"),
        );
        let cluster = upgrade_cluster(&conn);

        let orch = Orch::new(cluster, quick_config());
        assert_eq!(orch.run().await, 0);

        assert!(conn.saw_command("cephadm -v shell -- ceph orch upgrade stop"));
    }

    #[tokio::test(start_paused = true)]
    async fn benchmark_workload_is_torn_down() {
        let conn = TestConnector::new();
        conn.respond("ceph orch upgrade status", TestResponse::ok(UPGRADE_DONE));
        let cluster = upgrade_cluster(&conn);

        let config = UpgradeConfig {
            benchmark: true,
            ..quick_config()
        };
        let orch = Orch::new(cluster, config);
        assert_eq!(orch.run().await, 0);

        assert!(conn.saw_command("ceph osd pool create rbench"));
        assert!(conn.saw_command("ceph osd pool delete rbench"));
    }
}
