// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

#[cfg(test)]
mod tests {
    use tokio::time::{Duration, Instant};

    use cephup_lib::test_env::*;

    const CLEAN_STATUS: &str = "  cluster:\n    health: HEALTH_OK\n\n  data:\n    pgs: 128 active+clean\n";
    const PEERING_STATUS: &str = "  cluster:\n    health: HEALTH_WARN\n\n  data:\n    pgs: 100 active+clean, 28 peering\n";
    const OSDS_6_6_6: &str = r#"{"osdmap": {"num_osds": 6, "num_up_osds": 6, "num_in_osds": 6}}"#;
    const OSDS_6_5_6: &str = r#"{"osdmap": {"num_osds": 6, "num_up_osds": 5, "num_in_osds": 6}}"#;
    const QUORUM_3: &str = r#"{"quorum": [0, 1, 2], "quorum_names": ["a", "b", "c"]}"#;
    const QUORUM_2: &str = r#"{"quorum": [0, 1], "quorum_names": ["a", "b"]}"#;

    /// Three monitors and six device-backed OSDs.
    fn three_mon_cluster(version: &str, conn: &std::sync::Arc<TestConnector>) -> std::sync::Arc<cephup_lib::cluster::Cluster> {
        test_cluster(
            version,
            vec![
                test_node_spec("mon01.test", &["mon", "installer"], 0),
                test_node_spec("mon02.test", &["mon"], 0),
                test_node_spec("mon03.test", &["mon"], 0),
                test_node_spec("osd01.test", &["osd"], 3),
                test_node_spec("osd02.test", &["osd"], 3),
                test_node_spec("client01.test", &["client"], 0),
            ],
            conn,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn settled_cluster_is_healthy() {
        let conn = TestConnector::new();
        conn.respond("ceph -s -f json", TestResponse::ok(OSDS_6_6_6));
        conn.respond("ceph -s", TestResponse::ok(CLEAN_STATUS));
        conn.respond("ceph quorum_status -f json", TestResponse::ok(QUORUM_3));
        let cluster = three_mon_cluster("4.3", &conn);

        let client = cluster.admin_client().unwrap();
        let healthy = cluster
            .check_health(&client, Duration::from_secs(30))
            .await
            .unwrap();

        assert!(healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn a_downed_osd_is_unhealthy() {
        let conn = TestConnector::new();
        conn.respond("ceph -s -f json", TestResponse::ok(OSDS_6_5_6));
        conn.respond("ceph -s", TestResponse::ok(CLEAN_STATUS));
        conn.respond("ceph quorum_status -f json", TestResponse::ok(QUORUM_3));
        let cluster = three_mon_cluster("4.3", &conn);

        let client = cluster.admin_client().unwrap();
        let healthy = cluster
            .check_health(&client, Duration::from_secs(30))
            .await
            .unwrap();

        assert!(!healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn an_incomplete_quorum_is_unhealthy() {
        let conn = TestConnector::new();
        conn.respond("ceph -s -f json", TestResponse::ok(OSDS_6_6_6));
        conn.respond("ceph -s", TestResponse::ok(CLEAN_STATUS));
        conn.respond("ceph quorum_status -f json", TestResponse::ok(QUORUM_2));
        let cluster = three_mon_cluster("4.3", &conn);

        let client = cluster.admin_client().unwrap();
        let healthy = cluster
            .check_health(&client, Duration::from_secs(30))
            .await
            .unwrap();

        assert!(!healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn a_hard_error_overrides_everything_else() {
        let conn = TestConnector::new();
        let status = format!("{CLEAN_STATUS}    health: HEALTH_ERR\n");
        conn.respond("ceph -s -f json", TestResponse::ok(OSDS_6_6_6));
        conn.respond("ceph -s", TestResponse::ok(&status));
        conn.respond("ceph quorum_status -f json", TestResponse::ok(QUORUM_3));
        let cluster = three_mon_cluster("4.3", &conn);

        let client = cluster.admin_client().unwrap();
        let healthy = cluster
            .check_health(&client, Duration::from_secs(30))
            .await
            .unwrap();

        assert!(!healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_states_hold_the_poll_loop() {
        let conn = TestConnector::new();
        conn.respond("ceph -s -f json", TestResponse::ok(OSDS_6_6_6));
        conn.respond_seq(
            "ceph -s",
            vec![
                TestResponse::ok(PEERING_STATUS),
                TestResponse::ok(CLEAN_STATUS),
            ],
        );
        conn.respond("ceph quorum_status -f json", TestResponse::ok(QUORUM_3));
        let cluster = three_mon_cluster("4.3", &conn);

        let client = cluster.admin_client().unwrap();
        let start = Instant::now();
        let healthy = cluster
            .check_health(&client, Duration::from_secs(30))
            .await
            .unwrap();

        assert!(healthy);
        // One poll interval passed while the placement groups peered.
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn pending_states_past_the_deadline_are_unhealthy() {
        let conn = TestConnector::new();
        conn.respond("ceph -s -f json", TestResponse::ok(OSDS_6_6_6));
        conn.respond("ceph -s", TestResponse::ok(PEERING_STATUS));
        conn.respond("ceph quorum_status -f json", TestResponse::ok(QUORUM_3));
        let cluster = three_mon_cluster("4.3", &conn);

        let client = cluster.admin_client().unwrap();
        let healthy = cluster
            .check_health(&client, Duration::from_secs(12))
            .await
            .unwrap();

        assert!(!healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn cephadm_era_uses_the_shell_and_skips_the_quorum_query() {
        let conn = TestConnector::new();
        conn.respond("ceph -s -f json", TestResponse::ok(OSDS_6_6_6));
        conn.respond("ceph -s", TestResponse::ok(CLEAN_STATUS));
        let cluster = three_mon_cluster("5.1", &conn);

        let client = cluster.admin_client().unwrap();
        let healthy = cluster
            .check_health(&client, Duration::from_secs(30))
            .await
            .unwrap();

        assert!(healthy);
        assert!(conn.saw_command("cephadm shell -- ceph -s"));
        assert!(!conn.saw_command("quorum_status"));
    }
}
