// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

#[cfg(test)]
mod tests {
    use cephup_lib::{
        error::CephError,
        exec::ExecOpts,
        node::RolesContainer,
        role::container_exec_prefix,
        test_env::*,
    };

    #[test]
    fn roles_container_membership() {
        let roles = RolesContainer::from_roles([
            "mon".to_string(),
            "mgr".to_string(),
            "mon".to_string(),
        ]);

        assert_eq!(roles.len(), 2);
        assert!(roles.contains("mon"));
        assert!(!roles.contains("osd"));
        assert!(roles.contains_all(["mon", "mgr"]));
        assert!(!roles.contains_all(["mon", "osd"]));
    }

    #[test]
    fn roles_container_pool_sentinel() {
        let mut roles = RolesContainer::new();
        assert!(roles.contains(RolesContainer::POOL));

        roles.update_roles(&["client".to_string()]);
        assert!(!roles.contains(RolesContainer::POOL));
        assert!(roles.contains("client"));

        roles.clear();
        assert!(roles.contains(RolesContainer::POOL));

        assert_eq!(RolesContainer::from_roles(Vec::new()).to_string(), "pool");
    }

    #[test]
    fn container_prefix_selects_runtime_by_os() {
        assert_eq!(
            container_exec_prefix("8.6", true, "ceph-mon-node1"),
            "sudo podman exec ceph-mon-node1"
        );
        assert_eq!(
            container_exec_prefix("7.9", true, "ceph-mon-node1"),
            "sudo docker exec ceph-mon-node1"
        );
        assert_eq!(container_exec_prefix("8.6", false, "ceph-mon-node1"), "");
    }

    #[test]
    fn osd_volume_bijection() {
        let conn = TestConnector::new();
        // One osd role entry plus two more volumes: bring-up fills every
        // free volume with an OSD of its own.
        let node = test_node("osd01.test", &["mon", "osd"], 3, &conn);

        assert_eq!(node.allocated_volumes(), 3);
        assert_eq!(node.get_demons(Some("osd")).len(), 3);
        assert_eq!(node.free_volumes(), 0);

        let osd = node.get_role_objects(Some("osd"))[0].clone();
        node.remove_role_object(&osd);
        assert_eq!(node.allocated_volumes(), 2);
        assert_eq!(node.get_demons(Some("osd")).len(), 2);
        assert_eq!(node.free_volumes(), 1);

        let replacement = node.create_role_object("osd").unwrap();
        assert!(replacement.is_active());
        assert_eq!(node.allocated_volumes(), 3);
        assert_eq!(node.get_demons(Some("osd")).len(), 3);

        let err = node.create_role_object("osd").unwrap_err();
        assert!(matches!(err, CephError::NoFreeVolume { .. }), "got {err:?}");
        // The failed creation must not disturb the mapping.
        assert_eq!(node.allocated_volumes(), 3);
        assert_eq!(node.get_demons(Some("osd")).len(), 3);
    }

    #[test]
    fn osd_activity_follows_its_device() {
        let conn = TestConnector::new();
        let node = test_node("osd01.test", &["osd"], 1, &conn);

        let osd = node.get_role_objects(Some("osd"))[0].clone();
        assert_eq!(osd.device().as_deref(), Some("/dev/vdb"));
        assert!(osd.is_active());

        // Directly flipping the flag has no effect; activity is derived.
        osd.set_active(false);
        assert!(osd.is_active());
    }

    #[test]
    fn container_names_follow_role_and_device() {
        let conn = TestConnector::new();
        let node = test_node("osd01.example.com", &["mon", "osd"], 1, &conn);

        let mon = node.get_role_objects(Some("mon"))[0].clone();
        assert_eq!(mon.container_name(), None);

        mon.set_containerized(true);
        assert_eq!(mon.container_name().as_deref(), Some("ceph-mon-osd01"));

        mon.set_container_name("override");
        assert_eq!(mon.container_name().as_deref(), Some("override"));

        let osd = node.get_role_objects(Some("osd"))[0].clone();
        osd.set_containerized(true);
        assert_eq!(
            osd.container_name().as_deref(),
            Some("ceph-osd-osd01.example.com-/dev/vdb")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn containerized_demon_wraps_commands() {
        let conn = TestConnector::new();
        let node = test_node("mon01.test", &["mon"], 0, &conn);

        let mon = node.get_role_objects(Some("mon"))[0].clone();
        mon.set_containerized(true);
        mon.exec_command("sudo ceph -s", &ExecOpts::default())
            .await
            .unwrap();

        assert!(
            conn.saw_command("sudo podman exec ceph-mon-mon01 ceph -s"),
            "issued: {:?}",
            conn.commands()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn installer_edits_orchestration_config() {
        let conn = TestConnector::new();
        let node = test_node("inst01.test", &["installer", "mon"], 0, &conn);

        let installer = node.get_role_objects(Some("installer"))[0].clone();
        installer
            .append_conf("all.yml", "ceph_docker_image: rhceph/rhceph-5\n")
            .await
            .unwrap();

        assert!(conn.saw_command("tee -a /usr/share/ceph-ansible/group_vars/all.yml"));
        assert!(conn.saw_command("chmod 644 /usr/share/ceph-ansible/group_vars/all.yml"));

        // Only the installer can edit orchestration config.
        let mon = node.get_role_objects(Some("mon"))[0].clone();
        let err = mon.append_conf("all.yml", "x").await.unwrap_err();
        assert!(matches!(err, CephError::Config(_)), "got {err:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn fleet_dispatch_reaches_every_node() {
        let conn = TestConnector::new();
        let cluster = test_cluster(
            "5.1",
            vec![
                test_node_spec("mon01.test", &["mon"], 0),
                test_node_spec("mon02.test", &["mon"], 0),
                test_node_spec("osd01.test", &["osd"], 1),
            ],
            &conn,
        );

        let results = cluster.exec_on_all("uptime", &ExecOpts::default()).await;

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|result| result.is_ok()));
        let issued = conn
            .commands()
            .iter()
            .filter(|command| command.as_str() == "uptime")
            .count();
        assert_eq!(issued, 3);
    }

    #[test]
    fn inventory_parses_into_the_cluster_model() {
        let inventory = r#"
            [cluster]
            name = "ceph-qe"
            version = "5.1"
            public_networks = ["10.0.0.0/24"]
            cluster_networks = ["192.168.40.0/24"]
            repo_base_url = "http://repo.test/compose/Tools"

            [[nodes]]
            hostname = "mon01.test"
            ip_address = "10.0.0.11"
            username = "cephuser"
            password = "cephpasswd"
            root_password = "passwd"
            roles = ["mon", "installer"]
            os_version = "8.6"

            [[nodes]]
            hostname = "osd01.test"
            ip_address = "10.0.0.12"
            username = "cephuser"
            password = "cephpasswd"
            root_password = "passwd"
            roles = ["osd"]
            devices = ["/dev/vdb", "/dev/vdc"]
            pkg_type = "deb"

            [upgrade]
            verify_cluster_health = true
        "#;

        let config: cephup_lib::config::Config = toml::from_str(inventory).unwrap();
        assert!(config.upgrade.verify_cluster_health);
        assert_eq!(config.upgrade.poll_interval_secs, 30);

        let conn = TestConnector::new();
        let cluster = cephup_lib::cluster::Cluster::from_config(
            &config,
            conn as std::sync::Arc<dyn cephup_lib::conn::Connector>,
        )
        .unwrap();

        assert_eq!(cluster.name, "ceph-qe");
        assert!(cluster.version().uses_cephadm());
        assert_eq!(cluster.networks().public_csv(), "10.0.0.0/24");
        assert_eq!(cluster.networks().cluster_csv(), "192.168.40.0/24");

        let osd_node = cluster.get_node_by_hostname("osd01.test").unwrap();
        assert_eq!(osd_node.allocated_volumes(), 2);
        assert_eq!(osd_node.shortname, "osd01");
        assert_eq!(cluster.demon_stat().get("osd").copied(), Some(2));
    }

    #[test]
    fn cluster_lookups_respect_node_order() {
        let conn = TestConnector::new();
        let cluster = test_cluster(
            "5.1",
            vec![
                test_node_spec("mon01.test", &["mon", "installer"], 0),
                test_node_spec("mon02.test", &["mon"], 0),
                test_node_spec("osd01.test", &["osd"], 2),
                test_node_spec("client01.test", &["client"], 0),
            ],
            &conn,
        );

        assert_eq!(cluster.get_nodes(Some("mon")).len(), 2);
        assert_eq!(cluster.get_nodes(None).len(), 4);

        let first_mon = cluster.get_role_object("mon").unwrap();
        assert_eq!(first_mon.node().unwrap().hostname, "mon01.test");

        let stat = cluster.demon_stat();
        assert_eq!(stat.get("mon").copied(), Some(2));
        assert_eq!(stat.get("osd").copied(), Some(2));

        let err = cluster.get_role_object("rgw").unwrap_err();
        assert!(matches!(err, CephError::NotFound(_)), "got {err:?}");

        let admin = cluster.admin_client().unwrap();
        assert_eq!(admin.role(), "client");
    }
}
