mod common;

use std::sync::Arc;
use std::time::Duration;

use lb_agent::api::{AgentClient, ClientConfig, ClientError};
use lb_agent::lifecycle::heartbeat;
use lb_agent::load_balancer::{EndpointKey, ManualClock, RegistryShards};
use lb_agent::Agent;

fn client_config(base_port: u16) -> ClientConfig {
    ClientConfig {
        base_port,
        heartbeat_path: None,
        ..ClientConfig::default()
    }
}

/// Ask until the agent has a route, or give up after ~2s.
async fn first_host(client: &mut AgentClient, modid: u32, cmdid: u32) -> Result<lb_agent::load_balancer::HostAddr, ClientError> {
    let mut last = Err(ClientError::NotExist);
    for _ in 0..100 {
        last = client.get_host(modid, cmdid, 200).await;
        if !matches!(last, Err(ClientError::NotExist)) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    last
}

fn is_overloaded(shards: &RegistryShards, key: EndpointKey, host: lb_agent::load_balancer::HostAddr) -> bool {
    shards
        .for_endpoint(key)
        .inspect(key, |router| router.host(&host).map(|h| h.overloaded))
        .flatten()
        .unwrap_or(false)
}

#[tokio::test]
async fn test_lookup_pulls_route_from_naming_service() {
    let naming_addr = "127.0.0.1:28301".parse().unwrap();
    common::start_mock_service(naming_addr, |request| {
        if request.method == "GET" && request.path == "/v1/route/10001/1001" {
            (200, r#"{"hosts":[{"ip":"10.0.0.1","port":9001},{"ip":"10.0.0.2","port":9002}]}"#.to_string())
        } else {
            (404, String::new())
        }
    })
    .await;

    let dir = common::scratch_dir("naming");
    let mut config = common::test_config(28310, dir.clone());
    config.control_plane.naming_url = "http://127.0.0.1:28301".to_string();
    config.control_plane.reporter_url = "http://127.0.0.1:28302".to_string();
    let agent = Agent::start(config).await.unwrap();
    assert_eq!(agent.frontend_addrs().len(), 3);

    let mut client = AgentClient::connect(client_config(28310)).await.unwrap();
    let host = first_host(&mut client, 10001, 1001).await.unwrap();
    assert!(host == common::host(1, 9001) || host == common::host(2, 9002));

    let route = client.get_route(10001, 1001, 200).await.unwrap();
    assert_eq!(route, vec![common::host(1, 9001), common::host(2, 9002)]);

    let update = client.get_route_if_changed(10001, 1001, -1, 200).await.unwrap();
    assert!(update.version > 0);
    assert_eq!(update.hosts.as_deref(), Some(route.as_slice()));
    let same = client.get_route_if_changed(10001, 1001, update.version, 200).await.unwrap();
    assert_eq!(same.hosts, None);

    // unknown endpoint: naming answers 404, which removes it
    assert!(matches!(client.get_host(1, 1, 50).await, Err(ClientError::NotExist)));

    agent.stop().await;
    let snapshot = std::fs::read_to_string(RegistryShards::snapshot_path(&dir, 11002 % 3 + 1)).unwrap();
    assert_eq!(snapshot.lines().count(), 2);
    std::fs::remove_dir_all(&dir).unwrap_or_default();
}

#[tokio::test]
async fn test_failing_host_is_sidelined_and_reported() {
    let a = common::host(1, 7001);
    let b = common::host(2, 7002);
    let reports = common::CollectedReports::default();
    let clock = ManualClock::new(1_700_000_000);

    let dir = common::scratch_dir("sideline");
    let agent = Agent::start_with(
        common::test_config(28320, dir.clone()),
        common::StaticRoutes(vec![a, b]),
        reports.clone(),
        Arc::new(clock.clone()),
    )
    .await
    .unwrap();
    let shards = agent.shards().clone();
    let key = EndpointKey::new(5, 5);

    let mut client = AgentClient::connect(client_config(28320)).await.unwrap();
    first_host(&mut client, 5, 5).await.unwrap();

    for _ in 0..10 {
        client.report(5, 5, a, false, None).await.unwrap();
    }
    let sidelined = common::eventually(Duration::from_secs(2), || {
        let shards = shards.clone();
        async move { is_overloaded(&shards, key, a).then_some(()) }
    })
    .await;
    assert!(sidelined.is_some(), "host should be overloaded after 10 straight failures");

    for _ in 0..5 {
        assert_eq!(client.get_host(5, 5, 200).await.unwrap(), b);
    }

    // next report after the interval carries the real counts upstream
    clock.advance(15);
    client.report(5, 5, b, true, None).await.unwrap();
    let delivered = common::eventually(Duration::from_secs(2), || {
        let reports = reports.clone();
        async move {
            let received = reports.0.lock().unwrap().first().cloned();
            received
        }
    })
    .await
    .expect("health report should be delivered");

    assert_eq!((delivered.modid, delivered.cmdid), (5, 5));
    let overloaded: Vec<_> = delivered.results.iter().filter(|r| r.overload).collect();
    assert_eq!(overloaded.len(), 1);
    assert_eq!((overloaded[0].ip, overloaded[0].port), (a.ip, a.port));

    agent.stop().await;
    std::fs::remove_dir_all(&dir).unwrap_or_default();
}

#[tokio::test]
async fn test_client_follows_heartbeat() {
    let dir = common::scratch_dir("heartbeat");
    let hb_path = dir.join("hb_map.bin");
    let mut config = common::test_config(28330, dir.clone());
    config.heartbeat.enabled = true;
    config.heartbeat.path = hb_path.clone();

    let agent = Agent::start_with(
        config,
        common::StaticRoutes(vec![common::host(1, 80)]),
        common::CollectedReports::default(),
        Arc::new(lb_agent::load_balancer::SystemClock),
    )
    .await
    .unwrap();

    let stamped = common::eventually(Duration::from_secs(2), || {
        let path = hb_path.clone();
        async move { path.exists().then_some(()) }
    })
    .await;
    assert!(stamped.is_some());

    let mut client = AgentClient::connect(ClientConfig {
        base_port: 28330,
        heartbeat_path: Some(hb_path.clone()),
        ..ClientConfig::default()
    })
    .await
    .unwrap();
    assert_eq!(first_host(&mut client, 2, 2).await.unwrap(), common::host(1, 80));

    agent.stop().await;
    heartbeat::write_heartbeat(&hb_path, 0).unwrap();
    assert!(matches!(client.get_host(2, 2, 50).await, Err(ClientError::AgentDown)));

    std::fs::remove_dir_all(&dir).unwrap_or_default();
}
