use crate::*;

use muster_core::MusterConfig;

#[tokio::test]
async fn test_shutdown_stops_daemon_and_retires_records() {
    let stack = start_stack(fast_settings()).await;
    let host = Host::spawn(true).await;
    let mut conn = HostConnection::connect(stack.tcp).await.unwrap();
    assert_eq!(conn.command(&host.regserv()).await.unwrap(), "succreg\n");

    stack.shutdown.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), stack.task)
        .await
        .expect("daemon should stop")
        .unwrap()
        .expect("clean shutdown");

    assert!(stack.registry.is_empty());
    assert!(TcpStream::connect(stack.tcp).await.is_err());
}

#[tokio::test]
async fn test_shutdown_refuses_pending_registration() {
    let stack = start_stack(fast_settings()).await;
    let host = Host::spawn(false).await;

    let mut conn = HostConnection::connect(stack.tcp).await.unwrap();
    let pending = tokio::spawn(async move { conn.command(&host.regserv()).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    stack.shutdown.send(()).unwrap();
    assert_eq!(
        pending.await.unwrap().unwrap(),
        "failreg registry shutting down\n"
    );
}

#[test]
fn test_settings_from_config() {
    let config = MusterConfig::default();
    let settings = DaemonSettings::from_config(&config).unwrap();
    assert_eq!(settings.tcp_addr, "0.0.0.0:3333".parse().unwrap());
    assert_eq!(settings.udp_addr, "0.0.0.0:3333".parse().unwrap());
    assert_eq!(settings.http_addr, "0.0.0.0:8090".parse().unwrap());
    assert_eq!(settings.probe.admit_attempts, 5);
    assert_eq!(settings.probe.admit_timeout, Duration::from_secs(12));
    assert_eq!(settings.probe.heartbeat_interval, Duration::from_secs(720));
    assert_eq!(settings.registry.stale_after, Duration::from_secs(3900));

    let mut bad = MusterConfig::default();
    bad.network.bind_host = "not-an-address".into();
    assert!(DaemonSettings::from_config(&bad).is_err());
}
