use crate::*;

#[tokio::test]
async fn test_host_registers_and_is_listed() {
    let stack = start_stack(fast_settings()).await;
    let host = Host::spawn(true).await;

    let mut conn = HostConnection::connect(stack.tcp).await.unwrap();
    assert_eq!(conn.command(&host.regserv()).await.unwrap(), "succreg\n");

    assert_eq!(tcp_request(stack.tcp, "list\n").await.unwrap(), host.listing());
}

#[tokio::test]
async fn test_unreachable_host_gets_failreg_and_may_retry() {
    let stack = start_stack(fast_settings()).await;
    let host = Host::spawn(false).await;

    let mut conn = HostConnection::connect(stack.tcp).await.unwrap();
    assert_eq!(
        conn.command(&host.regserv()).await.unwrap(),
        "failreg failed to ping server\n"
    );
    assert!(stack.registry.is_empty());
    assert_eq!(tcp_request(stack.tcp, "list\n").await.unwrap(), "");

    // The connection stays open; once the host answers, the retry succeeds.
    host.start_acking();
    assert_eq!(conn.command(&host.regserv()).await.unwrap(), "succreg\n");
    assert_eq!(tcp_request(stack.tcp, "list\n").await.unwrap(), host.listing());
}

#[tokio::test]
async fn test_silent_host_is_evicted() {
    let stack = start_stack(fast_settings()).await;
    let host = Host::spawn(true).await;

    let mut conn = HostConnection::connect(stack.tcp).await.unwrap();
    assert_eq!(conn.command(&host.regserv()).await.unwrap(), "succreg\n");
    host.go_silent();

    let registry = stack.registry.clone();
    assert!(
        eventually(Duration::from_secs(3), || registry.is_empty()).await,
        "silent host should be swept"
    );
    assert_eq!(tcp_request(stack.tcp, "list\n").await.unwrap(), "");
}

#[tokio::test]
async fn test_heartbeating_host_outlives_stale_threshold() {
    let stack = start_stack(fast_settings()).await;
    let host = Host::spawn(true).await;

    let mut conn = HostConnection::connect(stack.tcp).await.unwrap();
    assert_eq!(conn.command(&host.regserv()).await.unwrap(), "succreg\n");

    // Several stale windows pass; heartbeats keep the record alive.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(tcp_request(stack.tcp, "list\n").await.unwrap(), host.listing());
}

#[tokio::test]
async fn test_registration_outlives_its_connection() {
    let stack = start_stack(fast_settings()).await;
    let host = Host::spawn(true).await;

    {
        let mut conn = HostConnection::connect(stack.tcp).await.unwrap();
        assert_eq!(conn.command(&host.regserv()).await.unwrap(), "succreg\n");
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(tcp_request(stack.tcp, "list\n").await.unwrap(), host.listing());
}

#[tokio::test]
async fn test_out_of_range_port_is_refused() {
    let stack = start_stack(fast_settings()).await;

    for port in ["65535", "-1", "100000"] {
        let reply = tcp_request(stack.tcp, &format!("regserv {port} Arena 3 0\n"))
            .await
            .unwrap();
        assert_eq!(reply, "failreg invalid port\n", "port {port}");
    }
    assert_eq!(
        tcp_request(stack.tcp, "regserv 7777 Arena\n").await.unwrap(),
        "failreg malformed arguments\n"
    );
    assert!(stack.registry.is_empty());
}

#[tokio::test]
async fn test_second_port_on_one_connection_is_refused() {
    let stack = start_stack(fast_settings()).await;
    let first = Host::spawn(true).await;
    let second = Host::spawn(true).await;

    let mut conn = HostConnection::connect(stack.tcp).await.unwrap();
    assert_eq!(conn.command(&first.regserv()).await.unwrap(), "succreg\n");
    assert_eq!(
        conn.command(&second.regserv()).await.unwrap(),
        "failreg invalid port\n"
    );
    assert!(conn.is_closed().await);

    assert_eq!(tcp_request(stack.tcp, "list\n").await.unwrap(), first.listing());
}

#[tokio::test]
async fn test_reregistration_supersedes() {
    let stack = start_stack(fast_settings()).await;
    let host = Host::spawn(true).await;

    let mut a = HostConnection::connect(stack.tcp).await.unwrap();
    let mut b = HostConnection::connect(stack.tcp).await.unwrap();
    assert_eq!(a.command(&host.regserv()).await.unwrap(), "succreg\n");
    assert_eq!(b.command(&host.regserv()).await.unwrap(), "succreg\n");

    assert_eq!(stack.registry.len(), 1);
    assert_eq!(tcp_request(stack.tcp, "list\n").await.unwrap(), host.listing());
}

#[tokio::test]
async fn test_reregistration_from_another_connection_can_be_refused() {
    let mut settings = fast_settings();
    settings.registry.allow_reregistration = false;
    let stack = start_stack(settings).await;
    let host = Host::spawn(true).await;

    let mut owner = HostConnection::connect(stack.tcp).await.unwrap();
    let mut other = HostConnection::connect(stack.tcp).await.unwrap();
    assert_eq!(owner.command(&host.regserv()).await.unwrap(), "succreg\n");
    assert_eq!(
        other.command(&host.regserv()).await.unwrap(),
        "failreg already registered\n"
    );
    assert_eq!(owner.command(&host.regserv()).await.unwrap(), "succreg\n");
}
