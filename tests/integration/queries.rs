use crate::*;

#[tokio::test]
async fn test_empty_registry_lists_nothing() {
    let stack = start_stack(fast_settings()).await;
    assert_eq!(tcp_request(stack.tcp, "list\n").await.unwrap(), "");

    let resp = http_get(stack.http, "/retrieve.do?action=list").await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "");
}

#[tokio::test]
async fn test_list_variants_over_tcp() {
    let stack = start_stack(fast_settings()).await;
    let host = Host::spawn(true).await;
    let mut conn = HostConnection::connect(stack.tcp).await.unwrap();
    assert_eq!(conn.command(&host.regserv()).await.unwrap(), "succreg\n");

    // Unterminated, with client details, and CRLF-terminated.
    for request in ["list", "list Blooptoop 1202\n", "list\r\n"] {
        assert_eq!(
            tcp_request(stack.tcp, request).await.unwrap(),
            host.listing(),
            "{request:?}"
        );
    }
    assert_eq!(
        tcp_request(stack.tcp, "list Blooptoop\n").await.unwrap(),
        "error malformed arguments\n"
    );
    assert_eq!(
        tcp_request(stack.tcp, "whois\n").await.unwrap(),
        "error unknown command\n"
    );
}

#[tokio::test]
async fn test_http_and_tcp_lists_agree() {
    let stack = start_stack(fast_settings()).await;
    let mut hosts = Vec::new();
    for _ in 0..3 {
        let host = Host::spawn(true).await;
        let mut conn = HostConnection::connect(stack.tcp).await.unwrap();
        assert_eq!(conn.command(&host.regserv()).await.unwrap(), "succreg\n");
        hosts.push(host);
    }

    let tcp = tcp_request(stack.tcp, "list\n").await.unwrap();
    let http = http_get(
        stack.http,
        "/retrieve.do?action=list&name=Blooptoop&version=1202&build=42",
    )
    .await
    .unwrap()
    .text()
    .await
    .unwrap();

    let mut tcp_lines: Vec<_> = tcp.lines().collect();
    let mut http_lines: Vec<_> = http.lines().collect();
    tcp_lines.sort();
    http_lines.sort();
    assert_eq!(tcp_lines, http_lines);

    let mut expected: Vec<_> = hosts.iter().map(Host::listing).collect();
    expected.sort();
    assert_eq!(tcp_lines, expected);
    assert!(!tcp.ends_with('\n'));
}

#[tokio::test]
async fn test_malformed_http_query_still_served() {
    let stack = start_stack(fast_settings()).await;
    let host = Host::spawn(true).await;
    let mut conn = HostConnection::connect(stack.tcp).await.unwrap();
    assert_eq!(conn.command(&host.regserv()).await.unwrap(), "succreg\n");

    let resp = http_get(stack.http, "/retrieve.do?version=latest&build=x")
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), host.listing());
}

#[tokio::test]
async fn test_status_reports_records() {
    let stack = start_stack(fast_settings()).await;
    let host = Host::spawn(true).await;
    let mut conn = HostConnection::connect(stack.tcp).await.unwrap();
    assert_eq!(
        conn.command(&format!("regserv {} Arena 3 1234\n", host.port))
            .await
            .unwrap(),
        "succreg\n"
    );

    let status: serde_json::Value = http_get(stack.http, "/api/status")
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["active"], 1);
    assert_eq!(status["pending"], 0);
    let server = &status["servers"][0];
    assert_eq!(server["address"], format!("127.0.0.1:{}", host.port));
    assert_eq!(server["name"], "Arena");
    assert_eq!(server["version"], 3);
    assert_eq!(server["key"], 1234);
    assert_eq!(server["status"], "active");
}
