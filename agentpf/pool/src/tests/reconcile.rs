use super::*;
use pretty_assertions::assert_eq;

#[tokio::test(start_paused = true)]
async fn single_idle_agent_is_kept_as_fallback() {
    let test = TestPool::new();
    test.update(vec![mk_agent("a", "10.0.0.1", "web", false)]);
    assert_eq!(test.keys(), btreeset! {"a.ns".to_string()});

    let handle = test
        .pool
        .get_client(ip("10.0.0.1"))
        .expect("pool must return the fallback agent");
    assert_eq!(handle.key(), &key("a"));
    test.connected().await;
    assert!(handle.is_connected());
    assert_eq!(test.dialer.dials("a"), 1);
    assert_eq!(test.metrics.connects.get(), 1);
    assert_eq!(test.metrics.handles.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn only_intercepted_agents_are_connected() {
    let test = TestPool::new();
    test.update(vec![
        mk_agent("a", "10.0.0.1", "web", true),
        mk_agent("b", "10.0.0.2", "api", false),
    ]);
    assert_eq!(test.keys(), btreeset! {"a.ns".to_string()});
    assert_eq!(test.dialer.dials("b"), 0);

    // Traffic that doesn't match any handle is routed through the
    // intercepted agent.
    let handle = test.pool.get_client(ip("10.0.0.9")).unwrap();
    assert_eq!(handle.key(), &key("a"));
    let handle = test.pool.get_client(ip("10.0.0.2")).unwrap();
    assert_eq!(handle.key(), &key("a"));

    assert!(test.pool.get_workload_client("web").is_some());
    assert!(test.pool.get_workload_client("api").is_none());
}

#[tokio::test(start_paused = true)]
async fn exact_ip_match_wins() {
    let test = TestPool::new();
    test.update(vec![
        mk_agent("a", "10.0.0.1", "web", true),
        mk_agent("b", "10.0.0.2", "api", true),
    ]);
    assert_eq!(
        test.pool.get_client(ip("10.0.0.2")).unwrap().key(),
        &key("b")
    );
    assert_eq!(
        test.pool.get_client(ip("10.0.0.1")).unwrap().key(),
        &key("a")
    );
    assert_eq!(
        test.pool.get_workload_client("api").unwrap().key(),
        &key("b")
    );
}

#[tokio::test(start_paused = true)]
async fn empty_pool_has_no_client() {
    let test = TestPool::new();
    assert!(test.pool.get_client(ip("10.0.0.1")).is_none());
    test.update(vec![]);
    assert!(test.pool.is_empty());
    assert!(test.pool.get_client(ip("10.0.0.1")).is_none());
    assert!(!test.pool.is_disabled());
}

#[tokio::test(start_paused = true)]
async fn evicts_agent_no_longer_intercepted() {
    let test = TestPool::new();
    test.update(vec![
        mk_agent("a", "10.0.0.1", "web", true),
        mk_agent("b", "10.0.0.2", "api", true),
    ]);
    test.connected().await;
    assert_eq!(test.bridge.running(), 2);

    test.update(vec![
        mk_agent("a", "10.0.0.1", "web", false),
        mk_agent("b", "10.0.0.2", "api", true),
    ]);
    assert_eq!(test.keys(), btreeset! {"b.ns".to_string()});
    assert_eq!(test.metrics.evictions.get(), 1);

    settle().await;
    assert_eq!(test.dialer.teardowns("a"), 1);
    assert_eq!(test.dialer.teardowns("b"), 0);
    assert_eq!(test.bridge.running(), 1);
}

#[tokio::test(start_paused = true)]
async fn last_idle_agent_survives() {
    let test = TestPool::new();
    test.update(vec![
        mk_agent("a", "10.0.0.1", "web", true),
        mk_agent("b", "10.0.0.2", "api", false),
    ]);
    test.connected().await;

    test.update(vec![
        mk_agent("a", "10.0.0.1", "web", false),
        mk_agent("b", "10.0.0.2", "api", false),
    ]);
    assert_eq!(test.keys(), btreeset! {"a.ns".to_string()});
    assert!(!test.handle("a").is_intercepted());
    assert_eq!(test.metrics.evictions.get(), 0);

    settle().await;
    assert_eq!(test.dialer.teardowns("a"), 0);
    assert_eq!(test.bridge.running(), 0);
}

#[tokio::test(start_paused = true)]
async fn set_intercepted_is_idempotent() {
    let test = TestPool::new();
    test.update(vec![mk_agent("a", "10.0.0.1", "web", false)]);
    test.connected().await;
    assert_eq!(test.agent.dial_watches(), 0);

    test.update(vec![mk_agent("a", "10.0.0.1", "web", true)]);
    settle().await;
    assert!(test.handle("a").is_intercepted());
    assert_eq!(test.agent.dial_watches(), 1);
    assert_eq!(test.bridge.started(), 1);

    test.update(vec![mk_agent("a", "10.0.0.1", "web", true)]);
    test.handle("a").set_intercepted(true);
    settle().await;
    assert_eq!(test.agent.dial_watches(), 1);
    assert_eq!(test.bridge.started(), 1);
    assert_eq!(test.bridge.running(), 1);

    test.handle("a").set_intercepted(false);
    test.handle("a").set_intercepted(false);
    settle().await;
    assert!(!test.handle("a").is_intercepted());
    assert_eq!(test.bridge.running(), 0);
    assert_eq!(test.dialer.dials("a"), 1);
}

#[tokio::test(start_paused = true)]
async fn removed_agents_are_torn_down_once() {
    let test = TestPool::new();
    test.update(vec![
        mk_agent("a", "10.0.0.1", "web", true),
        mk_agent("b", "10.0.0.2", "api", true),
    ]);
    test.connected().await;

    test.update(vec![mk_agent("b", "10.0.0.2", "api", true)]);
    test.update(vec![mk_agent("b", "10.0.0.2", "api", true)]);
    settle().await;
    assert_eq!(test.keys(), btreeset! {"b.ns".to_string()});
    assert_eq!(test.dialer.teardowns("a"), 1);

    test.update(vec![]);
    test.update(vec![]);
    settle().await;
    assert!(test.pool.is_empty());
    assert_eq!(test.dialer.teardowns("a"), 1);
    assert_eq!(test.dialer.teardowns("b"), 1);
    assert_eq!(test.bridge.running(), 0);
    assert_eq!(test.metrics.handles.get(), 0);
    assert_eq!(test.metrics.updates.get(), 5);
}

#[tokio::test(start_paused = true)]
async fn agents_without_pod_names_disable_the_pool() {
    let test = TestPool::new();
    test.update(vec![
        mk_agent("", "10.0.0.1", "web", true),
        mk_agent("", "10.0.0.2", "api", false),
    ]);
    assert!(test.pool.is_disabled());
    assert!(test.pool.is_empty());

    test.pool
        .wait_for_ip(ip("10.0.0.1"), Duration::from_secs(60))
        .await
        .expect("disabled pool must not block");
}

#[tokio::test(start_paused = true)]
async fn agents_without_pod_names_are_ignored_alongside_named_ones() {
    let test = TestPool::new();
    test.update(vec![
        mk_agent("", "10.0.0.1", "web", true),
        mk_agent("b", "10.0.0.2", "api", true),
    ]);
    assert!(!test.pool.is_disabled());
    assert_eq!(test.keys(), btreeset! {"b.ns".to_string()});
}

#[tokio::test(start_paused = true)]
async fn proxy_via_keeps_idle_workload_connected() {
    let test = TestPool::new();
    test.pool.set_proxy_via("api");
    test.pool.set_proxy_via("api");

    let agents = vec![
        mk_agent("a", "10.0.0.1", "web", true),
        mk_agent("b", "10.0.0.2", "api", false),
        mk_agent("c", "10.0.0.3", "db", false),
    ];
    test.update(agents.clone());
    assert_eq!(
        test.keys(),
        btreeset! {"a.ns".to_string(), "b.ns".to_string()}
    );

    test.connected().await;
    test.update(agents);
    assert_eq!(
        test.keys(),
        btreeset! {"a.ns".to_string(), "b.ns".to_string()}
    );
    assert_eq!(test.metrics.evictions.get(), 0);
}

#[tokio::test(start_paused = true)]
async fn open_tunnels_keep_agent_connected() {
    let test = TestPool::new();
    test.update(vec![
        mk_agent("a", "10.0.0.1", "web", true),
        mk_agent("b", "10.0.0.2", "api", true),
    ]);
    test.connected().await;

    let a = test.handle("a");
    let tunnel = a.tunnel().await.expect("tunnel must open");
    assert_eq!(a.open_tunnels(), 1);
    assert_eq!(test.agent.tunnels(), 1);

    let agents = vec![
        mk_agent("a", "10.0.0.1", "web", false),
        mk_agent("b", "10.0.0.2", "api", true),
    ];
    test.update(agents.clone());
    assert_eq!(
        test.keys(),
        btreeset! {"a.ns".to_string(), "b.ns".to_string()}
    );

    drop(tunnel);
    assert_eq!(a.open_tunnels(), 0);
    test.update(agents);
    assert_eq!(test.keys(), btreeset! {"b.ns".to_string()});
}

#[tokio::test(start_paused = true)]
async fn connect_failure_reaches_tunnel_callers() {
    let test = TestPool::new();
    test.dialer.fail("a");
    test.update(vec![mk_agent("a", "10.0.0.1", "web", true)]);

    let handle = test.handle("a");
    let (first, second) = tokio::join!(handle.tunnel(), handle.tunnel());
    for res in [first, second] {
        let error = res.expect_err("connect must fail");
        assert!(error.is_unavailable(), "{error}");
    }

    settle().await;
    assert!(test.pool.is_empty());
    assert_eq!(test.metrics.connect_failures.get(), 1);
    assert_eq!(test.metrics.handles.get(), 0);
    assert_eq!(test.dialer.teardowns("a"), 0);
    assert_eq!(handle.open_tunnels(), 0);

    // The next snapshot tries again.
    test.update(vec![mk_agent("a", "10.0.0.1", "web", true)]);
    assert_eq!(test.keys(), btreeset! {"a.ns".to_string()});
    assert_eq!(test.dialer.dials("a"), 2);
}

#[tokio::test(start_paused = true)]
async fn connect_is_bounded_by_timeout() {
    let test = TestPool::with_config(Config {
        connect_timeout: Duration::from_secs(1),
        ..Default::default()
    });
    test.dialer.hang("a");
    test.update(vec![mk_agent("a", "10.0.0.1", "web", true)]);

    let start = time::Instant::now();
    let error = test
        .handle("a")
        .tunnel()
        .await
        .expect_err("connect must time out");
    assert!(
        matches!(error, Error::ConnectTimeout { ref key, .. } if key.as_str() == "a.ns"),
        "{error}"
    );
    assert!(start.elapsed() >= Duration::from_secs(1));

    settle().await;
    assert!(test.pool.is_empty());
}

#[tokio::test(start_paused = true)]
async fn removing_a_connecting_agent_cancels_it() {
    let test = TestPool::new();
    test.dialer.hang("a");
    test.update(vec![mk_agent("a", "10.0.0.1", "web", true)]);
    let handle = test.handle("a");

    test.update(vec![]);
    assert!(test.pool.is_empty());
    match handle.ready().await {
        Err(Error::Canceled(key)) => assert_eq!(key.as_str(), "a.ns"),
        Err(error) => panic!("unexpected error: {error}"),
        Ok(_) => panic!("canceled handle must not connect"),
    }
    assert_eq!(test.metrics.connect_failures.get(), 0);
}

#[tokio::test(start_paused = true)]
async fn evicted_agents_open_no_tunnels() {
    let test = TestPool::new();
    test.update(vec![
        mk_agent("a", "10.0.0.1", "web", true),
        mk_agent("b", "10.0.0.2", "api", true),
    ]);
    test.connected().await;

    // A caller that looked the handle up before it was evicted.
    let a = test.handle("a");
    test.update(vec![
        mk_agent("a", "10.0.0.1", "web", false),
        mk_agent("b", "10.0.0.2", "api", true),
    ]);
    assert_eq!(test.keys(), btreeset! {"b.ns".to_string()});

    match a.tunnel().await {
        Err(Error::Canceled(key)) => assert_eq!(key.as_str(), "a.ns"),
        Err(error) => panic!("unexpected error: {error}"),
        Ok(_) => panic!("evicted handle must not open tunnels"),
    }
    assert_eq!(a.open_tunnels(), 0);
    assert_eq!(test.agent.tunnels(), 0);
}

#[tokio::test(start_paused = true)]
async fn disabled_pool_creates_no_handles() {
    let test = TestPool::new();
    test.update(vec![
        mk_agent("a", "10.0.0.1", "web", true),
        mk_agent("b", "10.0.0.2", "api", false),
    ]);
    test.connected().await;

    test.pool.disable();
    test.pool.cancel_all();
    assert!(test.pool.is_empty());

    // A wait that raced the teardown can't bring a known agent back.
    assert!(test
        .pool
        .ensure_handle(&mk_agent("b", "10.0.0.2", "api", false))
        .is_none());
    test.pool
        .wait_for_workload("api", Duration::from_secs(10))
        .await
        .expect("disabled pool must not block");

    settle().await;
    assert!(test.pool.is_empty());
    assert_eq!(test.dialer.dials("b"), 0);
    assert_eq!(test.metrics.handles.get(), 0);
}
