use super::*;
use pretty_assertions::assert_eq;

#[tokio::test(start_paused = true)]
async fn wait_for_ip_times_out() {
    let test = TestPool::new();
    test.update(vec![mk_agent("a", "10.0.0.1", "web", true)]);

    let start = time::Instant::now();
    let error = test
        .pool
        .wait_for_ip(ip("10.0.0.9"), Duration::from_secs(3))
        .await
        .expect_err("no agent owns the IP");
    assert!(matches!(error, Error::WaitTimeout { .. }), "{error}");
    assert!(start.elapsed() >= Duration::from_secs(3));
    assert!(start.elapsed() < Duration::from_secs(4));

    let error = test
        .pool
        .wait_for_workload("svc", Duration::from_secs(3))
        .await
        .expect_err("no agent belongs to the workload");
    assert!(matches!(error, Error::WaitTimeout { .. }), "{error}");

    // Timed-out waiters stay registered so that a matching agent is still
    // connected when it appears.
    assert_eq!(test.pool.waiters(), (1, 1));
    test.update(vec![
        mk_agent("a", "10.0.0.1", "web", true),
        mk_agent("b", "10.0.0.9", "svc", false),
    ]);
    assert_eq!(test.pool.waiters(), (0, 0));
    assert_eq!(
        test.keys(),
        btreeset! {"a.ns".to_string(), "b.ns".to_string()}
    );
}

#[tokio::test(start_paused = true)]
async fn wait_for_existing_handle_returns_immediately() {
    let test = TestPool::new();
    test.update(vec![mk_agent("a", "10.0.0.1", "web", true)]);

    let start = time::Instant::now();
    test.pool
        .wait_for_ip(ip("10.0.0.1"), Duration::from_secs(3))
        .await
        .expect("agent already connected");
    test.pool
        .wait_for_workload("web", Duration::from_secs(3))
        .await
        .expect("agent already connected");
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(test.pool.waiters(), (0, 0));
}

#[tokio::test(start_paused = true)]
async fn wait_for_known_agent_connects_it() {
    let test = TestPool::new();
    let agents = vec![
        mk_agent("a", "10.0.0.1", "web", true),
        mk_agent("b", "10.0.0.2", "api", false),
    ];
    test.update(agents.clone());
    assert_eq!(test.keys(), btreeset! {"a.ns".to_string()});

    test.pool
        .wait_for_ip(ip("10.0.0.2"), Duration::from_secs(3))
        .await
        .expect("agent is known");
    assert_eq!(
        test.keys(),
        btreeset! {"a.ns".to_string(), "b.ns".to_string()}
    );
    assert_eq!(test.pool.waiters(), (0, 0));

    // Once idle, nothing holds on to the agent.
    test.connected().await;
    test.update(agents);
    assert_eq!(test.keys(), btreeset! {"a.ns".to_string()});
}

#[tokio::test(start_paused = true)]
async fn wait_for_ip_until_agent_appears() {
    let test = TestPool::new();
    test.update(vec![mk_agent("a", "10.0.0.1", "web", true)]);

    let wait = tokio::spawn({
        let pool = test.pool.clone();
        async move { pool.wait_for_ip(ip("10.0.0.2"), Duration::from_secs(10)).await }
    });
    settle().await;
    assert_eq!(test.pool.waiters(), (1, 0));
    assert!(!wait.is_finished());

    test.update(vec![
        mk_agent("a", "10.0.0.1", "web", true),
        mk_agent("b", "10.0.0.2", "api", false),
    ]);
    wait.await
        .expect("wait must not panic")
        .expect("agent appeared");
    assert_eq!(test.pool.waiters(), (0, 0));
    assert_eq!(
        test.keys(),
        btreeset! {"a.ns".to_string(), "b.ns".to_string()}
    );
    assert_eq!(
        test.pool.get_client(ip("10.0.0.2")).unwrap().key(),
        &key("b")
    );
}

#[tokio::test(start_paused = true)]
async fn concurrent_workload_waits_share_one_waiter() {
    let test = TestPool::new();
    test.update(vec![mk_agent("a", "10.0.0.1", "web", true)]);

    let waits = (0..2)
        .map(|_| {
            let pool = test.pool.clone();
            tokio::spawn(async move {
                pool.wait_for_workload("svc", Duration::from_secs(10))
                    .await
            })
        })
        .collect::<Vec<_>>();
    settle().await;
    assert_eq!(test.pool.waiters(), (0, 1));

    let start = time::Instant::now();
    test.update(vec![
        mk_agent("a", "10.0.0.1", "web", true),
        mk_agent("b", "10.0.0.2", "svc", false),
    ]);
    for wait in waits {
        wait.await
            .expect("wait must not panic")
            .expect("workload appeared");
    }
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(test.pool.waiters(), (0, 0));
    assert_eq!(test.dialer.dials("b"), 1);
}

#[tokio::test(start_paused = true)]
async fn disabling_the_pool_releases_waiters() {
    let test = TestPool::new();
    let wait = tokio::spawn({
        let pool = test.pool.clone();
        async move {
            pool.wait_for_workload("svc", Duration::from_secs(3600))
                .await
        }
    });
    settle().await;
    assert_eq!(test.pool.waiters(), (0, 1));

    let start = time::Instant::now();
    test.update(vec![mk_agent("", "10.0.0.1", "svc", true)]);
    assert!(test.pool.is_disabled());
    wait.await
        .expect("wait must not panic")
        .expect("disabled pool releases waiters");
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(test.pool.waiters(), (0, 0));
}

#[tokio::test(start_paused = true)]
async fn disabled_pool_does_not_wait() {
    let test = TestPool::new();
    test.pool.disable();

    let start = time::Instant::now();
    for n in 1..=4u8 {
        test.pool
            .wait_for_ip(IpAddr::from([10, 0, 0, n]), Duration::from_secs(60))
            .await
            .expect("disabled pool must not block");
    }
    test.pool
        .wait_for_workload("svc", Duration::from_secs(60))
        .await
        .expect("disabled pool must not block");
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(test.pool.waiters(), (0, 0));
}

#[tokio::test(start_paused = true)]
async fn abandoned_calls_do_not_cancel_the_handle() {
    let test = TestPool::new();
    test.dialer.hang("a");
    test.update(vec![mk_agent("a", "10.0.0.1", "web", true)]);
    let handle = test.handle("a");

    let mut tunnel = tokio_test::task::spawn(handle.tunnel());
    tokio_test::assert_pending!(tunnel.poll());
    drop(tunnel);

    let mut wait =
        tokio_test::task::spawn(test.pool.wait_for_workload("svc", Duration::from_secs(10)));
    tokio_test::assert_pending!(wait.poll());
    drop(wait);

    settle().await;
    assert_eq!(test.keys(), btreeset! {"a.ns".to_string()});
    assert!(!handle.is_connected());
    assert_eq!(handle.open_tunnels(), 0);
    assert_eq!(test.agent.tunnels(), 0);
}
