//! Two discovery services talking over loopback.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use lanshare_core::discovery::DiscoveryService;

#[tokio::test]
async fn test_peers_find_each_other() {
    let alpha = Arc::new(
        DiscoveryService::bind(common::loopback_discovery("alpha", 6101))
            .await
            .unwrap(),
    );
    let beta = Arc::new(
        DiscoveryService::bind(common::loopback_discovery("beta", 6102))
            .await
            .unwrap(),
    );

    let shutdown = CancellationToken::new();
    for service in [&alpha, &beta] {
        let service = Arc::clone(service);
        let token = shutdown.clone();
        tokio::spawn(async move { service.listen(token).await });
    }

    beta.request_from(common::loopback_addr(&alpha)).await.unwrap();

    assert!(
        common::wait_until(Duration::from_secs(5), || !beta.peers().is_empty()).await,
        "beta should learn about alpha"
    );
    let found = beta.peers().find_by_name("alpha").expect("alpha is known");
    assert_eq!(found.id, "127.0.0.1:6101");
    assert_eq!(found.port, 6101);

    // Answering a request does not add the asker.
    assert!(alpha.peers().is_empty());

    alpha.request_from(common::loopback_addr(&beta)).await.unwrap();
    assert!(
        common::wait_until(Duration::from_secs(5), || !alpha.peers().is_empty()).await,
        "alpha should learn about beta"
    );
    assert_eq!(alpha.peers().snapshot()[0].name, "beta");

    shutdown.cancel();
}

#[tokio::test]
async fn test_repeated_requests_keep_one_entry() {
    let alpha = Arc::new(
        DiscoveryService::bind(common::loopback_discovery("alpha", 6201))
            .await
            .unwrap(),
    );
    let beta = Arc::new(
        DiscoveryService::bind(common::loopback_discovery("beta", 6202))
            .await
            .unwrap(),
    );

    let shutdown = CancellationToken::new();
    for service in [&alpha, &beta] {
        let service = Arc::clone(service);
        let token = shutdown.clone();
        tokio::spawn(async move { service.listen(token).await });
    }

    let target = common::loopback_addr(&alpha);
    for _ in 0..3 {
        beta.request_from(target).await.unwrap();
    }

    assert!(common::wait_until(Duration::from_secs(5), || !beta.peers().is_empty()).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(beta.peers().len(), 1);

    beta.clear_peers();
    assert!(beta.peers().is_empty());

    shutdown.cancel();
}
