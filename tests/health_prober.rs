//! Health prober scenarios against real local sockets

use proxy_scout::proxy::{
    Descriptor, HealthProber, HealthStatus, ProberConfig, Protocol,
};
use proxy_scout::signal::StopSignal;
use std::time::Duration;
use tokio::net::TcpListener;

fn prober(batch_size: usize) -> HealthProber {
    let config = ProberConfig::new()
        .with_timeout(Duration::from_secs(2))
        .with_concurrent_limit(5)
        .with_batch_size(batch_size);
    HealthProber::new(config, StopSignal::new()).unwrap()
}

#[tokio::test]
async fn mixed_descriptor_scenario_across_batches() {
    // 6 reachable local listeners, 2 closed ports, 2 undecodable strings.
    let mut listeners = Vec::new();
    let mut descriptors = Vec::new();

    for i in 0..6 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        descriptors.push(Descriptor::new(
            format!("vless://uuid-{i}@127.0.0.1:{port}?type=tcp"),
            Protocol::Vless,
        ));
        listeners.push(listener);
    }

    for i in 0..2 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        descriptors.push(Descriptor::new(
            format!("trojan://pw-{i}@127.0.0.1:{port}"),
            Protocol::Trojan,
        ));
    }

    descriptors.push(Descriptor::new("vmess://$$$not-base64$$$", Protocol::Vmess));
    descriptors.push(Descriptor::new(
        "vless://no-credential-part:443",
        Protocol::Vless,
    ));

    // Batch size of 3 forces four batches over the ten descriptors.
    let verdicts = prober(3).check_many(&descriptors).await;
    assert_eq!(verdicts.len(), 10, "one verdict per descriptor");

    let count = |status: HealthStatus| verdicts.iter().filter(|v| v.status == status).count();
    assert_eq!(count(HealthStatus::Healthy), 6);
    assert_eq!(count(HealthStatus::Unreachable), 2);
    assert_eq!(count(HealthStatus::Invalid), 2);

    for verdict in &verdicts {
        match verdict.status {
            HealthStatus::Healthy => {
                assert_eq!(verdict.quality_score, 100, "loopback connects are fast");
                assert!(verdict.latency_ms.is_some());
            }
            HealthStatus::Unreachable | HealthStatus::Timeout => {
                assert_eq!(verdict.quality_score, 10);
                assert!(verdict.latency_ms.is_none());
            }
            HealthStatus::Invalid => {
                assert_eq!(verdict.quality_score, 0);
                assert!(verdict.latency_ms.is_none());
            }
        }
    }
}

#[tokio::test]
async fn every_descriptor_gets_exactly_one_verdict_with_duplicated_targets() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    // Several descriptors pointing at the same endpoint are still probed
    // individually; deduplication is the extractor's concern, not ours.
    let descriptors: Vec<_> = (0..5)
        .map(|i| {
            Descriptor::new(
                format!("trojan://pw-{i}@127.0.0.1:{port}"),
                Protocol::Trojan,
            )
        })
        .collect();

    let verdicts = prober(2).check_many(&descriptors).await;
    assert_eq!(verdicts.len(), 5);
    assert!(verdicts.iter().all(|v| v.is_healthy()));
}

#[tokio::test]
async fn preset_stop_yields_no_verdicts() {
    let stop = StopSignal::new();
    stop.request_stop();
    let prober = HealthProber::new(ProberConfig::default(), stop).unwrap();

    let descriptors = vec![Descriptor::new(
        "trojan://pw@127.0.0.1:1",
        Protocol::Trojan,
    )];
    let verdicts = prober.check_many(&descriptors).await;
    assert!(verdicts.is_empty());
}
