//! Two bank replicas over loopback converge on the same balances.
//!
//! Run: `cargo test -p groupcast-bank --test replicas -- --nocapture`

use {
    groupcast_bank::{input::run_input, processor::Processor},
    groupcast_multicast::{GroupConfig, Node, TotalOrderMulticast},
    std::{sync::Arc, time::Duration},
    tokio::{net::TcpListener, time::timeout},
};

struct Replica {
    group: Arc<TotalOrderMulticast>,
    processor: Arc<Processor>,
}

async fn spawn_replicas(ids: &[&str]) -> Vec<Replica> {
    let mut listeners = Vec::new();
    let mut members = Vec::new();
    for id in ids {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        members.push(Node::new(*id, listener.local_addr().unwrap()));
        listeners.push(listener);
    }

    let mut replicas = Vec::new();
    for (id, listener) in ids.iter().zip(listeners) {
        let addr = listener.local_addr().unwrap();
        let group = TotalOrderMulticast::new(GroupConfig::dev_default(*id, addr, members.clone()));
        let processor = Processor::new();
        processor.register(group.dispatcher());
        group.start_with_listener(listener).unwrap();
        replicas.push(Replica { group, processor });
    }
    for replica in &replicas {
        timeout(Duration::from_secs(10), replica.group.wait_for_mesh())
            .await
            .expect("mesh did not form")
            .unwrap();
    }
    replicas
}

async fn wait_for_balances(replicas: &[Replica], expected: &str) {
    timeout(Duration::from_secs(10), async {
        while replicas
            .iter()
            .any(|r| r.processor.snapshot_line() != expected)
        {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        let seen: Vec<String> = replicas.iter().map(|r| r.processor.snapshot_line()).collect();
        panic!("replicas did not reach [{expected}], saw {seen:?}")
    });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_replicas_converge() {
    let replicas = spawn_replicas(&["node1", "node2"]).await;

    let sent = run_input(
        &b"DEPOSIT A 100\n\nDEPOSIT A 50\n"[..],
        replicas[0].group.clone(),
    )
    .await
    .unwrap();
    assert_eq!(sent, 2);
    wait_for_balances(&replicas, "BALANCES A:150").await;

    // The overdraft is delivered everywhere and rejected everywhere.
    let sent = run_input(
        &b"TRANSFER A TO B 30\nTRANSFER A TO B 1000\nWITHDRAW A 5\n"[..],
        replicas[1].group.clone(),
    )
    .await
    .unwrap();
    assert_eq!(sent, 2);
    wait_for_balances(&replicas, "BALANCES A:120 B:30").await;

    for replica in &replicas {
        replica.group.shutdown();
    }
}
