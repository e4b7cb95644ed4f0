//! Two nodes on loopback gossiping state and pulling map fragments.

use std::time::Duration;

use outpost_node::{NodeConfig, NodeHandle, OutpostNode};
use outpost_state::AgentId;

const H01_ADDR: &str = "127.0.0.1:47310";
const H02_ADDR: &str = "127.0.0.1:47320";

fn config(id: &str, listen: &str) -> NodeConfig {
    let peers = format!("H01={H01_ADDR},H02={H02_ADDR}");
    let vars = [
        ("OUTPOST_ID", id),
        ("OUTPOST_LISTEN_ADDR", listen),
        ("OUTPOST_PEERS", peers.as_str()),
        ("OUTPOST_NEIGHBORS", "H01,H02"),
        ("OUTPOST_RATE_HZ", "20"),
        ("OUTPOST_START_DELAY_SECS", "0"),
        ("OUTPOST_REQUEST_TIMEOUT_MS", "500"),
    ];
    NodeConfig::from_lookup(|name| {
        vars.iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.to_string())
    })
    .unwrap()
}

async fn wait_for<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn status_of(handle: &NodeHandle, id: &str) -> Option<String> {
    handle
        .peer(&AgentId::from(id))
        .await
        .map(|record| record.state.status)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn nodes_exchange_state_and_fragments() {
    let h01 = OutpostNode::new(config("H01", H01_ADDR));
    let h02 = OutpostNode::new(config("H02", H02_ADDR));
    let h01_handle = h01.handle();
    let h02_handle = h02.handle();

    h01_handle.set_status("exploring").await;
    h01_handle.add_map_fragment(vec![1, 2, 3]).await;
    h01_handle.add_map_fragment(vec![4, 5]).await;
    h02_handle.set_status("homing").await;

    let h01_task = tokio::spawn(h01.run());
    let h02_task = tokio::spawn(h02.run());

    let (h01_ref, h02_ref) = (&h01_handle, &h02_handle);
    wait_for(|| async move { status_of(h02_ref, "H01").await.as_deref() == Some("exploring") }).await;
    wait_for(|| async move { status_of(h01_ref, "H02").await.as_deref() == Some("homing") }).await;

    let record = h02_handle.peer(&"H01".into()).await.unwrap();
    assert!(record.in_direct_comm);
    assert_eq!(record.relay_id, Some(AgentId::from("H02")));

    // H02 pulls both of H01's fragments over the fragment service.
    wait_for(|| async move {
        h02_ref
            .peer(&"H01".into())
            .await
            .is_some_and(|r| r.fragments.len() == 2 && r.state.missing_fragments().is_empty())
    })
    .await;

    let mut maps = h02_handle.neighbor_maps();
    wait_for(|| {
        let ready = maps.borrow_and_update().fragment_count() == 2;
        async move { ready }
    })
    .await;

    h01_handle.shutdown();
    h02_handle.shutdown();
    tokio::time::timeout(Duration::from_secs(5), h01_task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), h02_task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
