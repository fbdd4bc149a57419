//! A two-peer tally counter driving `runtime-core` over `transport-inprocess`
//! end to end: a host and a client join the same room, the client submits
//! increments, and both sides poll their transport and tick their runtime
//! until the counts agree.

use protocol::RuntimeConfig;
use runtime_core::{ActionDef, GameDefinition, Runtime};
use serde_json::json;
use std::time::{SystemTime, UNIX_EPOCH};
use transport_inprocess::InProcessTransport;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as u64
}

fn tally_game() -> GameDefinition {
    GameDefinition::new()
        .with_setup(|_ctx| json!({"count": 0}))
        .with_action(
            "increment",
            ActionDef::new(|state, ctx, _input| {
                let current = state["count"].as_i64().unwrap_or(0);
                state["count"] = json!(current + 1);
                ctx.emit("tallied", json!({"by": ctx.player_id}));
            }),
        )
}

fn main() {
    tracing_subscriber::fmt::init();

    let room_id = "tally-demo-room";
    let host_transport = InProcessTransport::join(room_id, "host", true)
        .expect("host can always create a fresh room");
    let client_transport = InProcessTransport::join(room_id, "client", false)
        .expect("client can join the room the host just created");

    let start = now_ms();
    let mut host = Runtime::new(
        tally_game(),
        Box::new(host_transport),
        RuntimeConfig {
            is_host: true,
            player_ids: Some(vec!["host".into(), "client".into()]),
            seed: Some(42),
            sync_rate_ms: 50,
        },
        start,
    )
    .expect("setup never uses the reserved lobby key here");

    let mut client = Runtime::new(
        tally_game(),
        Box::new(client_transport),
        RuntimeConfig {
            is_host: false,
            player_ids: None,
            seed: None,
            sync_rate_ms: 50,
        },
        start,
    )
    .expect("setup never uses the reserved lobby key here");

    client.on_change(Box::new(|state| {
        tracing::info!(count = ?state["count"], "client observed a state change");
    }));

    for round in 0..5 {
        client
            .submit_action("increment", json!({}), None)
            .expect("in-process transport never fails a broadcast send");

        // Each tick polls its own transport for whatever landed in its
        // inbox since the last round, then applies it.
        let now = now_ms();
        host.tick(now);
        client.tick(now);

        tracing::info!(round, host_count = ?host.get_state()["count"]);
    }

    assert_eq!(host.get_state()["count"], client.get_state()["count"]);
    host.destroy();
    client.destroy();
}
