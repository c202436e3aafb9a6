//! Bridge socket tests over loopback TCP.
//!
//! Every response is one JSON line followed by `END_RESPONSE`, and one
//! connection can carry several commands.

use tether::command::HELP_TEXT;
use tether::events::EventKind;

use super::test_helpers::{start_server, wait_until, LineClient};

#[tokio::test]
async fn several_commands_on_one_connection() {
    let (server, _log) = start_server().await;
    let mut bridge = LineClient::connect(server.bridge_addr().unwrap()).await;

    let listing = bridge.command("show_ips").await;
    assert_eq!(listing["ok"], true);
    assert_eq!(listing["data"]["count"], 0);

    let help = bridge.command("help").await;
    assert_eq!(help["data"]["info"], HELP_TEXT);

    let unknown = bridge.command("launch_missiles").await;
    assert_eq!(unknown["ok"], false);
    assert_eq!(unknown["error"], "unrecognized command: launch_missiles");

    server.context().shutdown.cancel();
    server.wait().await;
}

#[tokio::test]
async fn show_ips_sees_tcp_agent() {
    let (server, _log) = start_server().await;
    let mut agent = LineClient::connect(server.agent_addr().unwrap()).await;
    agent.send("PING").await;
    assert_eq!(agent.expect_line().await, "PONG");

    let mut bridge = LineClient::connect(server.bridge_addr().unwrap()).await;
    let listing = bridge.command("show_ips").await;
    assert_eq!(listing["data"]["count"], 1);
    assert_eq!(listing["data"]["clients"][0], "127.0.0.1");

    let single = bridge.command("message_single 127.0.0.1 just you").await;
    assert_eq!(single["data"]["sent_to"], "127.0.0.1");
    assert_eq!(single["data"]["status"], "success");
    assert_eq!(agent.expect_line().await, "MSG:just you");

    server.context().shutdown.cancel();
    server.wait().await;
}

#[tokio::test]
async fn kill_switch_over_bridge_empties_registry() {
    let (server, _log) = start_server().await;
    let mut agent = LineClient::connect(server.agent_addr().unwrap()).await;
    agent.send("PING").await;
    assert_eq!(agent.expect_line().await, "PONG");

    let mut bridge = LineClient::connect(server.bridge_addr().unwrap()).await;
    let killed = bridge.command("kill_switch").await;
    assert_eq!(killed["data"]["disconnected_clients"], 1);

    assert_eq!(agent.expect_line().await, "KILL_SWITCH");
    assert_eq!(agent.next_line().await, None);

    let listing = bridge.command("show_ips").await;
    assert_eq!(listing["data"]["count"], 0);

    server.context().shutdown.cancel();
    server.wait().await;
}

#[tokio::test]
async fn bridge_connection_events_are_recorded() {
    let (server, log) = start_server().await;
    let mut bridge = LineClient::connect(server.bridge_addr().unwrap()).await;
    bridge.command("help").await;
    drop(bridge);

    wait_until(|| {
        let log = std::sync::Arc::clone(&log);
        async move { !log.of_kind(EventKind::BridgeDisconnected).is_empty() }
    })
    .await;
    assert_eq!(log.of_kind(EventKind::BridgeConnected).len(), 1);
    let commands = log.of_kind(EventKind::Command);
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].detail.as_deref(), Some("help"));

    server.context().shutdown.cancel();
    server.wait().await;
}

#[tokio::test]
async fn blank_line_still_gets_a_terminated_response() {
    let (server, _log) = start_server().await;
    let mut bridge = LineClient::connect(server.bridge_addr().unwrap()).await;

    let blank = bridge.command("").await;
    assert_eq!(blank["ok"], false);
    assert_eq!(blank["error"], "unrecognized command: ");

    let spaces = bridge.command("   ").await;
    assert_eq!(spaces["ok"], false);

    // The connection stays usable afterwards.
    let listing = bridge.command("show_ips").await;
    assert_eq!(listing["ok"], true);

    server.context().shutdown.cancel();
    server.wait().await;
}
