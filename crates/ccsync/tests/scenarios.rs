//! End-to-end delivery scenarios over the in-memory transport.

use std::time::Duration;

use ccsync::core::{replay, ChannelKind, SyncOperation};
use ccsync::sync::{SessionEnd, SyncConfig};
use ccsync::Channel;
use ccsync_testkit::{ProjectFixture, TestClient};

const QUIET: Duration = Duration::from_millis(150);

fn paths(ops: &[SyncOperation]) -> Vec<&str> {
    ops.iter().filter_map(|op| op.file_path()).collect()
}

#[tokio::test]
async fn test_initial_state_with_requirements() {
    let fixture = ProjectFixture::util_main();
    let engine = fixture.lua_engine(false, SyncConfig::default());
    engine.tick().await.unwrap();

    let (mut client, _session) = TestClient::subscribe(&engine, &["main"]);
    let initial = client.receive_initial().await.unwrap();

    assert_eq!(
        initial,
        vec![
            SyncOperation::Content {
                kind: ChannelKind::Library,
                file_path: "a.lua".into(),
                data: "return { answer = 42 }\n".into(),
            },
            SyncOperation::Content {
                kind: ChannelKind::Script,
                file_path: "main.lua".into(),
                data: "local util = require(\"/util\")\nprint(util.answer)\n".into(),
            },
        ]
    );
}

#[tokio::test]
async fn test_edit_pushes_to_every_dependent_subscriber() {
    let fixture = ProjectFixture::util_main()
        .with_file("other.lua", "return 'other'\n")
        .with_channel(Channel::new("other", ChannelKind::Library).file("other.lua"));
    let engine = fixture.engine(SyncConfig::default());
    engine.tick().await.unwrap();

    let (mut main, _s1) = TestClient::subscribe(&engine, &["main"]);
    let (mut util, _s2) = TestClient::subscribe(&engine, &["util"]);
    let (mut other, _s3) = TestClient::subscribe(&engine, &["other"]);
    main.receive_initial().await.unwrap();
    util.receive_initial().await.unwrap();
    other.receive_initial().await.unwrap();

    fixture.write("a.lua", "return { answer = 43 }\n");
    let tick = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.tick().await })
    };

    let pushed = main.receive_push(2).await.unwrap();
    assert_eq!(paths(&pushed), vec!["a.lua", "main.lua"]);
    let pushed = util.receive_push(1).await.unwrap();
    assert_eq!(pushed[0].data(), Some("return { answer = 43 }\n"));

    let report = tick.await.unwrap().unwrap();
    assert_eq!(report.changed, vec!["util", "main"]);
    assert_eq!(report.delivered, 2);
    assert!(other.is_quiet(QUIET).await);
}

#[tokio::test]
async fn test_deleted_directory_file() {
    let fixture = ProjectFixture::directory_library();
    let engine = fixture.engine(SyncConfig::default());
    engine.tick().await.unwrap();

    let (mut client, _session) = TestClient::subscribe(&engine, &["lib"]);
    let initial = client.receive_initial().await.unwrap();
    assert_eq!(paths(&initial), vec!["lib/a.lua", "lib/b.lua"]);

    fixture.remove("lib/b.lua");
    let tick = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.tick().await })
    };

    let pushed = client.receive_push(2).await.unwrap();
    assert_eq!(
        pushed[1],
        SyncOperation::Deletion {
            file_paths: vec!["lib/b.lua".into()]
        }
    );
    assert!(!pushed.iter().any(|op| op.file_path() == Some("lib/b.lua")));
    tick.await.unwrap().unwrap();

    assert_eq!(
        client.files(),
        vec![("lib/a.lua".to_string(), "return 'a'\n".to_string())]
    );
}

#[tokio::test]
async fn test_subscription_order_across_channels() {
    let fixture = ProjectFixture::util_main();
    let engine = fixture.engine(SyncConfig::default());
    engine.tick().await.unwrap();

    let (mut client, _session) = TestClient::subscribe(&engine, &["main", "util"]);
    let initial = client.receive_initial().await.unwrap();
    assert_eq!(paths(&initial), vec!["a.lua", "main.lua", "a.lua"]);

    fixture.write("a.lua", "return 1\n");
    let tick = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.tick().await })
    };

    // Changed channels arrive in the connection's own subscription order.
    let pushed = client.receive_push(3).await.unwrap();
    assert_eq!(paths(&pushed), vec!["a.lua", "main.lua", "a.lua"]);
    tick.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_stalled_subscriber_does_not_block_others() {
    let fixture = ProjectFixture::util_main();
    let config = SyncConfig {
        ack_timeout: Some(Duration::from_millis(200)),
        ..SyncConfig::default()
    };
    let engine = fixture.engine(config);
    engine.tick().await.unwrap();

    let (mut fast, _fast_session) = TestClient::subscribe(&engine, &["main"]);
    let (mut slow, slow_session) = TestClient::subscribe(&engine, &["main"]);
    fast.receive_initial().await.unwrap();
    slow.receive_initial().await.unwrap();

    fixture.write("a.lua", "return 'edited'\n");
    let tick = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.tick().await })
    };

    // The slow client never acks the second operation.
    assert_eq!(fast.receive_push(2).await.unwrap().len(), 2);

    let report = tick.await.unwrap().unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(report.dropped, 1);

    let slow_report = slow_session.await.unwrap().unwrap();
    assert!(matches!(slow_report.end, SessionEnd::SlowConsumer(_)));
    assert_eq!(slow_report.pushed, 1);
    assert!(slow.is_closed());
    assert_eq!(engine.registry().len(), 1);
}

#[tokio::test]
async fn test_stalled_subscriber_does_not_delay_later_rounds() {
    let fixture = ProjectFixture::util_main();
    let config = SyncConfig {
        ack_timeout: Some(Duration::from_secs(5)),
        ..SyncConfig::default()
    };
    let engine = fixture.engine(config);
    engine.tick().await.unwrap();

    let (mut fast, _fast_session) = TestClient::subscribe(&engine, &["util"]);
    let (mut slow, _slow_session) = TestClient::subscribe(&engine, &["util"]);
    fast.receive_initial().await.unwrap();
    slow.receive_initial().await.unwrap();

    // The slow client only ever sent push:0, so it stalls from round 2 on.
    for round in 1..=3 {
        let text = format!("return {round}\n");
        fixture.write("a.lua", &text);
        let _round = engine.broadcast(engine.scan().await.unwrap());

        let pushed = tokio::time::timeout(Duration::from_secs(1), fast.receive_push(1))
            .await
            .expect("round reached the fast client while the slow one stalls")
            .unwrap();
        assert_eq!(pushed[0].data(), Some(text.as_str()));
    }
    assert_eq!(engine.registry().len(), 2);
}

#[tokio::test]
async fn test_round_larger_than_backlog_cap_is_delivered() {
    let mut fixture = ProjectFixture::new();
    for i in 0..5 {
        fixture = fixture.with_file(&format!("lib/{i}.lua"), "return 0\n");
    }
    let fixture = fixture.with_channel(Channel::new("lib", ChannelKind::Library).directory("lib"));
    let config = SyncConfig {
        max_backlog: 4,
        ..SyncConfig::default()
    };
    let engine = fixture.engine(config);
    engine.tick().await.unwrap();

    let (mut client, session) = TestClient::subscribe(&engine, &["lib"]);
    assert_eq!(client.receive_initial().await.unwrap().len(), 5);

    for i in 0..5 {
        fixture.write(&format!("lib/{i}.lua"), "return 1\n");
    }
    let tick = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.tick().await })
    };
    assert_eq!(client.receive_push(5).await.unwrap().len(), 5);

    let report = tick.await.unwrap().unwrap();
    assert_eq!(report.evicted, 0);
    assert_eq!(report.delivered, 1);

    client.disconnect();
    let report = session.await.unwrap().unwrap();
    assert_eq!(report.end, SessionEnd::Disconnected);
}

#[tokio::test]
async fn test_late_subscriber_skips_covered_round() {
    let fixture = ProjectFixture::util_main();
    let engine = fixture.engine(SyncConfig::default());
    engine.tick().await.unwrap();

    fixture.write("a.lua", "return 'new'\n");
    let scan = engine.scan().await.unwrap();
    assert_eq!(scan.changed_names(), vec!["util", "main"]);

    // Joins after the scan but before its broadcast.
    let (mut client, _session) = TestClient::subscribe(&engine, &["util"]);
    let initial = client.receive_initial().await.unwrap();
    assert_eq!(initial[0].data(), Some("return 'new'\n"));

    let report = engine.broadcast(scan).finished().await.unwrap();
    assert_eq!(report.skipped, 1);
    assert!(client.is_quiet(QUIET).await);
}

#[tokio::test]
async fn test_identical_subscribers_see_identical_streams() {
    let fixture = ProjectFixture::directory_library()
        .with_file("lib/nested/c.lua", "return 'c'\n")
        .with_file("run.lua", "print('run')\n")
        .with_channel(
            Channel::new("run", ChannelKind::Script)
                .file("run.lua")
                .requires("lib"),
        );
    let engine = fixture.engine(SyncConfig::default());

    let (mut first, _s1) = TestClient::subscribe(&engine, &["run"]);
    let (mut second, _s2) = TestClient::subscribe(&engine, &["run"]);
    let a = first.receive_initial().await.unwrap();
    let b = second.receive_initial().await.unwrap();

    assert_eq!(a, b);
    assert_eq!(
        paths(&a),
        vec!["lib/a.lua", "lib/b.lua", "lib/nested/c.lua", "run.lua"]
    );
}

#[tokio::test]
async fn test_large_file_is_chunked_in_order() {
    let big: String = (0..120_000).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
    let fixture = ProjectFixture::new()
        .with_file("big.lua", &big)
        .with_channel(Channel::new("big", ChannelKind::Library).file("big.lua"));
    let engine = fixture.engine(SyncConfig::default());

    let (mut client, _session) = TestClient::subscribe(&engine, &["big"]);
    let initial = client.receive_initial().await.unwrap();

    assert_eq!(initial.len(), 3);
    assert!(initial[0].is_content());
    assert!(initial[1].is_chunk() && initial[2].is_chunk());
    assert_eq!(replay(&initial), vec![("big.lua".to_string(), big)]);
}

#[tokio::test]
async fn test_unknown_channels_are_ignored() {
    let fixture = ProjectFixture::util_main();
    let engine = fixture.engine(SyncConfig::default());

    let (mut client, session) = TestClient::subscribe(&engine, &["nope", "util", "util"]);
    let initial = client.receive_initial().await.unwrap();
    assert_eq!(paths(&initial), vec!["a.lua"]);

    client.disconnect();
    let report = session.await.unwrap().unwrap();
    assert_eq!(report.channels, vec!["util"]);
    assert_eq!(report.end, SessionEnd::Disconnected);
}
