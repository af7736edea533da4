//! Black-box end-to-end scenario tests, driven entirely through the
//! crate's public API. These mirror the literal worked examples in the
//! protocol engine's design notes rather than reaching into any internal
//! module.

use driftnet::client::sasl::Plain;
use driftnet::{Action, Event, Message, Session};
use std::time::{Duration, Instant, SystemTime};

/// Routes this crate's `tracing` diagnostics through the test harness's
/// captured output, matching the teacher's own habit of wiring a
/// `tracing-subscriber` formatter wherever it runs a client
/// (`examples/hello_libera_tokio.rs` and friends). Idempotent: later calls
/// in the same process are no-ops.
fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn recv(session: &mut Session, line: &str, wall: SystemTime, now: Instant) -> (Vec<Event>, Vec<Message>) {
    session.handle_line(line, wall, now)
}

fn lines(messages: &[Message]) -> Vec<String> {
    messages.iter().map(Message::serialize).collect()
}

#[test]
fn registration_without_sasl() {
    init_tracing();
    let now = Instant::now();
    let wall = SystemTime::now();
    let (mut session, outbound, _rx) = Session::new("alice", "alice", "alice", None, now);
    assert_eq!(
        lines(&outbound),
        vec!["CAP LS 302".to_string(), "NICK alice".to_string(), "USER alice 0 * :alice".to_string()]
    );

    let (_events, outbound) = recv(&mut session, "CAP * LS :batch message-tags server-time", wall, now);
    assert_eq!(
        lines(&outbound),
        vec![
            "CAP REQ batch".to_string(),
            "CAP REQ message-tags".to_string(),
            "CAP REQ server-time".to_string(),
            "CAP END".to_string(),
        ]
    );

    let (events, _outbound) = recv(&mut session, "001 alice :welcome", wall, now);
    assert!(matches!(events.as_slice(), [Event::Registered]));
    assert!(session.is_registered());
}

#[test]
fn sasl_plain_handshake() {
    let now = Instant::now();
    let wall = SystemTime::now();
    let (mut session, _outbound, _rx) =
        Session::new("u", "u", "u", Some(Box::new(Plain::new("u", "p"))), now);

    recv(&mut session, "CAP * LS :sasl", wall, now);
    let (_events, outbound) = recv(&mut session, "CAP * ACK :sasl", wall, now);
    assert_eq!(lines(&outbound), vec!["AUTHENTICATE PLAIN".to_string()]);

    let (_events, outbound) = recv(&mut session, "AUTHENTICATE +", wall, now);
    assert_eq!(lines(&outbound), vec!["AUTHENTICATE dQB1AHA=".to_string()]);

    let (_events, outbound) = recv(&mut session, "900 u u!u@h u :logged in", wall, now);
    assert_eq!(lines(&outbound), vec!["CAP END".to_string()]);

    let (events, _outbound) = recv(&mut session, "001 u :welcome", wall, now);
    assert!(matches!(events.as_slice(), [Event::Registered]));
}

fn registered_session(now: Instant, wall: SystemTime) -> (Session, tokio::sync::mpsc::UnboundedReceiver<(String, String)>) {
    let (mut session, _outbound, rx) = Session::new("alice", "alice", "alice", None, now);
    recv(&mut session, "001 alice :welcome", wall, now);
    (session, rx)
}

#[test]
fn joining_a_channel() {
    let now = Instant::now();
    let wall = SystemTime::now();
    let (mut session, _rx) = registered_session(now, wall);

    let outbound = session.handle_action(Action::Join { channel: "#x".to_string(), key: None }, now);
    assert_eq!(lines(&outbound), vec!["JOIN #x".to_string()]);

    recv(&mut session, ":alice!a@h JOIN #x", wall, now);
    recv(&mut session, "353 alice = #x :@bob +carol alice", wall, now);
    let (events, _outbound) = recv(&mut session, "366 alice #x :End of /NAMES list", wall, now);

    assert_eq!(events.len(), 1);
    match &events[0] {
        Event::SelfJoin { channel, requested, .. } => {
            assert_eq!(channel, "#x");
            assert!(*requested);
        }
        other => panic!("expected SelfJoin, got {other:?}"),
    }

    let chan = session.world().channel_by_display("#x").expect("channel should exist");
    assert_eq!(chan.members.len(), 3);
}

#[test]
fn message_chunking_respects_line_length_budget() {
    let now = Instant::now();
    let wall = SystemTime::now();
    let (mut session, _rx) = registered_session(now, wall);
    recv(&mut session, "005 alice LINELEN=100 :are supported by this server", wall, now);

    let content = "x".repeat(200);
    let outbound = session.handle_action(Action::PrivMsg { target: "#x".to_string(), content }, now);

    assert_eq!(outbound.len(), 4);
    let sizes: Vec<usize> = outbound.iter().map(|m| m.params.last().unwrap().len()).collect();
    assert_eq!(sizes, vec![57, 57, 57, 29]);
    for message in &outbound {
        assert_eq!(message.command, "PRIVMSG");
    }
}

#[test]
fn message_chunking_never_splits_a_utf8_code_point() {
    let now = Instant::now();
    let wall = SystemTime::now();
    let (mut session, _rx) = registered_session(now, wall);
    recv(&mut session, "005 alice LINELEN=100 :are supported by this server", wall, now);

    // Each "snowman" is a 3-byte code point; a naive byte-offset cut would
    // slice one in half at several of the chunk boundaries this budget
    // produces.
    let content = "\u{2603}".repeat(80);
    let outbound = session.handle_action(Action::PrivMsg { target: "#x".to_string(), content: content.clone() }, now);

    assert!(outbound.len() > 1, "content should require multiple chunks");
    let mut reassembled = String::new();
    for message in &outbound {
        let chunk = message.params.last().unwrap();
        assert!(std::str::from_utf8(chunk.as_bytes()).is_ok(), "chunk must be valid UTF-8 on its own");
        reassembled.push_str(chunk);
    }
    assert_eq!(reassembled, content);
}

#[test]
fn chathistory_concurrency_guard() {
    let now = Instant::now();
    let wall = SystemTime::now();
    let (mut session, _rx) = registered_session(now, wall);
    recv(&mut session, "CAP * ACK :draft/chathistory", wall, now);

    let first = session.request_history_before("#x", wall, 50);
    assert!(first.is_some());
    let second = session.request_history_before("#x", wall, 50);
    assert!(second.is_none(), "a second request while one is in flight must be a silent no-op");

    recv(&mut session, "BATCH +abc chathistory #x", wall, now);
    let (events, _outbound) = recv(&mut session, "BATCH -abc", wall, now);
    assert!(matches!(events.as_slice(), [Event::History { .. }]));

    let third = session.request_history_before("#x", wall, 50);
    assert!(third.is_some(), "the guard must release once its batch closes");
}

#[test]
fn typing_debounce_window() {
    let t0 = Instant::now();
    let wall = SystemTime::now();
    let (mut session, _rx) = registered_session(t0, wall);
    recv(&mut session, "CAP * ACK :message-tags", wall, t0);

    assert!(session.typing("#x", t0).is_some());
    assert!(session.typing("#x", t0 + Duration::from_secs(1)).is_none());
    assert!(session.typing("#x", t0 + Duration::from_secs(2)).is_none());
    assert!(session.typing("#x", t0 + Duration::from_secs(4)).is_some());
}

#[tokio::test(start_paused = true)]
async fn inbound_typing_stop_notification_fires_around_six_seconds() {
    let t0 = Instant::now();
    let wall = SystemTime::now();
    let (mut session, mut typing_stops) = registered_session(t0, wall);
    recv(&mut session, ":bob!b@h JOIN #x", wall, t0);
    recv(&mut session, "@+typing=active :bob!b@h TAGMSG #x", wall, Instant::now());

    assert_eq!(session.typings("#x"), vec!["bob".to_string()]);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(typing_stops.try_recv().is_err(), "typing-stop must not fire before 6s");

    tokio::time::sleep(Duration::from_secs(2)).await;
    let (target, sender) = typing_stops.recv().await.expect("timeout notification");
    assert_eq!(target, "#x");
    assert_eq!(sender, "bob");
}

#[test]
fn malformed_inbound_line_does_not_close_the_session() {
    let now = Instant::now();
    let wall = SystemTime::now();
    let (mut session, _rx) = registered_session(now, wall);

    let (events, outbound) = recv(&mut session, "", wall, now);
    assert!(matches!(events.as_slice(), [Event::Malformed(_)]));
    assert!(outbound.is_empty());
    assert!(!session.is_closed());
}

#[test]
fn privmsg_without_a_prefix_is_reported_not_dropped() {
    let now = Instant::now();
    let wall = SystemTime::now();
    let (mut session, _rx) = registered_session(now, wall);

    let (events, outbound) = recv(&mut session, "PRIVMSG #x :hi", wall, now);
    assert!(outbound.is_empty());
    match events.as_slice() {
        [Event::ProtocolViolation(violation)] => assert!(violation.reason.contains("PRIVMSG")),
        other => panic!("expected ProtocolViolation, got {other:?}"),
    }
    assert!(!session.is_closed());
}

#[test]
fn fatal_error_command_closes_the_session() {
    let now = Instant::now();
    let wall = SystemTime::now();
    let (mut session, _rx) = registered_session(now, wall);

    let (events, _outbound) = recv(&mut session, "ERROR :Closing link", wall, now);
    assert!(matches!(events.as_slice(), [Event::Error { .. }]));
    assert!(session.is_closed());
}

#[test]
fn user_is_garbage_collected_after_quit() {
    let now = Instant::now();
    let wall = SystemTime::now();
    let (mut session, _rx) = registered_session(now, wall);

    recv(&mut session, ":alice!a@h JOIN #x", wall, now);
    recv(&mut session, ":bob!b@h JOIN #x", wall, now);
    recv(&mut session, "353 alice = #x :@alice bob", wall, now);
    recv(&mut session, "366 alice #x :End of /NAMES list", wall, now);

    let (events, _outbound) = recv(&mut session, ":bob!b@h QUIT :gone", wall, now);
    match events.as_slice() {
        [Event::UserQuit { user, channels }] => {
            assert_eq!(user, "bob");
            assert_eq!(channels, &["#x".to_string()]);
        }
        other => panic!("expected UserQuit, got {other:?}"),
    }

    let chan = session.world().channel_by_display("#x").unwrap();
    assert_eq!(chan.members.len(), 1, "bob's membership should be gone, alice remains");
}
