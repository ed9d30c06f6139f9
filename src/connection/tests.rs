use super::{Connection, MemoryConnection, Statistics};
use crate::config::Settings;
use crate::subscription::Subscription;
use crate::utils::Error;
use std::sync::{Arc, Barrier, mpsc};
use std::thread;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

/// Pops everything already queued and returns how many messages there were.
fn drain(sub: &Subscription) -> usize {
    let mut n = 0;
    while sub.next_message(Some(Duration::ZERO)).is_ok() {
        n += 1;
    }
    n
}

#[test]
fn test_connection_new() {
    let conn = MemoryConnection::new();
    assert!(conn.id().starts_with("client-"));
    assert!(!conn.is_closed());
    assert_eq!(conn.statistics(), Statistics::default());
}

#[test]
fn test_sids_are_unique_and_increasing() {
    let conn = MemoryConnection::new();
    let a = conn.next_sid();
    let b = conn.next_sid();
    assert!(b > a);
    assert!(a >= 1);
}

#[test]
fn test_publish_reaches_pull_subscription() {
    let conn = MemoryConnection::new();
    let sub = conn.subscribe("test_topic").unwrap();

    conn.publish("test_topic", "hello").unwrap();

    let msg = sub.next_message(Some(WAIT)).unwrap();
    assert_eq!(msg.subject, "test_topic");
    assert_eq!(msg.sid, sub.sid());
    assert_eq!(&msg.payload[..], b"hello");
    assert!(msg.reply_to.is_none());
}

#[test]
fn test_publish_with_reply() {
    let conn = MemoryConnection::new();
    let sub = conn.subscribe("service.echo").unwrap();

    conn.publish_with_reply("service.echo", "_INBOX.42", "ping").unwrap();

    let msg = sub.next_message(Some(WAIT)).unwrap();
    assert_eq!(msg.reply_to.as_deref(), Some("_INBOX.42"));
}

#[test]
fn test_publish_to_nonexistent_subject_is_dropped() {
    let conn = MemoryConnection::new();
    conn.publish("nobody.listens", "hello").unwrap();

    let stats = conn.statistics();
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.routed, 0);
}

#[test]
fn test_wildcard_subscriptions() {
    let conn = MemoryConnection::new();
    let star = conn.subscribe("orders.*").unwrap();
    let tail = conn.subscribe("orders.>").unwrap();

    conn.publish("orders.created", "1").unwrap();
    conn.publish("orders.created.eu", "2").unwrap();

    assert_eq!(&star.next_message(Some(WAIT)).unwrap().payload[..], b"1");
    assert!(matches!(star.next_message(Some(Duration::ZERO)), Err(Error::Timeout)));
    assert_eq!(&tail.next_message(Some(WAIT)).unwrap().payload[..], b"1");
    assert_eq!(&tail.next_message(Some(WAIT)).unwrap().payload[..], b"2");
}

#[test]
fn test_queue_group_delivers_to_one_member() {
    let conn = MemoryConnection::new();
    let first = conn.subscribe_queue("jobs", "workers").unwrap();
    let second = conn.subscribe_queue("jobs", "workers").unwrap();
    let watcher = conn.subscribe("jobs").unwrap();

    for _ in 0..4 {
        conn.publish("jobs", "work").unwrap();
    }

    assert_eq!(drain(&first), 2);
    assert_eq!(drain(&second), 2);
    assert_eq!(drain(&watcher), 4);
    assert_eq!(conn.statistics().routed, 8);
}

#[test]
fn test_pull_unsubscribe_invalidates() {
    let conn = MemoryConnection::new();
    let sub = conn.subscribe("test_topic").unwrap();

    sub.unsubscribe().unwrap();

    assert!(!sub.is_active());
    assert!(matches!(sub.next_message(Some(Duration::ZERO)), Err(Error::Inactive)));
    assert!(matches!(sub.unsubscribe(), Err(Error::Inactive)));
    conn.publish("test_topic", "late").unwrap();
    assert_eq!(conn.statistics().dropped, 1);
    assert_eq!(conn.statistics().unsubscribes, 1);
}

#[test]
fn test_pull_unsubscribe_after_limits_delivery() {
    let conn = MemoryConnection::new();
    let sub = conn.subscribe("test_topic").unwrap();

    sub.unsubscribe_after(2).unwrap();
    for _ in 0..5 {
        conn.publish("test_topic", "m").unwrap();
    }

    assert!(sub.next_message(Some(WAIT)).is_ok());
    assert!(sub.is_active());
    assert!(sub.next_message(Some(WAIT)).is_ok());
    assert!(!sub.is_active());
    assert!(matches!(sub.next_message(Some(WAIT)), Err(Error::Inactive)));

    // the connection stopped routing after the limit
    let stats = conn.statistics();
    assert_eq!(stats.routed, 2);
    assert_eq!(stats.dropped, 3);
}

#[test]
fn test_pull_unsubscribe_after_already_reached() {
    let conn = MemoryConnection::new();
    let sub = conn.subscribe("test_topic").unwrap();
    conn.publish("test_topic", "m").unwrap();
    sub.next_message(Some(WAIT)).unwrap();

    sub.unsubscribe_after(1).unwrap();
    assert!(!sub.is_active());
}

#[test]
fn test_blocked_pull_woken_by_unsubscribe() {
    let conn = MemoryConnection::new();
    let sub = conn.subscribe("test_topic").unwrap();

    let waiter = {
        let sub = sub.clone();
        thread::spawn(move || sub.next_message(None))
    };
    thread::sleep(Duration::from_millis(20));
    sub.unsubscribe().unwrap();

    assert!(matches!(waiter.join().unwrap(), Err(Error::Inactive)));
}

#[test]
fn test_dispatcher_and_pull_share_subject() {
    let conn = MemoryConnection::new();
    let (tx, rx) = mpsc::channel();
    let dispatcher = conn
        .create_dispatcher(move |msg| {
            tx.send(msg)?;
            Ok(())
        })
        .unwrap();
    dispatcher.subscribe("test_topic").unwrap();
    let sub = conn.subscribe("test_topic").unwrap();

    conn.publish("test_topic", "both").unwrap();

    assert_eq!(&rx.recv_timeout(WAIT).unwrap().payload[..], b"both");
    assert_eq!(&sub.next_message(Some(WAIT)).unwrap().payload[..], b"both");
    conn.close();
}

#[test]
fn test_dispatcher_threads_use_configured_prefix() {
    let mut settings = Settings::default();
    settings.dispatcher.thread_name_prefix = "orders-dispatch".to_string();
    let conn = MemoryConnection::with_settings(settings);

    let (tx, rx) = mpsc::channel();
    let dispatcher = conn
        .create_dispatcher(move |_msg| {
            tx.send(thread::current().name().map(str::to_string))?;
            Ok(())
        })
        .unwrap();
    dispatcher.subscribe("orders").unwrap();
    conn.publish("orders", "x").unwrap();

    let name = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(name.as_deref(), Some("orders-dispatch-0"));
    conn.close();
}

#[test]
fn test_close_dispatcher_unsubscribes_and_stops() {
    let conn = MemoryConnection::new();
    let dispatcher = conn.create_dispatcher(|_msg| Ok(())).unwrap();
    let sub = dispatcher.subscribe("orders").unwrap();

    conn.close_dispatcher(&dispatcher).unwrap();

    assert!(!dispatcher.is_active());
    assert!(!sub.is_active());
    assert_eq!(conn.statistics().unsubscribes, 1);
    conn.publish("orders", "x").unwrap();
    assert_eq!(conn.statistics().dropped, 1);
}

#[test]
fn test_close_ends_everything() {
    let conn = MemoryConnection::new();
    let sub = conn.subscribe("test_topic").unwrap();
    let dispatcher = conn.create_dispatcher(|_msg| Ok(())).unwrap();
    let dsub = dispatcher.subscribe("orders").unwrap();

    conn.close();
    conn.close();

    assert!(conn.is_closed());
    assert!(!sub.is_active());
    assert!(!dsub.is_active());
    assert!(!dispatcher.is_active());
    assert!(matches!(conn.subscribe("x"), Err(Error::ConnectionClosed)));
    assert!(matches!(conn.publish("x", "y"), Err(Error::ConnectionClosed)));
    assert!(matches!(
        conn.create_dispatcher(|_msg| Ok(())),
        Err(Error::ConnectionClosed)
    ));
    assert!(matches!(
        dispatcher.subscribe("orders"),
        Err(Error::DispatcherStopped)
    ));
}

#[test]
fn test_close_from_inside_handler() {
    let conn = MemoryConnection::new();
    let (tx, rx) = mpsc::channel();
    let handler_conn = conn.clone();
    let dispatcher = conn
        .create_dispatcher(move |_msg| {
            handler_conn.close();
            tx.send(())?;
            Ok(())
        })
        .unwrap();
    dispatcher.subscribe("shutdown").unwrap();

    conn.publish("shutdown", "now").unwrap();

    rx.recv_timeout(WAIT).unwrap();
    assert!(conn.is_closed());
    assert!(!dispatcher.is_active());
}

#[test]
fn test_close_dispatcher_is_repeatable() {
    let conn = MemoryConnection::new();
    let dispatcher = conn.create_dispatcher(|_msg| Ok(())).unwrap();
    dispatcher.subscribe("a").unwrap();
    dispatcher.subscribe("b").unwrap();

    assert!(conn.close_dispatcher(&dispatcher).is_ok());
    assert_eq!(conn.statistics().unsubscribes, 2);

    // nothing left to unsubscribe the second time
    assert!(conn.close_dispatcher(&dispatcher).is_ok());
    assert_eq!(conn.statistics().unsubscribes, 2);
    assert!(!dispatcher.is_active());
}

#[test]
fn test_subscribe_racing_close_leaves_nothing_active() {
    for _ in 0..50 {
        let conn = MemoryConnection::new();
        let barrier = Arc::new(Barrier::new(3));

        let pulls = {
            let conn = conn.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..20)
                    .filter_map(|n| conn.subscribe(&format!("s.{n}")).ok())
                    .collect::<Vec<_>>()
            })
        };
        let dispatchers = {
            let conn = conn.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..5)
                    .filter_map(|_| conn.create_dispatcher(|_msg| Ok(())).ok())
                    .collect::<Vec<_>>()
            })
        };

        barrier.wait();
        conn.close();

        for sub in pulls.join().unwrap() {
            assert!(!sub.is_active(), "sid {} survived close", sub.sid());
        }
        for dispatcher in dispatchers.join().unwrap() {
            assert!(!dispatcher.is_active());
        }
        assert!(matches!(conn.subscribe("late"), Err(Error::ConnectionClosed)));
    }
}
