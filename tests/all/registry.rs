use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use warren::broker::{ConnectionEvent, HealthStatus};
use warren::events::{EventId, LifecycleEvent};
use warren::model::NoBootstrap;
use warren::{ConnectionId, Error, Warren};

use crate::helpers::{
    builder, warren_with, CountingBootstrap, EventLog, FakeBroker, FakeSettings, CONNECTION, MODEL,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_borrows_open_a_single_connection() {
    // Arrange
    let broker = FakeBroker::default();
    let log = EventLog::default();
    let warren = warren_with(&broker, &log, NoBootstrap);

    // Act
    let borrowers: Vec<_> = (0..32)
        .map(|_| {
            let warren = warren.clone();
            tokio::spawn(async move { warren.get(MODEL).await.map(|model| model.id) })
        })
        .collect();
    for borrower in borrowers {
        borrower.await.unwrap().expect("Failed to borrow a model");
    }

    // Assert
    assert_eq!(1, broker.state.connects());
    assert_eq!(1, log.count(EventId::ConnectionCreated));
}

#[tokio::test]
async fn models_bound_to_the_same_connection_share_it() {
    // Arrange
    let broker = FakeBroker::default();
    let log = EventLog::default();
    let warren = builder(&broker, &log)
        .model("Exc1", CONNECTION, NoBootstrap)
        .model("Exc2", CONNECTION, NoBootstrap)
        .build()
        .unwrap();

    // Act
    let first = warren.get("Exc1").await.unwrap();
    let second = warren.get("Exc2").await.unwrap();

    // Assert
    assert_ne!(first.id, second.id);
    assert_eq!(1, broker.state.connects());
}

#[tokio::test]
async fn a_failed_connection_attempt_is_not_cached() {
    // Arrange
    let broker = FakeBroker::default();
    broker.state.failing_connects.store(1, Ordering::SeqCst);
    let log = EventLog::default();
    let bootstrap = CountingBootstrap::default();
    let warren = warren_with(&broker, &log, bootstrap.clone());
    let pool = warren.pool(MODEL).unwrap();

    // Act
    let first = pool.borrow().await;
    let outstanding_after_failure = pool.status().outstanding;
    let second = pool.borrow().await;

    // Assert
    match first {
        Err(Error::Connect { connection, source }) => {
            assert_eq!(ConnectionId::from(CONNECTION), connection);
            assert_eq!("Connection refused", source.to_string());
        }
        other => panic!("Expected a connection failure, got {:?}", other.map(|m| m.id)),
    }
    assert_eq!(0, outstanding_after_failure);
    assert!(second.is_ok());
    assert_eq!(2, broker.state.connects());
    assert_eq!(1, bootstrap.runs());
    assert_eq!(1, log.count(EventId::ConnectionCreated));
    assert_eq!(1, pool.status().outstanding);
}

#[tokio::test]
async fn a_failing_settings_callback_is_a_configuration_error_and_is_retried() {
    // Arrange
    let broker = FakeBroker::default();
    let configured = Arc::new(AtomicBool::new(false));
    let warren = Warren::builder(broker.clone())
        .connection(CONNECTION, {
            let configured = Arc::clone(&configured);
            move || {
                if configured.load(Ordering::SeqCst) {
                    Ok(FakeSettings)
                } else {
                    Err(anyhow::anyhow!("Missing broker address"))
                }
            }
        })
        .build()
        .unwrap();

    // Act
    let first = warren.connection(CONNECTION).await;
    configured.store(true, Ordering::SeqCst);
    let second = warren.connection(CONNECTION).await;

    // Assert
    assert!(matches!(first, Err(Error::Configuration(_))));
    assert!(second.is_ok());
    assert_eq!(1, broker.state.connects());
}

#[tokio::test]
async fn the_same_connection_is_handed_out_until_it_breaks() {
    // Arrange
    let broker = FakeBroker::default();
    let log = EventLog::default();
    let warren = warren_with(&broker, &log, NoBootstrap);

    // Act
    let first = warren.connection(CONNECTION).await.unwrap();
    let second = warren.connection(CONNECTION).await.unwrap();
    broker.state.last_connection().drop_connection();
    let third = warren.connection(CONNECTION).await.unwrap();

    // Assert
    assert!(Arc::ptr_eq(&first, &second));
    assert!(!Arc::ptr_eq(&first, &third));
    assert_eq!(2, broker.state.connects());
    assert_eq!(HealthStatus::Healthy, warren::broker::Connection::status(&*third));
}

#[tokio::test]
async fn connection_notifications_are_surfaced_as_lifecycle_events() {
    // Arrange
    let broker = FakeBroker::default();
    let log = EventLog::default();
    let warren = warren_with(&broker, &log, NoBootstrap);
    warren.connection(CONNECTION).await.unwrap();
    let connection = broker.state.last_connection();

    // Act
    connection.raise(ConnectionEvent::Blocked {
        reason: "low on memory".into(),
    });
    connection.raise(ConnectionEvent::Unblocked);
    connection.raise(ConnectionEvent::Shutdown {
        reason: "CONNECTION_FORCED".into(),
    });

    // Assert
    let ids: Vec<EventId> = log.events().iter().map(LifecycleEvent::id).collect();
    assert_eq!(
        vec![
            EventId::ConnectionCreated,
            EventId::ConnectionBlocked,
            EventId::ConnectionUnblocked,
            EventId::ConnectionShutdown,
        ],
        ids
    );
    match &log.events()[1] {
        LifecycleEvent::ConnectionBlocked { connection, reason } => {
            assert_eq!(CONNECTION, connection.as_str());
            assert_eq!("low on memory", reason.as_str());
        }
        other => panic!("Unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn closing_unbinds_every_connection() {
    // Arrange
    let broker = FakeBroker::default();
    let log = EventLog::default();
    let warren = warren_with(&broker, &log, NoBootstrap);
    warren.connection(CONNECTION).await.unwrap();
    let connection = broker.state.last_connection();

    // Act
    warren.close().await;

    // Assert
    assert!(!connection.is_open());
    assert!(warren.connections().get(&CONNECTION.into()).await.is_none());
    warren.connection(CONNECTION).await.unwrap();
    assert_eq!(2, broker.state.connects());
}

#[tokio::test]
async fn unknown_connections_are_rejected() {
    let broker = FakeBroker::default();
    let log = EventLog::default();
    let warren = warren_with(&broker, &log, NoBootstrap);

    let outcome = warren.connection("C2").await;

    assert!(matches!(outcome, Err(Error::UnknownConnection(id)) if id.as_str() == "C2"));
    assert_eq!(0, broker.state.connects());
}
