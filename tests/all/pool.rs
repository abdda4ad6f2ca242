use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use warren::events::EventId;
use warren::model::{Bootstrap, NoBootstrap};
use warren::{Error, PoolSettings, PoolStatus};

use crate::helpers::{
    builder, warren_with, CountingBootstrap, EventLog, FailingBootstrap, FakeBroker, FakeModel,
    FakeSettings, InvalidOperation, CONNECTION, MODEL,
};

/// Declares a topic exchange on every new model.
struct DeclareTopicExchange(&'static str);

#[async_trait::async_trait]
impl Bootstrap<FakeModel> for DeclareTopicExchange {
    async fn run(&self, model: &FakeModel) -> Result<(), anyhow::Error> {
        model.declare_exchange(self.0, "topic");
        Ok(())
    }
}

#[tokio::test]
async fn a_returned_model_is_handed_out_again_without_a_second_bootstrap() {
    // Arrange
    let broker = FakeBroker::default();
    let log = EventLog::default();
    let warren = warren_with(&broker, &log, DeclareTopicExchange("myExc"));
    let pool = warren.pool(MODEL).unwrap();

    // Act
    let first = pool.borrow().await.unwrap();
    let first_id = first.id;
    pool.release(Some(first));
    let second = pool.borrow().await.unwrap();

    // Assert
    assert_eq!(first_id, second.id);
    assert_eq!(
        vec![("myExc".to_string(), "topic".to_string())],
        *broker.state.exchanges.lock().unwrap()
    );
    assert_eq!(1, log.count(EventId::ModelCreated));
    assert_eq!(vec![true], log.returned());
    assert_eq!(
        PoolStatus {
            idle: 0,
            outstanding: 1
        },
        pool.status()
    );
}

#[tokio::test]
async fn releasing_nothing_is_a_no_op() {
    // Arrange
    let broker = FakeBroker::default();
    let log = EventLog::default();
    let warren = warren_with(&broker, &log, NoBootstrap);
    let pool = warren.pool(MODEL).unwrap();

    // Act
    pool.release(None);

    // Assert
    assert_eq!(
        PoolStatus {
            idle: 0,
            outstanding: 0
        },
        pool.status()
    );
    assert!(log.returned().is_empty());
}

#[tokio::test]
async fn a_broken_model_is_discarded_on_return() {
    // Arrange
    let broker = FakeBroker::default();
    let log = EventLog::default();
    let warren = warren_with(&broker, &log, NoBootstrap);
    let pool = warren.pool(MODEL).unwrap();
    let model = pool.borrow().await.unwrap();
    let broken_id = model.id;

    // Act
    model.break_it();
    pool.release(Some(model));
    let replacement = pool.borrow().await.unwrap();

    // Assert
    assert_eq!(vec![false], log.returned());
    assert_ne!(broken_id, replacement.id);
    assert_eq!(2, log.count(EventId::ModelCreated));
    assert_eq!(
        PoolStatus {
            idle: 0,
            outstanding: 1
        },
        pool.status()
    );
}

#[tokio::test]
async fn a_model_that_broke_while_idle_is_skipped() {
    // Arrange
    let broker = FakeBroker::default();
    let log = EventLog::default();
    let warren = warren_with(&broker, &log, NoBootstrap);
    let pool = warren.pool(MODEL).unwrap();
    let model = pool.borrow().await.unwrap();
    let breaker = model.breaker();
    let idle_id = model.id;
    pool.release(Some(model));
    assert_eq!(1, pool.status().idle);

    // Act
    breaker.store(false, Ordering::SeqCst);
    let model = pool.borrow().await.unwrap();

    // Assert
    assert_ne!(idle_id, model.id);
    assert_eq!(
        PoolStatus {
            idle: 0,
            outstanding: 1
        },
        pool.status()
    );
}

#[tokio::test]
async fn a_failed_bootstrap_surfaces_the_original_error_and_closes_the_model() {
    // Arrange
    let broker = FakeBroker::default();
    let log = EventLog::default();
    let warren = warren_with(&broker, &log, FailingBootstrap);
    let pool = warren.pool(MODEL).unwrap();

    // Act
    let outcome = pool.borrow().await;

    // Assert
    match outcome {
        Err(Error::Bootstrap { model, source }) => {
            assert_eq!(MODEL, model.as_str());
            let cause = source
                .downcast_ref::<InvalidOperation>()
                .expect("The bootstrap error was not preserved");
            assert_eq!("Kaboom.", cause.0);
        }
        other => panic!("Expected a bootstrap failure, got {:?}", other.map(|m| m.id)),
    }
    assert_eq!(1, log.count(EventId::ModelBootstrapError));
    assert_eq!(0, log.count(EventId::ModelCreated));
    assert_eq!(1, broker.state.models_closed.load(Ordering::SeqCst));
    assert_eq!(
        PoolStatus {
            idle: 0,
            outstanding: 0
        },
        pool.status()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_model_is_never_handed_to_two_borrowers_at_once() {
    // Arrange
    let broker = FakeBroker::default();
    let log = EventLog::default();
    let bootstrap = CountingBootstrap::default();
    let warren = warren_with(&broker, &log, bootstrap.clone());
    let in_use = Arc::new(Mutex::new(HashSet::new()));

    // Act
    let borrowers: Vec<_> = (0..16)
        .map(|_| {
            let warren = warren.clone();
            let in_use = Arc::clone(&in_use);
            tokio::spawn(async move {
                for _ in 0..10 {
                    let model = warren.get(MODEL).await.unwrap();
                    assert!(
                        in_use.lock().unwrap().insert(model.id),
                        "Model {} was handed out twice",
                        model.id
                    );
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    in_use.lock().unwrap().remove(&model.id);
                }
            })
        })
        .collect();
    for borrower in borrowers {
        borrower.await.unwrap();
    }

    // Assert
    let status = warren.pool(MODEL).unwrap().status();
    assert_eq!(0, status.outstanding);
    assert_eq!(bootstrap.runs(), status.idle);
    assert!(bootstrap.runs() <= 16);
}

#[tokio::test]
async fn borrowing_waits_when_the_ceiling_is_reached() {
    // Arrange
    let broker = FakeBroker::default();
    let log = EventLog::default();
    let warren = builder(&broker, &log)
        .model(MODEL, CONNECTION, NoBootstrap)
        .pool_settings(
            MODEL,
            PoolSettings {
                max_outstanding: Some(1),
            },
        )
        .build()
        .unwrap();
    let pool = warren.pool(MODEL).unwrap();
    let first = pool.borrow().await.unwrap();
    let first_id = first.id;

    // Act
    let blocked = tokio::time::timeout(Duration::from_millis(50), pool.borrow()).await;
    pool.release(Some(first));
    let second = tokio::time::timeout(Duration::from_millis(50), pool.borrow()).await;

    // Assert
    assert!(blocked.is_err(), "Borrowing should wait for a model to be given back");
    let second = second
        .expect("Borrowing should proceed once a model is given back")
        .unwrap();
    assert_eq!(first_id, second.id);
    assert_eq!(1, pool.status().outstanding);
}

#[tokio::test]
async fn a_closed_pool_refuses_to_lend_and_discards_what_comes_back() {
    // Arrange
    let broker = FakeBroker::default();
    let log = EventLog::default();
    let warren = warren_with(&broker, &log, NoBootstrap);
    let pool = warren.pool(MODEL).unwrap();
    let idle = pool.borrow().await.unwrap();
    let borrowed = pool.borrow().await.unwrap();
    pool.release(Some(idle));

    // Act
    pool.close().await;
    let outcome = pool.borrow().await;
    pool.release(Some(borrowed));

    // Assert
    assert!(matches!(outcome, Err(Error::PoolClosed(model)) if model.as_str() == MODEL));
    assert_eq!(vec![true, false], log.returned());
    assert_eq!(
        PoolStatus {
            idle: 0,
            outstanding: 0
        },
        pool.status()
    );
    assert_eq!(1, broker.state.models_closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn unknown_models_are_rejected() {
    let broker = FakeBroker::default();
    let log = EventLog::default();
    let warren = warren_with(&broker, &log, NoBootstrap);

    let outcome = warren.get("Exc2").await;

    assert!(matches!(outcome, Err(Error::UnknownModel(model)) if model.as_str() == "Exc2"));
    assert_eq!(0, broker.state.connects());
}

#[test]
fn invalid_registrations_are_rejected_at_build_time() {
    let broker = FakeBroker::default();
    let log = EventLog::default();

    let duplicate_connection = builder(&broker, &log)
        .connection(CONNECTION, || Ok(FakeSettings))
        .build()
        .err();
    let unknown_connection = builder(&broker, &log)
        .model(MODEL, "C2", NoBootstrap)
        .build()
        .err();
    let duplicate_model = builder(&broker, &log)
        .model(MODEL, CONNECTION, NoBootstrap)
        .model(MODEL, CONNECTION, NoBootstrap)
        .build()
        .err();
    let unknown_pool = builder(&broker, &log)
        .pool_settings(MODEL, PoolSettings::default())
        .build()
        .err();
    let empty_pool = builder(&broker, &log)
        .model(MODEL, CONNECTION, NoBootstrap)
        .pool_settings(
            MODEL,
            PoolSettings {
                max_outstanding: Some(0),
            },
        )
        .build()
        .err();

    for outcome in [
        duplicate_connection,
        unknown_connection,
        duplicate_model,
        unknown_pool,
        empty_pool,
    ] {
        assert!(matches!(outcome, Some(Error::Configuration(_))), "{outcome:?}");
    }
}

#[tokio::test]
async fn a_borrow_abandoned_while_connecting_gives_its_slot_back() {
    // Arrange
    let broker = FakeBroker::default();
    let log = EventLog::default();
    let warren = builder(&broker, &log)
        .model(MODEL, CONNECTION, NoBootstrap)
        .pool_settings(
            MODEL,
            PoolSettings {
                max_outstanding: Some(1),
            },
        )
        .build()
        .unwrap();
    let pool = warren.pool(MODEL).unwrap();

    // Act
    // Connecting to the fake broker takes 20ms.
    let abandoned = tokio::time::timeout(Duration::from_millis(5), pool.borrow()).await;
    let status_after_abandon = pool.status();
    let next = tokio::time::timeout(Duration::from_millis(500), pool.borrow()).await;

    // Assert
    assert!(abandoned.is_err());
    assert_eq!(
        PoolStatus {
            idle: 0,
            outstanding: 0
        },
        status_after_abandon
    );
    next.expect("The ceiling permit was not given back")
        .expect("Failed to borrow a model");
    assert_eq!(1, pool.status().outstanding);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn models_given_back_while_the_pool_closes_are_not_kept() {
    // Arrange
    let broker = FakeBroker::default();
    let log = EventLog::default();
    let warren = warren_with(&broker, &log, NoBootstrap);
    let pool = warren.pool(MODEL).unwrap();
    let mut models = Vec::new();
    for _ in 0..64 {
        models.push(pool.borrow().await.unwrap());
    }

    // Act
    let returners: Vec<_> = models
        .into_iter()
        .map(|model| {
            let pool = pool.clone();
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                pool.release(Some(model));
            })
        })
        .collect();
    let closer = tokio::spawn({
        let pool = pool.clone();
        async move { pool.close().await }
    });
    for returner in returners {
        returner.await.unwrap();
    }
    closer.await.unwrap();

    // Assert
    assert_eq!(
        PoolStatus {
            idle: 0,
            outstanding: 0
        },
        pool.status()
    );
}
