//! Producer/consumer integration tests
//!
//! These tests run the full publish → poll → dispatch path against the
//! in-memory store, so no Redis is needed.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

use redis_mq::queue::{
    Consumer, ConsumerOptions, Handler, MemoryStore, Message, MessageStore, Producer,
};
use redis_mq::MqError;

const TICK: Duration = Duration::from_millis(5);

/// Handler that records every delivered message
#[derive(Default)]
struct Recorder {
    received: Mutex<Vec<Message>>,
}

impl Recorder {
    fn count(&self) -> usize {
        self.received.lock().unwrap().len()
    }

    fn bodies(&self) -> Vec<Vec<u8>> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.body().to_vec())
            .collect()
    }
}

#[async_trait]
impl Handler for Recorder {
    async fn handle_message(&self, message: Message) {
        self.received.lock().unwrap().push(message);
    }
}

struct TestEnvironment {
    store: Arc<MemoryStore>,
    producer: Producer,
    token: CancellationToken,
}

fn create_test_environment() -> TestEnvironment {
    let store = Arc::new(MemoryStore::new());
    TestEnvironment {
        producer: Producer::new(store.clone()),
        store,
        token: CancellationToken::new(),
    }
}

impl TestEnvironment {
    fn consumer(&self, topic: &str, options: ConsumerOptions) -> Consumer {
        Consumer::new(self.token.clone(), self.store.clone(), topic, options)
    }

    fn started_consumer(&self, topic: &str, recorder: &Arc<Recorder>) -> Consumer {
        let consumer = self.consumer(topic, ConsumerOptions::default().rate_limit_period(TICK));
        consumer.set_handler(recorder.clone());
        consumer
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    condition()
}

// =============================================================================
// Immediate delivery
// =============================================================================

mod immediate_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_published_json_delivered_once() {
        let env = create_test_environment();
        let recorder = Arc::new(Recorder::default());
        let consumer = env.started_consumer("t", &recorder);

        let body = br#"{"name":"a","age":1}"#.to_vec();
        assert_ok!(env.producer.publish("t", body.clone()).await);

        assert!(wait_until(Duration::from_secs(2), || recorder.count() == 1).await);
        tokio::time::sleep(TICK * 10).await;

        assert_eq!(recorder.bodies(), vec![body]);
        assert_eq!(env.store.list_len("t:list").await.unwrap(), 0);

        env.token.cancel();
        consumer.wait_stopped().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_list_delivery_preserves_publish_order() {
        let env = create_test_environment();
        let recorder = Arc::new(Recorder::default());
        let consumer = env.started_consumer("ordered", &recorder);

        for i in 0..20 {
            assert_ok!(env.producer.publish("ordered", format!("m{}", i)).await);
        }

        assert!(wait_until(Duration::from_secs(3), || recorder.count() == 20).await);
        let expected: Vec<Vec<u8>> = (0..20).map(|i| format!("m{}", i).into_bytes()).collect();
        assert_eq!(recorder.bodies(), expected);

        env.token.cancel();
        consumer.wait_stopped().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_pop_mode_delivers() {
        let env = create_test_environment();
        let recorder = Arc::new(Recorder::default());
        let consumer = env.consumer(
            "blocking",
            ConsumerOptions::default().rate_limit_period(TICK).use_blpop(true),
        );
        consumer.set_handler(recorder.clone());

        // Let the loop park inside the blocking pop first
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_ok!(env.producer.publish("blocking", "wake up").await);

        assert!(wait_until(Duration::from_secs(2), || recorder.count() == 1).await);
        assert_eq!(recorder.bodies(), vec![b"wake up".to_vec()]);

        // Cancellation is observed after the current pop returns (≤ 1s)
        env.token.cancel();
        tokio::time::timeout(Duration::from_secs(3), consumer.wait_stopped())
            .await
            .expect("loops stop within the blocking pop ceiling");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_competing_consumers_never_duplicate() {
        let env = create_test_environment();
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        let a = env.started_consumer("shared", &first);
        let b = env.started_consumer("shared", &second);

        for i in 0..50 {
            assert_ok!(env.producer.publish("shared", format!("{}", i)).await);
        }

        assert!(wait_until(Duration::from_secs(3), || first.count() + second.count() == 50).await);
        tokio::time::sleep(TICK * 10).await;

        let mut all = first.bodies();
        all.extend(second.bodies());
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 50);
        assert_eq!(first.count() + second.count(), 50);

        env.token.cancel();
        a.wait_stopped().await;
        b.wait_stopped().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_garbage_in_list_is_skipped() {
        let env = create_test_environment();
        env.store.push("dirty:list", "not a message").await.unwrap();
        assert_ok!(env.producer.publish("dirty", "clean").await);

        let recorder = Arc::new(Recorder::default());
        let consumer = env.started_consumer("dirty", &recorder);

        assert!(wait_until(Duration::from_secs(2), || recorder.count() == 1).await);
        assert_eq!(recorder.bodies(), vec![b"clean".to_vec()]);
        assert_eq!(env.store.list_len("dirty:list").await.unwrap(), 0);

        env.token.cancel();
        consumer.wait_stopped().await;
    }
}

// =============================================================================
// Delayed delivery
// =============================================================================

mod delayed_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_delayed_message_not_delivered_early() {
        let env = create_test_environment();
        let recorder = Arc::new(Recorder::default());
        let consumer = env.started_consumer("t", &recorder);

        let body = br#"{"name":"a","age":1}"#.to_vec();
        let published_at = Instant::now();
        assert_ok!(
            env.producer
                .publish_delay_msg("t", body.clone(), chrono::Duration::milliseconds(500))
                .await
        );

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(recorder.count(), 0);

        assert!(wait_until(Duration::from_secs(2), || recorder.count() == 1).await);
        assert!(published_at.elapsed() >= Duration::from_millis(500));
        tokio::time::sleep(TICK * 10).await;

        assert_eq!(recorder.bodies(), vec![body]);
        assert_eq!(env.store.zset_len("t:zset").await.unwrap(), 0);

        env.token.cancel();
        consumer.wait_stopped().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_sweep_leaves_later_messages() {
        let env = create_test_environment();
        let recorder = Arc::new(Recorder::default());
        let consumer = env.started_consumer("sweep", &recorder);

        let short = chrono::Duration::milliseconds(100);
        assert_ok!(env.producer.publish_delay_msg("sweep", "a", short).await);
        assert_ok!(env.producer.publish_delay_msg("sweep", "b", short).await);
        assert_ok!(
            env.producer
                .publish_delay_msg("sweep", "later", chrono::Duration::seconds(30))
                .await
        );

        assert!(wait_until(Duration::from_secs(2), || recorder.count() == 2).await);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut bodies = recorder.bodies();
        bodies.sort();
        assert_eq!(bodies, vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(env.store.zset_len("sweep:zset").await.unwrap(), 1);

        env.token.cancel();
        consumer.wait_stopped().await;
    }

    #[tokio::test]
    async fn test_non_positive_delay_is_configuration_error() {
        let env = create_test_environment();

        let err = assert_err!(
            env.producer
                .publish_delay_msg("t", "x", chrono::Duration::zero())
                .await
        );
        assert!(matches!(err, MqError::InvalidArgument(_)));

        let err = assert_err!(
            env.producer
                .publish_delay_msg("t", "x", chrono::Duration::seconds(-1))
                .await
        );
        assert!(err.is_invalid_argument());

        assert_eq!(env.store.zset_len("t:zset").await.unwrap(), 0);
        assert_eq!(env.store.list_len("t:list").await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_both_paths_run_independently() {
        let env = create_test_environment();
        let recorder = Arc::new(Recorder::default());
        let consumer = env.started_consumer("mixed", &recorder);

        assert_ok!(
            env.producer
                .publish_delay_msg("mixed", "delayed", chrono::Duration::milliseconds(50))
                .await
        );
        assert_ok!(env.producer.publish("mixed", "immediate").await);

        assert!(wait_until(Duration::from_secs(2), || recorder.count() == 2).await);
        let mut bodies = recorder.bodies();
        bodies.sort();
        assert_eq!(bodies, vec![b"delayed".to_vec(), b"immediate".to_vec()]);

        env.token.cancel();
        consumer.wait_stopped().await;
    }
}

// =============================================================================
// Handler and lifecycle
// =============================================================================

mod lifecycle_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_no_dispatch_after_cancel() {
        let env = create_test_environment();
        let recorder = Arc::new(Recorder::default());
        let consumer = env.started_consumer("stop", &recorder);

        assert_ok!(env.producer.publish("stop", "before").await);
        assert!(wait_until(Duration::from_secs(2), || recorder.count() == 1).await);

        env.token.cancel();
        consumer.wait_stopped().await;

        assert_ok!(env.producer.publish("stop", "after").await);
        assert_ok!(
            env.producer
                .publish_delay_msg("stop", "after-delayed", chrono::Duration::milliseconds(1))
                .await
        );
        tokio::time::sleep(TICK * 20).await;

        assert_eq!(recorder.count(), 1);
        assert_eq!(env.store.list_len("stop:list").await.unwrap(), 1);
        assert_eq!(env.store.zset_len("stop:zset").await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_replaced_handler_receives_later_messages() {
        let env = create_test_environment();
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        let consumer = env.started_consumer("swap", &first);

        assert_ok!(env.producer.publish("swap", "one").await);
        assert!(wait_until(Duration::from_secs(2), || first.count() == 1).await);

        consumer.set_handler(second.clone());
        tokio::time::sleep(TICK * 4).await;
        assert_ok!(env.producer.publish("swap", "two").await);
        assert!(wait_until(Duration::from_secs(2), || second.count() == 1).await);

        assert_eq!(first.bodies(), vec![b"one".to_vec()]);
        assert_eq!(second.bodies(), vec![b"two".to_vec()]);

        env.token.cancel();
        consumer.wait_stopped().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_closure_handler() {
        let env = create_test_environment();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let consumer = env.consumer("fn", ConsumerOptions::default().rate_limit_period(TICK));

        let sink = seen.clone();
        consumer.set_handler(Arc::new(move |m: Message| {
            sink.lock().unwrap().push(m.id().to_string());
        }));

        assert_ok!(env.producer.publish("fn", "x").await);
        assert!(wait_until(Duration::from_secs(2), || seen.lock().unwrap().len() == 1).await);

        env.token.cancel();
        consumer.wait_stopped().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_handler_panic_keeps_both_loops_running() {
        let env = create_test_environment();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let consumer = env.consumer("panicky", ConsumerOptions::default().rate_limit_period(TICK));

        let sink = seen.clone();
        consumer.set_handler(Arc::new(move |m: Message| {
            if m.body() == b"boom" {
                panic!("handler failure");
            }
            sink.lock().unwrap().push(m.body().to_vec());
        }));

        assert_ok!(env.producer.publish("panicky", "boom").await);
        assert_ok!(
            env.producer
                .publish_delay_msg("panicky", "boom", chrono::Duration::milliseconds(1))
                .await
        );
        tokio::time::sleep(TICK * 10).await;

        assert_ok!(env.producer.publish("panicky", "ok").await);
        assert_ok!(
            env.producer
                .publish_delay_msg("panicky", "ok-delayed", chrono::Duration::milliseconds(1))
                .await
        );

        assert!(wait_until(Duration::from_secs(2), || seen.lock().unwrap().len() == 2).await);
        assert!(consumer.is_started());
        assert_eq!(env.store.list_len("panicky:list").await.unwrap(), 0);
        assert_eq!(env.store.zset_len("panicky:zset").await.unwrap(), 0);

        env.token.cancel();
        consumer.wait_stopped().await;
    }
}
