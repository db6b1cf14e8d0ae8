//! Integration test: serve the gateway router on a free port and drive the
//! webhook the way the platform does.

use async_trait::async_trait;
use quickreply_agent::{EventCoordinator, GenerationError, LateReplyStrategy, ReplyGenerator};
use quickreply_core::cache::ResponseCache;
use quickreply_core::config::ServerConfig;
use quickreply_core::dedup::DedupStore;
use quickreply_core::delivery::{DeliveryError, OutOfBandDelivery};
use quickreply_core::metrics::MetricsStore;
use quickreply_core::types::{EventPayload, InboundEvent, Reply};
use quickreply_server::auth::compute_signature;
use quickreply_server::gateway::{Gateway, NEUTRAL_ACK};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TOKEN: &str = "webhook-token";

struct EchoGenerator {
    delay: Duration,
    calls: AtomicUsize,
}

#[async_trait]
impl ReplyGenerator for EchoGenerator {
    async fn generate(&self, event: &InboundEvent) -> Result<Reply, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        match event.payload() {
            EventPayload::Text { content } if content == "fail" => Err(GenerationError::Empty),
            EventPayload::Text { content } => Ok(Reply::text(format!("echo {content}"))),
            EventPayload::Image { .. } => Ok(Reply::text("an image")),
        }
    }
}

#[derive(Default)]
struct RecordingDelivery {
    sent: Mutex<Vec<(String, Reply)>>,
}

#[async_trait]
impl OutOfBandDelivery for RecordingDelivery {
    async fn deliver(&self, recipient_id: &str, reply: &Reply) -> Result<(), DeliveryError> {
        self.sent
            .lock()
            .expect("lock")
            .push((recipient_id.to_string(), reply.clone()));
        Ok(())
    }
}

struct Harness {
    base: String,
    client: reqwest::Client,
    generator: Arc<EchoGenerator>,
}

impl Harness {
    async fn start(delay: Duration, deadline: Duration, strategy: LateReplyStrategy) -> Self {
        let generator = Arc::new(EchoGenerator {
            delay,
            calls: AtomicUsize::new(0),
        });
        let coordinator = EventCoordinator::new(
            Arc::new(DedupStore::default()),
            Arc::new(ResponseCache::default()),
            generator.clone(),
            deadline,
            strategy,
            "fallback".to_string(),
            MetricsStore::new(),
        );
        let gateway = Gateway::new(
            Arc::new(coordinator),
            TOKEN.to_string(),
            ServerConfig::default(),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let app = gateway.router();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            base: format!("http://{addr}"),
            client: reqwest::Client::new(),
            generator,
        }
    }

    fn signed_url(&self, extra: &str) -> String {
        let signature = compute_signature(TOKEN, "1700000000", "n0nce");
        format!(
            "{}/wechat?signature={signature}&timestamp=1700000000&nonce=n0nce{extra}",
            self.base
        )
    }

    async fn submit(&self, body: &str) -> reqwest::Response {
        self.client
            .post(self.signed_url(""))
            .body(body.to_string())
            .send()
            .await
            .expect("request")
    }
}

fn text_message(id: u64, content: &str) -> String {
    format!(
        r#"{{"ToUserName":"gh_bot","FromUserName":"openid-1","CreateTime":1700000000,"MsgType":"text","Content":"{content}","MsgId":{id}}}"#
    )
}

fn cache_strategy() -> LateReplyStrategy {
    LateReplyStrategy::CacheForResend {
        placeholder: "resend please".to_string(),
    }
}

#[tokio::test]
async fn verification_echoes_only_with_valid_signature() {
    let h = Harness::start(Duration::ZERO, Duration::from_secs(5), cache_strategy()).await;

    let ok = h
        .client
        .get(h.signed_url("&echostr=hello123"))
        .send()
        .await
        .expect("request");
    assert_eq!(ok.status(), 200);
    assert_eq!(ok.text().await.expect("body"), "hello123");

    let bad = h
        .client
        .get(format!(
            "{}/wechat?signature=deadbeef&timestamp=1&nonce=2&echostr=x",
            h.base
        ))
        .send()
        .await
        .expect("request");
    assert_eq!(bad.status(), 401);
}

#[tokio::test]
async fn unsigned_submission_is_rejected() {
    let h = Harness::start(Duration::ZERO, Duration::from_secs(5), cache_strategy()).await;
    let res = h
        .client
        .post(format!("{}/wechat", h.base))
        .body(text_message(1, "hi"))
        .send()
        .await
        .expect("request");
    assert_eq!(res.status(), 401);
    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn undecodable_submission_gets_neutral_ack() {
    let h = Harness::start(Duration::ZERO, Duration::from_secs(5), cache_strategy()).await;
    for body in ["not json", r#"{"FromUserName":"u","MsgType":"event","Event":"subscribe"}"#] {
        let res = h.submit(body).await;
        assert_eq!(res.status(), 200);
        assert_eq!(res.text().await.expect("body"), NEUTRAL_ACK);
    }
}

#[tokio::test]
async fn in_time_reply_is_encoded_back_to_sender() {
    let h = Harness::start(
        Duration::from_millis(10),
        Duration::from_secs(5),
        cache_strategy(),
    )
    .await;

    let res = h.submit(&text_message(100, "hello")).await;
    assert_eq!(res.status(), 200);
    let json: Value = res.json().await.expect("json");
    assert_eq!(json["ToUserName"], "openid-1");
    assert_eq!(json["FromUserName"], "gh_bot");
    assert_eq!(json["MsgType"], "text");
    assert_eq!(json["Content"], "echo hello");

    // Platform retry of the same delivery: served from cache, no regeneration.
    let again: Value = h
        .submit(&text_message(100, "hello"))
        .await
        .json()
        .await
        .expect("json");
    assert_eq!(again["Content"], "echo hello");
    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn generation_failure_still_answers_200_with_fallback() {
    let h = Harness::start(Duration::ZERO, Duration::from_secs(5), cache_strategy()).await;
    let res = h.submit(&text_message(7, "fail")).await;
    assert_eq!(res.status(), 200);
    let json: Value = res.json().await.expect("json");
    assert_eq!(json["Content"], "fallback");
}

#[tokio::test]
async fn slow_reply_is_acknowledged_then_pushed() {
    let delivery = Arc::new(RecordingDelivery::default());
    let h = Harness::start(
        Duration::from_millis(400),
        Duration::from_millis(50),
        LateReplyStrategy::Push {
            delivery: delivery.clone(),
        },
    )
    .await;

    let res = h.submit(&text_message(200, "slow")).await;
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.expect("body"), NEUTRAL_ACK);

    // The platform retries while generation is still running.
    let retry = h.submit(&text_message(200, "slow")).await;
    assert_eq!(retry.text().await.expect("body"), NEUTRAL_ACK);

    for _ in 0..100 {
        if !delivery.sent.lock().expect("lock").is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let sent = delivery.sent.lock().expect("lock").clone();
    assert_eq!(sent, vec![("openid-1".to_string(), Reply::text("echo slow"))]);
    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 1);

    let metrics: Value = h
        .client
        .get(format!("{}/api/monitor/metrics", h.base))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(metrics["replies_timed_out"], 1);
    assert_eq!(metrics["duplicates"], 1);
    assert_eq!(metrics["strategy"], "push");
    assert_eq!(metrics["deadline_ms"], 50);
    assert_eq!(metrics["cache_ttl_secs"], 300);
    assert_eq!(metrics["cache_capacity"], 100);
    assert_eq!(metrics["dedup_window_secs"], 60);
}

#[tokio::test]
async fn slow_reply_is_placeholder_then_served_from_cache() {
    let h = Harness::start(
        Duration::from_millis(400),
        Duration::from_millis(50),
        cache_strategy(),
    )
    .await;

    let res = h.submit(&text_message(300, "slow")).await;
    assert_eq!(res.status(), 200);
    let json: Value = res.json().await.expect("json");
    assert_eq!(json["ToUserName"], "openid-1");
    assert_eq!(json["MsgType"], "text");
    assert_eq!(json["Content"], "resend please");

    let mut cached = false;
    for _ in 0..100 {
        let metrics: Value = h
            .client
            .get(format!("{}/api/monitor/metrics", h.base))
            .send()
            .await
            .expect("request")
            .json()
            .await
            .expect("json");
        if metrics["cache_entries"] == 1 {
            cached = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(cached, "late reply never reached the cache");

    // The user sends the same text again as a new message.
    let resend: Value = h
        .submit(&text_message(301, "slow"))
        .await
        .json()
        .await
        .expect("json");
    assert_eq!(resend["Content"], "echo slow");
    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 1);
}
