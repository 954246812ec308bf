//! Integration tests against a live Redis, covering the behavior the
//! in-memory backend cannot: real TTL eviction and window pruning.
//!
//! Run with `cargo test -- --ignored` and a Redis reachable at
//! `REDIS_ADDR` (default `localhost:6379`).

use std::sync::Arc;
use std::time::Duration;

use rg_domain::config::Config;
use rg_domain::EventData;
use rg_gateway::rules::{self, LOGIN_EVENT};
use rg_gateway::services::{KvStore, RedisKv, Services};

fn redis_addr() -> String {
    std::env::var("REDIS_ADDR").unwrap_or_else(|_| "localhost:6379".to_string())
}

async fn live_services() -> Services {
    let kv = RedisKv::connect(&redis_addr())
        .await
        .expect("redis not reachable; set REDIS_ADDR");
    Services::with_kv(Arc::new(kv))
}

fn unique_ip() -> String {
    // Unique per run so tests never see each other's windows.
    let n = std::process::id() as u64 + chrono::Utc::now().timestamp_subsec_micros() as u64;
    format!("10.{}.{}.{}", (n >> 16) & 0xff, (n >> 8) & 0xff, n & 0xff)
}

fn login(ip: &str, account: Option<&str>) -> EventData {
    EventData {
        ip: Some(ip.to_string()),
        account: account.map(String::from),
    }
}

#[tokio::test]
#[ignore = "requires a running redis (set REDIS_ADDR)"]
async fn ping_round_trips() {
    let kv = RedisKv::connect(&redis_addr()).await.unwrap();
    kv.ping().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running redis (set REDIS_ADDR)"]
async fn velocity_window_slides_on_a_real_clock() {
    let config = Config::from_yaml(
        r#"
rules:
  - name: velocity
    intervalSeconds: 1
    limit: 1
    strategy: override
"#,
    )
    .unwrap();
    let compiled = rules::compile(&config.rules, &live_services().await)
        .await
        .unwrap();
    let handler = &compiled.registry.handlers(LOGIN_EVENT).unwrap()[0];

    let ip = unique_ip();
    assert_eq!(handler.evaluate(&login(&ip, None)).await.score, 0.0);
    assert_eq!(handler.evaluate(&login(&ip, None)).await.score, 1.0);

    // Let the window pass; the old entries are pruned on the next event.
    tokio::time::sleep(Duration::from_millis(1_200)).await;
    assert_eq!(handler.evaluate(&login(&ip, None)).await.score, 0.0);
}

#[tokio::test]
#[ignore = "requires a running redis (set REDIS_ADDR)"]
async fn spray_set_self_evicts_after_the_interval() {
    let config = Config::from_yaml(
        r#"
rules:
  - name: horizontalBruteForce
    intervalSeconds: 1
    distinctAccounts: 2
    strategy: override
"#,
    )
    .unwrap();
    let compiled = rules::compile(&config.rules, &live_services().await)
        .await
        .unwrap();
    let handler = &compiled.registry.handlers(LOGIN_EVENT).unwrap()[0];

    let ip = unique_ip();
    assert_eq!(handler.evaluate(&login(&ip, Some("alice"))).await.score, 0.0);
    assert_eq!(handler.evaluate(&login(&ip, Some("bob"))).await.score, 1.0);

    // The whole set expires after a quiet interval, so the IP resets.
    tokio::time::sleep(Duration::from_millis(1_200)).await;
    assert_eq!(handler.evaluate(&login(&ip, Some("carol"))).await.score, 0.0);
}
