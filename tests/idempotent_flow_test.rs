//! Business operations guarded by the ledger, retry policy and breakers

use anyhow::Result;
use keystone_config::KeystoneConfig;
use keystone_resilience::{CircuitBreakerError, CircuitState};
use keystone_runtime::ResilienceContext;
use keystone_storage::operation_hash;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PostInvoice {
    invoice_id: u64,
    amount_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PostingReceipt {
    journal_entry: String,
}

fn config() -> KeystoneConfig {
    let mut config = KeystoneConfig::default();
    config.database.url = "sqlite::memory:".to_string();
    config.retry.max_retries = 2;
    config.retry.base_delay = Duration::from_millis(1);
    config.circuit_breaker.failure_threshold = 2;
    config.healing.enabled = false;
    config
}

/// Simulated accounting gateway that fails a fixed number of times
struct Gateway {
    failures_left: AtomicU32,
    calls: AtomicU32,
}

impl Gateway {
    fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures_left: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        })
    }

    async fn post(&self, command: &PostInvoice) -> Result<PostingReceipt, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err("503 service unavailable".to_string());
        }
        Ok(PostingReceipt {
            journal_entry: format!("JE-{}", command.invoice_id),
        })
    }
}

async fn post_invoice(
    context: &ResilienceContext,
    gateway: &Gateway,
    request_id: &str,
    command: &PostInvoice,
) -> Result<PostingReceipt> {
    let hash = operation_hash(command)?;

    context
        .ledger()
        .execute_once(request_id, &hash, || async {
            context
                .call_external("accounting-gateway", || gateway.post(command))
                .await
                .map_err(|e| anyhow::anyhow!("posting failed: {}", e))
        })
        .await
}

#[tokio::test]
async fn test_redelivered_request_posts_once() -> Result<()> {
    let context = ResilienceContext::bootstrap(config()).await?;
    let gateway = Gateway::new(1);
    let command = PostInvoice {
        invoice_id: 1001,
        amount_cents: 125_000,
    };

    let first = post_invoice(&context, &gateway, "msg-1001", &command).await?;
    let redelivered = post_invoice(&context, &gateway, "msg-1001", &command).await?;

    assert_eq!(first, redelivered);
    assert_eq!(first.journal_entry, "JE-1001");
    // One failure retried, then success; the redelivery never reached the gateway
    assert_eq!(gateway.calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        context.breaker("accounting-gateway").state().await,
        CircuitState::Closed
    );
    Ok(())
}

#[tokio::test]
async fn test_retrying_request_does_not_stall_other_requests() -> Result<()> {
    let mut config = config();
    config.retry.max_retries = 3;
    config.retry.base_delay = Duration::from_millis(100);
    config.circuit_breaker.failure_threshold = 10;
    let context = ResilienceContext::bootstrap(config).await?;

    let flaky = Gateway::new(u32::MAX);
    let healthy = Gateway::new(0);
    let command = PostInvoice {
        invoice_id: 42,
        amount_cents: 9_900,
    };

    let stuck = post_invoice(&context, &flaky, "msg-stuck", &command);
    let prompt = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let started = std::time::Instant::now();
        let receipt = post_invoice(&context, &healthy, "msg-prompt", &command).await;
        (receipt, started.elapsed())
    };

    let (stuck, (receipt, waited)) = tokio::join!(stuck, prompt);

    assert!(stuck.is_err());
    assert_eq!(receipt?.journal_entry, "JE-42");
    assert!(waited < Duration::from_millis(50), "request waited {:?}", waited);
    Ok(())
}

#[tokio::test]
async fn test_same_request_id_with_different_payload_runs_again() -> Result<()> {
    let context = ResilienceContext::bootstrap(config()).await?;
    let gateway = Gateway::new(0);

    let original = PostInvoice {
        invoice_id: 7,
        amount_cents: 100,
    };
    let amended = PostInvoice {
        invoice_id: 7,
        amount_cents: 250,
    };

    post_invoice(&context, &gateway, "msg-7", &original).await?;
    post_invoice(&context, &gateway, "msg-7", &amended).await?;
    assert_eq!(gateway.calls.load(Ordering::SeqCst), 2);

    // The amended payload replaced the original under the default policy
    let ledger = context.ledger();
    assert!(ledger.is_duplicate("msg-7", &operation_hash(&amended)?).await?);
    assert!(!ledger.is_duplicate("msg-7", &operation_hash(&original)?).await?);
    Ok(())
}

#[tokio::test]
async fn test_unavailable_gateway_fails_fast_and_is_not_recorded() -> Result<()> {
    let context = ResilienceContext::bootstrap(config()).await?;
    let gateway = Gateway::new(u32::MAX);
    let command = PostInvoice {
        invoice_id: 9,
        amount_cents: 1,
    };

    // Every attempt counts against the breaker; the second failure opens it
    // and ends the first request's retries
    let first = post_invoice(&context, &gateway, "msg-a", &command).await;
    assert!(first.unwrap_err().to_string().contains("503 service unavailable"));
    assert_eq!(gateway.calls.load(Ordering::SeqCst), 2);

    let second = post_invoice(&context, &gateway, "msg-b", &command).await;
    assert!(second.unwrap_err().to_string().contains("is open"));
    assert_eq!(gateway.calls.load(Ordering::SeqCst), 2);

    let rejected = context
        .call_external("accounting-gateway", || gateway.post(&command))
        .await;
    assert!(matches!(rejected, Err(CircuitBreakerError::Open { .. })));
    assert_eq!(gateway.calls.load(Ordering::SeqCst), 2);

    assert!(!context.ledger().is_duplicate("msg-a", &operation_hash(&command)?).await?);
    Ok(())
}
