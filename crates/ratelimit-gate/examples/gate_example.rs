//! Admission gate walkthrough: a fresh key hitting its RPM limit, then a
//! per-model override, then the reconciliation round trip.
//!
//! Run with: cargo run --example gate_example -p ratelimit-gate

use ratelimit_gate::{CallOutcome, GateConfig, GateFacade, PrincipalAuth, RequestContext};

#[tokio::main]
async fn main() {
    let gate = GateFacade::new(
        GateConfig::builder()
            .name("demo-gate")
            .on_event(|event| println!("  event: {event:?}"))
            .build(),
    );

    println!("=== Rate Limit Gate Demo ===\n");

    println!("1. Admitting under a tight RPM limit");
    let principal = PrincipalAuth::new("sk-demo")
        .with_max_parallel_requests(2)
        .with_tpm_limit(1000)
        .with_rpm_limit(2);

    for attempt in 1..=3 {
        let mut ctx = RequestContext::new("completion").with_model("gpt-4");
        match gate.pre_call_hook(&principal, &mut ctx).await {
            Ok(()) => {
                println!("   attempt {attempt}: admitted");
                gate.on_log_success(&principal, &ctx, CallOutcome { total_tokens: 50 })
                    .await;
            }
            Err(rejection) => {
                println!(
                    "   attempt {attempt}: rejected ({}, retry after {:.1}s)",
                    rejection.reason, rejection.retry_after_seconds
                );
            }
        }
    }

    println!("\n2. A per-model override on top of the api_key scope");
    let model_principal = PrincipalAuth::new("sk-model-demo").with_model_rpm_limit("gpt-4", 1);
    let mut first = RequestContext::new("completion").with_model("gpt-4");
    let mut second = RequestContext::new("completion").with_model("gpt-4");
    println!("   gpt-4 #1: {:?}", gate.pre_call_hook(&model_principal, &mut first).await.is_ok());
    println!("   gpt-4 #2: {:?}", gate.pre_call_hook(&model_principal, &mut second).await.is_ok());
}
