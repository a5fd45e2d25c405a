use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use serde_json::json;
use subra_common::prelude::*;
use subra_core::{
    AckType, ExchangeState, ExchangeStatus, FailureType, MessageExchangeContext,
    PartnerRoleMessageExchange,
};

/// Transport stub that answers while the engine is still inside the
/// invocation call.
struct ImmediateTransport;

impl MessageExchangeContext for ImmediateTransport {
    fn invoke_partner(&self, mex: &Arc<PartnerRoleMessageExchange>) -> SubResult<()> {
        mex.reply(json!({"ok": true}))
    }
}

fn init_logs() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .is_test(true)
        .try_init();
}

#[test]
fn reply_acks_and_wait_returns_immediately() {
    init_logs();
    let mex = PartnerRoleMessageExchange::new("mex-1", "getQuote");
    mex.reply(json!({"price": 10})).expect("reply failed");

    assert!(mex.wait_for_ack(Duration::from_millis(0)));
    assert!(mex.wait_for_ack_default());
    assert_eq!(mex.status(), ExchangeStatus::Acked);
    assert_eq!(mex.ack_type(), Some(AckType::Response));
    assert_eq!(mex.response(), Some(json!({"price": 10})));
}

#[test]
fn held_reply_blocks_until_released_then_succeeds_once() {
    init_logs();
    let mex = Arc::new(PartnerRoleMessageExchange::new("mex-2", "submitOrder"));
    let resumed = Arc::new(AtomicBool::new(false));
    {
        let resumed = resumed.clone();
        mex.set_resume_hook(move || resumed.store(true, Ordering::SeqCst));
    }

    mex.set_state(ExchangeState::Held);
    let worker = {
        let mex = mex.clone();
        thread::spawn(move || mex.reply(json!("done")))
    };

    // the reply is parked on the held exchange
    thread::sleep(Duration::from_millis(50));
    assert_eq!(mex.status(), ExchangeStatus::Request);

    mex.set_state(ExchangeState::Async);
    worker.join().expect("worker panicked").expect("reply failed");
    assert_eq!(mex.status(), ExchangeStatus::Acked);
    assert!(resumed.load(Ordering::SeqCst));

    // duplicate-reply protection
    let err = mex.reply(json!("again")).expect_err("expected status error");
    assert_eq!(err.code(), ErrorCode::invalid_exchange_status_code());
}

#[test]
fn dead_exchange_rejects_every_reply() {
    let mex = PartnerRoleMessageExchange::new("mex-3", "getQuote");
    mex.set_state(ExchangeState::Dead);

    let err = mex.reply(json!(1)).expect_err("expected dead error");
    assert_eq!(err.code(), ErrorCode::exchange_dead_code());
    let err = mex
        .reply_with_fault("outOfStock", json!({}))
        .expect_err("expected dead error");
    assert_eq!(err.code(), ErrorCode::exchange_dead_code());
    let err = mex
        .reply_with_failure(FailureType::Aborted, "gone", None)
        .expect_err("expected dead error");
    assert_eq!(err.code(), ErrorCode::exchange_dead_code());
}

#[test]
fn wait_for_ack_times_out_without_a_reply() {
    let mex = PartnerRoleMessageExchange::new("mex-4", "getQuote");
    let started = Instant::now();
    assert!(!mex.wait_for_ack(Duration::from_millis(100)));
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(mex.status(), ExchangeStatus::Request);
}

#[test]
fn async_reply_fires_the_resume_hook() {
    let mex = Arc::new(PartnerRoleMessageExchange::new("mex-5", "getQuote"));
    let resumed = Arc::new(AtomicBool::new(false));
    {
        let resumed = resumed.clone();
        mex.set_resume_hook(move || resumed.store(true, Ordering::SeqCst));
    }
    mex.set_state(ExchangeState::Async);

    let replier = {
        let mex = mex.clone();
        thread::spawn(move || mex.reply(json!({"price": 12})))
    };
    assert!(mex.wait_for_ack(Duration::from_secs(5)));
    replier.join().expect("replier panicked").expect("reply failed");

    assert!(resumed.load(Ordering::SeqCst));
    assert_eq!(mex.response(), Some(json!({"price": 12})));
}

#[test]
fn one_way_ack_does_not_resume_the_instance() {
    let mex = PartnerRoleMessageExchange::new("mex-6", "fireAndForget");
    let resumed = Arc::new(AtomicBool::new(false));
    {
        let resumed = resumed.clone();
        mex.set_resume_hook(move || resumed.store(true, Ordering::SeqCst));
    }
    mex.set_state(ExchangeState::Async);

    mex.reply_one_way_ok().expect("ack failed");
    assert_eq!(mex.ack_type(), Some(AckType::OneWay));
    assert!(!resumed.load(Ordering::SeqCst));
}

#[test]
fn synchronous_invocation_acks_on_the_same_call_stack() {
    let mex = Arc::new(PartnerRoleMessageExchange::new("mex-9", "ping"));
    ImmediateTransport.invoke_partner(&mex).expect("invoke failed");

    assert!(mex.wait_for_ack(Duration::from_millis(0)));
    assert_eq!(mex.response(), Some(json!({"ok": true})));

    // the engine discards the exchange; the transport may not touch it again
    mex.set_state(ExchangeState::Dead);
    let err = mex.reply(json!(0)).expect_err("expected dead error");
    assert_eq!(err.code(), ErrorCode::exchange_dead_code());
}

#[test]
fn fault_and_failure_replies_record_their_outcome() {
    let mex = PartnerRoleMessageExchange::new("mex-7", "submitOrder");
    mex.reply_with_fault("outOfStock", json!({"sku": "A-17"}))
        .expect("fault reply failed");
    assert_eq!(mex.ack_type(), Some(AckType::Fault));
    assert_eq!(mex.fault().as_deref(), Some("outOfStock"));
    assert_eq!(mex.response(), Some(json!({"sku": "A-17"})));

    let mex = PartnerRoleMessageExchange::new("mex-8", "submitOrder");
    mex.reply_with_failure(
        FailureType::CommunicationError,
        "connection refused",
        Some(json!({"host": "partner.example.com"})),
    )
    .expect("failure reply failed");
    assert_eq!(mex.ack_type(), Some(AckType::Failure));
    let failure = mex.failure().expect("failure missing");
    assert_eq!(failure.kind, FailureType::CommunicationError);
    assert_eq!(failure.description.as_str(), "connection refused");
}
