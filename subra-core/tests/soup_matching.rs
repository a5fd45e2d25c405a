use serde_json::json;
use subra_common::prelude::*;
use subra_core::{
    ChannelId, ClosureId, ClosureRecord, Comm, CommGroup, Continuation, ExecutionQueue,
};

fn init_logs() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .is_test(true)
        .try_init();
}

fn new_closure(queue: &mut ExecutionQueue, kind: &str) -> ClosureId {
    queue.register_closure(ClosureRecord::new(kind, json!({})))
}

#[test]
fn matching_is_exactly_once() {
    init_logs();
    let mut queue = ExecutionQueue::new();
    let transfer = queue.new_channel("Transfer", Some("order transfer"));
    let waiter = new_closure(&mut queue, "transfer-wait");

    queue
        .add_receive(transfer, waiter, false)
        .expect("receive failed");
    assert!(!queue.has_reactions());

    queue
        .add_send(transfer, "deliver", vec![json!(42)])
        .expect("send failed");
    assert_eq!(queue.reaction_count(), 1);

    let reaction = queue.dequeue_reaction().expect("dequeue failed");
    assert_eq!(reaction.closure, waiter);
    assert_eq!(reaction.method.as_str(), "deliver");
    assert_eq!(reaction.args, vec![json!(42)]);

    // the receiver was consumed; another send parks instead of matching
    queue
        .add_send(transfer, "deliver", vec![json!(43)])
        .expect("send failed");
    assert!(!queue.has_reactions());
    assert_eq!(queue.pending_send_count(), 1);
    assert!(!queue.is_complete());
}

#[test]
fn send_parks_until_receiver_arrives() {
    let mut queue = ExecutionQueue::new();
    let orders = queue.new_channel("Orders", None);
    queue
        .add_send(orders, "place", vec![json!({"sku": "A-17"})])
        .expect("send failed");
    assert!(!queue.has_reactions());

    let waiter = new_closure(&mut queue, "order-wait");
    queue
        .add_receive(orders, waiter, false)
        .expect("receive failed");
    assert_eq!(queue.reaction_count(), 1);

    let reaction = queue.dequeue_reaction().expect("dequeue failed");
    assert_eq!(reaction.method.as_str(), "place");
    assert_eq!(reaction.args, vec![json!({"sku": "A-17"})]);
    assert!(queue.is_complete());
}

#[test]
fn earliest_registered_receiver_wins() {
    let mut queue = ExecutionQueue::new();
    let channel = queue.new_channel("Work", None);
    let first = new_closure(&mut queue, "worker");
    let second = new_closure(&mut queue, "worker");

    queue.add_receive(channel, first, false).expect("receive failed");
    queue
        .add_receive(channel, second, false)
        .expect("receive failed");
    queue
        .add_send(channel, "work", vec![json!(1)])
        .expect("send failed");
    queue
        .add_send(channel, "work", vec![json!(2)])
        .expect("send failed");

    let r1 = queue.dequeue_reaction().expect("dequeue failed");
    let r2 = queue.dequeue_reaction().expect("dequeue failed");
    assert_eq!(r1.closure, first);
    assert_eq!(r1.args, vec![json!(1)]);
    assert_eq!(r2.closure, second);
    assert_eq!(r2.args, vec![json!(2)]);
}

#[test]
fn pick_group_is_wholly_consumed_by_first_match() {
    init_logs();
    let mut queue = ExecutionQueue::new();
    let on_approve = queue.new_channel("Approval", None);
    let on_reject = queue.new_channel("Rejection", None);
    let on_alarm = queue.new_channel("Alarm", None);
    let pick = new_closure(&mut queue, "pick-wait");

    let mut group = CommGroup::new(false);
    group.add(Comm::Recv {
        channel: on_approve,
        closure: pick,
    });
    group.add(Comm::Recv {
        channel: on_reject,
        closure: pick,
    });
    group.add(Comm::Recv {
        channel: on_alarm,
        closure: pick,
    });
    queue.add_group(group).expect("group failed");
    assert_eq!(queue.pending_receive_count(), 3);

    queue
        .add_send(on_reject, "rejected", vec![json!("too expensive")])
        .expect("send failed");
    assert_eq!(queue.reaction_count(), 1);
    assert_eq!(queue.pending_receive_count(), 0);

    // the untaken branches are gone; their channels just park new sends
    queue
        .add_send(on_approve, "approved", vec![])
        .expect("send failed");
    queue.add_send(on_alarm, "timeout", vec![]).expect("send failed");
    assert_eq!(queue.reaction_count(), 1);
    assert_eq!(queue.pending_send_count(), 2);
}

#[test]
fn replicated_receiver_survives_its_matches() {
    let mut queue = ExecutionQueue::new();
    let terminate = queue.new_channel("Termination", Some("always-on signal"));
    let guard = new_closure(&mut queue, "termination-guard");

    queue
        .add_receive(terminate, guard, true)
        .expect("receive failed");

    queue.add_send(terminate, "terminate", vec![]).expect("send failed");
    queue.add_send(terminate, "terminate", vec![]).expect("send failed");
    assert_eq!(queue.reaction_count(), 2);
    assert_eq!(queue.pending_receive_count(), 1);

    let r1 = queue.dequeue_reaction().expect("dequeue failed");
    let r2 = queue.dequeue_reaction().expect("dequeue failed");
    assert_eq!(r1.closure, guard);
    assert_eq!(r2.closure, guard);
}

#[test]
fn reactions_dequeue_in_enqueue_order() {
    let mut queue = ExecutionQueue::new();
    let closure = new_closure(&mut queue, "step");
    queue.enqueue_reaction(Continuation::new(closure, "first", vec![]));

    let channel = queue.new_channel("Step", None);
    queue.add_receive(channel, closure, false).expect("receive failed");
    queue.add_send(channel, "second", vec![]).expect("send failed");

    queue.enqueue_reaction(Continuation::new(closure, "third", vec![]));

    let methods: Vec<String> = (0..3)
        .map(|_| {
            queue
                .dequeue_reaction()
                .expect("dequeue failed")
                .method
                .to_string()
        })
        .collect();
    assert_eq!(methods, vec!["first", "second", "third"]);
}

#[test]
fn dequeue_on_empty_queue_fails() {
    let mut queue = ExecutionQueue::new();
    let err = queue.dequeue_reaction().expect_err("expected EmptyQueue");
    assert_eq!(err.code(), ErrorCode::empty_queue_code());
}

#[test]
fn channel_with_replicated_send_rejects_another_send() {
    let mut queue = ExecutionQueue::new();
    let channel = queue.new_channel("Heartbeat", None);

    let mut group = CommGroup::new(true);
    group.add(Comm::Send {
        channel,
        method: "beat".into(),
        args: vec![],
    });
    queue.add_group(group).expect("group failed");

    let err = queue
        .add_send(channel, "beat", vec![])
        .expect_err("expected IllegalState");
    assert_eq!(err.code(), ErrorCode::illegal_state_code());
}

#[test]
fn unknown_channel_is_rejected() {
    let mut queue = ExecutionQueue::new();
    let err = queue
        .add_send(ChannelId(99), "nope", vec![])
        .expect_err("expected IllegalArgument");
    assert_eq!(err.code(), ErrorCode::illegal_argument_code());
}
