use serde_json::{json, Value};
use subra_common::prelude::*;
use subra_core::{
    ClosureRecord, Comm, CommGroup, Continuation, ExecutionQueue, InstanceStore,
    KeyedReplacementMap, MemoryInstanceStore, SharedValueResolver,
};

fn init_logs() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .is_test(true)
        .try_init();
}

#[test]
fn snapshot_resumes_mid_flight_state() {
    init_logs();
    let store = MemoryInstanceStore::new();

    let mut queue = ExecutionQueue::new();
    let on_quote = queue.new_channel("Quote", None);
    let on_alarm = queue.new_channel("Alarm", None);
    let pick = queue.register_closure(ClosureRecord::new("pick-wait", json!({"branch": 2})));
    let mut group = CommGroup::new(false);
    group.add(Comm::Recv {
        channel: on_quote,
        closure: pick,
    });
    group.add(Comm::Recv {
        channel: on_alarm,
        closure: pick,
    });
    queue.add_group(group).expect("group failed");

    let notify = queue.new_channel("Notify", None);
    queue
        .add_send(notify, "notify", vec![json!("shipment late")])
        .expect("send failed");

    let resume = queue.register_closure(ClosureRecord::new("resume", json!({})));
    queue.enqueue_reaction(Continuation::new(resume, "resume", vec![json!(7)]));
    queue.set_global_data(json!({"orm": {"entries": []}}));
    queue.cycle();
    queue.cycle();

    let bytes = queue.snapshot().expect("snapshot failed");
    store.save_snapshot("inst-1", &bytes).expect("save failed");

    let loaded = store
        .load_snapshot("inst-1")
        .expect("load failed")
        .expect("snapshot missing");
    let mut restored = ExecutionQueue::new();
    restored.restore(&loaded).expect("restore failed");

    assert_eq!(restored.current_cycle(), 2);
    assert_eq!(restored.global_data(), &json!({"orm": {"entries": []}}));

    // the parked reaction comes back first, in order
    let reaction = restored.dequeue_reaction().expect("dequeue failed");
    assert_eq!(reaction.method.as_str(), "resume");
    assert_eq!(reaction.args, vec![json!(7)]);

    // the pick is still armed; the first arrival takes it and cancels the rest
    restored
        .add_send(on_quote, "quoted", vec![json!(99)])
        .expect("send failed");
    assert_eq!(restored.reaction_count(), 1);
    restored.add_send(on_alarm, "timeout", vec![]).expect("send failed");
    assert_eq!(restored.reaction_count(), 1);

    // the parked send is still waiting for its receiver
    let listener = restored.register_closure(ClosureRecord::new("notify-wait", json!({})));
    restored
        .add_receive(notify, listener, false)
        .expect("receive failed");
    assert_eq!(restored.reaction_count(), 2);

    // the instance is done with the checkpoint
    store.delete_snapshot("inst-1").expect("delete failed");
    assert!(store
        .load_snapshot("inst-1")
        .expect("load failed")
        .is_none());
}

#[test]
fn export_keeps_idle_channel_alive_across_checkpoint() {
    let mut queue = ExecutionQueue::new();
    let response = queue.new_channel("InvokeResponse", None);
    let export = queue.create_export(response).expect("export failed");
    queue.new_channel("Scratch", None);

    let bytes = queue.snapshot().expect("snapshot failed");
    let mut restored = ExecutionQueue::new();
    restored.restore(&bytes).expect("restore failed");

    // the exported channel survived the checkpoint, the scratch one did not
    assert_eq!(restored.channel_count(), 1);
    assert!(!restored.is_complete());
    let resolved = restored.consume_export(&export).expect("consume failed");
    assert_eq!(resolved, response);
    assert!(restored.is_complete());
}

#[test]
fn corrupt_snapshot_leaves_live_soup_untouched() {
    let mut queue = ExecutionQueue::new();
    let channel = queue.new_channel("Work", None);
    let closure = queue.register_closure(ClosureRecord::new("worker", json!({})));
    queue.add_receive(channel, closure, false).expect("receive failed");
    queue.enqueue_reaction(Continuation::new(closure, "step", vec![]));

    let err = queue
        .restore(b"definitely not a soup snapshot")
        .expect_err("expected CorruptState");
    assert_eq!(err.code(), ErrorCode::corrupt_state_code());

    // restore is all-or-nothing; the live state is exactly as before
    assert_eq!(queue.channel_count(), 1);
    assert_eq!(queue.pending_receive_count(), 1);
    assert_eq!(queue.reaction_count(), 1);
}

#[test]
fn replacement_map_shrinks_checkpoints_and_rehydrates() {
    init_logs();
    let body: String = (0..2048u64)
        .map(|i| format!("{:x}", i.wrapping_mul(2654435761)))
        .collect();
    let definition = json!({"name": "order-process", "body": body});

    let build = |map: Option<Arc<KeyedReplacementMap>>| {
        let mut queue = ExecutionQueue::new();
        if let Some(map) = map {
            queue.set_replacement_map(map);
        }
        let channel = queue.new_channel("Work", None);
        let closure =
            queue.register_closure(ClosureRecord::new("scope", definition.clone()));
        queue
            .add_receive(channel, closure, false)
            .expect("receive failed");
        queue
    };

    let plain = build(None).snapshot().expect("snapshot failed");

    let mut map = KeyedReplacementMap::with_capacity(4);
    map.register("order-process-v1", definition.clone());
    let map = Arc::new(map);

    let mut queue = build(Some(map.clone()));
    let substituted = queue.snapshot().expect("snapshot failed");
    assert!(
        substituted.len() < plain.len(),
        "substituted snapshot ({} bytes) not smaller than plain ({} bytes)",
        substituted.len(),
        plain.len()
    );

    let mut restored = ExecutionQueue::new();
    restored.set_replacement_map(map);
    restored.restore(&substituted).expect("restore failed");

    // the closure state came back as the full shared value; the scope
    // closure is the second object the soup created (the channel is first)
    let state: Value = restored
        .closure(subra_core::ClosureId(2))
        .expect("closure missing")
        .state
        .clone();
    assert_eq!(state, definition);
}

#[test]
fn resolver_supplies_shared_values_on_restore() {
    struct DefStore(Value);

    impl SharedValueResolver for DefStore {
        fn resolve(&self, key: &str) -> Option<Value> {
            (key == "quote-process-v3").then(|| self.0.clone())
        }
    }

    let definition = json!({"name": "quote-process", "version": 3});

    // the writer holds the value in memory
    let mut writer_map = KeyedReplacementMap::with_capacity(4);
    writer_map.register("quote-process-v3", definition.clone());
    let mut queue = ExecutionQueue::new();
    queue.set_replacement_map(Arc::new(writer_map));
    let channel = queue.new_channel("Work", None);
    let closure = queue.register_closure(ClosureRecord::new("scope", definition.clone()));
    queue.add_receive(channel, closure, false).expect("receive failed");
    let bytes = queue.snapshot().expect("snapshot failed");

    // the reader only knows how to look definitions up
    let reader_map = KeyedReplacementMap::with_capacity(4)
        .with_resolver(Arc::new(DefStore(definition.clone())));
    let mut restored = ExecutionQueue::new();
    restored.set_replacement_map(Arc::new(reader_map));
    restored.restore(&bytes).expect("restore failed");

    let state = restored.closure(closure).expect("closure missing").state.clone();
    assert_eq!(state, definition);
}
