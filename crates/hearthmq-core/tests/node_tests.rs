//! Node tests
//!
//! Tests for observable nodes including:
//! - Property storage
//! - Synchronous observer notification
//! - Observer removal
//! - Node id validation

use hearthmq_core::{Error, Node, Value};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[test]
fn test_node_creation() {
    let node = Node::new("lamp", "Living Room Lamp").unwrap();
    assert_eq!(node.id(), "lamp");
    assert_eq!(node.name(), "Living Room Lamp");
    assert!(node.get("power").is_none());
    assert_eq!(node.observer_count(), 0);
}

#[test]
fn test_invalid_node_ids() {
    for id in ["", "a/b", "a+", "#"] {
        assert!(
            matches!(Node::new(id, "x"), Err(Error::InvalidNodeId(_))),
            "id {:?} should be rejected",
            id
        );
    }
}

#[test]
fn test_initial_properties() {
    let node = Node::with_properties(
        "lamp",
        "Lamp",
        [("power", json!(false)), ("level", json!(10))],
    )
    .unwrap();

    assert_eq!(node.get("power"), Some(json!(false)));
    assert_eq!(node.property_names(), vec!["level", "power"]);
    assert_eq!(node.snapshot(), json!({"power": false, "level": 10}));
}

#[test]
fn test_observer_receives_node_property_and_value() {
    let node = Node::new("lamp", "Lamp").unwrap();
    let seen: Arc<Mutex<Vec<(String, String, Value)>>> = Arc::new(Mutex::new(Vec::new()));

    let seen_clone = seen.clone();
    node.subscribe(move |node, property, value| {
        seen_clone
            .lock()
            .push((node.id().to_string(), property.to_string(), value.clone()));
    });

    node.set("power", true);
    node.set("level", 42);

    let seen = seen.lock();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], ("lamp".to_string(), "power".to_string(), json!(true)));
    assert_eq!(seen[1], ("lamp".to_string(), "level".to_string(), json!(42)));
}

#[test]
fn test_observer_runs_before_set_returns() {
    let node = Node::new("lamp", "Lamp").unwrap();
    let count = Arc::new(AtomicU32::new(0));

    let count_clone = count.clone();
    node.subscribe(move |_, _, _| {
        count_clone.fetch_add(1, Ordering::SeqCst);
    });

    node.set("power", true);
    assert_eq!(count.load(Ordering::SeqCst), 1);
    node.set("power", true);
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[test]
fn test_observer_can_read_node() {
    let node = Node::new("lamp", "Lamp").unwrap();
    let observed = Arc::new(Mutex::new(None));

    let observed_clone = observed.clone();
    node.subscribe(move |node, property, _| {
        *observed_clone.lock() = node.get(property);
    });

    node.set("level", 7);
    assert_eq!(*observed.lock(), Some(json!(7)));
}

#[test]
fn test_multiple_observers_in_order() {
    let node = Node::new("lamp", "Lamp").unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    for i in 0..3 {
        let order = order.clone();
        node.subscribe(move |_, _, _| order.lock().push(i));
    }

    node.set("power", false);
    assert_eq!(*order.lock(), vec![0, 1, 2]);
}

#[test]
fn test_unsubscribe() {
    let node = Node::new("lamp", "Lamp").unwrap();
    let count = Arc::new(AtomicU32::new(0));

    let count_clone = count.clone();
    let id = node.subscribe(move |_, _, _| {
        count_clone.fetch_add(1, Ordering::SeqCst);
    });

    node.set("power", true);
    assert!(node.unsubscribe(id));
    assert!(!node.unsubscribe(id));
    node.set("power", false);

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(node.get("power"), Some(json!(false)));
}

#[test]
fn test_clones_share_state() {
    let node = Node::new("lamp", "Lamp").unwrap();
    let other = node.clone();

    other.set("power", true);
    assert_eq!(node.get("power"), Some(json!(true)));
    assert!(node.ptr_eq(&other));
    assert!(!node.ptr_eq(&Node::new("lamp", "Lamp").unwrap()));
}
