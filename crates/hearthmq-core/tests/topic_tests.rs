//! Topic scheme tests

use hearthmq_core::{Node, TopicFilter, TopicScheme};

fn lamp() -> Node {
    Node::new("lamp", "Lamp").unwrap()
}

#[test]
fn test_default_scheme() {
    let scheme = TopicScheme::default();
    let node = lamp();

    assert_eq!(scheme.prefix(), "hearthmq");
    assert_eq!(scheme.node_base("light", &node), "hearthmq/light/lamp");
    assert_eq!(
        scheme.command_topic("light", &node, "set"),
        "hearthmq/light/lamp/set"
    );
    assert_eq!(
        scheme.state_topic("light", &node, "power"),
        "hearthmq/light/lamp/state/power"
    );
    assert_eq!(
        scheme.announce_topic("light", &node),
        "hearthmq/light/lamp/meta/config"
    );
}

#[test]
fn test_custom_prefix() {
    let scheme = TopicScheme::new("home/bridge/").unwrap();
    assert_eq!(scheme.prefix(), "home/bridge");

    assert!(TopicScheme::new("").is_err());
    assert!(TopicScheme::new("home/#").is_err());
    assert!(TopicScheme::new("home//bridge").is_err());
}

#[test]
fn test_command_filter_covers_commands_only() {
    let scheme = TopicScheme::default();
    let node = lamp();
    let filter = scheme.command_filter("light", &node).unwrap();

    assert_eq!(filter.as_str(), "hearthmq/light/lamp/+");
    assert!(filter.is_wildcard());
    assert!(filter.matches(&scheme.command_topic("light", &node, "set")));
    assert!(filter.matches(&scheme.command_topic("light", &node, "get")));
    assert!(!filter.matches(&scheme.state_topic("light", &node, "power")));
    assert!(!filter.matches(&scheme.announce_topic("light", &node)));
    assert!(!filter.matches("hearthmq/light/other/set"));
    assert!(!filter.matches("hearthmq/switch/lamp/set"));
}

#[test]
fn test_command_filter_rejects_bad_component() {
    let scheme = TopicScheme::default();
    assert!(scheme.command_filter("li/ght", &lamp()).is_err());
    assert!(scheme.command_filter("", &lamp()).is_err());
}

#[test]
fn test_exact_filter() {
    let filter = TopicFilter::parse("hearthmq/light/lamp/set").unwrap();
    assert!(!filter.is_wildcard());
    assert!(filter.matches("hearthmq/light/lamp/set"));
    assert!(!filter.matches("hearthmq/light/lamp/get"));
    assert_eq!(filter.to_string(), "hearthmq/light/lamp/set");
}

#[test]
fn test_filter_try_from_str() {
    let filter = TopicFilter::try_from("hearthmq/+/lamp/#").unwrap();
    assert!(filter.is_wildcard());
    assert!(filter.matches("hearthmq/light/lamp/state/power"));

    assert!(TopicFilter::try_from("hearthmq/#/lamp").is_err());
}
