//! Topic layout and MQTT wildcard matching
//!
//! Every node owns a small namespace below the bridge prefix:
//! ```text
//! <prefix>/<component>/<node>/<command>          inbound commands
//! <prefix>/<component>/<node>/state/<property>   outbound state
//! <prefix>/<component>/<node>/meta/config        announcement
//! ```
//!
//! Filters follow MQTT rules:
//! - `+` matches exactly one level
//! - `#` matches any number of levels and must be the last level
//! - wildcards never match a first level that starts with `$`

use crate::{
    Error, Node, Result, ANNOUNCE_SEGMENT, DEFAULT_TOPIC_PREFIX, META_SEGMENT, STATE_SEGMENT,
};

/// A validated MQTT topic filter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicFilter {
    raw: String,
}

impl TopicFilter {
    /// Parse and validate a topic filter
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::InvalidTopic("empty filter".to_string()));
        }

        let levels: Vec<&str> = s.split('/').collect();
        for (i, level) in levels.iter().enumerate() {
            match *level {
                "#" if i != levels.len() - 1 => {
                    return Err(Error::InvalidTopic(format!(
                        "'#' must be the last level: {}",
                        s
                    )));
                }
                "#" | "+" => {}
                other if other.contains('#') || other.contains('+') => {
                    return Err(Error::InvalidTopic(format!(
                        "wildcard must occupy a whole level: {}",
                        s
                    )));
                }
                _ => {}
            }
        }

        Ok(Self { raw: s.to_string() })
    }

    /// Get the raw filter string
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Check if this filter contains wildcards
    pub fn is_wildcard(&self) -> bool {
        self.raw.split('/').any(|l| l == "+" || l == "#")
    }

    /// Check if a concrete topic matches this filter
    pub fn matches(&self, topic: &str) -> bool {
        matches(&self.raw, topic)
    }
}

impl std::fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl TryFrom<&str> for TopicFilter {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        TopicFilter::parse(s)
    }
}

/// Match a concrete topic against a filter string
pub fn matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut topic_levels = topic.split('/');
    for pat in filter.split('/') {
        if pat == "#" {
            return true;
        }
        match topic_levels.next() {
            Some(level) if pat == "+" || pat == level => {}
            _ => return false,
        }
    }

    topic_levels.next().is_none()
}

/// Validate a single topic level (component or node id)
pub fn validate_level(level: &str) -> bool {
    !level.is_empty() && !level.contains(['/', '+', '#'])
}

/// Topic layout for a bridge instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    prefix: String,
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_TOPIC_PREFIX.to_string(),
        }
    }
}

impl TopicScheme {
    /// Create a scheme below `prefix` (may itself span several levels)
    pub fn new(prefix: impl Into<String>) -> Result<Self> {
        let prefix = prefix.into().trim_end_matches('/').to_string();
        if prefix.is_empty() || prefix.split('/').any(|l| !validate_level(l)) {
            return Err(Error::InvalidTopic(format!("invalid prefix: {:?}", prefix)));
        }
        Ok(Self { prefix })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Base topic of a node: `<prefix>/<component>/<node>`
    pub fn node_base(&self, component: &str, node: &Node) -> String {
        format!("{}/{}/{}", self.prefix, component, node.id())
    }

    /// Single-level filter covering every command of a node
    pub fn command_filter(&self, component: &str, node: &Node) -> Result<TopicFilter> {
        if !validate_level(component) {
            return Err(Error::InvalidTopic(format!(
                "invalid component: {:?}",
                component
            )));
        }
        TopicFilter::parse(&format!("{}/+", self.node_base(component, node)))
    }

    pub fn command_topic(&self, component: &str, node: &Node, command: &str) -> String {
        format!("{}/{}", self.node_base(component, node), command)
    }

    pub fn state_topic(&self, component: &str, node: &Node, property: &str) -> String {
        format!(
            "{}/{}/{}",
            self.node_base(component, node),
            STATE_SEGMENT,
            property
        )
    }

    pub fn announce_topic(&self, component: &str, node: &Node) -> String {
        format!(
            "{}/{}/{}",
            self.node_base(component, node),
            META_SEGMENT,
            ANNOUNCE_SEGMENT
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_level_wildcard() {
        assert!(matches("home/+/lamp/+", "home/light/lamp/set"));
        assert!(!matches("home/+/lamp/+", "home/light/lamp/state/power"));
        assert!(!matches("home/+/lamp/+", "home/light/lamp"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        assert!(matches("home/#", "home/light/lamp/state/power"));
        assert!(matches("home/#", "home"));
        assert!(!matches("home/#", "office/light"));
    }

    #[test]
    fn test_dollar_topics_hidden_from_wildcards() {
        assert!(!matches("#", "$SYS/broker/uptime"));
        assert!(!matches("+/broker/uptime", "$SYS/broker/uptime"));
        assert!(matches("$SYS/#", "$SYS/broker/uptime"));
    }

    #[test]
    fn test_invalid_filters() {
        assert!(TopicFilter::parse("").is_err());
        assert!(TopicFilter::parse("home/#/lamp").is_err());
        assert!(TopicFilter::parse("home/la+mp").is_err());
        assert!(TopicFilter::parse("home/+/#").is_ok());
    }
}
