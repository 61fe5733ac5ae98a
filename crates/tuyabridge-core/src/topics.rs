//! Topic naming: `{base}/{identifier}/status` and `{base}/{identifier}/set`.

const STATUS_SUFFIX: &str = "status";
const COMMAND_SUFFIX: &str = "set";

/// Default base prefix for every bridge topic.
pub const DEFAULT_BASE_TOPIC: &str = "tuya";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    base: String,
}

impl TopicScheme {
    /// `base` may contain `/` (e.g. `home/tuya`); a trailing `/` is dropped.
    pub fn new(base: impl Into<String>) -> Self {
        let base: String = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn status_topic(&self, identifier: &str) -> String {
        format!("{}/{identifier}/{STATUS_SUFFIX}", self.base)
    }

    pub fn command_topic(&self, identifier: &str) -> String {
        format!("{}/{identifier}/{COMMAND_SUFFIX}", self.base)
    }

    /// Extract the identifier from a command topic.  Returns `None` unless
    /// the topic is exactly `{base}/{identifier}/set` with a non-empty,
    /// single-segment identifier.
    pub fn identifier_from_command_topic<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let rest = topic.strip_prefix(self.base.as_str())?.strip_prefix('/')?;
        let identifier = rest.strip_suffix(COMMAND_SUFFIX)?.strip_suffix('/')?;
        if identifier.is_empty() || identifier.contains('/') {
            return None;
        }
        Some(identifier)
    }
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_TOPIC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_status_and_command_topics() {
        let topics = TopicScheme::default();
        assert_eq!(topics.status_topic("kitchen_lamp"), "tuya/kitchen_lamp/status");
        assert_eq!(topics.command_topic("kitchen_lamp"), "tuya/kitchen_lamp/set");
    }

    #[test]
    fn parses_command_topic() {
        let topics = TopicScheme::default();
        assert_eq!(
            topics.identifier_from_command_topic("tuya/kitchen_lamp/set"),
            Some("kitchen_lamp")
        );
    }

    #[test]
    fn rejects_malformed_command_topics() {
        let topics = TopicScheme::default();
        for topic in [
            "tuya/kitchen_lamp/status",
            "tuya//set",
            "tuya/a/b/set",
            "other/kitchen_lamp/set",
            "tuyax/kitchen_lamp/set",
            "tuya/kitchen_lamp/set/extra",
            "tuya",
        ] {
            assert_eq!(topics.identifier_from_command_topic(topic), None, "{topic}");
        }
    }

    #[test]
    fn multi_segment_base() {
        let topics = TopicScheme::new("home/tuya/");
        assert_eq!(topics.base(), "home/tuya");
        assert_eq!(topics.command_topic("plug"), "home/tuya/plug/set");
        assert_eq!(
            topics.identifier_from_command_topic("home/tuya/plug/set"),
            Some("plug")
        );
    }
}
