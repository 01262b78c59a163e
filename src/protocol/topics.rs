//! Topic layout and device name validation for the aircon bridge
//!
//! All topics live below a configurable prefix:
//!
//! - `<prefix>/<device>/name` (retained identity)
//! - `<prefix>/<device>/<attribute>` (polled state)
//! - `<prefix>/<device>/<attribute>/set` (inbound commands)

use super::attributes::Attribute;
use thiserror::Error;

/// Suffix of inbound command topics
pub const SET_SUFFIX: &str = "set";
/// Topic segment of the retained identity message
pub const NAME_SEGMENT: &str = "name";

/// Normalize a topic prefix: no leading or trailing slashes, no empty levels
pub fn canonicalize_prefix(prefix: &str) -> String {
    prefix
        .split('/')
        .filter(|level| !level.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Device names become a single topic level, so they must not contain
/// level separators or wildcards
pub fn validate_device_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyDeviceName);
    }

    for ch in name.chars() {
        if matches!(ch, '/' | '+' | '#') || ch.is_control() {
            return Err(ValidationError::InvalidDeviceNameChar(ch));
        }
    }

    Ok(())
}

/// Validation errors for topic construction
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Device name cannot be empty")]
    EmptyDeviceName,
    #[error("Device name contains invalid character: '{0}'")]
    InvalidDeviceNameChar(char),
}

/// Builds and parses topics under one prefix
#[derive(Debug, Clone, PartialEq)]
pub struct TopicBuilder {
    prefix: String,
}

impl TopicBuilder {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: canonicalize_prefix(prefix),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn join(&self, rest: &[&str]) -> String {
        let mut levels = Vec::with_capacity(rest.len() + 1);
        if !self.prefix.is_empty() {
            levels.push(self.prefix.as_str());
        }
        levels.extend_from_slice(rest);
        levels.join("/")
    }

    /// Retained identity topic: `<prefix>/<device>/name`
    pub fn name_topic(&self, device: &str) -> String {
        self.join(&[device, NAME_SEGMENT])
    }

    /// State topic: `<prefix>/<device>/<attribute>`
    pub fn attribute_topic(&self, device: &str, attribute: Attribute) -> String {
        self.join(&[device, attribute.topic_name()])
    }

    /// Command topic: `<prefix>/<device>/<attribute>/set`
    pub fn command_topic(&self, device: &str, attribute: &str) -> String {
        self.join(&[device, attribute, SET_SUFFIX])
    }

    /// Subscription filter matching every command topic
    pub fn command_filter(&self) -> String {
        self.join(&["+", "+", SET_SUFFIX])
    }

    /// Split a command topic into `(device, attribute)`
    ///
    /// Returns `None` for topics outside the prefix or not shaped like
    /// `<prefix>/<device>/<attribute>/set`.
    pub fn parse_command_topic<'a>(&self, topic: &'a str) -> Option<(&'a str, &'a str)> {
        let rest = if self.prefix.is_empty() {
            topic
        } else {
            topic.strip_prefix(self.prefix.as_str())?.strip_prefix('/')?
        };

        let mut levels = rest.split('/');
        let device = levels.next()?;
        let attribute = levels.next()?;
        let suffix = levels.next()?;

        if levels.next().is_some()
            || suffix != SET_SUFFIX
            || device.is_empty()
            || attribute.is_empty()
        {
            return None;
        }

        Some((device, attribute))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn canonicalize_prefix_is_idempotent(prefix in ".*") {
            let first = canonicalize_prefix(&prefix);
            let second = canonicalize_prefix(&first);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn canonicalize_prefix_has_no_outer_or_double_slashes(prefix in "[a-z/]*") {
            let result = canonicalize_prefix(&prefix);
            prop_assert!(!result.starts_with('/'));
            prop_assert!(!result.ends_with('/'));
            prop_assert!(!result.contains("//"));
        }

        #[test]
        fn command_topics_parse_back(device in "[A-Za-z0-9 _-]{1,24}", attribute in "[a-z_]{1,20}") {
            let topics = TopicBuilder::new("home/klima");
            let topic = topics.command_topic(&device, &attribute);
            prop_assert_eq!(
                topics.parse_command_topic(&topic),
                Some((device.as_str(), attribute.as_str()))
            );
        }
    }

    #[test]
    fn test_prefix_examples() {
        assert_eq!(canonicalize_prefix("klima/"), "klima");
        assert_eq!(canonicalize_prefix("/home//klima/"), "home/klima");
        assert_eq!(canonicalize_prefix(""), "");
    }

    #[test]
    fn test_topic_construction() {
        let topics = TopicBuilder::new("klima/");
        assert_eq!(topics.name_topic("Lounge"), "klima/Lounge/name");
        assert_eq!(
            topics.attribute_topic("Lounge", Attribute::PresetTemperature),
            "klima/Lounge/preset_temperatur"
        );
        assert_eq!(
            topics.command_topic("Lounge", "airflow"),
            "klima/Lounge/airflow/set"
        );
        assert_eq!(topics.command_filter(), "klima/+/+/set");
    }

    #[test]
    fn test_parse_command_topic() {
        let topics = TopicBuilder::new("prefix");

        assert_eq!(
            topics.parse_command_topic("prefix/Lounge/airflow/set"),
            Some(("Lounge", "airflow"))
        );
        assert_eq!(topics.parse_command_topic("prefix/Lounge/airflow"), None);
        assert_eq!(topics.parse_command_topic("prefix/Lounge/name"), None);
        assert_eq!(topics.parse_command_topic("other/Lounge/airflow/set"), None);
        assert_eq!(topics.parse_command_topic("prefixes/Lounge/airflow/set"), None);
        assert_eq!(
            topics.parse_command_topic("prefix/Lounge/airflow/set/extra"),
            None
        );
        assert_eq!(topics.parse_command_topic("prefix//airflow/set"), None);
    }

    #[test]
    fn test_empty_prefix() {
        let topics = TopicBuilder::new("");
        assert_eq!(topics.name_topic("Office"), "Office/name");
        assert_eq!(topics.command_filter(), "+/+/set");
        assert_eq!(
            topics.parse_command_topic("Office/wind_lr/set"),
            Some(("Office", "wind_lr"))
        );
    }

    #[test]
    fn test_device_name_validation() {
        assert!(validate_device_name("Lounge").is_ok());
        assert!(validate_device_name("Bed Room 2").is_ok());
        assert_eq!(validate_device_name(""), Err(ValidationError::EmptyDeviceName));
        assert_eq!(
            validate_device_name("a/b"),
            Err(ValidationError::InvalidDeviceNameChar('/'))
        );
        assert!(validate_device_name("a+b").is_err());
        assert!(validate_device_name("a#").is_err());
    }
}
