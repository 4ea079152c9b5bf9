//! MQTT topic filter matching and smart-home topic construction
//!
//! Patterns are `/`-delimited. A `+` level matches exactly one topic level and
//! a `#` level matches its own level plus everything below it. Patterns are
//! never validated up front: a malformed filter simply matches nothing, or
//! matches broadly, according to the walk below.

/// Single-level wildcard
pub const SINGLE_LEVEL_WILDCARD: &str = "+";
/// Multi-level wildcard
pub const MULTI_LEVEL_WILDCARD: &str = "#";

/// Check whether a subscription `pattern` matches a concrete `topic`.
///
/// `#` only matches when the topic actually has a level at the wildcard's
/// position, so `a/#` matches `a/b` and `a/` but not `a`.
///
/// # Examples
/// ```
/// use mqtt_ws_bridge::protocol::topic_matches;
///
/// assert!(topic_matches("smarthome/+/light", "smarthome/room_1_left/light"));
/// assert!(topic_matches("smarthome/#", "smarthome/room_1_left/light"));
/// assert!(!topic_matches("smarthome/#", "smarthome"));
/// ```
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    if pattern == topic {
        return true;
    }

    let pattern_levels: Vec<&str> = pattern.split('/').collect();
    let topic_levels: Vec<&str> = topic.split('/').collect();

    for (index, level) in pattern_levels.iter().enumerate() {
        match *level {
            MULTI_LEVEL_WILDCARD => return index < topic_levels.len(),
            SINGLE_LEVEL_WILDCARD => continue,
            literal => {
                if topic_levels.get(index) != Some(&literal) {
                    return false;
                }
            }
        }
    }

    pattern_levels.len() == topic_levels.len()
}

/// Check whether a pattern contains any wildcard level
pub fn is_wildcard_pattern(pattern: &str) -> bool {
    pattern
        .split('/')
        .any(|level| level == SINGLE_LEVEL_WILDCARD || level == MULTI_LEVEL_WILDCARD)
}

/// Smart-home topic construction
pub struct TopicBuilder;

impl TopicBuilder {
    /// Root level shared by every smart-home topic
    pub const ROOT: &'static str = "smarthome";

    /// Build a room light topic: `smarthome/{room_id}/light`
    pub fn build_light_topic(room_id: &str) -> String {
        format!("{}/{room_id}/light", Self::ROOT)
    }

    /// Pattern covering every room light: `smarthome/+/light`
    pub fn all_lights_pattern() -> String {
        format!("{}/{SINGLE_LEVEL_WILDCARD}/light", Self::ROOT)
    }
}
