//! User-facing console texts, looked up by resource key.

pub(crate) const LOCAL_BIND_ERROR: &str = "localBindError.text";
pub(crate) const SEND_ERROR: &str = "sendError.text";
pub(crate) const RECEIVE_ERROR: &str = "receiveError.text";

const TEXTS: [(&str, &str); 3] = [
    (
        LOCAL_BIND_ERROR,
        "Failed to bind to the console address. Check the console host and port settings.",
    ),
    (SEND_ERROR, "Failed to send message to the worker processes."),
    (
        RECEIVE_ERROR,
        "Failed to receive message from the worker processes.",
    ),
];

/// Returns the text registered for `key`, if any.
#[must_use]
pub fn text(key: &str) -> Option<&'static str> {
    TEXTS
        .iter()
        .find(|(candidate, _)| *candidate == key)
        .map(|(_, text)| *text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_keys_resolve() {
        assert!(text(LOCAL_BIND_ERROR).is_some());
        assert!(text(SEND_ERROR).is_some());
        assert!(text(RECEIVE_ERROR).is_some());
        assert_eq!(text("missing.text"), None);
    }
}
