use commander_events::headers::ACTION_HEADER;
use commander_events::{Envelope, RawMessage};

/// Which envelopes a consumer wants: optionally one action and, for events,
/// a set of accepted versions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    action: Option<String>,
    versions: Option<Vec<i32>>,
}

impl Filter {
    /// Accept everything.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn action(action: impl Into<String>) -> Self {
        Self {
            action: Some(action.into()),
            versions: None,
        }
    }

    /// Restrict to envelopes whose version is in `versions`.
    ///
    /// An empty set accepts no versioned envelope.
    pub fn with_versions(mut self, versions: impl IntoIterator<Item = i32>) -> Self {
        self.versions = Some(versions.into_iter().collect());
        self
    }

    /// Action check on the raw header, so unwanted messages are never decoded.
    pub fn accepts_raw(&self, message: &RawMessage) -> bool {
        match &self.action {
            Some(action) => message.header(ACTION_HEADER) == Some(action.as_str()),
            None => true,
        }
    }

    pub fn accepts<T: Envelope>(&self, envelope: &T) -> bool {
        let action_ok = self
            .action
            .as_deref()
            .is_none_or(|action| envelope.action() == action);

        let version_ok = match (&self.versions, envelope.version()) {
            (Some(versions), Some(version)) => versions.contains(&version),
            _ => true,
        };

        action_ok && version_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commander_events::Command;

    #[test]
    fn action_filter_checks_raw_header() {
        let filter = Filter::action("create");
        let create = Command::new("create", Vec::new()).to_message("commands");
        let delete = Command::new("delete", Vec::new()).to_message("commands");

        assert!(filter.accepts_raw(&create));
        assert!(!filter.accepts_raw(&delete));
        assert!(Filter::all().accepts_raw(&delete));
    }

    #[test]
    fn version_filter_applies_to_events() {
        let command = Command::new("create", Vec::new());
        let v1 = command.new_event("created", 1, Vec::new());
        let v2 = command.new_event("created", 2, Vec::new());

        let filter = Filter::action("created").with_versions([1]);
        assert!(filter.accepts(&v1));
        assert!(!filter.accepts(&v2));

        assert!(!Filter::all().with_versions([]).accepts(&v1));
    }

    #[test]
    fn version_filter_ignores_unversioned_envelopes() {
        let command = Command::new("create", Vec::new());
        assert!(Filter::action("create").with_versions([1]).accepts(&command));
    }
}
