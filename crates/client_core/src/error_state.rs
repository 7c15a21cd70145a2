use serde::Serialize;
use shared::error::{BootstrapError, ErrorChannel};

/// Three independent error channels plus the retry affordance flag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorState {
    pub script: Option<String>,
    pub session: Option<String>,
    pub integration: Option<String>,
    pub retryable: bool,
}

/// Partial update; `None` leaves a field untouched, `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorUpdate {
    script: Option<Option<String>>,
    session: Option<Option<String>>,
    integration: Option<Option<String>>,
    retryable: Option<bool>,
}

impl ErrorUpdate {
    pub fn script(mut self, value: Option<String>) -> Self {
        self.script = Some(value);
        self
    }

    pub fn session(mut self, value: Option<String>) -> Self {
        self.session = Some(value);
        self
    }

    pub fn integration(mut self, value: Option<String>) -> Self {
        self.integration = Some(value);
        self
    }

    pub fn retryable(mut self, value: bool) -> Self {
        self.retryable = Some(value);
        self
    }

    /// Stores a bootstrap error on its channel. Only session and integration
    /// errors touch the retry flag.
    pub fn from_error(error: &BootstrapError) -> Self {
        let message = Some(error.user_message());
        match error.channel() {
            ErrorChannel::Script => Self::default().script(message),
            ErrorChannel::Session => Self::default()
                .session(message)
                .retryable(error.is_retryable()),
            ErrorChannel::Integration => Self::default()
                .integration(message)
                .retryable(error.is_retryable()),
        }
    }
}

impl ErrorState {
    pub fn apply(&mut self, update: ErrorUpdate) {
        if let Some(script) = update.script {
            self.script = script;
        }
        if let Some(session) = update.session {
            self.session = session;
        }
        if let Some(integration) = update.integration {
            self.integration = integration;
        }
        if let Some(retryable) = update.retryable {
            self.retryable = retryable;
        }
    }

    /// Fixed precedence: script, then session, then integration.
    pub fn blocking_error(&self) -> Option<&str> {
        self.script
            .as_deref()
            .or(self.session.as_deref())
            .or(self.integration.as_deref())
    }

    pub fn blocking_channel(&self) -> Option<ErrorChannel> {
        if self.script.is_some() {
            Some(ErrorChannel::Script)
        } else if self.session.is_some() {
            Some(ErrorChannel::Session)
        } else if self.integration.is_some() {
            Some(ErrorChannel::Integration)
        } else {
            None
        }
    }

    pub fn retryable(&self) -> bool {
        self.retryable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::error::SessionError;

    #[test]
    fn script_outranks_session_outranks_integration() {
        let mut errors = ErrorState::default();
        errors.apply(ErrorUpdate::default().integration(Some("stream dropped".into())));
        assert_eq!(errors.blocking_error(), Some("stream dropped"));

        errors.apply(ErrorUpdate::default().session(Some("rate limited".into())));
        assert_eq!(errors.blocking_error(), Some("rate limited"));

        errors.apply(ErrorUpdate::default().script(Some("Error: cdn".into())));
        assert_eq!(errors.blocking_error(), Some("Error: cdn"));
        assert_eq!(errors.blocking_channel(), Some(ErrorChannel::Script));
    }

    #[test]
    fn clearing_one_channel_leaves_the_others() {
        let mut errors = ErrorState::default();
        errors.apply(
            ErrorUpdate::default()
                .session(Some("session".into()))
                .integration(Some("integration".into()))
                .retryable(true),
        );

        errors.apply(ErrorUpdate::default().session(None));

        assert_eq!(errors.session, None);
        assert_eq!(errors.integration.as_deref(), Some("integration"));
        assert!(errors.retryable());
        assert_eq!(errors.blocking_error(), Some("integration"));
    }

    #[test]
    fn empty_update_changes_nothing() {
        let mut errors = ErrorState::default();
        errors.apply(ErrorUpdate::default().script(Some("x".into())));
        let before = errors.clone();
        errors.apply(ErrorUpdate::default());
        assert_eq!(errors, before);
    }

    #[test]
    fn bootstrap_errors_land_on_their_channel_without_retry() {
        let mut errors = ErrorState::default();
        errors.apply(ErrorUpdate::from_error(&BootstrapError::Session(
            SessionError::MissingClientSecret,
        )));
        assert_eq!(errors.session.as_deref(), Some("Missing client secret in response"));
        assert!(!errors.retryable());

        errors.apply(ErrorUpdate::from_error(&BootstrapError::Script(
            "widget runtime unavailable".into(),
        )));
        assert_eq!(errors.script.as_deref(), Some("Error: widget runtime unavailable"));
    }

    #[test]
    fn script_errors_leave_the_retry_flag_alone() {
        let mut errors = ErrorState::default();
        errors.apply(ErrorUpdate::default().retryable(true));

        errors.apply(ErrorUpdate::from_error(&BootstrapError::Script("cdn blocked".into())));

        assert_eq!(errors.script.as_deref(), Some("Error: cdn blocked"));
        assert!(errors.retryable());

        errors.apply(ErrorUpdate::from_error(&BootstrapError::Integration("boom".into())));
        assert!(!errors.retryable());
    }
}
