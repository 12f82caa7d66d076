//! Waiting on provider actions.
//!
//! A provider action reports zero or more progress events followed by at
//! most one terminal event. A stream that closes without a terminal event
//! means the action succeeded.

use std::time::Duration;

use nodepool_provider::{ActionError, ActionEvent, CloudProvider, PendingAction};
use tokio::sync::mpsc;
use tracing::debug;

/// Terminal outcome of one provider action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The action completed.
    Success,
    /// The provider reported an error.
    Failed(ActionError),
    /// No terminal signal arrived before the deadline. The action itself
    /// keeps running on the provider side.
    TimedOut,
}

impl ActionOutcome {
    /// Whether the action completed successfully.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Watch `action` until it finishes or `deadline` elapses.
pub async fn await_action(
    provider: &dyn CloudProvider,
    action: &PendingAction,
    deadline: Duration,
) -> ActionOutcome {
    let events = provider.watch_action(action);
    let outcome = wait_for_events(events, deadline).await;
    debug!(
        action_id = action.id,
        command = %action.command,
        outcome = ?outcome,
        "Action finished"
    );
    outcome
}

/// Consume an action event stream until a terminal signal, closure, or
/// `deadline`.
pub async fn wait_for_events(
    mut events: mpsc::Receiver<ActionEvent>,
    deadline: Duration,
) -> ActionOutcome {
    let wait = async {
        loop {
            match events.recv().await {
                Some(ActionEvent::Progress(progress)) => {
                    debug!(progress, "Action progress");
                }
                Some(ActionEvent::Completed) | None => return ActionOutcome::Success,
                Some(ActionEvent::Failed(error)) => return ActionOutcome::Failed(error),
            }
        }
    };

    tokio::time::timeout(deadline, wait)
        .await
        .unwrap_or(ActionOutcome::TimedOut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodepool_provider::{MockBehavior, MockProvider};

    const DEADLINE: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn closed_stream_is_success() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(ActionEvent::Progress(40)).await.unwrap();
        tx.send(ActionEvent::Progress(90)).await.unwrap();
        drop(tx);

        assert_eq!(wait_for_events(rx, DEADLINE).await, ActionOutcome::Success);
    }

    #[tokio::test]
    async fn empty_closed_stream_is_success() {
        let (tx, rx) = mpsc::channel::<ActionEvent>(1);
        drop(tx);

        assert_eq!(wait_for_events(rx, DEADLINE).await, ActionOutcome::Success);
    }

    #[tokio::test]
    async fn explicit_completion_is_success() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(ActionEvent::Completed).await.unwrap();

        // The sender is still alive; completion alone must end the wait.
        assert_eq!(wait_for_events(rx, DEADLINE).await, ActionOutcome::Success);
        drop(tx);
    }

    #[tokio::test]
    async fn error_event_is_failure() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(ActionEvent::Progress(10)).await.unwrap();
        tx.send(ActionEvent::Failed(ActionError {
            code: "server_error".to_string(),
            message: "boom".to_string(),
        }))
        .await
        .unwrap();

        match wait_for_events(rx, DEADLINE).await {
            ActionOutcome::Failed(error) => assert_eq!(error.code, "server_error"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn silent_open_stream_times_out() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(ActionEvent::Progress(0)).await.unwrap();

        let outcome = wait_for_events(rx, DEADLINE).await;
        assert_eq!(outcome, ActionOutcome::TimedOut);
        assert!(!outcome.is_success());
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn await_action_against_mock() {
        let provider = MockProvider::new();
        let a = provider.insert_instance("pool1");
        let b = provider.insert_instance("pool1");
        let c = provider.insert_instance("pool1");
        provider.script_deletes([
            MockBehavior::Succeed,
            MockBehavior::FailAction,
            MockBehavior::HangAction,
        ]);

        let ok = provider.delete_instance(a).await.unwrap();
        let failed = provider.delete_instance(b).await.unwrap();
        let hung = provider.delete_instance(c).await.unwrap();

        assert!(await_action(&provider, &ok, DEADLINE).await.is_success());
        assert!(matches!(
            await_action(&provider, &failed, DEADLINE).await,
            ActionOutcome::Failed(_)
        ));
        assert_eq!(
            await_action(&provider, &hung, DEADLINE).await,
            ActionOutcome::TimedOut
        );
    }
}
