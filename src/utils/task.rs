use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::error;

use super::Notifier;

/// Runs `task` in its own tokio task. An error or a panic is logged and
/// reported through the notifier instead of tearing anything down.
pub fn spawn_supervised<F>(name: &'static str, notifier: Arc<Notifier>, task: F) -> JoinHandle<()>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        run_supervised(name, &notifier, task).await;
    })
}

/// Awaits `task` on a separate tokio task and reports how it ended.
pub async fn run_supervised<F>(name: &'static str, notifier: &Notifier, task: F) -> bool
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    match tokio::spawn(task).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            error!("{} failed: {:#}", name, err);
            notifier.alert(&format!("{name}: {err:#}")).await;
            false
        }
        Err(join_err) if join_err.is_panic() => {
            let detail = panic_message(join_err.into_panic());
            error!("{} panicked: {}", name, detail);
            notifier
                .alert(&format!("{name} panicked:\n{detail}"))
                .await;
            false
        }
        Err(join_err) => {
            error!("{} was cancelled: {}", name, join_err);
            false
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;
    use crate::chat::mock::MockChat;

    fn notifier(chat: &MockChat) -> Notifier {
        Notifier::new(Arc::new(chat.clone()), Some("7".to_string()), None)
    }

    #[tokio::test]
    async fn successful_task_reports_nothing() {
        let chat = MockChat::new();
        assert!(run_supervised("job", &notifier(&chat), async { Ok(()) }).await);
        assert!(chat.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_task_is_reported() {
        let chat = MockChat::new();
        let ok = run_supervised("job", &notifier(&chat), async { Err(anyhow!("disk full")) }).await;

        assert!(!ok);
        let sent = chat.sent_to("7");
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("disk full"));
    }

    #[tokio::test]
    async fn panicking_task_is_contained() {
        let chat = MockChat::new();
        let ok = run_supervised("job", &notifier(&chat), async {
            let items: Vec<u32> = Vec::new();
            let _ = items[3];
            Ok(())
        })
        .await;

        assert!(!ok);
        assert!(chat.sent_to("7")[0].contains("index out of bounds"));
    }
}
