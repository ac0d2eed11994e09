//! A scripted [`Provider`] test double: replays a fixed sequence of
//! [`StreamEvent`]s per call, advancing to the next script on each
//! subsequent `stream()` invocation. Used by the orchestrator's own
//! integration tests; not part of the crate's public production surface.

use super::{BoxStream, CancellationToken, CompletionRequest, Provider, StreamEvent};
use crate::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

/// Replays one `Vec<StreamEvent>` per call to `stream()`, in order. Panics
/// (via an `ApiError`-shaped `Err`) if called more times than scripts were
/// provided, so a test's expected call count is self-checking.
pub struct ScriptedProvider {
    scripts: Mutex<Vec<Vec<StreamEvent>>>,
    call_index: Mutex<usize>,
}

impl ScriptedProvider {
    /// One script replayed for every call, regardless of call count.
    pub fn single(script: Vec<StreamEvent>) -> Self {
        Self {
            scripts: Mutex::new(vec![script]),
            call_index: Mutex::new(0),
        }
    }

    /// One script per call, indexed by call order (turn number).
    pub fn sequence(scripts: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            call_index: Mutex::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        *self.call_index.lock()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn stream(
        &self,
        _request: CompletionRequest,
        _cancel: CancellationToken,
    ) -> Result<BoxStream<Result<StreamEvent>>> {
        let scripts = self.scripts.lock();
        let mut index = self.call_index.lock();

        let script = if scripts.len() == 1 {
            scripts[0].clone()
        } else {
            let chosen = scripts
                .get(*index)
                .cloned()
                .unwrap_or_else(|| scripts.last().cloned().unwrap_or_default());
            chosen
        };
        *index += 1;

        let events: Vec<Result<StreamEvent>> = script.into_iter().map(Ok).collect();
        Ok(Box::pin(futures::stream::iter(events)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_provider_replays_single_script() {
        use futures::StreamExt;

        let provider = ScriptedProvider::single(vec![
            StreamEvent::TextDelta { text: "Hi".to_string() },
            StreamEvent::Stop,
        ]);

        let request = CompletionRequest {
            model: "test".to_string(),
            system: String::new(),
            messages: vec![],
            tools: vec![],
            max_tokens: 100,
            temperature: None,
            cache_breakpoints: None,
        };

        let mut stream = provider.stream(request, CancellationToken::new()).await.unwrap();
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event.unwrap());
        }
        assert_eq!(events.len(), 2);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_scripted_provider_sequence_advances_per_call() {
        let provider = ScriptedProvider::sequence(vec![
            vec![StreamEvent::ToolUse { id: "t1".to_string(), name: "shell".to_string() }, StreamEvent::Stop],
            vec![StreamEvent::TextDelta { text: "Done.".to_string() }, StreamEvent::Stop],
        ]);

        let request = CompletionRequest {
            model: "test".to_string(),
            system: String::new(),
            messages: vec![],
            tools: vec![],
            max_tokens: 100,
            temperature: None,
            cache_breakpoints: None,
        };

        let _ = provider.stream(request.clone(), CancellationToken::new()).await.unwrap();
        let _ = provider.stream(request, CancellationToken::new()).await.unwrap();
        assert_eq!(provider.call_count(), 2);
    }
}
