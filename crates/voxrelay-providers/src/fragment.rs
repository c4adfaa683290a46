//! Reply fragments and the stream adapters that shape them.
//!
//! Backends produce raw text deltas. [`accumulate`] turns those into
//! cumulative fragments, and [`Terminated`] guarantees each generation ends
//! with exactly one terminal fragment.

use std::pin::Pin;
use std::task::{Context, Poll, ready};

use futures::Stream;
use pin_project_lite::pin_project;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

/// One step of a streamed reply. `text` is the whole reply so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFragment {
    pub text: String,
    pub finished: bool,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseFragment {
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            finished: false,
            success: true,
            error: None,
        }
    }

    pub fn finished(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            finished: true,
            success: true,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            finished: false,
            success: false,
            error: Some(error.into()),
        }
    }

    /// No fragment may follow a terminal one.
    pub fn is_terminal(&self) -> bool {
        self.finished || !self.success
    }
}

/// Raw text deltas from a backend.
pub type DeltaStream = Pin<Box<dyn Stream<Item = anyhow::Result<String>> + Send>>;

/// Fragments as the orchestrator consumes them.
pub type FragmentStream = Pin<Box<dyn Stream<Item = ResponseFragment> + Send>>;

/// Convert deltas into cumulative fragments, closing with a `finished` fragment
/// that carries the full reply. A backend error becomes a failure fragment.
/// A reply with no text at all is a failure.
pub fn accumulate(deltas: DeltaStream) -> impl Stream<Item = ResponseFragment> + Send {
    futures::stream::unfold(
        Some((deltas, String::new())),
        |state| async move {
            let (mut deltas, mut text) = state?;
            loop {
                match deltas.next().await {
                    Some(Ok(delta)) => {
                        if delta.is_empty() {
                            continue;
                        }
                        text.push_str(&delta);
                        let fragment = ResponseFragment::partial(text.clone());
                        return Some((fragment, Some((deltas, text))));
                    }
                    Some(Err(e)) => {
                        return Some((ResponseFragment::failure(format!("{e:#}")), None));
                    }
                    None if text.trim().is_empty() => {
                        return Some((ResponseFragment::failure("backend returned no text"), None));
                    }
                    None => return Some((ResponseFragment::finished(text), None)),
                }
            }
        },
    )
}

pin_project! {
    /// Stops after the first terminal fragment; synthesises a failure if the
    /// inner stream ends without one.
    pub struct Terminated<S> {
        #[pin]
        inner: S,
        done: bool,
    }
}

impl<S> Terminated<S> {
    pub fn new(inner: S) -> Self {
        Self { inner, done: false }
    }
}

impl<S> Stream for Terminated<S>
where
    S: Stream<Item = ResponseFragment>,
{
    type Item = ResponseFragment;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }
        match ready!(this.inner.poll_next(cx)) {
            Some(fragment) => {
                if fragment.is_terminal() {
                    *this.done = true;
                }
                Poll::Ready(Some(fragment))
            }
            None => {
                *this.done = true;
                Poll::Ready(Some(ResponseFragment::failure(
                    "generation ended without a final fragment",
                )))
            }
        }
    }
}

/// Full pipeline from backend deltas to the fragment stream handed to sessions.
pub fn into_fragments(deltas: DeltaStream) -> FragmentStream {
    Box::pin(Terminated::new(accumulate(deltas)))
}

/// A stream holding a single fragment.
pub fn single(fragment: ResponseFragment) -> FragmentStream {
    Box::pin(futures::stream::iter([fragment]))
}
