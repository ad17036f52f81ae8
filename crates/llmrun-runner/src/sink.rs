//! Token sinks: where decoded text goes.
//!
//! A sink is a single-method capability. The runner calls
//! [`TokenSink::accept`] once per decoded token, in generation order, on the
//! thread running the loop. Returning an error aborts the generation with
//! [`RunnerError::Callback`](crate::RunnerError::Callback).

use crossbeam_channel::{unbounded, Receiver, Sender};

/// Error a sink may return to abort generation.
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

pub trait TokenSink {
    fn accept(&mut self, text: &str) -> Result<(), SinkError>;
}

impl<S: TokenSink + ?Sized> TokenSink for &mut S {
    fn accept(&mut self, text: &str) -> Result<(), SinkError> {
        (**self).accept(text)
    }
}

impl<S: TokenSink + ?Sized> TokenSink for Box<S> {
    fn accept(&mut self, text: &str) -> Result<(), SinkError> {
        (**self).accept(text)
    }
}

/// Sink backed by a closure. Build with [`from_fn`].
pub struct FnSink<F> {
    f: F,
}

/// Wrap a closure as a sink.
///
/// ```
/// use llmrun_runner::{from_fn, TokenSink};
///
/// let mut out = String::new();
/// let mut sink = from_fn(|text| {
///     out.push_str(text);
///     Ok(())
/// });
/// sink.accept("hi").unwrap();
/// drop(sink);
/// assert_eq!(out, "hi");
/// ```
pub fn from_fn<F>(f: F) -> FnSink<F>
where
    F: FnMut(&str) -> Result<(), SinkError>,
{
    FnSink { f }
}

impl<F> TokenSink for FnSink<F>
where
    F: FnMut(&str) -> Result<(), SinkError>,
{
    fn accept(&mut self, text: &str) -> Result<(), SinkError> {
        (self.f)(text)
    }
}

/// Forwards each token to a channel, for consumers on another thread.
///
/// Fails once the receiving side is gone, which aborts the generation.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<String>,
}

impl ChannelSink {
    pub fn new(tx: Sender<String>) -> Self {
        Self { tx }
    }

    /// An unbounded channel with its sink end.
    pub fn channel() -> (Self, Receiver<String>) {
        let (tx, rx) = unbounded();
        (Self::new(tx), rx)
    }
}

impl TokenSink for ChannelSink {
    fn accept(&mut self, text: &str) -> Result<(), SinkError> {
        self.tx
            .send(text.to_string())
            .map_err(|_| "token receiver disconnected".into())
    }
}

/// Keeps every token in order.
#[derive(Debug, Clone, Default)]
pub struct CollectSink {
    pub tokens: Vec<String>,
}

impl CollectSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> String {
        self.tokens.concat()
    }
}

impl TokenSink for CollectSink {
    fn accept(&mut self, text: &str) -> Result<(), SinkError> {
        self.tokens.push(text.to_string());
        Ok(())
    }
}

/// Drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardSink;

impl TokenSink for DiscardSink {
    fn accept(&mut self, _text: &str) -> Result<(), SinkError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fn_sink_propagates_errors() {
        let mut calls = 0;
        let mut sink = from_fn(|text| {
            calls += 1;
            if text == "bad" {
                return Err("rejected".into());
            }
            Ok(())
        });
        sink.accept("good").unwrap();
        let err = sink.accept("bad").unwrap_err();
        assert_eq!(err.to_string(), "rejected");
        drop(sink);
        assert_eq!(calls, 2);
    }

    #[test]
    fn channel_sink_forwards_in_order() {
        let (mut sink, rx) = ChannelSink::channel();
        sink.accept("a").unwrap();
        sink.accept("b").unwrap();
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn channel_sink_fails_without_receiver() {
        let (mut sink, rx) = ChannelSink::channel();
        drop(rx);
        assert!(sink.accept("lost").is_err());
    }

    #[test]
    fn collect_sink_keeps_tokens() {
        let mut sink = CollectSink::new();
        sink.accept("he").unwrap();
        sink.accept("llo").unwrap();
        assert_eq!(sink.tokens, vec!["he", "llo"]);
        assert_eq!(sink.text(), "hello");
    }

    #[test]
    fn sinks_work_through_references_and_boxes() {
        let mut inner = CollectSink::new();
        {
            let by_ref: &mut CollectSink = &mut inner;
            by_ref.accept("x").unwrap();
        }
        let mut boxed: Box<dyn TokenSink> = Box::new(DiscardSink);
        boxed.accept("y").unwrap();
        assert_eq!(inner.tokens, vec!["x"]);
    }
}
