//! Test sources and a recording view shared by the integration tests.

#![allow(dead_code)]

use callbag_listener::{ListenerConfig, Message, Signal, Sink, Snapshot, Source, Talkback};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Source driven by hand from the test: records how often it was
/// subscribed, pulled and cancelled.
pub struct ManualSource<T> {
    pub source: Source<T>,
    sink: Arc<Mutex<Option<Sink<T>>>>,
    subscribed: Arc<AtomicUsize>,
    pulls: Arc<AtomicUsize>,
    cancelled: Arc<AtomicUsize>,
    /// Every signal received, in order.
    signals: Arc<Mutex<Vec<Signal>>>,
}

impl<T: Send + 'static> ManualSource<T> {
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Like `new`, but answers a cancel with an `End` (a misbehaving but
    /// common source).
    pub fn echoing_end() -> Self {
        Self::build(true)
    }

    fn build(echo_end: bool) -> Self {
        let sink = Arc::new(Mutex::new(None));
        let subscribed = Arc::new(AtomicUsize::new(0));
        let pulls = Arc::new(AtomicUsize::new(0));
        let cancelled = Arc::new(AtomicUsize::new(0));
        let signals = Arc::new(Mutex::new(Vec::new()));

        let source = {
            let sink_slot = Arc::clone(&sink);
            let subscribed = Arc::clone(&subscribed);
            let pulls = Arc::clone(&pulls);
            let cancelled = Arc::clone(&cancelled);
            let signals = Arc::clone(&signals);

            Source::new(move |sink: Sink<T>| {
                subscribed.fetch_add(1, Ordering::SeqCst);
                *sink_slot.lock() = Some(sink.clone());

                let pulls = Arc::clone(&pulls);
                let cancelled = Arc::clone(&cancelled);
                let signals = Arc::clone(&signals);
                let echo = sink.clone();
                sink.send(Message::Start(Talkback::new(move |signal| {
                    signals.lock().push(signal);
                    match signal {
                        Signal::Pull => {
                            pulls.fetch_add(1, Ordering::SeqCst);
                        }
                        Signal::Cancel => {
                            cancelled.fetch_add(1, Ordering::SeqCst);
                            if echo_end {
                                echo.send(Message::End);
                            }
                        }
                    }
                })));
            })
        };

        Self {
            source,
            sink,
            subscribed,
            pulls,
            cancelled,
            signals,
        }
    }

    pub fn source(&self) -> Source<T> {
        self.source.clone()
    }

    pub fn emit(&self, message: Message<T>) {
        let sink = self.sink.lock().clone();
        if let Some(sink) = sink {
            sink.send(message);
        }
    }

    pub fn send(&self, value: T) {
        self.emit(Message::Data(value));
    }

    pub fn end(&self) {
        self.emit(Message::End);
    }

    pub fn nonsense(&self) {
        self.emit(Message::Unknown(42));
    }

    pub fn subscribed(&self) -> usize {
        self.subscribed.load(Ordering::SeqCst)
    }

    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.signals.lock().clone()
    }
}

/// Source that emits `values` one per pull, then ends.
pub fn from_values<T: Clone + Send + Sync + 'static>(values: Vec<T>) -> Source<T> {
    Source::new(move |sink: Sink<T>| {
        let values = values.clone();
        let position = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));
        let out = sink.clone();

        sink.send(Message::Start(Talkback::new(move |signal| {
            if done.load(Ordering::SeqCst) > 0 {
                return;
            }
            match signal {
                Signal::Pull => {
                    let i = position.fetch_add(1, Ordering::SeqCst);
                    match values.get(i) {
                        Some(value) => out.send(Message::Data(value.clone())),
                        None => {
                            done.store(1, Ordering::SeqCst);
                            out.send(Message::End);
                        }
                    }
                }
                Signal::Cancel => done.store(1, Ordering::SeqCst),
            }
        })));
    })
}

/// Source that never calls its sink.
pub fn silent<T: 'static>() -> (Source<T>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let source = Source::new(move |_sink: Sink<T>| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    (source, calls)
}

pub type Renders<T> = Arc<Mutex<Vec<Snapshot<T>>>>;

/// Config whose view records every snapshot it is given.
pub fn recording_config<T: Clone + Send + 'static>() -> (ListenerConfig<T>, Renders<T>) {
    let renders: Renders<T> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&renders);
    let config = ListenerConfig::new().view(move |snapshot: &Snapshot<T>| {
        sink.lock().push(snapshot.clone());
    });
    (config, renders)
}

pub fn snapshot<T>(entries: &[(&str, T)]) -> Snapshot<T>
where
    T: Clone,
{
    entries.iter().map(|(k, v)| (*k, v.clone())).collect()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}
