//! First-writer-wins merge of independent completion sources.
//!
//! A job can be reported complete by the start-job reply (cache hit) and by a
//! `completed` progress event. Whichever is offered first settles the slot;
//! every later offer is reported back as a duplicate and must not cause a
//! transition or side effect.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionSource {
    Response,
    ProgressEvent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion<T> {
    pub value: T,
    pub source: CompletionSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Accepted,
    AlreadySettled { by: CompletionSource },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionSlot<T> {
    settled: Option<Completion<T>>,
}

impl<T> Default for CompletionSlot<T> {
    fn default() -> Self {
        Self { settled: None }
    }
}

impl<T> CompletionSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offer(&mut self, value: T, source: CompletionSource) -> Offer {
        match &self.settled {
            Some(existing) => Offer::AlreadySettled {
                by: existing.source,
            },
            None => {
                self.settled = Some(Completion { value, source });
                Offer::Accepted
            }
        }
    }

    pub fn settled(&self) -> Option<&Completion<T>> {
        self.settled.as_ref()
    }

    pub fn is_settled(&self) -> bool {
        self.settled.is_some()
    }

    /// Opens the slot for a new attempt.
    pub fn reset(&mut self) {
        self.settled = None;
    }
}
