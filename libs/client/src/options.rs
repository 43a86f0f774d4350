use serde::{Deserialize, Serialize};

/// Per-request options.
///
/// Unset fields are absent on the wire and take server-defined defaults; they
/// are never sent present-but-empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Options {
    pub infer: Option<bool>,
    pub explain: Option<bool>,
    pub batch_size: Option<u32>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn infer(mut self, infer: bool) -> Self {
        self.infer = Some(infer);
        self
    }

    pub fn explain(mut self, explain: bool) -> Self {
        self.explain = Some(explain);
        self
    }

    pub fn batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }
}
