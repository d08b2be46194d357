//! Editor content storage.

/// Holder for the editor content pushed by clients.
pub trait ContentModel {
    /// Replace the stored content.
    fn apply_content_update(&mut self, content: String);

    /// Latest content, if any has been pushed.
    fn snapshot_content(&self) -> Option<String>;
}

/// Keeps the most recent content blob in memory.
#[derive(Debug, Default)]
pub struct InMemoryContent {
    /// Last pushed blob.
    latest: Option<String>,
}

impl ContentModel for InMemoryContent {
    fn apply_content_update(&mut self, content: String) {
        self.latest = Some(content);
    }

    fn snapshot_content(&self) -> Option<String> {
        self.latest.clone()
    }
}
