//! # Providers
//!
//! A provider owns any number of open documents, each with its own [`ActionAccumulator`], and
//! tells listeners when documents are opened, modified, or closed. Documents are fully
//! independent of each other.

use std::sync::Arc;

use crate::document::{Document, DocumentID};
use crate::graph::NodeRegistry;
use crate::queue::ActionAccumulator;
use crate::settings::EngineSettings;
use crate::tile::TileStoreError;

/// A provider that keeps documents in memory.
pub struct DocumentProvider {
    on_change: parking_lot::Mutex<bus::Bus<ProviderMessage>>,
    // Only locked for writing when a document is opened or closed.
    documents: parking_lot::RwLock<hashbrown::HashMap<DocumentID, Arc<ActionAccumulator>>>,
    registry: Arc<NodeRegistry>,
    settings: EngineSettings,
}
impl DocumentProvider {
    #[must_use]
    pub fn new(settings: EngineSettings) -> Self {
        Self::with_registry(settings, Arc::default())
    }
    /// A provider building nodes with a custom registry.
    #[must_use]
    pub fn with_registry(settings: EngineSettings, registry: Arc<NodeRegistry>) -> Self {
        // Blocks on full, so choose a large number to avoid blocking the editing thread.
        let on_change = bus::Bus::new(256);
        Self {
            on_change: on_change.into(),
            documents: parking_lot::RwLock::default(),
            registry,
            settings: settings.validated(),
        }
    }
    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }
    /// Create and insert an empty document of the given size, returning its ID.
    pub fn insert_new(&self, size: [u32; 2]) -> Result<DocumentID, TileStoreError> {
        let document = Document::new(size, &self.settings)?;
        let accumulator = ActionAccumulator::new(
            document,
            self.settings.clone(),
            Arc::clone(&self.registry),
        );
        let id = accumulator.id();
        self.documents.write().insert(id, Arc::new(accumulator));
        log::info!("opened {id} ({}x{})", size[0], size[1]);
        self.broadcast(ProviderMessage::Opened(id));
        Ok(id)
    }
    /// Insert an existing document. If a document with this ID is already open, the untouched
    /// document is returned as an error.
    pub fn insert(&self, document: Document) -> Result<DocumentID, Document> {
        let id = document.id();
        match self.documents.write().entry(id) {
            hashbrown::hash_map::Entry::Occupied(_) => return Err(document),
            hashbrown::hash_map::Entry::Vacant(v) => {
                v.insert(Arc::new(ActionAccumulator::new(
                    document,
                    self.settings.clone(),
                    Arc::clone(&self.registry),
                )));
            }
        }
        self.broadcast(ProviderMessage::Opened(id));
        Ok(id)
    }
    /// The pipeline of a document, if it is open.
    #[must_use]
    pub fn get(&self, id: DocumentID) -> Option<Arc<ActionAccumulator>> {
        self.documents.read().get(&id).cloned()
    }
    /// Call the given closure on the document with the given ID, if found. Listeners are told
    /// the document was modified if its undo history moved.
    pub fn inspect<F, T>(&self, id: DocumentID, f: F) -> Option<T>
    where
        F: FnOnce(&ActionAccumulator) -> T,
    {
        let accumulator = self.get(id)?;
        let before = (accumulator.undo_len(), accumulator.redo_len());
        let result = f(&accumulator);
        if (accumulator.undo_len(), accumulator.redo_len()) != before {
            self.broadcast(ProviderMessage::Modified(id));
        }
        Some(result)
    }
    /// Remove a document. Renders still in flight finish with nothing to draw.
    pub fn close(&self, id: DocumentID) -> Option<Arc<ActionAccumulator>> {
        let closed = self.documents.write().remove(&id)?;
        log::info!("closed {id}");
        self.broadcast(ProviderMessage::Closed(id));
        Some(closed)
    }
    /// Iterate over all the open documents, by ID.
    pub fn document_iter(&self) -> impl Iterator<Item = DocumentID> {
        let ids: Vec<_> = self.documents.read().keys().copied().collect();
        ids.into_iter()
    }
    /// Broadcast a [`ProviderMessage::Modified`] for an open document.
    pub fn touch(&self, id: DocumentID) {
        if self.documents.read().contains_key(&id) {
            self.broadcast(ProviderMessage::Modified(id));
        }
    }
    /// Get a receiver of messages describing changes to the provider or its documents.
    /// Does not receive old messages, use [`Self::document_iter`] to get up-to-date!
    pub fn change_listener(&self) -> bus::BusReader<ProviderMessage> {
        self.on_change.lock().add_rx()
    }
    fn broadcast(&self, message: ProviderMessage) {
        if self.on_change.lock().try_broadcast(message).is_err() {
            log::warn!("provider listeners are lagging, dropped {message:?}");
        }
    }
}
impl Default for DocumentProvider {
    fn default() -> Self {
        Self::new(EngineSettings::default())
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ProviderMessage {
    /// A new document has been made available to the provider.
    Opened(DocumentID),
    /// A document has been modified.
    Modified(DocumentID),
    /// A document is no longer available.
    Closed(DocumentID),
}
impl ProviderMessage {
    /// Gets the document this message refers to.
    #[must_use]
    pub fn id(&self) -> DocumentID {
        match self {
            Self::Closed(id) | Self::Modified(id) | Self::Opened(id) => *id,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::actions::{Action, ActionSource};
    use crate::graph::{Location, NodeId, NodeKind};

    #[test]
    fn open_modify_close() {
        let provider = DocumentProvider::default();
        let mut listener = provider.change_listener();
        let a = provider.insert_new([32, 32]).unwrap();
        let b = provider.insert_new([16, 16]).unwrap();
        assert_ne!(a, b);
        let mut open: Vec<_> = provider.document_iter().collect();
        open.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(open, expected);

        provider
            .inspect(a, |queue| {
                queue.submit(
                    ActionSource::User,
                    Action::CreateMember {
                        id: NodeId::default(),
                        kind: NodeKind::Folder,
                        name: None,
                        location: Location::IndexIntoRoot(0),
                    },
                );
                queue.process().map(|reports| reports.len())
            })
            .unwrap()
            .unwrap();
        // Untouched documents are unaffected.
        assert_eq!(provider.get(b).unwrap().undo_len(), 0);
        assert!(provider.close(b).is_some());
        assert!(provider.close(b).is_none());
        assert!(provider.inspect(b, |_| ()).is_none());

        let messages: Vec<_> = std::iter::from_fn(|| listener.try_recv().ok()).collect();
        assert_eq!(
            messages,
            vec![
                ProviderMessage::Opened(a),
                ProviderMessage::Opened(b),
                ProviderMessage::Modified(a),
                ProviderMessage::Closed(b),
            ]
        );
    }
    #[test]
    fn insert_existing_document() {
        let provider = DocumentProvider::default();
        let mut document = Document::new([8, 8], provider.settings()).unwrap();
        document.name = "imported".into();
        let id = document.id();
        assert_eq!(provider.insert(document).ok(), Some(id));
        let name = provider.inspect(id, |queue| queue.document().read().name.clone());
        assert_eq!(name.as_deref(), Some("imported"));
    }
}
