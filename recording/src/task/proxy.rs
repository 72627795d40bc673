//! Lazily instantiated texture handles.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::provider::ResourceProvider;
use crate::resources::{
    PendingUseListener, ResourceRef, ScratchResourceManager, Shareable, Texture,
};
use crate::types::TextureDescriptor;

/// Identifies a [`TextureProxy`] within one Recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProxyId(pub(crate) u32);

impl ProxyId {
    pub fn raw(&self) -> u32 {
        self.0
    }
}

/// How a proxy obtains its texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyKind {
    /// A texture of its own, kept for the lifetime of the proxy.
    Exact,
    /// An intermediate that may share a physical texture with other
    /// intermediates of the same Recording once it has no readers left.
    Scratch,
    /// Bound to the replay target at insertion time.
    Deferred,
}

/// A texture that does not exist yet.
///
/// Tasks reference proxies while a Recording is built. The backing texture
/// is fetched during `prepare_resources`, except for deferred proxies which
/// receive the caller's target when the Recording is inserted.
pub struct TextureProxy {
    id: ProxyId,
    descriptor: TextureDescriptor,
    kind: ProxyKind,
    texture: Mutex<Option<ResourceRef<Texture>>>,
}

impl TextureProxy {
    pub(crate) fn new(id: ProxyId, descriptor: TextureDescriptor, kind: ProxyKind) -> Self {
        Self {
            id,
            descriptor,
            kind,
            texture: Mutex::new(None),
        }
    }

    pub fn id(&self) -> ProxyId {
        self.id
    }

    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }

    pub fn kind(&self) -> ProxyKind {
        self.kind
    }

    pub fn is_instantiated(&self) -> bool {
        self.texture.lock().is_some()
    }

    /// The backing texture, if instantiated.
    pub fn texture(&self) -> Option<Arc<Texture>> {
        self.texture.lock().as_ref().map(|texture| Arc::clone(texture.arc()))
    }

    /// Fetch the backing texture unless the proxy already has one.
    ///
    /// Deferred proxies cannot instantiate themselves and return false until
    /// a target is bound.
    pub fn instantiate(
        &self,
        provider: &ResourceProvider,
        scratch: &mut ScratchResourceManager,
    ) -> bool {
        let mut slot = self.texture.lock();
        if slot.is_some() {
            return true;
        }
        let texture = match self.kind {
            ProxyKind::Exact => provider.find_or_create_texture(&self.descriptor, Shareable::No),
            ProxyKind::Scratch => scratch.get_scratch_texture(&self.descriptor),
            ProxyKind::Deferred => {
                log::warn!("TextureProxy: deferred proxy {:?} has no target", self.id);
                return false;
            }
        };
        match texture {
            Ok(texture) => {
                *slot = Some(texture);
                true
            }
            Err(err) => {
                log::warn!("TextureProxy: failed to instantiate {:?}: {}", self.id, err);
                false
            }
        }
    }

    /// Bind an existing texture, replacing any previous one.
    pub(crate) fn instantiate_with(&self, texture: ResourceRef<Texture>) {
        *self.texture.lock() = Some(texture);
    }

    /// Drop the backing texture.
    pub(crate) fn deinstantiate(&self) {
        self.texture.lock().take();
    }
}

impl PendingUseListener for TextureProxy {
    /// Returns the scratch texture once no reader of this proxy is left to
    /// prepare. The proxy keeps its ref so tasks can still record against it.
    fn on_use_completed(&self, scratch: &mut ScratchResourceManager) -> bool {
        if scratch.is_pending_read(self.id) {
            return false;
        }
        if let Some(texture) = self.texture.lock().as_ref() {
            scratch.return_texture(texture);
        }
        true
    }
}

impl std::fmt::Debug for TextureProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureProxy")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("width", &self.descriptor.width)
            .field("height", &self.descriptor.height)
            .field("instantiated", &self.is_instantiated())
            .finish()
    }
}
