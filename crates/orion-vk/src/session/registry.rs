use ahash::AHashMap;
use ash::vk::{self, Handle};

use super::FeatureKind;
use crate::OrionError;

///Kinds of Vulkan objects a session keeps track of.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Instance,
    Device,
    DebugMessenger,
}

impl ObjectKind {
    ///Kind of the handle type `H`, if it can be tracked.
    pub fn of<H: Handle>() -> Option<Self> {
        match H::TYPE {
            vk::ObjectType::INSTANCE => Some(ObjectKind::Instance),
            vk::ObjectType::DEVICE => Some(ObjectKind::Device),
            vk::ObjectType::DEBUG_UTILS_MESSENGER_EXT => Some(ObjectKind::DebugMessenger),
            _ => None,
        }
    }

    ///Position in the teardown order. Objects of lower rank are destroyed first.
    fn teardown_rank(&self) -> u8 {
        match self {
            ObjectKind::DebugMessenger => 0,
            ObjectKind::Device => 1,
            ObjectKind::Instance => 2,
        }
    }
}

///Everything recorded about an object when it was created.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    ///Raw handle of the instance the object was created on.
    pub parent: Option<u64>,
    pub enabled_extensions: Vec<String>,
    pub enabled_layers: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackedObject {
    pub kind: ObjectKind,
    pub handle: u64,
    ///Creation order within the registry.
    pub sequence: u64,
    pub metadata: ObjectMetadata,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackStatus {
    Tracked,
    ///The handle was tracked before. Nothing was changed.
    AlreadyTracked,
}

///Every object a session created, keyed by kind and raw handle.
#[derive(Debug, Default)]
pub struct ObjectRegistry {
    objects: AHashMap<(ObjectKind, u64), TrackedObject>,
    next_sequence: u64,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    ///Records `handle`. Only the first call for a (kind, handle) pair has an effect.
    pub fn track(
        &mut self,
        kind: ObjectKind,
        handle: u64,
        metadata: ObjectMetadata,
    ) -> Result<TrackStatus, OrionError> {
        if self.objects.contains_key(&(kind, handle)) {
            return Ok(TrackStatus::AlreadyTracked);
        }
        self.objects.try_reserve(1)?;

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.objects.insert(
            (kind, handle),
            TrackedObject {
                kind,
                handle,
                sequence,
                metadata,
            },
        );
        Ok(TrackStatus::Tracked)
    }

    pub fn get(&self, kind: ObjectKind, handle: u64) -> Option<&TrackedObject> {
        self.objects.get(&(kind, handle))
    }

    pub fn contains(&self, kind: ObjectKind, handle: u64) -> bool {
        self.objects.contains_key(&(kind, handle))
    }

    ///The extensions or layers `handle` was created with.
    pub fn enumerate_enabled(
        &self,
        kind: ObjectKind,
        handle: u64,
        feature: FeatureKind,
    ) -> Result<&[String], OrionError> {
        let object = self
            .get(kind, handle)
            .ok_or(OrionError::InvalidObject { kind, handle })?;
        Ok(match feature {
            FeatureKind::Extension => &object.metadata.enabled_extensions,
            FeatureKind::Layer => &object.metadata.enabled_layers,
        })
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn count(&self, kind: ObjectKind) -> usize {
        self.objects.keys().filter(|(k, _)| *k == kind).count()
    }

    ///All tracked objects, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &TrackedObject> {
        self.objects.values()
    }

    ///Empties the registry and returns its objects in destruction order: debug messengers, devices, instances.
    /// Within one kind the newest object comes first.
    pub(crate) fn drain_for_teardown(&mut self) -> Vec<TrackedObject> {
        let mut objects = self.objects.drain().map(|(_, o)| o).collect::<Vec<_>>();
        objects.sort_by(|a, b| {
            a.kind
                .teardown_rank()
                .cmp(&b.kind.teardown_rank())
                .then(b.sequence.cmp(&a.sequence))
        });
        objects
    }
}
