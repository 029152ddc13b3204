//! Deferred structural commands
//!
//! Traversal tasks cannot touch the entity store, so they record what should
//! happen through a [`CommandRecorder`]. The buffer is consumed by
//! [`DeferredCommandBuffer::drain`], which takes `self`: one buffer is drained
//! exactly once.

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::scene::entity::EntityId;

/// Structural change applied at the flush point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeferredCommand {
    /// Destroy the entity and its native volume
    DestroyEntity(EntityId),
}

/// Per-frame multi-producer command queue
pub struct DeferredCommandBuffer {
    sender: Sender<DeferredCommand>,
    receiver: Receiver<DeferredCommand>,
}

impl Default for DeferredCommandBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl DeferredCommandBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    /// A cloneable producer handle for parallel tasks
    pub fn recorder(&self) -> CommandRecorder {
        CommandRecorder {
            sender: self.sender.clone(),
        }
    }

    /// Commands recorded so far
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Whether nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Take every recorded command, consuming the buffer
    pub fn drain(self) -> Vec<DeferredCommand> {
        let Self { sender, receiver } = self;
        drop(sender);
        receiver.try_iter().collect()
    }
}

/// Producer side of a [`DeferredCommandBuffer`]
#[derive(Clone)]
pub struct CommandRecorder {
    sender: Sender<DeferredCommand>,
}

impl CommandRecorder {
    /// Record a command
    pub fn push(&self, command: DeferredCommand) {
        if self.sender.send(command).is_err() {
            log::warn!("{command:?} recorded after its buffer was drained; dropped");
        }
    }

    /// Record destruction of `id`
    pub fn destroy_entity(&self, id: EntityId) {
        self.push(DeferredCommand::DestroyEntity(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn test_parallel_producers_single_drain() {
        let mut ids: SlotMap<EntityId, ()> = SlotMap::with_key();
        let keys: Vec<EntityId> = (0..64).map(|_| ids.insert(())).collect();

        let buffer = DeferredCommandBuffer::new();
        std::thread::scope(|s| {
            for chunk in keys.chunks(16) {
                let recorder = buffer.recorder();
                s.spawn(move || chunk.iter().for_each(|id| recorder.destroy_entity(*id)));
            }
        });

        assert_eq!(buffer.len(), 64);
        let mut drained = buffer.drain();
        drained.sort_by_key(|DeferredCommand::DestroyEntity(id)| keys.iter().position(|k| k == id));
        assert_eq!(drained.len(), 64);
        assert_eq!(drained[0], DeferredCommand::DestroyEntity(keys[0]));
    }

    #[test]
    fn test_recording_after_drain_is_dropped() {
        let mut ids: SlotMap<EntityId, ()> = SlotMap::with_key();
        let id = ids.insert(());

        let buffer = DeferredCommandBuffer::new();
        let late = buffer.recorder();
        assert!(buffer.drain().is_empty());
        late.destroy_entity(id);
    }
}
