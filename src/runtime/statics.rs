//! Static and thread-static field storage.
//!
//! Each class owns a zeroed static block sized by layout. Thread statics of all classes share one
//! per-thread area: layout reserves a range in it once, and every thread gets its own zeroed copy
//! the first time it touches a thread-static field. A copy lives until it is released with
//! [`Runtime::release_thread_statics`], so hosts that retire threads should release them.

use std::{
    sync::Mutex,
    thread::{self, ThreadId},
};

use dashmap::DashMap;
use tracing::trace;

use crate::{
    runtime::{
        class::{FieldOffset, FieldRef},
        Runtime,
    },
    typesystem::align_to,
    Error, Result,
};

/// Reservations in the per-thread static area and each thread's copy of it.
#[derive(Debug, Default)]
pub(crate) struct ThreadStaticArea {
    size: Mutex<u32>,
    blocks: DashMap<ThreadId, Vec<u8>>,
}

impl ThreadStaticArea {
    /// Reserves `size` bytes aligned to `alignment` and returns their offset.
    pub(crate) fn reserve(&self, size: u32, alignment: u32) -> u32 {
        let mut total = lock!(self.size);
        let offset = align_to(*total, alignment);
        *total = offset + size;
        offset
    }

    /// Bytes reserved so far.
    pub(crate) fn size(&self) -> u32 {
        *lock!(self.size)
    }

    /// Drops the copy of `thread`, returning whether it had one.
    pub(crate) fn release(&self, thread: ThreadId) -> bool {
        self.blocks.remove(&thread).is_some()
    }

    /// Threads currently holding a copy.
    #[cfg(test)]
    pub(crate) fn block_count(&self) -> usize {
        self.blocks.len()
    }

    fn with_block<R>(&self, f: impl FnOnce(&mut Vec<u8>) -> R) -> R {
        let size = self.size() as usize;
        let mut block = self.blocks.entry(thread::current().id()).or_default();
        if block.len() < size {
            block.resize(size, 0);
        }
        f(&mut block)
    }
}

impl Runtime {
    /// Bytes of a static or thread-static field.
    ///
    /// # Errors
    ///
    /// The sticky initialization error of the declaring class, or [`Error::NotSupported`] for
    /// instance and literal fields.
    pub fn get_static_value(&self, field: FieldRef) -> Result<Vec<u8>> {
        let (offset, size) = self.static_slot(field)?;
        match offset {
            FieldOffset::Static(offset) => {
                let statics = self.class(field.class)?.static_layout().ok_or_else(|| {
                    Error::NotSupported(format!("{} has no static storage", field_name(self, field)))
                })?;
                let storage = read_lock!(statics.storage);
                let range = offset as usize..(offset + size) as usize;
                Ok(storage
                    .get(range)
                    .ok_or_else(|| out_of_bounds_error!())?
                    .to_vec())
            }
            FieldOffset::ThreadStatic(offset) => self.thread_statics.with_block(|block| {
                let range = offset as usize..(offset + size) as usize;
                Ok(block.get(range).ok_or_else(|| out_of_bounds_error!())?.to_vec())
            }),
            _ => Err(Error::NotSupported(format!(
                "{} has no static storage",
                field_name(self, field)
            ))),
        }
    }

    /// Overwrites a static or thread-static field. `value` must be exactly the field's size.
    ///
    /// # Errors
    ///
    /// As [`Runtime::get_static_value`], plus [`Error::OutOfBounds`] for a value of the wrong size.
    pub fn set_static_value(&self, field: FieldRef, value: &[u8]) -> Result<()> {
        let (offset, size) = self.static_slot(field)?;
        if value.len() != size as usize {
            return Err(out_of_bounds_error!());
        }
        match offset {
            FieldOffset::Static(offset) => {
                let statics = self.class(field.class)?.static_layout().ok_or_else(|| {
                    Error::NotSupported(format!("{} has no static storage", field_name(self, field)))
                })?;
                let mut storage = write_lock!(statics.storage);
                storage
                    .get_mut(offset as usize..(offset + size) as usize)
                    .ok_or_else(|| out_of_bounds_error!())?
                    .copy_from_slice(value);
                Ok(())
            }
            FieldOffset::ThreadStatic(offset) => self.thread_statics.with_block(|block| {
                block
                    .get_mut(offset as usize..(offset + size) as usize)
                    .ok_or_else(|| out_of_bounds_error!())?
                    .copy_from_slice(value);
                Ok(())
            }),
            _ => Err(Error::NotSupported(format!(
                "{} has no static storage",
                field_name(self, field)
            ))),
        }
    }

    /// Releases the thread-static block of `thread`. Call it when a thread that touched thread
    /// statics exits; a later access from the same thread starts from zeroed values again.
    ///
    /// Returns `false` if the thread never touched a thread-static field.
    pub fn release_thread_statics(&self, thread: ThreadId) -> bool {
        let released = self.thread_statics.release(thread);
        if released {
            trace!(?thread, "released thread-static block");
        }
        released
    }

    fn static_slot(&self, field: FieldRef) -> Result<(FieldOffset, u32)> {
        self.init_class(field.class)?;
        let info = self.field(field)?;
        let size = {
            let guard = self.lock_metadata();
            self.value_size(&guard, &info.ty)?.size
        };
        Ok((info.offset, size))
    }
}

fn field_name(runtime: &Runtime, field: FieldRef) -> String {
    runtime
        .field(field)
        .map_or_else(|_| format!("field {}", field.index), |f| f.name.clone())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        metadata::aot::{AotMetadataBuilder, NewField, TypeBody},
        runtime::RuntimeConfig,
        typesystem::{RuntimeType, TypeAttributes},
    };

    #[test]
    fn reservations_are_aligned() {
        let area = ThreadStaticArea::default();
        assert_eq!(area.reserve(1, 1), 0);
        assert_eq!(area.reserve(8, 8), 8);
        assert_eq!(area.reserve(2, 2), 16);
        assert_eq!(area.size(), 18);
    }

    fn runtime() -> Runtime {
        let mut builder = AotMetadataBuilder::new();
        let corlib = builder.with_corlib().unwrap();
        let game = builder.add_assembly("Game", [1, 0, 0, 0]).unwrap();
        let config = builder.declare_type(game, "Game", "Settings", TypeAttributes::PUBLIC).unwrap();
        builder
            .define_type(
                config,
                TypeBody::class(&corlib)
                    .field(NewField::statik("volume", RuntimeType::I4))
                    .field(NewField::thread_static("frame", RuntimeType::I8))
                    .field(NewField::literal("Max", RuntimeType::I4))
                    .field(NewField::instance("id", RuntimeType::I4)),
            )
            .unwrap();
        Runtime::new(Arc::new(builder.build().unwrap()), RuntimeConfig::default()).unwrap()
    }

    #[test]
    fn statics_start_zeroed_and_persist() {
        let rt = runtime();
        let class = rt.class_from_name("Game", "Settings").unwrap();
        let volume = FieldRef { class, index: 0 };
        assert_eq!(rt.get_static_value(volume).unwrap(), vec![0; 4]);
        rt.set_static_value(volume, &7i32.to_le_bytes()).unwrap();
        assert_eq!(rt.get_static_value(volume).unwrap(), 7i32.to_le_bytes());
        assert!(rt.set_static_value(volume, &[1]).is_err());
    }

    #[test]
    fn thread_statics_are_per_thread() {
        let rt = Arc::new(runtime());
        let class = rt.class_from_name("Game", "Settings").unwrap();
        let frame = FieldRef { class, index: 1 };
        rt.set_static_value(frame, &42i64.to_le_bytes()).unwrap();

        let other = Arc::clone(&rt);
        let seen = std::thread::spawn(move || other.get_static_value(frame).unwrap())
            .join()
            .unwrap();
        assert_eq!(seen, vec![0; 8]);
        assert_eq!(rt.get_static_value(frame).unwrap(), 42i64.to_le_bytes());
    }

    #[test]
    fn exited_threads_release_their_blocks() {
        let rt = Arc::new(runtime());
        let class = rt.class_from_name("Game", "Settings").unwrap();
        let frame = FieldRef { class, index: 1 };

        let workers: Vec<_> = (0..4i64)
            .map(|i| {
                let rt = Arc::clone(&rt);
                std::thread::spawn(move || {
                    rt.set_static_value(frame, &i.to_le_bytes()).unwrap();
                    assert!(rt.release_thread_statics(thread::current().id()));
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(rt.thread_statics.block_count(), 0);

        rt.set_static_value(frame, &9i64.to_le_bytes()).unwrap();
        let me = thread::current().id();
        assert!(rt.release_thread_statics(me));
        assert!(!rt.release_thread_statics(me));
        assert_eq!(rt.get_static_value(frame).unwrap(), vec![0; 8]);
    }

    #[test]
    fn literal_and_instance_fields_have_no_static_storage() {
        let rt = runtime();
        let class = rt.class_from_name("Game", "Settings").unwrap();
        for index in [2, 3] {
            assert!(matches!(
                rt.get_static_value(FieldRef { class, index }),
                Err(Error::NotSupported(_))
            ));
        }
    }
}
