//! Interfaces, the type hierarchy and virtual dispatch tables.
//!
//! The vtable of a class starts as a copy of its parent's. Virtual methods that do not ask for a
//! new slot replace the most derived inherited slot with the same name and signature; the rest
//! are appended. Every interface the class implements, directly or through other interfaces, gets
//! a contiguous range of slots recorded as an [`InterfaceOffset`]. Interface slots are filled from
//! explicit overrides, then from a name and signature match, then from default interface methods.
//! When more than one default implementation is equally specific the slot is marked
//! [`VTableSlot::Ambiguous`].

use crate::{
    runtime::{
        class::{ClassFlags, ClassId, InterfaceOffset, MethodId, MethodInfo, VTableSlot},
        MetadataGuard, Runtime,
    },
    typesystem::MethodAttributes,
    Result,
};

fn slot_index(index: usize) -> Result<u16> {
    u16::try_from(index).map_err(|_| out_of_bounds_error!())
}

impl Runtime {
    /// Resolves the interfaces a class declares directly.
    pub(crate) fn setup_interfaces(&self, _guard: &MetadataGuard<'_>, id: ClassId) -> Result<()> {
        let class = self.class(id)?;
        if class.interfaces.get().is_some() {
            return Ok(());
        }

        let interfaces = match self.definition_context(class)? {
            Some((def, context)) => {
                let type_def = self.metadata.type_def(def)?;
                self.metadata
                    .interfaces_of(type_def)
                    .iter()
                    .map(|handle| {
                        let declared = self.metadata.resolve_type_handle(*handle)?;
                        let ty = self.generic_insts.inflate(declared, &context)?;
                        self.class_from_type(&ty)
                    })
                    .collect::<Result<Vec<_>>>()?
            }
            None => Vec::new(),
        };
        let _ = class.interfaces.set(interfaces.into_boxed_slice());
        Ok(())
    }

    /// Records the ancestor chain, root first.
    pub(crate) fn setup_type_hierarchy(&self, guard: &MetadataGuard<'_>, id: ClassId) -> Result<()> {
        let class = self.class(id)?;
        if class.hierarchy.get().is_some() {
            return Ok(());
        }

        let mut hierarchy = match class.parent {
            Some(parent) => {
                self.setup_type_hierarchy(guard, parent)?;
                self.class(parent)?.hierarchy().to_vec()
            }
            None => Vec::new(),
        };
        hierarchy.push(id);
        let _ = class.hierarchy.set(hierarchy.into_boxed_slice());
        Ok(())
    }

    /// Resolves the explicit overrides of a class to `(declaration, body)` method pairs.
    fn resolve_overrides(
        &self,
        guard: &MetadataGuard<'_>,
        id: ClassId,
    ) -> Result<Vec<(MethodId, MethodId)>> {
        let class = self.class(id)?;
        let Some((def, context)) = self.definition_context(class)? else {
            return Ok(Vec::new());
        };

        let type_def = self.metadata.type_def(def)?;
        let mut overrides = Vec::with_capacity(type_def.overrides.len());
        for item in &type_def.overrides {
            let declared = self.metadata.resolve_type_handle(item.declaring_type)?;
            let declaring_type = self.generic_insts.inflate(declared, &context)?;
            let declaring = self.class_from_type(&declaring_type)?;
            if declaring != id {
                self.init_locked(guard, declaring)?;
            }
            let declaration = self.method_of_definition(self.class(declaring)?, item.declaration)?;
            let body = self.method_of_definition(class, item.body)?;
            overrides.push((declaration, body));
        }
        Ok(overrides)
    }

    /// Builds the vtable and interface offsets of a class.
    pub(crate) fn setup_vtable(&self, guard: &MetadataGuard<'_>, id: ClassId) -> Result<()> {
        let class = self.class(id)?;
        if class.vtable.get().is_some() {
            return Ok(());
        }
        let overrides = self.resolve_overrides(guard, id)?;

        if class.is_interface() {
            let mut next = 0usize;
            for method in class.methods() {
                let info = self.method(*method)?;
                if info.is_virtual()
                    && !info.is_static()
                    && !info.flags.contains(MethodAttributes::FINAL)
                {
                    let _ = info.slot.set(slot_index(next)?);
                    next += 1;
                }
            }
            let _ = class.overrides.set(overrides.into_boxed_slice());
            let _ = class.interface_offsets.set(Box::new([]));
            let _ = class.vtable.set(Box::new([]));
            return Ok(());
        }

        let (mut vtable, mut offsets) = match class.parent {
            Some(parent) => {
                self.setup_vtable(guard, parent)?;
                let parent = self.class(parent)?;
                (parent.vtable().to_vec(), parent.interface_offsets().to_vec())
            }
            None => (Vec::new(), Vec::new()),
        };

        for &method_id in class.methods() {
            let method = self.method(method_id)?;
            if !method.is_virtual() || method.is_static() {
                continue;
            }
            let inherited = if method.flags.is_new_slot() {
                None
            } else {
                self.find_class_slot(&vtable, method)?
            };
            let slot = match inherited {
                Some(slot) => {
                    vtable[slot] = VTableSlot::Method(method_id);
                    slot
                }
                None => {
                    vtable.push(VTableSlot::Method(method_id));
                    vtable.len() - 1
                }
            };
            let _ = method.slot.set(slot_index(slot)?);
        }

        for &(declaration, body) in &overrides {
            let declaration = self.method(declaration)?;
            if self.class(declaration.declaring)?.is_interface() {
                continue;
            }
            if let Some(entry) = declaration.slot().and_then(|s| vtable.get_mut(usize::from(s))) {
                *entry = VTableSlot::Method(body);
            }
        }

        let mut implemented = Vec::new();
        for interface in class.interfaces() {
            self.collect_interfaces(guard, *interface, &mut implemented)?;
        }

        let mut pending = Vec::with_capacity(implemented.len());
        for &interface in &implemented {
            match offsets.iter().find(|o| o.interface == interface) {
                Some(existing) => pending.push((interface, usize::from(existing.offset), true)),
                None => {
                    let start = vtable.len();
                    let count = self.interface_slot_count(interface)?;
                    vtable.resize(start + count, VTableSlot::Unresolved);
                    offsets.push(InterfaceOffset {
                        interface,
                        offset: slot_index(start)?,
                    });
                    pending.push((interface, start, false));
                }
            }
        }

        for (interface, start, inherited) in pending {
            for &declaration in self.class(interface)?.methods() {
                let info = self.method(declaration)?;
                let Some(slot) = info.slot() else {
                    continue;
                };
                let index = start + usize::from(slot);
                let resolved = if let Some((_, body)) = overrides.iter().find(|(d, _)| *d == declaration) {
                    Some(VTableSlot::Method(*body))
                } else if let Some(method) = self.find_implementation(&vtable, info)? {
                    Some(VTableSlot::Method(method))
                } else if inherited {
                    None
                } else {
                    Some(self.default_implementation(interface, declaration, &implemented)?)
                };
                if let (Some(resolved), Some(entry)) = (resolved, vtable.get_mut(index)) {
                    *entry = resolved;
                }
            }
        }

        // Interfaces only the parent declares keep their ranges; overridden class methods flow in.
        for offset in &offsets {
            if implemented.contains(&offset.interface) {
                continue;
            }
            let start = usize::from(offset.offset);
            let count = self.interface_slot_count(offset.interface)?;
            for index in start..start + count {
                let Some(VTableSlot::Method(current)) = vtable.get(index).copied() else {
                    continue;
                };
                let Some(class_slot) = self.method(current)?.slot() else {
                    continue;
                };
                if let Some(VTableSlot::Method(latest)) = vtable.get(usize::from(class_slot)).copied() {
                    if latest != current && usize::from(class_slot) != index {
                        vtable[index] = VTableSlot::Method(latest);
                    }
                }
            }
        }

        if self.overrides_finalizer(id, &vtable)? {
            class.add_flags(ClassFlags::HAS_FINALIZER);
        }

        let _ = class.overrides.set(overrides.into_boxed_slice());
        let _ = class.interface_offsets.set(offsets.into_boxed_slice());
        let _ = class.vtable.set(vtable.into_boxed_slice());
        Ok(())
    }

    /// Adds `interface` and the interfaces it extends to `out`, initializing each.
    fn collect_interfaces(
        &self,
        guard: &MetadataGuard<'_>,
        interface: ClassId,
        out: &mut Vec<ClassId>,
    ) -> Result<()> {
        if out.contains(&interface) {
            return Ok(());
        }
        self.init_locked(guard, interface)?;
        self.setup_interfaces(guard, interface)?;
        out.push(interface);
        for inner in self.class(interface)?.interfaces() {
            self.collect_interfaces(guard, *inner, out)?;
        }
        Ok(())
    }

    /// Every interface `interface` extends, transitively, without initializing anything.
    pub(crate) fn interface_closure(&self, interface: ClassId) -> Result<Vec<ClassId>> {
        let mut closure = Vec::new();
        let mut stack = self.class(interface)?.interfaces().to_vec();
        while let Some(next) = stack.pop() {
            if !closure.contains(&next) {
                closure.push(next);
                stack.extend_from_slice(self.class(next)?.interfaces());
            }
        }
        Ok(closure)
    }

    fn interface_slot_count(&self, interface: ClassId) -> Result<usize> {
        let mut count = 0;
        for method in self.class(interface)?.methods() {
            if self.method(*method)?.slot().is_some() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// The most derived slot a class method with the same name and signature owns.
    fn find_class_slot(&self, vtable: &[VTableSlot], method: &MethodInfo) -> Result<Option<usize>> {
        for index in (0..vtable.len()).rev() {
            let VTableSlot::Method(existing) = vtable[index] else {
                continue;
            };
            let existing = self.method(existing)?;
            if existing.slot().map(usize::from) == Some(index)
                && !self.class(existing.declaring)?.is_interface()
                && existing.same_signature(method)
            {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    /// A class method implementing interface method `declaration` by name and signature.
    fn find_implementation(
        &self,
        vtable: &[VTableSlot],
        declaration: &MethodInfo,
    ) -> Result<Option<MethodId>> {
        Ok(self
            .find_class_slot(vtable, declaration)?
            .and_then(|index| vtable[index].method()))
    }

    /// Picks the most specific default implementation of `declaration` among the implemented
    /// interfaces.
    fn default_implementation(
        &self,
        interface: ClassId,
        declaration: MethodId,
        implemented: &[ClassId],
    ) -> Result<VTableSlot> {
        let mut candidates = Vec::new();
        if !self.method(declaration)?.is_abstract() {
            candidates.push((interface, declaration));
        }
        for &other in implemented {
            if other == interface {
                continue;
            }
            let overrides = self.class(other)?.overrides.get().map_or(&[][..], |o| &o[..]);
            for &(decl, body) in overrides {
                if decl == declaration {
                    candidates.push((other, body));
                }
            }
        }

        let mut closures = Vec::with_capacity(candidates.len());
        for (owner, _) in &candidates {
            closures.push(self.interface_closure(*owner)?);
        }
        let specific: Vec<MethodId> = candidates
            .iter()
            .filter(|(owner, _)| {
                !candidates
                    .iter()
                    .zip(&closures)
                    .any(|((other, _), closure)| other != owner && closure.contains(owner))
            })
            .map(|(_, body)| *body)
            .collect();

        Ok(match specific.as_slice() {
            [] => VTableSlot::Unresolved,
            [single] => VTableSlot::Method(*single),
            _ => VTableSlot::Ambiguous,
        })
    }

    fn overrides_finalizer(&self, id: ClassId, vtable: &[VTableSlot]) -> Result<bool> {
        let object = self.class_from_typedef(self.metadata.corlib().object)?;
        if id == object {
            return Ok(false);
        }
        let finalize = self
            .class(object)?
            .methods()
            .iter()
            .copied()
            .find(|m| self.method(*m).is_ok_and(|m| m.name == "Finalize"));
        let Some(finalize) = finalize else {
            return Ok(false);
        };
        Ok(self
            .method(finalize)?
            .slot()
            .and_then(|slot| vtable.get(usize::from(slot)))
            .and_then(|slot| slot.method())
            .is_some_and(|method| method != finalize))
    }
}
