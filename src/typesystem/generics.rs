//! Generic argument interning and inflation.
//!
//! [`GenericInstTable`] guarantees that structurally equal argument lists share one
//! [`GenericInst`] allocation, which makes the instantiation maps keyed by it cheap to probe.
//! [`inflate`] substitutes `!n` / `!!n` placeholders with the arguments of a [`GenericContext`].

use dashmap::DashMap;

use crate::{
    typesystem::{GenericContext, GenericInst, RuntimeType},
    Error, Result,
};

/// Substitutes every generic parameter in `ty` with the matching argument of `context`.
///
/// Parameters whose list is absent from the context are left in place, so a type can be inflated
/// against the class arguments first and the method arguments later. Closed types are returned
/// unchanged.
pub fn inflate(ty: &RuntimeType, context: &GenericContext) -> Result<RuntimeType> {
    if context.is_empty() || !ty.contains_generic_parameters() {
        return Ok(ty.clone());
    }

    Ok(match ty {
        RuntimeType::Var(number) => substitute(*number, context.class_inst.as_ref(), ty)?,
        RuntimeType::MVar(number) => substitute(*number, context.method_inst.as_ref(), ty)?,
        RuntimeType::GenericInst { definition, args } => RuntimeType::GenericInst {
            definition: *definition,
            args: inflate_inst(args, context)?,
        },
        RuntimeType::Ptr(inner) => RuntimeType::Ptr(Box::new(inflate(inner, context)?)),
        RuntimeType::ByRef(inner) => RuntimeType::ByRef(Box::new(inflate(inner, context)?)),
        RuntimeType::SzArray(inner) => RuntimeType::SzArray(Box::new(inflate(inner, context)?)),
        RuntimeType::Array { element, rank } => RuntimeType::Array {
            element: Box::new(inflate(element, context)?),
            rank: *rank,
        },
        other => other.clone(),
    })
}

/// Inflates every argument of an argument list.
pub fn inflate_inst(inst: &GenericInst, context: &GenericContext) -> Result<GenericInst> {
    if !inst.is_open() {
        return Ok(inst.clone());
    }
    let args = inst
        .iter()
        .map(|arg| inflate(arg, context))
        .collect::<Result<Vec<_>>>()?;
    Ok(GenericInst::new(args))
}

fn substitute(number: u16, inst: Option<&GenericInst>, original: &RuntimeType) -> Result<RuntimeType> {
    let Some(inst) = inst else {
        return Ok(original.clone());
    };
    inst.get(usize::from(number))
        .cloned()
        .ok_or(Error::GenericIndexOutOfBounds {
            index: u32::from(number),
            len: inst.len(),
        })
}

/// The process-wide set of canonical argument lists.
#[derive(Debug, Default)]
pub struct GenericInstTable {
    lists: DashMap<GenericInst, GenericInst>,
}

impl GenericInstTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        GenericInstTable::default()
    }

    /// Returns the canonical list structurally equal to `args`. Nested instantiations inside the
    /// arguments are canonicalized as well.
    pub fn intern(&self, args: Vec<RuntimeType>) -> GenericInst {
        let args = args.into_iter().map(|arg| self.intern_type(arg)).collect();
        let candidate = GenericInst::new(args);
        if let Some(existing) = self.lists.get(&candidate) {
            return existing.value().clone();
        }
        self.lists
            .entry(candidate.clone())
            .or_insert(candidate)
            .value()
            .clone()
    }

    /// Returns `ty` with every argument list replaced by its canonical instance.
    pub fn intern_type(&self, ty: RuntimeType) -> RuntimeType {
        match ty {
            RuntimeType::GenericInst { definition, args } => {
                if let Some(existing) = self.lists.get(&args) {
                    if existing.value().ptr_eq(&args) {
                        return RuntimeType::GenericInst { definition, args };
                    }
                }
                RuntimeType::GenericInst {
                    definition,
                    args: self.intern(args.to_vec()),
                }
            }
            RuntimeType::Ptr(inner) => RuntimeType::Ptr(Box::new(self.intern_type(*inner))),
            RuntimeType::ByRef(inner) => RuntimeType::ByRef(Box::new(self.intern_type(*inner))),
            RuntimeType::SzArray(inner) => RuntimeType::SzArray(Box::new(self.intern_type(*inner))),
            RuntimeType::Array { element, rank } => RuntimeType::Array {
                element: Box::new(self.intern_type(*element)),
                rank,
            },
            other => other,
        }
    }

    /// Inflates `ty` against `context` and canonicalizes the result.
    pub fn inflate(&self, ty: &RuntimeType, context: &GenericContext) -> Result<RuntimeType> {
        Ok(self.intern_type(inflate(ty, context)?))
    }

    /// Number of distinct argument lists.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lists.len()
    }

    /// True if nothing has been interned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::aot::TypeDefIndex;

    fn list_of(arg: RuntimeType) -> RuntimeType {
        RuntimeType::GenericInst {
            definition: TypeDefIndex(40),
            args: GenericInst::new(vec![arg]),
        }
    }

    #[test]
    fn inflate_substitutes_class_and_method_parameters() {
        let context = GenericContext {
            class_inst: Some(GenericInst::new(vec![RuntimeType::I4])),
            method_inst: Some(GenericInst::new(vec![RuntimeType::String])),
        };
        let ty = RuntimeType::GenericInst {
            definition: TypeDefIndex(7),
            args: GenericInst::new(vec![
                RuntimeType::Var(0),
                RuntimeType::SzArray(Box::new(RuntimeType::MVar(0))),
            ]),
        };
        let inflated = inflate(&ty, &context).unwrap();
        assert_eq!(
            inflated,
            RuntimeType::GenericInst {
                definition: TypeDefIndex(7),
                args: GenericInst::new(vec![
                    RuntimeType::I4,
                    RuntimeType::SzArray(Box::new(RuntimeType::String)),
                ]),
            }
        );
        assert!(!inflated.contains_generic_parameters());
    }

    #[test]
    fn inflate_is_idempotent_on_closed_types() {
        let context = GenericContext::for_class(GenericInst::new(vec![RuntimeType::I4]));
        let closed = list_of(RuntimeType::String);
        assert_eq!(inflate(&closed, &context).unwrap(), closed);
        let once = inflate(&list_of(RuntimeType::Var(0)), &context).unwrap();
        assert_eq!(inflate(&once, &context).unwrap(), once);
    }

    #[test]
    fn missing_list_leaves_parameter() {
        let context = GenericContext::for_class(GenericInst::new(vec![RuntimeType::I4]));
        assert_eq!(inflate(&RuntimeType::MVar(0), &context).unwrap(), RuntimeType::MVar(0));
    }

    #[test]
    fn out_of_range_parameter_fails() {
        let context = GenericContext::for_class(GenericInst::new(vec![RuntimeType::I4]));
        let err = inflate(&RuntimeType::Var(3), &context).unwrap_err();
        assert!(matches!(err, Error::GenericIndexOutOfBounds { index: 3, len: 1 }));
    }

    #[test]
    fn interning_shares_allocations() {
        let table = GenericInstTable::new();
        let a = table.intern(vec![RuntimeType::I4, list_of(RuntimeType::String)]);
        let b = table.intern(vec![RuntimeType::I4, list_of(RuntimeType::String)]);
        let c = table.intern(vec![RuntimeType::I8]);
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));

        // The nested list is canonical too.
        let nested = |inst: &GenericInst| match &inst[1] {
            RuntimeType::GenericInst { args, .. } => args.clone(),
            other => panic!("unexpected {other:?}"),
        };
        assert!(nested(&a).ptr_eq(&nested(&b)));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn interning_from_many_threads() {
        let table = GenericInstTable::new();
        let lists: Vec<GenericInst> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| table.intern(vec![RuntimeType::I4, RuntimeType::Object])))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(lists.windows(2).all(|w| w[0].ptr_eq(&w[1])));
        assert_eq!(table.len(), 1);
    }
}
