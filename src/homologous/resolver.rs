//! Token resolution for bound homologous images.
//!
//! Definition tokens go through the row index. References are matched by name and signature
//! against the members of the resolved declaring class, after inflating the reference against the
//! caller's generic context. Every successful resolution is memoized per image and context.

use tracing::trace;

use crate::{
    homologous::HomologousImage,
    metadata::{
        aot::AotMetadata,
        raw::MemberRefRow,
        scope::ImageScope,
        signatures::{
            parse_field_signature, parse_method_signature, parse_method_spec_signature, SignatureParser,
        },
        token::{TableId, Token},
    },
    runtime::{ClassId, FieldRef, MethodId, Runtime, RuntimeStats},
    typesystem::{GenericContext, MethodShape, RuntimeType, TypeTokenResolver},
    Error, Result,
};

/// What a token resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolved {
    /// A type token.
    Class(ClassId),
    /// A method token.
    Method(MethodId),
    /// A field token.
    Field(FieldRef),
}

type Scope<'a> = ImageScope<'a, AotMetadata>;

impl Runtime {
    /// Resolves a `TypeDef`, `TypeRef` or `TypeSpec` token of a homologous image.
    ///
    /// # Errors
    ///
    /// [`Error::TypeNotFound`] for types the AOT store does not have, [`Error::InvalidToken`] for
    /// tokens of other tables.
    pub fn get_class_from_token(
        &self,
        image: &HomologousImage,
        token: Token,
        context: &GenericContext,
    ) -> Result<ClassId> {
        match self.resolve_cached(image, token, context, |scope| {
            self.resolve_class(image, scope, token, context).map(Resolved::Class)
        })? {
            Resolved::Class(id) => Ok(id),
            _ => Err(Error::InvalidToken(token)),
        }
    }

    /// Resolves a `MethodDef`, `MemberRef` or `MethodSpec` token of a homologous image.
    ///
    /// # Errors
    ///
    /// [`Error::MethodNotFound`] naming the declaring type and the method when a reference matches
    /// no method, or the initialization error of the declaring class.
    pub fn get_method_info_from_token(
        &self,
        image: &HomologousImage,
        token: Token,
        context: &GenericContext,
    ) -> Result<MethodId> {
        match self.resolve_cached(image, token, context, |scope| {
            self.resolve_method(image, scope, token, context).map(Resolved::Method)
        })? {
            Resolved::Method(id) => Ok(id),
            _ => Err(Error::InvalidToken(token)),
        }
    }

    /// Resolves a `Field` or `MemberRef` token of a homologous image.
    ///
    /// # Errors
    ///
    /// [`Error::FieldNotFound`] naming the declaring type and the field when a reference matches no
    /// field, or the initialization error of the declaring class.
    pub fn get_field_info_from_token(
        &self,
        image: &HomologousImage,
        token: Token,
        context: &GenericContext,
    ) -> Result<FieldRef> {
        match self.resolve_cached(image, token, context, |scope| {
            self.resolve_field(image, scope, token, context).map(Resolved::Field)
        })? {
            Resolved::Field(field) => Ok(field),
            _ => Err(Error::InvalidToken(token)),
        }
    }

    fn resolve_cached(
        &self,
        image: &HomologousImage,
        token: Token,
        context: &GenericContext,
        resolve: impl FnOnce(&Scope<'_>) -> Result<Resolved>,
    ) -> Result<Resolved> {
        let key = (token, context.clone());
        if let Some(hit) = image.cache.get(&key) {
            RuntimeStats::bump(&self.stats.resolver_hits);
            return Ok(*hit);
        }

        let scope = ImageScope::new(&*self.metadata, &image.raw, image.assembly, image.first_type)?;
        let resolved = resolve(&scope)?;
        RuntimeStats::bump(&self.stats.resolver_misses);
        trace!(%token, ?resolved, "resolved homologous token");
        Ok(*image.cache.entry(key).or_insert(resolved))
    }

    fn resolve_class(
        &self,
        image: &HomologousImage,
        scope: &Scope<'_>,
        token: Token,
        context: &GenericContext,
    ) -> Result<ClassId> {
        match token.table_id() {
            Some(TableId::TypeDef) => {
                let def = image
                    .rows
                    .type_def(token.row())
                    .ok_or_else(|| Error::TypeNotFound(format!("{token}")))?;
                self.class_from_typedef(def)
            }
            Some(TableId::TypeRef) => self.class_from_typedef(scope.resolve_type_def_or_ref(token)?),
            Some(TableId::TypeSpec) => {
                let ty = scope.resolve_type_spec(token)?;
                self.class_from_type(&self.generic_insts.inflate(&ty, context)?)
            }
            _ => Err(Error::InvalidToken(token)),
        }
    }

    fn resolve_method(
        &self,
        image: &HomologousImage,
        scope: &Scope<'_>,
        token: Token,
        context: &GenericContext,
    ) -> Result<MethodId> {
        match token.table_id() {
            Some(TableId::MethodDef) => {
                let slot = image
                    .rows
                    .method(token.row())
                    .ok_or(Error::InvalidToken(token))?;
                let class = self.init_class(self.class_from_typedef(slot.declaring)?)?;
                class
                    .methods()
                    .get(slot.position as usize)
                    .copied()
                    .ok_or_else(|| out_of_bounds_error!())
            }
            Some(TableId::MemberRef) => {
                let member = image.raw.member_ref(token.row())?;
                if SignatureParser::is_field_signature(member.signature) {
                    return Err(Error::InvalidToken(token));
                }
                self.resolve_method_ref(image, scope, &member, context)
            }
            Some(TableId::MethodSpec) => {
                let spec = image.raw.method_spec(token.row())?;
                let method = self.get_method_info_from_token(image, spec.method, context)?;
                let args = parse_method_spec_signature(spec.instantiation)?
                    .generic_args
                    .iter()
                    .map(|arg| {
                        let ty = RuntimeType::from_signature(arg, scope)?;
                        self.generic_insts.inflate(&ty, context)
                    })
                    .collect::<Result<Vec<_>>>()?;
                self.get_generic_method(method, &args)
            }
            _ => Err(Error::InvalidToken(token)),
        }
    }

    fn resolve_method_ref(
        &self,
        image: &HomologousImage,
        scope: &Scope<'_>,
        member: &MemberRefRow<'_>,
        context: &GenericContext,
    ) -> Result<MethodId> {
        let declaring = self.member_ref_parent(image, scope, member.parent, context)?;
        let shape = MethodShape::from_signature(&parse_method_signature(member.signature)?, scope)?;
        let class_context = self.class_context(declaring)?;
        let return_type = self.generic_insts.inflate(&shape.return_type, &class_context)?;
        let params = shape
            .params
            .iter()
            .map(|p| self.generic_insts.inflate(p, &class_context))
            .collect::<Result<Vec<_>>>()?;

        let mut current = Some(declaring);
        while let Some(id) = current {
            let class = self.init_class(id)?;
            for method in class.methods() {
                let info = self.method(*method)?;
                if info.name == member.name
                    && u32::from(info.generic_arity) == shape.generic_arity
                    && info.return_type == return_type
                    && info.parameter_types().eq(params.iter())
                {
                    return Ok(*method);
                }
            }
            current = class.parent;
        }

        Err(Error::MethodNotFound {
            type_name: self.class(declaring)?.full_name(),
            method: member.name.to_string(),
        })
    }

    fn resolve_field(
        &self,
        image: &HomologousImage,
        scope: &Scope<'_>,
        token: Token,
        context: &GenericContext,
    ) -> Result<FieldRef> {
        match token.table_id() {
            Some(TableId::Field) => {
                let slot = image
                    .rows
                    .field(token.row())
                    .ok_or(Error::InvalidToken(token))?;
                let class = self.class_from_typedef(slot.declaring)?;
                self.init_class(class)?;
                Ok(FieldRef {
                    class,
                    index: slot.position,
                })
            }
            Some(TableId::MemberRef) => {
                let member = image.raw.member_ref(token.row())?;
                if !SignatureParser::is_field_signature(member.signature) {
                    return Err(Error::InvalidToken(token));
                }
                let declaring = self.member_ref_parent(image, scope, member.parent, context)?;
                let signature = parse_field_signature(member.signature)?;
                let ty = RuntimeType::from_signature(&signature.base, scope)?;
                let ty = self.generic_insts.inflate(&ty, &self.class_context(declaring)?)?;

                let mut current = Some(declaring);
                while let Some(id) = current {
                    let class = self.init_class(id)?;
                    if let Some(index) = class
                        .fields()
                        .iter()
                        .position(|f| f.name == member.name && f.ty == ty)
                    {
                        return Ok(FieldRef {
                            class: id,
                            index: u32::try_from(index).map_err(|_| out_of_bounds_error!())?,
                        });
                    }
                    current = class.parent;
                }

                Err(Error::FieldNotFound {
                    type_name: self.class(declaring)?.full_name(),
                    field: member.name.to_string(),
                })
            }
            _ => Err(Error::InvalidToken(token)),
        }
    }

    fn member_ref_parent(
        &self,
        image: &HomologousImage,
        scope: &Scope<'_>,
        parent: Token,
        context: &GenericContext,
    ) -> Result<ClassId> {
        match parent.table_id() {
            Some(TableId::TypeDef | TableId::TypeRef | TableId::TypeSpec) => {
                self.get_class_from_token(image, parent, context)
            }
            Some(TableId::MethodDef) => {
                let method = self.resolve_method(image, scope, parent, context)?;
                Ok(self.method(method)?.declaring)
            }
            _ => Err(Error::NotSupported(format!("member reference parent {parent}"))),
        }
    }

    /// The arguments a member signature of `class` is written against.
    fn class_context(&self, class: ClassId) -> Result<GenericContext> {
        Ok(self
            .class(class)?
            .generic_args()
            .cloned()
            .map(GenericContext::for_class)
            .unwrap_or_default())
    }
}
