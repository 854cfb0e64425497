//! Assembles an [`AotMetadata`] store.
//!
//! Types are first declared (which fixes their index and `TypeDef` row), then defined with a
//! [`TypeBody`]. The split lets bodies refer to types declared later, such as a field of a struct
//! that is defined further down, or a type that embeds itself.

use std::collections::HashMap;

use tracing::debug;

use crate::{
    metadata::{
        aot::{
            AotMetadata, AssemblyDefinition, AssemblyIndex, EventDefinition, FieldDefinition,
            GenericContainer, GenericContainerIndex, GenericOwner, GenericParameter,
            ImageDefinition, ImageIndex, MethodDefinition, MethodIndex, MethodOverride,
            ParameterDefinition, PropertyDefinition, TypeDefIndex, TypeDefinition, TypeIndex,
        },
        token::TableId,
    },
    typesystem::{FieldAttributes, MethodAttributes, RuntimeType, TypeAttributes},
    Error, Result,
};

/// The well-known definitions of the core library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct CorlibTypes {
    pub object: TypeDefIndex,
    pub value_type: TypeDefIndex,
    pub enum_type: TypeDefIndex,
    pub string: TypeDefIndex,
    pub array: TypeDefIndex,
    pub void: TypeDefIndex,
    pub boolean: TypeDefIndex,
    pub char: TypeDefIndex,
    pub sbyte: TypeDefIndex,
    pub byte: TypeDefIndex,
    pub int16: TypeDefIndex,
    pub uint16: TypeDefIndex,
    pub int32: TypeDefIndex,
    pub uint32: TypeDefIndex,
    pub int64: TypeDefIndex,
    pub uint64: TypeDefIndex,
    pub single: TypeDefIndex,
    pub double: TypeDefIndex,
    pub intptr: TypeDefIndex,
    pub uintptr: TypeDefIndex,
    pub typed_reference: TypeDefIndex,
}

impl CorlibTypes {
    /// The definition backing a built-in type handle.
    #[must_use]
    pub fn definition_of(&self, ty: &RuntimeType) -> Option<TypeDefIndex> {
        Some(match ty {
            RuntimeType::Void => self.void,
            RuntimeType::Boolean => self.boolean,
            RuntimeType::Char => self.char,
            RuntimeType::I1 => self.sbyte,
            RuntimeType::U1 => self.byte,
            RuntimeType::I2 => self.int16,
            RuntimeType::U2 => self.uint16,
            RuntimeType::I4 => self.int32,
            RuntimeType::U4 => self.uint32,
            RuntimeType::I8 => self.int64,
            RuntimeType::U8 => self.uint64,
            RuntimeType::R4 => self.single,
            RuntimeType::R8 => self.double,
            RuntimeType::I => self.intptr,
            RuntimeType::U => self.uintptr,
            RuntimeType::String => self.string,
            RuntimeType::Object => self.object,
            RuntimeType::TypedByRef => self.typed_reference,
            _ => return None,
        })
    }

    /// The built-in type handle of a definition, if it is one of the primitives.
    #[must_use]
    pub fn primitive_of(&self, def: TypeDefIndex) -> Option<RuntimeType> {
        [
            RuntimeType::Void,
            RuntimeType::Boolean,
            RuntimeType::Char,
            RuntimeType::I1,
            RuntimeType::U1,
            RuntimeType::I2,
            RuntimeType::U2,
            RuntimeType::I4,
            RuntimeType::U4,
            RuntimeType::I8,
            RuntimeType::U8,
            RuntimeType::R4,
            RuntimeType::R8,
            RuntimeType::I,
            RuntimeType::U,
            RuntimeType::String,
            RuntimeType::Object,
            RuntimeType::TypedByRef,
        ]
        .into_iter()
        .find(|ty| self.definition_of(ty) == Some(def))
    }
}

/// A field to add to a type.
#[derive(Debug, Clone)]
pub struct NewField {
    /// Field name.
    pub name: String,
    /// Declared type.
    pub ty: RuntimeType,
    /// Attribute bits.
    pub flags: FieldAttributes,
    /// Marked `[ThreadStatic]`.
    pub thread_static: bool,
    /// Explicit offset.
    pub offset: Option<u32>,
}

impl NewField {
    /// A public instance field.
    pub fn instance(name: impl Into<String>, ty: RuntimeType) -> Self {
        NewField {
            name: name.into(),
            ty,
            flags: FieldAttributes::PUBLIC,
            thread_static: false,
            offset: None,
        }
    }

    /// A public static field.
    pub fn statik(name: impl Into<String>, ty: RuntimeType) -> Self {
        NewField {
            flags: FieldAttributes::PUBLIC | FieldAttributes::STATIC,
            ..NewField::instance(name, ty)
        }
    }

    /// A public `[ThreadStatic]` field.
    pub fn thread_static(name: impl Into<String>, ty: RuntimeType) -> Self {
        NewField {
            thread_static: true,
            ..NewField::statik(name, ty)
        }
    }

    /// A public constant.
    pub fn literal(name: impl Into<String>, ty: RuntimeType) -> Self {
        NewField {
            flags: FieldAttributes::PUBLIC
                | FieldAttributes::STATIC
                | FieldAttributes::LITERAL
                | FieldAttributes::HAS_DEFAULT,
            ..NewField::instance(name, ty)
        }
    }

    /// Places the field at an explicit offset.
    #[must_use]
    pub fn at(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// A method to add to a type.
#[derive(Debug, Clone)]
pub struct NewMethod {
    /// Method name.
    pub name: String,
    /// Attribute bits.
    pub flags: MethodAttributes,
    /// `MethodImplAttributes` bits.
    pub impl_flags: u16,
    /// Return type.
    pub return_type: RuntimeType,
    /// Parameter names and types.
    pub parameters: Vec<(String, RuntimeType)>,
    /// Generic parameter names.
    pub generic_parameters: Vec<String>,
    /// Whether AOT code exists for the method.
    pub aot: bool,
}

impl NewMethod {
    /// A public, non-virtual instance method returning `void`.
    pub fn instance(name: impl Into<String>) -> Self {
        NewMethod {
            name: name.into(),
            flags: MethodAttributes::PUBLIC | MethodAttributes::HIDE_BY_SIG,
            impl_flags: 0,
            return_type: RuntimeType::Void,
            parameters: Vec::new(),
            generic_parameters: Vec::new(),
            aot: true,
        }
    }

    /// A public instance constructor.
    #[must_use]
    pub fn ctor() -> Self {
        let mut method = NewMethod::instance(".ctor");
        method.flags |= MethodAttributes::SPECIAL_NAME | MethodAttributes::RT_SPECIAL_NAME;
        method
    }

    /// A public static method.
    pub fn statik(name: impl Into<String>) -> Self {
        let mut method = NewMethod::instance(name);
        method.flags |= MethodAttributes::STATIC;
        method
    }

    /// Sets the return type.
    #[must_use]
    pub fn returns(mut self, ty: RuntimeType) -> Self {
        self.return_type = ty;
        self
    }

    /// Appends a parameter.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, ty: RuntimeType) -> Self {
        self.parameters.push((name.into(), ty));
        self
    }

    /// Makes the method virtual, reusing an inherited slot with the same signature.
    #[must_use]
    pub fn virtual_(mut self) -> Self {
        self.flags |= MethodAttributes::VIRTUAL;
        self
    }

    /// Makes the method virtual in a fresh slot.
    #[must_use]
    pub fn new_slot(mut self) -> Self {
        self.flags |= MethodAttributes::VIRTUAL | MethodAttributes::NEW_SLOT;
        self
    }

    /// Makes the method abstract (and virtual, in a fresh slot).
    #[must_use]
    pub fn abstract_(mut self) -> Self {
        self.flags |=
            MethodAttributes::VIRTUAL | MethodAttributes::NEW_SLOT | MethodAttributes::ABSTRACT;
        self.aot = false;
        self
    }

    /// Makes the method final.
    #[must_use]
    pub fn sealed(mut self) -> Self {
        self.flags |= MethodAttributes::FINAL;
        self
    }

    /// Declares generic parameters.
    #[must_use]
    pub fn generic(mut self, names: &[&str]) -> Self {
        self.generic_parameters = names.iter().map(|n| (*n).to_string()).collect();
        self
    }

    /// Marks the method as having no AOT code.
    #[must_use]
    pub fn interpreted(mut self) -> Self {
        self.aot = false;
        self
    }
}

/// A property to add to a type. Accessors name methods of the same body.
#[derive(Debug, Clone)]
pub struct NewProperty {
    /// Property name.
    pub name: String,
    /// Getter method name.
    pub get: Option<String>,
    /// Setter method name.
    pub set: Option<String>,
}

impl NewProperty {
    /// A property with the given accessors.
    pub fn new(name: impl Into<String>, get: Option<&str>, set: Option<&str>) -> Self {
        NewProperty {
            name: name.into(),
            get: get.map(str::to_string),
            set: set.map(str::to_string),
        }
    }
}

/// An event to add to a type. Accessors name methods of the same body.
#[derive(Debug, Clone)]
pub struct NewEvent {
    /// Event name.
    pub name: String,
    /// Delegate type.
    pub ty: RuntimeType,
    /// Add accessor name.
    pub add: Option<String>,
    /// Remove accessor name.
    pub remove: Option<String>,
    /// Raise accessor name.
    pub raise: Option<String>,
}

/// An explicit override: the method named `body` implements `declaration` of `declaring_type`.
#[derive(Debug, Clone)]
pub struct NewOverride {
    /// The type declaring the overridden method, possibly a generic instance.
    pub declaring_type: RuntimeType,
    /// The overridden method definition.
    pub declaration: MethodIndex,
    /// Name of the implementing method of this body.
    pub body: String,
}

/// The members and layout of a declared type.
#[derive(Debug, Clone, Default)]
pub struct TypeBody {
    /// Base type.
    pub parent: Option<RuntimeType>,
    /// Fields, in declaration order.
    pub fields: Vec<NewField>,
    /// Methods, in declaration order.
    pub methods: Vec<NewMethod>,
    /// Properties.
    pub properties: Vec<NewProperty>,
    /// Events.
    pub events: Vec<NewEvent>,
    /// Implemented interfaces.
    pub interfaces: Vec<RuntimeType>,
    /// Generic parameter names of a generic definition.
    pub generic_parameters: Vec<String>,
    /// Explicit overrides.
    pub overrides: Vec<NewOverride>,
    /// `ClassLayout.PackingSize`.
    pub packing_size: u8,
    /// `ClassLayout.ClassSize`.
    pub class_size: u32,
}

impl TypeBody {
    /// A reference type deriving from `System.Object`.
    #[must_use]
    pub fn class(corlib: &CorlibTypes) -> Self {
        TypeBody {
            parent: Some(RuntimeType::Class(corlib.object)),
            ..TypeBody::default()
        }
    }

    /// A value type deriving from `System.ValueType`.
    #[must_use]
    pub fn value_type(corlib: &CorlibTypes) -> Self {
        TypeBody {
            parent: Some(RuntimeType::Class(corlib.value_type)),
            ..TypeBody::default()
        }
    }

    /// An enum with the given underlying type.
    #[must_use]
    pub fn enumeration(corlib: &CorlibTypes, underlying: RuntimeType) -> Self {
        let mut value = NewField::instance("value__", underlying);
        value.flags |= FieldAttributes::SPECIAL_NAME | FieldAttributes::RT_SPECIAL_NAME;
        TypeBody {
            parent: Some(RuntimeType::Class(corlib.enum_type)),
            fields: vec![value],
            ..TypeBody::default()
        }
    }

    /// An interface (no parent).
    #[must_use]
    pub fn interface() -> Self {
        TypeBody::default()
    }

    /// Sets the base type.
    #[must_use]
    pub fn extends(mut self, parent: RuntimeType) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Appends a field.
    #[must_use]
    pub fn field(mut self, field: NewField) -> Self {
        self.fields.push(field);
        self
    }

    /// Appends a method.
    #[must_use]
    pub fn method(mut self, method: NewMethod) -> Self {
        self.methods.push(method);
        self
    }

    /// Appends a property.
    #[must_use]
    pub fn property(mut self, property: NewProperty) -> Self {
        self.properties.push(property);
        self
    }

    /// Appends an event.
    #[must_use]
    pub fn event(mut self, event: NewEvent) -> Self {
        self.events.push(event);
        self
    }

    /// Appends an implemented interface.
    #[must_use]
    pub fn implements(mut self, interface: RuntimeType) -> Self {
        self.interfaces.push(interface);
        self
    }

    /// Declares generic parameters.
    #[must_use]
    pub fn generic(mut self, names: &[&str]) -> Self {
        self.generic_parameters = names.iter().map(|n| (*n).to_string()).collect();
        self
    }

    /// Appends an explicit override.
    #[must_use]
    pub fn overrides(mut self, item: NewOverride) -> Self {
        self.overrides.push(item);
        self
    }

    /// Sets `ClassLayout.PackingSize`.
    #[must_use]
    pub fn packing(mut self, packing_size: u8) -> Self {
        self.packing_size = packing_size;
        self
    }

    /// Sets `ClassLayout.ClassSize`.
    #[must_use]
    pub fn size(mut self, class_size: u32) -> Self {
        self.class_size = class_size;
        self
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct ImageRows {
    fields: u32,
    methods: u32,
}

/// Builder for [`AotMetadata`].
#[derive(Debug, Default)]
pub struct AotMetadataBuilder {
    assemblies: Vec<AssemblyDefinition>,
    images: Vec<ImageDefinition>,
    type_defs: Vec<TypeDefinition>,
    defined: Vec<bool>,
    fields: Vec<FieldDefinition>,
    methods: Vec<MethodDefinition>,
    parameters: Vec<ParameterDefinition>,
    properties: Vec<PropertyDefinition>,
    events: Vec<EventDefinition>,
    generic_containers: Vec<GenericContainer>,
    generic_parameters: Vec<GenericParameter>,
    types: Vec<RuntimeType>,
    handles: HashMap<RuntimeType, TypeIndex>,
    interfaces: Vec<TypeIndex>,
    rows: Vec<ImageRows>,
    corlib: Option<CorlibTypes>,
    next_code: u32,
}

impl AotMetadataBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        AotMetadataBuilder::default()
    }

    /// The corlib definitions, once registered.
    #[must_use]
    pub fn corlib(&self) -> Option<CorlibTypes> {
        self.corlib
    }

    /// Interns a type handle.
    pub fn intern_type(&mut self, ty: RuntimeType) -> TypeIndex {
        if let Some(index) = self.handles.get(&ty) {
            return *index;
        }
        let index = TypeIndex::from(self.types.len());
        self.types.push(ty.clone());
        self.handles.insert(ty, index);
        index
    }

    /// Finds an assembly added earlier.
    #[must_use]
    pub fn find_assembly(&self, name: &str) -> Option<AssemblyIndex> {
        self.assemblies
            .iter()
            .position(|a| a.name == name)
            .map(AssemblyIndex::from)
    }

    /// Finds a declared top-level type by image, namespace and name.
    #[must_use]
    pub fn find_type(&self, assembly: AssemblyIndex, namespace: &str, name: &str) -> Option<TypeDefIndex> {
        let image = self.assemblies.get(assembly.index())?.image;
        let rows = self.images.get(image.index())?.types.clone();
        rows.map(TypeDefIndex).find(|idx| {
            self.type_defs.get(idx.index()).is_some_and(|t| {
                t.declaring_type.is_none() && t.namespace == namespace && t.name == name
            })
        })
    }

    /// Finds a declared type nested directly in `declaring`.
    #[must_use]
    pub fn find_nested_type(&self, declaring: TypeDefIndex, name: &str) -> Option<TypeDefIndex> {
        self.type_defs
            .iter()
            .position(|t| t.declaring_type == Some(declaring) && t.name == name)
            .map(TypeDefIndex::from)
    }

    /// Finds a method of a defined type by name.
    #[must_use]
    pub fn method_index(&self, def: TypeDefIndex, name: &str) -> Option<MethodIndex> {
        let range = self.type_defs.get(def.index())?.methods.clone();
        range
            .map(MethodIndex)
            .find(|m| self.methods.get(m.index()).is_some_and(|m| m.name == name))
    }

    /// Adds an assembly with a single image. The image starts with its `<Module>` type.
    pub fn add_assembly(&mut self, name: &str, version: [u16; 4]) -> Result<AssemblyIndex> {
        self.add_assembly_impl(name, version, true)
    }

    /// Adds an assembly that has no AOT code, so homologous images can not bind to it.
    pub fn add_interpreter_assembly(&mut self, name: &str, version: [u16; 4]) -> Result<AssemblyIndex> {
        self.add_assembly_impl(name, version, false)
    }

    fn add_assembly_impl(
        &mut self,
        name: &str,
        version: [u16; 4],
        aot_compiled: bool,
    ) -> Result<AssemblyIndex> {
        if self.find_assembly(name).is_some() {
            return Err(Error::NotSupported(format!("assembly '{name}' added twice")));
        }

        let assembly = AssemblyIndex::from(self.assemblies.len());
        let image = ImageIndex::from(self.images.len());
        let start = u32::try_from(self.type_defs.len()).map_err(|_| out_of_bounds_error!())?;
        self.assemblies.push(AssemblyDefinition {
            name: name.to_string(),
            version,
            image,
        });
        self.images.push(ImageDefinition {
            name: format!("{name}.dll"),
            assembly,
            types: start..start,
            aot_compiled,
        });
        self.rows.push(ImageRows::default());

        let module = self.declare_type(assembly, "", "<Module>", TypeAttributes::empty())?;
        self.define_type(module, TypeBody::default())?;
        Ok(assembly)
    }

    /// Declares a top-level type in the most recently added assembly.
    pub fn declare_type(
        &mut self,
        assembly: AssemblyIndex,
        namespace: &str,
        name: &str,
        flags: TypeAttributes,
    ) -> Result<TypeDefIndex> {
        let image = self
            .assemblies
            .get(assembly.index())
            .ok_or_else(|| Error::TypeNotFound(format!("{assembly}")))?
            .image;
        self.declare_in(image, namespace, name, flags, None)
    }

    /// Declares a type nested in `declaring`, which must belong to the most recently added assembly.
    pub fn declare_nested_type(
        &mut self,
        declaring: TypeDefIndex,
        name: &str,
        flags: TypeAttributes,
    ) -> Result<TypeDefIndex> {
        let image = self
            .type_defs
            .get(declaring.index())
            .ok_or_else(|| Error::TypeNotFound(format!("{declaring}")))?
            .image;
        self.declare_in(image, "", name, flags, Some(declaring))
    }

    fn declare_in(
        &mut self,
        image: ImageIndex,
        namespace: &str,
        name: &str,
        flags: TypeAttributes,
        declaring_type: Option<TypeDefIndex>,
    ) -> Result<TypeDefIndex> {
        let next = u32::try_from(self.type_defs.len()).map_err(|_| out_of_bounds_error!())?;
        let image_def = self
            .images
            .get_mut(image.index())
            .ok_or_else(|| out_of_bounds_error!())?;
        if image_def.types.end != next {
            return Err(Error::NotSupported(format!(
                "types of '{}' must be declared before the next assembly is added",
                image_def.name
            )));
        }
        image_def.types.end += 1;
        let row = next - image_def.types.start + 1;

        let def = TypeDefIndex(next);
        let byval_type = self.intern_type(RuntimeType::Class(def));
        self.type_defs.push(TypeDefinition {
            name: name.to_string(),
            namespace: namespace.to_string(),
            token: TableId::TypeDef.token(row),
            image,
            flags,
            parent: None,
            declaring_type,
            byval_type,
            fields: 0..0,
            methods: 0..0,
            properties: 0..0,
            events: 0..0,
            nested_types: 0..0,
            interfaces: 0..0,
            overrides: Vec::new(),
            generic_container: None,
            packing_size: 0,
            class_size: 0,
        });
        self.defined.push(false);
        Ok(def)
    }

    fn len_u32(len: usize) -> Result<u32> {
        u32::try_from(len).map_err(|_| out_of_bounds_error!())
    }

    fn push_generic_container(&mut self, owner: GenericOwner, names: &[String]) -> Result<Option<GenericContainerIndex>> {
        if names.is_empty() {
            return Ok(None);
        }
        let container = GenericContainerIndex::from(self.generic_containers.len());
        let start = Self::len_u32(self.generic_parameters.len())?;
        for (number, name) in names.iter().enumerate() {
            self.generic_parameters.push(GenericParameter {
                name: name.clone(),
                number: u16::try_from(number).map_err(|_| out_of_bounds_error!())?,
                flags: 0,
                owner: container,
                constraints: Vec::new(),
            });
        }
        let end = Self::len_u32(self.generic_parameters.len())?;
        self.generic_containers.push(GenericContainer {
            owner,
            parameters: start..end,
        });
        Ok(Some(container))
    }

    fn is_value_type_parent(&self, def: TypeDefIndex, parent: Option<&RuntimeType>) -> bool {
        let (Some(corlib), Some(RuntimeType::Class(parent))) = (self.corlib, parent) else {
            return false;
        };
        (*parent == corlib.value_type && def != corlib.enum_type) || *parent == corlib.enum_type
    }

    /// Gives a declared type its members and layout.
    pub fn define_type(&mut self, def: TypeDefIndex, body: TypeBody) -> Result<()> {
        match self.defined.get(def.index()) {
            None => return Err(Error::TypeNotFound(format!("{def}"))),
            Some(true) => {
                return Err(Error::NotSupported(format!("{def} defined twice")));
            }
            Some(false) => {}
        }
        let image = self.type_defs[def.index()].image;

        let generic_container =
            self.push_generic_container(GenericOwner::Type(def), &body.generic_parameters)?;
        let value_type = self.is_value_type_parent(def, body.parent.as_ref());
        let parent = body.parent.map(|p| self.intern_type(p));
        let byval_type = if value_type {
            self.intern_type(RuntimeType::ValueType(def))
        } else {
            self.type_defs[def.index()].byval_type
        };

        let field_start = Self::len_u32(self.fields.len())?;
        for field in body.fields {
            let ty = self.intern_type(field.ty);
            let rows = &mut self.rows[image.index()];
            rows.fields += 1;
            let token = TableId::Field.token(rows.fields);
            self.fields.push(FieldDefinition {
                name: field.name,
                ty,
                token,
                flags: field.flags,
                thread_static: field.thread_static,
                offset: field.offset,
            });
        }
        let field_end = Self::len_u32(self.fields.len())?;

        let method_start = Self::len_u32(self.methods.len())?;
        for method in body.methods {
            let index = MethodIndex::from(self.methods.len());
            let container =
                self.push_generic_container(GenericOwner::Method(index), &method.generic_parameters)?;
            let return_type = self.intern_type(method.return_type);
            let param_start = Self::len_u32(self.parameters.len())?;
            for (name, ty) in method.parameters {
                let ty = self.intern_type(ty);
                self.parameters.push(ParameterDefinition { name, ty });
            }
            let param_end = Self::len_u32(self.parameters.len())?;
            let code = if method.aot && !method.flags.contains(MethodAttributes::ABSTRACT) {
                self.next_code += 1;
                Some(self.next_code - 1)
            } else {
                None
            };
            let rows = &mut self.rows[image.index()];
            rows.methods += 1;
            let token = TableId::MethodDef.token(rows.methods);
            self.methods.push(MethodDefinition {
                name: method.name,
                declaring_type: def,
                token,
                flags: method.flags,
                impl_flags: method.impl_flags,
                return_type,
                parameters: param_start..param_end,
                generic_container: container,
                code,
            });
        }
        let method_end = Self::len_u32(self.methods.len())?;

        let find = |methods: &[MethodDefinition], name: &Option<String>| -> Result<Option<MethodIndex>> {
            let Some(name) = name else {
                return Ok(None);
            };
            methods[method_start as usize..method_end as usize]
                .iter()
                .position(|m| &m.name == name)
                .map(|pos| Some(MethodIndex(method_start + pos as u32)))
                .ok_or_else(|| Error::MethodNotFound {
                    type_name: format!("{def}"),
                    method: name.clone(),
                })
        };

        let property_start = Self::len_u32(self.properties.len())?;
        for property in body.properties {
            let get = find(&self.methods, &property.get)?;
            let set = find(&self.methods, &property.set)?;
            self.properties.push(PropertyDefinition {
                name: property.name,
                flags: 0,
                get,
                set,
            });
        }
        let property_end = Self::len_u32(self.properties.len())?;

        let event_start = Self::len_u32(self.events.len())?;
        for event in body.events {
            let add = find(&self.methods, &event.add)?;
            let remove = find(&self.methods, &event.remove)?;
            let raise = find(&self.methods, &event.raise)?;
            let ty = self.intern_type(event.ty);
            self.events.push(EventDefinition {
                name: event.name,
                ty,
                add,
                remove,
                raise,
            });
        }
        let event_end = Self::len_u32(self.events.len())?;

        let mut overrides = Vec::with_capacity(body.overrides.len());
        for item in body.overrides {
            let Some(body_method) = find(&self.methods, &Some(item.body))? else {
                continue;
            };
            let declaring_type = self.intern_type(item.declaring_type);
            overrides.push(MethodOverride {
                declaring_type,
                declaration: item.declaration,
                body: body_method,
            });
        }

        let interface_start = Self::len_u32(self.interfaces.len())?;
        for interface in body.interfaces {
            let handle = self.intern_type(interface);
            self.interfaces.push(handle);
        }
        let interface_end = Self::len_u32(self.interfaces.len())?;

        let type_def = &mut self.type_defs[def.index()];
        type_def.parent = parent;
        type_def.byval_type = byval_type;
        type_def.fields = field_start..field_end;
        type_def.methods = method_start..method_end;
        type_def.properties = property_start..property_end;
        type_def.events = event_start..event_end;
        type_def.interfaces = interface_start..interface_end;
        type_def.overrides = overrides;
        type_def.generic_container = generic_container;
        type_def.packing_size = body.packing_size;
        type_def.class_size = body.class_size;
        self.defined[def.index()] = true;
        Ok(())
    }

    /// Registers `mscorlib` with the core library types. Calling it again returns the same set.
    pub fn with_corlib(&mut self) -> Result<CorlibTypes> {
        if let Some(corlib) = self.corlib {
            return Ok(corlib);
        }

        let asm = self.add_assembly("mscorlib", [4, 0, 0, 0])?;
        let public = TypeAttributes::PUBLIC;
        let sealed = TypeAttributes::PUBLIC | TypeAttributes::SEALED;
        let abstract_ = TypeAttributes::PUBLIC | TypeAttributes::ABSTRACT;
        let sys = "System";

        let corlib = CorlibTypes {
            object: self.declare_type(asm, sys, "Object", public)?,
            value_type: self.declare_type(asm, sys, "ValueType", abstract_)?,
            enum_type: self.declare_type(asm, sys, "Enum", abstract_)?,
            string: self.declare_type(asm, sys, "String", sealed)?,
            array: self.declare_type(asm, sys, "Array", abstract_)?,
            void: self.declare_type(asm, sys, "Void", sealed)?,
            boolean: self.declare_type(asm, sys, "Boolean", sealed)?,
            char: self.declare_type(asm, sys, "Char", sealed)?,
            sbyte: self.declare_type(asm, sys, "SByte", sealed)?,
            byte: self.declare_type(asm, sys, "Byte", sealed)?,
            int16: self.declare_type(asm, sys, "Int16", sealed)?,
            uint16: self.declare_type(asm, sys, "UInt16", sealed)?,
            int32: self.declare_type(asm, sys, "Int32", sealed)?,
            uint32: self.declare_type(asm, sys, "UInt32", sealed)?,
            int64: self.declare_type(asm, sys, "Int64", sealed)?,
            uint64: self.declare_type(asm, sys, "UInt64", sealed)?,
            single: self.declare_type(asm, sys, "Single", sealed)?,
            double: self.declare_type(asm, sys, "Double", sealed)?,
            intptr: self.declare_type(asm, sys, "IntPtr", sealed)?,
            uintptr: self.declare_type(asm, sys, "UIntPtr", sealed)?,
            typed_reference: self.declare_type(asm, sys, "TypedReference", sealed)?,
        };
        self.corlib = Some(corlib);

        let object = RuntimeType::Class(corlib.object);
        let family_virtual =
            MethodAttributes::from_bits_retain(0x0004) | MethodAttributes::VIRTUAL | MethodAttributes::HIDE_BY_SIG;
        self.define_type(
            corlib.object,
            TypeBody::default()
                .method(NewMethod::ctor())
                .method(
                    NewMethod::instance("Equals")
                        .new_slot()
                        .param("obj", RuntimeType::Object)
                        .returns(RuntimeType::Boolean),
                )
                .method(NewMethod {
                    flags: family_virtual | MethodAttributes::NEW_SLOT,
                    ..NewMethod::instance("Finalize")
                })
                .method(NewMethod::instance("GetHashCode").new_slot().returns(RuntimeType::I4))
                .method(NewMethod::instance("ToString").new_slot().returns(RuntimeType::String)),
        )?;
        self.define_type(
            corlib.value_type,
            TypeBody::default()
                .extends(object.clone())
                .method(
                    NewMethod::instance("Equals")
                        .virtual_()
                        .param("obj", RuntimeType::Object)
                        .returns(RuntimeType::Boolean),
                )
                .method(NewMethod::instance("GetHashCode").virtual_().returns(RuntimeType::I4))
                .method(NewMethod::instance("ToString").virtual_().returns(RuntimeType::String)),
        )?;
        self.define_type(
            corlib.enum_type,
            TypeBody::default()
                .extends(RuntimeType::Class(corlib.value_type))
                .method(NewMethod::instance("ToString").virtual_().returns(RuntimeType::String)),
        )?;
        self.define_type(
            corlib.string,
            TypeBody::class(&corlib)
                .field(NewField::instance("_stringLength", RuntimeType::I4))
                .field(NewField::instance("_firstChar", RuntimeType::Char))
                .field(NewField::statik("Empty", RuntimeType::String))
                .method(NewMethod::instance("get_Length").returns(RuntimeType::I4))
                .property(NewProperty::new("Length", Some("get_Length"), None)),
        )?;
        self.define_type(
            corlib.array,
            TypeBody::class(&corlib)
                .method(NewMethod::instance("get_Length").returns(RuntimeType::I4))
                .method(NewMethod::instance("get_Rank").returns(RuntimeType::I4))
                .property(NewProperty::new("Length", Some("get_Length"), None))
                .property(NewProperty::new("Rank", Some("get_Rank"), None)),
        )?;
        self.define_type(corlib.void, TypeBody::value_type(&corlib))?;

        let primitives = [
            (corlib.boolean, RuntimeType::Boolean),
            (corlib.char, RuntimeType::Char),
            (corlib.sbyte, RuntimeType::I1),
            (corlib.byte, RuntimeType::U1),
            (corlib.int16, RuntimeType::I2),
            (corlib.uint16, RuntimeType::U2),
            (corlib.int32, RuntimeType::I4),
            (corlib.uint32, RuntimeType::U4),
            (corlib.int64, RuntimeType::I8),
            (corlib.uint64, RuntimeType::U8),
            (corlib.single, RuntimeType::R4),
            (corlib.double, RuntimeType::R8),
            (corlib.intptr, RuntimeType::I),
            (corlib.uintptr, RuntimeType::U),
        ];
        for (def, ty) in primitives {
            self.define_type(
                def,
                TypeBody::value_type(&corlib).field(NewField {
                    flags: FieldAttributes::PRIVATE,
                    ..NewField::instance("m_value", ty)
                }),
            )?;
        }
        self.define_type(
            corlib.typed_reference,
            TypeBody::value_type(&corlib)
                .field(NewField::instance("type", RuntimeType::I))
                .field(NewField::instance("Value", RuntimeType::I))
                .field(NewField::instance("Type", RuntimeType::I)),
        )?;

        debug!(types = self.type_defs.len(), "registered corlib");
        Ok(corlib)
    }

    /// Finishes the store. Every declared type must have been defined.
    pub fn build(self) -> Result<AotMetadata> {
        let corlib = self
            .corlib
            .ok_or_else(|| Error::Configuration("the core library has not been registered".to_string()))?;
        if let Some(pending) = self.defined.iter().position(|d| !d) {
            let def = &self.type_defs[pending];
            return Err(Error::TypeLoad(format!(
                "type '{}' was declared but never defined",
                def.full_name()
            )));
        }

        let mut type_defs = self.type_defs;
        let mut by_declaring: HashMap<TypeDefIndex, Vec<TypeDefIndex>> = HashMap::new();
        for (index, def) in type_defs.iter().enumerate() {
            if let Some(declaring) = def.declaring_type {
                by_declaring
                    .entry(declaring)
                    .or_default()
                    .push(TypeDefIndex::from(index));
            }
        }
        let mut nested_types = Vec::new();
        for (index, def) in type_defs.iter_mut().enumerate() {
            let start = Self::len_u32(nested_types.len())?;
            if let Some(nested) = by_declaring.remove(&TypeDefIndex::from(index)) {
                nested_types.extend(nested);
            }
            def.nested_types = start..Self::len_u32(nested_types.len())?;
        }

        let type_names = type_defs
            .iter()
            .enumerate()
            .filter(|(_, def)| def.declaring_type.is_none())
            .map(|(index, def)| {
                (
                    (def.image, def.namespace.clone(), def.name.clone()),
                    TypeDefIndex::from(index),
                )
            })
            .collect();
        let assembly_names = self
            .assemblies
            .iter()
            .enumerate()
            .map(|(index, a)| (a.name.clone(), AssemblyIndex::from(index)))
            .collect();

        debug!(
            assemblies = self.assemblies.len(),
            types = type_defs.len(),
            methods = self.methods.len(),
            "built AOT metadata"
        );

        Ok(AotMetadata {
            assemblies: self.assemblies,
            images: self.images,
            type_defs,
            fields: self.fields,
            methods: self.methods,
            parameters: self.parameters,
            properties: self.properties,
            events: self.events,
            generic_containers: self.generic_containers,
            generic_parameters: self.generic_parameters,
            types: self.types,
            nested_types,
            interfaces: self.interfaces,
            corlib,
            type_names,
            assembly_names,
        })
    }
}
