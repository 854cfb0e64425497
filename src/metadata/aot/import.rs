//! Populating the AOT store from ECMA-335 images.
//!
//! An AOT build carries the same type, field and method rows as the assemblies it was compiled
//! from, so the store can be filled by reading those assemblies directly. Types are declared for
//! the whole image first and defined afterwards, so signatures may refer to any type of the image.

use tracing::{debug, info};

use crate::{
    metadata::{
        aot::{
            AotMetadata, AotMetadataBuilder, AssemblyIndex, CorlibTypes, NewField, NewMethod,
            TypeBody, TypeDefIndex,
        },
        raw::RawImage,
        scope::{ImageScope, TypeLookup},
        signatures::{parse_field_signature, parse_method_signature},
        token::TableId,
    },
    typesystem::{FieldAttributes, MethodAttributes, MethodShape, RuntimeType, TypeAttributes},
    Error, Result,
};

impl TypeLookup for AotMetadataBuilder {
    fn corlib_types(&self) -> Option<CorlibTypes> {
        self.corlib()
    }

    fn lookup_assembly(&self, name: &str) -> Option<AssemblyIndex> {
        self.find_assembly(name)
    }

    fn lookup_type(&self, assembly: AssemblyIndex, namespace: &str, name: &str) -> Option<TypeDefIndex> {
        self.find_type(assembly, namespace, name)
    }

    fn lookup_nested_type(&self, declaring: TypeDefIndex, name: &str) -> Option<TypeDefIndex> {
        self.find_nested_type(declaring, name)
    }
}

impl TypeLookup for AotMetadata {
    fn corlib_types(&self) -> Option<CorlibTypes> {
        Some(self.corlib)
    }

    fn lookup_assembly(&self, name: &str) -> Option<AssemblyIndex> {
        self.find_assembly(name)
    }

    fn lookup_type(&self, assembly: AssemblyIndex, namespace: &str, name: &str) -> Option<TypeDefIndex> {
        let image = self.assembly(assembly).ok()?.image;
        self.find_type(image, namespace, name)
    }

    fn lookup_nested_type(&self, declaring: TypeDefIndex, name: &str) -> Option<TypeDefIndex> {
        self.find_nested_type(declaring, name)
    }
}

impl AotMetadataBuilder {
    /// Adds the assembly described by `image`, with every type, field and method it defines.
    ///
    /// Referenced assemblies must have been added before. Row 1 of `TypeDef` must be `<Module>`.
    pub fn import_image(&mut self, image: &RawImage) -> Result<AssemblyIndex> {
        let assembly_row = image.assembly()?;
        let type_count = image.row_count(TableId::TypeDef);
        if type_count == 0 || image.type_def(1)?.name != "<Module>" {
            return Err(malformed_error!(
                "Image '{}' does not start with <Module>",
                assembly_row.name
            ));
        }

        let assembly = self.add_assembly(assembly_row.name, assembly_row.version)?;
        let module = self
            .find_type(assembly, "", "<Module>")
            .ok_or_else(|| malformed_error!("<Module> was not registered"))?;

        for row in 2..=type_count {
            let type_def = image.type_def(row)?;
            let flags = TypeAttributes::from_bits_retain(type_def.flags);
            match image.enclosing_type(row)? {
                Some(enclosing) if enclosing >= row || enclosing == 0 => {
                    return Err(Error::NotSupported(format!(
                        "nested TypeDef {row} precedes its enclosing type {enclosing}"
                    )));
                }
                Some(enclosing) => {
                    self.declare_nested_type(TypeDefIndex(module.0 + enclosing - 1), type_def.name, flags)?;
                }
                None => {
                    self.declare_type(assembly, type_def.namespace, type_def.name, flags)?;
                }
            }
        }

        for row in 2..=type_count {
            let body = self.import_body(image, assembly, module, row)?;
            self.define_type(TypeDefIndex(module.0 + row - 1), body)?;
        }

        info!(
            assembly = assembly_row.name,
            types = type_count,
            "imported AOT image"
        );
        Ok(assembly)
    }

    fn import_body(
        &self,
        image: &RawImage,
        assembly: AssemblyIndex,
        module: TypeDefIndex,
        row: u32,
    ) -> Result<TypeBody> {
        let scope = ImageScope::new(self, image, assembly, module)?;
        let type_def = image.type_def(row)?;
        let token = TableId::TypeDef.token(row);

        let mut body = TypeBody {
            parent: type_def
                .extends
                .map(|parent| scope.resolve_class_token(parent))
                .transpose()?,
            generic_parameters: image
                .generic_params_of(token)?
                .iter()
                .map(|p| p.name.to_string())
                .collect(),
            ..TypeBody::default()
        };

        for interface in image.interface_impls(row)? {
            body.interfaces.push(scope.resolve_class_token(interface)?);
        }

        if let Some((packing_size, class_size)) = image.class_layout(row)? {
            body.packing_size = u8::try_from(packing_size)
                .map_err(|_| malformed_error!("TypeDef {} has packing {}", row, packing_size))?;
            body.class_size = class_size;
        }

        for field_row in image.type_field_range(row)? {
            let field = image.field(field_row)?;
            let signature = parse_field_signature(field.signature)?;
            body.fields.push(NewField {
                name: field.name.to_string(),
                ty: RuntimeType::from_signature(&signature.base, &scope)?,
                flags: FieldAttributes::from_bits_retain(field.flags),
                thread_static: false,
                offset: image.field_offset(field_row)?,
            });
        }

        let methods = image.type_method_range(row)?;
        let method_count = image.row_count(TableId::MethodDef);
        for method_row in methods {
            let method = image.method_def(method_row)?;
            let shape = MethodShape::from_signature(&parse_method_signature(method.signature)?, &scope)?;

            let param_end = if method_row < method_count {
                image.method_def(method_row + 1)?.param_list
            } else {
                image.row_count(TableId::Param) + 1
            };
            let mut names = vec![None; shape.params.len()];
            for param_row in method.param_list..param_end {
                let sequence = image.column(TableId::Param, param_row, 1)? as usize;
                if sequence >= 1 && sequence <= names.len() {
                    names[sequence - 1] = Some(image.param_name(param_row)?.to_string());
                }
            }

            let flags = MethodAttributes::from_bits_retain(method.flags);
            body.methods.push(NewMethod {
                name: method.name.to_string(),
                flags,
                impl_flags: method.impl_flags,
                return_type: shape.return_type,
                parameters: shape
                    .params
                    .into_iter()
                    .zip(names)
                    .enumerate()
                    .map(|(i, (ty, name))| (name.unwrap_or_else(|| format!("arg{i}")), ty))
                    .collect(),
                generic_parameters: image
                    .generic_params_of(TableId::MethodDef.token(method_row))?
                    .iter()
                    .map(|p| p.name.to_string())
                    .collect(),
                aot: !flags.contains(MethodAttributes::ABSTRACT),
            });
        }

        debug!(
            name = type_def.name,
            fields = body.fields.len(),
            methods = body.methods.len(),
            "imported type"
        );
        Ok(body)
    }
}
