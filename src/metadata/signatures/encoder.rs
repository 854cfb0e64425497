use crate::{
    file::parser::{write_compressed_token, write_compressed_uint},
    metadata::signatures::{
        CustomModifier, SignatureField, SignatureMethod, SignatureMethodSpec, SignatureParameter,
        TypeSignature, ELEMENT_TYPE, SIGNATURE_HEADER,
    },
    Result,
};

/// Encodes signatures into blob form, the inverse of [`crate::metadata::signatures::SignatureParser`].
#[derive(Default)]
pub struct SignatureEncoder {
    out: Vec<u8>,
}

impl SignatureEncoder {
    /// Creates an empty encoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the encoded blob.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.out
    }

    /// Encodes a `FieldSig`.
    pub fn field(sig: &SignatureField) -> Result<Vec<u8>> {
        let mut encoder = SignatureEncoder::new();
        encoder.out.push(SIGNATURE_HEADER::FIELD);
        encoder.modifiers(&sig.modifiers)?;
        encoder.write_type(&sig.base)?;
        Ok(encoder.finish())
    }

    /// Encodes a method signature.
    pub fn method(sig: &SignatureMethod) -> Result<Vec<u8>> {
        let mut encoder = SignatureEncoder::new();
        encoder.write_method(sig)?;
        Ok(encoder.finish())
    }

    /// Encodes a `TypeSpec` blob.
    pub fn type_spec(sig: &TypeSignature) -> Result<Vec<u8>> {
        let mut encoder = SignatureEncoder::new();
        encoder.write_type(sig)?;
        Ok(encoder.finish())
    }

    /// Encodes a `MethodSpec` instantiation blob.
    pub fn method_spec(sig: &SignatureMethodSpec) -> Result<Vec<u8>> {
        let mut encoder = SignatureEncoder::new();
        encoder.out.push(SIGNATURE_HEADER::GENERIC_INST);
        encoder.count(sig.generic_args.len())?;
        for arg in &sig.generic_args {
            encoder.write_type(arg)?;
        }
        Ok(encoder.finish())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn count(&mut self, value: usize) -> Result<()> {
        write_compressed_uint(&mut self.out, value as u32)
    }

    fn modifiers(&mut self, modifiers: &[CustomModifier]) -> Result<()> {
        for modifier in modifiers {
            self.out.push(if modifier.required {
                ELEMENT_TYPE::CMOD_REQD
            } else {
                ELEMENT_TYPE::CMOD_OPT
            });
            write_compressed_token(&mut self.out, modifier.modifier)?;
        }
        Ok(())
    }

    fn write_method(&mut self, sig: &SignatureMethod) -> Result<()> {
        let mut header = sig.calling_convention & 0x0F;
        if sig.has_this {
            header |= SIGNATURE_HEADER::HAS_THIS;
        }
        if sig.explicit_this {
            header |= SIGNATURE_HEADER::EXPLICIT_THIS;
        }
        if sig.generic_param_count > 0 {
            header |= SIGNATURE_HEADER::GENERIC;
        }
        self.out.push(header);

        if sig.generic_param_count > 0 {
            write_compressed_uint(&mut self.out, sig.generic_param_count)?;
        }
        self.count(sig.params.len() + sig.varargs.len())?;
        self.write_param(&sig.return_type)?;
        for param in &sig.params {
            self.write_param(param)?;
        }
        if !sig.varargs.is_empty() {
            self.out.push(ELEMENT_TYPE::SENTINEL);
            for param in &sig.varargs {
                self.write_param(param)?;
            }
        }
        Ok(())
    }

    fn write_param(&mut self, param: &SignatureParameter) -> Result<()> {
        self.modifiers(&param.modifiers)?;
        if param.by_ref {
            self.out.push(ELEMENT_TYPE::BYREF);
        }
        self.write_type(&param.base)
    }

    /// Appends one type.
    pub fn write_type(&mut self, sig: &TypeSignature) -> Result<()> {
        let simple = match sig {
            TypeSignature::Void => Some(ELEMENT_TYPE::VOID),
            TypeSignature::Boolean => Some(ELEMENT_TYPE::BOOLEAN),
            TypeSignature::Char => Some(ELEMENT_TYPE::CHAR),
            TypeSignature::I1 => Some(ELEMENT_TYPE::I1),
            TypeSignature::U1 => Some(ELEMENT_TYPE::U1),
            TypeSignature::I2 => Some(ELEMENT_TYPE::I2),
            TypeSignature::U2 => Some(ELEMENT_TYPE::U2),
            TypeSignature::I4 => Some(ELEMENT_TYPE::I4),
            TypeSignature::U4 => Some(ELEMENT_TYPE::U4),
            TypeSignature::I8 => Some(ELEMENT_TYPE::I8),
            TypeSignature::U8 => Some(ELEMENT_TYPE::U8),
            TypeSignature::R4 => Some(ELEMENT_TYPE::R4),
            TypeSignature::R8 => Some(ELEMENT_TYPE::R8),
            TypeSignature::I => Some(ELEMENT_TYPE::I),
            TypeSignature::U => Some(ELEMENT_TYPE::U),
            TypeSignature::String => Some(ELEMENT_TYPE::STRING),
            TypeSignature::Object => Some(ELEMENT_TYPE::OBJECT),
            TypeSignature::TypedByRef => Some(ELEMENT_TYPE::TYPEDBYREF),
            _ => None,
        };
        if let Some(byte) = simple {
            self.out.push(byte);
            return Ok(());
        }

        match sig {
            TypeSignature::Ptr(inner) => {
                self.out.push(ELEMENT_TYPE::PTR);
                self.write_type(inner)
            }
            TypeSignature::ByRef(inner) => {
                self.out.push(ELEMENT_TYPE::BYREF);
                self.write_type(inner)
            }
            TypeSignature::ValueType(token) => {
                self.out.push(ELEMENT_TYPE::VALUETYPE);
                write_compressed_token(&mut self.out, *token)
            }
            TypeSignature::Class(token) => {
                self.out.push(ELEMENT_TYPE::CLASS);
                write_compressed_token(&mut self.out, *token)
            }
            TypeSignature::GenericParamType(number) => {
                self.out.push(ELEMENT_TYPE::VAR);
                write_compressed_uint(&mut self.out, *number)
            }
            TypeSignature::GenericParamMethod(number) => {
                self.out.push(ELEMENT_TYPE::MVAR);
                write_compressed_uint(&mut self.out, *number)
            }
            TypeSignature::SzArray(inner) => {
                self.out.push(ELEMENT_TYPE::SZARRAY);
                self.write_type(inner)
            }
            TypeSignature::Array(array) => {
                self.out.push(ELEMENT_TYPE::ARRAY);
                self.write_type(&array.base)?;
                write_compressed_uint(&mut self.out, array.rank)?;
                self.count(array.sizes.len())?;
                for size in &array.sizes {
                    write_compressed_uint(&mut self.out, *size)?;
                }
                self.count(array.lower_bounds.len())?;
                for bound in &array.lower_bounds {
                    #[allow(clippy::cast_sign_loss)]
                    write_compressed_uint(&mut self.out, *bound as u32)?;
                }
                Ok(())
            }
            TypeSignature::GenericInst(base, args) => {
                self.out.push(ELEMENT_TYPE::GENERICINST);
                self.write_type(base)?;
                self.count(args.len())?;
                for arg in args {
                    self.write_type(arg)?;
                }
                Ok(())
            }
            TypeSignature::FnPtr(method) => {
                self.out.push(ELEMENT_TYPE::FNPTR);
                self.write_method(method)
            }
            TypeSignature::Modified(modifiers, inner) => {
                self.modifiers(modifiers)?;
                self.write_type(inner)
            }
            TypeSignature::Pinned(inner) => {
                self.out.push(ELEMENT_TYPE::PINNED);
                self.write_type(inner)
            }
            _ => Err(malformed_error!("Can not encode {:?}", sig)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{signatures::SignatureParser, token::Token};

    #[test]
    fn encodes_instance_method() {
        let sig = SignatureMethod {
            has_this: true,
            explicit_this: false,
            calling_convention: 0,
            generic_param_count: 0,
            return_type: SignatureParameter::new(TypeSignature::Void),
            params: vec![
                SignatureParameter::new(TypeSignature::I4),
                SignatureParameter::new(TypeSignature::String),
            ],
            varargs: Vec::new(),
        };
        assert_eq!(
            SignatureEncoder::method(&sig).unwrap(),
            vec![0x20, 0x02, 0x01, 0x08, 0x0E]
        );
    }

    #[test]
    fn encodes_nested_generic_field() {
        let field = SignatureField {
            modifiers: Vec::new(),
            base: TypeSignature::GenericInst(
                Box::new(TypeSignature::ValueType(Token(0x0200_0004))),
                vec![TypeSignature::SzArray(Box::new(TypeSignature::GenericParamType(0)))],
            ),
        };
        let blob = SignatureEncoder::field(&field).unwrap();
        let parsed = SignatureParser::new(&blob).parse_field_signature().unwrap();
        assert_eq!(parsed, field);
    }

    #[test]
    fn rejects_method_tokens() {
        assert!(SignatureEncoder::type_spec(&TypeSignature::Class(Token(0x0600_0001))).is_err());
    }
}
