//! Runtime-provided array methods.
//!
//! Arrays have no metadata of their own. Every array class gets constructors and the `Get`, `Set`
//! and `Address` accessors, with one `int32` index per dimension.

use std::sync::OnceLock;

use crate::{
    metadata::token::Token,
    runtime::{
        class::{ClassId, MethodCode, MethodId, MethodInfo, ParameterInfo},
        Runtime,
    },
    typesystem::{MethodAttributes, RuntimeType},
    Result,
};

impl Runtime {
    /// Creates the methods of array class `id`.
    pub(crate) fn array_methods(
        &self,
        id: ClassId,
        element: ClassId,
        rank: u8,
        szarray: bool,
    ) -> Result<Vec<MethodId>> {
        let element_type = self.class(element)?.byval_type.clone();
        let indices = |count: usize| -> Vec<ParameterInfo> {
            (0..count)
                .map(|i| ParameterInfo {
                    name: format!("i{i}"),
                    ty: RuntimeType::I4,
                })
                .collect()
        };
        let rank = usize::from(rank);

        let mut methods = Vec::with_capacity(5);
        let ctor = MethodAttributes::SPECIAL_NAME | MethodAttributes::RT_SPECIAL_NAME;
        if szarray {
            methods.push(self.array_method(id, ".ctor", ctor, RuntimeType::Void, indices(1)));
        } else {
            methods.push(self.array_method(id, ".ctor", ctor, RuntimeType::Void, indices(rank)));
            // lower bound and length per dimension
            methods.push(self.array_method(id, ".ctor", ctor, RuntimeType::Void, indices(rank * 2)));
        }

        let mut set_params = indices(rank);
        set_params.push(ParameterInfo {
            name: "value".to_string(),
            ty: element_type.clone(),
        });
        methods.push(self.array_method(
            id,
            "Get",
            MethodAttributes::empty(),
            element_type.clone(),
            indices(rank),
        ));
        methods.push(self.array_method(id, "Set", MethodAttributes::empty(), RuntimeType::Void, set_params));
        methods.push(self.array_method(
            id,
            "Address",
            MethodAttributes::empty(),
            RuntimeType::ByRef(Box::new(element_type)),
            indices(rank),
        ));
        Ok(methods)
    }

    fn array_method(
        &self,
        declaring: ClassId,
        name: &str,
        extra: MethodAttributes,
        return_type: RuntimeType,
        parameters: Vec<ParameterInfo>,
    ) -> MethodId {
        self.push_method(MethodInfo {
            name: name.to_string(),
            declaring,
            flags: MethodAttributes::PUBLIC | MethodAttributes::HIDE_BY_SIG | extra,
            impl_flags: 0,
            token: Token::default(),
            return_type,
            parameters,
            definition: None,
            generic_arity: 0,
            generic_method: None,
            code: MethodCode::Runtime,
            slot: OnceLock::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{
        metadata::aot::AotMetadataBuilder,
        runtime::{MethodCode, Runtime, RuntimeConfig},
        typesystem::{MethodAttributes, RuntimeType},
    };

    fn runtime() -> Runtime {
        let mut builder = AotMetadataBuilder::new();
        builder.with_corlib().unwrap();
        Runtime::new(Arc::new(builder.build().unwrap()), RuntimeConfig::default()).unwrap()
    }

    #[test]
    fn szarray_accessors() {
        let rt = runtime();
        let int32 = rt.class_from_type(&RuntimeType::I4).unwrap();
        let array = rt.array_class(int32, 1, true).unwrap();
        let class = rt.init_class(array).unwrap();

        let names: Vec<_> = class
            .methods()
            .iter()
            .map(|m| rt.method(*m).unwrap().name.clone())
            .collect();
        assert_eq!(names, [".ctor", "Get", "Set", "Address"]);

        let set = rt.method(class.methods()[2]).unwrap();
        assert_eq!(set.parameters.len(), 2);
        assert_eq!(set.parameters[1].ty, RuntimeType::I4);
        assert_eq!(set.code, MethodCode::Runtime);

        let address = rt.method(class.methods()[3]).unwrap();
        assert_eq!(address.return_type, RuntimeType::ByRef(Box::new(RuntimeType::I4)));

        let ctor = rt.method(class.methods()[0]).unwrap();
        assert!(ctor.flags.contains(MethodAttributes::RT_SPECIAL_NAME));
        assert!(!rt.method(class.methods()[1]).unwrap().flags.contains(MethodAttributes::SPECIAL_NAME));
    }

    #[test]
    fn multi_dimensional_constructors() {
        let rt = runtime();
        let string = rt.class_from_type(&RuntimeType::String).unwrap();
        let array = rt.array_class(string, 2, false).unwrap();
        let class = rt.init_class(array).unwrap();

        let ctors: Vec<usize> = class
            .methods()
            .iter()
            .map(|m| rt.method(*m).unwrap())
            .filter(|m| m.name == ".ctor")
            .map(|m| m.parameters.len())
            .collect();
        assert_eq!(ctors, [2, 4]);

        let get = class
            .methods()
            .iter()
            .map(|m| rt.method(*m).unwrap())
            .find(|m| m.name == "Get")
            .unwrap();
        assert_eq!(get.parameters.len(), 2);
        assert_eq!(get.return_type, RuntimeType::String);
    }
}
