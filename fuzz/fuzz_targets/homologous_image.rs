#![no_main]

use std::sync::{Arc, OnceLock};

use dotrt::prelude::*;
use libfuzzer_sys::fuzz_target;

fn metadata() -> Arc<AotMetadata> {
    static METADATA: OnceLock<Arc<AotMetadata>> = OnceLock::new();
    METADATA
        .get_or_init(|| {
            let mut builder = AotMetadataBuilder::new();
            builder.with_corlib().unwrap();
            Arc::new(builder.build().unwrap())
        })
        .clone()
}

fuzz_target!(|data: &[u8]| {
    if let Ok(image) = RawImage::parse(data.to_vec()) {
        let mut builder = AotMetadataBuilder::new();
        builder.with_corlib().unwrap();
        if builder.import_image(&image).is_ok() {
            if let Ok(built) = builder.build() {
                if let Ok(runtime) = Runtime::new(Arc::new(built), RuntimeConfig::strict()) {
                    let _ = runtime.load_metadata_for_aot_assembly(data.to_vec());
                }
            }
        }
    }

    let runtime = Runtime::new(metadata(), RuntimeConfig::default()).unwrap();
    let _ = runtime.load_metadata_for_aot_assembly(data.to_vec());
});
