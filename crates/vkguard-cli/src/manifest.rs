//! Loader manifest for the layer library.

use std::path::Path;

use ash::vk;
use serde_json::{json, Value};
use vkguard_layer::{
    LAYER_DESCRIPTION, LAYER_NAME, VALIDATION_FEATURES_EXTENSION, VALIDATION_FEATURES_SPEC_VERSION,
};

pub const FILE_FORMAT_VERSION: &str = "1.2.0";

/// Builds the JSON document the Vulkan loader reads to discover the layer.
pub fn layer_manifest(library_path: &Path) -> Value {
    let api = vk::HEADER_VERSION_COMPLETE;
    json!({
        "file_format_version": FILE_FORMAT_VERSION,
        "layer": {
            "name": LAYER_NAME,
            "type": "INSTANCE",
            "library_path": library_path.display().to_string(),
            "api_version": format!(
                "{}.{}.{}",
                vk::api_version_major(api),
                vk::api_version_minor(api),
                vk::api_version_patch(api)
            ),
            "implementation_version": "1",
            "description": LAYER_DESCRIPTION,
            "instance_extensions": [{
                "name": VALIDATION_FEATURES_EXTENSION,
                "spec_version": VALIDATION_FEATURES_SPEC_VERSION.to_string(),
            }],
        }
    })
}
