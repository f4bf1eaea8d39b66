//! SPIR-V loading and descriptor reflection.
//!
//! Compiled shader bytecode is reflected per module, then the per-stage
//! results are merged into one binding table per descriptor set. Bindings
//! match across stages by `(binding, descriptor_type)`; a descriptor-count
//! mismatch is an error, stage flags are OR-combined, and the first seen
//! name wins.

use crate::error::{AssetError, Result};
use ash::vk;
use prism_gpu::DescriptorBindingInfo;
use rspirv_reflect::{BindingCount, Reflection};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Read a SPIR-V file, validating that its size is a multiple of 4 bytes.
pub fn read_spirv_file(path: &Path) -> Result<Vec<u8>> {
    if !path.exists() {
        return Err(AssetError::FileSystem(format!(
            "shader file does not exist: {}",
            path.display()
        )));
    }
    let bytes = fs::read(path)?;
    if bytes.len() % 4 != 0 {
        return Err(AssetError::FileSystem(format!(
            "invalid SPIR-V file size {} for {}",
            bytes.len(),
            path.display()
        )));
    }
    Ok(bytes)
}

/// Reinterpret validated SPIR-V bytes as words.
pub fn spirv_words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn to_vk_descriptor_type(ty: rspirv_reflect::DescriptorType) -> Result<vk::DescriptorType> {
    use rspirv_reflect::DescriptorType as Dt;
    let mapped = match ty {
        Dt::SAMPLER => vk::DescriptorType::SAMPLER,
        Dt::COMBINED_IMAGE_SAMPLER => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        Dt::SAMPLED_IMAGE => vk::DescriptorType::SAMPLED_IMAGE,
        Dt::STORAGE_IMAGE => vk::DescriptorType::STORAGE_IMAGE,
        Dt::UNIFORM_TEXEL_BUFFER => vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
        Dt::STORAGE_TEXEL_BUFFER => vk::DescriptorType::STORAGE_TEXEL_BUFFER,
        Dt::UNIFORM_BUFFER => vk::DescriptorType::UNIFORM_BUFFER,
        Dt::STORAGE_BUFFER => vk::DescriptorType::STORAGE_BUFFER,
        Dt::UNIFORM_BUFFER_DYNAMIC => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        Dt::STORAGE_BUFFER_DYNAMIC => vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
        Dt::INPUT_ATTACHMENT => vk::DescriptorType::INPUT_ATTACHMENT,
        other => {
            return Err(AssetError::UnsupportedFormat(format!(
                "descriptor type {other:?} in shader reflection"
            )))
        }
    };
    Ok(mapped)
}

/// Reflect one shader module: set index → bindings, each tagged with the
/// module's stage only.
pub fn reflect_module(
    spirv: &[u8],
    stage: vk::ShaderStageFlags,
) -> Result<HashMap<u32, Vec<DescriptorBindingInfo>>> {
    let reflection = Reflection::new_from_spirv(spirv)
        .map_err(|e| AssetError::InvalidData(format!("SPIR-V reflection failed: {e}")))?;
    let sets = reflection
        .get_descriptor_sets()
        .map_err(|e| AssetError::InvalidData(format!("descriptor enumeration failed: {e}")))?;

    let mut out: HashMap<u32, Vec<DescriptorBindingInfo>> = HashMap::new();
    for (set_index, bindings) in sets {
        let entries = out.entry(set_index).or_default();
        for (binding_index, info) in bindings {
            let descriptor_count = match info.binding_count {
                BindingCount::One => 1,
                BindingCount::StaticSized(n) => n as u32,
                BindingCount::Unbounded => {
                    return Err(AssetError::UnsupportedFormat(format!(
                        "unbounded descriptor array '{}' at set {set_index} binding {binding_index}",
                        info.name
                    )))
                }
            };

            entries.push(DescriptorBindingInfo {
                name: info.name.clone(),
                binding: binding_index,
                descriptor_type: to_vk_descriptor_type(info.ty)?,
                descriptor_count,
                stage_flags: stage,
            });
        }
    }
    Ok(out)
}

/// Merge per-module reflection results into one table per set.
pub fn merge_reflections(
    modules: &[HashMap<u32, Vec<DescriptorBindingInfo>>],
) -> Result<HashMap<u32, Vec<DescriptorBindingInfo>>> {
    let mut merged: HashMap<u32, Vec<DescriptorBindingInfo>> = HashMap::new();

    for module in modules {
        for (&set_index, bindings) in module {
            let dst = merged.entry(set_index).or_default();

            for binding in bindings {
                match dst
                    .iter_mut()
                    .find(|b| b.binding == binding.binding && b.descriptor_type == binding.descriptor_type)
                {
                    Some(existing) => {
                        if existing.descriptor_count != binding.descriptor_count {
                            return Err(AssetError::Gpu(prism_gpu::GpuError::IncompatibleSchema(
                                format!(
                                    "descriptor count mismatch between shader stages at set {set_index} binding {} ('{}')",
                                    binding.binding, binding.name
                                ),
                            )));
                        }
                        existing.stage_flags |= binding.stage_flags;
                        // Names do not participate in identity; the first
                        // seen name is kept.
                    }
                    None => dst.push(binding.clone()),
                }
            }
        }
    }

    for bindings in merged.values_mut() {
        bindings.sort_by_key(|b| b.binding);
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(
        name: &str,
        index: u32,
        ty: vk::DescriptorType,
        count: u32,
        stage: vk::ShaderStageFlags,
    ) -> DescriptorBindingInfo {
        DescriptorBindingInfo {
            name: name.to_string(),
            binding: index,
            descriptor_type: ty,
            descriptor_count: count,
            stage_flags: stage,
        }
    }

    fn module(
        set: u32,
        bindings: Vec<DescriptorBindingInfo>,
    ) -> HashMap<u32, Vec<DescriptorBindingInfo>> {
        HashMap::from([(set, bindings)])
    }

    #[test]
    fn spirv_words_are_little_endian() {
        let bytes = [0x03, 0x02, 0x23, 0x07];
        assert_eq!(spirv_words(&bytes), vec![0x0723_0203]);
    }

    #[test]
    fn merge_combines_stage_flags() {
        let vertex = module(
            0,
            vec![binding(
                "camera",
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                1,
                vk::ShaderStageFlags::VERTEX,
            )],
        );
        let fragment = module(
            0,
            vec![binding(
                "camera",
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                1,
                vk::ShaderStageFlags::FRAGMENT,
            )],
        );

        let merged = merge_reflections(&[vertex, fragment]).unwrap();
        let bindings = &merged[&0];
        assert_eq!(bindings.len(), 1);
        assert_eq!(
            bindings[0].stage_flags,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
    }

    #[test]
    fn merge_rejects_count_mismatch() {
        let vertex = module(
            0,
            vec![binding(
                "data",
                1,
                vk::DescriptorType::UNIFORM_BUFFER,
                1,
                vk::ShaderStageFlags::VERTEX,
            )],
        );
        let fragment = module(
            0,
            vec![binding(
                "data",
                1,
                vk::DescriptorType::UNIFORM_BUFFER,
                2,
                vk::ShaderStageFlags::FRAGMENT,
            )],
        );

        let err = merge_reflections(&[vertex, fragment]).unwrap_err();
        assert!(matches!(
            err,
            AssetError::Gpu(prism_gpu::GpuError::IncompatibleSchema(_))
        ));
    }

    #[test]
    fn merge_keeps_first_name() {
        let vertex = module(
            0,
            vec![binding(
                "lights",
                2,
                vk::DescriptorType::UNIFORM_BUFFER,
                1,
                vk::ShaderStageFlags::VERTEX,
            )],
        );
        let fragment = module(
            0,
            vec![binding(
                "light_data",
                2,
                vk::DescriptorType::UNIFORM_BUFFER,
                1,
                vk::ShaderStageFlags::FRAGMENT,
            )],
        );

        let merged = merge_reflections(&[vertex, fragment]).unwrap();
        assert_eq!(merged[&0][0].name, "lights");
    }

    #[test]
    fn merge_sorts_by_binding_index() {
        let fragment = module(
            0,
            vec![
                binding(
                    "b",
                    3,
                    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    1,
                    vk::ShaderStageFlags::FRAGMENT,
                ),
                binding(
                    "a",
                    0,
                    vk::DescriptorType::UNIFORM_BUFFER,
                    1,
                    vk::ShaderStageFlags::FRAGMENT,
                ),
            ],
        );

        let merged = merge_reflections(&[fragment]).unwrap();
        let bindings = &merged[&0];
        assert_eq!(bindings[0].binding, 0);
        assert_eq!(bindings[1].binding, 3);
    }

    #[test]
    fn merge_appends_unmatched_bindings() {
        let vertex = module(
            1,
            vec![binding(
                "camera",
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                1,
                vk::ShaderStageFlags::VERTEX,
            )],
        );
        let fragment = module(
            1,
            vec![binding(
                "albedo",
                1,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                1,
                vk::ShaderStageFlags::FRAGMENT,
            )],
        );

        let merged = merge_reflections(&[vertex, fragment]).unwrap();
        assert_eq!(merged[&1].len(), 2);
    }
}
