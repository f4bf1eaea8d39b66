//! PBR material records and the JSON material manager.

use crate::cache::ResourceCache;
use crate::error::{AssetError, Result};
use crate::types::AlphaMode;
use glam::{Vec3, Vec4};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Texture slots of a PBR material, as resource-cache ids. Empty string
/// means the slot is unbound.
#[derive(Debug, Clone, Default)]
pub struct PbrTextures {
    pub base_color: String,
    pub metallic: String,
    pub roughness: String,
    pub normal: String,
    pub occlusion: String,
    pub emissive: String,
}

/// Scalar/vector material factors.
#[derive(Debug, Clone)]
pub struct PbrFactors {
    pub base_color: Vec4,
    pub metallic: f32,
    pub roughness: f32,
    pub emissive: Vec3,
    pub normal_scale: f32,
}

impl Default for PbrFactors {
    fn default() -> Self {
        Self {
            base_color: Vec4::ONE,
            metallic: 1.0,
            roughness: 1.0,
            emissive: Vec3::ZERO,
            normal_scale: 1.0,
        }
    }
}

/// Alpha handling parameters.
#[derive(Debug, Clone)]
pub struct PbrAlpha {
    pub mode: AlphaMode,
    pub cutoff: f32,
    pub double_sided: bool,
}

impl Default for PbrAlpha {
    fn default() -> Self {
        Self {
            mode: AlphaMode::Opaque,
            cutoff: 0.5,
            double_sided: false,
        }
    }
}

/// Optical parameters.
#[derive(Debug, Clone)]
pub struct PbrOptical {
    pub refraction_index: f32,
}

impl Default for PbrOptical {
    fn default() -> Self {
        Self {
            refraction_index: 1.0,
        }
    }
}

/// A PBR material: texture ids from the resource cache plus factors.
#[derive(Debug, Clone, Default)]
pub struct PbrMaterial {
    pub name: String,
    pub domain: String,
    pub textures: PbrTextures,
    pub factors: PbrFactors,
    pub alpha: PbrAlpha,
    pub optical: PbrOptical,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct MaterialDoc {
    name: Option<String>,
    domain: Option<String>,
    textures: TexturesDoc,
    factors: FactorsDoc,
    alpha: AlphaDoc,
    optical: OpticalDoc,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct TexturesDoc {
    base_color: Option<String>,
    metallic: Option<String>,
    roughness: Option<String>,
    normal: Option<String>,
    occlusion: Option<String>,
    emissive: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct FactorsDoc {
    base_color: Option<serde_json::Value>,
    metallic: Option<f32>,
    roughness: Option<f32>,
    emissive: Option<serde_json::Value>,
    normal_scale: Option<f32>,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct AlphaDoc {
    mode: Option<String>,
    cutoff: Option<f32>,
    double_sided: Option<bool>,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct OpticalDoc {
    refraction_index: Option<f32>,
}

/// Parse `"Opaque" | "Mask" | "Blend"` case-insensitively; anything else
/// falls back to opaque.
fn parse_alpha_mode(mode: &str) -> AlphaMode {
    if mode.eq_ignore_ascii_case("mask") {
        AlphaMode::Mask
    } else if mode.eq_ignore_ascii_case("blend") {
        AlphaMode::Blend
    } else {
        AlphaMode::Opaque
    }
}

/// A JSON array of 4 numbers, or the default on any shape mismatch.
fn parse_vec4(value: &serde_json::Value, default: Vec4) -> Vec4 {
    match value.as_array() {
        Some(values) if values.len() == 4 => {
            let mut out = default;
            for (i, v) in values.iter().enumerate() {
                match v.as_f64() {
                    Some(f) => out[i] = f as f32,
                    None => return default,
                }
            }
            out
        }
        _ => default,
    }
}

/// A JSON array of 3 numbers, or the default on any shape mismatch.
fn parse_vec3(value: &serde_json::Value, default: Vec3) -> Vec3 {
    match value.as_array() {
        Some(values) if values.len() == 3 => {
            let mut out = default;
            for (i, v) in values.iter().enumerate() {
                match v.as_f64() {
                    Some(f) => out[i] = f as f32,
                    None => return default,
                }
            }
            out
        }
        _ => default,
    }
}

/// Loads PBR materials from JSON descriptors; texture slots are loaded
/// eagerly into the resource cache and stored as ids.
pub struct MaterialManager {
    resources: ResourceCache,
    materials: Mutex<HashMap<String, Arc<PbrMaterial>>>,
}

impl MaterialManager {
    pub fn new(resources: ResourceCache) -> Self {
        Self {
            resources,
            materials: Mutex::new(HashMap::new()),
        }
    }

    /// Load (or reload) a material from a JSON file. Texture paths resolve
    /// relative to the file's directory. Returns the material name used as
    /// its id.
    pub fn load_material_from_json(&self, path: impl AsRef<Path>) -> Result<String> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AssetError::FileSystem(format!(
                "material file does not exist: {}",
                path.display()
            )));
        }

        let source = fs::read_to_string(path)?;
        let doc: MaterialDoc = serde_json::from_str(&source)
            .map_err(|e| AssetError::InvalidData(format!("{}: {e}", path.display())))?;

        let material = self.instantiate(doc, path)?;
        let material_id = material.name.clone();

        self.materials
            .lock()
            .insert(material_id.clone(), Arc::new(material));

        Ok(material_id)
    }

    /// Look up a loaded material by name.
    pub fn material(&self, name: &str) -> Option<Arc<PbrMaterial>> {
        self.materials.lock().get(name).cloned()
    }

    /// Drop all loaded materials.
    pub fn clear(&self) {
        self.materials.lock().clear();
    }

    fn instantiate(&self, doc: MaterialDoc, path: &Path) -> Result<PbrMaterial> {
        let base_dir = path.parent().unwrap_or(Path::new("."));
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("material")
            .to_string();

        let mut material = PbrMaterial {
            name: doc.name.unwrap_or(stem),
            domain: doc.domain.unwrap_or_else(|| "Opaque".to_string()),
            ..PbrMaterial::default()
        };

        let mut load_slot = |relative: &Option<String>, slot: &mut String| -> Result<()> {
            if let Some(relative) = relative.as_deref().filter(|r| !r.is_empty()) {
                *slot = self.resources.load_texture(base_dir.join(relative))?;
            }
            Ok(())
        };
        load_slot(&doc.textures.base_color, &mut material.textures.base_color)?;
        load_slot(&doc.textures.metallic, &mut material.textures.metallic)?;
        load_slot(&doc.textures.roughness, &mut material.textures.roughness)?;
        load_slot(&doc.textures.normal, &mut material.textures.normal)?;
        load_slot(&doc.textures.occlusion, &mut material.textures.occlusion)?;
        load_slot(&doc.textures.emissive, &mut material.textures.emissive)?;

        if let Some(value) = &doc.factors.base_color {
            material.factors.base_color = parse_vec4(value, material.factors.base_color);
        }
        if let Some(metallic) = doc.factors.metallic {
            material.factors.metallic = metallic;
        }
        if let Some(roughness) = doc.factors.roughness {
            material.factors.roughness = roughness;
        }
        if let Some(value) = &doc.factors.emissive {
            material.factors.emissive = parse_vec3(value, material.factors.emissive);
        }
        if let Some(scale) = doc.factors.normal_scale {
            material.factors.normal_scale = scale;
        }

        if let Some(mode) = &doc.alpha.mode {
            material.alpha.mode = parse_alpha_mode(mode);
        }
        if let Some(cutoff) = doc.alpha.cutoff {
            material.alpha.cutoff = cutoff;
        }
        if let Some(double_sided) = doc.alpha.double_sided {
            material.alpha.double_sided = double_sided;
        }

        if let Some(refraction_index) = doc.optical.refraction_index {
            material.optical.refraction_index = refraction_index;
        }

        Ok(material)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alpha_mode_parse_is_case_insensitive() {
        assert_eq!(parse_alpha_mode("Opaque"), AlphaMode::Opaque);
        assert_eq!(parse_alpha_mode("opaque"), AlphaMode::Opaque);
        assert_eq!(parse_alpha_mode("MASK"), AlphaMode::Mask);
        assert_eq!(parse_alpha_mode("blend"), AlphaMode::Blend);
        assert_eq!(parse_alpha_mode("glass"), AlphaMode::Opaque);
        assert_eq!(parse_alpha_mode(""), AlphaMode::Opaque);
    }

    #[test]
    fn vec_parsers_fall_back_on_shape_mismatch() {
        let default = Vec4::new(1.0, 2.0, 3.0, 4.0);
        let good: serde_json::Value = serde_json::json!([0.1, 0.2, 0.3, 0.4]);
        let short: serde_json::Value = serde_json::json!([0.1, 0.2]);
        let not_numbers: serde_json::Value = serde_json::json!(["a", "b", "c", "d"]);

        assert_eq!(parse_vec4(&good, default), Vec4::new(0.1, 0.2, 0.3, 0.4));
        assert_eq!(parse_vec4(&short, default), default);
        assert_eq!(parse_vec4(&not_numbers, default), default);

        let v3: serde_json::Value = serde_json::json!([1.0, 0.5, 0.0]);
        assert_eq!(parse_vec3(&v3, Vec3::ZERO), Vec3::new(1.0, 0.5, 0.0));
    }

    #[test]
    fn material_doc_parses_full_schema() {
        let source = r#"{
            "name": "gold",
            "domain": "Metal",
            "factors": {
                "baseColor": [1.0, 0.8, 0.3, 1.0],
                "metallic": 1.0,
                "roughness": 0.2,
                "emissive": [0.0, 0.0, 0.0],
                "normalScale": 1.5
            },
            "alpha": { "mode": "mask", "cutoff": 0.25, "doubleSided": true },
            "optical": { "refractionIndex": 1.45 }
        }"#;

        let doc: MaterialDoc = serde_json::from_str(source).unwrap();
        assert_eq!(doc.name.as_deref(), Some("gold"));
        assert_eq!(doc.factors.metallic, Some(1.0));
        assert_eq!(doc.factors.normal_scale, Some(1.5));
        assert_eq!(doc.alpha.mode.as_deref(), Some("mask"));
        assert_eq!(doc.alpha.double_sided, Some(true));
        assert_eq!(doc.optical.refraction_index, Some(1.45));
    }

    #[test]
    fn material_doc_defaults_are_empty() {
        let doc: MaterialDoc = serde_json::from_str("{}").unwrap();
        assert!(doc.name.is_none());
        assert!(doc.textures.base_color.is_none());
        assert!(doc.factors.base_color.is_none());
        assert!(doc.alpha.mode.is_none());
    }
}
