//! Compiled shader programs
//!
//! A [`ShaderSet`] is a vertex + fragment pair of SPIR-V words. The pipeline
//! cache identifies programs by content, so two registrations of the same
//! bytes share pipelines.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use crate::core::config::ShaderConfig;
use crate::render::backends::vulkan::initialization::{VulkanError, VulkanResult};

/// Decode a SPIR-V binary into words
///
/// The byte length must be a non-zero multiple of 4.
pub fn load_spirv(bytes: &[u8]) -> VulkanResult<Vec<u32>> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(VulkanError::InvalidShader(format!(
            "SPIR-V size {} is not a multiple of 4",
            bytes.len()
        )));
    }
    ash::util::read_spv(&mut Cursor::new(bytes))
        .map_err(|e| VulkanError::InvalidShader(format!("SPIR-V read failed: {e}")))
}

fn read_spirv_file(path: &Path) -> VulkanResult<Vec<u32>> {
    let bytes = std::fs::read(path)
        .map_err(|e| VulkanError::ShaderNotFound(format!("{}: {e}", path.display())))?;
    load_spirv(&bytes).map_err(|e| match e {
        VulkanError::InvalidShader(reason) => VulkanError::InvalidShader(format!("{}: {reason}", path.display())),
        other => other,
    })
}

/// Vertex and fragment stages of one program
pub struct ShaderSet {
    id: String,
    vertex: Vec<u32>,
    fragment: Vec<u32>,
    identity: u64,
}

impl ShaderSet {
    pub fn new(id: impl Into<String>, vertex: Vec<u32>, fragment: Vec<u32>) -> Self {
        let mut hasher = DefaultHasher::new();
        vertex.hash(&mut hasher);
        fragment.hash(&mut hasher);
        Self {
            id: id.into(),
            vertex,
            fragment,
            identity: hasher.finish(),
        }
    }

    /// Load `{id}.vert.spv` and `{id}.frag.spv` from the configured directories
    pub fn load(config: &ShaderConfig, id: &str) -> VulkanResult<Self> {
        let (vert_path, frag_path) = config.pair(id).map_err(VulkanError::ShaderNotFound)?;
        let vertex = read_spirv_file(&vert_path)?;
        let fragment = read_spirv_file(&frag_path)?;
        log::debug!("Loaded shader '{id}' from {}", vert_path.display());
        Ok(Self::new(id, vertex, fragment))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn vertex(&self) -> &[u32] {
        &self.vertex
    }

    pub fn fragment(&self) -> &[u32] {
        &self.fragment
    }

    /// Content hash of both stages
    pub fn identity(&self) -> u64 {
        self.identity
    }
}

/// Content-identity wrapper used as part of the pipeline cache key
#[derive(Clone)]
pub struct ShaderKey(pub Arc<ShaderSet>);

impl Hash for ShaderKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.identity.hash(state);
    }
}

impl PartialEq for ShaderKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
            || (self.0.identity == other.0.identity
                && self.0.vertex == other.0.vertex
                && self.0.fragment == other.0.fragment)
    }
}

impl Eq for ShaderKey {}

/// Programs by id
#[derive(Default)]
pub struct ShaderDb {
    shaders: HashMap<String, Arc<ShaderSet>>,
}

impl ShaderDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a program
    pub fn register(&mut self, shader: ShaderSet) -> Arc<ShaderSet> {
        let shader = Arc::new(shader);
        if self.shaders.insert(shader.id.clone(), shader.clone()).is_some() {
            log::info!("Shader '{}' replaced", shader.id);
        }
        shader
    }

    /// Load a program from disk and register it
    pub fn load(&mut self, config: &ShaderConfig, id: &str) -> VulkanResult<Arc<ShaderSet>> {
        Ok(self.register(ShaderSet::load(config, id)?))
    }

    pub fn get(&self, id: &str) -> VulkanResult<Arc<ShaderSet>> {
        self.shaders
            .get(id)
            .cloned()
            .ok_or_else(|| VulkanError::ShaderNotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.shaders.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.shaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shaders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAGIC: u32 = 0x0723_0203;

    #[test]
    fn test_spirv_size_must_be_word_aligned() {
        assert!(matches!(load_spirv(&[]), Err(VulkanError::InvalidShader(_))));
        assert!(matches!(load_spirv(&[0x03, 0x02, 0x23]), Err(VulkanError::InvalidShader(_))));

        let mut bytes = MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0, 0, 1, 0]);
        assert_eq!(load_spirv(&bytes).unwrap(), vec![MAGIC, 0x0001_0000]);
        bytes.push(0);
        assert!(load_spirv(&bytes).is_err());
    }

    #[test]
    fn test_identity_follows_content() {
        let a = ShaderKey(Arc::new(ShaderSet::new("a", vec![MAGIC, 1], vec![MAGIC, 2])));
        let b = ShaderKey(Arc::new(ShaderSet::new("b", vec![MAGIC, 1], vec![MAGIC, 2])));
        let c = ShaderKey(Arc::new(ShaderSet::new("a", vec![MAGIC, 1], vec![MAGIC, 3])));

        assert!(a == b, "same words are the same program whatever the id");
        assert!(a != c);
        assert_eq!(a.0.identity(), b.0.identity());
    }

    #[test]
    fn test_unknown_shader_id() {
        let mut db = ShaderDb::new();
        db.register(ShaderSet::new("default", vec![MAGIC], vec![MAGIC]));

        assert!(db.contains("default"));
        assert!(db.get("default").is_ok());
        match db.get("missing") {
            Err(VulkanError::ShaderNotFound(id)) => assert_eq!(id, "missing"),
            _ => panic!("expected ShaderNotFound"),
        }
    }

    #[test]
    fn test_missing_files_reported() {
        let config = ShaderConfig::new(vec!["/nonexistent/shader/dir".to_string()]);
        assert!(matches!(ShaderSet::load(&config, "default"), Err(VulkanError::ShaderNotFound(_))));
    }
}
