//! Descriptor reflection from SPIR-V
//!
//! Walks the decorations and type declarations of each stage to find every
//! resource variable with a `DescriptorSet`/`Binding` pair, then merges the
//! stages into one dense list of sets. Set numbers that no stage uses become
//! empty placeholder sets so indices match the shader-declared numbers.

use std::collections::{BTreeMap, HashMap};

use ash::vk;
use rspirv::dr::{Instruction, Module, Operand};
use rspirv::spirv::{Decoration, Dim, ExecutionModel, Op, StorageClass, Word};

use crate::render::backends::vulkan::initialization::{VulkanError, VulkanResult};
use crate::render::backends::vulkan::resources::descriptor_set::Binding;

/// Highest descriptor set count any pipeline layout may need
pub const MAX_DESCRIPTOR_SETS: u32 = 32;

/// Bindings of one descriptor set number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectedSet {
    pub set: u32,
    pub bindings: Vec<Binding>,
}

/// Merge the descriptor sets used by all `stages`
pub fn descriptor_sets(stages: &[&[u32]]) -> VulkanResult<Vec<ReflectedSet>> {
    let mut merged: BTreeMap<u32, BTreeMap<u32, Binding>> = BTreeMap::new();

    for words in stages {
        for (set, binding) in reflect_stage(words)? {
            if set >= MAX_DESCRIPTOR_SETS {
                return Err(VulkanError::InvalidShader(format!(
                    "set {set} exceeds the limit of {MAX_DESCRIPTOR_SETS} descriptor sets"
                )));
            }
            let bindings = merged.entry(set).or_default();
            match bindings.get_mut(&binding.binding) {
                Some(existing) if existing.ty != binding.ty || existing.count != binding.count => {
                    return Err(VulkanError::InvalidShader(format!(
                        "set {set} binding {} declared as {:?}[{}] and {:?}[{}]",
                        binding.binding, existing.ty, existing.count, binding.ty, binding.count
                    )));
                }
                Some(existing) => existing.stages |= binding.stages,
                None => {
                    bindings.insert(binding.binding, binding);
                }
            }
        }
    }

    let Some(&max_set) = merged.keys().next_back() else {
        return Ok(Vec::new());
    };

    Ok((0..=max_set)
        .map(|set| ReflectedSet {
            set,
            bindings: merged
                .remove(&set)
                .map(|bindings| bindings.into_values().collect())
                .unwrap_or_default(),
        })
        .collect())
}

/// Every `(set, binding)` declared by one shader module
pub fn reflect_stage(words: &[u32]) -> VulkanResult<Vec<(u32, Binding)>> {
    let module = rspirv::dr::load_words(words)
        .map_err(|e| VulkanError::InvalidShader(format!("SPIR-V parse failed: {e:?}")))?;
    let stages = stage_flags(&module);
    if stages.is_empty() {
        return Err(VulkanError::InvalidShader("module has no supported entry point".into()));
    }

    let decorations = Decorations::collect(&module);
    let types = Types::collect(&module);

    let mut out = Vec::new();
    for inst in &module.types_global_values {
        if inst.class.opcode != Op::Variable {
            continue;
        }
        let (Some(id), Some(pointer_ty)) = (inst.result_id, inst.result_type) else {
            continue;
        };
        let (Some(set), Some(binding)) = (decorations.set(id), decorations.binding(id)) else {
            continue;
        };

        let (storage_class, pointee) = types.pointer(pointer_ty).ok_or_else(|| {
            VulkanError::InvalidShader(format!("variable %{id} is not declared through a pointer"))
        })?;
        let (element, count) = types.strip_arrays(pointee);
        let ty = descriptor_type(storage_class, element, &types, &decorations).ok_or_else(|| {
            VulkanError::InvalidShader(format!("set {set} binding {binding} has an unsupported resource type"))
        })?;

        out.push((
            set,
            Binding {
                binding,
                ty,
                count,
                stages,
            },
        ));
    }
    Ok(out)
}

fn stage_flags(module: &Module) -> vk::ShaderStageFlags {
    module
        .entry_points
        .iter()
        .filter_map(|inst| match inst.operands.first() {
            Some(Operand::ExecutionModel(model)) => Some(match model {
                ExecutionModel::Vertex => vk::ShaderStageFlags::VERTEX,
                ExecutionModel::Fragment => vk::ShaderStageFlags::FRAGMENT,
                ExecutionModel::Geometry => vk::ShaderStageFlags::GEOMETRY,
                ExecutionModel::TessellationControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
                ExecutionModel::TessellationEvaluation => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
                ExecutionModel::GLCompute => vk::ShaderStageFlags::COMPUTE,
                _ => vk::ShaderStageFlags::empty(),
            }),
            _ => None,
        })
        .fold(vk::ShaderStageFlags::empty(), |acc, flags| acc | flags)
}

fn descriptor_type(
    storage_class: StorageClass,
    element: Word,
    types: &Types,
    decorations: &Decorations,
) -> Option<vk::DescriptorType> {
    match storage_class {
        StorageClass::Uniform if decorations.has(element, Decoration::BufferBlock) => {
            Some(vk::DescriptorType::STORAGE_BUFFER)
        }
        StorageClass::Uniform => Some(vk::DescriptorType::UNIFORM_BUFFER),
        StorageClass::StorageBuffer => Some(vk::DescriptorType::STORAGE_BUFFER),
        StorageClass::UniformConstant => match types.get(element)?.class.opcode {
            Op::TypeSampledImage => Some(vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
            Op::TypeSampler => Some(vk::DescriptorType::SAMPLER),
            Op::TypeImage => image_descriptor_type(types.get(element)?),
            _ => None,
        },
        _ => None,
    }
}

fn image_descriptor_type(image: &Instruction) -> Option<vk::DescriptorType> {
    let dim = match image.operands.get(1) {
        Some(Operand::Dim(dim)) => *dim,
        _ => return None,
    };
    let sampled = match image.operands.get(5) {
        Some(Operand::LiteralBit32(sampled)) => *sampled,
        _ => return None,
    };
    Some(match (dim, sampled) {
        (Dim::DimSubpassData, _) => vk::DescriptorType::INPUT_ATTACHMENT,
        (Dim::DimBuffer, 2) => vk::DescriptorType::STORAGE_TEXEL_BUFFER,
        (Dim::DimBuffer, _) => vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
        (_, 2) => vk::DescriptorType::STORAGE_IMAGE,
        _ => vk::DescriptorType::SAMPLED_IMAGE,
    })
}

#[derive(Default)]
struct Decorations {
    sets: HashMap<Word, u32>,
    bindings: HashMap<Word, u32>,
    flags: HashMap<Word, Vec<Decoration>>,
}

impl Decorations {
    fn collect(module: &Module) -> Self {
        let mut out = Self::default();
        for inst in &module.annotations {
            if inst.class.opcode != Op::Decorate {
                continue;
            }
            let (Some(Operand::IdRef(target)), Some(Operand::Decoration(decoration))) =
                (inst.operands.first(), inst.operands.get(1))
            else {
                continue;
            };
            let literal = match inst.operands.get(2) {
                Some(Operand::LiteralBit32(value)) => Some(*value),
                _ => None,
            };
            match (decoration, literal) {
                (Decoration::DescriptorSet, Some(set)) => {
                    out.sets.insert(*target, set);
                }
                (Decoration::Binding, Some(binding)) => {
                    out.bindings.insert(*target, binding);
                }
                _ => out.flags.entry(*target).or_default().push(*decoration),
            }
        }
        out
    }

    fn set(&self, id: Word) -> Option<u32> {
        self.sets.get(&id).copied()
    }

    fn binding(&self, id: Word) -> Option<u32> {
        self.bindings.get(&id).copied()
    }

    fn has(&self, id: Word, decoration: Decoration) -> bool {
        self.flags.get(&id).is_some_and(|flags| flags.contains(&decoration))
    }
}

struct Types<'m> {
    by_id: HashMap<Word, &'m Instruction>,
}

impl<'m> Types<'m> {
    fn collect(module: &'m Module) -> Self {
        Self {
            by_id: module
                .types_global_values
                .iter()
                .filter_map(|inst| inst.result_id.map(|id| (id, inst)))
                .collect(),
        }
    }

    fn get(&self, id: Word) -> Option<&'m Instruction> {
        self.by_id.get(&id).copied()
    }

    fn pointer(&self, id: Word) -> Option<(StorageClass, Word)> {
        let inst = self.get(id)?;
        if inst.class.opcode != Op::TypePointer {
            return None;
        }
        match (inst.operands.first(), inst.operands.get(1)) {
            (Some(Operand::StorageClass(class)), Some(Operand::IdRef(pointee))) => Some((*class, *pointee)),
            _ => None,
        }
    }

    /// Element type and total descriptor count of (nested) arrays
    fn strip_arrays(&self, mut id: Word) -> (Word, u32) {
        let mut count = 1;
        while let Some(inst) = self.get(id) {
            match inst.class.opcode {
                Op::TypeArray => {
                    let (Some(Operand::IdRef(element)), Some(Operand::IdRef(length))) =
                        (inst.operands.first(), inst.operands.get(1))
                    else {
                        break;
                    };
                    count *= self.constant(*length).unwrap_or(1);
                    id = *element;
                }
                Op::TypeRuntimeArray => {
                    let Some(Operand::IdRef(element)) = inst.operands.first() else {
                        break;
                    };
                    log::warn!("Runtime-sized descriptor array %{id} reflected as a single descriptor");
                    id = *element;
                }
                _ => break,
            }
        }
        (id, count)
    }

    fn constant(&self, id: Word) -> Option<u32> {
        let inst = self.get(id)?;
        if inst.class.opcode != Op::Constant {
            return None;
        }
        match inst.operands.first() {
            Some(Operand::LiteralBit32(value)) => Some(*value),
            _ => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rspirv::binary::Assemble;
    use rspirv::dr::Builder;
    use rspirv::spirv::{AddressingModel, Capability, ImageFormat, MemoryModel};

    /// Resource declared by a generated test module
    #[derive(Clone, Copy)]
    pub(crate) enum Res {
        Uniform,
        Storage,
        Texture,
        TextureArray(u32),
        StorageImage,
    }

    /// Assemble a module with one entry point of `model` declaring `resources`
    pub(crate) fn module(model: ExecutionModel, resources: &[(u32, u32, Res)]) -> Vec<u32> {
        let mut b = Builder::new();
        b.set_version(1, 0);
        b.capability(Capability::Shader);
        b.memory_model(AddressingModel::Logical, MemoryModel::GLSL450);

        let int = b.type_int(32, 0);
        let float = b.type_float(32);
        for &(set, binding, res) in resources {
            let (storage_class, pointee) = match res {
                // The builder deduplicates identical structs, so each block kind gets its own member type
                Res::Uniform => {
                    let block = b.type_struct([float]);
                    b.decorate(block, Decoration::Block, []);
                    (StorageClass::Uniform, block)
                }
                Res::Storage => {
                    let block = b.type_struct([int]);
                    b.decorate(block, Decoration::BufferBlock, []);
                    (StorageClass::Uniform, block)
                }
                Res::Texture | Res::TextureArray(_) => {
                    let image = b.type_image(int, Dim::Dim2D, 0, 0, 0, 1, ImageFormat::Unknown, None);
                    let sampled = b.type_sampled_image(image);
                    let ty = match res {
                        Res::TextureArray(len) => {
                            let len = b.constant_bit32(int, len);
                            b.type_array(sampled, len)
                        }
                        _ => sampled,
                    };
                    (StorageClass::UniformConstant, ty)
                }
                Res::StorageImage => {
                    let image = b.type_image(int, Dim::Dim2D, 0, 0, 0, 2, ImageFormat::Rgba8, None);
                    (StorageClass::UniformConstant, image)
                }
            };
            let pointer = b.type_pointer(None, storage_class, pointee);
            let var = b.variable(pointer, None, storage_class, None);
            b.decorate(var, Decoration::DescriptorSet, [Operand::LiteralBit32(set)]);
            b.decorate(var, Decoration::Binding, [Operand::LiteralBit32(binding)]);
        }

        let main = b.id();
        b.entry_point(model, main, "main", []);
        b.module().assemble()
    }

    #[test]
    fn test_binding_types() {
        let words = module(
            ExecutionModel::Fragment,
            &[
                (0, 0, Res::Uniform),
                (0, 1, Res::Storage),
                (0, 2, Res::Texture),
                (0, 3, Res::StorageImage),
            ],
        );
        let mut bindings = reflect_stage(&words).unwrap();
        bindings.sort_by_key(|(_, b)| b.binding);
        let types: Vec<_> = bindings.iter().map(|(_, b)| b.ty).collect();
        assert_eq!(
            types,
            vec![
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::DescriptorType::STORAGE_BUFFER,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::DescriptorType::STORAGE_IMAGE,
            ]
        );
        assert!(bindings.iter().all(|(_, b)| b.stages == vk::ShaderStageFlags::FRAGMENT));
    }

    #[test]
    fn test_array_count() {
        let words = module(ExecutionModel::Fragment, &[(1, 0, Res::TextureArray(4))]);
        let bindings = reflect_stage(&words).unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].0, 1);
        assert_eq!(bindings[0].1.count, 4);
    }

    #[test]
    fn test_sparse_sets_are_filled() {
        let vert = module(ExecutionModel::Vertex, &[(0, 0, Res::Uniform)]);
        let frag = module(ExecutionModel::Fragment, &[(2, 1, Res::Texture)]);
        let sets = descriptor_sets(&[&vert, &frag]).unwrap();

        assert_eq!(sets.len(), 3);
        assert_eq!(sets.iter().map(|s| s.set).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(sets[1].bindings.is_empty());
        assert_eq!(sets[2].bindings[0].binding, 1);
    }

    #[test]
    fn test_shared_binding_merges_stages() {
        let vert = module(ExecutionModel::Vertex, &[(0, 0, Res::Uniform)]);
        let frag = module(ExecutionModel::Fragment, &[(0, 0, Res::Uniform)]);
        let sets = descriptor_sets(&[&vert, &frag]).unwrap();

        assert_eq!(sets.len(), 1);
        assert_eq!(
            sets[0].bindings[0].stages,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
    }

    #[test]
    fn test_conflicting_binding_rejected() {
        let vert = module(ExecutionModel::Vertex, &[(0, 0, Res::Uniform)]);
        let frag = module(ExecutionModel::Fragment, &[(0, 0, Res::Texture)]);
        assert!(matches!(
            descriptor_sets(&[&vert, &frag]),
            Err(VulkanError::InvalidShader(_))
        ));
    }

    #[test]
    fn test_uniform_and_storage_blocks_stay_distinct() {
        let words = module(ExecutionModel::Vertex, &[(0, 0, Res::Storage), (0, 1, Res::Uniform)]);
        let mut bindings = reflect_stage(&words).unwrap();
        bindings.sort_by_key(|(_, b)| b.binding);
        assert_eq!(bindings[0].1.ty, vk::DescriptorType::STORAGE_BUFFER);
        assert_eq!(bindings[1].1.ty, vk::DescriptorType::UNIFORM_BUFFER);
    }

    #[test]
    fn test_huge_set_number_rejected() {
        let frag = module(ExecutionModel::Fragment, &[(2_000_000, 0, Res::Texture)]);
        assert!(matches!(
            descriptor_sets(&[&frag]),
            Err(VulkanError::InvalidShader(_))
        ));

        let last = module(ExecutionModel::Fragment, &[(MAX_DESCRIPTOR_SETS - 1, 0, Res::Texture)]);
        assert_eq!(descriptor_sets(&[&last]).unwrap().len(), MAX_DESCRIPTOR_SETS as usize);
    }

    #[test]
    fn test_no_resources() {
        let vert = module(ExecutionModel::Vertex, &[]);
        assert!(descriptor_sets(&[&vert]).unwrap().is_empty());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            reflect_stage(&[0xdead_beef, 1, 2, 3, 4]),
            Err(VulkanError::InvalidShader(_))
        ));
    }
}
