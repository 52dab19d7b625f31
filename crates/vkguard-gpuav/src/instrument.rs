//! Descriptor-index bounds instrumentation.
//!
//! Every access chain whose base is a fixed-size array of descriptors gets a
//! bounds test in front of it. The outcome is folded into two atomics on a
//! storage buffer bound at the reserved debug slot:
//!
//! | word | meaning |
//! |---|---|
//! | 0 | number of out-of-bounds accesses |
//! | 1 | largest `(shader_id << 16) | (site + 1)` that went out of bounds |
//!
//! With safe mode on, the offending index is also clamped to 0 so the access
//! itself stays in bounds.

use std::collections::HashMap;

use tracing::trace;

use crate::error::InstrumentError;
use crate::spirv::{decoration, op, storage_class, Instruction, Module};

/// Word offsets inside the debug output buffer.
pub const OUTPUT_COUNT_WORD: usize = 0;
pub const OUTPUT_TAG_WORD: usize = 1;
pub const OUTPUT_HEADER_WORDS: usize = 2;

/// Memory scope `Device`.
const SCOPE_DEVICE: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrumentOptions {
    pub desc_set: u32,
    pub binding: u32,
    /// 16-bit id stamped into every out-of-bounds tag.
    pub shader_id: u16,
    pub safe_mode: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instrumented {
    pub words: Vec<u32>,
    /// Number of access chains that received a check.
    pub sites: u32,
}

/// Tag written for site `site` of shader `shader_id`.
pub fn site_tag(shader_id: u16, site: u32) -> u32 {
    ((shader_id as u32) << 16) | ((site + 1) & 0xffff)
}

struct DescriptorArray {
    length_id: u32,
}

struct Site {
    index: usize,
    index_id: u32,
    index_type: u32,
    length_id: u32,
}

/// Ids of the objects shared by all checks in one module.
struct DebugBinding {
    uint: u32,
    bool_ty: u32,
    ptr_uint: u32,
    var: u32,
    zero: u32,
    one: u32,
}

pub fn instrument(words: &[u32], opts: &InstrumentOptions) -> Result<Instrumented, InstrumentError> {
    let mut module = Module::parse(words)?;
    if module.entry_points().next().is_none() {
        return Err(InstrumentError::NoEntryPoint);
    }

    let sites = find_sites(&module);
    if sites.is_empty() {
        trace!(shader_id = opts.shader_id, "no descriptor array accesses to instrument");
        return Ok(Instrumented {
            words: module.assemble(),
            sites: 0,
        });
    }

    // Worst case: shared objects plus eight ids per site.
    let needed = 16 + 8 * sites.len() as u64;
    if module.header.bound as u64 + needed > u32::MAX as u64 {
        return Err(InstrumentError::IdOverflow);
    }

    let mut globals = Vec::new();
    let mut annotations = Vec::new();
    let debug = declare_debug_binding(&mut module, opts, &mut globals, &mut annotations);

    // Signed index types need their own zero for the clamp.
    let mut zeros: HashMap<u32, u32> = HashMap::from([(debug.uint, debug.zero)]);
    let mut rewritten = Vec::with_capacity(module.instructions.len() + sites.len() * 8);
    let mut sites_iter = sites.iter().enumerate().peekable();
    let instructions = std::mem::take(&mut module.instructions);

    for (i, mut inst) in instructions.into_iter().enumerate() {
        if let Some((n, site)) = sites_iter.next_if(|(_, s)| s.index == i) {
            let tag = module.alloc_id();
            globals.push(Instruction::new(
                op::CONSTANT,
                vec![debug.uint, tag, site_tag(opts.shader_id, n as u32)],
            ));

            let in_bounds = module.alloc_id();
            let count_delta = module.alloc_id();
            let count_ptr = module.alloc_id();
            let count_old = module.alloc_id();
            let tag_value = module.alloc_id();
            let tag_ptr = module.alloc_id();
            let tag_old = module.alloc_id();

            rewritten.push(Instruction::new(
                op::U_LESS_THAN,
                vec![debug.bool_ty, in_bounds, site.index_id, site.length_id],
            ));
            rewritten.push(Instruction::new(
                op::SELECT,
                vec![debug.uint, count_delta, in_bounds, debug.zero, debug.one],
            ));
            rewritten.push(Instruction::new(
                op::ACCESS_CHAIN,
                vec![debug.ptr_uint, count_ptr, debug.var, debug.zero, debug.zero],
            ));
            rewritten.push(Instruction::new(
                op::ATOMIC_I_ADD,
                vec![debug.uint, count_old, count_ptr, debug.one, debug.zero, count_delta],
            ));
            rewritten.push(Instruction::new(
                op::SELECT,
                vec![debug.uint, tag_value, in_bounds, debug.zero, tag],
            ));
            rewritten.push(Instruction::new(
                op::ACCESS_CHAIN,
                vec![debug.ptr_uint, tag_ptr, debug.var, debug.zero, debug.one],
            ));
            rewritten.push(Instruction::new(
                op::ATOMIC_U_MAX,
                vec![debug.uint, tag_old, tag_ptr, debug.one, debug.zero, tag_value],
            ));

            if opts.safe_mode {
                let zero = match zeros.get(&site.index_type) {
                    Some(zero) => *zero,
                    None => {
                        let zero = module.alloc_id();
                        globals.push(Instruction::new(op::CONSTANT, vec![site.index_type, zero, 0]));
                        zeros.insert(site.index_type, zero);
                        zero
                    }
                };
                let clamped = module.alloc_id();
                rewritten.push(Instruction::new(
                    op::SELECT,
                    vec![site.index_type, clamped, in_bounds, site.index_id, zero],
                ));
                inst.operands[3] = clamped;
            }
        }
        rewritten.push(inst);
    }
    module.instructions = rewritten;

    if module.version() >= (1, 4) {
        for inst in module
            .instructions
            .iter_mut()
            .filter(|inst| inst.opcode == op::ENTRY_POINT)
        {
            inst.operands.push(debug.var);
        }
    }

    let at = module.functions_start();
    module.instructions.splice(at..at, globals);
    let at = module.types_start();
    module.instructions.splice(at..at, annotations);

    trace!(
        shader_id = opts.shader_id,
        sites = sites.len(),
        bound = module.header.bound,
        "instrumented shader"
    );
    Ok(Instrumented {
        words: module.assemble(),
        sites: sites.len() as u32,
    })
}

/// Access chains indexing into a descriptor array with a 32-bit integer.
fn find_sites(module: &Module) -> Vec<Site> {
    let mut value_types = HashMap::new();
    let mut types = HashMap::new();
    for inst in &module.instructions {
        if let (Some(id), Some(ty)) = (inst.result_id(), inst.result_type()) {
            value_types.insert(id, ty);
        }
        if (op::TYPE_VOID..=op::TYPE_FUNCTION).contains(&inst.opcode) {
            if let Some(id) = inst.result_id() {
                types.insert(id, inst);
            }
        }
    }

    let is_int32 = |ty: u32| {
        types
            .get(&ty)
            .is_some_and(|t| t.opcode == op::TYPE_INT && t.operands.get(1) == Some(&32))
    };

    let mut arrays: HashMap<u32, DescriptorArray> = HashMap::new();
    for inst in &module.instructions {
        if inst.opcode != op::VARIABLE || inst.operands.len() < 3 {
            continue;
        }
        let class = inst.operands[2];
        if !matches!(
            class,
            storage_class::UNIFORM_CONSTANT | storage_class::UNIFORM | storage_class::STORAGE_BUFFER
        ) {
            continue;
        }
        let pointee = types
            .get(&inst.operands[0])
            .filter(|p| p.opcode == op::TYPE_POINTER)
            .and_then(|p| p.operands.get(2))
            .and_then(|pointee| types.get(pointee));
        if let Some(array) = pointee.filter(|t| t.opcode == op::TYPE_ARRAY) {
            if let Some(length_id) = array.operands.get(2) {
                arrays.insert(
                    inst.operands[1],
                    DescriptorArray {
                        length_id: *length_id,
                    },
                );
            }
        }
    }

    module
        .instructions
        .iter()
        .enumerate()
        .filter(|(_, inst)| {
            matches!(inst.opcode, op::ACCESS_CHAIN | op::IN_BOUNDS_ACCESS_CHAIN) && inst.operands.len() >= 4
        })
        .filter_map(|(index, inst)| {
            let array = arrays.get(&inst.operands[2])?;
            let index_id = inst.operands[3];
            let index_type = *value_types.get(&index_id)?;
            if !is_int32(index_type) {
                return None;
            }
            Some(Site {
                index,
                index_id,
                index_type,
                length_id: array.length_id,
            })
        })
        .collect()
}

/// Declare the output buffer variable and the constants the checks share.
fn declare_debug_binding(
    module: &mut Module,
    opts: &InstrumentOptions,
    globals: &mut Vec<Instruction>,
    annotations: &mut Vec<Instruction>,
) -> DebugBinding {
    let existing_uint = module
        .find(|inst| inst.opcode == op::TYPE_INT && inst.operands.get(1..3) == Some(&[32, 0][..]))
        .and_then(Instruction::result_id);
    let uint = match existing_uint {
        Some(id) => id,
        None => {
            let id = module.alloc_id();
            globals.push(Instruction::new(op::TYPE_INT, vec![id, 32, 0]));
            id
        }
    };
    let existing_bool = module
        .find(|inst| inst.opcode == op::TYPE_BOOL)
        .and_then(Instruction::result_id);
    let bool_ty = match existing_bool {
        Some(id) => id,
        None => {
            let id = module.alloc_id();
            globals.push(Instruction::new(op::TYPE_BOOL, vec![id]));
            id
        }
    };

    // StorageBuffer needs SPIR-V 1.3; older modules use the BufferBlock form.
    let (class, block) = if module.version() >= (1, 3) {
        (storage_class::STORAGE_BUFFER, decoration::BLOCK)
    } else {
        (storage_class::UNIFORM, decoration::BUFFER_BLOCK)
    };

    let runtime_array = module.alloc_id();
    let block_struct = module.alloc_id();
    let ptr_struct = module.alloc_id();
    let ptr_uint = module.alloc_id();
    let var = module.alloc_id();
    let zero = module.alloc_id();
    let one = module.alloc_id();

    globals.extend([
        Instruction::new(op::TYPE_RUNTIME_ARRAY, vec![runtime_array, uint]),
        Instruction::new(op::TYPE_STRUCT, vec![block_struct, runtime_array]),
        Instruction::new(op::TYPE_POINTER, vec![ptr_struct, class, block_struct]),
        Instruction::new(op::TYPE_POINTER, vec![ptr_uint, class, uint]),
        Instruction::new(op::VARIABLE, vec![ptr_struct, var, class]),
        Instruction::new(op::CONSTANT, vec![uint, zero, 0]),
        Instruction::new(op::CONSTANT, vec![uint, one, SCOPE_DEVICE]),
    ]);
    annotations.extend([
        Instruction::new(op::DECORATE, vec![runtime_array, decoration::ARRAY_STRIDE, 4]),
        Instruction::new(op::DECORATE, vec![block_struct, block]),
        Instruction::new(op::MEMBER_DECORATE, vec![block_struct, 0, decoration::OFFSET, 0]),
        Instruction::new(op::DECORATE, vec![var, decoration::DESCRIPTOR_SET, opts.desc_set]),
        Instruction::new(op::DECORATE, vec![var, decoration::BINDING, opts.binding]),
    ]);

    DebugBinding {
        uint,
        bool_ty,
        ptr_uint,
        var,
        zero,
        one,
    }
}
