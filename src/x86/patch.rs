// This module keeps the patch tables recorded during code generation and
// turns them into the typed linker-patch list handed to the caller after
// emission. Each PC-relative reference in the emitted code has a PatchInfo
// entry holding the method-address landmark it is relative to, the referenced
// entity, and a label bound immediately after the 4-byte immediate slot; the
// literal offset of the slot is therefore the label position minus four. JIT
// string/class roots are tracked separately: their slots are rewritten in
// place with absolute root-table addresses once the table address is known.

//! Patch tables and linker patches.

use crate::graph::InstrId;
use crate::x86::assembler::{Label, X86Assembler};
use hashbrown::HashMap;

/// Identifies a method in some dex file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodReference {
    pub dex_file: u32,
    pub index: u32,
}

/// Identifies a type in some dex file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeReference {
    pub dex_file: u32,
    pub type_index: u32,
}

/// Identifies a string in some dex file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StringReference {
    pub dex_file: u32,
    pub string_index: u32,
}

/// One recorded PC-relative reference awaiting linking.
#[derive(Debug, Clone, Copy)]
pub struct PatchInfo {
    /// The ComputeBaseMethodAddress landmark the reference is relative to.
    /// `None` for boot-image references linked without a landmark.
    pub method_address_base: Option<InstrId>,
    /// Dex-file token of the referenced entity.
    pub dex_file: u32,
    /// Index of the referenced entity (or raw data offset).
    pub index: u32,
    /// Bound immediately after the 4-byte immediate slot.
    pub label: Label,
}

/// A fully resolved patch request, in the order the linker consumes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkerPatch {
    /// Boot-image address of arbitrary data (rel-ro, intrinsics).
    DataBimgRelRo { literal_offset: u32, pc_insn_offset: u32, boot_image_offset: u32 },
    MethodRelative { literal_offset: u32, pc_insn_offset: u32, target: MethodReference },
    MethodAppImageRelRo { literal_offset: u32, pc_insn_offset: u32, target: MethodReference },
    MethodBssEntry { literal_offset: u32, pc_insn_offset: u32, target: MethodReference },
    TypeRelative { literal_offset: u32, pc_insn_offset: u32, target: TypeReference },
    TypeAppImageRelRo { literal_offset: u32, pc_insn_offset: u32, target: TypeReference },
    TypeBssEntry { literal_offset: u32, pc_insn_offset: u32, target: TypeReference },
    PublicTypeBssEntry { literal_offset: u32, pc_insn_offset: u32, target: TypeReference },
    PackageTypeBssEntry { literal_offset: u32, pc_insn_offset: u32, target: TypeReference },
    StringRelative { literal_offset: u32, pc_insn_offset: u32, target: StringReference },
    StringBssEntry { literal_offset: u32, pc_insn_offset: u32, target: StringReference },
    JniEntrypointRelative { literal_offset: u32, pc_insn_offset: u32, target: MethodReference },
}

/// Per-kind FIFO queues of pending patches.
#[derive(Default)]
pub struct PatchTables {
    boot_image_method: Vec<PatchInfo>,
    app_image_method: Vec<PatchInfo>,
    method_bss_entry: Vec<PatchInfo>,
    boot_image_type: Vec<PatchInfo>,
    app_image_type: Vec<PatchInfo>,
    type_bss_entry: Vec<PatchInfo>,
    public_type_bss_entry: Vec<PatchInfo>,
    package_type_bss_entry: Vec<PatchInfo>,
    boot_image_string: Vec<PatchInfo>,
    string_bss_entry: Vec<PatchInfo>,
    boot_image_jni_entrypoint: Vec<PatchInfo>,
    boot_image_other: Vec<PatchInfo>,
    /// JIT roots: referenced entity -> root table index, plus the slot labels.
    jit_string_roots: HashMap<StringReference, u32>,
    jit_string_patches: Vec<(StringReference, Label)>,
    jit_class_roots: HashMap<TypeReference, u32>,
    jit_class_patches: Vec<(TypeReference, Label)>,
}

impl PatchTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_boot_image_method(&mut self, base: Option<InstrId>, target: MethodReference, label: Label) {
        self.boot_image_method.push(PatchInfo {
            method_address_base: base,
            dex_file: target.dex_file,
            index: target.index,
            label,
        });
    }

    pub fn record_app_image_method(&mut self, base: Option<InstrId>, target: MethodReference, label: Label) {
        self.app_image_method.push(PatchInfo {
            method_address_base: base,
            dex_file: target.dex_file,
            index: target.index,
            label,
        });
    }

    pub fn record_method_bss_entry(&mut self, base: Option<InstrId>, target: MethodReference, label: Label) {
        self.method_bss_entry.push(PatchInfo {
            method_address_base: base,
            dex_file: target.dex_file,
            index: target.index,
            label,
        });
    }

    pub fn record_boot_image_type(&mut self, base: Option<InstrId>, target: TypeReference, label: Label) {
        self.boot_image_type.push(PatchInfo {
            method_address_base: base,
            dex_file: target.dex_file,
            index: target.type_index,
            label,
        });
    }

    pub fn record_app_image_type(&mut self, base: Option<InstrId>, target: TypeReference, label: Label) {
        self.app_image_type.push(PatchInfo {
            method_address_base: base,
            dex_file: target.dex_file,
            index: target.type_index,
            label,
        });
    }

    pub fn record_type_bss_entry(&mut self, base: Option<InstrId>, target: TypeReference, label: Label) {
        self.type_bss_entry.push(PatchInfo {
            method_address_base: base,
            dex_file: target.dex_file,
            index: target.type_index,
            label,
        });
    }

    pub fn record_public_type_bss_entry(&mut self, base: Option<InstrId>, target: TypeReference, label: Label) {
        self.public_type_bss_entry.push(PatchInfo {
            method_address_base: base,
            dex_file: target.dex_file,
            index: target.type_index,
            label,
        });
    }

    pub fn record_package_type_bss_entry(&mut self, base: Option<InstrId>, target: TypeReference, label: Label) {
        self.package_type_bss_entry.push(PatchInfo {
            method_address_base: base,
            dex_file: target.dex_file,
            index: target.type_index,
            label,
        });
    }

    pub fn record_boot_image_string(&mut self, base: Option<InstrId>, target: StringReference, label: Label) {
        self.boot_image_string.push(PatchInfo {
            method_address_base: base,
            dex_file: target.dex_file,
            index: target.string_index,
            label,
        });
    }

    pub fn record_string_bss_entry(&mut self, base: Option<InstrId>, target: StringReference, label: Label) {
        self.string_bss_entry.push(PatchInfo {
            method_address_base: base,
            dex_file: target.dex_file,
            index: target.string_index,
            label,
        });
    }

    pub fn record_boot_image_jni_entrypoint(&mut self, base: Option<InstrId>, target: MethodReference, label: Label) {
        self.boot_image_jni_entrypoint.push(PatchInfo {
            method_address_base: base,
            dex_file: target.dex_file,
            index: target.index,
            label,
        });
    }

    /// Raw boot-image data reference (rel-ro slots, intrinsic data).
    pub fn record_boot_image_other(&mut self, base: Option<InstrId>, boot_image_offset: u32, label: Label) {
        self.boot_image_other.push(PatchInfo {
            method_address_base: base,
            dex_file: 0,
            index: boot_image_offset,
            label,
        });
    }

    /// Intern a JIT string root and record the slot referencing it.
    pub fn record_jit_string_root(&mut self, target: StringReference, label: Label) -> u32 {
        let next = self.jit_string_roots.len() as u32;
        let index = *self.jit_string_roots.entry(target).or_insert(next);
        self.jit_string_patches.push((target, label));
        index
    }

    pub fn record_jit_class_root(&mut self, target: TypeReference, label: Label) -> u32 {
        let next = self.jit_class_roots.len() as u32;
        let index = *self.jit_class_roots.entry(target).or_insert(next);
        self.jit_class_patches.push((target, label));
        index
    }

    /// Number of distinct JIT roots (strings first, then classes).
    pub fn number_of_jit_roots(&self) -> usize {
        self.jit_string_roots.len() + self.jit_class_roots.len()
    }

    pub fn has_patches(&self) -> bool {
        !(self.boot_image_method.is_empty()
            && self.app_image_method.is_empty()
            && self.method_bss_entry.is_empty()
            && self.boot_image_type.is_empty()
            && self.app_image_type.is_empty()
            && self.type_bss_entry.is_empty()
            && self.public_type_bss_entry.is_empty()
            && self.package_type_bss_entry.is_empty()
            && self.boot_image_string.is_empty()
            && self.string_bss_entry.is_empty()
            && self.boot_image_jni_entrypoint.is_empty()
            && self.boot_image_other.is_empty())
    }

    /// Materialise the linker-patch list. `base_offsets` maps each
    /// method-address landmark to its code offset.
    pub fn linker_patches(
        &self,
        asm: &X86Assembler,
        base_offsets: &HashMap<InstrId, u32>,
    ) -> Vec<LinkerPatch> {
        fn offsets(
            info: &PatchInfo,
            asm: &X86Assembler,
            base_offsets: &HashMap<InstrId, u32>,
        ) -> (u32, u32) {
            // The label sits just past the 4-byte immediate.
            let literal_offset = asm.label_position(info.label) - 4;
            let pc_insn_offset = info
                .method_address_base
                .map(|id| base_offsets[&id])
                .unwrap_or(literal_offset);
            (literal_offset, pc_insn_offset)
        }

        let mut patches = Vec::with_capacity(
            self.boot_image_method.len()
                + self.app_image_method.len()
                + self.method_bss_entry.len()
                + self.boot_image_type.len()
                + self.app_image_type.len()
                + self.type_bss_entry.len()
                + self.public_type_bss_entry.len()
                + self.package_type_bss_entry.len()
                + self.boot_image_string.len()
                + self.string_bss_entry.len()
                + self.boot_image_jni_entrypoint.len()
                + self.boot_image_other.len(),
        );
        for info in &self.boot_image_other {
            let (literal_offset, pc_insn_offset) = offsets(info, asm, base_offsets);
            patches.push(LinkerPatch::DataBimgRelRo {
                literal_offset,
                pc_insn_offset,
                boot_image_offset: info.index,
            });
        }
        for info in &self.boot_image_method {
            let (literal_offset, pc_insn_offset) = offsets(info, asm, base_offsets);
            patches.push(LinkerPatch::MethodRelative {
                literal_offset,
                pc_insn_offset,
                target: MethodReference { dex_file: info.dex_file, index: info.index },
            });
        }
        for info in &self.app_image_method {
            let (literal_offset, pc_insn_offset) = offsets(info, asm, base_offsets);
            patches.push(LinkerPatch::MethodAppImageRelRo {
                literal_offset,
                pc_insn_offset,
                target: MethodReference { dex_file: info.dex_file, index: info.index },
            });
        }
        for info in &self.method_bss_entry {
            let (literal_offset, pc_insn_offset) = offsets(info, asm, base_offsets);
            patches.push(LinkerPatch::MethodBssEntry {
                literal_offset,
                pc_insn_offset,
                target: MethodReference { dex_file: info.dex_file, index: info.index },
            });
        }
        for info in &self.boot_image_type {
            let (literal_offset, pc_insn_offset) = offsets(info, asm, base_offsets);
            patches.push(LinkerPatch::TypeRelative {
                literal_offset,
                pc_insn_offset,
                target: TypeReference { dex_file: info.dex_file, type_index: info.index },
            });
        }
        for info in &self.app_image_type {
            let (literal_offset, pc_insn_offset) = offsets(info, asm, base_offsets);
            patches.push(LinkerPatch::TypeAppImageRelRo {
                literal_offset,
                pc_insn_offset,
                target: TypeReference { dex_file: info.dex_file, type_index: info.index },
            });
        }
        for info in &self.type_bss_entry {
            let (literal_offset, pc_insn_offset) = offsets(info, asm, base_offsets);
            patches.push(LinkerPatch::TypeBssEntry {
                literal_offset,
                pc_insn_offset,
                target: TypeReference { dex_file: info.dex_file, type_index: info.index },
            });
        }
        for info in &self.public_type_bss_entry {
            let (literal_offset, pc_insn_offset) = offsets(info, asm, base_offsets);
            patches.push(LinkerPatch::PublicTypeBssEntry {
                literal_offset,
                pc_insn_offset,
                target: TypeReference { dex_file: info.dex_file, type_index: info.index },
            });
        }
        for info in &self.package_type_bss_entry {
            let (literal_offset, pc_insn_offset) = offsets(info, asm, base_offsets);
            patches.push(LinkerPatch::PackageTypeBssEntry {
                literal_offset,
                pc_insn_offset,
                target: TypeReference { dex_file: info.dex_file, type_index: info.index },
            });
        }
        for info in &self.boot_image_string {
            let (literal_offset, pc_insn_offset) = offsets(info, asm, base_offsets);
            patches.push(LinkerPatch::StringRelative {
                literal_offset,
                pc_insn_offset,
                target: StringReference { dex_file: info.dex_file, string_index: info.index },
            });
        }
        for info in &self.string_bss_entry {
            let (literal_offset, pc_insn_offset) = offsets(info, asm, base_offsets);
            patches.push(LinkerPatch::StringBssEntry {
                literal_offset,
                pc_insn_offset,
                target: StringReference { dex_file: info.dex_file, string_index: info.index },
            });
        }
        for info in &self.boot_image_jni_entrypoint {
            let (literal_offset, pc_insn_offset) = offsets(info, asm, base_offsets);
            patches.push(LinkerPatch::JniEntrypointRelative {
                literal_offset,
                pc_insn_offset,
                target: MethodReference { dex_file: info.dex_file, index: info.index },
            });
        }
        patches
    }

    /// Rewrite JIT root slots with absolute root-table entry addresses.
    ///
    /// The root table lays out string roots first, then class roots, one
    /// 4-byte entry each, starting at `roots_data_address`.
    pub fn patch_jit_roots(&self, asm: &X86Assembler, code: &mut [u8], roots_data_address: u32) {
        let string_roots = self.jit_string_roots.len() as u32;
        for (target, label) in &self.jit_string_patches {
            let index = self.jit_string_roots[target];
            let slot = (asm.label_position(*label) - 4) as usize;
            let address = roots_data_address + index * 4;
            code[slot..slot + 4].copy_from_slice(&address.to_le_bytes());
        }
        for (target, label) in &self.jit_class_patches {
            let index = string_roots + self.jit_class_roots[target];
            let slot = (asm.label_position(*label) - 4) as usize;
            let address = roots_data_address + index * 4;
            code[slot..slot + 4].copy_from_slice(&address.to_le_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x86::Register;

    #[test]
    fn test_literal_offset_is_label_minus_four() {
        let mut asm = X86Assembler::new(false);
        let mut tables = PatchTables::new();

        // movl ebx, imm32 with a to-be-linked immediate.
        asm.movl_reg_imm(Register::EBX, 0);
        let label = asm.create_label();
        asm.bind(label);
        tables.record_boot_image_string(
            None,
            StringReference { dex_file: 1, string_index: 42 },
            label,
        );

        let patches = tables.linker_patches(&asm, &HashMap::new());
        assert_eq!(patches.len(), 1);
        match patches[0] {
            LinkerPatch::StringRelative { literal_offset, pc_insn_offset, target } => {
                assert_eq!(literal_offset, 1);
                assert_eq!(pc_insn_offset, 1);
                assert_eq!(target.string_index, 42);
            }
            other => panic!("unexpected patch {other:?}"),
        }
    }

    #[test]
    fn test_patches_keep_fifo_order_per_kind() {
        let mut asm = X86Assembler::new(false);
        let mut tables = PatchTables::new();
        for index in 0..3 {
            asm.movl_reg_imm(Register::EAX, 0);
            let label = asm.create_label();
            asm.bind(label);
            tables.record_method_bss_entry(
                None,
                MethodReference { dex_file: 0, index },
                label,
            );
        }
        let patches = tables.linker_patches(&asm, &HashMap::new());
        let indices: Vec<u32> = patches
            .iter()
            .map(|p| match p {
                LinkerPatch::MethodBssEntry { target, .. } => target.index,
                other => panic!("unexpected patch {other:?}"),
            })
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_jit_roots_deduplicate_and_patch() {
        let mut asm = X86Assembler::new(false);
        let mut tables = PatchTables::new();
        let s = StringReference { dex_file: 0, string_index: 7 };

        asm.movl_reg_imm(Register::EAX, 0);
        let l1 = asm.create_label();
        asm.bind(l1);
        let i1 = tables.record_jit_string_root(s, l1);

        asm.movl_reg_imm(Register::ECX, 0);
        let l2 = asm.create_label();
        asm.bind(l2);
        let i2 = tables.record_jit_string_root(s, l2);

        assert_eq!(i1, i2);
        assert_eq!(tables.number_of_jit_roots(), 1);

        let mut code = asm.code().to_vec();
        tables.patch_jit_roots(&asm, &mut code, 0x1000_0000);
        // Both slots now hold the table entry address.
        assert_eq!(&code[1..5], &0x1000_0000u32.to_le_bytes());
        assert_eq!(&code[6..10], &0x1000_0000u32.to_le_bytes());
    }
}
