// This module dumps the CFG in the c1visualizer text format consumed by IDE
// plugins. One begin_compilation record opens the stream per method; every
// (pass, before/after) pair contributes a begin_cfg record listing each block
// with its predecessors, successors, exception handlers, flags and dominator,
// then its phis and instructions. Instruction lines carry type-tagged input
// references (i42 for an Int32 value, l17 for a reference, d5 for a double),
// the dex-pc, and location information once the register allocator has run.
// Every instruction line ends with the <|@ sentinel the format is versioned
// by. The two reserved pass names used for ad-hoc dumps from a debugger elide
// cosmetic fields to keep logs tight. The dumper only reads the graph.

//! CFG dumper in the c1visualizer format.

use std::io::{self, Write};

use crate::graph::{BlockId, HGraph, InstrId};
use crate::locations::Location;
use crate::x86::{Register, XmmRegister};

/// Reserved pass name for ad-hoc dumps; elides cosmetic fields.
pub const DEBUG_PASS_NAME: &str = "debug";
/// Reserved pass name for ad-hoc full-graph dumps; elides cosmetic fields.
pub const DEBUG_GRAPH_PASS_NAME: &str = "debug_graph";

/// Disassembles a code range for the final lowering dump. Absence of an
/// implementation only degrades the output.
pub trait Disassembler {
    /// Render the bytes of `code` starting at `code_offset`, one instruction
    /// per line.
    fn disassemble(&self, code_offset: usize, code: &[u8]) -> String;
}

/// Streaming CFG dumper. Construct one per method, call
/// [`dump_graph`](Self::dump_graph) around every pass.
pub struct HGraphVisualizer<'w, W: Write> {
    output: &'w mut W,
}

impl<'w, W: Write> HGraphVisualizer<'w, W> {
    pub fn new(output: &'w mut W, method_name: &str) -> io::Result<Self> {
        let mut visualizer = Self { output };
        visualizer.dump_compilation_header(method_name)?;
        Ok(visualizer)
    }

    fn dump_compilation_header(&mut self, method_name: &str) -> io::Result<()> {
        writeln!(self.output, "begin_compilation")?;
        writeln!(self.output, "  name \"{}\"", method_name)?;
        writeln!(self.output, "  method \"{}\"", method_name)?;
        writeln!(self.output, "  date 0")?;
        writeln!(self.output, "end_compilation")
    }

    /// One cfg record for a (pass, before/after) pair.
    pub fn dump_graph(&mut self, graph: &HGraph<'_>, pass_name: &str, is_after: bool) -> io::Result<()> {
        let terse = pass_name == DEBUG_PASS_NAME || pass_name == DEBUG_GRAPH_PASS_NAME;
        writeln!(self.output, "begin_cfg")?;
        writeln!(
            self.output,
            "  name \"{} ({})\"",
            pass_name,
            if is_after { "after" } else { "before" }
        )?;
        let order: Vec<BlockId> = if graph.linear_order().is_empty() {
            (0..graph.num_blocks() as u32).map(BlockId).collect()
        } else {
            graph.linear_order().to_vec()
        };
        for block in order {
            self.dump_block(graph, block, terse)?;
        }
        writeln!(self.output, "end_cfg")
    }

    fn dump_block(&mut self, graph: &HGraph<'_>, id: BlockId, terse: bool) -> io::Result<()> {
        let block = graph.block(id);
        writeln!(self.output, "  begin_block")?;
        writeln!(self.output, "    name \"B{}\"", id.0)?;
        writeln!(self.output, "    from_bb_id {}", id.0)?;
        writeln!(self.output, "    to_bb_id {}", id.0)?;
        if !terse || !block.predecessors.is_empty() {
            write!(self.output, "    predecessors")?;
            for pred in &block.predecessors {
                write!(self.output, " \"B{}\"", pred.0)?;
            }
            writeln!(self.output)?;
        }
        if !terse || !block.successors.is_empty() {
            write!(self.output, "    successors")?;
            for succ in &block.successors {
                write!(self.output, " \"B{}\"", succ.0)?;
            }
            writeln!(self.output)?;
        }
        if !terse || !block.exceptional_successors.is_empty() {
            write!(self.output, "    xhandlers")?;
            for succ in &block.exceptional_successors {
                write!(self.output, " \"B{}\"", succ.0)?;
            }
            writeln!(self.output)?;
        }
        let mut flags: Vec<&str> = Vec::new();
        if block.is_catch_block {
            flags.push("catch_block");
        }
        if block.is_try_block {
            flags.push("try_block");
        }
        if let Some(info) = &block.loop_information {
            flags.push("loop_header");
            if info.is_irreducible {
                flags.push("irreducible");
            }
        }
        if !terse || !flags.is_empty() {
            write!(self.output, "    flags")?;
            for flag in flags {
                write!(self.output, " \"{}\"", flag)?;
            }
            writeln!(self.output)?;
        }
        if let Some(dominator) = block.dominator {
            writeln!(self.output, "    dominator \"B{}\"", dominator.0)?;
        }

        if !terse {
            writeln!(self.output, "    begin_states")?;
            writeln!(self.output, "      begin_locals")?;
            writeln!(self.output, "        size 0")?;
            writeln!(self.output, "        method \"None\"")?;
            writeln!(self.output, "      end_locals")?;
            writeln!(self.output, "    end_states")?;
        }

        writeln!(self.output, "    begin_HIR")?;
        for &phi in &block.phis {
            self.dump_instruction(graph, phi)?;
        }
        for &instruction in &block.instructions {
            self.dump_instruction(graph, instruction)?;
        }
        writeln!(self.output, "    end_HIR")?;
        writeln!(self.output, "  end_block")
    }

    fn dump_instruction(&mut self, graph: &HGraph<'_>, id: InstrId) -> io::Result<()> {
        let instr = graph.instr(id);
        write!(
            self.output,
            "      {} {} {}{} {}",
            instr.dex_pc,
            instr.inputs.len(),
            instr.ty.visualizer_tag(),
            id.0,
            instr.kind.name()
        )?;
        if !instr.inputs.is_empty() {
            write!(self.output, " [")?;
            for &input in &instr.inputs {
                let producer = graph.instr(input);
                write!(self.output, " {}{}", producer.ty.visualizer_tag(), input.0)?;
            }
            write!(self.output, " ]")?;
        }
        if let Some(env) = &instr.environment {
            write!(self.output, " env:[")?;
            for value in &env.values {
                match value {
                    Some(v) => write!(self.output, " {}{}", graph.instr(*v).ty.visualizer_tag(), v.0)?,
                    None => write!(self.output, " _")?,
                }
            }
            write!(self.output, " ]")?;
        }
        if let Some(summary) = &instr.locations {
            if summary.all_concrete() {
                write!(self.output, " liveness:(")?;
                for (i, &input) in summary.inputs().iter().enumerate() {
                    if i > 0 {
                        write!(self.output, ",")?;
                    }
                    write!(self.output, "{}", format_location(input))?;
                }
                write!(self.output, ")->{}", format_location(summary.out()))?;
            }
        }
        writeln!(self.output, " <|@")
    }

    /// Final-lowering dump: the cfg with each block's code range rendered by
    /// the disassembler, if one was provided.
    pub fn dump_disassembly(
        &mut self,
        _graph: &HGraph<'_>,
        code: &[u8],
        block_ranges: &[(BlockId, usize, usize)],
        disassembler: Option<&dyn Disassembler>,
    ) -> io::Result<()> {
        writeln!(self.output, "begin_cfg")?;
        writeln!(self.output, "  name \"disassembly (after)\"")?;
        for &(block, start, end) in block_ranges {
            writeln!(self.output, "  begin_block")?;
            writeln!(self.output, "    name \"B{}\"", block.0)?;
            writeln!(self.output, "    from_bb_id {}", block.0)?;
            writeln!(self.output, "    to_bb_id {}", block.0)?;
            writeln!(self.output, "    begin_HIR")?;
            match disassembler {
                Some(d) => {
                    for line in d.disassemble(start, &code[start..end]).lines() {
                        writeln!(self.output, "      0 0 v0 {} <|@", line)?;
                    }
                }
                None => {
                    writeln!(self.output, "      0 0 v0 0x{:04x}..0x{:04x} <|@", start, end)?;
                }
            }
            writeln!(self.output, "    end_HIR")?;
            writeln!(self.output, "  end_block")?;
        }
        writeln!(self.output, "end_cfg")
    }
}

fn core_name(reg: Register) -> &'static str {
    match reg {
        Register::EAX => "EAX",
        Register::ECX => "ECX",
        Register::EDX => "EDX",
        Register::EBX => "EBX",
        Register::ESP => "ESP",
        Register::EBP => "EBP",
        Register::ESI => "ESI",
        Register::EDI => "EDI",
    }
}

fn fpu_name(reg: XmmRegister) -> &'static str {
    match reg {
        XmmRegister::XMM0 => "XMM0",
        XmmRegister::XMM1 => "XMM1",
        XmmRegister::XMM2 => "XMM2",
        XmmRegister::XMM3 => "XMM3",
        XmmRegister::XMM4 => "XMM4",
        XmmRegister::XMM5 => "XMM5",
        XmmRegister::XMM6 => "XMM6",
        XmmRegister::XMM7 => "XMM7",
    }
}

/// Compact location rendering for instruction lines.
pub fn format_location(location: Location) -> String {
    match location {
        Location::Invalid => "invalid".to_string(),
        Location::Constant(id) => format!("#{}", id.0),
        Location::Register(r) => core_name(r).to_string(),
        Location::RegisterPair(lo, hi) => format!("{}:{}", core_name(lo), core_name(hi)),
        Location::FpuRegister(r) => fpu_name(r).to_string(),
        Location::FpuRegisterPair(lo, hi) => format!("{}:{}", fpu_name(lo), fpu_name(hi)),
        Location::StackSlot(offset) => format!("[sp+{}]", offset),
        Location::DoubleStackSlot(offset) => format!("2x[sp+{}]", offset),
        Location::SimdStackSlot(offset) => format!("4x[sp+{}]", offset),
        Location::Unallocated(kind) => format!("unallocated({:?})", kind),
        Location::NoLocation => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CompilationSession;
    use crate::graph::{DataType, HInstructionKind, NO_DEX_PC};
    use bumpalo::Bump;

    fn dump(pass_name: &str) -> String {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut graph = HGraph::new(&session, "Foo.bar");
        let entry = graph.entry_block();
        let exit = graph.add_block();
        graph.set_exit_block(exit);
        graph.connect(entry, exit);
        let a = graph.add_instruction(
            entry,
            HInstructionKind::IntConstant(3),
            DataType::Int32,
            vec![],
            NO_DEX_PC,
        );
        let neg = graph.add_instruction(
            entry,
            HInstructionKind::Neg,
            DataType::Int32,
            vec![a],
            2,
        );
        graph.add_instruction(entry, HInstructionKind::Return, DataType::Void, vec![neg], 3);
        graph.add_instruction(exit, HInstructionKind::Exit, DataType::Void, vec![], NO_DEX_PC);
        graph.compute_reverse_post_order();

        let mut buffer: Vec<u8> = Vec::new();
        let mut visualizer = HGraphVisualizer::new(&mut buffer, "Foo.bar").unwrap();
        visualizer.dump_graph(&graph, pass_name, false).unwrap();
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn test_structure_and_sentinels() {
        let text = dump("builder");
        assert!(text.starts_with("begin_compilation"));
        assert!(text.contains("name \"builder (before)\""));
        assert!(text.contains("name \"B0\""));
        // One sentinel per instruction.
        assert_eq!(text.matches("<|@").count(), 4);
    }

    #[test]
    fn test_typed_input_references() {
        let text = dump("builder");
        // Neg consumes the Int32 constant: an i-tagged reference.
        assert!(text.contains("Neg [ i0 ]"));
    }

    #[test]
    fn test_debug_pass_elides_empty_fields() {
        let full = dump("builder");
        let terse = dump(DEBUG_PASS_NAME);
        assert!(full.contains("begin_states"));
        assert!(!terse.contains("begin_states"));
        // The entry block has no predecessors; the line disappears entirely.
        assert!(terse.len() < full.len());
    }

    #[test]
    fn test_location_rendering() {
        assert_eq!(format_location(Location::Register(Register::ESI)), "ESI");
        assert_eq!(
            format_location(Location::RegisterPair(Register::EAX, Register::EDX)),
            "EAX:EDX"
        );
        assert_eq!(format_location(Location::DoubleStackSlot(8)), "2x[sp+8]");
        assert_eq!(format_location(Location::NoLocation), "-");
    }
}
