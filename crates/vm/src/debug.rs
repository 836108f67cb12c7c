//! Bytecode disassembler.
//!
//! Renders a chunk one instruction per line, resolving constant operands
//! against the heap so names and literals read back out of the listing.

use crate::chunk::{Chunk, OpCode};
use crate::gc::Heap;
use crate::value::Value;

/// Disassemble a whole chunk under a header.
pub fn disassemble_chunk(heap: &Heap, chunk: &Chunk, name: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!("== {name} ==\n"));
    let mut offset = 0;
    while offset < chunk.code.len() {
        let (line, next) = disassemble_instruction(heap, chunk, offset);
        out.push_str(&line);
        out.push('\n');
        offset = next;
    }
    out
}

/// Disassemble the instruction at `offset`; returns the rendered line and
/// the offset of the next instruction.
pub fn disassemble_instruction(heap: &Heap, chunk: &Chunk, offset: usize) -> (String, usize) {
    let mut line = format!("{offset:04} ");
    if offset > 0 && chunk.line_of(offset) == chunk.line_of(offset - 1) {
        line.push_str("   | ");
    } else {
        line.push_str(&format!("{:4} ", chunk.line_of(offset)));
    }

    let op = match OpCode::try_from(chunk.code[offset]) {
        Ok(op) => op,
        Err(_) => {
            line.push_str(&format!("<bad opcode {:#04x}>", chunk.code[offset]));
            return (line, offset + 1);
        }
    };

    match op {
        OpCode::Constant
        | OpCode::GetGlobal
        | OpCode::DefineGlobal
        | OpCode::SetGlobal
        | OpCode::GetProperty
        | OpCode::SetProperty
        | OpCode::GetSuper
        | OpCode::Class
        | OpCode::Method => {
            let constant = chunk.code[offset + 1];
            line.push_str(&format!(
                "{:<16} {:4} '{}'",
                op_name(op),
                constant,
                render_constant(heap, chunk, constant)
            ));
            (line, offset + 2)
        }
        OpCode::GetLocal | OpCode::SetLocal | OpCode::GetUpvalue | OpCode::SetUpvalue | OpCode::Call => {
            let slot = chunk.code[offset + 1];
            line.push_str(&format!("{:<16} {:4}", op_name(op), slot));
            (line, offset + 2)
        }
        OpCode::Invoke | OpCode::SuperInvoke => {
            let constant = chunk.code[offset + 1];
            let argc = chunk.code[offset + 2];
            line.push_str(&format!(
                "{:<16} ({argc} args) {:4} '{}'",
                op_name(op),
                constant,
                render_constant(heap, chunk, constant)
            ));
            (line, offset + 3)
        }
        OpCode::Jump | OpCode::JumpIfFalse => {
            let jump = read_u16(chunk, offset + 1) as usize;
            line.push_str(&format!(
                "{:<16} {:4} -> {}",
                op_name(op),
                offset,
                offset + 3 + jump
            ));
            (line, offset + 3)
        }
        OpCode::Loop => {
            let jump = read_u16(chunk, offset + 1) as usize;
            line.push_str(&format!(
                "{:<16} {:4} -> {}",
                op_name(op),
                offset,
                offset + 3 - jump
            ));
            (line, offset + 3)
        }
        OpCode::BuildList => {
            let count = read_u16(chunk, offset + 1);
            line.push_str(&format!("{:<16} {:4}", op_name(op), count));
            (line, offset + 3)
        }
        OpCode::Closure => {
            let constant = chunk.code[offset + 1];
            line.push_str(&format!(
                "{:<16} {:4} {}",
                op_name(op),
                constant,
                render_constant(heap, chunk, constant)
            ));
            let mut next = offset + 2;
            if let Some(Value::Function(function)) = chunk.constants.get(constant as usize) {
                for _ in 0..heap.get_function(*function).upvalue_count {
                    let is_local = chunk.code[next];
                    let index = chunk.code[next + 1];
                    line.push_str(&format!(
                        "\n{:04}    |   {:>10} {}",
                        next,
                        if is_local == 1 { "local" } else { "upvalue" },
                        index
                    ));
                    next += 2;
                }
            }
            (line, next)
        }
        _ => {
            line.push_str(op_name(op));
            (line, offset + 1)
        }
    }
}

fn read_u16(chunk: &Chunk, offset: usize) -> u16 {
    ((chunk.code[offset] as u16) << 8) | chunk.code[offset + 1] as u16
}

fn render_constant(heap: &Heap, chunk: &Chunk, index: u8) -> String {
    match chunk.constants.get(index as usize) {
        Some(&value) => heap.format_value(value),
        None => "<missing constant>".to_string(),
    }
}

fn op_name(op: OpCode) -> &'static str {
    match op {
        OpCode::Constant => "CONSTANT",
        OpCode::Null => "NULL",
        OpCode::True => "TRUE",
        OpCode::False => "FALSE",
        OpCode::Pop => "POP",
        OpCode::GetLocal => "GET_LOCAL",
        OpCode::SetLocal => "SET_LOCAL",
        OpCode::GetGlobal => "GET_GLOBAL",
        OpCode::DefineGlobal => "DEFINE_GLOBAL",
        OpCode::SetGlobal => "SET_GLOBAL",
        OpCode::GetUpvalue => "GET_UPVALUE",
        OpCode::SetUpvalue => "SET_UPVALUE",
        OpCode::GetProperty => "GET_PROPERTY",
        OpCode::SetProperty => "SET_PROPERTY",
        OpCode::GetSuper => "GET_SUPER",
        OpCode::Equal => "EQUAL",
        OpCode::Greater => "GREATER",
        OpCode::Less => "LESS",
        OpCode::Add => "ADD",
        OpCode::Subtract => "SUBTRACT",
        OpCode::Multiply => "MULTIPLY",
        OpCode::Divide => "DIVIDE",
        OpCode::Not => "NOT",
        OpCode::Negate => "NEGATE",
        OpCode::Print => "PRINT",
        OpCode::Jump => "JUMP",
        OpCode::JumpIfFalse => "JUMP_IF_FALSE",
        OpCode::Loop => "LOOP",
        OpCode::Call => "CALL",
        OpCode::Invoke => "INVOKE",
        OpCode::SuperInvoke => "SUPER_INVOKE",
        OpCode::Closure => "CLOSURE",
        OpCode::CloseUpvalue => "CLOSE_UPVALUE",
        OpCode::Return => "RETURN",
        OpCode::Class => "CLASS",
        OpCode::Inherit => "INHERIT",
        OpCode::Method => "METHOD",
        OpCode::BuildList => "BUILD_LIST",
        OpCode::IndexSubscript => "INDEX_SUBSCR",
        OpCode::StoreSubscript => "STORE_SUBSCR",
    }
}
